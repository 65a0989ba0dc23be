use axum::{
    Json,
    extract::{
        Path, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
};
use futures_util::StreamExt;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::api::{DeleteParams, ListParams, PostParams};
use serde::{Deserialize, Serialize};
use serde_json::json;
use store_common::identity::Identity;
use store_types::{ACTIVITY_LOG_CAPACITY, ActivityLogEntry, Engine, Store, StoreSpec, validate_name};
use tokio_stream::wrappers::BroadcastStream;

use crate::{error::Error, snapshot::StoreSnapshot, state::AppState};

pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let bus = if state.events.is_durable_available() { "durable" } else { "degraded" };
    if state.events.is_durable_available() {
        Json(json!({"status": "ok", "bus": bus})).into_response()
    } else {
        (axum::http::StatusCode::SERVICE_UNAVAILABLE, Json(json!({"status": "degraded", "bus": bus})))
            .into_response()
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateRequest {
    pub name: String,
    pub engine: Engine,
    #[serde(default)]
    pub owner: Option<String>,
}

pub async fn create(
    State(state): State<AppState>,
    identity: Identity,
    Json(req): Json<CreateRequest>,
) -> Result<impl IntoResponse, Error> {
    validate_name(&req.name).map_err(Error::Validation)?;

    let owner = req.owner.filter(|o| !o.trim().is_empty()).unwrap_or(identity.0.clone());

    if let Some(existing) = state.api.get_opt(&req.name).await? {
        return if existing.spec.owner == owner && existing.spec.engine == req.engine {
            Ok((axum::http::StatusCode::CREATED, Json(StoreSnapshot::from(&existing))))
        } else {
            Err(Error::Conflict(req.name))
        };
    }

    if !state.quota.try_reserve(&owner) {
        return Err(Error::Validation(format!("owner {owner} has reached its store quota")));
    }

    let store = Store::new(
        &req.name,
        StoreSpec {
            engine: req.engine,
            owner: owner.clone(),
        },
    );

    let created = match state.api.create(&PostParams::default(), &store).await {
        Ok(created) => created,
        Err(e) => {
            state.quota.release(&owner);
            return Err(e.into());
        }
    };

    metrics::counter!("stores_created_total").increment(1);
    state
        .events
        .publish(store_common::event_bus::StoreEvent::new(&req.name, "CREATE_REQUESTED", "store creation requested"))
        .await;

    Ok((axum::http::StatusCode::CREATED, Json(StoreSnapshot::from(&created))))
}

fn authorize(state: &AppState, identity: &Identity, owner: &str, name: &str) -> Result<(), Error> {
    if owner == identity.0 || state.is_privileged(&identity.0) {
        Ok(())
    } else {
        Err(Error::Forbidden(name.to_string()))
    }
}

pub async fn get(
    State(state): State<AppState>,
    identity: Identity,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, Error> {
    let store = state.api.get_opt(&name).await?.ok_or_else(|| Error::NotFound(name.clone()))?;
    authorize(&state, &identity, &store.spec.owner, &name)?;
    Ok(Json(StoreSnapshot::from(&store)))
}

#[derive(Debug, Serialize)]
pub struct ListResponse {
    pub stores: Vec<StoreSnapshot>,
}

pub async fn list(State(state): State<AppState>, identity: Identity) -> Result<impl IntoResponse, Error> {
    let stores = state.api.list(&ListParams::default()).await?;
    let visible = stores
        .iter()
        .filter(|s| s.spec.owner == identity.0 || state.is_privileged(&identity.0))
        .map(StoreSnapshot::from)
        .collect();
    Ok(Json(ListResponse { stores: visible }))
}

pub async fn delete(
    State(state): State<AppState>,
    identity: Identity,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, Error> {
    let Some(store) = state.api.get_opt(&name).await? else {
        // Deleting something that's already gone is not an error.
        return Ok(axum::http::StatusCode::ACCEPTED);
    };
    authorize(&state, &identity, &store.spec.owner, &name)?;

    state.api.delete(&name, &DeleteParams::default()).await?;
    state.quota.release(&store.spec.owner);
    metrics::counter!("stores_deleted_total").increment(1);
    Ok(axum::http::StatusCode::ACCEPTED)
}

#[derive(Debug, Serialize)]
pub struct LogsResponse {
    pub logs: Vec<store_types::ActivityLogEntry>,
}

/// Merges the resource's in-CRD activity log with the durable event
/// stream's tail, deduplicated by (timestamp, event) and sorted most
/// recent first. The CRD log alone is capped and can evict entries the
/// durable stream still remembers; the durable stream alone is empty
/// when the bus is running degraded.
pub async fn logs(
    State(state): State<AppState>,
    identity: Identity,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, Error> {
    let store = state.api.get_opt(&name).await?.ok_or_else(|| Error::NotFound(name.clone()))?;
    authorize(&state, &identity, &store.spec.owner, &name)?;

    let mut entries: Vec<ActivityLogEntry> = store.status.map(|s| s.activity_log).unwrap_or_default();
    let durable = state.events.history(&name, ACTIVITY_LOG_CAPACITY * 4).await;
    entries.extend(durable.into_iter().map(|e| ActivityLogEntry {
        timestamp: Time(e.timestamp),
        event: e.event,
        message: e.message,
    }));

    let mut seen = std::collections::HashSet::new();
    entries.retain(|e| seen.insert((e.timestamp.0.timestamp_millis(), e.event.clone())));
    entries.sort_by(|a, b| b.timestamp.0.cmp(&a.timestamp.0));

    Ok(Json(LogsResponse { logs: entries }))
}

pub async fn ws(State(state): State<AppState>, identity: Identity, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, identity))
}

/// On connect, sends a snapshot of every store the caller can see, then
/// fans out bus events for that same set of stores for the life of the
/// connection. A store created after connect isn't picked up mid-session;
/// the caller reconnects to see it.
async fn handle_socket(mut socket: WebSocket, state: AppState, identity: Identity) {
    let Ok(stores) = state.api.list(&ListParams::default()).await else {
        return;
    };
    let visible: Vec<Store> = stores
        .into_iter()
        .filter(|s| s.spec.owner == identity.0 || state.is_privileged(&identity.0))
        .collect();

    let snapshot: Vec<StoreSnapshot> = visible.iter().map(StoreSnapshot::from).collect();
    let Ok(payload) = serde_json::to_string(&json!({"type": "snapshot", "stores": snapshot})) else {
        return;
    };
    if socket.send(Message::Text(payload.into())).await.is_err() {
        return;
    }

    let mut receivers = Vec::new();
    for name in visible.iter().filter_map(|s| s.metadata.name.clone()) {
        receivers.push(BroadcastStream::new(state.events.subscribe(&name).await));
    }
    let mut events = futures_util::stream::select_all(receivers);

    loop {
        tokio::select! {
            event = events.next() => {
                match event {
                    Some(Ok(event)) => {
                        let Ok(payload) = serde_json::to_string(&event) else { continue };
                        if socket.send(Message::Text(payload.into())).await.is_err() {
                            break;
                        }
                    }
                    Some(Err(_)) => continue,
                    None => break,
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(_)) => break,
                    _ => {}
                }
            }
        }
    }
}
