use chrono::Utc;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{Condition, Time};
use kube::{
    Api, Client,
    api::{Patch, PatchParams},
};
use store_types::{ActivityLogEntry, ConditionType, Store, StoreStatus, push_activity_log};

use crate::error::{Error, instance_name};

pub const MANAGER_NAME: &str = "store-operator";

/// Mutates `store`'s status via `f`, diffs the serialized object
/// before and after, and applies the difference as a JSON patch
/// against the status subresource. A no-op mutation skips the API
/// call entirely.
pub async fn patch_status<F, T>(client: Client, store: &Store, f: F) -> Result<T, Error>
where
    F: FnOnce(&mut StoreStatus) -> T,
{
    let name = instance_name(store)?;
    let api: Api<Store> = Api::all(client);

    let mut updated = store.clone();
    let status = updated.status.get_or_insert_with(StoreStatus::default);
    let result = f(status);
    let status = updated.status.as_mut().unwrap();
    status.observed_generation = store.metadata.generation;
    if status.created_at.is_none() {
        status.created_at = Some(Time(Utc::now()));
    }

    let original = serde_json::to_value(store)?;
    let patched_value = serde_json::to_value(&updated)?;
    let patch = json_patch::diff(&original, &patched_value);

    if !patch.0.is_empty() {
        api.patch_status(name, &PatchParams::apply(MANAGER_NAME), &Patch::Json::<()>(patch))
            .await?;
    }

    Ok(result)
}

pub fn upsert_condition(status: &mut StoreStatus, ty: ConditionType, is_true: bool, reason: &str, message: &str) {
    let new_status = if is_true { "True" } else { "False" };
    let now = Time(Utc::now());

    if let Some(existing) = status.conditions.iter_mut().find(|c| c.type_ == ty.as_str()) {
        if existing.status != new_status {
            existing.last_transition_time = now;
        }
        existing.status = new_status.to_string();
        existing.reason = reason.to_string();
        existing.message = message.to_string();
    } else {
        status.conditions.push(Condition {
            type_: ty.as_str().to_string(),
            status: new_status.to_string(),
            reason: reason.to_string(),
            message: message.to_string(),
            last_transition_time: now,
            observed_generation: None,
        });
    }
}

pub fn log_activity(status: &mut StoreStatus, event: &str, message: &str) {
    push_activity_log(
        &mut status.activity_log,
        ActivityLogEntry {
            timestamp: Time(Utc::now()),
            event: event.to_string(),
            message: message.to_string(),
        },
    );
}
