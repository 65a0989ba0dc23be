use k8s_openapi::apimachinery::pkg::apis::meta::v1::{Condition, Time};
use serde::Serialize;
use store_types::{ActivityLogEntry, Engine, Store, StorePhase};

/// What the HTTP API actually returns for a store: the spec/status
/// fields named in the resource schema, with the Kubernetes metadata
/// envelope stripped away.
#[derive(Debug, Clone, Serialize)]
pub struct StoreSnapshot {
    pub name: String,
    pub engine: Engine,
    pub owner: String,
    pub phase: StorePhase,
    pub conditions: Vec<Condition>,
    #[serde(rename = "activityLog")]
    pub activity_log: Vec<ActivityLogEntry>,
    pub url: Option<String>,
    #[serde(rename = "adminUrl")]
    pub admin_url: Option<String>,
    #[serde(rename = "retryCount")]
    pub retry_count: u32,
    #[serde(rename = "createdAt")]
    pub created_at: Option<Time>,
}

impl From<&Store> for StoreSnapshot {
    fn from(store: &Store) -> Self {
        let status = store.status.clone().unwrap_or_default();
        Self {
            name: store.metadata.name.clone().unwrap_or_default(),
            engine: store.spec.engine,
            owner: store.spec.owner.clone(),
            phase: status.phase,
            conditions: status.conditions,
            activity_log: status.activity_log,
            url: status.url,
            admin_url: status.admin_url,
            retry_count: status.retry_count,
            created_at: status.created_at,
        }
    }
}
