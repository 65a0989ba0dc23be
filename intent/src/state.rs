use std::{collections::HashSet, sync::Arc};

use kube::{Api, Client};
use store_common::event_bus::EventBus;
use store_types::Store;

use crate::quota::OwnerQuota;

#[derive(Clone)]
pub struct AppState {
    pub api: Api<Store>,
    pub events: EventBus,
    pub quota: Arc<OwnerQuota>,
    /// Identities exempt from owner scoping on `Get`/`List`/`Delete`.
    pub privileged: Arc<HashSet<String>>,
}

impl AppState {
    pub fn new(client: Client, events: EventBus, per_owner_store_cap: u32, privileged: HashSet<String>) -> Self {
        Self {
            api: Api::all(client),
            events,
            quota: Arc::new(OwnerQuota::new(per_owner_store_cap)),
            privileged: Arc::new(privileged),
        }
    }

    pub fn is_privileged(&self, identity: &str) -> bool {
        self.privileged.contains(identity)
    }
}
