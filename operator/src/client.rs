//! The operator's collaborators: the Kubernetes API for namespace and
//! manifest management, and the template renderer that turns a store's
//! spec into the manifests for its backend and storefront. Both are
//! traits so the reconciler can be exercised against fakes in tests.

use std::{collections::BTreeMap, time::Duration};

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{LimitRange, Namespace, PersistentVolumeClaim, ResourceQuota};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube::{
    Api, Client, ResourceExt,
    api::{DynamicObject, GroupVersionKind, ObjectMeta, Patch, PatchParams, PropagationPolicy},
    discovery::pinned_kind,
};
use serde::Deserialize;
use store_types::{ConditionType, Engine};

use crate::error::Error;

/// State of a release as reported by the template renderer. Mirrors
/// the states a stuck Helm-style install can be left in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseState {
    NotInstalled,
    PendingInstall,
    PendingUpgrade,
    Failed,
    Installed,
}

impl ReleaseState {
    /// Whether this state needs to be purged before a fresh install is
    /// attempted.
    pub fn is_stuck(&self) -> bool {
        matches!(self, ReleaseState::PendingInstall | ReleaseState::PendingUpgrade | ReleaseState::Failed)
    }
}

#[async_trait]
pub trait TemplateRenderer: Send + Sync {
    /// Renders the backend + storefront manifests for `name`. The
    /// result is opaque to the reconciler: it's handed straight to
    /// [`ResourceClient::apply_rendered`].
    async fn render(&self, name: &str, engine: Engine) -> Result<String, Error>;

    /// Reports the current release state for `name`, used to detect a
    /// prior stuck install before attempting a fresh one.
    async fn release_status(&self, name: &str) -> Result<ReleaseState, Error>;

    /// Purges a stuck release so a fresh install can proceed.
    async fn purge(&self, name: &str) -> Result<(), Error>;
}

#[async_trait]
pub trait ResourceClient: Send + Sync {
    async fn ensure_namespace(&self, name: &str, owner: &str) -> Result<(), Error>;
    async fn apply_rendered(&self, name: &str, manifest: &str) -> Result<(), Error>;
    async fn database_ready(&self, name: &str) -> Result<bool, Error>;
    async fn backend_ready(&self, name: &str) -> Result<bool, Error>;
    async fn storefront_ready(&self, name: &str) -> Result<bool, Error>;
    /// Enumerates the expected tenant workloads and returns the
    /// conditions among {DatabaseReady, BackendReady, StorefrontReady}
    /// whose workload is missing or under its declared replica count.
    /// Empty means the partition matches its declared state.
    async fn presence_check(&self, name: &str) -> Result<Vec<ConditionType>, Error>;
    /// Tears down the tenant partition. Returns `true` once the
    /// namespace is fully gone.
    async fn teardown(&self, name: &str) -> Result<bool, Error>;
    /// Polls the tenant's persistent volume claims until none remain
    /// or the budget is exhausted. Returns whether they were released
    /// within budget.
    async fn wait_for_pv_release(&self, name: &str) -> Result<bool, Error>;
}

pub const MANAGER_NAME: &str = "store-operator";

fn namespace_for(store: &str) -> String {
    format!("store-{store}")
}

/// Deployment name for each workload-backed pipeline stage, in the
/// tenant's namespace.
const WORKLOADS: [(ConditionType, &str); 3] = [
    (ConditionType::DatabaseReady, "database"),
    (ConditionType::BackendReady, "backend"),
    (ConditionType::StorefrontReady, "storefront"),
];

const PV_RELEASE_POLL_INTERVAL: Duration = Duration::from_secs(2);
const PV_RELEASE_BUDGET: Duration = Duration::from_secs(60);

pub struct KubeResourceClient {
    client: Client,
    http: reqwest::Client,
}

impl KubeResourceClient {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            http: reqwest::Client::new(),
        }
    }

    async fn probe(&self, store: &str, service: &str) -> Result<bool, Error> {
        let ns = namespace_for(store);
        let url = format!("http://{service}.{ns}.svc.cluster.local/healthz");
        match self.http.get(&url).send().await {
            Ok(resp) => Ok(resp.status().is_success()),
            Err(_) => Ok(false),
        }
    }

    async fn deployment_present_and_ready(&self, namespace: &str, name: &str) -> Result<bool, Error> {
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        Ok(match api.get_opt(name).await? {
            None => false,
            Some(dep) => {
                let declared = dep.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1);
                let ready = dep.status.as_ref().and_then(|s| s.ready_replicas).unwrap_or(0);
                ready >= declared.max(1)
            }
        })
    }

    /// Shared by the stage 3-5 readiness checks: a workload only counts
    /// as ready once it has at least one ready replica *and* answers
    /// its health probe.
    async fn workload_ready(&self, name: &str, workload: &str) -> Result<bool, Error> {
        let ns = namespace_for(name);
        if !self.deployment_present_and_ready(&ns, workload).await? {
            return Ok(false);
        }
        self.probe(name, workload).await
    }
}

#[async_trait]
impl ResourceClient for KubeResourceClient {
    async fn ensure_namespace(&self, name: &str, owner: &str) -> Result<(), Error> {
        let ns_api: Api<Namespace> = Api::all(self.client.clone());
        let ns_name = namespace_for(name);
        let labels: BTreeMap<String, String> = [
            ("store.platform/store".to_string(), name.to_string()),
            ("store.platform/owner".to_string(), owner.to_string()),
        ]
        .into_iter()
        .collect();
        let ns = Namespace {
            metadata: ObjectMeta {
                name: Some(ns_name.clone()),
                labels: Some(labels),
                ..Default::default()
            },
            ..Default::default()
        };
        ns_api
            .patch(&ns_name, &PatchParams::apply(MANAGER_NAME), &Patch::Apply(&ns))
            .await?;

        let quota_api: Api<ResourceQuota> = Api::namespaced(self.client.clone(), &ns_name);
        let quota = ResourceQuota {
            metadata: ObjectMeta {
                name: Some("tenant-quota".to_string()),
                namespace: Some(ns_name.clone()),
                ..Default::default()
            },
            spec: Some(k8s_openapi::api::core::v1::ResourceQuotaSpec {
                hard: Some(
                    [
                        ("requests.cpu".to_string(), Quantity("2".to_string())),
                        ("requests.memory".to_string(), Quantity("4Gi".to_string())),
                        ("limits.cpu".to_string(), Quantity("4".to_string())),
                        ("limits.memory".to_string(), Quantity("8Gi".to_string())),
                        ("pods".to_string(), Quantity("20".to_string())),
                    ]
                    .into_iter()
                    .collect(),
                ),
                ..Default::default()
            }),
            ..Default::default()
        };
        quota_api
            .patch("tenant-quota", &PatchParams::apply(MANAGER_NAME), &Patch::Apply(&quota))
            .await?;

        let limit_api: Api<LimitRange> = Api::namespaced(self.client.clone(), &ns_name);
        let limit_range = LimitRange {
            metadata: ObjectMeta {
                name: Some("tenant-limits".to_string()),
                namespace: Some(ns_name.clone()),
                ..Default::default()
            },
            spec: k8s_openapi::api::core::v1::LimitRangeSpec {
                limits: vec![k8s_openapi::api::core::v1::LimitRangeItem {
                    type_: "Container".to_string(),
                    default: Some(
                        [
                            ("cpu".to_string(), Quantity("500m".to_string())),
                            ("memory".to_string(), Quantity("512Mi".to_string())),
                        ]
                        .into_iter()
                        .collect(),
                    ),
                    default_request: Some(
                        [
                            ("cpu".to_string(), Quantity("100m".to_string())),
                            ("memory".to_string(), Quantity("128Mi".to_string())),
                        ]
                        .into_iter()
                        .collect(),
                    ),
                    ..Default::default()
                }],
            },
        };
        limit_api
            .patch("tenant-limits", &PatchParams::apply(MANAGER_NAME), &Patch::Apply(&limit_range))
            .await?;

        Ok(())
    }

    async fn apply_rendered(&self, name: &str, manifest: &str) -> Result<(), Error> {
        let ns_name = namespace_for(name);
        for document in serde_yaml::Deserializer::from_str(manifest) {
            let object = DynamicObject::deserialize(document).map_err(|e| Error::Render(e.to_string()))?;
            // Renderers sometimes emit a blank document between `---`
            // separators; those deserialize to an object with no type.
            let Some(types) = object.types.clone() else { continue };

            let gvk = GroupVersionKind::try_from(&types).map_err(|e| Error::Render(e.to_string()))?;
            let (resource, capabilities) =
                pinned_kind(&self.client, &gvk).await.map_err(|e| Error::Render(e.to_string()))?;

            let object_name = object
                .metadata
                .name
                .clone()
                .ok_or_else(|| Error::Render(format!("rendered {} object has no name", gvk.kind)))?;

            let api: Api<DynamicObject> = match capabilities.scope {
                kube::discovery::Scope::Namespaced => Api::namespaced_with(self.client.clone(), &ns_name, &resource),
                kube::discovery::Scope::Cluster => Api::all_with(self.client.clone(), &resource),
            };
            api.patch(&object_name, &PatchParams::apply(MANAGER_NAME).force(), &Patch::Apply(&object))
                .await?;
        }
        Ok(())
    }

    async fn database_ready(&self, name: &str) -> Result<bool, Error> {
        self.workload_ready(name, "database").await
    }

    async fn backend_ready(&self, name: &str) -> Result<bool, Error> {
        self.workload_ready(name, "backend").await
    }

    async fn storefront_ready(&self, name: &str) -> Result<bool, Error> {
        self.workload_ready(name, "storefront").await
    }

    async fn presence_check(&self, name: &str) -> Result<Vec<ConditionType>, Error> {
        let ns_name = namespace_for(name);
        let mut affected = Vec::new();
        for (ty, workload) in WORKLOADS {
            if !self.deployment_present_and_ready(&ns_name, workload).await? {
                affected.push(ty);
            }
        }
        Ok(affected)
    }

    async fn teardown(&self, name: &str) -> Result<bool, Error> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        let ns_name = namespace_for(name);
        match api.get_opt(&ns_name).await? {
            None => Ok(true),
            Some(ns) if ns.meta().deletion_timestamp.is_some() => Ok(false),
            Some(_) => {
                let dp = kube::api::DeleteParams {
                    propagation_policy: Some(PropagationPolicy::Foreground),
                    ..Default::default()
                };
                api.delete(&ns_name, &dp).await?;
                Ok(false)
            }
        }
    }

    async fn wait_for_pv_release(&self, name: &str) -> Result<bool, Error> {
        let ns_name = namespace_for(name);
        let api: Api<PersistentVolumeClaim> = Api::namespaced(self.client.clone(), &ns_name);
        let deadline = tokio::time::Instant::now() + PV_RELEASE_BUDGET;
        loop {
            if api.list(&kube::api::ListParams::default()).await?.items.is_empty() {
                return Ok(true);
            }
            if tokio::time::Instant::now() >= deadline {
                return Ok(false);
            }
            tokio::time::sleep(PV_RELEASE_POLL_INTERVAL).await;
        }
    }
}

/// Production renderer: shells out to the opaque external template
/// renderer over HTTP, bounded by `timeout`.
pub struct HttpTemplateRenderer {
    http: reqwest::Client,
    base_url: String,
}

impl HttpTemplateRenderer {
    pub fn new(base_url: String, timeout: Duration) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .expect("build renderer HTTP client"),
            base_url,
        }
    }
}

#[async_trait]
impl TemplateRenderer for HttpTemplateRenderer {
    async fn render(&self, name: &str, engine: Engine) -> Result<String, Error> {
        let partition = namespace_for(name);
        let resp = self
            .http
            .post(format!("{}/render", self.base_url))
            .json(&serde_json::json!({ "name": name, "engine": engine, "partition": partition }))
            .send()
            .await
            .map_err(|e| Error::Render(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(Error::Render(format!("renderer returned {}", resp.status())));
        }
        resp.text().await.map_err(|e| Error::Render(e.to_string()))
    }

    async fn release_status(&self, name: &str) -> Result<ReleaseState, Error> {
        let resp = self
            .http
            .get(format!("{}/status/{name}", self.base_url))
            .send()
            .await
            .map_err(|e| Error::Render(e.to_string()))?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(ReleaseState::NotInstalled);
        }
        let body: serde_json::Value = resp.json().await.map_err(|e| Error::Render(e.to_string()))?;
        Ok(match body.get("state").and_then(|v| v.as_str()) {
            Some("pending-install") => ReleaseState::PendingInstall,
            Some("pending-upgrade") => ReleaseState::PendingUpgrade,
            Some("failed") => ReleaseState::Failed,
            Some("installed") | Some("deployed") => ReleaseState::Installed,
            _ => ReleaseState::NotInstalled,
        })
    }

    async fn purge(&self, name: &str) -> Result<(), Error> {
        let resp = self
            .http
            .post(format!("{}/purge/{name}", self.base_url))
            .send()
            .await
            .map_err(|e| Error::Render(e.to_string()))?;
        if !resp.status().is_success() && resp.status() != reqwest::StatusCode::NOT_FOUND {
            return Err(Error::Render(format!("purge returned {}", resp.status())));
        }
        Ok(())
    }
}

pub struct FakeRenderer;

#[async_trait]
impl TemplateRenderer for FakeRenderer {
    async fn render(&self, name: &str, engine: Engine) -> Result<String, Error> {
        Ok(format!("# rendered manifests for {name} ({engine})"))
    }

    async fn release_status(&self, _name: &str) -> Result<ReleaseState, Error> {
        Ok(ReleaseState::NotInstalled)
    }

    async fn purge(&self, _name: &str) -> Result<(), Error> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn release_state_stuck_classification() {
        assert!(ReleaseState::PendingInstall.is_stuck());
        assert!(ReleaseState::PendingUpgrade.is_stuck());
        assert!(ReleaseState::Failed.is_stuck());
        assert!(!ReleaseState::Installed.is_stuck());
        assert!(!ReleaseState::NotInstalled.is_stuck());
    }
}
