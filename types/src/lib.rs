//! The `Store` custom resource: the plane of record for one tenant
//! e-commerce deployment.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::{Condition, Time};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// The finalizer token the operator attaches while a store's tenant
/// partition exists.
pub const FINALIZER: &str = "store.platform/finalizer";

pub const MIN_NAME_LEN: usize = 3;
pub const MAX_NAME_LEN: usize = 30;

/// Engines a store can be backed by.
#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Engine {
    Medusa,
    Woocommerce,
}

impl FromStr for Engine {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "medusa" => Ok(Engine::Medusa),
            "woocommerce" => Ok(Engine::Woocommerce),
            _ => Err(()),
        }
    }
}

impl fmt::Display for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Engine::Medusa => write!(f, "medusa"),
            Engine::Woocommerce => write!(f, "woocommerce"),
        }
    }
}

/// Store is cluster-scoped: one tenant per name, independent of any
/// backing namespace.
#[derive(CustomResource, Serialize, Deserialize, Debug, PartialEq, Clone, JsonSchema)]
#[kube(
    group = "store.platform",
    version = "v1",
    kind = "Store",
    plural = "stores",
    derive = "PartialEq",
    status = "StoreStatus"
)]
#[kube(derive = "Default")]
#[kube(
    printcolumn = "{\"jsonPath\": \".status.phase\", \"name\": \"PHASE\", \"type\": \"string\" }"
)]
#[kube(
    printcolumn = "{\"jsonPath\": \".status.createdAt\", \"name\": \"AGE\", \"type\": \"date\" }"
)]
pub struct StoreSpec {
    pub engine: Engine,
    /// Identity of the caller that created this store. Immutable after
    /// creation; empty means the caller's own identity doubles as owner.
    #[serde(default)]
    pub owner: String,
}

/// Pipeline stage conditions, in pipeline order. The `str` form is the
/// `Condition::type_` value stored on the resource.
#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, JsonSchema)]
pub enum ConditionType {
    NamespaceReady,
    HelmInstalled,
    DatabaseReady,
    BackendReady,
    StorefrontReady,
}

impl ConditionType {
    /// All five, in fixed pipeline order.
    pub const ALL: [ConditionType; 5] = [
        ConditionType::NamespaceReady,
        ConditionType::HelmInstalled,
        ConditionType::DatabaseReady,
        ConditionType::BackendReady,
        ConditionType::StorefrontReady,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ConditionType::NamespaceReady => "NamespaceReady",
            ConditionType::HelmInstalled => "HelmInstalled",
            ConditionType::DatabaseReady => "DatabaseReady",
            ConditionType::BackendReady => "BackendReady",
            ConditionType::StorefrontReady => "StorefrontReady",
        }
    }

    /// Index in pipeline order.
    pub fn index(&self) -> usize {
        Self::ALL.iter().position(|c| c == self).unwrap()
    }
}

impl fmt::Display for ConditionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, JsonSchema, Default)]
pub enum StorePhase {
    #[default]
    Pending,
    Provisioning,
    Ready,
    Failed,
    ComingSoon,
    Deleting,
}

impl FromStr for StorePhase {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Pending" => Ok(StorePhase::Pending),
            "Provisioning" => Ok(StorePhase::Provisioning),
            "Ready" => Ok(StorePhase::Ready),
            "Failed" => Ok(StorePhase::Failed),
            "ComingSoon" => Ok(StorePhase::ComingSoon),
            "Deleting" => Ok(StorePhase::Deleting),
            _ => Err(()),
        }
    }
}

impl fmt::Display for StorePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorePhase::Pending => write!(f, "Pending"),
            StorePhase::Provisioning => write!(f, "Provisioning"),
            StorePhase::Ready => write!(f, "Ready"),
            StorePhase::Failed => write!(f, "Failed"),
            StorePhase::ComingSoon => write!(f, "ComingSoon"),
            StorePhase::Deleting => write!(f, "Deleting"),
        }
    }
}

/// A narrative, time-ordered event surfaced in status and on the event
/// bus. `event` is an uppercase token, e.g. `PROVISIONING_START`.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, JsonSchema)]
pub struct ActivityLogEntry {
    pub timestamp: Time,
    pub event: String,
    pub message: String,
}

/// Bound on `status.activityLog`. Oldest entries are evicted past this.
pub const ACTIVITY_LOG_CAPACITY: usize = 15;

/// Push `entry` onto `log`, evicting the head past the bound.
pub fn push_activity_log(log: &mut Vec<ActivityLogEntry>, entry: ActivityLogEntry) {
    log.push(entry);
    while log.len() > ACTIVITY_LOG_CAPACITY {
        log.remove(0);
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Default, JsonSchema)]
pub struct StoreStatus {
    #[serde(default)]
    pub phase: StorePhase,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default, rename = "activityLog")]
    pub activity_log: Vec<ActivityLogEntry>,
    pub url: Option<String>,
    #[serde(rename = "adminUrl")]
    pub admin_url: Option<String>,
    #[serde(default, rename = "retryCount")]
    pub retry_count: u32,
    #[serde(rename = "observedGeneration")]
    pub observed_generation: Option<i64>,
    #[serde(rename = "createdAt")]
    pub created_at: Option<Time>,
}

impl StoreStatus {
    /// Fetch an existing condition by type.
    pub fn condition(&self, ty: ConditionType) -> Option<&Condition> {
        self.conditions.iter().find(|c| c.type_ == ty.as_str())
    }

    pub fn all_true(&self) -> bool {
        ConditionType::ALL
            .iter()
            .all(|ty| self.condition(*ty).is_some_and(|c| c.status == "True"))
    }

    pub fn any_false(&self) -> bool {
        ConditionType::ALL
            .iter()
            .any(|ty| self.condition(*ty).is_some_and(|c| c.status == "False"))
    }
}

/// Name validation per the data model: 3-30 chars, lowercase
/// alphanumeric with hyphens, must start with a letter, must not end
/// with a hyphen.
pub fn validate_name(name: &str) -> Result<(), String> {
    if name.len() < MIN_NAME_LEN || name.len() > MAX_NAME_LEN {
        return Err(format!(
            "name must be {MIN_NAME_LEN}-{MAX_NAME_LEN} characters, got {}",
            name.len()
        ));
    }
    let first = name.chars().next().ok_or("name must not be empty")?;
    if !first.is_ascii_lowercase() {
        return Err("name must start with a lowercase letter".to_string());
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    {
        return Err("name must be lowercase alphanumeric with hyphens".to_string());
    }
    if name.ends_with('-') {
        return Err("name must not end with a hyphen".to_string());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_valid_names() {
        assert!(validate_name("shop1").is_ok());
        assert!(validate_name("a-b-c").is_ok());
        assert!(validate_name(&"a".repeat(30)).is_ok());
    }

    #[test]
    fn rejects_too_short_or_long() {
        assert!(validate_name("ab").is_err());
        assert!(validate_name(&"a".repeat(31)).is_err());
    }

    #[test]
    fn rejects_leading_digit_or_hyphen() {
        assert!(validate_name("1shop").is_err());
        assert!(validate_name("-shop").is_err());
    }

    #[test]
    fn rejects_trailing_hyphen() {
        assert!(validate_name("shop-").is_err());
    }

    #[test]
    fn rejects_uppercase_and_underscores() {
        assert!(validate_name("Shop1").is_err());
        assert!(validate_name("shop_1").is_err());
    }

    #[test]
    fn condition_type_index_is_pipeline_order() {
        assert_eq!(ConditionType::NamespaceReady.index(), 0);
        assert_eq!(ConditionType::StorefrontReady.index(), 4);
    }

    #[test]
    fn activity_log_evicts_head_past_capacity() {
        let mut log = Vec::new();
        for i in 0..20 {
            push_activity_log(
                &mut log,
                ActivityLogEntry {
                    timestamp: Time(chrono::Utc::now()),
                    event: format!("EVENT_{i}"),
                    message: String::new(),
                },
            );
        }
        assert_eq!(log.len(), ACTIVITY_LOG_CAPACITY);
        assert_eq!(log.first().unwrap().event, "EVENT_5");
        assert_eq!(log.last().unwrap().event, "EVENT_19");
    }
}
