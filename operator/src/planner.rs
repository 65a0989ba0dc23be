use std::time::Duration;

use serde::Serialize;
use sha2::{Digest, Sha256};
use store_types::{ConditionType, Engine, StorePhase, StoreStatus};

pub const MAX_RETRIES: u32 = 3;

/// Per-stage requeue schedule: `requeue_after` exponentiates `initial`
/// by `factor` per retry, capped at `cap`, then jitters by ±20%.
#[derive(Debug, Clone, Copy)]
pub struct BackoffConfig {
    pub initial: Duration,
    pub factor: f64,
    pub cap: Duration,
}

/// The lowest-indexed pipeline condition that isn't yet `True`. `None`
/// means every stage has completed.
pub fn next_stage(status: &StoreStatus) -> Option<ConditionType> {
    ConditionType::ALL
        .into_iter()
        .find(|ty| !status.condition(*ty).is_some_and(|c| c.status == "True"))
}

/// Computes the phase to publish given the current conditions and
/// engine. Woocommerce stores never leave `ComingSoon`: the backend
/// isn't built yet, so there's nothing further to provision.
pub fn determine_phase(
    status: &StoreStatus,
    engine: Engine,
    deleting: bool,
    retries_exhausted: bool,
) -> StorePhase {
    if deleting {
        return StorePhase::Deleting;
    }
    if engine == Engine::Woocommerce {
        return StorePhase::ComingSoon;
    }
    if retries_exhausted {
        return StorePhase::Failed;
    }
    if status.any_false() {
        StorePhase::Failed
    } else if status.all_true() {
        StorePhase::Ready
    } else if status.conditions.is_empty() {
        StorePhase::Pending
    } else {
        StorePhase::Provisioning
    }
}

pub fn retries_exhausted(retry_count: u32) -> bool {
    retry_count >= MAX_RETRIES
}

/// Backoff before the next reconcile attempt after a failed stage.
pub fn requeue_after(retry_count: u32, backoff: &BackoffConfig) -> Duration {
    store_common::wait::backoff_with_jitter(backoff.initial, backoff.factor, backoff.cap, retry_count)
}

/// SHA256 hex digest of a spec, stored as an annotation to detect
/// drift between the applied spec and the last one fully reconciled.
pub fn hash_spec<T: Serialize>(spec: &T) -> String {
    let bytes = serde_json::to_vec(spec).expect("serialize spec");
    hex::encode(Sha256::digest(&bytes))
}

pub fn spec_drifted(annotated_hash: Option<&str>, desired_hash: &str) -> bool {
    annotated_hash != Some(desired_hash)
}

/// Public storefront and admin URLs for a store, minted once
/// `StorefrontReady` first succeeds.
pub fn compute_urls(name: &str, domain: &str) -> (String, String) {
    (format!("https://{name}.{domain}"), format!("https://{name}-admin.{domain}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::{Condition, Time};
    use store_types::StoreSpec;

    fn condition(ty: ConditionType, status: &str) -> Condition {
        Condition {
            type_: ty.as_str().to_string(),
            status: status.to_string(),
            reason: "test".to_string(),
            message: "test".to_string(),
            last_transition_time: Time(chrono::Utc::now()),
            observed_generation: None,
        }
    }

    #[test]
    fn next_stage_is_none_when_all_true() {
        let status = StoreStatus {
            conditions: ConditionType::ALL
                .iter()
                .map(|ty| condition(*ty, "True"))
                .collect(),
            ..Default::default()
        };
        assert_eq!(next_stage(&status), None);
    }

    #[test]
    fn next_stage_picks_first_incomplete_in_pipeline_order() {
        let status = StoreStatus {
            conditions: vec![
                condition(ConditionType::NamespaceReady, "True"),
                condition(ConditionType::HelmInstalled, "True"),
            ],
            ..Default::default()
        };
        assert_eq!(next_stage(&status), Some(ConditionType::DatabaseReady));
    }

    #[test]
    fn woocommerce_stays_coming_soon_even_when_healthy() {
        let status = StoreStatus {
            conditions: ConditionType::ALL
                .iter()
                .map(|ty| condition(*ty, "True"))
                .collect(),
            ..Default::default()
        };
        assert_eq!(
            determine_phase(&status, Engine::Woocommerce, false, false),
            StorePhase::ComingSoon
        );
    }

    #[test]
    fn deleting_wins_over_any_other_phase() {
        let status = StoreStatus::default();
        assert_eq!(
            determine_phase(&status, Engine::Medusa, true, false),
            StorePhase::Deleting
        );
    }

    #[test]
    fn any_false_condition_means_failed() {
        let status = StoreStatus {
            conditions: vec![condition(ConditionType::NamespaceReady, "False")],
            ..Default::default()
        };
        assert_eq!(
            determine_phase(&status, Engine::Medusa, false, false),
            StorePhase::Failed
        );
    }

    #[test]
    fn exhausted_retries_fail_even_without_a_false_condition() {
        let status = StoreStatus {
            conditions: vec![condition(ConditionType::NamespaceReady, "True")],
            ..Default::default()
        };
        assert_eq!(
            determine_phase(&status, Engine::Medusa, false, true),
            StorePhase::Failed
        );
    }

    #[test]
    fn empty_conditions_is_pending() {
        let status = StoreStatus::default();
        assert_eq!(
            determine_phase(&status, Engine::Medusa, false, false),
            StorePhase::Pending
        );
    }

    #[test]
    fn retries_exhausted_boundary() {
        assert!(!retries_exhausted(MAX_RETRIES - 1));
        assert!(retries_exhausted(MAX_RETRIES));
    }

    #[test]
    fn hash_is_stable_for_equal_specs() {
        let spec = StoreSpec {
            engine: Engine::Medusa,
            owner: "alice".to_string(),
        };
        assert_eq!(hash_spec(&spec), hash_spec(&spec));
    }

    #[test]
    fn hash_changes_when_spec_changes() {
        let a = StoreSpec {
            engine: Engine::Medusa,
            owner: "alice".to_string(),
        };
        let b = StoreSpec {
            engine: Engine::Medusa,
            owner: "bob".to_string(),
        };
        assert_ne!(hash_spec(&a), hash_spec(&b));
    }

    #[test]
    fn drift_detection_treats_missing_annotation_as_drifted() {
        assert!(spec_drifted(None, "abc"));
        assert!(!spec_drifted(Some("abc"), "abc"));
        assert!(spec_drifted(Some("abc"), "def"));
    }

    #[test]
    fn compute_urls_derives_admin_subdomain() {
        let (url, admin_url) = compute_urls("shop1", "stores.example.com");
        assert_eq!(url, "https://shop1.stores.example.com");
        assert_eq!(admin_url, "https://shop1-admin.stores.example.com");
    }
}
