//! Controller-side metrics, recorded through the `metrics` facade rather
//! than a direct `prometheus` dependency: the Prometheus exporter is
//! installed once, process-wide, by whichever binary calls
//! `store_common::metrics::maybe_spawn_metrics_server`. Names follow the
//! stable metric surface the intent layer's `/metrics` route exposes.

use metrics::{counter, histogram};
use std::time::Instant;

use store_types::StorePhase;

/// Records a single reconcile attempt: its outcome and how long the
/// read+write cycle took, feeding the `reconcile_duration_seconds`
/// histogram.
pub struct ReconcileTimer {
    store: String,
    started: Instant,
}

impl ReconcileTimer {
    pub fn start(store: &str) -> Self {
        Self {
            store: store.to_string(),
            started: Instant::now(),
        }
    }

    pub fn finish(self, outcome: &str) {
        histogram!(
            "reconcile_duration_seconds",
            "store" => self.store,
            "outcome" => outcome.to_string()
        )
        .record(self.started.elapsed().as_secs_f64());
    }
}

/// Updates the `stores_total{phase}` gauge for a store moving from
/// `from` (`None` on first observation) to `to`.
pub fn record_phase(store: &str, from: Option<StorePhase>, to: StorePhase) {
    store_common::metrics::record_phase_gauge(from, to);
    counter!(
        "store_operator_phase_transitions_total",
        "store" => store.to_string(),
        "phase" => to.to_string()
    )
    .increment(1);
}

pub fn record_stage_failure(stage: &str) {
    counter!("provisioning_failures_total", "stage" => stage.to_string()).increment(1);
}
