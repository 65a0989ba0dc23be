use std::{sync::Arc, time::Duration};

use futures::stream::StreamExt;
use kube::{
    Api, Client, ResourceExt,
    runtime::{Controller, controller::Action, watcher},
};
use kube::runtime::finalizer::{Event as FinalizerEvent, finalizer};
use kube_leader_election::{LeaseLock, LeaseLockParams, LeaseLockResult};
use owo_colors::OwoColorize;
use store_common::{
    args::{ConcurrencyArgs, LeaderElectionArgs},
    event_bus::{EventBus, StoreEvent},
};
use store_types::{ConditionType, Engine, FINALIZER, Store, StorePhase};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::{
    client::{ResourceClient, TemplateRenderer},
    error::{Error, instance_name},
    metrics::ReconcileTimer,
    planner,
    status::{MANAGER_NAME, log_activity, patch_status, upsert_condition},
};

/// Shared across every reconcile and cleanup invocation.
pub struct Context {
    pub client: Client,
    pub renderer: Arc<dyn TemplateRenderer>,
    pub resources: Arc<dyn ResourceClient>,
    pub events: EventBus,
    /// Bounds how many stores are actively being worked at once.
    pub gate: Arc<Semaphore>,
    /// Base domain under which storefront and admin URLs are minted.
    pub domain: String,
    /// How long a settled, drift-free `Ready` store waits before its
    /// next presence check.
    pub drift_interval: Duration,
    /// Per-stage retry requeue schedule.
    pub backoff: planner::BackoffConfig,
}

/// Runs the controller for as long as this replica holds leadership,
/// stepping aside whenever another replica wins the lease. Only one
/// replica at a time drives reconciliation; the others stay hot and
/// pick up immediately on failover.
pub async fn run(ctx: Arc<Context>, election: LeaderElectionArgs, concurrency: ConcurrencyArgs) {
    println!("{}", "⚙️ Starting Store controller...".green());

    let holder_id = std::env::var("POD_NAME")
        .or_else(|_| std::env::var("HOSTNAME"))
        .unwrap_or_else(|_| format!("store-operator-{}", uuid::Uuid::new_v4()));

    let leadership = LeaseLock::new(
        ctx.client.clone(),
        &election.lease_namespace,
        LeaseLockParams {
            holder_id,
            lease_name: election.lease_name.clone(),
            lease_ttl: Duration::from_secs(election.lease_duration_secs),
        },
    );

    let shutdown = CancellationToken::new();
    let shutdown_signal = shutdown.clone();
    tokio::spawn(async move {
        store_common::shutdown::shutdown_signal().await;
        shutdown_signal.cancel();
    });
    store_common::signal_ready();

    let mut controller_task: Option<tokio::task::JoinHandle<()>> = None;
    let mut tick = tokio::time::interval(Duration::from_secs(election.lease_renew_secs));
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                if let Some(task) = controller_task.take() {
                    task.abort();
                    task.await.ok();
                }
                break;
            }
            _ = tick.tick() => {}
        }

        let lease = match leadership.try_acquire_or_renew().await {
            Ok(l) => l,
            Err(e) => {
                eprintln!("{}", format!("leader election renew/acquire failed: {e}").red());
                if let Some(task) = controller_task.take() {
                    task.abort();
                }
                continue;
            }
        };

        if matches!(lease, LeaseLockResult::Acquired(_)) {
            if controller_task.is_none() {
                println!("{}", "👑 Acquired leadership; starting controller".green());
                let api: Api<Store> = Api::all(ctx.client.clone());
                let gate = Arc::new(Semaphore::new(concurrency.max_concurrent_reconciles));
                let task_ctx = Arc::new(Context {
                    client: ctx.client.clone(),
                    renderer: ctx.renderer.clone(),
                    resources: ctx.resources.clone(),
                    events: ctx.events.clone(),
                    gate,
                    domain: ctx.domain.clone(),
                    drift_interval: ctx.drift_interval,
                    backoff: ctx.backoff,
                });
                controller_task = Some(tokio::spawn(async move {
                    println!("{}", "🚀 Store controller started.".green());
                    Controller::new(api, watcher::Config::default())
                        .run(reconcile, on_error, task_ctx)
                        .for_each(|res| async move {
                            if let Err(e) = res {
                                eprintln!("{}", format!("reconcile stream error: {e:?}").red());
                            }
                        })
                        .await;
                }));
            }
        } else if let Some(task) = controller_task.take() {
            eprintln!("{}", "lost leadership; stopping controller".yellow());
            task.abort();
        }
    }
}

pub async fn reconcile(store: Arc<Store>, ctx: Arc<Context>) -> Result<Action, Error> {
    let api: Api<Store> = Api::all(ctx.client.clone());
    let ctx2 = ctx.clone();
    finalizer(&api, FINALIZER, store, move |event| {
        let ctx = ctx2.clone();
        async move {
            match event {
                FinalizerEvent::Apply(store) => apply(store, ctx).await,
                FinalizerEvent::Cleanup(store) => cleanup(store, ctx).await,
            }
        }
    })
    .await
    .map_err(|e| Error::Finalizer(Box::new(e)))
}

pub fn on_error(store: Arc<Store>, error: &Error, _ctx: Arc<Context>) -> Action {
    eprintln!(
        "{}",
        format!("reconciliation of {} failed: {error:?}", store.name_any()).red()
    );
    Action::requeue(Duration::from_secs(5))
}

async fn apply(store: Arc<Store>, ctx: Arc<Context>) -> Result<Action, Error> {
    // Stores that are already settled never contend for a permit;
    // only active pipeline work is gated.
    store_common::metrics::gate_waiter_started();
    let _permit = ctx.gate.acquire().await.expect("gate semaphore closed");
    store_common::metrics::gate_waiter_finished();

    let name = instance_name(&store)?.to_string();
    let desired_hash = planner::hash_spec(&store.spec);
    let annotated_hash = store
        .annotations()
        .get(store_common::annotations::SPEC_HASH)
        .map(String::as_str);
    let drifted = planner::spec_drifted(annotated_hash, &desired_hash);

    let status = store.status.clone().unwrap_or_default();
    let retry_count = status.retry_count;
    let timer = ReconcileTimer::start(&name);

    if store.spec.engine == Engine::Woocommerce {
        // The backend doesn't exist yet for this engine; there's no
        // pipeline to run and nothing ever leaves ComingSoon.
        if status.phase != StorePhase::ComingSoon {
            let previous_phase = status.phase;
            let updated = patch_status(ctx.client.clone(), &store, |s| {
                s.phase = StorePhase::ComingSoon;
                log_activity(s, "COMING_SOON", "woocommerce support is not yet available");
                s.phase
            })
            .await?;
            annotate_hash(&ctx.client, &store, &desired_hash).await?;
            ctx.events
                .publish(StoreEvent::new(
                    &name,
                    "COMING_SOON",
                    "woocommerce support is not yet available",
                ))
                .await;
            crate::metrics::record_phase(&name, Some(previous_phase), updated);
        }
        timer.finish("coming_soon");
        return Ok(Action::requeue(Duration::from_secs(300)));
    }

    if drifted && !status.conditions.is_empty() {
        // Spec changed underneath an already-provisioned store: start
        // the pipeline over from the top.
        patch_status(ctx.client.clone(), &store, |s| {
            *s = Default::default();
            log_activity(s, "SPEC_CHANGED", "spec drift detected, restarting pipeline");
        })
        .await?;
        ctx.events
            .publish(StoreEvent::new(
                &name,
                "SPEC_CHANGED",
                "spec drift detected, restarting pipeline",
            ))
            .await;
        timer.finish("drift");
        return Ok(Action::requeue(Duration::from_secs(1)));
    }

    let Some(stage) = planner::next_stage(&status) else {
        // Every pipeline condition is already True. A Ready store is
        // still watched for drift: its tenant workloads can be deleted
        // or scaled down out from under it.
        if status.phase == StorePhase::Ready {
            let affected = ctx.resources.presence_check(&name).await?;
            if !affected.is_empty() {
                let previous_phase = status.phase;
                let updated = patch_status(ctx.client.clone(), &store, |s| {
                    upsert_condition(
                        s,
                        ConditionType::HelmInstalled,
                        false,
                        "Drift",
                        "workload presence check failed, re-provisioning",
                    );
                    for ty in &affected {
                        upsert_condition(s, *ty, false, "Drift", "workload missing or under-replica");
                    }
                    log_activity(s, "DRIFT_DETECTED", "tenant workload drift detected");
                    s.phase = planner::determine_phase(s, store.spec.engine, false, false);
                    s.phase
                })
                .await?;
                ctx.events
                    .publish(StoreEvent::new(&name, "DRIFT_DETECTED", "tenant workload drift detected"))
                    .await;
                crate::metrics::record_phase(&name, Some(previous_phase), updated);
                timer.finish("drift_detected");
                return Ok(Action::requeue(Duration::from_secs(5)));
            }
        }

        let previous_phase = status.phase;
        let updated = patch_status(ctx.client.clone(), &store, |s| {
            s.phase = planner::determine_phase(s, store.spec.engine, false, false);
            s.phase
        })
        .await?;
        annotate_hash(&ctx.client, &store, &desired_hash).await?;
        crate::metrics::record_phase(&name, Some(previous_phase), updated);
        timer.finish("settled");
        return Ok(Action::requeue(ctx.drift_interval));
    };

    match run_stage(stage, &name, &store, &ctx).await {
        Ok(true) => {
            let previous_phase = status.phase;
            let (url, admin_url) = planner::compute_urls(&name, &ctx.domain);
            let updated = patch_status(ctx.client.clone(), &store, |s| {
                upsert_condition(s, stage, true, "StageComplete", &format!("{stage} complete"));
                log_activity(
                    s,
                    &format!("{}_READY", stage.as_str().to_uppercase()),
                    &format!("{stage} ready"),
                );
                s.retry_count = 0;
                if stage == ConditionType::StorefrontReady && s.url.is_none() {
                    s.url = Some(url);
                    s.admin_url = Some(admin_url);
                }
                s.phase = planner::determine_phase(s, store.spec.engine, false, false);
                s.phase
            })
            .await?;
            ctx.events
                .publish(StoreEvent::new(&name, stage.as_str(), "stage complete"))
                .await;
            crate::metrics::record_phase(&name, Some(previous_phase), updated);
            timer.finish("stage_complete");
            Ok(Action::requeue(Duration::from_millis(500)))
        }
        Ok(false) => {
            timer.finish("waiting");
            Ok(Action::requeue(Duration::from_secs(5)))
        }
        Err(e) => {
            let exhausted = planner::retries_exhausted(retry_count + 1);
            let previous_phase = status.phase;
            let updated = patch_status(ctx.client.clone(), &store, |s| {
                s.retry_count += 1;
                upsert_condition(s, stage, false, "StageFailed", &e.to_string());
                log_activity(s, &format!("{}_FAILED", stage.as_str().to_uppercase()), &e.to_string());
                s.phase = planner::determine_phase(s, store.spec.engine, false, exhausted);
                s.phase
            })
            .await?;
            ctx.events
                .publish(StoreEvent::new(&name, "STAGE_FAILED", &e.to_string()))
                .await;
            crate::metrics::record_stage_failure(stage.as_str());
            crate::metrics::record_phase(&name, Some(previous_phase), updated);
            timer.finish("stage_failed");
            if exhausted {
                Ok(Action::requeue(Duration::from_secs(300)))
            } else {
                Ok(Action::requeue(planner::requeue_after(retry_count, &ctx.backoff)))
            }
        }
    }
}

async fn run_stage(stage: ConditionType, name: &str, store: &Store, ctx: &Context) -> Result<bool, Error> {
    match stage {
        ConditionType::NamespaceReady => {
            ctx.resources.ensure_namespace(name, &store.spec.owner).await?;
            Ok(true)
        }
        ConditionType::HelmInstalled => {
            if ctx.renderer.release_status(name).await?.is_stuck() {
                ctx.renderer.purge(name).await?;
            }
            let manifest = ctx.renderer.render(name, store.spec.engine).await?;
            ctx.resources.apply_rendered(name, &manifest).await?;
            Ok(true)
        }
        ConditionType::DatabaseReady => ctx.resources.database_ready(name).await,
        ConditionType::BackendReady => ctx.resources.backend_ready(name).await,
        ConditionType::StorefrontReady => ctx.resources.storefront_ready(name).await,
    }
}

async fn annotate_hash(client: &Client, store: &Store, hash: &str) -> Result<(), Error> {
    let name = instance_name(store)?;
    let api: Api<Store> = Api::all(client.clone());
    let patch = serde_json::json!({
        "metadata": {
            "annotations": {
                store_common::annotations::SPEC_HASH: hash,
            }
        }
    });
    api.patch(name, &kube::api::PatchParams::apply(MANAGER_NAME), &kube::api::Patch::Merge(&patch))
        .await?;
    Ok(())
}

/// Whether `event` already appears in the resource's activity log,
/// used to keep cleanup's per-step logging idempotent across the
/// repeated invocations a slow step (namespace termination, PV
/// release) causes.
fn already_logged(store: &Store, event: &str) -> bool {
    store
        .status
        .as_ref()
        .is_some_and(|s| s.activity_log.iter().any(|e| e.event == event))
}

/// Reverse-pipeline teardown: remove the template-applied workloads,
/// wait for the tenant's volumes to be released, then delete the
/// partition itself. Each step logs once; the whole sequence only
/// returns `Ok` once the partition is confirmed gone, so the finalizer
/// helper never strips the finalizer while any tenant workload could
/// still exist — a failing or unfinished step returns `Err` instead of
/// `Ok(Action::requeue(..))`, since `finalizer()` treats any `Ok` from
/// the cleanup closure as "done, remove the finalizer."
async fn cleanup(store: Arc<Store>, ctx: Arc<Context>) -> Result<Action, Error> {
    store_common::metrics::gate_waiter_started();
    let _permit = ctx.gate.acquire().await.expect("gate semaphore closed");
    store_common::metrics::gate_waiter_finished();
    let name = instance_name(&store)?.to_string();

    if !matches!(store.status.as_ref().map(|s| s.phase), Some(StorePhase::Deleting)) {
        patch_status(ctx.client.clone(), &store, |s| {
            s.phase = StorePhase::Deleting;
            log_activity(s, "DELETING", "tenant partition teardown started");
        })
        .await?;
        ctx.events
            .publish(StoreEvent::new(&name, "DELETING", "tenant partition teardown started"))
            .await;
    }

    if !already_logged(&store, "WORKLOADS_REMOVED") {
        ctx.renderer.purge(&name).await?;
        patch_status(ctx.client.clone(), &store, |s| {
            log_activity(s, "WORKLOADS_REMOVED", "template-applied workloads removed");
        })
        .await?;
        ctx.events
            .publish(StoreEvent::new(&name, "WORKLOADS_REMOVED", "template-applied workloads removed"))
            .await;
    }

    if !already_logged(&store, "VOLUMES_RELEASED") {
        let released = ctx.resources.wait_for_pv_release(&name).await?;
        let message = if released {
            "tenant volumes released"
        } else {
            "tenant volume release budget exhausted, proceeding"
        };
        patch_status(ctx.client.clone(), &store, |s| {
            log_activity(s, "VOLUMES_RELEASED", message);
        })
        .await?;
        ctx.events.publish(StoreEvent::new(&name, "VOLUMES_RELEASED", message)).await;
    }

    let done = ctx.resources.teardown(&name).await?;
    if !done {
        return Err(Error::Readiness("tenant partition still terminating".to_string()));
    }

    if !already_logged(&store, "CLEANUP_COMPLETE") {
        patch_status(ctx.client.clone(), &store, |s| {
            log_activity(s, "CLEANUP_COMPLETE", "tenant partition removed");
        })
        .await?;
        ctx.events
            .publish(StoreEvent::new(&name, "CLEANUP_COMPLETE", "tenant partition removed"))
            .await;
    }

    Ok(Action::await_change())
}
