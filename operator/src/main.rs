use std::{sync::Arc, time::Duration};

use clap::Parser;
use kube::Client;
use tokio::sync::Semaphore;

mod args;

use args::Cli;
use store_common::event_bus::EventBus;
use store_operator::{
    Context,
    client::{FakeRenderer, HttpTemplateRenderer, KubeResourceClient, TemplateRenderer},
    reconcile,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    store_common::init();
    tracing_subscriber::fmt::init();
    store_common::metrics::maybe_spawn_metrics_server();

    let cli = Cli::parse();
    let client = Client::try_default().await?;
    let events =
        EventBus::connect_or_degraded(&cli.nats.nats_url, store_common::event_bus::DEFAULT_STREAM_RETENTION).await;

    let renderer: Arc<dyn TemplateRenderer> = match &cli.renderer.renderer_url {
        Some(url) => Arc::new(HttpTemplateRenderer::new(
            url.clone(),
            Duration::from_secs(cli.renderer.renderer_timeout_seconds),
        )),
        None => Arc::new(FakeRenderer),
    };

    let ctx = Arc::new(Context {
        client: client.clone(),
        renderer,
        resources: Arc::new(KubeResourceClient::new(client)),
        events,
        gate: Arc::new(Semaphore::new(cli.concurrency.max_concurrent_reconciles)),
        domain: cli.domain.domain.clone(),
        drift_interval: Duration::from_secs(cli.drift.drift_interval_seconds),
        backoff: (&cli.backoff).into(),
    });

    reconcile::run(ctx, cli.election, cli.concurrency).await;
    Ok(())
}
