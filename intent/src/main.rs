use anyhow::{Context, Result};
use clap::Parser;
use kube::Client;

mod args;
mod error;
mod handlers;
mod quota;
mod server;
mod snapshot;
mod state;

use args::{Cli, Commands, HealthArgs};
use server::run_server;

#[tokio::main]
async fn main() -> Result<()> {
    store_common::init();
    tracing_subscriber::fmt::init();
    store_common::metrics::maybe_spawn_metrics_server();

    let cli = Cli::parse();

    match cli.command {
        Commands::Server(args) => {
            let client = Client::try_default().await?;
            let events = store_common::event_bus::EventBus::connect_or_degraded(
                &args.nats.nats_url,
                store_common::event_bus::DEFAULT_STREAM_RETENTION,
            )
            .await;
            run_server(args, client, events).await
        }
        Commands::Health(args) => run_health(args).await,
    }
}

async fn run_health(args: HealthArgs) -> Result<()> {
    let url = format!("{}/health", args.endpoint.trim_end_matches('/'));
    let resp = reqwest::get(&url).await.context("health request failed")?;
    if resp.status().is_success() {
        println!("OK");
        Ok(())
    } else {
        anyhow::bail!("intent server unhealthy: {}", resp.status())
    }
}
