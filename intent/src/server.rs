use std::collections::HashSet;

use anyhow::{Context, Result};
use axum::{Router, middleware, routing::get};
use kube::Client;
use owo_colors::OwoColorize;
use store_common::{
    cors,
    event_bus::EventBus,
    metrics::MetricsLayer,
    rate_limit::{RateLimitLayer, RateLimiter},
    shutdown::shutdown_signal,
};
use tokio::net::TcpListener;

use crate::{args::ServerArgs, handlers, state::AppState};

pub async fn run_server(args: ServerArgs, client: Client, events: EventBus) -> Result<()> {
    let privileged: HashSet<String> = args
        .privileged
        .iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();

    let state = AppState::new(client, events, args.per_owner_store_cap(), privileged);
    let create_limiter = RateLimiter::new(args.create_rate_limiter.clone().into());
    let delete_limiter = RateLimiter::new(args.delete_rate_limiter.clone().into());

    let origins: Vec<&str> = args.cors_origins.iter().map(String::as_str).collect();

    let store_routes = Router::new()
        .route("/stores", get(handlers::list).post(handlers::create))
        .layer(RateLimitLayer::new(create_limiter))
        .with_state(state.clone());

    let delete_routes = Router::new()
        .route("/stores/{name}", axum::routing::delete(handlers::delete))
        .layer(RateLimitLayer::new(delete_limiter))
        .with_state(state.clone());

    let app = Router::new()
        .merge(store_routes)
        .merge(delete_routes)
        .route("/stores/{name}", get(handlers::get))
        .route("/stores/{name}/logs", get(handlers::logs))
        .route("/ws", get(handlers::ws))
        .route("/health", get(handlers::health))
        .route("/metrics", get(metrics_route))
        .layer(middleware::from_fn(store_common::middleware::extract_context))
        .layer(MetricsLayer::new("intent".to_string()))
        .layer(cors::prod(&origins))
        .with_state(state);

    let addr = format!("0.0.0.0:{}", args.port);
    let listener = TcpListener::bind(&addr).await.context("failed to bind intent server")?;
    tracing::info!(%addr, "starting intent HTTP server");
    store_common::signal_ready();

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("intent server failed")?;

    println!("{}", "🛑 intent server stopped gracefully".red());
    Ok(())
}

async fn metrics_route() -> impl axum::response::IntoResponse {
    store_common::metrics::render()
}
