//! Event bus: a durable, append-only stream of per-store activity plus
//! an in-process live fan-out for the intent layer's subscription
//! endpoint.
//!
//! The durable side is backed by NATS JetStream when one is reachable.
//! When it isn't (or wasn't configured), publishing degrades to the
//! live fan-out only: subscribers connected right now still see
//! events, but nothing is replayable after a reconnect. Callers are
//! never blocked or failed by a degraded backend.

pub mod subjects;

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use owo_colors::OwoColorize;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, broadcast};

const LIVE_CHANNEL_CAPACITY: usize = 64;
const STREAM_NAME: &str = "STORE_EVENTS";

/// Default for `durable_stream_retention`: how many events per store
/// the durable stream keeps before dropping the oldest.
pub const DEFAULT_STREAM_RETENTION: i64 = 256;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StoreEvent {
    pub store: String,
    pub event: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl StoreEvent {
    pub fn new(store: impl Into<String>, event: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            store: store.into(),
            event: event.into(),
            message: message.into(),
            timestamp: Utc::now(),
        }
    }
}

#[async_trait]
pub trait Backend: Send + Sync {
    async fn publish(&self, event: &StoreEvent) -> anyhow::Result<()>;

    /// Reads back up to `limit` of the most recent durably-stored
    /// events for `store`. Backends with no durable storage return an
    /// empty history rather than an error.
    async fn history(&self, store: &str, limit: usize) -> anyhow::Result<Vec<StoreEvent>>;
}

/// Durable publish via a NATS JetStream stream, one message per store
/// event, retained up to [`STREAM_MAX_MESSAGES`].
pub struct NatsBackend {
    jetstream: async_nats::jetstream::Context,
}

impl NatsBackend {
    /// `retention` bounds how many events are kept per store subject,
    /// not the stream as a whole: each store's `store.events.<name>`
    /// subject retains its own last `retention` entries.
    pub async fn connect(nats_url: &str, retention: i64) -> anyhow::Result<Self> {
        let client = async_nats::connect(nats_url).await?;
        let jetstream = async_nats::jetstream::new(client);
        jetstream
            .get_or_create_stream(async_nats::jetstream::stream::Config {
                name: STREAM_NAME.to_string(),
                subjects: vec![subjects::ALL.to_string()],
                max_messages_per_subject: retention,
                discard: async_nats::jetstream::stream::DiscardPolicy::Old,
                ..Default::default()
            })
            .await?;
        Ok(Self { jetstream })
    }
}

#[async_trait]
impl Backend for NatsBackend {
    async fn publish(&self, event: &StoreEvent) -> anyhow::Result<()> {
        let payload = serde_json::to_vec(event)?;
        self.jetstream
            .publish(subjects::store(&event.store), payload.into())
            .await?
            .await?;
        Ok(())
    }

    async fn history(&self, store: &str, limit: usize) -> anyhow::Result<Vec<StoreEvent>> {
        let stream = self.jetstream.get_stream(STREAM_NAME).await?;
        // Ephemeral: nobody needs to resume this consumer across calls,
        // it only exists to read back the subject's current backlog.
        let consumer: async_nats::jetstream::consumer::PullConsumer = stream
            .create_consumer(async_nats::jetstream::consumer::pull::Config {
                filter_subject: subjects::store(store),
                deliver_policy: async_nats::jetstream::consumer::DeliverPolicy::All,
                inactive_threshold: std::time::Duration::from_secs(30),
                ..Default::default()
            })
            .await?;

        let mut batch = consumer
            .fetch()
            .max_messages(limit)
            .expires(std::time::Duration::from_millis(500))
            .messages()
            .await?;

        let mut events = Vec::new();
        while let Some(Ok(msg)) = batch.next().await {
            if let Ok(event) = serde_json::from_slice::<StoreEvent>(&msg.payload) {
                events.push(event);
            }
        }
        Ok(events)
    }
}

/// Backend used when no durable store is configured or reachable.
/// Every publish is a no-op; the bus still fans events out live.
pub struct DegradedBackend;

#[async_trait]
impl Backend for DegradedBackend {
    async fn publish(&self, _event: &StoreEvent) -> anyhow::Result<()> {
        Ok(())
    }

    async fn history(&self, _store: &str, _limit: usize) -> anyhow::Result<Vec<StoreEvent>> {
        Ok(Vec::new())
    }
}

struct EventBusInner {
    backend: Arc<dyn Backend>,
    durable: bool,
    channels: Mutex<HashMap<String, broadcast::Sender<StoreEvent>>>,
}

#[derive(Clone)]
pub struct EventBus {
    inner: Arc<EventBusInner>,
}

impl EventBus {
    pub fn new(backend: Arc<dyn Backend>, durable: bool) -> Self {
        Self {
            inner: Arc::new(EventBusInner {
                backend,
                durable,
                channels: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Connects to NATS JetStream; falls back to the degraded backend
    /// (logged, not fatal) if the connection fails.
    pub async fn connect_or_degraded(nats_url: &str, retention: i64) -> Self {
        match NatsBackend::connect(nats_url, retention).await {
            Ok(backend) => Self::new(Arc::new(backend), true),
            Err(e) => {
                eprintln!(
                    "{}",
                    format!(
                        "\u{26a0}\u{fe0f} event bus running in degraded mode, durable stream unavailable: {e:?}"
                    )
                    .yellow()
                );
                Self::new(Arc::new(DegradedBackend), false)
            }
        }
    }

    /// Whether the durable stream is backing this bus. When `false`,
    /// late subscribers get nothing from the bus and callers should
    /// fall back to the resource's in-CRD activity log.
    pub fn is_durable_available(&self) -> bool {
        self.inner.durable
    }

    /// Publishes `event` durably (best-effort) and fans it out to any
    /// live subscribers for `event.store`.
    pub async fn publish(&self, event: StoreEvent) {
        if let Err(e) = self.inner.backend.publish(&event).await {
            eprintln!(
                "{}",
                format!("\u{26a0}\u{fe0f} failed to publish durable event for {}: {e:?}", event.store)
                    .yellow()
            );
        }

        let mut channels = self.inner.channels.lock().await;
        let sender = channels
            .entry(event.store.clone())
            .or_insert_with(|| broadcast::channel(LIVE_CHANNEL_CAPACITY).0);
        // No subscribers is not an error: nobody is watching right now.
        let _ = sender.send(event);
    }

    /// Reads back the durable stream's tail for `store`, most recent
    /// last. Empty (never an error) when the durable backend is
    /// unavailable — callers fall back to the resource's in-CRD log.
    pub async fn history(&self, store: &str, limit: usize) -> Vec<StoreEvent> {
        match self.inner.backend.history(store, limit).await {
            Ok(events) => events,
            Err(e) => {
                eprintln!(
                    "{}",
                    format!("\u{26a0}\u{fe0f} failed to read durable history for {store}: {e:?}").yellow()
                );
                Vec::new()
            }
        }
    }

    /// Subscribes to live events for `store`. Creates the channel if
    /// this is the first subscriber.
    pub async fn subscribe(&self, store: &str) -> broadcast::Receiver<StoreEvent> {
        let mut channels = self.inner.channels.lock().await;
        channels
            .entry(store.to_string())
            .or_insert_with(|| broadcast::channel(LIVE_CHANNEL_CAPACITY).0)
            .subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn degraded_backend_history_is_empty_not_an_error() {
        let bus = EventBus::new(Arc::new(DegradedBackend), false);
        assert!(bus.history("shop1", 256).await.is_empty());
    }

    #[tokio::test]
    async fn degraded_backend_never_fails_publish() {
        let bus = EventBus::new(Arc::new(DegradedBackend), false);
        assert!(!bus.is_durable_available());
        let mut rx = bus.subscribe("shop1").await;
        bus.publish(StoreEvent::new("shop1", "PROVISIONING_START", "go"))
            .await;
        let received = rx.recv().await.unwrap();
        assert_eq!(received.store, "shop1");
        assert_eq!(received.event, "PROVISIONING_START");
    }

    #[tokio::test]
    async fn subscribers_are_scoped_per_store() {
        let bus = EventBus::new(Arc::new(DegradedBackend), false);
        let mut shop1_rx = bus.subscribe("shop1").await;
        let mut shop2_rx = bus.subscribe("shop2").await;
        bus.publish(StoreEvent::new("shop1", "READY", "up")).await;
        assert_eq!(shop1_rx.recv().await.unwrap().store, "shop1");
        assert!(shop2_rx.try_recv().is_err());
    }
}
