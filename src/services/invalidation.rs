use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::services::cache::{CacheError, CacheKey, CacheStore};

/// Change notification published by an upstream data owner
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InvalidationEvent {
    Route {
        route_id: Uuid,
        #[serde(default)]
        origin_hub_id: Option<Uuid>,
        #[serde(default)]
        destination_hub_id: Option<Uuid>,
    },
    RouteAvailability {
        route_id: Uuid,
        #[serde(default)]
        origin_hub_id: Option<Uuid>,
        #[serde(default)]
        destination_hub_id: Option<Uuid>,
    },
    Hub {
        hub_id: Uuid,
    },
    Stop {
        stop_id: Uuid,
        #[serde(default)]
        route_ids: Vec<Uuid>,
    },
}

/// One unit of cache eviction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Eviction {
    Key(String),
    Pattern(String),
}

impl InvalidationEvent {
    pub fn from_payload(payload: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(payload)
    }

    /// Keys and patterns this event makes stale
    pub fn evictions(&self) -> Vec<Eviction> {
        match self {
            // A full route update may have moved the route off its previous
            // hub pair, which the event does not name
            InvalidationEvent::Route { .. } => vec![
                Eviction::Pattern(CacheKey::ALL_ROUTE_SEARCHES.to_string()),
                Eviction::Pattern(CacheKey::ALL_HUB_ROUTES.to_string()),
            ],
            InvalidationEvent::RouteAvailability {
                origin_hub_id,
                destination_hub_id,
                ..
            } => {
                // Search lists are keyed by the rider's hubs, so any of them may hold the route
                let hub_lists = match (origin_hub_id, destination_hub_id) {
                    (Some(o), Some(d)) => CacheKey::hub_routes_pattern(Some(*o), Some(*d)),
                    _ => CacheKey::ALL_HUB_ROUTES.to_string(),
                };
                vec![
                    Eviction::Pattern(CacheKey::ALL_ROUTE_SEARCHES.to_string()),
                    Eviction::Pattern(hub_lists),
                ]
            }
            InvalidationEvent::Hub { hub_id } => {
                let [as_origin, as_destination] = CacheKey::route_search_patterns_for_hub(*hub_id);
                vec![
                    Eviction::Key(CacheKey::hub(*hub_id)),
                    Eviction::Pattern(CacheKey::ALL_NEARBY_HUBS.to_string()),
                    Eviction::Pattern(as_origin),
                    Eviction::Pattern(as_destination),
                    Eviction::Pattern(CacheKey::hub_routes_pattern(Some(*hub_id), None)),
                    Eviction::Pattern(CacheKey::hub_routes_pattern(None, Some(*hub_id))),
                ]
            }
            InvalidationEvent::Stop { .. } => vec![
                Eviction::Pattern(CacheKey::ALL_ROUTE_SEARCHES.to_string()),
                Eviction::Pattern(CacheKey::ALL_HUB_ROUTES.to_string()),
            ],
        }
    }
}

/// Ordered stream of invalidation events
#[async_trait]
pub trait InvalidationChannel: Send + Sync {
    async fn subscribe(&self, topics: &[String]) -> Result<BoxStream<'static, InvalidationEvent>, CacheError>;
}

/// Redis pub/sub channel carrying JSON-encoded events
pub struct RedisInvalidationChannel {
    client: redis::Client,
}

impl RedisInvalidationChannel {
    pub fn new(redis_url: &str) -> Result<Self, CacheError> {
        Ok(Self {
            client: redis::Client::open(redis_url)?,
        })
    }
}

#[async_trait]
impl InvalidationChannel for RedisInvalidationChannel {
    async fn subscribe(&self, topics: &[String]) -> Result<BoxStream<'static, InvalidationEvent>, CacheError> {
        let mut pubsub = self.client.get_async_pubsub().await?;
        for topic in topics {
            pubsub.subscribe(topic.as_str()).await?;
        }

        let events = pubsub.into_on_message().filter_map(|msg| {
            let channel = msg.get_channel_name().to_string();
            let event = match msg.get_payload::<String>() {
                Ok(payload) => match InvalidationEvent::from_payload(&payload) {
                    Ok(event) => Some(event),
                    Err(e) => {
                        tracing::warn!(channel = %channel, error = %e, "Skipping malformed invalidation payload");
                        None
                    }
                },
                Err(e) => {
                    tracing::warn!(channel = %channel, error = %e, "Skipping non-text invalidation payload");
                    None
                }
            };
            futures::future::ready(event)
        });

        Ok(events.boxed())
    }
}

/// Background task evicting cache entries as change events arrive
pub struct CacheInvalidationListener {
    store: Arc<dyn CacheStore>,
    channel: Arc<dyn InvalidationChannel>,
    topics: Vec<String>,
    resubscribe_delay: Duration,
}

impl CacheInvalidationListener {
    pub fn new(
        store: Arc<dyn CacheStore>,
        channel: Arc<dyn InvalidationChannel>,
        topics: Vec<String>,
        resubscribe_delay: Duration,
    ) -> Self {
        Self {
            store,
            channel,
            topics,
            resubscribe_delay,
        }
    }

    /// Apply one event; returns the number of keys removed
    pub async fn handle(&self, event: &InvalidationEvent) -> usize {
        let mut removed = 0;
        for eviction in event.evictions() {
            removed += match &eviction {
                Eviction::Key(key) => self.store.delete(std::slice::from_ref(key)).await,
                Eviction::Pattern(pattern) => self.store.delete_pattern(pattern).await,
            };
        }
        tracing::debug!(?event, removed, "Applied cache invalidation");
        removed
    }

    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }

    /// Consume events until shutdown is signalled, resubscribing whenever
    /// the stream ends or the subscription fails.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        loop {
            if *shutdown.borrow() {
                break;
            }

            let mut events = match self.channel.subscribe(&self.topics).await {
                Ok(events) => events,
                Err(e) => {
                    tracing::warn!(error = %e, "Invalidation subscribe failed");
                    if self.wait_or_shutdown(&mut shutdown).await {
                        break;
                    }
                    continue;
                }
            };
            tracing::info!(topics = ?self.topics, "Subscribed to cache invalidation topics");

            loop {
                tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            tracing::info!("Cache invalidation listener stopped");
                            return;
                        }
                    }
                    next = events.next() => match next {
                        Some(event) => {
                            self.handle(&event).await;
                        }
                        None => {
                            tracing::warn!("Invalidation stream ended, resubscribing");
                            break;
                        }
                    }
                }
            }

            if self.wait_or_shutdown(&mut shutdown).await {
                break;
            }
        }
        tracing::info!("Cache invalidation listener stopped");
    }

    /// Sleep for the resubscribe delay; true when shutdown arrived first
    async fn wait_or_shutdown(&self, shutdown: &mut watch::Receiver<bool>) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(self.resubscribe_delay) => false,
            changed = shutdown.changed() => changed.is_err() || *shutdown.borrow(),
        }
    }
}
