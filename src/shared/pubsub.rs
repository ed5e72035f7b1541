use async_trait::async_trait;
use futures::future;
use futures::stream::{BoxStream, StreamExt};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use thiserror::Error;
use tracing::warn;

use crate::shared::models::constants::topic_name;
use crate::shared::models::PodEvent;

pub type EventStream = BoxStream<'static, PodEvent>;

#[derive(Debug, Error)]
pub enum PubSubError {
    #[error("pub/sub backend error: {0}")]
    Backend(#[from] redis::RedisError),
    #[error("could not encode event: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Per-user lifecycle topics.
#[async_trait]
pub trait Broadcaster: Send + Sync {
    async fn publish(&self, uid: &str, event: &PodEvent) -> Result<(), PubSubError>;
    /// Opens a dedicated subscription; dropping the stream unsubscribes.
    async fn subscribe(&self, uid: &str) -> Result<EventStream, PubSubError>;
}

pub struct RedisBroadcaster {
    client: Client,
    redis: ConnectionManager,
}

impl RedisBroadcaster {
    pub fn new(client: Client, redis: ConnectionManager) -> Self {
        Self { client, redis }
    }
}

#[async_trait]
impl Broadcaster for RedisBroadcaster {
    async fn publish(&self, uid: &str, event: &PodEvent) -> Result<(), PubSubError> {
        let payload = serde_json::to_string(event)?;
        let mut conn = self.redis.clone();
        conn.publish::<_, _, ()>(topic_name(uid), payload).await?;
        Ok(())
    }

    async fn subscribe(&self, uid: &str) -> Result<EventStream, PubSubError> {
        // A subscribed connection cannot serve ordinary commands, so every
        // subscriber gets its own.
        let topic = topic_name(uid);
        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.subscribe(&topic).await?;

        let stream = pubsub
            .into_on_message()
            .filter_map(move |msg| {
                let parsed = match msg.get_payload::<String>() {
                    Ok(payload) => parse_event(&topic, &payload),
                    Err(e) => {
                        warn!("Dropping non-text message on {}: {}", topic, e);
                        None
                    }
                };
                future::ready(parsed)
            })
            .boxed();

        Ok(stream)
    }
}

/// Malformed payloads are logged and skipped.
pub fn parse_event(topic: &str, payload: &str) -> Option<PodEvent> {
    match serde_json::from_str::<PodEvent>(payload) {
        Ok(event) => Some(event),
        Err(e) => {
            warn!("Skipping malformed event on {}: {} ({})", topic, payload, e);
            None
        }
    }
}
