use std::sync::Arc;

use anyhow::{Context, Result};
use redis::aio::ConnectionManager;
use tracing::info;

use crate::shared::cache::{RedisCache, StateCache};
use crate::shared::config::NbpodConfig;
use crate::shared::database::init_database;
use crate::shared::event_log::{EventLog, SqlEventLog};
use crate::shared::handlers::EventHandlers;
use crate::shared::jobs::{JobQueue, RedisJobQueue};
use crate::shared::pod::PodManager;
use crate::shared::pubsub::{Broadcaster, RedisBroadcaster};
use crate::shared::runtime::{ContainerRuntime, DockerRuntime};

/// Everything a process needs to act on pods, wired once at startup.
pub struct Services {
    pub config: NbpodConfig,
    pub runtime: Arc<dyn ContainerRuntime>,
    pub cache: Arc<dyn StateCache>,
    pub events: Arc<dyn EventLog>,
    pub broadcaster: Arc<dyn Broadcaster>,
    pub jobs: Arc<dyn JobQueue>,
    pub pods: Arc<PodManager>,
    pub handlers: Arc<EventHandlers>,
}

impl Services {
    pub async fn connect(config: NbpodConfig, redis_url: &str, database_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url).context("Invalid Redis URL")?;
        let redis = ConnectionManager::new(client.clone())
            .await
            .context("Redis not available")?;
        info!("Connected to Redis");

        let pool = init_database(database_url).await?;

        let runtime = DockerRuntime::connect().context("Docker not available")?;
        info!("Connected to Docker");

        Ok(Self::from_parts(
            config,
            Arc::new(runtime),
            Arc::new(RedisCache::from_connection(redis.clone())),
            Arc::new(SqlEventLog::new(pool)),
            Arc::new(RedisBroadcaster::new(client, redis.clone())),
            Arc::new(RedisJobQueue::new(redis)),
        ))
    }

    pub fn from_parts(
        config: NbpodConfig,
        runtime: Arc<dyn ContainerRuntime>,
        cache: Arc<dyn StateCache>,
        events: Arc<dyn EventLog>,
        broadcaster: Arc<dyn Broadcaster>,
        jobs: Arc<dyn JobQueue>,
    ) -> Self {
        let pods = Arc::new(PodManager::new(
            runtime.clone(),
            events.clone(),
            config.pod.clone(),
        ));
        let handlers = Arc::new(EventHandlers::new(
            cache.clone(),
            events.clone(),
            broadcaster.clone(),
            jobs.clone(),
            pods.clone(),
        ));

        Self {
            config,
            runtime,
            cache,
            events,
            broadcaster,
            jobs,
            pods,
            handlers,
        }
    }
}
