use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::shared::models::constants::JOB_QUEUE_KEY;

/// Long-running work handed from the web and monitor processes to the worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Job {
    /// Start the user's container.
    RunPod { uid: String },
    /// Tail the container's output until the notebook server comes up.
    MonitorContainer { uid: String },
}

impl Job {
    pub fn uid(&self) -> &str {
        match self {
            Job::RunPod { uid } | Job::MonitorContainer { uid } => uid,
        }
    }
}

#[derive(Debug, Error)]
pub enum JobError {
    #[error("job queue backend error: {0}")]
    Backend(#[from] redis::RedisError),
    #[error("could not encode job: {0}")]
    Encode(#[from] serde_json::Error),
}

#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn enqueue(&self, job: Job) -> Result<(), JobError>;
    /// Non-blocking; `None` when the queue is empty.
    async fn dequeue(&self) -> Result<Option<Job>, JobError>;
}

pub struct RedisJobQueue {
    redis: ConnectionManager,
}

impl RedisJobQueue {
    pub fn new(redis: ConnectionManager) -> Self {
        Self { redis }
    }
}

#[async_trait]
impl JobQueue for RedisJobQueue {
    async fn enqueue(&self, job: Job) -> Result<(), JobError> {
        let payload = serde_json::to_string(&job)?;
        let mut conn = self.redis.clone();
        conn.rpush::<_, _, ()>(JOB_QUEUE_KEY, payload).await?;
        Ok(())
    }

    async fn dequeue(&self) -> Result<Option<Job>, JobError> {
        let mut conn = self.redis.clone();
        loop {
            let payload: Option<String> = conn.lpop(JOB_QUEUE_KEY, None).await?;
            let Some(payload) = payload else {
                return Ok(None);
            };
            match serde_json::from_str::<Job>(&payload) {
                Ok(job) => return Ok(Some(job)),
                Err(e) => warn!("Discarding malformed job {}: {}", payload, e),
            }
        }
    }
}
