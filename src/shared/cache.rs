use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use thiserror::Error;

use crate::shared::models::constants::CACHE_NAMESPACE;

/// Per-user keys held in the state cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheKey {
    ContainerRunning,
    NotebookRunning,
    SimulatorRunning,
    ContainerHost,
    SimulatorUrl,
    FileServerUrl,
}

impl CacheKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheKey::ContainerRunning => "container_running",
            CacheKey::NotebookRunning => "notebook_running",
            CacheKey::SimulatorRunning => "simulator_running",
            CacheKey::ContainerHost => "container_host",
            CacheKey::SimulatorUrl => "simulator_url",
            CacheKey::FileServerUrl => "file_server_url",
        }
    }
}

pub fn cache_key(uid: &str, key: CacheKey) -> String {
    format!("{CACHE_NAMESPACE}.{uid}.{}", key.as_str())
}

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache backend error: {0}")]
    Backend(#[from] redis::RedisError),
}

/// Namespaced key/value store for ephemeral lifecycle flags and addressing.
/// Every operation touches a single key.
#[async_trait]
pub trait StateCache: Send + Sync {
    async fn set(&self, uid: &str, key: CacheKey, value: &str) -> Result<(), CacheError>;
    async fn get(&self, uid: &str, key: CacheKey) -> Result<Option<String>, CacheError>;
    async fn has(&self, uid: &str, key: CacheKey) -> Result<bool, CacheError>;
    /// Removes every key in the user's namespace.
    async fn clear(&self, uid: &str) -> Result<(), CacheError>;

    async fn set_flag(&self, uid: &str, key: CacheKey, on: bool) -> Result<(), CacheError> {
        self.set(uid, key, if on { "1" } else { "0" }).await
    }

    /// Missing keys read as off.
    async fn get_flag(&self, uid: &str, key: CacheKey) -> Result<bool, CacheError> {
        Ok(self.get(uid, key).await?.as_deref() == Some("1"))
    }
}

#[derive(Clone)]
pub struct RedisCache {
    redis: ConnectionManager,
}

impl RedisCache {
    pub fn from_connection(redis: ConnectionManager) -> Self {
        Self { redis }
    }
}

#[async_trait]
impl StateCache for RedisCache {
    async fn set(&self, uid: &str, key: CacheKey, value: &str) -> Result<(), CacheError> {
        let mut conn = self.redis.clone();
        conn.set::<_, _, ()>(cache_key(uid, key), value).await?;
        Ok(())
    }

    async fn get(&self, uid: &str, key: CacheKey) -> Result<Option<String>, CacheError> {
        let mut conn = self.redis.clone();
        Ok(conn.get(cache_key(uid, key)).await?)
    }

    async fn has(&self, uid: &str, key: CacheKey) -> Result<bool, CacheError> {
        let mut conn = self.redis.clone();
        Ok(conn.exists(cache_key(uid, key)).await?)
    }

    async fn clear(&self, uid: &str) -> Result<(), CacheError> {
        let mut conn = self.redis.clone();
        let pattern = format!("{CACHE_NAMESPACE}.{uid}.*");
        let mut cursor: u64 = 0;
        loop {
            let (next_cursor, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .cursor_arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(100u32)
                .query_async(&mut conn)
                .await?;
            cursor = next_cursor;
            if !keys.is_empty() {
                conn.del::<_, ()>(keys).await?;
            }
            if cursor == 0 {
                break;
            }
        }
        Ok(())
    }
}
