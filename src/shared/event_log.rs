use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::mysql::MySqlPool;
use sqlx::Row;
use thiserror::Error;

use crate::shared::models::{EventCode, EventRecord};

#[derive(Debug, Error)]
pub enum EventLogError {
    #[error("event log database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("event log holds an unknown code: {0}")]
    UnknownCode(String),
}

/// Durable, append-only history of lifecycle events. Orchestration only
/// appends; reads serve the audit endpoint.
#[async_trait]
pub trait EventLog: Send + Sync {
    /// Timestamps never go backwards for a given uid.
    async fn append(&self, uid: &str, code: EventCode) -> Result<EventRecord, EventLogError>;
    /// Newest first.
    async fn recent(&self, uid: &str, limit: u32) -> Result<Vec<EventRecord>, EventLogError>;
}

pub struct SqlEventLog {
    pool: MySqlPool,
}

impl SqlEventLog {
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EventLog for SqlEventLog {
    async fn append(&self, uid: &str, code: EventCode) -> Result<EventRecord, EventLogError> {
        let now = Utc::now();

        // Clamp to the latest row for this uid so clock skew between the
        // web, monitor and worker hosts cannot reorder a user's history.
        let result = sqlx::query(
            r#"
            INSERT INTO events (code, uid, created_at)
            SELECT ?, ?, GREATEST(?, COALESCE(MAX(created_at), ?))
            FROM events
            WHERE uid = ?
            "#,
        )
        .bind(code.as_str())
        .bind(uid)
        .bind(now)
        .bind(now)
        .bind(uid)
        .execute(&self.pool)
        .await?;

        let row = sqlx::query("SELECT code, uid, created_at FROM events WHERE id = ?")
            .bind(result.last_insert_id())
            .fetch_one(&self.pool)
            .await?;

        record_from_row(&row)
    }

    async fn recent(&self, uid: &str, limit: u32) -> Result<Vec<EventRecord>, EventLogError> {
        let rows = sqlx::query(
            r#"
            SELECT code, uid, created_at
            FROM events
            WHERE uid = ?
            ORDER BY created_at DESC, id DESC
            LIMIT ?
            "#,
        )
        .bind(uid)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(record_from_row).collect()
    }
}

fn record_from_row(row: &sqlx::mysql::MySqlRow) -> Result<EventRecord, EventLogError> {
    let code: String = row.try_get("code")?;
    Ok(EventRecord {
        code: code
            .parse()
            .map_err(|_| EventLogError::UnknownCode(code.clone()))?,
        uid: row.try_get("uid")?,
        created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
    })
}
