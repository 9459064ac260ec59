//! Send attempt audit trail.
//!
//! Every hand-off to the send pipeline leaves one `message_attempt` row,
//! successful or not, so operators can reconstruct the delivery history of
//! a message without trawling logs.

use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;

use super::store::StoreError;

/// Longest error detail kept on an attempt row.
const MAX_ERROR_LENGTH: usize = 255;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AttemptStatus {
    /// The pipeline accepted the message
    Success,
    /// The pipeline rejected the message
    Error,
    /// The attempt was abandoned before reaching the pipeline
    Abort,
}

impl fmt::Display for AttemptStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "SUCCESS"),
            Self::Error => write!(f, "ERROR"),
            Self::Abort => write!(f, "ABORT"),
        }
    }
}

impl std::str::FromStr for AttemptStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SUCCESS" => Ok(Self::Success),
            "ERROR" => Ok(Self::Error),
            "ABORT" => Ok(Self::Abort),
            _ => Err(format!("Invalid attempt status: {s}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageAttempt {
    pub message_entity_id: i64,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub status: AttemptStatus,
    pub error: Option<String>,
}

impl MessageAttempt {
    pub fn success(
        message_entity_id: i64,
        started_at: DateTime<Utc>,
        ended_at: DateTime<Utc>,
    ) -> Self {
        Self {
            message_entity_id,
            started_at,
            ended_at,
            status: AttemptStatus::Success,
            error: None,
        }
    }

    pub fn failed(
        message_entity_id: i64,
        started_at: DateTime<Utc>,
        ended_at: DateTime<Utc>,
        error: &str,
    ) -> Self {
        Self {
            message_entity_id,
            started_at,
            ended_at,
            status: AttemptStatus::Error,
            error: Some(truncate_error(error)),
        }
    }
}

fn truncate_error(error: &str) -> String {
    error.chars().take(MAX_ERROR_LENGTH).collect()
}

#[async_trait]
pub trait MessageAttemptStore: Send + Sync {
    async fn record(&self, attempt: MessageAttempt) -> Result<(), StoreError>;

    async fn attempts_for(
        &self,
        message_entity_id: i64,
    ) -> Result<Vec<MessageAttempt>, StoreError>;
}

#[derive(Debug, Default)]
pub struct InMemoryAttemptStore {
    attempts: RwLock<HashMap<i64, Vec<MessageAttempt>>>,
}

impl InMemoryAttemptStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MessageAttemptStore for InMemoryAttemptStore {
    async fn record(&self, attempt: MessageAttempt) -> Result<(), StoreError> {
        self.attempts
            .write()
            .entry(attempt.message_entity_id)
            .or_default()
            .push(attempt);
        Ok(())
    }

    async fn attempts_for(
        &self,
        message_entity_id: i64,
    ) -> Result<Vec<MessageAttempt>, StoreError> {
        Ok(self
            .attempts
            .read()
            .get(&message_entity_id)
            .cloned()
            .unwrap_or_default())
    }
}

#[derive(Debug, Clone)]
pub struct PgAttemptStore {
    pool: PgPool,
}

impl PgAttemptStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct AttemptRow {
    message_entity_id: i64,
    started_at: DateTime<Utc>,
    ended_at: DateTime<Utc>,
    status: String,
    error: Option<String>,
}

#[async_trait]
impl MessageAttemptStore for PgAttemptStore {
    async fn record(&self, attempt: MessageAttempt) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO message_attempt \
             (message_entity_id, started_at, ended_at, status, error) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(attempt.message_entity_id)
        .bind(attempt.started_at)
        .bind(attempt.ended_at)
        .bind(attempt.status.to_string())
        .bind(&attempt.error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn attempts_for(
        &self,
        message_entity_id: i64,
    ) -> Result<Vec<MessageAttempt>, StoreError> {
        let rows = sqlx::query_as::<_, AttemptRow>(
            "SELECT message_entity_id, started_at, ended_at, status, error \
             FROM message_attempt WHERE message_entity_id = $1 ORDER BY started_at",
        )
        .bind(message_entity_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter()
            .map(|row| {
                let status = row.status.parse().map_err(|detail| StoreError::InvalidRow {
                    entity_id: row.message_entity_id,
                    detail,
                })?;
                Ok(MessageAttempt {
                    message_entity_id: row.message_entity_id,
                    started_at: row.started_at,
                    ended_at: row.ended_at,
                    status,
                    error: row.error,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn long_errors_are_truncated() {
        let long = "x".repeat(400);
        let attempt = MessageAttempt::failed(1, Utc::now(), Utc::now(), &long);
        assert_eq!(attempt.error.as_deref().map(str::len), Some(255));
    }

    #[test]
    fn attempt_status_round_trips() {
        for status in [
            AttemptStatus::Success,
            AttemptStatus::Error,
            AttemptStatus::Abort,
        ] {
            assert_eq!(status.to_string().parse::<AttemptStatus>(), Ok(status));
        }
        assert!("PENDING".parse::<AttemptStatus>().is_err());
    }

    #[tokio::test]
    async fn attempts_accumulate_per_message() {
        let store = InMemoryAttemptStore::new();
        let start = Utc::now();
        store
            .record(MessageAttempt::failed(5, start, start, "connection refused"))
            .await
            .unwrap();
        store
            .record(MessageAttempt::success(5, start, start))
            .await
            .unwrap();

        let attempts = store.attempts_for(5).await.unwrap();
        assert_eq!(attempts.len(), 2);
        assert_eq!(attempts[0].status, AttemptStatus::Error);
        assert_eq!(attempts[1].status, AttemptStatus::Success);
        assert!(store.attempts_for(6).await.unwrap().is_empty());
    }
}
