//! Message log persistence.
//!
//! The gateway keeps one `message_log` row per outbound user message:
//! header metadata for resolution, the delivery status, and the
//! time-ordered entity id the retry discovery query ranges over.
//! [`InMemoryMessageStore`] backs tests and embedded setups,
//! [`PgMessageStore`] the production deployment.

use std::collections::BTreeMap;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use sqlx::PgPool;
use tracing::debug;

use super::model::{MessageStatus, RetryCandidate, UserMessageRef};
use crate::pmode::ValueType;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error("a message with id [{0}] already exists")]
    Duplicate(String),
    #[error("stored row for entity [{entity_id}] is invalid: {detail}")]
    InvalidRow { entity_id: i64, detail: String },
    #[error("dictionary value must not be blank")]
    BlankValue,
}

#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn insert(&self, message: UserMessageRef) -> Result<(), StoreError>;

    async fn find_by_entity_id(
        &self,
        entity_id: i64,
    ) -> Result<Option<UserMessageRef>, StoreError>;

    /// Entity ids and creation times of messages whose identifier falls in
    /// `[min, max]` and whose status is one of `statuses`.
    async fn find_in_range(
        &self,
        min: i64,
        max: i64,
        statuses: &[MessageStatus],
    ) -> Result<Vec<RetryCandidate>, StoreError>;

    /// Moves the message to `to` if its current status is one of `from`.
    /// Returns whether a transition happened.
    async fn transition_status(
        &self,
        entity_id: i64,
        from: &[MessageStatus],
        to: MessageStatus,
    ) -> Result<bool, StoreError>;
}

/// Map-backed store for tests and embedded use.
#[derive(Debug, Default)]
pub struct InMemoryMessageStore {
    messages: RwLock<BTreeMap<i64, UserMessageRef>>,
}

impl InMemoryMessageStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MessageStore for InMemoryMessageStore {
    async fn insert(&self, message: UserMessageRef) -> Result<(), StoreError> {
        let mut messages = self.messages.write();
        if messages
            .values()
            .any(|existing| existing.message_id == message.message_id)
        {
            return Err(StoreError::Duplicate(message.message_id));
        }
        messages.insert(message.entity_id, message);
        Ok(())
    }

    async fn find_by_entity_id(
        &self,
        entity_id: i64,
    ) -> Result<Option<UserMessageRef>, StoreError> {
        Ok(self.messages.read().get(&entity_id).cloned())
    }

    async fn find_in_range(
        &self,
        min: i64,
        max: i64,
        statuses: &[MessageStatus],
    ) -> Result<Vec<RetryCandidate>, StoreError> {
        Ok(self
            .messages
            .read()
            .range(min..=max)
            .filter(|(_, message)| statuses.contains(&message.status))
            .map(|(entity_id, message)| RetryCandidate {
                entity_id: *entity_id,
                creation_time: message.creation_time,
            })
            .collect())
    }

    async fn transition_status(
        &self,
        entity_id: i64,
        from: &[MessageStatus],
        to: MessageStatus,
    ) -> Result<bool, StoreError> {
        let mut messages = self.messages.write();
        match messages.get_mut(&entity_id) {
            Some(message) if from.contains(&message.status) => {
                debug!(
                    entity_id,
                    from = %message.status,
                    to = %to,
                    "Message status transition"
                );
                message.status = to;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

/// Postgres-backed store over the `message_log` table.
#[derive(Debug, Clone)]
pub struct PgMessageStore {
    pool: PgPool,
}

impl PgMessageStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct MessageRow {
    entity_id: i64,
    message_id: String,
    creation_time: DateTime<Utc>,
    status: String,
    msh_role: String,
    mpc: String,
    source_message: bool,
    fragment: bool,
    from_party_value: String,
    from_party_type: Option<String>,
    from_role: String,
    to_party_value: String,
    to_party_type: Option<String>,
    to_role: String,
    service_value: String,
    service_type: Option<String>,
    action: String,
    agreement_value: Option<String>,
    agreement_type: Option<String>,
}

impl MessageRow {
    fn into_message(self) -> Result<UserMessageRef, StoreError> {
        let entity_id = self.entity_id;
        let invalid = |detail: String| StoreError::InvalidRow { entity_id, detail };
        Ok(UserMessageRef {
            entity_id,
            message_id: self.message_id,
            creation_time: self.creation_time,
            status: MessageStatus::from_str(&self.status).map_err(invalid)?,
            msh_role: crate::pmode::MshRole::from_str(&self.msh_role)
                .map_err(|detail| StoreError::InvalidRow { entity_id, detail })?,
            mpc: self.mpc,
            source_message: self.source_message,
            fragment: self.fragment,
            from_party: ValueType {
                value: self.from_party_value,
                r#type: self.from_party_type,
            },
            from_role: self.from_role,
            to_party: ValueType {
                value: self.to_party_value,
                r#type: self.to_party_type,
            },
            to_role: self.to_role,
            service: ValueType {
                value: self.service_value,
                r#type: self.service_type,
            },
            action: self.action,
            agreement: self.agreement_value.map(|value| ValueType {
                value,
                r#type: self.agreement_type,
            }),
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct CandidateRow {
    entity_id: i64,
    creation_time: DateTime<Utc>,
}

const MESSAGE_COLUMNS: &str = "entity_id, message_id, creation_time, status, msh_role, mpc, \
     source_message, fragment, from_party_value, from_party_type, from_role, \
     to_party_value, to_party_type, to_role, service_value, service_type, action, \
     agreement_value, agreement_type";

#[async_trait]
impl MessageStore for PgMessageStore {
    async fn insert(&self, message: UserMessageRef) -> Result<(), StoreError> {
        let query = format!(
            "INSERT INTO message_log ({MESSAGE_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19) \
             ON CONFLICT (message_id) DO NOTHING"
        );
        let result = sqlx::query(&query)
            .bind(message.entity_id)
            .bind(&message.message_id)
            .bind(message.creation_time)
            .bind(message.status.to_string())
            .bind(message.msh_role.to_string())
            .bind(&message.mpc)
            .bind(message.source_message)
            .bind(message.fragment)
            .bind(&message.from_party.value)
            .bind(&message.from_party.r#type)
            .bind(&message.from_role)
            .bind(&message.to_party.value)
            .bind(&message.to_party.r#type)
            .bind(&message.to_role)
            .bind(&message.service.value)
            .bind(&message.service.r#type)
            .bind(&message.action)
            .bind(message.agreement.as_ref().map(|a| a.value.clone()))
            .bind(message.agreement.as_ref().and_then(|a| a.r#type.clone()))
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::Duplicate(message.message_id));
        }
        Ok(())
    }

    async fn find_by_entity_id(
        &self,
        entity_id: i64,
    ) -> Result<Option<UserMessageRef>, StoreError> {
        let query = format!("SELECT {MESSAGE_COLUMNS} FROM message_log WHERE entity_id = $1");
        let row = sqlx::query_as::<_, MessageRow>(&query)
            .bind(entity_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(MessageRow::into_message).transpose()
    }

    async fn find_in_range(
        &self,
        min: i64,
        max: i64,
        statuses: &[MessageStatus],
    ) -> Result<Vec<RetryCandidate>, StoreError> {
        let status_names: Vec<String> = statuses.iter().map(MessageStatus::to_string).collect();
        let rows = sqlx::query_as::<_, CandidateRow>(
            "SELECT entity_id, creation_time FROM message_log \
             WHERE entity_id BETWEEN $1 AND $2 AND status = ANY($3) \
             ORDER BY entity_id",
        )
        .bind(min)
        .bind(max)
        .bind(&status_names)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|row| RetryCandidate {
                entity_id: row.entity_id,
                creation_time: row.creation_time,
            })
            .collect())
    }

    async fn transition_status(
        &self,
        entity_id: i64,
        from: &[MessageStatus],
        to: MessageStatus,
    ) -> Result<bool, StoreError> {
        let from_names: Vec<String> = from.iter().map(MessageStatus::to_string).collect();
        let result = sqlx::query(
            "UPDATE message_log SET status = $1 \
             WHERE entity_id = $2 AND status = ANY($3)",
        )
        .bind(to.to_string())
        .bind(entity_id)
        .bind(&from_names)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }
}
