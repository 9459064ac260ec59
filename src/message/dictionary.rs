//! Vocabulary dictionaries.
//!
//! Party identifiers, services, actions and agreement references form open
//! vocabularies. Each gets a small dictionary table; submission interns the
//! values it carries so the canonical row exists before the message row is
//! written. `find_or_create` is race-safe under concurrent submissions: a
//! lost insert race falls back to reading the winner's row.
//!
//! ## Usage
//!
//! ```rust
//! use as4_core::message::{Dictionary, InMemoryDictionary};
//! use as4_core::pmode::ValueType;
//!
//! # tokio_test::block_on(async {
//! let parties = InMemoryDictionary::new();
//! let id = parties
//!     .find_or_create(&ValueType::new("gateway-blue", "partyTypeUrn"))
//!     .await
//!     .unwrap();
//! let again = parties
//!     .find_or_create(&ValueType::new("gateway-blue", "partyTypeUrn"))
//!     .await
//!     .unwrap();
//! assert_eq!(id, again);
//! # });
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;
use sqlx::PgPool;

use super::store::StoreError;
use crate::pmode::ValueType;

#[async_trait]
pub trait Dictionary: Send + Sync {
    /// Returns the id of the dictionary row for `entry`, inserting it first
    /// when absent. Blank values are rejected.
    async fn find_or_create(&self, entry: &ValueType) -> Result<i64, StoreError>;
}

fn intern_key(entry: &ValueType) -> Result<(String, String), StoreError> {
    if entry.value.trim().is_empty() {
        return Err(StoreError::BlankValue);
    }
    Ok((
        entry.value.clone(),
        entry.normalized_type().unwrap_or_default().to_string(),
    ))
}

/// Map-backed dictionary for tests and embedded use.
#[derive(Debug, Default)]
pub struct InMemoryDictionary {
    entries: RwLock<HashMap<(String, String), i64>>,
    next_id: AtomicI64,
}

impl InMemoryDictionary {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Dictionary for InMemoryDictionary {
    async fn find_or_create(&self, entry: &ValueType) -> Result<i64, StoreError> {
        let key = intern_key(entry)?;
        if let Some(id) = self.entries.read().get(&key) {
            return Ok(*id);
        }
        let mut entries = self.entries.write();
        if let Some(id) = entries.get(&key) {
            return Ok(*id);
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        entries.insert(key, id);
        Ok(id)
    }
}

/// Postgres dictionary over one table with `(value, value_type)` unique.
/// Untyped entries store an empty `value_type`, keeping the unique
/// constraint effective for them as well.
#[derive(Debug, Clone)]
pub struct PgDictionary {
    pool: PgPool,
    table: &'static str,
}

#[derive(Debug, sqlx::FromRow)]
struct IdRow {
    id: i64,
}

impl PgDictionary {
    pub fn parties(pool: PgPool) -> Self {
        Self {
            pool,
            table: "dict_party",
        }
    }

    pub fn services(pool: PgPool) -> Self {
        Self {
            pool,
            table: "dict_service",
        }
    }

    pub fn actions(pool: PgPool) -> Self {
        Self {
            pool,
            table: "dict_action",
        }
    }

    pub fn agreements(pool: PgPool) -> Self {
        Self {
            pool,
            table: "dict_agreement",
        }
    }

    async fn select(&self, value: &str, value_type: &str) -> Result<Option<i64>, StoreError> {
        let query = format!(
            "SELECT id FROM {} WHERE value = $1 AND value_type = $2",
            self.table
        );
        let row = sqlx::query_as::<_, IdRow>(&query)
            .bind(value)
            .bind(value_type)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|row| row.id))
    }
}

#[async_trait]
impl Dictionary for PgDictionary {
    async fn find_or_create(&self, entry: &ValueType) -> Result<i64, StoreError> {
        let (value, value_type) = intern_key(entry)?;
        if let Some(id) = self.select(&value, &value_type).await? {
            return Ok(id);
        }
        let insert = format!(
            "INSERT INTO {} (value, value_type) VALUES ($1, $2) \
             ON CONFLICT (value, value_type) DO NOTHING RETURNING id",
            self.table
        );
        let inserted = sqlx::query_as::<_, IdRow>(&insert)
            .bind(&value)
            .bind(&value_type)
            .fetch_optional(&self.pool)
            .await?;
        if let Some(row) = inserted {
            return Ok(row.id);
        }
        // Lost the insert race; the winning row is committed by now.
        let query = format!(
            "SELECT id FROM {} WHERE value = $1 AND value_type = $2",
            self.table
        );
        let row = sqlx::query_as::<_, IdRow>(&query)
            .bind(&value)
            .bind(&value_type)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn interning_is_idempotent() {
        let dictionary = InMemoryDictionary::new();
        let first = dictionary
            .find_or_create(&ValueType::new("Gateway-Blue", "partyTypeUrn"))
            .await
            .unwrap();
        let again = dictionary
            .find_or_create(&ValueType::new("Gateway-Blue", "partyTypeUrn"))
            .await
            .unwrap();
        assert_eq!(first, again);

        let other = dictionary
            .find_or_create(&ValueType::untyped("Gateway-Blue"))
            .await
            .unwrap();
        assert_ne!(first, other);
    }

    #[tokio::test]
    async fn blank_values_are_rejected() {
        let dictionary = InMemoryDictionary::new();
        assert!(matches!(
            dictionary.find_or_create(&ValueType::untyped("   ")).await,
            Err(StoreError::BlankValue)
        ));
    }

    #[tokio::test]
    async fn type_normalization_collapses_empty_types() {
        let dictionary = InMemoryDictionary::new();
        let untyped = dictionary
            .find_or_create(&ValueType::untyped("bdx:noprocess"))
            .await
            .unwrap();
        let blank_typed = dictionary
            .find_or_create(&ValueType::new("bdx:noprocess", "  "))
            .await
            .unwrap();
        assert_eq!(untyped, blank_typed);
    }
}
