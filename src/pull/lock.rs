//! Pull lock persistence.
//!
//! Each message submitted for pull delivery gets one lock row keyed by the
//! message's entity id. Claiming a lock is the contention point of the pull
//! pattern: concurrent pull requests for the same sub-channel must each get
//! a distinct message, which the Postgres store guarantees with
//! `FOR UPDATE SKIP LOCKED`.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;

use crate::message::StoreError;

/// Lifecycle of one pull lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LockState {
    /// Waiting for an initiator to claim it
    ReadyToPull,
    /// Claimed; the initiator owes a receipt
    WaitingForReceipt,
    /// Stale; queued for deletion
    Expired,
}

impl LockState {
    /// Check if this is a terminal state (no further transitions allowed)
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Expired)
    }
}

impl fmt::Display for LockState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReadyToPull => write!(f, "READY_TO_PULL"),
            Self::WaitingForReceipt => write!(f, "WAITING_FOR_RECEIPT"),
            Self::Expired => write!(f, "EXPIRED"),
        }
    }
}

impl FromStr for LockState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "READY_TO_PULL" => Ok(Self::ReadyToPull),
            "WAITING_FOR_RECEIPT" => Ok(Self::WaitingForReceipt),
            "EXPIRED" => Ok(Self::Expired),
            _ => Err(format!("Invalid lock state: {s}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PullLock {
    /// Entity id of the locked message; one lock per message.
    pub message_entity_id: i64,
    pub message_id: String,
    /// Party name entitled to claim this lock.
    pub initiator: String,
    /// Qualified sub-channel the message waits on.
    pub mpc: String,
    pub state: LockState,
    /// Lock creation instant.
    pub received: DateTime<Utc>,
    /// Staleness deadline; past it the lock is expired, not served.
    pub staled: DateTime<Utc>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub send_attempts: i32,
    pub send_attempts_max: i32,
}

#[async_trait]
pub trait PullLockStore: Send + Sync {
    async fn insert(&self, lock: PullLock) -> Result<(), StoreError>;

    /// Claims the oldest ready lock for `(initiator, mpc)`: moves it to
    /// `WAITING_FOR_RECEIPT`, stamps the claim instant and counts the
    /// attempt. Concurrent claimants never receive the same lock.
    async fn claim_next(
        &self,
        initiator: &str,
        mpc: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<PullLock>, StoreError>;

    /// Claimed locks whose receipt is overdue.
    async fn find_waiting_claimed_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<PullLock>, StoreError>;

    /// Non-terminal locks past their staleness deadline.
    async fn find_staled(&self, now: DateTime<Utc>) -> Result<Vec<PullLock>, StoreError>;

    async fn find_expired(&self) -> Result<Vec<PullLock>, StoreError>;

    /// Moves the lock to `to` if its current state is one of `from`.
    /// Returning a lock to `READY_TO_PULL` clears the claim instant.
    async fn transition(
        &self,
        message_entity_id: i64,
        from: &[LockState],
        to: LockState,
    ) -> Result<bool, StoreError>;

    async fn delete(&self, message_entity_id: i64) -> Result<bool, StoreError>;

    async fn delete_by_message_id(&self, message_id: &str) -> Result<bool, StoreError>;
}

/// Map-backed lock store for tests and embedded use.
#[derive(Debug, Default)]
pub struct InMemoryPullLockStore {
    locks: RwLock<BTreeMap<i64, PullLock>>,
}

impl InMemoryPullLockStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PullLockStore for InMemoryPullLockStore {
    async fn insert(&self, lock: PullLock) -> Result<(), StoreError> {
        let mut locks = self.locks.write();
        if locks.contains_key(&lock.message_entity_id) {
            return Err(StoreError::Duplicate(lock.message_id));
        }
        locks.insert(lock.message_entity_id, lock);
        Ok(())
    }

    async fn claim_next(
        &self,
        initiator: &str,
        mpc: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<PullLock>, StoreError> {
        let mut locks = self.locks.write();
        let next = locks
            .values()
            .filter(|lock| {
                lock.state == LockState::ReadyToPull
                    && lock.initiator == initiator
                    && lock.mpc == mpc
            })
            .min_by_key(|lock| (lock.received, lock.message_entity_id))
            .map(|lock| lock.message_entity_id);
        let Some(message_entity_id) = next else {
            return Ok(None);
        };
        let lock = locks
            .get_mut(&message_entity_id)
            .ok_or(StoreError::InvalidRow {
                entity_id: message_entity_id,
                detail: "lock vanished mid-claim".to_string(),
            })?;
        lock.state = LockState::WaitingForReceipt;
        lock.claimed_at = Some(now);
        lock.send_attempts += 1;
        Ok(Some(lock.clone()))
    }

    async fn find_waiting_claimed_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<PullLock>, StoreError> {
        Ok(self
            .locks
            .read()
            .values()
            .filter(|lock| {
                lock.state == LockState::WaitingForReceipt
                    && lock.claimed_at.map(|at| at <= cutoff).unwrap_or(false)
            })
            .cloned()
            .collect())
    }

    async fn find_staled(&self, now: DateTime<Utc>) -> Result<Vec<PullLock>, StoreError> {
        Ok(self
            .locks
            .read()
            .values()
            .filter(|lock| !lock.state.is_terminal() && lock.staled <= now)
            .cloned()
            .collect())
    }

    async fn find_expired(&self) -> Result<Vec<PullLock>, StoreError> {
        Ok(self
            .locks
            .read()
            .values()
            .filter(|lock| lock.state == LockState::Expired)
            .cloned()
            .collect())
    }

    async fn transition(
        &self,
        message_entity_id: i64,
        from: &[LockState],
        to: LockState,
    ) -> Result<bool, StoreError> {
        let mut locks = self.locks.write();
        match locks.get_mut(&message_entity_id) {
            Some(lock) if from.contains(&lock.state) => {
                lock.state = to;
                if to == LockState::ReadyToPull {
                    lock.claimed_at = None;
                }
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete(&self, message_entity_id: i64) -> Result<bool, StoreError> {
        Ok(self.locks.write().remove(&message_entity_id).is_some())
    }

    async fn delete_by_message_id(&self, message_id: &str) -> Result<bool, StoreError> {
        let mut locks = self.locks.write();
        let found = locks
            .values()
            .find(|lock| lock.message_id == message_id)
            .map(|lock| lock.message_entity_id);
        match found {
            Some(id) => Ok(locks.remove(&id).is_some()),
            None => Ok(false),
        }
    }
}

/// Postgres lock store over the `pull_message_lock` table.
#[derive(Debug, Clone)]
pub struct PgPullLockStore {
    pool: PgPool,
}

impl PgPullLockStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct LockRow {
    message_entity_id: i64,
    message_id: String,
    initiator: String,
    mpc: String,
    state: String,
    received: DateTime<Utc>,
    staled: DateTime<Utc>,
    claimed_at: Option<DateTime<Utc>>,
    send_attempts: i32,
    send_attempts_max: i32,
}

impl LockRow {
    fn into_lock(self) -> Result<PullLock, StoreError> {
        let state = LockState::from_str(&self.state).map_err(|detail| StoreError::InvalidRow {
            entity_id: self.message_entity_id,
            detail,
        })?;
        Ok(PullLock {
            message_entity_id: self.message_entity_id,
            message_id: self.message_id,
            initiator: self.initiator,
            mpc: self.mpc,
            state,
            received: self.received,
            staled: self.staled,
            claimed_at: self.claimed_at,
            send_attempts: self.send_attempts,
            send_attempts_max: self.send_attempts_max,
        })
    }
}

const LOCK_COLUMNS: &str = "message_entity_id, message_id, initiator, mpc, state, received, \
     staled, claimed_at, send_attempts, send_attempts_max";

#[async_trait]
impl PullLockStore for PgPullLockStore {
    async fn insert(&self, lock: PullLock) -> Result<(), StoreError> {
        let query = format!(
            "INSERT INTO pull_message_lock ({LOCK_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) \
             ON CONFLICT (message_entity_id) DO NOTHING"
        );
        let result = sqlx::query(&query)
            .bind(lock.message_entity_id)
            .bind(&lock.message_id)
            .bind(&lock.initiator)
            .bind(&lock.mpc)
            .bind(lock.state.to_string())
            .bind(lock.received)
            .bind(lock.staled)
            .bind(lock.claimed_at)
            .bind(lock.send_attempts)
            .bind(lock.send_attempts_max)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::Duplicate(lock.message_id));
        }
        Ok(())
    }

    async fn claim_next(
        &self,
        initiator: &str,
        mpc: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<PullLock>, StoreError> {
        let query = format!(
            "WITH next_lock AS ( \
                 SELECT message_entity_id FROM pull_message_lock \
                 WHERE initiator = $1 AND mpc = $2 AND state = $3 \
                 ORDER BY received, message_entity_id \
                 FOR UPDATE SKIP LOCKED \
                 LIMIT 1 \
             ) \
             UPDATE pull_message_lock SET \
                 state = $4, \
                 claimed_at = $5, \
                 send_attempts = send_attempts + 1 \
             WHERE message_entity_id IN (SELECT message_entity_id FROM next_lock) \
             RETURNING {LOCK_COLUMNS}"
        );
        let row = sqlx::query_as::<_, LockRow>(&query)
            .bind(initiator)
            .bind(mpc)
            .bind(LockState::ReadyToPull.to_string())
            .bind(LockState::WaitingForReceipt.to_string())
            .bind(now)
            .fetch_optional(&self.pool)
            .await?;
        row.map(LockRow::into_lock).transpose()
    }

    async fn find_waiting_claimed_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<PullLock>, StoreError> {
        let query = format!(
            "SELECT {LOCK_COLUMNS} FROM pull_message_lock \
             WHERE state = $1 AND claimed_at IS NOT NULL AND claimed_at <= $2"
        );
        let rows = sqlx::query_as::<_, LockRow>(&query)
            .bind(LockState::WaitingForReceipt.to_string())
            .bind(cutoff)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(LockRow::into_lock).collect()
    }

    async fn find_staled(&self, now: DateTime<Utc>) -> Result<Vec<PullLock>, StoreError> {
        let query = format!(
            "SELECT {LOCK_COLUMNS} FROM pull_message_lock \
             WHERE state <> $1 AND staled <= $2"
        );
        let rows = sqlx::query_as::<_, LockRow>(&query)
            .bind(LockState::Expired.to_string())
            .bind(now)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(LockRow::into_lock).collect()
    }

    async fn find_expired(&self) -> Result<Vec<PullLock>, StoreError> {
        let query = format!("SELECT {LOCK_COLUMNS} FROM pull_message_lock WHERE state = $1");
        let rows = sqlx::query_as::<_, LockRow>(&query)
            .bind(LockState::Expired.to_string())
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(LockRow::into_lock).collect()
    }

    async fn transition(
        &self,
        message_entity_id: i64,
        from: &[LockState],
        to: LockState,
    ) -> Result<bool, StoreError> {
        let from_names: Vec<String> = from.iter().map(LockState::to_string).collect();
        let result = sqlx::query(
            "UPDATE pull_message_lock SET \
                 state = $1, \
                 claimed_at = CASE WHEN $1 = $2 THEN NULL ELSE claimed_at END \
             WHERE message_entity_id = $3 AND state = ANY($4)",
        )
        .bind(to.to_string())
        .bind(LockState::ReadyToPull.to_string())
        .bind(message_entity_id)
        .bind(&from_names)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn delete(&self, message_entity_id: i64) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM pull_message_lock WHERE message_entity_id = $1")
            .bind(message_entity_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn delete_by_message_id(&self, message_id: &str) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM pull_message_lock WHERE message_id = $1")
            .bind(message_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn lock(id: i64, received: DateTime<Utc>) -> PullLock {
        PullLock {
            message_entity_id: id,
            message_id: format!("m-{id}"),
            initiator: "blue_gw".into(),
            mpc: crate::pmode::DEFAULT_MPC.into(),
            state: LockState::ReadyToPull,
            received,
            staled: received + Duration::minutes(12),
            claimed_at: None,
            send_attempts: 0,
            send_attempts_max: 4,
        }
    }

    #[test]
    fn only_expired_locks_are_terminal() {
        assert!(LockState::Expired.is_terminal());
        assert!(!LockState::ReadyToPull.is_terminal());
        assert!(!LockState::WaitingForReceipt.is_terminal());
    }

    #[tokio::test]
    async fn claims_the_oldest_ready_lock() {
        let store = InMemoryPullLockStore::new();
        let base = Utc::now();
        store.insert(lock(2, base + Duration::seconds(5))).await.unwrap();
        store.insert(lock(1, base)).await.unwrap();

        let claimed = store
            .claim_next("blue_gw", crate::pmode::DEFAULT_MPC, base)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(claimed.message_entity_id, 1);
        assert_eq!(claimed.state, LockState::WaitingForReceipt);
        assert_eq!(claimed.send_attempts, 1);
        assert_eq!(claimed.claimed_at, Some(base));

        let claimed = store
            .claim_next("blue_gw", crate::pmode::DEFAULT_MPC, base)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(claimed.message_entity_id, 2);

        assert!(store
            .claim_next("blue_gw", crate::pmode::DEFAULT_MPC, base)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn claim_is_scoped_to_initiator_and_mpc() {
        let store = InMemoryPullLockStore::new();
        let base = Utc::now();
        store.insert(lock(1, base)).await.unwrap();

        assert!(store
            .claim_next("red_gw", crate::pmode::DEFAULT_MPC, base)
            .await
            .unwrap()
            .is_none());
        assert!(store
            .claim_next("blue_gw", "urn:mpc:other", base)
            .await
            .unwrap()
            .is_none());
        assert!(store
            .claim_next("blue_gw", crate::pmode::DEFAULT_MPC, base)
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn returning_a_lock_to_ready_clears_the_claim() {
        let store = InMemoryPullLockStore::new();
        let base = Utc::now();
        store.insert(lock(1, base)).await.unwrap();
        store
            .claim_next("blue_gw", crate::pmode::DEFAULT_MPC, base)
            .await
            .unwrap()
            .unwrap();

        let moved = store
            .transition(1, &[LockState::WaitingForReceipt], LockState::ReadyToPull)
            .await
            .unwrap();
        assert!(moved);

        let reclaimed = store
            .claim_next("blue_gw", crate::pmode::DEFAULT_MPC, base)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reclaimed.send_attempts, 2);
    }

    #[tokio::test]
    async fn staleness_scan_ignores_already_expired_locks() {
        let store = InMemoryPullLockStore::new();
        let base = Utc::now();
        let mut stale = lock(1, base - Duration::minutes(30));
        stale.staled = base - Duration::minutes(1);
        store.insert(stale).await.unwrap();
        store.insert(lock(2, base)).await.unwrap();

        let staled = store.find_staled(base).await.unwrap();
        assert_eq!(staled.len(), 1);
        assert_eq!(staled[0].message_entity_id, 1);

        store
            .transition(1, &[LockState::ReadyToPull], LockState::Expired)
            .await
            .unwrap();
        assert!(store.find_staled(base).await.unwrap().is_empty());
        assert_eq!(store.find_expired().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn delete_by_message_id_targets_the_right_lock() {
        let store = InMemoryPullLockStore::new();
        let base = Utc::now();
        store.insert(lock(1, base)).await.unwrap();
        store.insert(lock(2, base)).await.unwrap();

        assert!(store.delete_by_message_id("m-1").await.unwrap());
        assert!(!store.delete_by_message_id("m-1").await.unwrap());
        assert!(store.delete(2).await.unwrap());
        assert!(!store.delete(2).await.unwrap());
    }
}
