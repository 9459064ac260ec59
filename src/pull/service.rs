//! Pull delivery lifecycle.
//!
//! Messages bound for a pull leg wait behind a lock until the entitled
//! initiator fetches them. This service claims locks for incoming pull
//! requests and runs the three scheduled maintenance passes: returning
//! overdue claims to the queue, expiring stale locks, and purging expired
//! ones. Each maintenance pass treats its items independently, so one bad
//! row never blocks the rest.

use std::sync::Arc;

use chrono::Duration;
use tracing::{debug, info, instrument, warn};

use super::lock::{LockState, PullLock, PullLockStore};
use crate::clock::Clock;
use crate::message::{MessageStatus, MessageStore, StoreError, UserMessageRef};
use crate::pmode::{DomainProviderCache, LegConfiguration, LookupError, PModeError, ValueType};

#[derive(Debug, thiserror::Error)]
pub enum PullError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Lookup(#[from] LookupError),
    #[error(transparent)]
    Configuration(#[from] PModeError),
}

pub struct PullMessageService {
    pmodes: Arc<DomainProviderCache>,
    locks: Arc<dyn PullLockStore>,
    messages: Arc<dyn MessageStore>,
    clock: Arc<dyn Clock>,
    receipt_timeout: Duration,
}

impl PullMessageService {
    pub fn new(
        pmodes: Arc<DomainProviderCache>,
        locks: Arc<dyn PullLockStore>,
        messages: Arc<dyn MessageStore>,
        clock: Arc<dyn Clock>,
        receipt_timeout_minutes: i64,
    ) -> Self {
        Self {
            pmodes,
            locks,
            messages,
            clock,
            receipt_timeout: Duration::minutes(receipt_timeout_minutes),
        }
    }

    /// Serves one pull request: vets the initiator against the pull process
    /// configured for `mpc`, then claims the oldest ready lock. Claimed
    /// locks that turn out stale or out of attempts are expired on the spot
    /// and the next one is tried.
    #[instrument(skip(self, initiator), fields(initiator = %initiator))]
    pub async fn next_pull_message(
        &self,
        domain: &str,
        initiator: &ValueType,
        mpc: &str,
    ) -> Result<Option<String>, PullError> {
        let provider = self.pmodes.for_domain(domain).await?;
        let initiator_name = provider.find_party_name(initiator)?;
        provider.pull_process_for(mpc, &initiator_name)?;

        loop {
            let now = self.clock.now();
            let Some(lock) = self.locks.claim_next(&initiator_name, mpc, now).await? else {
                debug!(mpc = %mpc, "No message ready to pull");
                return Ok(None);
            };
            if lock.staled <= now || lock.send_attempts > lock.send_attempts_max {
                info!(
                    message_id = %lock.message_id,
                    attempts = lock.send_attempts,
                    "Claimed lock is no longer serviceable, expiring it"
                );
                self.expire_lock(&lock).await;
                continue;
            }
            debug!(message_id = %lock.message_id, "Lock claimed for pull");
            return Ok(Some(lock.message_id));
        }
    }

    /// Registers a lock for a freshly accepted pull message. The staleness
    /// deadline comes from the leg's retry policy, anchored at the
    /// message's creation time.
    pub async fn add_lock(
        &self,
        message: &UserMessageRef,
        leg: &LegConfiguration,
        initiator: &str,
    ) -> Result<(), PullError> {
        let lock = PullLock {
            message_entity_id: message.entity_id,
            message_id: message.message_id.clone(),
            initiator: initiator.to_string(),
            mpc: message.mpc.clone(),
            state: LockState::ReadyToPull,
            received: self.clock.now(),
            staled: message.creation_time + Duration::minutes(leg.retry.timeout_minutes),
            claimed_at: None,
            send_attempts: 0,
            send_attempts_max: leg.retry.count,
        };
        self.locks.insert(lock).await?;
        debug!(
            message_id = %message.message_id,
            initiator = %initiator,
            mpc = %message.mpc,
            "Pull lock created"
        );
        Ok(())
    }

    /// Removes the lock once the receipt for `message_id` has arrived.
    pub async fn delete_lock(&self, message_id: &str) -> Result<bool, PullError> {
        let removed = self.locks.delete_by_message_id(message_id).await?;
        if removed {
            debug!(message_id = %message_id, "Pull lock removed");
        }
        Ok(removed)
    }

    /// Returns claimed locks whose receipt is overdue to `READY_TO_PULL`.
    /// Runs on a schedule; a no-op when nothing is overdue.
    #[instrument(skip(self))]
    pub async fn reset_stale_pull_claims(&self) -> Result<usize, PullError> {
        let cutoff = self.clock.now() - self.receipt_timeout;
        let overdue = self.locks.find_waiting_claimed_before(cutoff).await?;
        let mut reset = 0;
        for lock in overdue {
            match self
                .locks
                .transition(
                    lock.message_entity_id,
                    &[LockState::WaitingForReceipt],
                    LockState::ReadyToPull,
                )
                .await
            {
                Ok(true) => reset += 1,
                Ok(false) => {}
                Err(error) => {
                    warn!(
                        message_id = %lock.message_id,
                        error = %error,
                        "Failed to reset an overdue pull claim"
                    );
                }
            }
        }
        if reset > 0 {
            info!(reset, "Returned overdue pull claims to the queue");
        }
        Ok(reset)
    }

    /// Expires every lock past its staleness deadline and drives the locked
    /// message to a terminal send failure.
    #[instrument(skip(self))]
    pub async fn expire_stale_pull_locks(&self) -> Result<usize, PullError> {
        let staled = self.locks.find_staled(self.clock.now()).await?;
        let mut expired = 0;
        for lock in staled {
            if self.expire_lock(&lock).await {
                expired += 1;
            }
        }
        if expired > 0 {
            info!(expired, "Expired stale pull locks");
        }
        Ok(expired)
    }

    /// Deletes expired locks, one at a time, so a failure on one row never
    /// prevents deletion of the others.
    #[instrument(skip(self))]
    pub async fn purge_deleted_pull_locks(&self) -> Result<usize, PullError> {
        let expired = self.locks.find_expired().await?;
        let mut purged = 0;
        for lock in expired {
            match self.locks.delete(lock.message_entity_id).await {
                Ok(true) => purged += 1,
                Ok(false) => {}
                Err(error) => {
                    warn!(
                        message_id = %lock.message_id,
                        error = %error,
                        "Failed to purge an expired pull lock"
                    );
                }
            }
        }
        if purged > 0 {
            info!(purged, "Purged expired pull locks");
        }
        Ok(purged)
    }

    /// Moves one lock to `EXPIRED` and fails the message behind it. A
    /// missing or already terminal message is tolerated; retention cleanup
    /// may have deleted it before the lock.
    async fn expire_lock(&self, lock: &PullLock) -> bool {
        let moved = match self
            .locks
            .transition(
                lock.message_entity_id,
                &[LockState::ReadyToPull, LockState::WaitingForReceipt],
                LockState::Expired,
            )
            .await
        {
            Ok(moved) => moved,
            Err(error) => {
                warn!(
                    message_id = %lock.message_id,
                    error = %error,
                    "Failed to expire a stale pull lock"
                );
                return false;
            }
        };
        if !moved {
            return false;
        }
        match self
            .messages
            .transition_status(
                lock.message_entity_id,
                &[
                    MessageStatus::PendingSend,
                    MessageStatus::ReadyToPull,
                    MessageStatus::WaitingForAck,
                ],
                MessageStatus::Failed,
            )
            .await
        {
            Ok(true) => {
                info!(message_id = %lock.message_id, "Pull message expired, marked as failed");
            }
            Ok(false) => {
                debug!(
                    message_id = %lock.message_id,
                    "Expired a lock whose message is gone or already terminal"
                );
            }
            Err(error) => {
                warn!(
                    message_id = %lock.message_id,
                    error = %error,
                    "Failed to update the message behind an expired pull lock"
                );
            }
        }
        true
    }
}
