//! Push retry scheduling.
//!
//! A message accepted for push delivery stays in the log until a receipt
//! arrives or its leg's retry window closes. The single-message path
//! re-resolves the leg, applies the expiry policy and hands the message to
//! the send pipeline; the periodic discovery pass finds everything worth
//! re-enqueueing using the time-ordered identifier range as a coarse index.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Duration;
use tracing::{debug, error, info, instrument, warn};

use crate::clock::Clock;
use crate::identifier::range_for_time_window;
use crate::message::{
    MessageAttempt, MessageAttemptStore, MessageStatus, MessageStore, StoreError, UserMessageRef,
};
use crate::pmode::{
    DomainProviderCache, ExchangePattern, LegResolutionError, LookupError, PModeError,
};

/// Hand-off point to the transport. Submission is asynchronous; delivery
/// success or failure comes back later through the receipt path, so an
/// `Ok` here only means the pipeline accepted the message.
#[async_trait]
pub trait SendPipeline: Send + Sync {
    async fn submit(&self, message: &UserMessageRef) -> Result<(), SendError>;
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("send pipeline rejected message [{message_id}]: {reason}")]
pub struct SendError {
    pub message_id: String,
    pub reason: String,
}

#[derive(Debug, thiserror::Error)]
pub enum RetryError {
    #[error(transparent)]
    Configuration(#[from] PModeError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Lookup(#[from] LookupError),
    #[error(transparent)]
    Resolution(#[from] LegResolutionError),
    #[error(transparent)]
    Send(#[from] SendError),
}

pub struct RetryService {
    domain: String,
    pmodes: Arc<DomainProviderCache>,
    messages: Arc<dyn MessageStore>,
    pipeline: Arc<dyn SendPipeline>,
    attempts: Arc<dyn MessageAttemptStore>,
    clock: Arc<dyn Clock>,
    retry_delay: Duration,
}

impl RetryService {
    pub fn new(
        domain: impl Into<String>,
        pmodes: Arc<DomainProviderCache>,
        messages: Arc<dyn MessageStore>,
        pipeline: Arc<dyn SendPipeline>,
        attempts: Arc<dyn MessageAttemptStore>,
        clock: Arc<dyn Clock>,
        retry_delay_minutes: i64,
    ) -> Self {
        Self {
            domain: domain.into(),
            pmodes,
            messages,
            pipeline,
            attempts,
            clock,
            retry_delay: Duration::minutes(retry_delay_minutes),
        }
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// Re-enqueues one message for sending.
    ///
    /// Fragments and split sources are skipped silently, as are messages in
    /// a terminal or pull status. A message whose metadata no longer
    /// matches any leg is marked `FAILED`; one whose retry window has
    /// closed transitions to `EXPIRED` without a send attempt.
    #[instrument(skip(self), fields(domain = %self.domain))]
    pub async fn enqueue_for_retry(&self, entity_id: i64) -> Result<(), RetryError> {
        let Some(message) = self.messages.find_by_entity_id(entity_id).await? else {
            warn!("Retry requested for an unknown message");
            return Ok(());
        };
        if message.fragment || message.source_message {
            debug!(message_id = %message.message_id, "Skipping split message part");
            return Ok(());
        }
        if !message.status.is_retryable() {
            debug!(
                message_id = %message.message_id,
                status = %message.status,
                "Message is not in a retryable status"
            );
            return Ok(());
        }

        let provider = self.pmodes.for_domain(&self.domain).await?;
        let context = match message.exchange_context(&provider, ExchangePattern::Push) {
            Ok(context) => context,
            Err(lookup) => {
                self.mark_failed(&message, &lookup.to_string()).await;
                return Err(lookup.into());
            }
        };
        let leg = match provider.resolve_leg(&context) {
            Ok(leg) => leg,
            Err(resolution) => {
                self.mark_failed(&message, &resolution.to_string()).await;
                return Err(resolution.into());
            }
        };

        let now = self.clock.now();
        if now - message.creation_time > Duration::minutes(leg.retry.timeout_minutes) {
            let moved = self
                .messages
                .transition_status(
                    entity_id,
                    &[MessageStatus::PendingSend, MessageStatus::WaitingForAck],
                    MessageStatus::Expired,
                )
                .await?;
            if moved {
                info!(
                    message_id = %message.message_id,
                    timeout_minutes = leg.retry.timeout_minutes,
                    "Retry window elapsed, message expired"
                );
            }
            return Ok(());
        }

        let started = now;
        match self.pipeline.submit(&message).await {
            Ok(()) => {
                self.attempts
                    .record(MessageAttempt::success(
                        entity_id,
                        started,
                        self.clock.now(),
                    ))
                    .await?;
                self.messages
                    .transition_status(
                        entity_id,
                        &[MessageStatus::PendingSend],
                        MessageStatus::WaitingForAck,
                    )
                    .await?;
                debug!(message_id = %message.message_id, "Message handed to the send pipeline");
                Ok(())
            }
            Err(send_error) => {
                self.attempts
                    .record(MessageAttempt::failed(
                        entity_id,
                        started,
                        self.clock.now(),
                        &send_error.to_string(),
                    ))
                    .await?;
                warn!(
                    message_id = %message.message_id,
                    error = %send_error,
                    "Send pipeline refused the message, will retry later"
                );
                Err(send_error.into())
            }
        }
    }

    /// One periodic discovery run: ranges over the identifier window wide
    /// enough for the domain's longest retry policy, narrows it with an
    /// exact timestamp check, and re-enqueues each survivor independently.
    #[instrument(skip(self), fields(domain = %self.domain))]
    pub async fn run_retry_discovery_pass(&self) -> Result<usize, RetryError> {
        let provider = self.pmodes.for_domain(&self.domain).await?;
        let window = Duration::minutes(provider.max_retry_timeout()) + self.retry_delay;
        let now = self.clock.now();
        let (min_id, max_id) = range_for_time_window(now - window, now);

        let candidates = self
            .messages
            .find_in_range(
                min_id,
                max_id,
                &[MessageStatus::PendingSend, MessageStatus::WaitingForAck],
            )
            .await?;
        let in_range = candidates.len();

        let mut enqueued = 0;
        for candidate in candidates {
            // The identifier range is hour-granular and over-selects at its
            // edges; only the creation time decides membership.
            if now - candidate.creation_time > window {
                continue;
            }
            match self.enqueue_for_retry(candidate.entity_id).await {
                Ok(()) => enqueued += 1,
                Err(error) => {
                    error!(
                        entity_id = candidate.entity_id,
                        error = %error,
                        "Retry enqueue failed, continuing with the rest of the batch"
                    );
                }
            }
        }
        debug!(in_range, enqueued, "Retry discovery pass finished");
        Ok(enqueued)
    }

    async fn mark_failed(&self, message: &UserMessageRef, reason: &str) {
        error!(
            message_id = %message.message_id,
            reason = %reason,
            "Message cannot be matched to a leg, marking it as failed"
        );
        if let Err(error) = self
            .messages
            .transition_status(
                message.entity_id,
                &[MessageStatus::PendingSend, MessageStatus::WaitingForAck],
                MessageStatus::Failed,
            )
            .await
        {
            error!(
                message_id = %message.message_id,
                error = %error,
                "Failed to record the failure status"
            );
        }
    }
}
