//! Submission intake.
//!
//! The front door for outbound messages. A submission is resolved against
//! the domain's exchange configuration before anything is persisted, so an
//! unroutable message is rejected with the resolver's diagnostics instead
//! of rotting in the log. Accepted messages get a time-ordered entity id,
//! their vocabulary interned, and either the push status or a pull lock.

use std::sync::Arc;

use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::dictionary::Dictionary;
use super::model::{MessageStatus, Submission, UserMessageRef};
use super::store::{MessageStore, StoreError};
use crate::clock::Clock;
use crate::identifier::{EntityIdGenerator, IdentifierError};
use crate::pmode::{
    DomainProviderCache, ExchangePattern, LegResolutionError, LookupError, MshRole, PModeError,
    ValueType,
};
use crate::pull::{PullError, PullMessageService};

#[derive(Debug, thiserror::Error)]
pub enum SubmissionError {
    #[error(transparent)]
    Configuration(#[from] PModeError),
    #[error(transparent)]
    Lookup(#[from] LookupError),
    #[error(transparent)]
    Resolution(#[from] LegResolutionError),
    #[error(transparent)]
    Identifier(#[from] IdentifierError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Pull(#[from] PullError),
}

pub struct MessageSubmitter {
    pmodes: Arc<DomainProviderCache>,
    ids: Arc<EntityIdGenerator>,
    messages: Arc<dyn MessageStore>,
    parties: Arc<dyn Dictionary>,
    services: Arc<dyn Dictionary>,
    actions: Arc<dyn Dictionary>,
    agreements: Arc<dyn Dictionary>,
    pull: Arc<PullMessageService>,
    clock: Arc<dyn Clock>,
    message_id_suffix: String,
}

pub struct SubmitterDictionaries {
    pub parties: Arc<dyn Dictionary>,
    pub services: Arc<dyn Dictionary>,
    pub actions: Arc<dyn Dictionary>,
    pub agreements: Arc<dyn Dictionary>,
}

impl MessageSubmitter {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        pmodes: Arc<DomainProviderCache>,
        ids: Arc<EntityIdGenerator>,
        messages: Arc<dyn MessageStore>,
        dictionaries: SubmitterDictionaries,
        pull: Arc<PullMessageService>,
        clock: Arc<dyn Clock>,
        message_id_suffix: impl Into<String>,
    ) -> Self {
        Self {
            pmodes,
            ids,
            messages,
            parties: dictionaries.parties,
            services: dictionaries.services,
            actions: dictionaries.actions,
            agreements: dictionaries.agreements,
            pull,
            clock,
            message_id_suffix: message_id_suffix.into(),
        }
    }

    /// Accepts one message for outbound delivery and returns its entity id.
    #[instrument(skip(self, submission), fields(pattern = %submission.pattern))]
    pub async fn submit(
        &self,
        domain: &str,
        submission: Submission,
    ) -> Result<i64, SubmissionError> {
        let provider = self.pmodes.for_domain(domain).await?;
        let context = submission.exchange_context(&provider)?;
        let leg = provider.resolve_leg(&context)?;

        let entity_id = self.ids.next()?;
        let message_id = effective_message_id(
            submission.message_id.as_deref(),
            &self.message_id_suffix,
        );

        self.parties.find_or_create(&submission.from_party).await?;
        self.parties.find_or_create(&submission.to_party).await?;
        self.services.find_or_create(&submission.service).await?;
        self.actions
            .find_or_create(&ValueType::untyped(&submission.action))
            .await?;
        if let Some(agreement) = &submission.agreement {
            self.agreements.find_or_create(agreement).await?;
        }

        let status = match submission.pattern {
            ExchangePattern::Push => MessageStatus::PendingSend,
            ExchangePattern::Pull => MessageStatus::ReadyToPull,
        };
        let message = UserMessageRef {
            entity_id,
            message_id: message_id.clone(),
            creation_time: self.clock.now(),
            status,
            msh_role: MshRole::Sending,
            mpc: context.mpc.clone(),
            source_message: false,
            fragment: false,
            from_party: submission.from_party.clone(),
            from_role: submission.from_role.clone(),
            to_party: submission.to_party.clone(),
            to_role: submission.to_role.clone(),
            service: submission.service.clone(),
            action: submission.action.clone(),
            agreement: submission.agreement.clone(),
        };
        self.messages.insert(message.clone()).await?;

        if submission.pattern == ExchangePattern::Pull {
            if let Err(error) = self
                .pull
                .add_lock(&message, &leg, context.initiator_party())
                .await
            {
                self.fail_unlocked(&message).await;
                return Err(error.into());
            }
        }

        info!(
            message_id = %message_id,
            entity_id,
            leg = %leg.name,
            status = %status,
            "Message accepted for delivery"
        );
        Ok(entity_id)
    }

    /// Drives a pull message whose lock was never created to `FAILED`. The
    /// maintenance passes iterate locks, not messages, so an unlocked row
    /// would otherwise sit in `READY_TO_PULL` with nothing left to move it.
    async fn fail_unlocked(&self, message: &UserMessageRef) {
        match self
            .messages
            .transition_status(
                message.entity_id,
                &[MessageStatus::ReadyToPull],
                MessageStatus::Failed,
            )
            .await
        {
            Ok(true) => {
                warn!(
                    message_id = %message.message_id,
                    "Lock creation failed, pull message marked as failed"
                );
            }
            Ok(false) => {}
            Err(error) => {
                warn!(
                    message_id = %message.message_id,
                    error = %error,
                    "Failed to mark an unlockable pull message as failed"
                );
            }
        }
    }
}

/// The caller's message id, trimmed, or a generated `<uuid>@<suffix>` one.
fn effective_message_id(requested: Option<&str>, suffix: &str) -> String {
    match requested.map(str::trim).filter(|id| !id.is_empty()) {
        Some(id) => id.to_string(),
        None => format!("{}@{}", Uuid::new_v4(), suffix),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requested_message_ids_are_kept_and_trimmed() {
        assert_eq!(
            effective_message_id(Some("  msg-1  "), "gateway.eu"),
            "msg-1"
        );
    }

    #[test]
    fn blank_message_ids_are_replaced_with_generated_ones() {
        for requested in [None, Some(""), Some("   ")] {
            let id = effective_message_id(requested, "gateway.eu");
            assert!(id.ends_with("@gateway.eu"));
            assert!(id.len() > "@gateway.eu".len() + 30);
        }
    }

    #[test]
    fn generated_ids_are_unique() {
        let first = effective_message_id(None, "gateway.eu");
        let second = effective_message_id(None, "gateway.eu");
        assert_ne!(first, second);
    }
}
