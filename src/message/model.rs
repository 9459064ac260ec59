use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::pmode::{
    ExchangePattern, LookupError, MessageExchangeContext, MshRole, PModeProvider, ValueType,
    DEFAULT_MPC,
};

/// Outward delivery status of a user message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageStatus {
    /// Accepted for push delivery, no send attempt observed yet
    PendingSend,
    /// Accepted for pull delivery, waiting for the initiator to fetch it
    ReadyToPull,
    /// Handed to the send pipeline, waiting for the receipt
    WaitingForAck,
    /// Receipt received, delivery complete
    Acknowledged,
    /// Delivery abandoned after an unrecoverable error
    Failed,
    /// Retry window elapsed before delivery completed
    Expired,
}

impl MessageStatus {
    /// Check if this is a terminal status (no further transitions allowed)
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Acknowledged | Self::Failed | Self::Expired)
    }

    /// Check if a retry pass may act on a message in this status
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::PendingSend | Self::WaitingForAck)
    }
}

impl fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PendingSend => write!(f, "PENDING_SEND"),
            Self::ReadyToPull => write!(f, "READY_TO_PULL"),
            Self::WaitingForAck => write!(f, "WAITING_FOR_ACK"),
            Self::Acknowledged => write!(f, "ACKNOWLEDGED"),
            Self::Failed => write!(f, "FAILED"),
            Self::Expired => write!(f, "EXPIRED"),
        }
    }
}

impl std::str::FromStr for MessageStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING_SEND" => Ok(Self::PendingSend),
            "READY_TO_PULL" => Ok(Self::ReadyToPull),
            "WAITING_FOR_ACK" => Ok(Self::WaitingForAck),
            "ACKNOWLEDGED" => Ok(Self::Acknowledged),
            "FAILED" => Ok(Self::Failed),
            "EXPIRED" => Ok(Self::Expired),
            _ => Err(format!("Invalid message status: {s}")),
        }
    }
}

/// Identifier and creation instant of a message picked up by the retry
/// discovery query. The coarse identifier range over-selects at the hour
/// boundary, so the creation time rides along for the exact filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryCandidate {
    pub entity_id: i64,
    pub creation_time: DateTime<Utc>,
}

/// Stored view of an outbound user message. Carries the raw ebMS header
/// metadata the resolver needs, not the payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserMessageRef {
    pub entity_id: i64,
    pub message_id: String,
    pub creation_time: DateTime<Utc>,
    pub status: MessageStatus,
    pub msh_role: MshRole,
    pub mpc: String,
    /// True on the reassembled original of a split message.
    pub source_message: bool,
    /// True on each part of a split message.
    pub fragment: bool,
    pub from_party: ValueType,
    pub from_role: String,
    pub to_party: ValueType,
    pub to_role: String,
    pub service: ValueType,
    pub action: String,
    pub agreement: Option<ValueType>,
}

impl UserMessageRef {
    /// Maps the raw header metadata onto configured names, producing the
    /// context the leg resolver consumes.
    pub fn exchange_context(
        &self,
        provider: &PModeProvider,
        pattern: ExchangePattern,
    ) -> Result<MessageExchangeContext, LookupError> {
        Ok(MessageExchangeContext {
            sender_party: provider.find_party_name(&self.from_party)?,
            receiver_party: provider.find_party_name(&self.to_party)?,
            sender_role: provider.find_role_name(&self.from_role)?,
            receiver_role: provider.find_role_name(&self.to_role)?,
            service: provider.find_service_name(&self.service)?,
            action: provider.find_action_name(&self.action)?,
            agreement: match &self.agreement {
                Some(agreement) => Some(provider.find_agreement_name(agreement)?),
                None => None,
            },
            mpc: self.mpc.clone(),
            direction: self.msh_role,
            pattern,
        })
    }
}

/// One message handed to the gateway for outbound delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Submission {
    /// Caller-assigned ebMS message id; generated when absent.
    pub message_id: Option<String>,
    pub pattern: ExchangePattern,
    pub from_party: ValueType,
    pub from_role: String,
    pub to_party: ValueType,
    pub to_role: String,
    pub service: ValueType,
    pub action: String,
    pub agreement: Option<ValueType>,
    /// Qualified sub-channel; the leg default applies when absent.
    pub mpc: Option<String>,
}

impl Submission {
    pub fn mpc_or_default(&self) -> &str {
        self.mpc.as_deref().unwrap_or(DEFAULT_MPC)
    }

    /// Maps the submitted metadata onto configured names. Submissions always
    /// enter on the sending side.
    pub fn exchange_context(
        &self,
        provider: &PModeProvider,
    ) -> Result<MessageExchangeContext, LookupError> {
        Ok(MessageExchangeContext {
            sender_party: provider.find_party_name(&self.from_party)?,
            receiver_party: provider.find_party_name(&self.to_party)?,
            sender_role: provider.find_role_name(&self.from_role)?,
            receiver_role: provider.find_role_name(&self.to_role)?,
            service: provider.find_service_name(&self.service)?,
            action: provider.find_action_name(&self.action)?,
            agreement: match &self.agreement {
                Some(agreement) => Some(provider.find_agreement_name(agreement)?),
                None => None,
            },
            mpc: self.mpc_or_default().to_string(),
            direction: MshRole::Sending,
            pattern: self.pattern,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn terminal_statuses_are_closed() {
        assert!(MessageStatus::Acknowledged.is_terminal());
        assert!(MessageStatus::Failed.is_terminal());
        assert!(MessageStatus::Expired.is_terminal());
        assert!(!MessageStatus::PendingSend.is_terminal());
        assert!(!MessageStatus::ReadyToPull.is_terminal());
        assert!(!MessageStatus::WaitingForAck.is_terminal());
    }

    #[test]
    fn status_round_trips_through_its_stored_form() {
        for status in [
            MessageStatus::PendingSend,
            MessageStatus::ReadyToPull,
            MessageStatus::WaitingForAck,
            MessageStatus::Acknowledged,
            MessageStatus::Failed,
            MessageStatus::Expired,
        ] {
            assert_eq!(MessageStatus::from_str(&status.to_string()), Ok(status));
        }
        assert!(MessageStatus::from_str("SENT").is_err());
    }

    #[test]
    fn retryable_statuses_exclude_pull_and_terminal() {
        assert!(MessageStatus::PendingSend.is_retryable());
        assert!(MessageStatus::WaitingForAck.is_retryable());
        assert!(!MessageStatus::ReadyToPull.is_retryable());
        assert!(!MessageStatus::Failed.is_retryable());
    }
}
