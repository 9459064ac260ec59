//! Message exchange context.
//!
//! The transient, resolved view of one message's routing metadata: configured
//! party/role/service/action/agreement *names* (mapped from raw wire values
//! by the provider), the MPC, the transfer direction and the exchange
//! pattern. Leg resolution operates on contexts, never on raw messages.

use serde::{Deserialize, Serialize};

use super::model::ExchangePattern;

/// Separator used when rendering a context and leg as a PMode key.
pub const PMODE_KEY_SEPARATOR: &str = ":";

/// Which side of the transfer this gateway plays for a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MshRole {
    Sending,
    Receiving,
}

impl std::fmt::Display for MshRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MshRole::Sending => write!(f, "sending"),
            MshRole::Receiving => write!(f, "receiving"),
        }
    }
}

impl std::str::FromStr for MshRole {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "sending" => Ok(MshRole::Sending),
            "receiving" => Ok(MshRole::Receiving),
            other => Err(format!("unknown msh role: {other}")),
        }
    }
}

/// Resolved routing metadata of one in-flight message.
///
/// `sender`/`receiver` always follow the message's From/To parties. The
/// *apparent* initiator and responder depend on the exchange pattern: for
/// push the sender initiates, for pull the receiver does (it sends the pull
/// request), which is why the accessors below exist instead of callers
/// reading the fields directly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageExchangeContext {
    pub sender_party: String,
    pub receiver_party: String,
    pub sender_role: String,
    pub receiver_role: String,
    pub service: String,
    pub action: String,
    #[serde(default)]
    pub agreement: Option<String>,
    /// Qualified MPC the message travels on.
    pub mpc: String,
    pub direction: MshRole,
    pub pattern: ExchangePattern,
}

impl MessageExchangeContext {
    pub fn initiator_party(&self) -> &str {
        match self.pattern {
            ExchangePattern::Push => &self.sender_party,
            ExchangePattern::Pull => &self.receiver_party,
        }
    }

    pub fn responder_party(&self) -> &str {
        match self.pattern {
            ExchangePattern::Push => &self.receiver_party,
            ExchangePattern::Pull => &self.sender_party,
        }
    }

    pub fn initiator_role(&self) -> &str {
        match self.pattern {
            ExchangePattern::Push => &self.sender_role,
            ExchangePattern::Pull => &self.receiver_role,
        }
    }

    pub fn responder_role(&self) -> &str {
        match self.pattern {
            ExchangePattern::Push => &self.receiver_role,
            ExchangePattern::Pull => &self.sender_role,
        }
    }

    /// Renders the six-part PMode key
    /// `sender:receiver:service:action:agreement:leg` used in logs and by
    /// outer layers to address the resolved configuration.
    pub fn pmode_key(&self, leg_name: &str) -> String {
        [
            self.sender_party.as_str(),
            self.receiver_party.as_str(),
            self.service.as_str(),
            self.action.as_str(),
            self.agreement.as_deref().unwrap_or(""),
            leg_name,
        ]
        .join(PMODE_KEY_SEPARATOR)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context(pattern: ExchangePattern) -> MessageExchangeContext {
        MessageExchangeContext {
            sender_party: "blue_gw".into(),
            receiver_party: "red_gw".into(),
            sender_role: "defaultInitiatorRole".into(),
            receiver_role: "defaultResponderRole".into(),
            service: "testService".into(),
            action: "tc1Action".into(),
            agreement: None,
            mpc: "urn:mpc:default".into(),
            direction: MshRole::Sending,
            pattern,
        }
    }

    #[test]
    fn push_keeps_the_sender_as_initiator() {
        let ctx = context(ExchangePattern::Push);
        assert_eq!(ctx.initiator_party(), "blue_gw");
        assert_eq!(ctx.responder_party(), "red_gw");
        assert_eq!(ctx.initiator_role(), "defaultInitiatorRole");
    }

    #[test]
    fn pull_inverts_the_apparent_initiator() {
        let ctx = context(ExchangePattern::Pull);
        assert_eq!(ctx.initiator_party(), "red_gw");
        assert_eq!(ctx.responder_party(), "blue_gw");
        assert_eq!(ctx.initiator_role(), "defaultResponderRole");
        assert_eq!(ctx.responder_role(), "defaultInitiatorRole");
    }

    #[test]
    fn pmode_key_has_six_segments() {
        let key = context(ExchangePattern::Push).pmode_key("pushLeg");
        assert_eq!(key, "blue_gw:red_gw:testService:tc1Action::pushLeg");
        assert_eq!(key.split(PMODE_KEY_SEPARATOR).count(), 6);
    }
}
