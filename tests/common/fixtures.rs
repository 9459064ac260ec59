//! Shared exchange configuration and submission fixtures.

#![allow(dead_code)] // Not every test binary uses every fixture.

use chrono::{DateTime, TimeZone, Utc};

use as4_core::pmode::{
    Action, Agreement, ConfigurationSnapshot, ExchangePattern, LegConfiguration, Mpc, Party,
    Process, RetryPolicy, Role, Service, ValueType, DEFAULT_MPC,
};
use as4_core::Submission;

/// Domain every fixture snapshot is registered under.
pub const DOMAIN: &str = "default";

/// Qualified MPC of the pull leg.
pub const PULL_MPC: &str = "urn:mpc:reports";

/// Suffix appended to generated message ids.
pub const MESSAGE_ID_SUFFIX: &str = "test.gateway";

pub fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2021, 8, 9, 15, 0, 0).unwrap()
}

pub fn blue_identifier() -> ValueType {
    ValueType::new("Gateway-Blue", "partyTypeUrn")
}

pub fn red_identifier() -> ValueType {
    ValueType::new("Gateway-Red", "partyTypeUrn")
}

/// Two-party configuration with one push and one pull exchange.
///
/// `blue_gw` pushes `TC1Leg1` messages to `red_gw` on the default MPC, and
/// submits `TC2Leg1` messages that `red_gw` pulls from [`PULL_MPC`]. Both
/// legs allow 4 attempts inside a 12 minute window.
pub fn sample_snapshot() -> ConfigurationSnapshot {
    ConfigurationSnapshot {
        parties: vec![
            Party {
                name: "blue_gw".into(),
                identifiers: vec![blue_identifier()],
            },
            Party {
                name: "red_gw".into(),
                identifiers: vec![red_identifier()],
            },
        ],
        roles: vec![
            Role {
                name: "initiatorRole".into(),
                value: "urn:initiator".into(),
            },
            Role {
                name: "responderRole".into(),
                value: "urn:responder".into(),
            },
        ],
        services: vec![Service {
            name: "reportingService".into(),
            id: ValueType::new("bdx:noprocess", "tc1"),
        }],
        actions: vec![
            Action {
                name: "pushAction".into(),
                value: "TC1Leg1".into(),
            },
            Action {
                name: "pullAction".into(),
                value: "TC2Leg1".into(),
            },
        ],
        agreements: vec![Agreement {
            name: "AG1".into(),
            id: ValueType::untyped("urn:agreement:1"),
        }],
        mpcs: vec![
            Mpc {
                name: "defaultMpc".into(),
                qualified_name: DEFAULT_MPC.into(),
                enabled: true,
            },
            Mpc {
                name: "reportsMpc".into(),
                qualified_name: PULL_MPC.into(),
                enabled: true,
            },
        ],
        legs: vec![
            LegConfiguration {
                name: "pushLeg".into(),
                service: "reportingService".into(),
                action: "pushAction".into(),
                default_mpc: "defaultMpc".into(),
                security: None,
                retry: RetryPolicy {
                    timeout_minutes: 12,
                    count: 4,
                },
                compress_payloads: false,
            },
            LegConfiguration {
                name: "pullLeg".into(),
                service: "reportingService".into(),
                action: "pullAction".into(),
                default_mpc: "reportsMpc".into(),
                security: None,
                retry: RetryPolicy {
                    timeout_minutes: 12,
                    count: 4,
                },
                compress_payloads: false,
            },
        ],
        processes: vec![
            Process {
                name: "pushProcess".into(),
                agreement: None,
                binding: ExchangePattern::Push,
                initiator_role: "initiatorRole".into(),
                responder_role: "responderRole".into(),
                initiator_parties: vec!["blue_gw".into()],
                responder_parties: vec!["red_gw".into()],
                legs: vec!["pushLeg".into()],
            },
            Process {
                name: "pullProcess".into(),
                agreement: None,
                binding: ExchangePattern::Pull,
                initiator_role: "initiatorRole".into(),
                responder_role: "responderRole".into(),
                initiator_parties: vec!["red_gw".into()],
                responder_parties: vec!["blue_gw".into()],
                legs: vec!["pullLeg".into()],
            },
        ],
    }
}

/// A push submission from `blue_gw` to `red_gw`.
pub fn push_submission(message_id: &str) -> Submission {
    Submission {
        message_id: Some(message_id.to_string()),
        pattern: ExchangePattern::Push,
        from_party: blue_identifier(),
        from_role: "urn:initiator".into(),
        to_party: red_identifier(),
        to_role: "urn:responder".into(),
        service: ValueType::new("bdx:noprocess", "tc1"),
        action: "TC1Leg1".into(),
        agreement: None,
        mpc: None,
    }
}

/// A pull submission waiting for `red_gw` to fetch it. The fetching side is
/// the apparent initiator, so the sender carries the responder role.
pub fn pull_submission(message_id: &str) -> Submission {
    Submission {
        message_id: Some(message_id.to_string()),
        pattern: ExchangePattern::Pull,
        from_party: blue_identifier(),
        from_role: "urn:responder".into(),
        to_party: red_identifier(),
        to_role: "urn:initiator".into(),
        service: ValueType::new("bdx:noprocess", "tc1"),
        action: "TC2Leg1".into(),
        agreement: None,
        mpc: Some(PULL_MPC.into()),
    }
}
