//! Exchange configuration (PMode) model.
//!
//! A [`ConfigurationSnapshot`] is the immutable, atomically-replaced unit of
//! configuration for one domain: the negotiated Parties, Roles, Services,
//! Actions, Agreements, MPCs, Legs and Processes. Cross-references between
//! entries are by name and checked by [`ConfigurationSnapshot::validate`]
//! when a snapshot is loaded.

use serde::{Deserialize, Serialize};

/// Qualified name of the default MPC sub-channel (ebMS3 core).
pub const DEFAULT_MPC: &str =
    "http://docs.oasis-open.org/ebxml-msg/ebms/v3.0/ns/core/200704/defaultMPC";

/// Shared `(value, optional type)` pair used by party identifiers, services
/// and agreement references. Equality is structural; the matching helpers
/// implement the protocol's optional-type semantics, where an absent type
/// and a blank type are the same thing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ValueType {
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub r#type: Option<String>,
}

impl ValueType {
    pub fn new(value: impl Into<String>, r#type: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            r#type: Some(r#type.into()),
        }
    }

    pub fn untyped(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            r#type: None,
        }
    }

    /// The type qualifier with surrounding whitespace stripped; a blank
    /// qualifier counts as absent.
    pub fn normalized_type(&self) -> Option<&str> {
        self.r#type
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
    }

    /// Exact value match; types compare trimmed, and two absent/blank types
    /// match each other.
    pub fn matches(&self, other: &ValueType) -> bool {
        if self.value != other.value {
            return false;
        }
        match (self.normalized_type(), other.normalized_type()) {
            (None, None) => true,
            (Some(a), Some(b)) => a == b,
            _ => false,
        }
    }

    /// Case-insensitive variant used for party identifiers.
    pub fn matches_ignoring_case(&self, other: &ValueType) -> bool {
        if !self.value.eq_ignore_ascii_case(&other.value) {
            return false;
        }
        match (self.normalized_type(), other.normalized_type()) {
            (None, None) => true,
            (Some(a), Some(b)) => a.eq_ignore_ascii_case(b),
            _ => false,
        }
    }
}

impl std::fmt::Display for ValueType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.normalized_type() {
            Some(t) => write!(f, "{}:{}", self.value, t),
            None => write!(f, "{}", self.value),
        }
    }
}

/// A trading partner and the identifiers it is known by.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Party {
    pub name: String,
    #[serde(default)]
    pub identifiers: Vec<ValueType>,
}

impl Party {
    pub fn owns_identifier(&self, identifier: &ValueType) -> bool {
        self.identifiers
            .iter()
            .any(|own| own.matches_ignoring_case(identifier))
    }
}

/// A named role label bound to a party within an exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub name: String,
    pub value: String,
}

/// Business collaboration service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    pub name: String,
    #[serde(flatten)]
    pub id: ValueType,
}

/// Business collaboration action; actions carry a bare value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Action {
    pub name: String,
    pub value: String,
}

/// Agreement reference under which an exchange takes place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Agreement {
    pub name: String,
    #[serde(flatten)]
    pub id: ValueType,
}

/// Named message partition channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mpc {
    pub name: String,
    pub qualified_name: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

/// Message exchange pattern of a process.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExchangePattern {
    #[default]
    Push,
    Pull,
}

impl std::fmt::Display for ExchangePattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExchangePattern::Push => write!(f, "push"),
            ExchangePattern::Pull => write!(f, "pull"),
        }
    }
}

impl std::str::FromStr for ExchangePattern {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "push" => Ok(ExchangePattern::Push),
            "pull" => Ok(ExchangePattern::Pull),
            other => Err(format!("unknown exchange pattern: {other}")),
        }
    }
}

/// Reception-awareness retry policy of a leg.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total time budget after message creation, in minutes.
    pub timeout_minutes: i64,
    /// Maximum number of delivery attempts.
    pub count: i32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            timeout_minutes: 12,
            count: 4,
        }
    }
}

/// The resolved configuration unit governing one exchange: service, action,
/// channel, security and reliability policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegConfiguration {
    pub name: String,
    /// Service name reference.
    pub service: String,
    /// Action name reference.
    pub action: String,
    #[serde(default = "default_mpc_name")]
    pub default_mpc: String,
    #[serde(default)]
    pub security: Option<String>,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default)]
    pub compress_payloads: bool,
}

fn default_mpc_name() -> String {
    "defaultMpc".to_string()
}

/// Links initiator/responder roles and party restrictions to a set of legs.
/// An empty party list on a side means any party may take that side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Process {
    pub name: String,
    #[serde(default)]
    pub agreement: Option<String>,
    #[serde(default)]
    pub binding: ExchangePattern,
    pub initiator_role: String,
    pub responder_role: String,
    #[serde(default)]
    pub initiator_parties: Vec<String>,
    #[serde(default)]
    pub responder_parties: Vec<String>,
    #[serde(default)]
    pub legs: Vec<String>,
}

impl Process {
    pub fn admits_initiator(&self, party_name: &str) -> bool {
        self.initiator_parties.is_empty() || self.initiator_parties.iter().any(|p| p == party_name)
    }

    pub fn admits_responder(&self, party_name: &str) -> bool {
        self.responder_parties.is_empty() || self.responder_parties.iter().any(|p| p == party_name)
    }
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("invalid exchange configuration: {}", .issues.join("; "))]
pub struct SnapshotValidationError {
    pub issues: Vec<String>,
}

/// One domain's complete exchange configuration, loaded and replaced as a
/// unit. All lookups after a successful [`validate`](Self::validate) are
/// guaranteed to resolve.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigurationSnapshot {
    #[serde(default)]
    pub parties: Vec<Party>,
    #[serde(default)]
    pub roles: Vec<Role>,
    #[serde(default)]
    pub services: Vec<Service>,
    #[serde(default)]
    pub actions: Vec<Action>,
    #[serde(default)]
    pub agreements: Vec<Agreement>,
    #[serde(default)]
    pub mpcs: Vec<Mpc>,
    #[serde(default)]
    pub legs: Vec<LegConfiguration>,
    #[serde(default)]
    pub processes: Vec<Process>,
}

impl ConfigurationSnapshot {
    pub fn party(&self, name: &str) -> Option<&Party> {
        self.parties.iter().find(|p| p.name == name)
    }

    pub fn role(&self, name: &str) -> Option<&Role> {
        self.roles.iter().find(|r| r.name == name)
    }

    pub fn service(&self, name: &str) -> Option<&Service> {
        self.services.iter().find(|s| s.name == name)
    }

    pub fn action(&self, name: &str) -> Option<&Action> {
        self.actions.iter().find(|a| a.name == name)
    }

    pub fn agreement(&self, name: &str) -> Option<&Agreement> {
        self.agreements.iter().find(|a| a.name == name)
    }

    pub fn mpc(&self, name: &str) -> Option<&Mpc> {
        self.mpcs.iter().find(|m| m.name == name)
    }

    pub fn mpc_by_qualified_name(&self, qualified_name: &str) -> Option<&Mpc> {
        self.mpcs.iter().find(|m| m.qualified_name == qualified_name)
    }

    pub fn leg(&self, name: &str) -> Option<&LegConfiguration> {
        self.legs.iter().find(|l| l.name == name)
    }

    pub fn process(&self, name: &str) -> Option<&Process> {
        self.processes.iter().find(|p| p.name == name)
    }

    /// Checks internal consistency: unique names, resolvable references,
    /// non-blank dictionary values. Collects every issue instead of stopping
    /// at the first, so one reload round-trip surfaces all problems.
    pub fn validate(&self) -> Result<(), SnapshotValidationError> {
        let mut issues = Vec::new();

        check_unique("party", self.parties.iter().map(|p| p.name.as_str()), &mut issues);
        check_unique("role", self.roles.iter().map(|r| r.name.as_str()), &mut issues);
        check_unique("service", self.services.iter().map(|s| s.name.as_str()), &mut issues);
        check_unique("action", self.actions.iter().map(|a| a.name.as_str()), &mut issues);
        check_unique("agreement", self.agreements.iter().map(|a| a.name.as_str()), &mut issues);
        check_unique("mpc", self.mpcs.iter().map(|m| m.name.as_str()), &mut issues);
        check_unique("leg", self.legs.iter().map(|l| l.name.as_str()), &mut issues);
        check_unique("process", self.processes.iter().map(|p| p.name.as_str()), &mut issues);

        for party in &self.parties {
            if party.identifiers.is_empty() {
                issues.push(format!("party [{}] has no identifiers", party.name));
            }
        }
        for role in &self.roles {
            if role.value.trim().is_empty() {
                issues.push(format!("role [{}] has a blank value", role.name));
            }
        }
        for service in &self.services {
            if service.id.value.trim().is_empty() {
                issues.push(format!("service [{}] has a blank value", service.name));
            }
        }
        for action in &self.actions {
            if action.value.trim().is_empty() {
                issues.push(format!("action [{}] has a blank value", action.name));
            }
        }

        for leg in &self.legs {
            if self.service(&leg.service).is_none() {
                issues.push(format!(
                    "leg [{}] references unknown service [{}]",
                    leg.name, leg.service
                ));
            }
            if self.action(&leg.action).is_none() {
                issues.push(format!(
                    "leg [{}] references unknown action [{}]",
                    leg.name, leg.action
                ));
            }
            if self.mpc(&leg.default_mpc).is_none() {
                issues.push(format!(
                    "leg [{}] references unknown mpc [{}]",
                    leg.name, leg.default_mpc
                ));
            }
            if leg.retry.timeout_minutes <= 0 {
                issues.push(format!(
                    "leg [{}] has a non-positive retry timeout",
                    leg.name
                ));
            }
        }

        for process in &self.processes {
            if self.role(&process.initiator_role).is_none() {
                issues.push(format!(
                    "process [{}] references unknown initiator role [{}]",
                    process.name, process.initiator_role
                ));
            }
            if self.role(&process.responder_role).is_none() {
                issues.push(format!(
                    "process [{}] references unknown responder role [{}]",
                    process.name, process.responder_role
                ));
            }
            if let Some(agreement) = &process.agreement {
                if self.agreement(agreement).is_none() {
                    issues.push(format!(
                        "process [{}] references unknown agreement [{}]",
                        process.name, agreement
                    ));
                }
            }
            for party in process
                .initiator_parties
                .iter()
                .chain(process.responder_parties.iter())
            {
                if self.party(party).is_none() {
                    issues.push(format!(
                        "process [{}] references unknown party [{}]",
                        process.name, party
                    ));
                }
            }
            for leg in &process.legs {
                if self.leg(leg).is_none() {
                    issues.push(format!(
                        "process [{}] references unknown leg [{}]",
                        process.name, leg
                    ));
                }
            }
        }

        if issues.is_empty() {
            Ok(())
        } else {
            Err(SnapshotValidationError { issues })
        }
    }
}

fn check_unique<'a>(
    kind: &str,
    names: impl Iterator<Item = &'a str>,
    issues: &mut Vec<String>,
) {
    let mut seen = std::collections::HashSet::new();
    for name in names {
        if !seen.insert(name) {
            issues.push(format!("duplicate {kind} name [{name}]"));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_snapshot() -> ConfigurationSnapshot {
        ConfigurationSnapshot {
            parties: vec![Party {
                name: "blue_gw".into(),
                identifiers: vec![ValueType::new("gateway-blue", "partyTypeUrn")],
            }],
            roles: vec![
                Role {
                    name: "defaultInitiatorRole".into(),
                    value: "http://docs.oasis-open.org/ebxml-msg/ebms/v3.0/ns/core/200704/initiator".into(),
                },
                Role {
                    name: "defaultResponderRole".into(),
                    value: "http://docs.oasis-open.org/ebxml-msg/ebms/v3.0/ns/core/200704/responder".into(),
                },
            ],
            services: vec![Service {
                name: "testService".into(),
                id: ValueType::new("bdx:noprocess", "tc1"),
            }],
            actions: vec![Action {
                name: "tc1Action".into(),
                value: "TC1Leg1".into(),
            }],
            agreements: vec![],
            mpcs: vec![Mpc {
                name: "defaultMpc".into(),
                qualified_name: DEFAULT_MPC.into(),
                enabled: true,
            }],
            legs: vec![LegConfiguration {
                name: "pushLeg".into(),
                service: "testService".into(),
                action: "tc1Action".into(),
                default_mpc: "defaultMpc".into(),
                security: Some("eDeliveryAS4Policy".into()),
                retry: RetryPolicy::default(),
                compress_payloads: false,
            }],
            processes: vec![Process {
                name: "tc1Process".into(),
                agreement: None,
                binding: ExchangePattern::Push,
                initiator_role: "defaultInitiatorRole".into(),
                responder_role: "defaultResponderRole".into(),
                initiator_parties: vec!["blue_gw".into()],
                responder_parties: vec![],
                legs: vec!["pushLeg".into()],
            }],
        }
    }

    #[test]
    fn value_type_matching_handles_optional_types() {
        let typed = ValueType::new("urn:party", "iso6523");
        let blank_typed = ValueType {
            value: "urn:party".into(),
            r#type: Some("  ".into()),
        };
        let untyped = ValueType::untyped("urn:party");

        assert!(typed.matches(&ValueType::new("urn:party", "iso6523")));
        assert!(!typed.matches(&untyped));
        assert!(blank_typed.matches(&untyped));
        assert!(untyped.matches(&blank_typed));
    }

    #[test]
    fn party_identifier_matching_is_case_insensitive() {
        let party = Party {
            name: "blue_gw".into(),
            identifiers: vec![ValueType::new("Gateway-Blue", "PartyTypeUrn")],
        };

        assert!(party.owns_identifier(&ValueType::new("gateway-blue", "partytypeurn")));
        assert!(!party.owns_identifier(&ValueType::untyped("gateway-blue")));
    }

    #[test]
    fn valid_snapshot_passes_validation() {
        minimal_snapshot().validate().unwrap();
    }

    #[test]
    fn validation_reports_dangling_references_and_duplicates() {
        let mut snapshot = minimal_snapshot();
        snapshot.legs[0].service = "missingService".into();
        snapshot.processes.push(snapshot.processes[0].clone());

        let error = snapshot.validate().unwrap_err();
        assert!(error
            .issues
            .iter()
            .any(|i| i.contains("unknown service [missingService]")));
        assert!(error
            .issues
            .iter()
            .any(|i| i.contains("duplicate process name [tc1Process]")));
    }

    #[test]
    fn snapshot_documents_deserialize_with_defaults() {
        let document = r#"{
            "parties": [
                {"name": "blue_gw", "identifiers": [{"value": "gateway-blue", "type": "partyTypeUrn"}]}
            ],
            "roles": [
                {"name": "defaultInitiatorRole", "value": "urn:initiator"},
                {"name": "defaultResponderRole", "value": "urn:responder"}
            ],
            "services": [{"name": "testService", "value": "bdx:noprocess", "type": "tc1"}],
            "actions": [{"name": "tc1Action", "value": "TC1Leg1"}],
            "mpcs": [{"name": "defaultMpc", "qualified_name": "urn:mpc:default"}],
            "legs": [{"name": "pushLeg", "service": "testService", "action": "tc1Action"}],
            "processes": [{
                "name": "tc1Process",
                "initiator_role": "defaultInitiatorRole",
                "responder_role": "defaultResponderRole",
                "legs": ["pushLeg"]
            }]
        }"#;

        let snapshot: ConfigurationSnapshot = serde_json::from_str(document).unwrap();
        assert_eq!(snapshot.legs[0].default_mpc, "defaultMpc");
        assert_eq!(snapshot.legs[0].retry, RetryPolicy::default());
        assert_eq!(snapshot.processes[0].binding, ExchangePattern::Push);
        assert!(snapshot.processes[0].admits_initiator("anyone"));
        snapshot.validate().unwrap();
    }
}
