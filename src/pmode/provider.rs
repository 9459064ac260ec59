//! Per-domain configuration provider.
//!
//! Wraps one immutable [`ConfigurationSnapshot`] together with a
//! [`LegResolver`] and the name lookups that map raw message metadata
//! (party identifiers, role/service/action/agreement values) onto the
//! configured names a [`MessageExchangeContext`] carries.

use std::sync::Arc;

use tracing::instrument;

use super::context::MessageExchangeContext;
use super::model::{ConfigurationSnapshot, ExchangePattern, LegConfiguration, Process, ValueType};
use super::resolver::{LegResolutionError, LegResolver};

/// Failure to map a raw metadata value onto the loaded configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LookupError {
    #[error("no party configured with identifier [{0}]")]
    UnknownParty(ValueType),
    #[error("no service configured for [{0}]")]
    UnknownService(ValueType),
    #[error("no action configured for value [{0}]")]
    UnknownAction(String),
    #[error("no agreement configured for [{0}]")]
    UnknownAgreement(ValueType),
    #[error("no role configured for value [{0}]")]
    UnknownRole(String),
    #[error("no pull process bound to mpc [{0}]")]
    NoPullProcessForMpc(String),
    #[error("party [{party}] is not an allowed initiator of pull process [{process}]")]
    InitiatorNotAllowed { party: String, process: String },
}

/// Read-only resolution surface for one domain.
#[derive(Debug, Clone)]
pub struct PModeProvider {
    domain: String,
    config: Arc<ConfigurationSnapshot>,
    resolver: LegResolver,
}

impl PModeProvider {
    pub fn new(domain: impl Into<String>, config: Arc<ConfigurationSnapshot>) -> Self {
        let resolver = LegResolver::new(config.clone());
        Self {
            domain: domain.into(),
            config,
            resolver,
        }
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn snapshot(&self) -> Arc<ConfigurationSnapshot> {
        self.config.clone()
    }

    /// Resolves the single leg governing `context`.
    #[instrument(
        skip(self, context),
        fields(
            domain = %self.domain,
            service = %context.service,
            action = %context.action,
            pattern = %context.pattern,
        )
    )]
    pub fn resolve_leg(
        &self,
        context: &MessageExchangeContext,
    ) -> Result<LegConfiguration, LegResolutionError> {
        self.resolver.resolve(context)
    }

    /// Maps a raw party identifier onto the configured party name.
    /// Identifier values compare case-insensitively.
    pub fn find_party_name(&self, identifier: &ValueType) -> Result<String, LookupError> {
        self.config
            .parties
            .iter()
            .find(|party| party.owns_identifier(identifier))
            .map(|party| party.name.clone())
            .ok_or_else(|| LookupError::UnknownParty(identifier.clone()))
    }

    pub fn find_service_name(&self, service: &ValueType) -> Result<String, LookupError> {
        self.config
            .services
            .iter()
            .find(|configured| configured.id.matches(service))
            .map(|configured| configured.name.clone())
            .ok_or_else(|| LookupError::UnknownService(service.clone()))
    }

    pub fn find_action_name(&self, value: &str) -> Result<String, LookupError> {
        self.config
            .actions
            .iter()
            .find(|action| action.value == value)
            .map(|action| action.name.clone())
            .ok_or_else(|| LookupError::UnknownAction(value.to_string()))
    }

    pub fn find_agreement_name(&self, agreement: &ValueType) -> Result<String, LookupError> {
        self.config
            .agreements
            .iter()
            .find(|configured| configured.id.matches(agreement))
            .map(|configured| configured.name.clone())
            .ok_or_else(|| LookupError::UnknownAgreement(agreement.clone()))
    }

    pub fn find_role_name(&self, value: &str) -> Result<String, LookupError> {
        self.config
            .roles
            .iter()
            .find(|role| role.value == value)
            .map(|role| role.name.clone())
            .ok_or_else(|| LookupError::UnknownRole(value.to_string()))
    }

    /// Largest retry timeout over all legs, in minutes. Drives the width of
    /// the retry discovery window.
    pub fn max_retry_timeout(&self) -> i64 {
        self.config
            .legs
            .iter()
            .map(|leg| leg.retry.timeout_minutes)
            .max()
            .unwrap_or(0)
    }

    /// Finds the pull process serving `mpc` that admits `initiator`. Used to
    /// vet an incoming pull request before any lock is claimed.
    pub fn pull_process_for(
        &self,
        mpc: &str,
        initiator: &str,
    ) -> Result<&Process, LookupError> {
        let mut serving_mpc = self.config.processes.iter().filter(|process| {
            process.binding == ExchangePattern::Pull
                && process.legs.iter().any(|leg_name| {
                    self.config
                        .leg(leg_name)
                        .map(|leg| self.qualified_mpc(leg) == mpc)
                        .unwrap_or(false)
                })
        });

        let Some(first) = serving_mpc.next() else {
            return Err(LookupError::NoPullProcessForMpc(mpc.to_string()));
        };
        if first.admits_initiator(initiator) {
            return Ok(first);
        }
        serving_mpc
            .find(|process| process.admits_initiator(initiator))
            .ok_or_else(|| LookupError::InitiatorNotAllowed {
                party: initiator.to_string(),
                process: first.name.clone(),
            })
    }

    fn qualified_mpc<'a>(&'a self, leg: &'a LegConfiguration) -> &'a str {
        self.config
            .mpc(&leg.default_mpc)
            .map(|mpc| mpc.qualified_name.as_str())
            .unwrap_or(leg.default_mpc.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pmode::model::{Action, Agreement, Mpc, Party, Role, Service, DEFAULT_MPC};

    fn provider() -> PModeProvider {
        let config = ConfigurationSnapshot {
            parties: vec![Party {
                name: "blue_gw".into(),
                identifiers: vec![ValueType::new("Gateway-Blue", "partyTypeUrn")],
            }],
            roles: vec![Role {
                name: "initiatorRole".into(),
                value: "urn:initiator".into(),
            }],
            services: vec![Service {
                name: "serviceS".into(),
                id: ValueType::new("bdx:noprocess", "tc1"),
            }],
            actions: vec![Action {
                name: "actionA".into(),
                value: "TC1Leg1".into(),
            }],
            agreements: vec![Agreement {
                name: "AG1".into(),
                id: ValueType::untyped("urn:agreement:1"),
            }],
            mpcs: vec![Mpc {
                name: "defaultMpc".into(),
                qualified_name: DEFAULT_MPC.into(),
                enabled: true,
            }],
            legs: vec![
                LegConfiguration {
                    name: "shortLeg".into(),
                    service: "serviceS".into(),
                    action: "actionA".into(),
                    default_mpc: "defaultMpc".into(),
                    security: None,
                    retry: crate::pmode::model::RetryPolicy {
                        timeout_minutes: 12,
                        count: 4,
                    },
                    compress_payloads: false,
                },
                LegConfiguration {
                    name: "longLeg".into(),
                    service: "serviceS".into(),
                    action: "actionA".into(),
                    default_mpc: "defaultMpc".into(),
                    security: None,
                    retry: crate::pmode::model::RetryPolicy {
                        timeout_minutes: 240,
                        count: 2,
                    },
                    compress_payloads: false,
                },
            ],
            processes: vec![Process {
                name: "pullProcess".into(),
                agreement: None,
                binding: ExchangePattern::Pull,
                initiator_role: "initiatorRole".into(),
                responder_role: "initiatorRole".into(),
                initiator_parties: vec!["blue_gw".into()],
                responder_parties: vec![],
                legs: vec!["shortLeg".into()],
            }],
        };
        PModeProvider::new("default", Arc::new(config))
    }

    #[test]
    fn party_lookup_is_case_insensitive() {
        let provider = provider();
        let name = provider
            .find_party_name(&ValueType::new("gateway-blue", "PARTYTYPEURN"))
            .unwrap();
        assert_eq!(name, "blue_gw");
    }

    #[test]
    fn unknown_values_produce_typed_errors() {
        let provider = provider();
        assert!(matches!(
            provider.find_party_name(&ValueType::untyped("nobody")),
            Err(LookupError::UnknownParty(_))
        ));
        assert!(matches!(
            provider.find_action_name("missing"),
            Err(LookupError::UnknownAction(_))
        ));
        assert!(matches!(
            provider.find_role_name("urn:nothing"),
            Err(LookupError::UnknownRole(_))
        ));
    }

    #[test]
    fn max_retry_timeout_takes_the_largest_leg() {
        assert_eq!(provider().max_retry_timeout(), 240);
    }

    #[test]
    fn pull_process_lookup_checks_mpc_and_initiator() {
        let provider = provider();

        let process = provider.pull_process_for(DEFAULT_MPC, "blue_gw").unwrap();
        assert_eq!(process.name, "pullProcess");

        assert!(matches!(
            provider.pull_process_for("urn:mpc:none", "blue_gw"),
            Err(LookupError::NoPullProcessForMpc(_))
        ));
        assert!(matches!(
            provider.pull_process_for(DEFAULT_MPC, "red_gw"),
            Err(LookupError::InitiatorNotAllowed { .. })
        ));
    }
}
