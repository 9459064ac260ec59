//! Leg resolution.
//!
//! Two-phase filter over an immutable snapshot: processes are screened on
//! party/role/agreement/binding constraints, then the surviving processes'
//! legs on service/action (and MPC for pull). Every exclusion is recorded,
//! so a failed resolution reports *why* each process and leg was ruled out
//! instead of a bare "no match". Exactly one leg may survive; several
//! surviving legs mean the configuration itself is ambiguous and that is an
//! error, never a silent first-wins pick.

use std::sync::Arc;

use tracing::debug;

use super::context::{MessageExchangeContext, MshRole};
use super::model::{ConfigurationSnapshot, ExchangePattern, LegConfiguration, Process};

/// Why one process was excluded during resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessMismatch {
    pub process: String,
    pub reasons: Vec<String>,
}

/// Why one leg was excluded during resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegMismatch {
    pub leg: String,
    pub reasons: Vec<String>,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum LegResolutionError {
    /// No leg matched. Carries the per-process and per-leg exclusion lists;
    /// the rendered message is the two-part diagnostic operators need to fix
    /// a misconfigured exchange agreement.
    #[error("{}", render_no_match(.direction, .process_mismatches, .leg_mismatches))]
    NoMatchingLeg {
        direction: MshRole,
        process_mismatches: Vec<ProcessMismatch>,
        leg_mismatches: Vec<LegMismatch>,
    },
    /// More than one distinct leg matched, which means the loaded
    /// configuration cannot route this metadata deterministically.
    #[error("ambiguous exchange configuration: legs [{}] all match the supplied message metadata", .candidates.join(", "))]
    AmbiguousConfiguration { candidates: Vec<String> },
}

fn render_no_match(
    direction: &MshRole,
    process_mismatches: &[ProcessMismatch],
    leg_mismatches: &[LegMismatch],
) -> String {
    let mut out = format!("no matching leg found while {direction}");
    if process_mismatches.is_empty() {
        out.push_str("; every process matched the party, role and agreement constraints");
    } else {
        out.push_str("; process mismatch details:");
        for mismatch in process_mismatches {
            out.push_str(&format!(
                "\n  process [{}]: {}",
                mismatch.process,
                mismatch.reasons.join("; ")
            ));
        }
    }
    if leg_mismatches.is_empty() {
        out.push_str("\nno legs were reachable through the configured processes");
    } else {
        out.push_str("\nleg mismatch details:");
        for mismatch in leg_mismatches {
            out.push_str(&format!(
                "\n  leg [{}]: {}",
                mismatch.leg,
                mismatch.reasons.join("; ")
            ));
        }
    }
    out
}

/// Pure, lock-free resolution over one loaded snapshot. Cheap to clone and
/// safe to call from any number of threads concurrently.
#[derive(Debug, Clone)]
pub struct LegResolver {
    config: Arc<ConfigurationSnapshot>,
}

impl LegResolver {
    pub fn new(config: Arc<ConfigurationSnapshot>) -> Self {
        Self { config }
    }

    /// Finds the single leg governing `context`.
    pub fn resolve(
        &self,
        context: &MessageExchangeContext,
    ) -> Result<LegConfiguration, LegResolutionError> {
        let mut process_mismatches = Vec::new();
        let mut surviving = Vec::new();
        for process in &self.config.processes {
            let reasons = process_mismatch_reasons(process, context);
            if reasons.is_empty() {
                surviving.push(process);
            } else {
                process_mismatches.push(ProcessMismatch {
                    process: process.name.clone(),
                    reasons,
                });
            }
        }

        // With no surviving process there can be no candidate, but the legs
        // are still evaluated across all processes so the error reports both
        // levels of the mismatch.
        let survivors_exist = !surviving.is_empty();
        let pool: Vec<&Process> = if survivors_exist {
            surviving
        } else {
            self.config.processes.iter().collect()
        };

        let mut leg_mismatches: Vec<LegMismatch> = Vec::new();
        let mut candidates: Vec<&LegConfiguration> = Vec::new();
        for process in &pool {
            for leg_name in &process.legs {
                // Dangling references are rejected at snapshot load time.
                let Some(leg) = self.config.leg(leg_name) else {
                    continue;
                };
                let mut reasons = self.leg_mismatch_reasons(leg, context);
                if reasons.is_empty() {
                    if survivors_exist {
                        if !candidates.iter().any(|c| c.name == leg.name) {
                            candidates.push(leg);
                        }
                        continue;
                    }
                    reasons.push(format!(
                        "matches the metadata, but process [{}] was excluded",
                        process.name
                    ));
                }
                if !leg_mismatches.iter().any(|m| m.leg == *leg_name) {
                    leg_mismatches.push(LegMismatch {
                        leg: leg_name.clone(),
                        reasons,
                    });
                }
            }
        }

        match candidates.as_slice() {
            [leg] => {
                debug!(
                    leg = %leg.name,
                    pmode_key = %context.pmode_key(&leg.name),
                    "resolved leg"
                );
                Ok((*leg).clone())
            }
            [] => Err(LegResolutionError::NoMatchingLeg {
                direction: context.direction,
                process_mismatches,
                leg_mismatches,
            }),
            several => Err(LegResolutionError::AmbiguousConfiguration {
                candidates: several.iter().map(|leg| leg.name.clone()).collect(),
            }),
        }
    }

    fn leg_mismatch_reasons(
        &self,
        leg: &LegConfiguration,
        context: &MessageExchangeContext,
    ) -> Vec<String> {
        let mut reasons = Vec::new();
        if leg.service != context.service {
            reasons.push(format!(
                "service [{}] does not match [{}]",
                leg.service, context.service
            ));
        }
        if leg.action != context.action {
            reasons.push(format!(
                "action [{}] does not match [{}]",
                leg.action, context.action
            ));
        }
        if context.pattern == ExchangePattern::Pull {
            let leg_mpc = self
                .config
                .mpc(&leg.default_mpc)
                .map(|m| m.qualified_name.as_str())
                .unwrap_or(leg.default_mpc.as_str());
            if leg_mpc != context.mpc {
                reasons.push(format!(
                    "mpc [{}] does not match [{}]",
                    leg_mpc, context.mpc
                ));
            }
        }
        reasons
    }
}

fn process_mismatch_reasons(process: &Process, context: &MessageExchangeContext) -> Vec<String> {
    let mut reasons = Vec::new();
    match (&process.agreement, &context.agreement) {
        (Some(required), Some(actual)) if required != actual => {
            reasons.push(format!(
                "agreement [{required}] does not match [{actual}]"
            ));
        }
        (Some(required), None) => {
            reasons.push(format!(
                "agreement [{required}] is required but the message carries none"
            ));
        }
        _ => {}
    }
    if !process.admits_initiator(context.initiator_party()) {
        reasons.push(format!(
            "initiator party [{}] is not an allowed initiator",
            context.initiator_party()
        ));
    }
    if !process.admits_responder(context.responder_party()) {
        reasons.push(format!(
            "responder party [{}] is not an allowed responder",
            context.responder_party()
        ));
    }
    if process.initiator_role != context.initiator_role() {
        reasons.push(format!(
            "initiator role [{}] does not match [{}]",
            process.initiator_role,
            context.initiator_role()
        ));
    }
    if process.responder_role != context.responder_role() {
        reasons.push(format!(
            "responder role [{}] does not match [{}]",
            process.responder_role,
            context.responder_role()
        ));
    }
    if process.binding != context.pattern {
        reasons.push(format!(
            "binding [{}] does not match the [{}] exchange pattern",
            process.binding, context.pattern
        ));
    }
    reasons
}
