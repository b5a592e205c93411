//! Dry-run view of which phases a config enables.
//!
//! Predicates are evaluated against the config alone. A predicate that reads
//! a key the config does not hold can only be decided once earlier phases have
//! produced output, so the phase is reported as deferred.

use serde::Serialize;

use crate::core::context::PipelineConfig;
use crate::core::contract::PipelineDefinition;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "decision", rename_all = "lowercase")]
pub enum PhaseDecision {
    Enabled,
    Skipped,
    /// Decided at run time; `keys` are the predicate keys the config lacks.
    Deferred { keys: Vec<String> },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlanEntry {
    pub phase: String,
    #[serde(flatten)]
    pub decision: PhaseDecision,
    /// Gates that fire after this phase.
    pub gates: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Plan {
    pub entries: Vec<PlanEntry>,
    pub warnings: Vec<String>,
}

impl Plan {
    pub fn decision(&self, phase: &str) -> Option<&PhaseDecision> {
        self.entries
            .iter()
            .find(|e| e.phase == phase)
            .map(|e| &e.decision)
    }
}

/// Work out the enable decision for every phase under `config`.
pub fn plan(def: &PipelineDefinition, config: &PipelineConfig) -> Plan {
    let mut entries: Vec<PlanEntry> = Vec::with_capacity(def.phases.len());
    let mut warnings = Vec::new();

    for (index, phase) in def.phases.iter().enumerate() {
        let decision = match &phase.enabled_when {
            None => PhaseDecision::Enabled,
            Some(predicate) => {
                let unknown: Vec<String> = predicate
                    .keys()
                    .into_iter()
                    .filter(|key| !config.contains(key))
                    .map(str::to_string)
                    .collect();
                if !unknown.is_empty() {
                    PhaseDecision::Deferred { keys: unknown }
                } else if predicate.evaluate_with(&|key| config.get(key)) {
                    PhaseDecision::Enabled
                } else {
                    PhaseDecision::Skipped
                }
            }
        };

        if decision != PhaseDecision::Skipped {
            for key in &phase.requires {
                if config.contains(key) {
                    continue;
                }
                let source = key.split_once('.').map_or(key.as_str(), |(head, _)| head);
                let source_skipped = entries
                    .iter()
                    .any(|e| e.phase == source && e.decision == PhaseDecision::Skipped);
                if source_skipped {
                    warnings.push(format!(
                        "phase '{}' requires '{key}' from phase '{source}', which this config skips",
                        phase.name
                    ));
                }
            }
        }

        entries.push(PlanEntry {
            phase: phase.name.clone(),
            decision,
            gates: def.gates_after(index).map(|g| g.name.clone()).collect(),
        });
    }

    Plan { entries, warnings }
}
