//! Ordered artifact references accumulated over a run.

use crate::core::types::ArtifactRef;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerEntry {
    pub phase: String,
    pub artifact: ArtifactRef,
}

/// Append-only list of artifacts in phase-completion order.
///
/// Entries are never reordered or deduplicated; the full ledger is the
/// concatenation of each completed phase's artifact list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArtifactLedger {
    entries: Vec<LedgerEntry>,
}

impl ArtifactLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append the artifacts of a phase that just completed.
    pub fn append(&mut self, phase: &str, artifacts: &[ArtifactRef]) {
        self.entries
            .extend(artifacts.iter().cloned().map(|artifact| LedgerEntry {
                phase: phase.to_string(),
                artifact,
            }));
    }

    pub fn entries(&self) -> &[LedgerEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn artifacts(&self) -> Vec<ArtifactRef> {
        self.entries.iter().map(|e| e.artifact.clone()).collect()
    }

    /// Artifacts contributed by any of `phases`, still in ledger order.
    pub fn for_phases(&self, phases: &[String]) -> Vec<ArtifactRef> {
        self.entries
            .iter()
            .filter(|e| phases.contains(&e.phase))
            .map(|e| e.artifact.clone())
            .collect()
    }
}
