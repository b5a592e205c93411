//! Shared deterministic types for the orchestration core.
//!
//! These types define stable contracts between core components and the
//! serialized run store. They do not depend on external state or I/O.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Lifecycle state of one phase invocation.
///
/// `Pending -> Running -> {Completed | Failed}` or `Pending -> Skipped`.
/// Every state except `Pending` and `Running` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PhaseStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

impl PhaseStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            PhaseStatus::Completed | PhaseStatus::Failed | PhaseStatus::Skipped
        )
    }

    pub fn can_transition_to(self, next: PhaseStatus) -> bool {
        matches!(
            (self, next),
            (PhaseStatus::Pending, PhaseStatus::Running)
                | (PhaseStatus::Pending, PhaseStatus::Skipped)
                | (PhaseStatus::Running, PhaseStatus::Completed)
                | (PhaseStatus::Running, PhaseStatus::Failed)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PhaseStatus::Pending => "pending",
            PhaseStatus::Running => "running",
            PhaseStatus::Completed => "completed",
            PhaseStatus::Failed => "failed",
            PhaseStatus::Skipped => "skipped",
        }
    }
}

/// Reference to a file or resource produced by a phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRef {
    pub path: String,
    pub format: String,
    pub label: String,
}

impl ArtifactRef {
    pub fn new(path: &str, format: &str, label: &str) -> Self {
        Self {
            path: path.to_string(),
            format: format.to_string(),
            label: label.to_string(),
        }
    }
}

/// One execution attempt of a phase within a run.
#[derive(Debug, Clone, PartialEq)]
pub struct PhaseInvocation {
    pub phase: String,
    pub index: usize,
    pub status: PhaseStatus,
    pub resolved_input: Option<Value>,
    pub output: Option<Value>,
    pub artifacts: Vec<ArtifactRef>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl PhaseInvocation {
    pub fn new(phase: &str, index: usize) -> Self {
        Self {
            phase: phase.to_string(),
            index,
            status: PhaseStatus::Pending,
            resolved_input: None,
            output: None,
            artifacts: Vec::new(),
            started_at: None,
            ended_at: None,
        }
    }

    pub fn skip(&mut self, at: DateTime<Utc>) -> Result<(), String> {
        self.transition(PhaseStatus::Skipped)?;
        self.started_at = Some(at);
        self.ended_at = Some(at);
        Ok(())
    }

    pub fn start(&mut self, input: Value, at: DateTime<Utc>) -> Result<(), String> {
        self.transition(PhaseStatus::Running)?;
        self.resolved_input = Some(input);
        self.started_at = Some(at);
        Ok(())
    }

    pub fn complete(
        &mut self,
        output: Value,
        artifacts: Vec<ArtifactRef>,
        at: DateTime<Utc>,
    ) -> Result<(), String> {
        self.transition(PhaseStatus::Completed)?;
        self.output = Some(output);
        self.artifacts = artifacts;
        self.ended_at = Some(at);
        Ok(())
    }

    pub fn fail(&mut self, at: DateTime<Utc>) -> Result<(), String> {
        self.transition(PhaseStatus::Failed)?;
        self.ended_at = Some(at);
        Ok(())
    }

    /// Milliseconds between start and end, once both are known.
    pub fn elapsed_ms(&self) -> Option<u64> {
        let (start, end) = (self.started_at?, self.ended_at?);
        Some((end - start).num_milliseconds().max(0) as u64)
    }

    fn transition(&mut self, next: PhaseStatus) -> Result<(), String> {
        if !self.status.can_transition_to(next) {
            return Err(format!(
                "phase '{}': illegal transition {} -> {}",
                self.phase,
                self.status.as_str(),
                next.as_str()
            ));
        }
        self.status = next;
        Ok(())
    }
}

/// Decision that resumes a suspended review gate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "lowercase")]
pub enum ReviewDecision {
    Proceed,
    Reject { reason: Option<String> },
}

impl ReviewDecision {
    pub fn reject(reason: &str) -> Self {
        ReviewDecision::Reject {
            reason: Some(reason.to_string()),
        }
    }
}

/// Structured pause event emitted by a review gate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewCheckpoint {
    pub gate: String,
    pub question: String,
    pub title: String,
    pub context: CheckpointContext,
}

/// Facts and files shown to the reviewer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckpointContext {
    pub run_id: String,
    pub summary: Value,
    pub files: Vec<ArtifactRef>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).single().expect("ts")
    }

    #[test]
    fn completed_invocation_records_output_and_elapsed() {
        let mut inv = PhaseInvocation::new("analysis", 0);
        inv.start(serde_json::json!({"k": 1}), at(0)).expect("start");
        inv.complete(serde_json::json!({"ok": true}), Vec::new(), at(3))
            .expect("complete");
        assert_eq!(inv.status, PhaseStatus::Completed);
        assert_eq!(inv.elapsed_ms(), Some(3000));
    }

    #[test]
    fn skipped_phase_cannot_start() {
        let mut inv = PhaseInvocation::new("dma", 2);
        inv.skip(at(0)).expect("skip");
        let err = inv.start(Value::Null, at(1)).unwrap_err();
        assert_eq!(err, "phase 'dma': illegal transition skipped -> running");
    }

    #[test]
    fn failed_phase_never_reenters_running() {
        let mut inv = PhaseInvocation::new("wcet", 1);
        inv.start(Value::Null, at(0)).expect("start");
        inv.fail(at(1)).expect("fail");
        assert!(inv.status.is_terminal());
        assert!(inv.start(Value::Null, at(2)).is_err());
    }

    #[test]
    fn pending_cannot_complete_directly() {
        let mut inv = PhaseInvocation::new("p", 0);
        assert!(inv.complete(Value::Null, Vec::new(), at(0)).is_err());
        assert_eq!(inv.status, PhaseStatus::Pending);
    }

    #[test]
    fn checkpoint_context_uses_wire_field_names() {
        let cp = ReviewCheckpoint {
            gate: "final".to_string(),
            question: "Proceed?".to_string(),
            title: "Review".to_string(),
            context: CheckpointContext {
                run_id: "run-1".to_string(),
                summary: serde_json::json!({"total_ram_kb": 12}),
                files: vec![ArtifactRef::new("out/map.md", "markdown", "Memory map")],
            },
        };
        let value = serde_json::to_value(&cp).expect("serialize");
        assert_eq!(value["context"]["runId"], "run-1");
        assert_eq!(value["context"]["files"][0]["label"], "Memory map");
    }

    #[test]
    fn review_decision_round_trips_tagged() {
        let decision = ReviewDecision::reject("no");
        let json = serde_json::to_string(&decision).expect("serialize");
        assert_eq!(json, r#"{"decision":"reject","reason":"no"}"#);
        let back: ReviewDecision = serde_json::from_str(r#"{"decision":"proceed"}"#).expect("parse");
        assert_eq!(back, ReviewDecision::Proceed);
    }
}
