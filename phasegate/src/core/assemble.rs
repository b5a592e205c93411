//! Final result assembly.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::core::context::RunContext;
use crate::core::contract::ResultSpec;
use crate::core::ledger::ArtifactLedger;
use crate::core::types::{ArtifactRef, PhaseInvocation, PhaseStatus};
use crate::error::{ErrorKind, PipelineError};

/// Terminal state of a whole run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Completed,
    Failed,
    Cancelled,
}

/// Why a run stopped early.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunFailure {
    pub kind: ErrorKind,
    pub phase: String,
    pub message: String,
}

impl From<&PipelineError> for RunFailure {
    fn from(err: &PipelineError) -> Self {
        Self {
            kind: err.kind(),
            phase: err.phase().to_string(),
            message: err.to_string(),
        }
    }
}

/// Per-phase line of the final report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseSummary {
    pub name: String,
    pub status: PhaseStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub elapsed_ms: Option<u64>,
    pub artifacts: Vec<ArtifactRef>,
}

impl From<&PhaseInvocation> for PhaseSummary {
    fn from(inv: &PhaseInvocation) -> Self {
        Self {
            name: inv.phase.clone(),
            status: inv.status,
            started_at: inv.started_at,
            ended_at: inv.ended_at,
            elapsed_ms: inv.elapsed_ms(),
            artifacts: inv.artifacts.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunMetadata {
    pub pipeline_id: String,
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub config: Value,
}

/// Report produced for every run, successful or not.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineResult {
    pub success: bool,
    pub status: RunStatus,
    pub error: Option<RunFailure>,
    /// Lifted fields; `null` where the source phase was skipped or never ran.
    pub selected_outputs: Value,
    pub artifacts: Vec<ArtifactRef>,
    /// Phases the run reached, in declared order.
    pub phases: Vec<PhaseSummary>,
    pub duration_ms: u64,
    pub metadata: RunMetadata,
}

impl PipelineResult {
    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error.as_ref().map(|e| e.kind)
    }

    /// Phase at which the run stopped, if it halted.
    pub fn stopped_at(&self) -> Option<&str> {
        self.error.as_ref().map(|e| e.phase.as_str())
    }

    pub fn phase(&self, name: &str) -> Option<&PhaseSummary> {
        self.phases.iter().find(|p| p.name == name)
    }

    pub fn phases_with_status(&self, status: PhaseStatus) -> Vec<&str> {
        self.phases
            .iter()
            .filter(|p| p.status == status)
            .map(|p| p.name.as_str())
            .collect()
    }
}

/// Everything the assembler reads. Borrowed from the finished run.
#[derive(Debug, Clone, Copy)]
pub struct AssembleRequest<'a> {
    pub pipeline_id: &'a str,
    pub run_id: &'a str,
    pub result_spec: &'a ResultSpec,
    pub context: &'a RunContext,
    pub ledger: &'a ArtifactLedger,
    pub invocations: &'a [PhaseInvocation],
    pub error: Option<&'a PipelineError>,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
}

/// Build the final [`PipelineResult`].
///
/// `success` holds only when the run did not halt, every non-skipped phase
/// completed, and (when `success_from` is set) that field is exactly `true`.
pub fn assemble(req: &AssembleRequest<'_>) -> PipelineResult {
    let status = match req.error.map(PipelineError::kind) {
        None => RunStatus::Completed,
        Some(ErrorKind::Cancelled) => RunStatus::Cancelled,
        Some(_) => RunStatus::Failed,
    };

    let all_completed = req
        .invocations
        .iter()
        .filter(|inv| inv.status != PhaseStatus::Skipped)
        .all(|inv| inv.status == PhaseStatus::Completed);

    let success_field = match &req.result_spec.success_from {
        Some(key) => req.context.lookup(key).found() == Some(&Value::Bool(true)),
        None => true,
    };

    let selected_outputs = req
        .result_spec
        .outputs
        .iter()
        .map(|(name, key)| {
            let value = req.context.lookup(key).found().cloned().unwrap_or(Value::Null);
            (name.clone(), value)
        })
        .collect::<Map<String, Value>>();

    let duration_ms = (req.ended_at - req.started_at).num_milliseconds().max(0) as u64;

    PipelineResult {
        success: req.error.is_none() && all_completed && success_field,
        status,
        error: req.error.map(RunFailure::from),
        selected_outputs: Value::Object(selected_outputs),
        artifacts: req.ledger.artifacts(),
        phases: req.invocations.iter().map(PhaseSummary::from).collect(),
        duration_ms,
        metadata: RunMetadata {
            pipeline_id: req.pipeline_id.to_string(),
            run_id: req.run_id.to_string(),
            started_at: req.started_at,
            ended_at: req.ended_at,
            config: req.context.config().to_value(),
        },
    }
}
