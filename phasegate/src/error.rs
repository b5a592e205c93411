//! Typed errors that halt a pipeline run.
//!
//! Everything else (filesystem, process spawning, serialization) travels as
//! `anyhow::Error`. These four kinds are what callers match on to tell a
//! broken phase from a malformed result or a deliberate stop at review.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Stable classification of a halted run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// A required input could not be resolved before dispatch.
    Configuration,
    /// The executor failed for a dispatched phase.
    Execution,
    /// The executor returned a document that breaks the phase's output contract.
    Validation,
    /// A review gate resolved with a rejection.
    Cancelled,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Configuration => "configuration",
            ErrorKind::Execution => "execution",
            ErrorKind::Validation => "validation",
            ErrorKind::Cancelled => "cancelled",
        }
    }
}

/// Error that stops a pipeline run at a specific phase.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PipelineError {
    #[error("phase '{phase}': input '{key}' {reason}")]
    Configuration {
        phase: String,
        key: String,
        reason: String,
    },

    #[error("phase '{phase}' failed: {message}")]
    Execution { phase: String, message: String },

    #[error("phase '{phase}' returned invalid output: {}", .violations.join("; "))]
    Validation {
        phase: String,
        violations: Vec<String>,
    },

    #[error("review gate '{gate}' rejected the run{}", reason_suffix(.reason))]
    Cancelled {
        gate: String,
        /// Phase after which the gate was placed.
        phase: String,
        reason: Option<String>,
    },
}

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::Configuration { .. } => ErrorKind::Configuration,
            PipelineError::Execution { .. } => ErrorKind::Execution,
            PipelineError::Validation { .. } => ErrorKind::Validation,
            PipelineError::Cancelled { .. } => ErrorKind::Cancelled,
        }
    }

    /// Name of the phase at which the run stopped.
    pub fn phase(&self) -> &str {
        match self {
            PipelineError::Configuration { phase, .. }
            | PipelineError::Execution { phase, .. }
            | PipelineError::Validation { phase, .. }
            | PipelineError::Cancelled { phase, .. } => phase,
        }
    }
}

fn reason_suffix(reason: &Option<String>) -> String {
    match reason.as_deref().map(str::trim).filter(|r| !r.is_empty()) {
        Some(reason) => format!(": {reason}"),
        None => String::new(),
    }
}
