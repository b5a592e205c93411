//! Review gates: build a checkpoint, persist it, and suspend until a decision.
//!
//! A gate never lets a run continue without an explicit proceed. A transport
//! that fails (closed input, dropped channel) counts as a rejection.

use anyhow::Result;
use serde_json::{Map, Value, json};
use tracing::{error, info, instrument};

use crate::core::context::RunContext;
use crate::core::contract::{FileScope, FileSelection, GateSpec};
use crate::core::ledger::ArtifactLedger;
use crate::core::types::{CheckpointContext, ReviewCheckpoint, ReviewDecision};
use crate::error::PipelineError;
use crate::io::review::ReviewTransport;
use crate::io::run_store::RunHandle;
use crate::io::template::TemplateRenderer;

/// Run state a gate reads from.
#[derive(Debug, Clone, Copy)]
pub struct GateView<'a> {
    pub run_id: &'a str,
    pub context: &'a RunContext,
    pub ledger: &'a ArtifactLedger,
    pub renderer: &'a TemplateRenderer,
}

/// Render the gate's text and collect its summary facts and files.
///
/// `phase` is the phase the gate follows; template failures are reported
/// against it as configuration errors.
pub fn build_checkpoint(
    gate: &GateSpec,
    phase: &str,
    view: &GateView<'_>,
) -> Result<ReviewCheckpoint, PipelineError> {
    let template_ctx = json!({
        "config": view.context.config().to_value(),
        "outputs": view.context.outputs_value(),
        "run_id": view.run_id,
    });
    let render = |field: &str, source: &str| {
        view.renderer
            .render(source, &template_ctx)
            .map_err(|err| PipelineError::Configuration {
                phase: phase.to_string(),
                key: format!("gates.{}.{field}", gate.name),
                reason: format!("template failed to render: {err:#}"),
            })
    };
    let title = render("title", &gate.title)?;
    let question = render("question", &gate.question)?;

    let summary = gate
        .summary
        .iter()
        .map(|(name, key)| {
            let value = view.context.lookup(key).found().cloned().unwrap_or(Value::Null);
            (name.clone(), value)
        })
        .collect::<Map<String, Value>>();

    let files = match &gate.files {
        FileSelection::Scope(FileScope::All) => view.ledger.artifacts(),
        FileSelection::Scope(FileScope::None) => Vec::new(),
        FileSelection::Phases(phases) => view.ledger.for_phases(phases),
    };

    Ok(ReviewCheckpoint {
        gate: gate.name.clone(),
        question,
        title,
        context: CheckpointContext {
            run_id: view.run_id.to_string(),
            summary: Value::Object(summary),
            files,
        },
    })
}

/// Block on the transport. Transport failures resolve as a rejection.
pub fn await_decision<T: ReviewTransport + ?Sized>(
    transport: &T,
    checkpoint: &ReviewCheckpoint,
) -> ReviewDecision {
    match transport.request_decision(checkpoint) {
        Ok(decision) => decision,
        Err(err) => {
            let message = format!("{err:#}");
            error!(gate = %checkpoint.gate, err = %message, "review transport failed");
            ReviewDecision::Reject {
                reason: Some(format!("review transport failed: {message}")),
            }
        }
    }
}

/// Run one gate end to end: checkpoint, persist, suspend, persist decision.
///
/// A rejection comes back as a [`PipelineError::Cancelled`] inside the
/// `anyhow::Error`; store failures are plain errors.
#[instrument(skip_all, fields(gate = %gate.name, run_id = %view.run_id))]
pub fn run_gate<T: ReviewTransport + ?Sized>(
    gate: &GateSpec,
    phase: &str,
    view: &GateView<'_>,
    run: &RunHandle,
    transport: &T,
) -> Result<()> {
    let checkpoint = build_checkpoint(gate, phase, view)?;
    run.write_checkpoint(&checkpoint)?;
    info!(
        gate = %gate.name,
        files = checkpoint.context.files.len(),
        "review gate suspended"
    );

    let decision = await_decision(transport, &checkpoint);
    run.write_decision(&gate.name, &decision)?;

    match decision {
        ReviewDecision::Proceed => {
            info!(gate = %gate.name, decision = "proceed", "review gate resumed");
            Ok(())
        }
        ReviewDecision::Reject { reason } => {
            info!(gate = %gate.name, decision = "reject", reason = ?reason, "review gate resumed");
            Err(PipelineError::Cancelled {
                gate: gate.name.clone(),
                phase: phase.to_string(),
                reason,
            }
            .into())
        }
    }
}
