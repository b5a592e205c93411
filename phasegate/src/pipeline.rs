//! Orchestration of a single pipeline run.
//!
//! Phases run strictly in declared order on the calling thread. For each
//! phase the runner evaluates its enable predicate, resolves inputs, invokes
//! the executor, checks the output contract and threads the output forward.
//! Gates fire after the phase they follow. Any halt is reported in the
//! returned [`PipelineResult`]; `Err` is reserved for infrastructure failures
//! (invalid definitions, run store writes); when one cuts a run short, the
//! partial result is still written on a best-effort basis.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Result, anyhow, bail};
use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::{debug, error, info, instrument, warn};

use crate::clock::{Clock, SystemClock};
use crate::core::assemble::{AssembleRequest, PipelineResult, assemble};
use crate::core::context::{PipelineConfig, RunContext};
use crate::core::contract::{PhaseContract, PipelineDefinition};
use crate::core::invariants::validate_definition;
use crate::core::ledger::ArtifactLedger;
use crate::core::resolve::resolve_input;
use crate::core::types::{PhaseInvocation, PhaseStatus};
use crate::core::validate::check_output;
use crate::error::PipelineError;
use crate::gate::{GateView, run_gate};
use crate::io::config::RunnerConfig;
use crate::io::executor::{PhaseExecutor, PhaseRequest};
use crate::io::review::ReviewTransport;
use crate::io::run_store::{RunHandle, RunStore, write_atomic, write_json_atomic};
use crate::io::template::TemplateRenderer;

/// Mutable state of one run. Single writer: the runner thread.
struct RunProgress {
    context: RunContext,
    ledger: ArtifactLedger,
    invocations: Vec<PhaseInvocation>,
}

/// Walks a [`PipelineDefinition`] with a given executor and reviewer.
///
/// The runner holds no per-run state, so one runner (or several sharing the
/// same executor) may drive independent runs from different threads.
pub struct PipelineRunner<'a, E: ?Sized, R: ?Sized, C = SystemClock> {
    definition: &'a PipelineDefinition,
    executor: &'a E,
    reviewer: &'a R,
    store: RunStore,
    clock: C,
    phase_timeout: Duration,
    renderer: TemplateRenderer,
}

impl<'a, E, R> PipelineRunner<'a, E, R, SystemClock>
where
    E: PhaseExecutor + ?Sized,
    R: ReviewTransport + ?Sized,
{
    pub fn new(
        definition: &'a PipelineDefinition,
        executor: &'a E,
        reviewer: &'a R,
        runs_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            definition,
            executor,
            reviewer,
            store: RunStore::new(runs_dir),
            clock: SystemClock::new(),
            phase_timeout: RunnerConfig::default().phase_timeout(),
            renderer: TemplateRenderer::new(),
        }
    }
}

impl<'a, E, R, C> PipelineRunner<'a, E, R, C>
where
    E: PhaseExecutor + ?Sized,
    R: ReviewTransport + ?Sized,
    C: Clock,
{
    pub fn with_clock<C2: Clock>(self, clock: C2) -> PipelineRunner<'a, E, R, C2> {
        PipelineRunner {
            definition: self.definition,
            executor: self.executor,
            reviewer: self.reviewer,
            store: self.store,
            clock,
            phase_timeout: self.phase_timeout,
            renderer: self.renderer,
        }
    }

    pub fn with_phase_timeout(mut self, timeout: Duration) -> Self {
        self.phase_timeout = timeout;
        self
    }

    /// Execute one run with `config`.
    #[instrument(skip_all, fields(pipeline = %self.definition.id()))]
    pub fn run(&self, config: PipelineConfig) -> Result<PipelineResult> {
        // Phase and gate names become run-store path components.
        let problems = validate_definition(self.definition);
        if !problems.is_empty() {
            bail!(
                "invalid pipeline definition '{}':\n- {}",
                self.definition.id(),
                problems.join("\n- ")
            );
        }

        let started_at = self.clock.now();
        let run = self.store.create_run(started_at)?;
        let run_id = run.run_id();
        info!(
            run_id = %run_id,
            phases = self.definition.phases.len(),
            "run started"
        );
        run.write_config(&config.to_value())?;

        let mut progress = RunProgress {
            context: RunContext::new(config),
            ledger: ArtifactLedger::new(),
            invocations: Vec::new(),
        };

        let halt = match self.walk(&run, &mut progress) {
            Ok(()) => None,
            Err(err) => match err.downcast::<PipelineError>() {
                Ok(halt) => Some(halt),
                Err(err) => {
                    self.persist_aborted(&run, &mut progress, &err, started_at);
                    return Err(err);
                }
            },
        };

        let result = self.assemble_result(run_id, &progress, halt.as_ref(), started_at);
        run.write_result(&result)?;

        match &result.error {
            Some(failure) => warn!(
                run_id = %run_id,
                kind = failure.kind.as_str(),
                phase = %failure.phase,
                duration_ms = result.duration_ms,
                "run halted"
            ),
            None => info!(
                run_id = %run_id,
                success = result.success,
                duration_ms = result.duration_ms,
                artifacts = result.artifacts.len(),
                "run finished"
            ),
        }
        Ok(result)
    }

    fn assemble_result(
        &self,
        run_id: &str,
        progress: &RunProgress,
        halt: Option<&PipelineError>,
        started_at: DateTime<Utc>,
    ) -> PipelineResult {
        assemble(&AssembleRequest {
            pipeline_id: self.definition.id(),
            run_id,
            result_spec: &self.definition.result,
            context: &progress.context,
            ledger: &progress.ledger,
            invocations: &progress.invocations,
            error: halt,
            started_at,
            ended_at: self.clock.now(),
        })
    }

    /// Best-effort `result.json` for a run cut short by an infrastructure
    /// error. The phase in flight is marked failed and the halt is reported
    /// as an execution failure of that phase.
    fn persist_aborted(
        &self,
        run: &RunHandle,
        progress: &mut RunProgress,
        err: &anyhow::Error,
        started_at: DateTime<Utc>,
    ) {
        let Some(last) = progress.invocations.last_mut() else {
            return;
        };
        if last.status == PhaseStatus::Running
            && let Err(transition) = last.fail(self.clock.now())
        {
            debug!(phase = %last.phase, err = %transition, "could not mark phase failed");
        }
        let halt = PipelineError::Execution {
            phase: last.phase.clone(),
            message: format!("run aborted: {err:#}"),
        };
        error!(
            run_id = %run.run_id(),
            phase = %halt.phase(),
            err = %format!("{err:#}"),
            "run aborted"
        );

        let result = self.assemble_result(run.run_id(), progress, Some(&halt), started_at);
        if let Err(write_err) = run.write_result(&result) {
            warn!(
                run_id = %run.run_id(),
                err = %format!("{write_err:#}"),
                "partial result not written"
            );
        }
    }

    fn walk(&self, run: &RunHandle, progress: &mut RunProgress) -> Result<()> {
        for (index, contract) in self.definition.phases.iter().enumerate() {
            let mut invocation = PhaseInvocation::new(&contract.name, index);
            let outcome = self.run_phase(run, contract, &mut invocation, progress);
            progress.invocations.push(invocation);
            outcome?;

            for gate in self.definition.gates_after(index) {
                let view = GateView {
                    run_id: run.run_id(),
                    context: &progress.context,
                    ledger: &progress.ledger,
                    renderer: &self.renderer,
                };
                run_gate(gate, &contract.name, &view, run, self.reviewer)?;
            }
        }
        Ok(())
    }

    fn run_phase(
        &self,
        run: &RunHandle,
        contract: &PhaseContract,
        invocation: &mut PhaseInvocation,
        progress: &mut RunProgress,
    ) -> Result<()> {
        let phase = contract.name.as_str();
        let enabled = contract
            .enabled_when
            .as_ref()
            .is_none_or(|predicate| predicate.evaluate(&progress.context));
        if !enabled {
            invocation.skip(self.clock.now()).map_err(|e| anyhow!(e))?;
            progress
                .context
                .record_skipped(phase)
                .map_err(|e| anyhow!(e))?;
            info!(phase, elapsed_ms = 0u64, "phase skipped");
            return Ok(());
        }

        let input = match resolve_input(contract, &progress.context) {
            Ok(input) => input,
            Err(err) => {
                error!(phase, err = %err, "phase input unresolved");
                return Err(err.into());
            }
        };
        debug!(phase, keys = input.as_object().map_or(0, |m| m.len()), "input resolved");

        let paths = run.phase_paths(invocation.index, phase)?;
        write_json_atomic(&paths.input_path, &input)?;
        let prompt = self.render_prompt(run, contract, &input, &progress.context)?;
        if let Some(prompt) = &prompt {
            write_atomic(&paths.prompt_path, prompt.as_bytes())?;
        }

        invocation
            .start(input.clone(), self.clock.now())
            .map_err(|e| anyhow!(e))?;
        info!(phase, index = invocation.index, "phase started");

        let request = PhaseRequest {
            run_id: run.run_id(),
            phase,
            index: invocation.index,
            input: &input,
            prompt: prompt.as_deref(),
            instructions: &contract.instructions,
            paths: &paths,
            timeout: self.phase_timeout,
        };
        let output = match self.executor.invoke(&request) {
            Ok(output) => output,
            Err(err) => {
                invocation.fail(self.clock.now()).map_err(|e| anyhow!(e))?;
                let message = format!("{err:#}");
                error!(
                    phase,
                    elapsed_ms = invocation.elapsed_ms().unwrap_or(0),
                    err = %message,
                    "phase failed"
                );
                return Err(PipelineError::Execution {
                    phase: phase.to_string(),
                    message,
                }
                .into());
            }
        };
        write_json_atomic(&paths.output_path, &output)?;

        let artifacts = match check_output(&contract.output, &output) {
            Ok(artifacts) => artifacts,
            Err(violations) => {
                invocation.fail(self.clock.now()).map_err(|e| anyhow!(e))?;
                error!(
                    phase,
                    elapsed_ms = invocation.elapsed_ms().unwrap_or(0),
                    violations = violations.len(),
                    "phase failed validation"
                );
                return Err(PipelineError::Validation {
                    phase: phase.to_string(),
                    violations,
                }
                .into());
            }
        };

        progress.ledger.append(phase, &artifacts);
        progress
            .context
            .record_completed(phase, output.clone())
            .map_err(|e| anyhow!(e))?;
        let artifact_count = artifacts.len();
        invocation
            .complete(output, artifacts, self.clock.now())
            .map_err(|e| anyhow!(e))?;
        info!(
            phase,
            elapsed_ms = invocation.elapsed_ms().unwrap_or(0),
            artifacts = artifact_count,
            "phase completed"
        );
        Ok(())
    }

    fn render_prompt(
        &self,
        run: &RunHandle,
        contract: &PhaseContract,
        input: &serde_json::Value,
        context: &RunContext,
    ) -> Result<Option<String>, PipelineError> {
        let Some(source) = &contract.prompt else {
            return Ok(None);
        };
        let ctx = json!({
            "inputs": input,
            "config": context.config().to_value(),
            "outputs": context.outputs_value(),
            "run_id": run.run_id(),
            "phase": contract.name,
        });
        self.renderer
            .render(source, &ctx)
            .map(Some)
            .map_err(|err| PipelineError::Configuration {
                phase: contract.name.clone(),
                key: "prompt".to_string(),
                reason: format!("template failed to render: {err:#}"),
            })
    }
}

/// Run `definition` once with the given collaborators and config.
pub fn run_pipeline<E, R>(
    definition: &PipelineDefinition,
    executor: &E,
    reviewer: &R,
    cfg: &RunnerConfig,
    config: PipelineConfig,
) -> Result<PipelineResult>
where
    E: PhaseExecutor + ?Sized,
    R: ReviewTransport + ?Sized,
{
    PipelineRunner::new(definition, executor, reviewer, cfg.runs_dir.clone())
        .with_phase_timeout(cfg.phase_timeout())
        .run(config)
}
