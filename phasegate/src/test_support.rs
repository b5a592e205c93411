//! Test-only collaborators: scripted executors and reviewers, a manual clock,
//! and definition helpers.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Result, anyhow};
use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use serde_json::Value;

use crate::clock::Clock;
use crate::core::contract::GateSpec;
use crate::core::types::{ReviewCheckpoint, ReviewDecision};
use crate::io::executor::{PhaseExecutor, PhaseRequest};
use crate::io::review::ReviewTransport;

#[derive(Debug, Clone)]
enum Scripted {
    Output(Value),
    Failure(String),
}

/// One recorded executor call.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutorCall {
    pub run_id: String,
    pub phase: String,
    pub input: Value,
    pub prompt: Option<String>,
}

/// Executor with a fixed response per phase and a call log.
///
/// Responses do not depend on call order, so one instance can serve
/// concurrent runs deterministically.
#[derive(Debug, Default)]
pub struct ScriptedExecutor {
    responses: BTreeMap<String, Scripted>,
    calls: Mutex<Vec<ExecutorCall>>,
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn succeed(mut self, phase: &str, output: Value) -> Self {
        self.responses
            .insert(phase.to_string(), Scripted::Output(output));
        self
    }

    pub fn fail(mut self, phase: &str, message: &str) -> Self {
        self.responses
            .insert(phase.to_string(), Scripted::Failure(message.to_string()));
        self
    }

    pub fn calls(&self) -> Vec<ExecutorCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn call_count(&self) -> usize {
        self.calls().len()
    }

    /// Phases invoked, in call order.
    pub fn phases_called(&self) -> Vec<String> {
        self.calls().into_iter().map(|c| c.phase).collect()
    }

    pub fn calls_for(&self, phase: &str) -> usize {
        self.calls().iter().filter(|c| c.phase == phase).count()
    }

    /// Input of the most recent call for `phase`.
    pub fn input_of(&self, phase: &str) -> Option<Value> {
        self.calls()
            .into_iter()
            .rev()
            .find(|c| c.phase == phase)
            .map(|c| c.input)
    }

    pub fn prompt_of(&self, phase: &str) -> Option<String> {
        self.calls()
            .into_iter()
            .rev()
            .find(|c| c.phase == phase)
            .and_then(|c| c.prompt)
    }
}

impl PhaseExecutor for ScriptedExecutor {
    fn invoke(&self, request: &PhaseRequest<'_>) -> Result<Value> {
        self.calls
            .lock()
            .map_err(|_| anyhow!("call log poisoned"))?
            .push(ExecutorCall {
                run_id: request.run_id.to_string(),
                phase: request.phase.to_string(),
                input: request.input.clone(),
                prompt: request.prompt.map(str::to_string),
            });
        match self.responses.get(request.phase) {
            Some(Scripted::Output(output)) => Ok(output.clone()),
            Some(Scripted::Failure(message)) => Err(anyhow!("{message}")),
            None => Err(anyhow!("no scripted response for phase '{}'", request.phase)),
        }
    }
}

/// Reviewer that records every checkpoint and answers with a fixed decision,
/// or fails like a broken transport.
#[derive(Debug)]
pub struct ScriptedReviewer {
    answer: Result<ReviewDecision, String>,
    seen: Mutex<Vec<ReviewCheckpoint>>,
}

impl ScriptedReviewer {
    pub fn proceed() -> Self {
        Self::answering(ReviewDecision::Proceed)
    }

    pub fn reject(reason: &str) -> Self {
        Self::answering(ReviewDecision::reject(reason))
    }

    pub fn failing(message: &str) -> Self {
        Self {
            answer: Err(message.to_string()),
            seen: Mutex::new(Vec::new()),
        }
    }

    fn answering(decision: ReviewDecision) -> Self {
        Self {
            answer: Ok(decision),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn checkpoints(&self) -> Vec<ReviewCheckpoint> {
        self.seen.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

impl ReviewTransport for ScriptedReviewer {
    fn request_decision(&self, checkpoint: &ReviewCheckpoint) -> Result<ReviewDecision> {
        self.seen
            .lock()
            .map_err(|_| anyhow!("checkpoint log poisoned"))?
            .push(checkpoint.clone());
        self.answer.clone().map_err(|message| anyhow!("{message}"))
    }
}

/// Clock that returns its current reading and then advances by `step`.
#[derive(Debug)]
pub struct ManualClock {
    current: Mutex<DateTime<Utc>>,
    step: TimeDelta,
}

impl ManualClock {
    pub fn with_step_ms(step_ms: i64) -> Self {
        Self {
            current: Mutex::new(epoch()),
            step: TimeDelta::milliseconds(step_ms),
        }
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::with_step_ms(1)
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        match self.current.lock() {
            Ok(mut current) => {
                let reading = *current;
                *current = reading + self.step;
                reading
            }
            Err(_) => epoch(),
        }
    }
}

fn epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0)
        .single()
        .unwrap_or_default()
}

/// Gate firing after the last phase with a plain question.
pub fn gate(name: &str) -> GateSpec {
    GateSpec {
        name: name.to_string(),
        after: None,
        title: format!("{name} review"),
        question: "Proceed?".to_string(),
        summary: BTreeMap::new(),
        files: Default::default(),
    }
}

/// Write a definition (or schema) file under `dir`.
pub fn write_definition(dir: &Path, name: &str, contents: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, contents).expect("write definition");
    path
}
