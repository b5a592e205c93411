//! Phase executor abstraction.
//!
//! The [`PhaseExecutor`] trait decouples the pipeline runner from whatever
//! performs a phase's work. [`CommandExecutor`] spawns a configured command per
//! phase; tests use scripted executors that return queued documents.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::core::repair::{decode_output, repair_text};
use crate::io::config::RunnerConfig;
use crate::io::process::run_command_with_timeout;
use crate::io::run_store::{PhasePaths, write_atomic};

/// Everything an executor gets for one phase invocation.
#[derive(Debug, Clone, Copy)]
pub struct PhaseRequest<'a> {
    pub run_id: &'a str,
    pub phase: &'a str,
    /// 0-based position in the pipeline.
    pub index: usize,
    pub input: &'a Value,
    pub prompt: Option<&'a str>,
    pub instructions: &'a [String],
    pub paths: &'a PhasePaths,
    pub timeout: Duration,
}

/// Performs the work of one phase and returns its output document.
///
/// Implementations must be safe to share between concurrent runs when the
/// caller runs pipelines in parallel (`Sync`).
pub trait PhaseExecutor {
    fn invoke(&self, request: &PhaseRequest<'_>) -> Result<Value>;
}

/// Document written to the command's stdin.
#[derive(Debug, Serialize)]
struct Envelope<'a> {
    run_id: &'a str,
    phase: &'a str,
    index: usize,
    input: &'a Value,
    prompt: Option<&'a str>,
    instructions: &'a [String],
    output_path: &'a Path,
}

/// Executor that spawns an external command per phase.
///
/// The command sees `PHASEGATE_RUN_ID`, `PHASEGATE_PHASE`, `PHASEGATE_INPUT`,
/// `PHASEGATE_OUTPUT` and `PHASEGATE_PROMPT`, and receives a JSON envelope on
/// stdin. It either writes its output document to `PHASEGATE_OUTPUT` or
/// prints it on stdout.
#[derive(Debug, Clone)]
pub struct CommandExecutor {
    command: Vec<String>,
    workdir: PathBuf,
    output_limit_bytes: usize,
    repair_output: bool,
}

impl CommandExecutor {
    pub fn new(command: Vec<String>, workdir: impl Into<PathBuf>) -> Self {
        Self {
            command,
            workdir: workdir.into(),
            output_limit_bytes: RunnerConfig::default().output_limit_bytes,
            repair_output: true,
        }
    }

    pub fn from_config(cfg: &RunnerConfig, workdir: impl Into<PathBuf>) -> Self {
        Self {
            command: cfg.executor.command.clone(),
            workdir: workdir.into(),
            output_limit_bytes: cfg.output_limit_bytes,
            repair_output: cfg.repair_output,
        }
    }

    pub fn with_output_limit(mut self, bytes: usize) -> Self {
        self.output_limit_bytes = bytes;
        self
    }

    pub fn with_repair(mut self, repair: bool) -> Self {
        self.repair_output = repair;
        self
    }
}

impl PhaseExecutor for CommandExecutor {
    #[instrument(skip_all, fields(phase = request.phase, timeout_secs = request.timeout.as_secs()))]
    fn invoke(&self, request: &PhaseRequest<'_>) -> Result<Value> {
        let (program, args) = self
            .command
            .split_first()
            .ok_or_else(|| anyhow!("executor command is empty"))?;
        info!(program = %program, workdir = %self.workdir.display(), "starting executor");

        let output_path = &request.paths.output_path;
        if output_path.exists() {
            fs::remove_file(output_path)
                .with_context(|| format!("remove stale output {}", output_path.display()))?;
        }

        let envelope = Envelope {
            run_id: request.run_id,
            phase: request.phase,
            index: request.index,
            input: request.input,
            prompt: request.prompt,
            instructions: request.instructions,
            output_path,
        };
        let stdin = serde_json::to_vec(&envelope).context("serialize executor envelope")?;

        let mut cmd = Command::new(program);
        cmd.args(args)
            .current_dir(&self.workdir)
            .env("PHASEGATE_RUN_ID", request.run_id)
            .env("PHASEGATE_PHASE", request.phase)
            .env("PHASEGATE_INPUT", &request.paths.input_path)
            .env("PHASEGATE_OUTPUT", output_path)
            .env("PHASEGATE_PROMPT", &request.paths.prompt_path);

        let output = run_command_with_timeout(cmd, Some(stdin), request.timeout, self.output_limit_bytes)
            .context("run executor command")?;
        write_atomic(&request.paths.log_path, output.render_log().as_bytes())?;

        if output.timed_out {
            warn!(timeout_secs = request.timeout.as_secs(), "executor timed out");
            return Err(anyhow!(
                "executor timed out after {}s",
                request.timeout.as_secs()
            ));
        }
        if !output.status.success() {
            warn!(exit_code = ?output.status.code(), "executor failed");
            return Err(anyhow!(
                "executor exited with status {}",
                output
                    .status
                    .code()
                    .map_or_else(|| "signal".to_string(), |c| c.to_string())
            ));
        }

        let raw = if output_path.exists() {
            fs::read(output_path)
                .with_context(|| format!("read executor output {}", output_path.display()))?
        } else {
            debug!("no output file, using stdout");
            if output.stdout_truncated > 0 {
                return Err(anyhow!(
                    "executor stdout exceeded {} bytes; write large outputs to PHASEGATE_OUTPUT",
                    self.output_limit_bytes
                ));
            }
            output.stdout
        };
        parse_output(&raw, self.repair_output)
    }
}

/// Decode and parse an executor output document.
pub fn parse_output(raw: &[u8], repair: bool) -> Result<Value> {
    let text = decode_output(raw);
    if text.trim().is_empty() {
        return Err(anyhow!("executor produced no output"));
    }
    let text = if repair {
        repair_text(&text)
    } else {
        std::borrow::Cow::Borrowed(text.as_str())
    };
    serde_json::from_str(&text).context("parse executor output as JSON")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_output_repairs_before_parsing() {
        let raw = "{\"note\": \"SRAM â€” 128 KB\"}".as_bytes();
        assert_eq!(
            parse_output(raw, true).expect("parse"),
            json!({"note": "SRAM - 128 KB"})
        );
        assert_eq!(
            parse_output(raw, false).expect("parse"),
            json!({"note": "SRAM â€” 128 KB"})
        );
    }

    #[test]
    fn parse_output_rejects_empty_and_garbage() {
        assert!(
            parse_output(b"  \n", true)
                .unwrap_err()
                .to_string()
                .contains("no output")
        );
        assert!(parse_output(b"not json", true).is_err());
    }

    #[cfg(unix)]
    mod command {
        use super::*;
        use crate::io::run_store::RunStore;
        use chrono::Utc;

        fn invoke(script: &str, input: &Value) -> Result<Value> {
            let temp = tempfile::tempdir().expect("tempdir");
            let run = RunStore::new(temp.path().join("runs"))
                .create_run(Utc::now())
                .expect("run");
            let paths = run.phase_paths(0, "analysis").expect("paths");
            let executor = CommandExecutor::new(
                vec!["sh".to_string(), "-c".to_string(), script.to_string()],
                temp.path(),
            );
            let result = executor.invoke(&PhaseRequest {
                run_id: run.run_id(),
                phase: "analysis",
                index: 0,
                input,
                prompt: None,
                instructions: &[],
                paths: &paths,
                timeout: Duration::from_secs(10),
            });
            let log = fs::read_to_string(&paths.log_path).expect("executor log");
            assert!(log.contains("=== stdout ==="));
            result
        }

        #[test]
        fn reads_output_from_stdout() {
            let result = invoke(r#"printf '{"phase":"%s"}' "$PHASEGATE_PHASE""#, &json!({}));
            assert_eq!(result.expect("invoke"), json!({"phase": "analysis"}));
        }

        #[test]
        fn prefers_output_file_over_stdout() {
            let result = invoke(
                r#"echo noise; printf '{"from":"file"}' > "$PHASEGATE_OUTPUT""#,
                &json!({}),
            );
            assert_eq!(result.expect("invoke"), json!({"from": "file"}));
        }

        #[test]
        fn envelope_carries_input_on_stdin() {
            let result = invoke("cat", &json!({"target_mcu": "stm32h7"}));
            let envelope = result.expect("invoke");
            assert_eq!(envelope["input"]["target_mcu"], "stm32h7");
            assert_eq!(envelope["phase"], "analysis");
        }

        #[test]
        fn nonzero_exit_is_an_error() {
            let result = invoke("exit 7", &json!({}));
            let err = result.unwrap_err();
            assert!(err.to_string().contains("status 7"));
        }
    }
}
