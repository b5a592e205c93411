//! Runner configuration stored under `.phasegate/config.toml`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

/// Default location of the config file, relative to the project root.
pub const CONFIG_PATH: &str = ".phasegate/config.toml";

/// Runner configuration (TOML).
///
/// Edited by humans; missing fields take the defaults below.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RunnerConfig {
    /// Wall-clock budget for one executor invocation, in seconds.
    pub phase_timeout_secs: u64,

    /// Truncate captured executor stdout/stderr beyond this many bytes.
    pub output_limit_bytes: usize,

    /// Directory holding per-run documents, relative to the project root.
    pub runs_dir: PathBuf,

    /// Replace mis-decoded punctuation in executor output before parsing.
    pub repair_output: bool,

    pub executor: ExecutorConfig,

    pub review: ReviewConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Command spawned once per phase (e.g. `["phasegate-agent"]`).
    pub command: Vec<String>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            command: vec!["phasegate-agent".to_string()],
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ReviewConfig {
    /// Reject a pending review after this many seconds. Unset waits forever.
    pub timeout_secs: Option<u64>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            phase_timeout_secs: 30 * 60,
            output_limit_bytes: 100_000,
            runs_dir: PathBuf::from(".phasegate/runs"),
            repair_output: true,
            executor: ExecutorConfig::default(),
            review: ReviewConfig::default(),
        }
    }
}

impl RunnerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.phase_timeout_secs == 0 {
            return Err(anyhow!("phase_timeout_secs must be > 0"));
        }
        if self.output_limit_bytes == 0 {
            return Err(anyhow!("output_limit_bytes must be > 0"));
        }
        if self.runs_dir.as_os_str().is_empty() {
            return Err(anyhow!("runs_dir must not be empty"));
        }
        if self.executor.command.is_empty() || self.executor.command[0].trim().is_empty() {
            return Err(anyhow!("executor.command must be a non-empty array"));
        }
        if self.review.timeout_secs == Some(0) {
            return Err(anyhow!("review.timeout_secs must be > 0 when set"));
        }
        Ok(())
    }

    pub fn phase_timeout(&self) -> Duration {
        Duration::from_secs(self.phase_timeout_secs)
    }

    pub fn review_timeout(&self) -> Option<Duration> {
        self.review.timeout_secs.map(Duration::from_secs)
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `RunnerConfig::default()`.
pub fn load_config(path: &Path) -> Result<RunnerConfig> {
    if !path.exists() {
        let cfg = RunnerConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: RunnerConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &RunnerConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    crate::io::run_store::write_atomic(path, buf.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, RunnerConfig::default());
        assert_eq!(cfg.review_timeout(), None);
    }

    #[test]
    fn write_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join(".phasegate").join("config.toml");
        let mut cfg = RunnerConfig::default();
        cfg.review.timeout_secs = Some(600);
        cfg.executor.command = vec!["python3".to_string(), "agent.py".to_string()];
        write_config(&path, &cfg).expect("write");
        let loaded = load_config(&path).expect("load");
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        fs::write(&path, "phase_timeout_secs = 60\n").expect("write");
        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.phase_timeout(), Duration::from_secs(60));
        assert_eq!(cfg.executor, ExecutorConfig::default());
        assert!(cfg.repair_output);
    }

    #[test]
    fn rejects_empty_executor_command() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        fs::write(&path, "[executor]\ncommand = []\n").expect("write");
        let err = load_config(&path).unwrap_err();
        assert!(format!("{err:#}").contains("executor.command"));
    }
}
