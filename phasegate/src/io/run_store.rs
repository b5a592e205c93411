//! Run-scoped document store under `.phasegate/runs/<run-id>/`.
//!
//! Layout:
//!
//! ```text
//! <run-id>/
//!   config.json
//!   phases/<NN>-<phase>/{input.json, prompt.md, result.json, executor.log}
//!   checkpoints/<gate>.json
//!   checkpoints/<gate>.decision.json
//!   result.json
//! ```

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

use crate::core::assemble::PipelineResult;
use crate::core::types::{ReviewCheckpoint, ReviewDecision};

const MAX_ID_SUFFIX: u32 = 1000;

/// Root of all runs for one project. Safe to share between concurrent runs.
#[derive(Debug, Clone)]
pub struct RunStore {
    root: PathBuf,
}

impl RunStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Claim a fresh run directory named after `started_at`.
    ///
    /// The directory is created with `create_dir`, so two runs starting in the
    /// same second get distinct ids (`run-...`, `run-...-2`, ...).
    pub fn create_run(&self, started_at: DateTime<Utc>) -> Result<RunHandle> {
        fs::create_dir_all(&self.root)
            .with_context(|| format!("create runs dir {}", self.root.display()))?;
        let base = format!("run-{}", started_at.format("%Y%m%dT%H%M%SZ"));
        for n in 1..=MAX_ID_SUFFIX {
            let run_id = if n == 1 {
                base.clone()
            } else {
                format!("{base}-{n}")
            };
            let dir = self.root.join(&run_id);
            match fs::create_dir(&dir) {
                Ok(()) => {
                    debug!(run_id = %run_id, dir = %dir.display(), "claimed run dir");
                    return Ok(RunHandle { run_id, dir });
                }
                Err(err) if err.kind() == ErrorKind::AlreadyExists => continue,
                Err(err) => {
                    return Err(err).with_context(|| format!("create run dir {}", dir.display()));
                }
            }
        }
        Err(anyhow!(
            "no free run id for {base} after {MAX_ID_SUFFIX} attempts"
        ))
    }
}

/// Paths for one phase's documents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhasePaths {
    pub dir: PathBuf,
    pub input_path: PathBuf,
    pub prompt_path: PathBuf,
    pub output_path: PathBuf,
    pub log_path: PathBuf,
}

impl PhasePaths {
    fn new(run_dir: &Path, index: usize, phase: &str) -> Self {
        let dir = run_dir
            .join("phases")
            .join(format!("{:02}-{phase}", index + 1));
        Self {
            input_path: dir.join("input.json"),
            prompt_path: dir.join("prompt.md"),
            output_path: dir.join("result.json"),
            log_path: dir.join("executor.log"),
            dir,
        }
    }
}

/// Handle to one claimed run directory.
#[derive(Debug, Clone)]
pub struct RunHandle {
    run_id: String,
    dir: PathBuf,
}

impl RunHandle {
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn config_path(&self) -> PathBuf {
        self.dir.join("config.json")
    }

    pub fn result_path(&self) -> PathBuf {
        self.dir.join("result.json")
    }

    pub fn checkpoint_path(&self, gate: &str) -> PathBuf {
        self.dir.join("checkpoints").join(format!("{gate}.json"))
    }

    pub fn decision_path(&self, gate: &str) -> PathBuf {
        self.dir
            .join("checkpoints")
            .join(format!("{gate}.decision.json"))
    }

    /// Create the directory for phase `index` (0-based) and return its paths.
    pub fn phase_paths(&self, index: usize, phase: &str) -> Result<PhasePaths> {
        let paths = PhasePaths::new(&self.dir, index, phase);
        fs::create_dir_all(&paths.dir)
            .with_context(|| format!("create phase dir {}", paths.dir.display()))?;
        Ok(paths)
    }

    pub fn write_config(&self, config: &serde_json::Value) -> Result<()> {
        write_json_atomic(&self.config_path(), config)
    }

    pub fn write_checkpoint(&self, checkpoint: &ReviewCheckpoint) -> Result<PathBuf> {
        let path = self.checkpoint_path(&checkpoint.gate);
        write_json_atomic(&path, checkpoint)?;
        Ok(path)
    }

    pub fn write_decision(&self, gate: &str, decision: &ReviewDecision) -> Result<PathBuf> {
        let path = self.decision_path(gate);
        write_json_atomic(&path, decision)?;
        Ok(path)
    }

    pub fn write_result(&self, result: &PipelineResult) -> Result<PathBuf> {
        let path = self.result_path();
        write_json_atomic(&path, result)?;
        Ok(path)
    }
}

/// Serialize `value` as pretty JSON with a trailing newline, atomically.
pub fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(value)
        .with_context(|| format!("serialize {}", path.display()))?;
    buf.push('\n');
    write_atomic(path, buf.as_bytes())
}

/// Write via a sibling temp file and rename, creating parent directories.
pub fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let file_name = path
        .file_name()
        .with_context(|| format!("path missing file name {}", path.display()))?;
    let mut tmp_name = file_name.to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = parent.join(tmp_name);
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp file {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace {}", path.display()))?;
    debug!(path = %path.display(), bytes = contents.len(), "wrote document");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn started() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 30, 5)
            .single()
            .expect("ts")
    }

    #[test]
    fn run_ids_get_numeric_suffix_on_collision() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = RunStore::new(temp.path().join("runs"));
        let first = store.create_run(started()).expect("first");
        let second = store.create_run(started()).expect("second");
        let third = store.create_run(started()).expect("third");
        assert_eq!(first.run_id(), "run-20260301T123005Z");
        assert_eq!(second.run_id(), "run-20260301T123005Z-2");
        assert_eq!(third.run_id(), "run-20260301T123005Z-3");
        assert!(second.dir().is_dir());
    }

    #[test]
    fn phase_paths_are_stable() {
        let temp = tempfile::tempdir().expect("tempdir");
        let run = RunStore::new(temp.path()).create_run(started()).expect("run");
        let paths = run.phase_paths(2, "stack_heap_sizing").expect("paths");
        assert!(paths.dir.ends_with("phases/03-stack_heap_sizing"));
        assert!(paths.input_path.ends_with("input.json"));
        assert!(paths.prompt_path.ends_with("prompt.md"));
        assert!(paths.output_path.ends_with("result.json"));
        assert!(paths.log_path.ends_with("executor.log"));
        assert!(paths.dir.is_dir());
    }

    #[test]
    fn checkpoint_and_decision_are_written_side_by_side() {
        let temp = tempfile::tempdir().expect("tempdir");
        let run = RunStore::new(temp.path()).create_run(started()).expect("run");
        let checkpoint = ReviewCheckpoint {
            gate: "final-review".to_string(),
            question: "Approve?".to_string(),
            title: "Plan".to_string(),
            context: crate::core::types::CheckpointContext {
                run_id: run.run_id().to_string(),
                summary: serde_json::json!({}),
                files: Vec::new(),
            },
        };
        let cp_path = run.write_checkpoint(&checkpoint).expect("checkpoint");
        let decision_path = run
            .write_decision("final-review", &ReviewDecision::Proceed)
            .expect("decision");
        assert!(cp_path.ends_with("checkpoints/final-review.json"));
        let raw = fs::read_to_string(decision_path).expect("read");
        assert_eq!(raw, "{\n  \"decision\": \"proceed\"\n}\n");
    }

    #[test]
    fn atomic_write_leaves_no_temp_file() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("nested").join("doc.json");
        write_json_atomic(&path, &serde_json::json!({"a": 1})).expect("write");
        assert!(path.is_file());
        assert!(!temp.path().join("nested").join("doc.json.tmp").exists());
    }
}
