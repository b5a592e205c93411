//! Declarative multi-phase pipeline runner.
//!
//! Loads a pipeline definition (`pipelines/*.toml`), builds the run config
//! from option defaults, a params file and `--set` overrides, then walks the
//! phases with a command executor, pausing at review gates. Every run leaves
//! its documents under `.phasegate/runs/<run-id>/`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use phasegate::core::assemble::{PipelineResult, RunStatus};
use phasegate::core::context::PipelineConfig;
use phasegate::core::contract::PipelineDefinition;
use phasegate::core::repair::{decode_output, repair_text};
use phasegate::{exit_codes, logging};
use phasegate::gate::await_decision;
use phasegate::io::config::{CONFIG_PATH, RunnerConfig, load_config, write_config};
use phasegate::io::definition::load_definition;
use phasegate::io::executor::CommandExecutor;
use phasegate::io::params::{build_config, load_params_file, parse_override};
use phasegate::io::review::{AutoReviewer, ReviewTransport, TerminalReviewer, review_channel};
use phasegate::io::run_store::write_atomic;
use phasegate::pipeline::run_pipeline;
use phasegate::plan::plan;
use tracing::warn;

#[derive(Parser)]
#[command(
    name = "phasegate",
    version,
    about = "Declarative multi-phase pipeline runner with review gates"
)]
struct Cli {
    /// Log phase lifecycle events to stderr (overridden by RUST_LOG).
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write `.phasegate/config.toml` with defaults if missing.
    Init {
        /// Overwrite an existing config.
        #[arg(short, long)]
        force: bool,
    },
    /// Load a definition and check its invariants, templates and schemas.
    Validate { definition: PathBuf },
    /// Show which phases a config enables, skips or leaves to run time.
    Plan {
        definition: PathBuf,
        #[command(flatten)]
        params: ParamArgs,
    },
    /// Run a pipeline and print the result JSON.
    Run {
        definition: PathBuf,
        #[command(flatten)]
        params: ParamArgs,
        /// Approve every review gate without asking.
        #[arg(long, conflicts_with = "reject")]
        yes: bool,
        /// Reject at the first review gate.
        #[arg(long)]
        reject: bool,
    },
    /// Repair mis-decoded text (UTF-16, BOMs, mojibake punctuation).
    Repair {
        #[arg(long = "in")]
        input: PathBuf,
        #[arg(long = "out")]
        output: PathBuf,
    },
}

#[derive(clap::Args)]
struct ParamArgs {
    /// Parameters file (TOML, or JSON with a `.json` extension).
    #[arg(long)]
    params: Option<PathBuf>,
    /// Override one parameter: `key=value` (value parsed as JSON, else string).
    #[arg(long = "set", value_name = "KEY=VALUE")]
    set: Vec<String>,
}

fn main() {
    let cli = Cli::parse();
    logging::init(cli.verbose);
    let code = match run(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{:#}", err);
            exit_codes::INVALID
        }
    };
    std::process::exit(code);
}

fn run(cli: Cli) -> Result<i32> {
    match cli.command {
        Command::Init { force } => cmd_init(force),
        Command::Validate { definition } => cmd_validate(&definition),
        Command::Plan { definition, params } => cmd_plan(&definition, &params),
        Command::Run {
            definition,
            params,
            yes,
            reject,
        } => cmd_run(&definition, &params, yes, reject),
        Command::Repair { input, output } => cmd_repair(&input, &output),
    }
}

fn cmd_init(force: bool) -> Result<i32> {
    let path = Path::new(CONFIG_PATH);
    if path.exists() && !force {
        println!("{} already exists (use --force to overwrite)", path.display());
        return Ok(exit_codes::OK);
    }
    write_config(path, &RunnerConfig::default())
        .with_context(|| format!("write {}", path.display()))?;
    println!("wrote {}", path.display());
    Ok(exit_codes::OK)
}

fn cmd_validate(definition: &Path) -> Result<i32> {
    let def = load_definition(definition)?;
    println!(
        "ok: pipeline '{}' ({} phases, {} gates, {} options)",
        def.id(),
        def.phases.len(),
        def.gates.len(),
        def.options.len()
    );
    Ok(exit_codes::OK)
}

fn cmd_plan(definition: &Path, params: &ParamArgs) -> Result<i32> {
    let def = load_definition(definition)?;
    let config = pipeline_config(&def, params)?;
    let plan = plan(&def, &config);
    for warning in &plan.warnings {
        warn!(warning = %warning, "plan warning");
    }
    println!(
        "{}",
        serde_json::to_string_pretty(&plan).context("serialize plan")?
    );
    Ok(exit_codes::OK)
}

fn cmd_run(definition: &Path, params: &ParamArgs, yes: bool, reject: bool) -> Result<i32> {
    let cfg = load_config(Path::new(CONFIG_PATH))?;
    let def = load_definition(definition)?;
    let config = pipeline_config(&def, params)?;

    let workdir = std::env::current_dir().context("resolve working directory")?;
    let executor = CommandExecutor::from_config(&cfg, workdir);
    let reviewer: Box<dyn ReviewTransport> = if yes {
        Box::new(AutoReviewer::proceed())
    } else if reject {
        Box::new(AutoReviewer::reject("rejected from the command line"))
    } else {
        terminal_reviewer(cfg.review_timeout())
    };

    let result = run_pipeline(&def, &executor, &*reviewer, &cfg, config)?;
    println!(
        "{}",
        serde_json::to_string_pretty(&result).context("serialize result")?
    );
    Ok(exit_code(&result))
}

fn cmd_repair(input: &Path, output: &Path) -> Result<i32> {
    let raw = fs::read(input).with_context(|| format!("read {}", input.display()))?;
    let text = decode_output(&raw);
    let repaired = repair_text(&text);
    write_atomic(output, repaired.as_bytes())?;
    Ok(exit_codes::OK)
}

fn pipeline_config(def: &PipelineDefinition, args: &ParamArgs) -> Result<PipelineConfig> {
    let file = match &args.params {
        Some(path) => load_params_file(path)?,
        None => Default::default(),
    };
    let overrides = args
        .set
        .iter()
        .map(|raw| parse_override(raw))
        .collect::<Result<Vec<_>>>()?;
    build_config(def, file, overrides)
}

/// Terminal reviewer; with a timeout, it answers through a channel so an
/// unanswered gate resolves as a rejection.
fn terminal_reviewer(timeout: Option<Duration>) -> Box<dyn ReviewTransport> {
    let Some(timeout) = timeout else {
        return Box::new(TerminalReviewer::stdio());
    };
    let (transport, requests) = review_channel(Some(timeout));
    // Detached: a prompt still blocked on stdin must not hold up exit.
    std::thread::spawn(move || {
        let terminal = TerminalReviewer::stdio();
        for request in requests {
            let decision = await_decision(&terminal, &request.checkpoint);
            if let Err(err) = request.respond(decision) {
                warn!(err = %err, "late review answer dropped");
            }
        }
    });
    Box::new(transport)
}

fn exit_code(result: &PipelineResult) -> i32 {
    match result.status {
        RunStatus::Cancelled => exit_codes::CANCELLED,
        RunStatus::Failed => exit_codes::PHASE_FAILED,
        RunStatus::Completed if result.success => exit_codes::OK,
        RunStatus::Completed => exit_codes::UNSUCCESSFUL,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_init_force() {
        let cli = Cli::parse_from(["phasegate", "init", "--force"]);
        assert!(matches!(cli.command, Command::Init { force: true }));
    }

    #[test]
    fn parse_run_with_overrides() {
        let cli = Cli::parse_from([
            "phasegate",
            "run",
            "pipelines/memory-architecture.toml",
            "--set",
            "project_name=probe",
            "--set",
            "ram_budget_kb=512",
            "--yes",
            "-v",
        ]);
        assert!(cli.verbose);
        match cli.command {
            Command::Run {
                definition,
                params,
                yes,
                reject,
            } => {
                assert_eq!(definition, PathBuf::from("pipelines/memory-architecture.toml"));
                assert_eq!(params.set, vec!["project_name=probe", "ram_budget_kb=512"]);
                assert!(params.params.is_none());
                assert!(yes);
                assert!(!reject);
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn yes_and_reject_conflict() {
        let parsed = Cli::try_parse_from(["phasegate", "run", "p.toml", "--yes", "--reject"]);
        assert!(parsed.is_err());
    }

    #[test]
    fn parse_repair_paths() {
        let cli = Cli::parse_from(["phasegate", "repair", "--in", "a.txt", "--out", "b.txt"]);
        assert!(matches!(
            cli.command,
            Command::Repair { ref input, ref output }
                if input == Path::new("a.txt") && output == Path::new("b.txt")
        ));
    }

    #[test]
    fn repair_rewrites_utf16_mojibake() {
        let temp = tempfile::tempdir().expect("tempdir");
        let input = temp.path().join("in.txt");
        let output = temp.path().join("out.txt");
        let mut raw = vec![0xFF, 0xFE];
        for unit in "SRAM \u{00e2}\u{20ac}\u{201d} 128 KB".encode_utf16() {
            raw.extend_from_slice(&unit.to_le_bytes());
        }
        fs::write(&input, raw).expect("write");

        assert_eq!(cmd_repair(&input, &output).expect("repair"), exit_codes::OK);
        assert_eq!(fs::read_to_string(&output).expect("read"), "SRAM - 128 KB");
    }
}
