//! `rusty-scheduler` CLI entry-point.
//!
//! Available sub-commands:
//! - `validate` — check a workflow definition JSON file and print its
//!   execution order.
//! - `run`      — execute a workflow definition with the built-in task kinds
//!   and print the results as JSON.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use engine::{EngineConfig, TracingSink, WorkflowDefinition, WorkflowEngine};
use serde_json::Value;
use tasks::TaskRegistry;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "rusty-scheduler",
    about = "Dependency-aware workflow runner",
    version
)]
struct Cli {
    /// Log filter, e.g. `info` or `engine=debug`. Falls back to
    /// `RUSTY_SCHEDULER_LOG`, then `RUST_LOG`, then `info`.
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Validate a workflow definition JSON file.
    Validate {
        /// Path to the workflow JSON file.
        path: PathBuf,
    },
    /// Execute a workflow definition JSON file.
    Run {
        /// Path to the workflow JSON file.
        path: PathBuf,
        /// JSON value handed to every task as the run input.
        #[arg(long, default_value = "null")]
        input: String,
        #[command(flatten)]
        engine: EngineArgs,
    },
}

#[derive(Args, Debug)]
struct EngineArgs {
    /// Maximum number of tasks running at once (unbounded if unset).
    #[arg(long, env = "RUSTY_SCHEDULER_MAX_CONCURRENCY")]
    max_concurrency: Option<usize>,
    /// Per-attempt task deadline in milliseconds.
    #[arg(long, env = "RUSTY_SCHEDULER_TASK_TIMEOUT_MS")]
    task_timeout_ms: Option<u64>,
    /// Retries for tasks failing with a retryable error.
    #[arg(long, env = "RUSTY_SCHEDULER_MAX_RETRIES", default_value_t = 0)]
    max_retries: u32,
}

impl From<&EngineArgs> for EngineConfig {
    fn from(args: &EngineArgs) -> Self {
        EngineConfig {
            max_concurrency: args.max_concurrency,
            task_timeout: args.task_timeout_ms.map(Duration::from_millis),
            max_retries: args.max_retries,
            ..EngineConfig::default()
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.log_level.as_deref());

    match run(cli.command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("❌ {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(command: Command) -> Result<()> {
    match command {
        Command::Validate { path } => {
            let engine = load_engine(&path, EngineConfig::default())?;
            let order = engine.validate().context("validation failed")?;
            println!("✅ Workflow is valid. Execution order: {order:?}");
        }
        Command::Run {
            path,
            input,
            engine: args,
        } => {
            let input: Value =
                serde_json::from_str(&input).context("--input is not valid JSON")?;
            let mut engine = load_engine(&path, EngineConfig::from(&args))?;
            engine.add_sink(TracingSink);

            info!("Running workflow {}", path.display());
            match engine.execute(input).await {
                Ok(results) => {
                    let ordered: BTreeMap<_, _> = results.into_iter().collect();
                    println!("{}", serde_json::to_string_pretty(&ordered)?);
                }
                Err(e) => {
                    eprintln!("{}", serde_json::to_string_pretty(&engine.get_state())?);
                    return Err(anyhow::Error::new(e).context("workflow execution failed"));
                }
            }
        }
    }
    Ok(())
}

fn load_engine(path: &Path, config: EngineConfig) -> Result<WorkflowEngine> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read file {}", path.display()))?;
    let definition: WorkflowDefinition = serde_json::from_str(&content)
        .with_context(|| format!("invalid workflow JSON in {}", path.display()))?;

    WorkflowEngine::from_definition(&definition, &TaskRegistry::builtin(), config)
        .with_context(|| format!("cannot build workflow '{}'", definition.name))
}

/// Logs go to stderr so stdout carries only results.
fn init_tracing(cli_level: Option<&str>) {
    let filter = cli_level
        .map(EnvFilter::new)
        .or_else(|| {
            std::env::var("RUSTY_SCHEDULER_LOG")
                .ok()
                .map(EnvFilter::new)
        })
        .unwrap_or_else(|| {
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
        });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();
}
