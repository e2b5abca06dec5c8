//! CLI command definitions and dispatch.

use std::path::PathBuf;
use std::process::ExitCode;
use std::str::FromStr;
use std::sync::Arc;

use clap::Parser;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use crate::config::HarnessConfig;
use crate::container::DockerBackend;
use crate::error::{EvalError, IntegrityError, TaskError};
use crate::eval::{EvalDriver, EvalOptions};
use crate::session::{RunOptions, SessionRunner, SessionStatus};
use crate::store::{render_report, SessionDirs};
use crate::tasks::{project, Difficulty, Language, ProjectMode, TaskFilter, TaskRegistry, Tier};

/// Sanity harness: evaluate coding agents on compact hard problems.
#[derive(Parser)]
#[command(name = "sanity")]
#[command(about = "Run compact hard problems against coding agents in hermetic containers")]
#[command(version)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "warn", global = true)]
    pub log_level: String,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// List available tasks.
    List(ListArgs),

    /// Create a workspace with a task's stub files.
    Init(InitArgs),

    /// Run a task's tests against a workspace, once or in watch mode.
    Run(RunArgs),

    /// Evaluate an agent over the task set.
    Eval(EvalArgs),

    /// Show a recorded session.
    Show(ShowArgs),

    /// Verify the attestation of an eval directory.
    Verify(VerifyArgs),

    /// Delete recorded session (and optionally eval) directories.
    Clean(CleanArgs),

    /// Print the harness version.
    Version,
}

#[derive(Parser, Debug)]
pub struct ListArgs {
    /// Filter by language.
    #[arg(long)]
    pub language: Option<String>,

    /// Filter by tier (core, extended).
    #[arg(long)]
    pub tier: Option<String>,

    /// Filter by difficulty (hard, expert).
    #[arg(long)]
    pub difficulty: Option<String>,

    /// Emit JSON instead of a table.
    #[arg(long)]
    pub json: bool,
}

#[derive(Parser, Debug)]
pub struct InitArgs {
    /// Task reference: `<language>/<slug>` or a unique bare slug.
    pub reference: String,

    /// Output directory; defaults to `./<language>-<slug>`.
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Task reference: `<language>/<slug>` or a unique bare slug.
    pub reference: String,

    /// Workspace directory; defaults to a fresh session workspace.
    #[arg(short, long)]
    pub workspace: Option<PathBuf>,

    /// Re-run on workspace changes until pass or attempts exhaust.
    #[arg(long)]
    pub watch: bool,

    /// Per-attempt timeout in seconds.
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Attempt bound for this session.
    #[arg(long)]
    pub max_attempts: Option<u32>,
}

#[derive(Parser, Debug)]
pub struct EvalArgs {
    /// Agent name: built-in or `[agents.<name>]` from config.
    #[arg(long)]
    pub agent: String,

    /// Model name passed through the agent's model flag.
    #[arg(long)]
    pub model: Option<String>,

    /// Tier to evaluate: all, core, or extended.
    #[arg(long, default_value = "all")]
    pub tier: String,

    /// Concurrent sessions.
    #[arg(long, default_value_t = 4)]
    pub parallel: usize,

    /// Wall-clock seconds granted to the agent per task.
    #[arg(long, default_value_t = crate::config::DEFAULT_AGENT_TIMEOUT_SECONDS)]
    pub agent_timeout: u64,

    /// List the selected tasks and images without running anything.
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Parser, Debug)]
pub struct ShowArgs {
    /// Session directory to show.
    pub session_dir: PathBuf,

    /// Emit the stored result.json verbatim.
    #[arg(long)]
    pub json: bool,
}

#[derive(Parser, Debug)]
pub struct VerifyArgs {
    /// Sealed eval directory.
    pub eval_dir: PathBuf,
}

#[derive(Parser, Debug)]
pub struct CleanArgs {
    /// Also delete eval result directories.
    #[arg(long)]
    pub all: bool,

    /// Actually delete; without this flag only lists what would go.
    #[arg(long)]
    pub force: bool,
}

/// Parses CLI arguments; split out so `main` can read the log level
/// before dispatching.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Dispatches the parsed command. The returned exit code encodes the
/// documented per-command contract.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<ExitCode> {
    let config = HarnessConfig::load()?;
    match cli.command {
        Commands::List(args) => cmd_list(args),
        Commands::Init(args) => cmd_init(args),
        Commands::Run(args) => cmd_run(args, config).await,
        Commands::Eval(args) => cmd_eval(args, config).await,
        Commands::Show(args) => cmd_show(args),
        Commands::Verify(args) => cmd_verify(args),
        Commands::Clean(args) => cmd_clean(args, config),
        Commands::Version => {
            println!("sanity {}", env!("CARGO_PKG_VERSION"));
            Ok(ExitCode::SUCCESS)
        }
    }
}

#[derive(Serialize)]
struct TaskRow {
    difficulty: String,
    language: String,
    reference: String,
    tier: String,
    weight: f64,
}

fn cmd_list(args: ListArgs) -> anyhow::Result<ExitCode> {
    let registry = TaskRegistry::load()?;
    let filter = TaskFilter {
        language: args
            .language
            .as_deref()
            .map(Language::from_str)
            .transpose()?,
        tier: args.tier.as_deref().map(Tier::from_str).transpose()?,
        difficulty: args
            .difficulty
            .as_deref()
            .map(Difficulty::from_str)
            .transpose()?,
    };

    let rows: Vec<TaskRow> = registry
        .list(filter)
        .into_iter()
        .map(|task| TaskRow {
            difficulty: task.difficulty.to_string(),
            language: task.language.to_string(),
            reference: task.reference(),
            tier: task.tier.to_string(),
            weight: task.effective_weight(),
        })
        .collect();

    if args.json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
    } else {
        println!("{:<32} {:<10} {:<9} {:>6}", "TASK", "TIER", "DIFF", "WEIGHT");
        for row in &rows {
            println!(
                "{:<32} {:<10} {:<9} {:>6.1}",
                row.reference, row.tier, row.difficulty, row.weight
            );
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn cmd_init(args: InitArgs) -> anyhow::Result<ExitCode> {
    let registry = TaskRegistry::load()?;
    let task = match registry.resolve(&args.reference) {
        Ok(task) => task,
        Err(TaskError::Ambiguous { slug, matches }) => {
            error!(%slug, %matches, "Bare slug is ambiguous");
            eprintln!("error: slug '{slug}' is ambiguous, matches: {matches}");
            return Ok(ExitCode::from(3));
        }
        Err(TaskError::NotFound(reference)) => {
            eprintln!("error: task '{reference}' not found");
            return Ok(ExitCode::from(2));
        }
        Err(e) => return Err(e.into()),
    };

    let output = args
        .output
        .unwrap_or_else(|| PathBuf::from(task.dir_name()));
    project(task, ProjectMode::Run, &output)?;
    println!("Initialized {} in {}", task.reference(), output.display());
    if !task.description.is_empty() {
        println!("\n{}", task.description.trim_end());
    }
    Ok(ExitCode::SUCCESS)
}

/// Wires Ctrl-C into the shutdown broadcast.
fn shutdown_channel() -> broadcast::Sender<()> {
    let (tx, _) = broadcast::channel(4);
    let handler = tx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling");
            let _ = handler.send(());
        }
    });
    tx
}

async fn cmd_run(args: RunArgs, config: HarnessConfig) -> anyhow::Result<ExitCode> {
    let registry = TaskRegistry::load()?;
    let task = match registry.resolve(&args.reference) {
        Ok(task) => task.clone(),
        Err(TaskError::Ambiguous { slug, matches }) => {
            eprintln!("error: slug '{slug}' is ambiguous, matches: {matches}");
            return Ok(ExitCode::from(3));
        }
        Err(TaskError::NotFound(reference)) => {
            eprintln!("error: task '{reference}' not found");
            return Ok(ExitCode::from(2));
        }
        Err(e) => return Err(e.into()),
    };

    let backend = match DockerBackend::new() {
        Ok(backend) => Arc::new(backend),
        Err(e) => {
            eprintln!("error: {e}");
            return Ok(ExitCode::from(3));
        }
    };

    let runner = SessionRunner::new(backend, config, shutdown_channel());
    let options = RunOptions {
        watch: args.watch,
        timeout_override: args.timeout,
        max_attempts_override: args.max_attempts,
        workspace_override: args.workspace,
        ..Default::default()
    };

    let session = match runner.run(&task, options).await {
        Ok(session) => session,
        Err(e) => {
            error!(error = %e, "Session failed before running");
            eprintln!("error: {e}");
            return Ok(ExitCode::from(3));
        }
    };

    println!("{}", render_report(&session));
    info!(session = %session.id, status = %session.status, "Run finished");
    Ok(match session.status {
        SessionStatus::Pass => ExitCode::SUCCESS,
        SessionStatus::Fail => ExitCode::from(1),
        SessionStatus::Timeout => ExitCode::from(2),
        SessionStatus::Error => ExitCode::from(3),
    })
}

async fn cmd_eval(args: EvalArgs, config: HarnessConfig) -> anyhow::Result<ExitCode> {
    let registry = TaskRegistry::load()?;
    let tier = match args.tier.as_str() {
        "all" => None,
        other => Some(Tier::from_str(other)?),
    };
    let options = EvalOptions {
        agent: args.agent,
        model: args.model,
        tier,
        parallel: args.parallel,
        agent_timeout: args.agent_timeout,
    };

    if args.dry_run {
        // No containers: the plan needs no backend either, but the
        // driver owns task selection, so hand it a disconnected one.
        let backend = Arc::new(crate::container::fake::FakeBackend::new());
        let (shutdown, _) = broadcast::channel(1);
        let driver = EvalDriver::new(backend, config, shutdown);
        let plan = driver.plan(&registry, &options)?;
        println!("{}", serde_json::to_string_pretty(&plan)?);
        return Ok(ExitCode::SUCCESS);
    }

    let backend = Arc::new(DockerBackend::new()?);
    let driver = EvalDriver::new(backend, config, shutdown_channel());
    let run = match driver.evaluate(&registry, options).await {
        Ok(run) => run,
        Err(e) => {
            eprintln!("error: {e}");
            return Ok(ExitCode::from(eval_error_exit(&e)));
        }
    };

    println!(
        "{}: {:.2} / {:.2} ({} of {} tasks passed)",
        run.agent,
        run.score.overall.achieved,
        run.score.overall.possible,
        run.score.overall.passed,
        run.score.overall.total
    );
    // Per-task failures are outcomes, not driver errors.
    Ok(ExitCode::SUCCESS)
}

fn cmd_show(args: ShowArgs) -> anyhow::Result<ExitCode> {
    let dirs = SessionDirs::open(&args.session_dir);
    if args.json {
        // Emitted verbatim so the bytes match what was hashed.
        let bytes = dirs.read_result_bytes()?;
        use std::io::Write;
        std::io::stdout().write_all(&bytes)?;
    } else {
        let session = dirs.read_result()?;
        println!("{}", render_report(&session));
    }
    Ok(ExitCode::SUCCESS)
}

fn cmd_verify(args: VerifyArgs) -> anyhow::Result<ExitCode> {
    match crate::integrity::verify(&args.eval_dir) {
        Ok(()) => {
            println!("ok: {} verifies", args.eval_dir.display());
            Ok(ExitCode::SUCCESS)
        }
        Err(
            e @ (IntegrityError::Mismatch { .. }
            | IntegrityError::MissingFile { .. }
            | IntegrityError::ExtraFile { .. }
            | IntegrityError::AggregateMismatch
            | IntegrityError::NoAttestation(_)),
        ) => {
            eprintln!("integrity mismatch: {e}");
            Ok(ExitCode::from(1))
        }
        Err(e) => Err(e.into()),
    }
}

fn cmd_clean(args: CleanArgs, config: HarnessConfig) -> anyhow::Result<ExitCode> {
    let mut roots = vec![config.session_dir.clone()];
    if args.all {
        roots.push(config.eval_dir.clone());
    }

    for root in roots {
        if !root.is_dir() {
            continue;
        }
        for entry in std::fs::read_dir(&root)? {
            let path = entry?.path();
            if !path.is_dir() {
                continue;
            }
            if args.force {
                std::fs::remove_dir_all(&path)?;
                println!("removed {}", path.display());
            } else {
                println!("would remove {} (pass --force)", path.display());
            }
        }
    }
    Ok(ExitCode::SUCCESS)
}

/// Maps driver-level eval errors onto the documented nonzero exits.
pub fn eval_error_exit(e: &EvalError) -> u8 {
    match e {
        EvalError::UnknownAgent(_) | EvalError::NoTasks => 2,
        _ => 3,
    }
}
