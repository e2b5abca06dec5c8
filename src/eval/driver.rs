//! Multi-task eval driver: bounded worker pool, weighted scoring, and
//! a sealed output directory.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::config::{HarnessConfig, ImageResolver, DEFAULT_AGENT_TIMEOUT_SECONDS};
use crate::container::ContainerBackend;
use crate::error::EvalError;
use crate::eval::agents::{self, AgentSpec};
use crate::eval::score::{Scoreboard, TaskOutcome};
use crate::integrity;
use crate::session::{ts_ms, RunOptions, SessionRunner, SessionStatus};
use crate::store;
use crate::tasks::{project, ProjectMode, Task, TaskFilter, TaskRegistry, Tier};

/// Options for one eval run.
#[derive(Debug, Clone)]
pub struct EvalOptions {
    /// Agent name, resolved against built-ins and config.
    pub agent: String,
    /// Model passed through the agent's `model_flag`.
    pub model: Option<String>,
    /// Restrict to one tier; `None` means all.
    pub tier: Option<Tier>,
    /// Concurrent sessions.
    pub parallel: usize,
    /// Wall clock granted to the agent per task, in seconds.
    pub agent_timeout: u64,
}

impl Default for EvalOptions {
    fn default() -> Self {
        Self {
            agent: String::new(),
            model: None,
            tier: None,
            parallel: 1,
            agent_timeout: DEFAULT_AGENT_TIMEOUT_SECONDS,
        }
    }
}

/// Top-level record of one eval run; serialized as `summary.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvalRun {
    pub agent: String,
    #[serde(with = "ts_ms::option")]
    pub completed_at: Option<DateTime<Utc>>,
    pub model: Option<String>,
    pub outcomes: Vec<TaskOutcome>,
    pub score: Scoreboard,
    #[serde(with = "ts_ms")]
    pub started_at: DateTime<Utc>,
}

/// Leaderboard projection; serialized as `submission.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Submission {
    pub achieved: f64,
    pub agent: String,
    pub model: Option<String>,
    pub possible: f64,
    /// Reference -> passed.
    pub tasks: std::collections::BTreeMap<String, bool>,
}

/// One line of a dry-run plan.
#[derive(Debug, Clone, Serialize)]
pub struct PlannedTask {
    pub difficulty: String,
    pub image: String,
    pub reference: String,
    pub tier: String,
    pub weight: f64,
}

/// Shared accumulator; one mutex guards the `summary.json` writes.
struct Accumulator {
    outcomes: Mutex<Vec<TaskOutcome>>,
    eval_dir: PathBuf,
    run_header: EvalRun,
}

impl Accumulator {
    /// Records an outcome and persists a snapshot so partial results
    /// survive a cancelled or crashed run.
    fn record(&self, outcome: TaskOutcome) {
        let mut outcomes = self.outcomes.lock().unwrap();
        outcomes.push(outcome);
        let snapshot = EvalRun {
            outcomes: outcomes.clone(),
            score: Scoreboard::compute(&outcomes),
            ..self.run_header.clone()
        };
        if let Err(e) = store::write_json(&self.eval_dir.join("summary.json"), &snapshot) {
            error!(error = %e, "Failed to persist summary snapshot");
        }
    }

    fn into_outcomes(self) -> Vec<TaskOutcome> {
        self.outcomes.into_inner().unwrap()
    }
}

/// A queued task; `retried` marks the single allowed requeue after a
/// container-startup failure.
struct QueuedTask {
    task: Task,
    retried: bool,
}

/// Evaluates agents over the task registry.
pub struct EvalDriver {
    backend: Arc<dyn ContainerBackend>,
    config: HarnessConfig,
    shutdown: broadcast::Sender<()>,
}

impl EvalDriver {
    pub fn new(
        backend: Arc<dyn ContainerBackend>,
        config: HarnessConfig,
        shutdown: broadcast::Sender<()>,
    ) -> Self {
        Self {
            backend,
            config,
            shutdown,
        }
    }

    /// Selects tasks for an agent: registry ∩ language support ∩ tier.
    fn select_tasks(
        &self,
        registry: &TaskRegistry,
        agent: &AgentSpec,
        tier: Option<Tier>,
    ) -> Result<Vec<Task>, EvalError> {
        let filter = TaskFilter {
            tier,
            ..Default::default()
        };
        let tasks: Vec<Task> = registry
            .list(filter)
            .into_iter()
            .filter(|t| agent.supports(t.language))
            .cloned()
            .collect();
        if tasks.is_empty() {
            return Err(EvalError::NoTasks);
        }
        Ok(tasks)
    }

    /// Dry run: the selected tasks with weights and resolved images,
    /// no containers started.
    pub fn plan(
        &self,
        registry: &TaskRegistry,
        options: &EvalOptions,
    ) -> Result<Vec<PlannedTask>, EvalError> {
        let agent = agents::resolve_agent(&options.agent, &self.config)?;
        let resolver = ImageResolver::new(&self.config);
        Ok(self
            .select_tasks(registry, &agent, options.tier)?
            .iter()
            .map(|task| PlannedTask {
                difficulty: task.difficulty.to_string(),
                image: resolver.image(task.language),
                reference: task.reference(),
                tier: task.tier.to_string(),
                weight: task.effective_weight(),
            })
            .collect())
    }

    /// Runs the full evaluation and seals the output directory.
    pub async fn evaluate(
        &self,
        registry: &TaskRegistry,
        options: EvalOptions,
    ) -> Result<EvalRun, EvalError> {
        let agent = agents::resolve_agent(&options.agent, &self.config)?;
        let tasks = self.select_tasks(registry, &agent, options.tier)?;

        let started_at = Utc::now();
        let eval_dir = self.config.eval_dir.join(format!(
            "{}-{}",
            agent.name,
            started_at.format("%Y%m%d%H%M%S")
        ));
        std::fs::create_dir_all(&eval_dir)?;

        info!(
            agent = %agent.name,
            tasks = tasks.len(),
            parallel = options.parallel,
            dir = %eval_dir.display(),
            "Eval starting"
        );

        let accumulator = Arc::new(Accumulator {
            outcomes: Mutex::new(Vec::new()),
            eval_dir: eval_dir.clone(),
            run_header: EvalRun {
                agent: agent.name.clone(),
                completed_at: None,
                model: options.model.clone(),
                outcomes: Vec::new(),
                score: Scoreboard::default(),
                started_at,
            },
        });

        let queue: Arc<Mutex<VecDeque<QueuedTask>>> = Arc::new(Mutex::new(
            tasks
                .into_iter()
                .map(|task| QueuedTask {
                    task,
                    retried: false,
                })
                .collect(),
        ));

        let ctx = Arc::new(WorkerCtx {
            backend: Arc::clone(&self.backend),
            config: self.config.clone(),
            agent,
            model: options.model.clone(),
            agent_timeout: options.agent_timeout,
            eval_dir: eval_dir.clone(),
            shutdown: self.shutdown.clone(),
        });

        let mut workers = JoinSet::new();
        for worker_id in 0..options.parallel.max(1) {
            let ctx = Arc::clone(&ctx);
            let queue = Arc::clone(&queue);
            let accumulator = Arc::clone(&accumulator);
            workers.spawn(async move {
                worker_loop(worker_id, ctx, queue, accumulator).await;
            });
        }
        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Eval worker panicked");
            }
        }

        let accumulator = Arc::try_unwrap(accumulator)
            .unwrap_or_else(|_| unreachable!("workers joined"));
        let outcomes = accumulator.into_outcomes();
        let run = EvalRun {
            agent: options.agent.clone(),
            completed_at: Some(Utc::now()),
            model: options.model.clone(),
            score: Scoreboard::compute(&outcomes),
            outcomes,
            started_at,
        };

        store::write_json(&eval_dir.join("summary.json"), &run)?;
        store::write_json(&eval_dir.join("submission.json"), &submission(&run))?;
        std::fs::write(eval_dir.join("report.md"), render_eval_report(&run))?;
        integrity::seal(&eval_dir)?;

        info!(
            agent = %run.agent,
            achieved = run.score.overall.achieved,
            possible = run.score.overall.possible,
            "Eval complete"
        );
        Ok(run)
    }
}

/// Per-worker shared context.
struct WorkerCtx {
    backend: Arc<dyn ContainerBackend>,
    config: HarnessConfig,
    agent: AgentSpec,
    model: Option<String>,
    agent_timeout: u64,
    eval_dir: PathBuf,
    shutdown: broadcast::Sender<()>,
}

/// Pulls tasks off the queue until it drains or shutdown fires.
async fn worker_loop(
    worker_id: usize,
    ctx: Arc<WorkerCtx>,
    queue: Arc<Mutex<VecDeque<QueuedTask>>>,
    accumulator: Arc<Accumulator>,
) {
    let mut shutdown = ctx.shutdown.subscribe();
    loop {
        match shutdown.try_recv() {
            Ok(()) | Err(broadcast::error::TryRecvError::Closed) => {
                debug!(worker_id, "Eval worker received shutdown");
                break;
            }
            Err(broadcast::error::TryRecvError::Lagged(_)) => break,
            Err(broadcast::error::TryRecvError::Empty) => {}
        }

        let Some(item) = queue.lock().unwrap().pop_front() else {
            break;
        };
        let reference = item.task.reference();
        debug!(worker_id, task = %reference, "Worker picked task");

        match run_one(&ctx, &item.task).await {
            Ok(TaskRun {
                outcome,
                container_start_failed,
            }) => {
                if container_start_failed && !item.retried {
                    warn!(task = %reference, "Container startup failed, requeueing once");
                    queue.lock().unwrap().push_back(QueuedTask {
                        task: item.task,
                        retried: true,
                    });
                } else {
                    accumulator.record(outcome);
                }
            }
            Err(e) => {
                error!(task = %reference, error = %e, "Task evaluation failed");
                accumulator.record(TaskOutcome {
                    agent_exit_code: None,
                    agent_timed_out: false,
                    difficulty: item.task.difficulty,
                    passed: false,
                    reference,
                    session_id: String::new(),
                    status: SessionStatus::Error,
                    tier: item.task.tier,
                    weight: item.task.effective_weight(),
                });
            }
        }
    }
}

/// Outcome of one task plus the signal that allows a single requeue.
struct TaskRun {
    outcome: TaskOutcome,
    container_start_failed: bool,
}

/// One task: project stubs, run the agent, verify in eval mode.
async fn run_one(ctx: &WorkerCtx, task: &Task) -> Result<TaskRun, EvalError> {
    let task_dir = ctx.eval_dir.join(task.dir_name());
    let workspace = task_dir.join("workspace");
    std::fs::create_dir_all(&task_dir)?;

    // Fresh workspace with stubs only; hidden tests arrive after the
    // agent is done.
    project(task, ProjectMode::Run, &workspace)?;

    let prompt = agents::task_prompt(task);
    let log_path = task_dir.join("agent.log");
    let mut shutdown = ctx.shutdown.subscribe();
    let agent_run = tokio::select! {
        run = agents::invoke(
            &ctx.agent,
            &prompt,
            ctx.model.as_deref(),
            &workspace,
            std::time::Duration::from_secs(ctx.agent_timeout),
            &log_path,
        ) => match run {
            Ok(run) => Some(run),
            Err(e) => {
                // The agent never ran; verification still scores the task.
                warn!(task = %task.reference(), error = %e, "Agent invocation failed");
                None
            }
        },
        _ = shutdown.recv() => None,
    };

    // Verification: one eval-mode attempt over the agent's workspace.
    // Session files land next to agent.log, directly in the task dir.
    let runner = SessionRunner::new(
        Arc::clone(&ctx.backend),
        ctx.config.clone(),
        ctx.shutdown.clone(),
    );
    let session = runner
        .run(
            task,
            RunOptions {
                eval: true,
                workspace_override: Some(workspace),
                session_root_override: Some(task_dir.clone()),
                ..Default::default()
            },
        )
        .await
        .map_err(|e| EvalError::AgentFailed(format!("session: {e}")))?;

    let container_start_failed = session.status == SessionStatus::Error
        && session
            .error
            .as_deref()
            .is_some_and(|e| e.contains("startup failed"));

    Ok(TaskRun {
        outcome: TaskOutcome {
            agent_exit_code: agent_run.as_ref().and_then(|r| r.exit_code),
            agent_timed_out: agent_run.as_ref().is_some_and(|r| r.timed_out),
            difficulty: task.difficulty,
            passed: session.status == SessionStatus::Pass,
            reference: task.reference(),
            session_id: session.id.clone(),
            status: session.status,
            tier: task.tier,
            weight: task.effective_weight(),
        },
        container_start_failed,
    })
}

/// Leaderboard projection of a finished run.
pub fn submission(run: &EvalRun) -> Submission {
    Submission {
        achieved: run.score.overall.achieved,
        agent: run.agent.clone(),
        model: run.model.clone(),
        possible: run.score.overall.possible,
        tasks: run
            .outcomes
            .iter()
            .map(|o| (o.reference.clone(), o.passed))
            .collect(),
    }
}

/// Renders the human eval report.
pub fn render_eval_report(run: &EvalRun) -> String {
    let mut out = String::new();
    out.push_str(&format!("# Eval: {}\n\n", run.agent));
    if let Some(model) = &run.model {
        out.push_str(&format!("- Model: `{model}`\n"));
    }
    out.push_str(&format!(
        "- Score: **{:.2} / {:.2}** ({} of {} tasks passed)\n\n",
        run.score.overall.achieved,
        run.score.overall.possible,
        run.score.overall.passed,
        run.score.overall.total
    ));

    for (tier, totals) in &run.score.tiers {
        out.push_str(&format!(
            "- {tier}: {:.2} / {:.2}\n",
            totals.achieved, totals.possible
        ));
    }
    out.push('\n');

    out.push_str("| Task | Tier | Weight | Status |\n");
    out.push_str("|------|------|--------|--------|\n");
    for outcome in &run.outcomes {
        out.push_str(&format!(
            "| `{}` | {} | {:.1} | {} |\n",
            outcome.reference, outcome.tier, outcome.weight, outcome.status
        ));
    }
    out
}

/// Verifies a sealed eval directory; thin wrapper for the CLI.
pub fn verify_eval_dir(dir: &Path) -> Result<(), EvalError> {
    integrity::verify(dir)?;
    Ok(())
}
