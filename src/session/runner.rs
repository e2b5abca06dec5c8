//! Session runner: one task, one container, a bounded attempt loop.
//!
//! ```text
//! NEW → PREPARING → CONTAINER_UP → ATTEMPTING ⇄ WAITING → DONE
//!                         │                               ▲
//!                         └── (setup error) ──────────────┘
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::config::{host_user, HarnessConfig, ImageResolver};
use crate::container::{ContainerBackend, ContainerHandle, LaunchSpec, Mount};
use crate::error::SessionError;
use crate::session::types::{Attempt, Session, SessionConfig, SessionMode};
use crate::store::SessionDirs;
use crate::summary::Summarizer;
use crate::tasks::{project, ProjectMode, Task};
use crate::watcher::{hidden_file_names, WorkspaceWatcher};

/// Where the workspace is mounted inside every task container.
const CONTAINER_WORKSPACE: &str = "/workspace";

/// Per-session run options on top of the merged config.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Eval mode projects hidden files and defaults to one attempt.
    pub eval: bool,
    /// Loop on workspace changes until pass or attempts exhausted.
    pub watch: bool,
    /// Overrides the task/config timeout.
    pub timeout_override: Option<u64>,
    /// Overrides the configured attempt bound.
    pub max_attempts_override: Option<u32>,
    /// Run against an existing workspace instead of a fresh one.
    /// Stubs are only projected when the directory is empty.
    pub workspace_override: Option<PathBuf>,
    /// Write session files directly under this directory instead of
    /// `<session_dir>/<session-id>/`. The eval driver roots each
    /// verification session at its `<language-slug>/` task directory.
    pub session_root_override: Option<PathBuf>,
}

/// Runs sessions against a container backend.
pub struct SessionRunner {
    backend: Arc<dyn ContainerBackend>,
    config: HarnessConfig,
    summarizer: Summarizer,
    shutdown: broadcast::Sender<()>,
}

impl SessionRunner {
    /// Creates a runner. `shutdown` cascades a cancellation signal into
    /// every blocking point of every session started from this runner.
    pub fn new(
        backend: Arc<dyn ContainerBackend>,
        config: HarnessConfig,
        shutdown: broadcast::Sender<()>,
    ) -> Self {
        Self {
            backend,
            config,
            summarizer: Summarizer::new(),
            shutdown,
        }
    }

    /// Runs one session to completion and persists its artifacts.
    ///
    /// Infrastructure failures seal the session with status `error`
    /// rather than surfacing as `Err`; only failures to create the
    /// session directory itself escape.
    pub async fn run(&self, task: &Task, options: RunOptions) -> Result<Session, SessionError> {
        // PREPARING
        let mode = if options.eval {
            SessionMode::Eval
        } else {
            SessionMode::Run
        };
        let timeout_seconds = options
            .timeout_override
            .unwrap_or_else(|| task.effective_timeout(self.config.default_timeout));
        let max_attempts = match (options.eval, options.max_attempts_override) {
            (_, Some(n)) => n,
            (true, None) => 1,
            (false, None) => self.config.max_attempts,
        };

        let resolver = ImageResolver::new(&self.config);
        let session_config = SessionConfig {
            image: resolver.image(task.language),
            max_attempts,
            mode,
            timeout_seconds,
            watch: options.watch,
        };
        let mut session = Session::new(task, session_config);

        let mut dirs = match &options.session_root_override {
            Some(root) => SessionDirs::create_at(root.clone()),
            None => SessionDirs::create(&self.config.session_dir, &session.id),
        }
        .map_err(SessionError::Store)?;
        if let Some(workspace) = &options.workspace_override {
            dirs.workspace = workspace.clone();
        }

        info!(session = %session.id, task = %task.reference(), "Session starting");

        match self.drive(task, &options, &mut session, &dirs).await {
            Ok(()) => session.finish(),
            Err(SessionError::Cancelled) => {
                info!(session = %session.id, "Session cancelled");
                session.finish();
            }
            Err(e) => {
                warn!(session = %session.id, error = %e, "Session failed");
                session.finish_error(e.to_string());
            }
        }

        dirs.write_result(&session)?;
        dirs.write_report(&session)?;
        info!(session = %session.id, status = %session.status, "Session complete");
        Ok(session)
    }

    /// Everything between PREPARING and DONE. The caller seals the
    /// session and persists artifacts regardless of the outcome here.
    async fn drive(
        &self,
        task: &Task,
        options: &RunOptions,
        session: &mut Session,
        dirs: &SessionDirs,
    ) -> Result<(), SessionError> {
        let mut shutdown = self.shutdown.subscribe();

        self.prepare_workspace(task, options, dirs)?;

        let resolver = ImageResolver::new(&self.config);
        self.backend
            .ensure_image(&session.config.image, self.config.auto_pull, None)
            .await?;

        // CONTAINER_UP
        let spec = self.launch_spec(task, session, dirs, &resolver)?;
        let handle = tokio::select! {
            started = self.start_with_retry(&spec) => started?,
            _ = shutdown.recv() => return Err(SessionError::Cancelled),
        };

        let result = self
            .attempt_loop(task, session, dirs, &handle, &mut shutdown)
            .await;

        // DONE: release the container on every exit path.
        self.teardown(&handle).await;
        result
    }

    fn prepare_workspace(
        &self,
        task: &Task,
        options: &RunOptions,
        dirs: &SessionDirs,
    ) -> Result<(), SessionError> {
        let project_mode = if options.eval {
            ProjectMode::Eval
        } else {
            ProjectMode::Run
        };

        // An externally provided workspace carries the agent's edits;
        // re-projecting stubs over those would destroy them. Hidden
        // eval files are still projected on top.
        let externally_populated = options.workspace_override.is_some()
            && dirs
                .workspace
                .read_dir()
                .map(|mut entries| entries.next().is_some())
                .unwrap_or(false);

        if externally_populated {
            if options.eval {
                let hidden_only = Task {
                    stub_files: task.hidden_files.clone(),
                    hidden_files: Default::default(),
                    ..task.clone()
                };
                if !hidden_only.stub_files.is_empty() {
                    project(&hidden_only, ProjectMode::Run, &dirs.workspace)
                        .map_err(|e| SessionError::Workspace(e.to_string()))?;
                }
            }
            debug!(workspace = %dirs.workspace.display(), "Reusing populated workspace");
            return Ok(());
        }

        project(task, project_mode, &dirs.workspace)
            .map_err(|e| SessionError::Workspace(e.to_string()))
    }

    fn launch_spec(
        &self,
        task: &Task,
        session: &Session,
        dirs: &SessionDirs,
        resolver: &ImageResolver<'_>,
    ) -> Result<LaunchSpec, SessionError> {
        let mut spec = LaunchSpec::parked(format!("sanity-{}", session.id), &session.config.image);

        let workspace = dirs
            .workspace
            .canonicalize()
            .map_err(|e| SessionError::Workspace(format!("workspace path: {e}")))?;
        spec.mounts
            .push(Mount::read_write(workspace, CONTAINER_WORKSPACE));

        let cache = resolver
            .cache_dir(task.language)
            .map_err(|e| SessionError::Workspace(format!("cache dir: {e}")))?;
        spec.mounts.push(Mount::read_write(
            cache,
            format!("{CONTAINER_WORKSPACE}/.sanity-cache"),
        ));

        let mounts = resolver.mounts();
        for host in mounts.writable.into_iter().chain(mounts.shared_readwrite) {
            let container = host.to_string_lossy().into_owned();
            spec.mounts.push(Mount::read_write(host, container));
        }
        for host in mounts.shared_readonly {
            let container = host.to_string_lossy().into_owned();
            spec.mounts.push(Mount::read_only(host, container));
        }

        spec.env.push(format!("HOME={CONTAINER_WORKSPACE}"));
        spec.user = host_user();
        if spec.user.is_none() {
            warn!(
                session = %session.id,
                "Host uid:gid unavailable, container runs as image default user"
            );
        }
        Ok(spec)
    }

    /// Starts the container, retrying once. Two consecutive failures
    /// abort the session.
    async fn start_with_retry(&self, spec: &LaunchSpec) -> Result<ContainerHandle, SessionError> {
        match self.backend.start(spec).await {
            Ok(handle) => Ok(handle),
            Err(first) => {
                warn!(error = %first, "Container start failed, retrying once");
                self.backend
                    .start(spec)
                    .await
                    .map_err(|second| SessionError::ContainerStartExhausted(second.to_string()))
            }
        }
    }

    /// ATTEMPTING ⇄ WAITING until pass, exhaustion, or cancellation.
    async fn attempt_loop(
        &self,
        task: &Task,
        session: &mut Session,
        dirs: &SessionDirs,
        handle: &ContainerHandle,
        shutdown: &mut broadcast::Receiver<()>,
    ) -> Result<(), SessionError> {
        let timeout = Duration::from_secs(session.config.timeout_seconds);

        let mut watcher = if session.config.watch {
            Some(
                WorkspaceWatcher::start(&dirs.workspace, hidden_file_names(task.hidden_files.keys()))
                    .map_err(|e| SessionError::Watcher(e.to_string()))?,
            )
        } else {
            None
        };

        let result = loop {
            let number = session.next_attempt_number();
            debug!(session = %session.id, attempt = number, "Running test command");

            let outcome = tokio::select! {
                outcome = self.backend.exec(handle, &task.test_command, timeout) => outcome?,
                _ = shutdown.recv() => break Err(SessionError::Cancelled),
            };

            let output_text = outcome.output_text();
            let summary = if outcome.status.passed() {
                Vec::new()
            } else {
                self.summarizer.summarize(task.language, &output_text)
            };
            let attempt = Attempt::from_exec(
                number,
                outcome.status,
                outcome.output,
                outcome.duration.as_millis() as u64,
                summary,
            );
            // Flushed before the next attempt can start.
            dirs.write_attempt_log(&attempt)?;
            let passed = attempt.passed;
            session.push_attempt(attempt);

            if passed {
                break Ok(());
            }
            if session.attempts.len() as u32 >= session.config.max_attempts {
                debug!(session = %session.id, "Attempt budget exhausted");
                break Ok(());
            }

            // WAITING: only watch mode loops; the workspace is never
            // wiped between attempts.
            let Some(active_watcher) = watcher.as_mut() else {
                break Ok(());
            };
            info!(session = %session.id, "Waiting for workspace changes");
            tokio::select! {
                changed = active_watcher.changed() => {
                    if changed.is_none() {
                        break Ok(());
                    }
                }
                _ = shutdown.recv() => break Err(SessionError::Cancelled),
            }
        };

        if let Some(watcher) = watcher.take() {
            watcher.stop();
        }
        result
    }

    /// Stop and force-remove; both idempotent, failures only logged.
    async fn teardown(&self, handle: &ContainerHandle) {
        if let Err(e) = self.backend.stop(handle).await {
            warn!(container = %handle.id(), error = %e, "Container stop failed");
        }
        if let Err(e) = self.backend.remove(handle).await {
            warn!(container = %handle.id(), error = %e, "Container remove failed");
        }
    }
}
