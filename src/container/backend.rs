//! The container backend capability set.
//!
//! Sessions talk to containers only through [`ContainerBackend`], so the
//! Docker daemon can be swapped for another engine or for the in-process
//! fake used in tests.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::ContainerError;

/// Progress callback invoked during image pulls.
pub type PullProgress<'a> = &'a (dyn Fn(&str) + Send + Sync);

/// How a bind mount is exposed inside the container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountMode {
    ReadWrite,
    ReadOnly,
}

impl MountMode {
    fn flag(&self) -> &'static str {
        match self {
            MountMode::ReadWrite => "rw",
            MountMode::ReadOnly => "ro",
        }
    }
}

/// A host directory bound into the container.
#[derive(Debug, Clone)]
pub struct Mount {
    /// Absolute host path.
    pub host: PathBuf,
    /// Absolute path inside the container.
    pub container: String,
    pub mode: MountMode,
}

impl Mount {
    pub fn read_write(host: impl Into<PathBuf>, container: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            container: container.into(),
            mode: MountMode::ReadWrite,
        }
    }

    pub fn read_only(host: impl Into<PathBuf>, container: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            container: container.into(),
            mode: MountMode::ReadOnly,
        }
    }

    /// `host:container:mode` bind string as the Docker API expects it.
    pub fn bind_string(&self) -> String {
        format!(
            "{}:{}:{}",
            self.host.display(),
            self.container,
            self.mode.flag()
        )
    }
}

/// Everything needed to start one long-lived task container.
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    /// Container name, derived from the session id.
    pub name: String,
    /// Image reference.
    pub image: String,
    /// Bind mounts, workspace first.
    pub mounts: Vec<Mount>,
    /// `KEY=value` environment entries.
    pub env: Vec<String>,
    /// `uid:gid` of the host user, or `None` when unmappable.
    pub user: Option<String>,
    /// Main process; the session keeps the container alive with
    /// `sleep infinity` and works through exec.
    pub command: Vec<String>,
    /// Working directory for the main process and execs.
    pub working_dir: String,
}

impl LaunchSpec {
    /// Spec for a session container parked on `sleep infinity`.
    pub fn parked(name: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            image: image.into(),
            mounts: Vec::new(),
            env: Vec::new(),
            user: None,
            command: vec!["sleep".to_string(), "infinity".to_string()],
            working_dir: "/workspace".to_string(),
        }
    }
}

/// Opaque handle to a running container. Bound to a single session;
/// never shared across sessions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerHandle {
    pub(crate) id: String,
}

impl ContainerHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}

/// How an exec finished. Timeouts are an outcome, not an error: the
/// attempt records them and the partial output survives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecStatus {
    /// Process exited with this code.
    Exited(i64),
    /// Wall clock elapsed first; the in-container process tree was killed.
    TimedOut,
}

impl ExecStatus {
    pub fn passed(&self) -> bool {
        matches!(self, ExecStatus::Exited(0))
    }
}

/// Result of one exec: status plus merged stdout+stderr in arrival order.
#[derive(Debug, Clone)]
pub struct ExecOutcome {
    pub status: ExecStatus,
    pub output: Vec<u8>,
    pub duration: Duration,
}

impl ExecOutcome {
    /// Lossy UTF-8 view of the merged output.
    pub fn output_text(&self) -> String {
        String::from_utf8_lossy(&self.output).into_owned()
    }
}

/// Capability set every container engine must provide.
#[async_trait]
pub trait ContainerBackend: Send + Sync {
    /// Checks local presence of `image`; pulls it when absent and
    /// `auto_pull` is set, reporting progress through the callback.
    /// Returns [`ContainerError::ImageUnavailable`] when absent and
    /// pulling is disabled.
    async fn ensure_image(
        &self,
        image: &str,
        auto_pull: bool,
        progress: Option<PullProgress<'_>>,
    ) -> Result<(), ContainerError>;

    /// Creates and starts a container, returning its handle.
    async fn start(&self, spec: &LaunchSpec) -> Result<ContainerHandle, ContainerError>;

    /// Runs `argv` inside the container. Stdout and stderr are merged
    /// into one stream preserving arrival order. On timeout the
    /// in-container process tree is killed and the partial output is
    /// returned with [`ExecStatus::TimedOut`].
    async fn exec(
        &self,
        handle: &ContainerHandle,
        argv: &[String],
        timeout: Duration,
    ) -> Result<ExecOutcome, ContainerError>;

    /// Stops the container. Idempotent.
    async fn stop(&self, handle: &ContainerHandle) -> Result<(), ContainerError>;

    /// Force-removes the container.
    async fn remove(&self, handle: &ContainerHandle) -> Result<(), ContainerError>;
}
