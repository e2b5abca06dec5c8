//! In-process container backend for tests.
//!
//! Records every call and replays scripted exec outcomes, so the session
//! runner and eval driver are testable without a Docker daemon.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::container::backend::{
    ContainerBackend, ContainerHandle, ExecOutcome, ExecStatus, LaunchSpec, PullProgress,
};
use crate::error::ContainerError;

/// One scripted exec result.
#[derive(Debug, Clone)]
pub struct CannedExec {
    pub status: ExecStatus,
    pub output: Vec<u8>,
}

impl CannedExec {
    pub fn pass(output: impl Into<Vec<u8>>) -> Self {
        Self {
            status: ExecStatus::Exited(0),
            output: output.into(),
        }
    }

    pub fn fail(code: i64, output: impl Into<Vec<u8>>) -> Self {
        Self {
            status: ExecStatus::Exited(code),
            output: output.into(),
        }
    }

    pub fn timeout(partial_output: impl Into<Vec<u8>>) -> Self {
        Self {
            status: ExecStatus::TimedOut,
            output: partial_output.into(),
        }
    }
}

#[derive(Default)]
struct FakeState {
    canned: VecDeque<CannedExec>,
    started: Vec<LaunchSpec>,
    execs: Vec<Vec<String>>,
    stopped: Vec<String>,
    removed: Vec<String>,
    start_failures_remaining: u32,
    missing_images: Vec<String>,
}

/// Scriptable backend that never touches a real container engine.
pub struct FakeBackend {
    state: Mutex<FakeState>,
    next_id: AtomicU64,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(FakeState::default()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Queues the next exec outcome. Outcomes replay in FIFO order;
    /// when the queue is empty, execs succeed with empty output.
    pub fn push_exec(&self, canned: CannedExec) {
        self.state.lock().unwrap().canned.push_back(canned);
    }

    /// Makes the next `n` `start` calls fail.
    pub fn fail_next_starts(&self, n: u32) {
        self.state.lock().unwrap().start_failures_remaining = n;
    }

    /// Marks an image as locally absent and unpullable.
    pub fn mark_image_missing(&self, image: impl Into<String>) {
        self.state.lock().unwrap().missing_images.push(image.into());
    }

    pub fn started_specs(&self) -> Vec<LaunchSpec> {
        self.state.lock().unwrap().started.clone()
    }

    pub fn exec_calls(&self) -> Vec<Vec<String>> {
        self.state.lock().unwrap().execs.clone()
    }

    pub fn stopped_ids(&self) -> Vec<String> {
        self.state.lock().unwrap().stopped.clone()
    }

    pub fn removed_ids(&self) -> Vec<String> {
        self.state.lock().unwrap().removed.clone()
    }
}

impl Default for FakeBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContainerBackend for FakeBackend {
    async fn ensure_image(
        &self,
        image: &str,
        auto_pull: bool,
        _progress: Option<PullProgress<'_>>,
    ) -> Result<(), ContainerError> {
        let state = self.state.lock().unwrap();
        if state.missing_images.iter().any(|i| i == image) && !auto_pull {
            return Err(ContainerError::ImageUnavailable {
                image: image.to_string(),
            });
        }
        Ok(())
    }

    async fn start(&self, spec: &LaunchSpec) -> Result<ContainerHandle, ContainerError> {
        let mut state = self.state.lock().unwrap();
        if state.start_failures_remaining > 0 {
            state.start_failures_remaining -= 1;
            return Err(ContainerError::StartFailed("scripted failure".to_string()));
        }
        state.started.push(spec.clone());
        let id = format!("fake-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        Ok(ContainerHandle::new(id))
    }

    async fn exec(
        &self,
        _handle: &ContainerHandle,
        argv: &[String],
        _timeout: Duration,
    ) -> Result<ExecOutcome, ContainerError> {
        let canned = {
            let mut state = self.state.lock().unwrap();
            state.execs.push(argv.to_vec());
            state.canned.pop_front()
        };
        let canned = canned.unwrap_or_else(|| CannedExec::pass(Vec::new()));
        Ok(ExecOutcome {
            status: canned.status,
            output: canned.output,
            duration: Duration::from_millis(1),
        })
    }

    async fn stop(&self, handle: &ContainerHandle) -> Result<(), ContainerError> {
        self.state
            .lock()
            .unwrap()
            .stopped
            .push(handle.id().to_string());
        Ok(())
    }

    async fn remove(&self, handle: &ContainerHandle) -> Result<(), ContainerError> {
        self.state
            .lock()
            .unwrap()
            .removed
            .push(handle.id().to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_outcomes_replay_in_order() {
        let backend = FakeBackend::new();
        backend.push_exec(CannedExec::fail(1, "boom"));
        backend.push_exec(CannedExec::pass("ok"));

        let handle = backend
            .start(&LaunchSpec::parked("t", "img"))
            .await
            .unwrap();

        let first = backend
            .exec(&handle, &["go".into()], Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(first.status, ExecStatus::Exited(1));
        assert_eq!(first.output_text(), "boom");

        let second = backend
            .exec(&handle, &["go".into()], Duration::from_secs(1))
            .await
            .unwrap();
        assert!(second.status.passed());
    }

    #[tokio::test]
    async fn test_start_failures_and_cleanup_recording() {
        let backend = FakeBackend::new();
        backend.fail_next_starts(1);

        let spec = LaunchSpec::parked("t", "img");
        assert!(backend.start(&spec).await.is_err());
        let handle = backend.start(&spec).await.unwrap();

        backend.stop(&handle).await.unwrap();
        backend.remove(&handle).await.unwrap();

        assert_eq!(backend.started_specs().len(), 1);
        assert_eq!(backend.stopped_ids(), vec![handle.id().to_string()]);
        assert_eq!(backend.removed_ids(), vec![handle.id().to_string()]);
    }

    #[tokio::test]
    async fn test_missing_image() {
        let backend = FakeBackend::new();
        backend.mark_image_missing("ghost:latest");

        let err = backend
            .ensure_image("ghost:latest", false, None)
            .await
            .unwrap_err();
        assert!(matches!(err, ContainerError::ImageUnavailable { .. }));

        // Pull allowed: treated as a successful pull.
        assert!(backend.ensure_image("ghost:latest", true, None).await.is_ok());
    }
}
