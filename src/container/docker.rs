//! Docker daemon backend using the bollard crate.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, LogOutput, RemoveContainerOptions, StartContainerOptions,
    StopContainerOptions,
};
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::image::CreateImageOptions;
use bollard::models::HostConfig;
use bollard::Docker;
use futures::StreamExt;
use tracing::{debug, warn};

use crate::container::backend::{
    ContainerBackend, ContainerHandle, ExecOutcome, ExecStatus, LaunchSpec, PullProgress,
};
use crate::error::ContainerError;

/// Container backend over the local Docker daemon.
pub struct DockerBackend {
    docker: Docker,
}

impl DockerBackend {
    /// Connects to the local Docker daemon.
    ///
    /// # Errors
    ///
    /// Returns `ContainerError::DaemonUnavailable` if the daemon is not
    /// accessible.
    pub fn new() -> Result<Self, ContainerError> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| ContainerError::DaemonUnavailable(format!("Failed to connect: {e}")))?;
        Ok(Self { docker })
    }

    /// Wraps an existing bollard client.
    pub fn from_docker(docker: Docker) -> Self {
        Self { docker }
    }

    /// Best-effort kill of a timed-out exec's process tree.
    ///
    /// Bollard cannot abort a running exec, so we match on the command
    /// name from a second exec. The container's pid 1 (`sleep infinity`)
    /// is unaffected and stays usable for the next attempt.
    async fn kill_process_tree(&self, handle: &ContainerHandle, argv0: &str) {
        let script = format!("pkill -KILL -f '{argv0}' 2>/dev/null; true");
        let options = CreateExecOptions {
            cmd: Some(vec!["/bin/sh", "-c", script.as_str()]),
            attach_stdout: Some(false),
            attach_stderr: Some(false),
            ..Default::default()
        };

        let exec = match self.docker.create_exec(&handle.id, options).await {
            Ok(exec) => exec,
            Err(e) => {
                warn!(container = %handle.id, error = %e, "Failed to create kill exec");
                return;
            }
        };
        if let Err(e) = self.docker.start_exec(&exec.id, None).await {
            warn!(container = %handle.id, error = %e, "Failed to kill timed-out process");
        }
    }
}

#[async_trait]
impl ContainerBackend for DockerBackend {
    async fn ensure_image(
        &self,
        image: &str,
        auto_pull: bool,
        progress: Option<PullProgress<'_>>,
    ) -> Result<(), ContainerError> {
        if self.docker.inspect_image(image).await.is_ok() {
            return Ok(());
        }
        if !auto_pull {
            return Err(ContainerError::ImageUnavailable {
                image: image.to_string(),
            });
        }

        debug!(image, "Pulling image");
        let options = CreateImageOptions {
            from_image: image,
            ..Default::default()
        };
        let mut stream = self.docker.create_image(Some(options), None, None);
        while let Some(result) = stream.next().await {
            let info = result.map_err(|e| ContainerError::PullFailed {
                image: image.to_string(),
                message: e.to_string(),
            })?;
            if let (Some(cb), Some(status)) = (progress, info.status.as_deref()) {
                cb(status);
            }
        }
        Ok(())
    }

    async fn start(&self, spec: &LaunchSpec) -> Result<ContainerHandle, ContainerError> {
        let binds: Vec<String> = spec.mounts.iter().map(|m| m.bind_string()).collect();

        let host_config = HostConfig {
            binds: if binds.is_empty() { None } else { Some(binds) },
            ..Default::default()
        };

        let config = Config {
            image: Some(spec.image.clone()),
            cmd: Some(spec.command.clone()),
            env: if spec.env.is_empty() {
                None
            } else {
                Some(spec.env.clone())
            },
            working_dir: Some(spec.working_dir.clone()),
            user: spec.user.clone(),
            host_config: Some(host_config),
            tty: Some(false),
            attach_stdin: Some(false),
            attach_stdout: Some(false),
            attach_stderr: Some(false),
            ..Default::default()
        };

        let options = CreateContainerOptions {
            name: spec.name.clone(),
            platform: None,
        };

        let created = self
            .docker
            .create_container(Some(options), config)
            .await
            .map_err(|e| ContainerError::StartFailed(format!("create: {e}")))?;

        self.docker
            .start_container(&created.id, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| ContainerError::StartFailed(format!("start: {e}")))?;

        debug!(container = %created.id, image = %spec.image, "Container started");
        Ok(ContainerHandle::new(created.id))
    }

    async fn exec(
        &self,
        handle: &ContainerHandle,
        argv: &[String],
        timeout: Duration,
    ) -> Result<ExecOutcome, ContainerError> {
        let start = Instant::now();
        let cmd: Vec<&str> = argv.iter().map(String::as_str).collect();

        let exec_options = CreateExecOptions {
            cmd: Some(cmd),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            tty: Some(false),
            ..Default::default()
        };

        let exec = self
            .docker
            .create_exec(&handle.id, exec_options)
            .await
            .map_err(|e| ContainerError::Backend(format!("create exec: {e}")))?;

        let started = self
            .docker
            .start_exec(&exec.id, None)
            .await
            .map_err(|e| ContainerError::Backend(format!("start exec: {e}")))?;

        // Merged capture: bollard interleaves stdout/stderr frames in
        // arrival order, so appending preserves the relative ordering.
        let mut merged: Vec<u8> = Vec::new();
        let mut timed_out = false;
        let deadline = start + timeout;

        if let StartExecResults::Attached { mut output, .. } = started {
            loop {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    timed_out = true;
                    break;
                }
                match tokio::time::timeout(remaining, output.next()).await {
                    Ok(Some(Ok(LogOutput::StdOut { message })))
                    | Ok(Some(Ok(LogOutput::StdErr { message }))) => {
                        merged.extend_from_slice(&message);
                    }
                    Ok(Some(Ok(_))) => {}
                    Ok(Some(Err(e))) => {
                        return Err(ContainerError::Backend(format!("exec stream: {e}")));
                    }
                    Ok(None) => break,
                    Err(_) => {
                        timed_out = true;
                        break;
                    }
                }
            }
        }

        let duration = start.elapsed();

        if timed_out {
            if let Some(argv0) = argv.first() {
                self.kill_process_tree(handle, argv0).await;
            }
            return Ok(ExecOutcome {
                status: ExecStatus::TimedOut,
                output: merged,
                duration,
            });
        }

        let inspect = self
            .docker
            .inspect_exec(&exec.id)
            .await
            .map_err(|e| ContainerError::Backend(format!("inspect exec: {e}")))?;

        Ok(ExecOutcome {
            status: ExecStatus::Exited(inspect.exit_code.unwrap_or(-1)),
            output: merged,
            duration,
        })
    }

    async fn stop(&self, handle: &ContainerHandle) -> Result<(), ContainerError> {
        let options = StopContainerOptions { t: 5 };
        match self.docker.stop_container(&handle.id, Some(options)).await {
            Ok(()) => Ok(()),
            // Already stopped or already gone counts as stopped.
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 304 | 404,
                ..
            }) => Ok(()),
            Err(e) => Err(ContainerError::Backend(format!("stop: {e}"))),
        }
    }

    async fn remove(&self, handle: &ContainerHandle) -> Result<(), ContainerError> {
        let options = RemoveContainerOptions {
            force: true,
            v: true,
            ..Default::default()
        };
        match self
            .docker
            .remove_container(&handle.id, Some(options))
            .await
        {
            Ok(()) => Ok(()),
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(()),
            Err(e) => Err(ContainerError::Backend(format!("remove: {e}"))),
        }
    }
}
