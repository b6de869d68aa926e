use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use codegate_config::SandboxConfig;
use uuid::Uuid;

use super::process::{ProcessOptions, ProcessRunner};
use super::{IsolationRequest, IsolationRuntime, RawOutcome, SandboxError};
use crate::artifact::Language;

/// `docker run` exits with 125 when the daemon could not create the
/// container at all.
const DOCKER_CREATE_FAILED: i32 = 125;
const REMOVE_TIMEOUT: Duration = Duration::from_secs(15);
const MOUNT_POINT: &str = "/workspace";

/// Runs the harness in a throwaway container via a docker-compatible CLI.
///
/// The workspace is bind-mounted read-only, the root filesystem is
/// read-only with a small `/tmp` tmpfs, every capability is dropped and
/// networking is disabled unless the policy grants it.
#[derive(Debug, Clone)]
pub struct ContainerRuntime {
    binary: String,
    python_image: String,
    javascript_image: String,
}

impl ContainerRuntime {
    pub fn from_config(config: &SandboxConfig) -> Self {
        Self {
            binary: config.container_binary.clone(),
            python_image: config.python.image.clone(),
            javascript_image: config.javascript.image.clone(),
        }
    }

    fn image(&self, language: Language) -> &str {
        match language {
            Language::Python => &self.python_image,
            Language::JavaScript => &self.javascript_image,
        }
    }

    /// Arguments for `docker run`, excluding the binary itself.
    pub fn run_args(&self, name: &str, request: &IsolationRequest) -> Vec<String> {
        let mut args: Vec<String> = [
            "run",
            "--rm",
            "--name",
            name,
            "--network",
            if request.network_access { "bridge" } else { "none" },
            "--read-only",
            "--tmpfs",
            "/tmp:rw,noexec,nosuid,size=64m",
            "--security-opt",
            "no-new-privileges",
            "--cap-drop",
            "ALL",
            "--user",
            "65534:65534",
            "--env",
            "PYTHONDONTWRITEBYTECODE=1",
            "--env",
            "HOME=/tmp",
        ]
        .into_iter()
        .map(str::to_string)
        .collect();

        let limits = &request.limits;
        if limits.max_memory_mb > 0 {
            let memory = format!("{}m", limits.max_memory_mb);
            args.extend([
                "--memory".to_string(),
                memory.clone(),
                "--memory-swap".to_string(),
                memory,
            ]);
        }
        if limits.cpus > 0.0 {
            args.extend(["--cpus".to_string(), format!("{:.2}", limits.cpus)]);
        }
        if limits.max_pids > 0 {
            args.extend(["--pids-limit".to_string(), limits.max_pids.to_string()]);
        }
        if limits.cpu_time_secs > 0 {
            args.extend([
                "--ulimit".to_string(),
                format!("cpu={0}:{0}", limits.cpu_time_secs),
            ]);
        }

        args.extend([
            "--volume".to_string(),
            format!("{}:{MOUNT_POINT}:ro", request.workspace.display()),
            "--workdir".to_string(),
            MOUNT_POINT.to_string(),
            self.image(request.language).to_string(),
        ]);
        args.extend(request.command.iter().cloned());
        args
    }

    /// Force-remove a container left behind by a killed client.
    async fn remove(&self, name: &str) {
        let result = ProcessRunner::run(ProcessOptions {
            program: self.binary.clone(),
            args: vec!["rm".to_string(), "-f".to_string(), name.to_string()],
            timeout: Some(REMOVE_TIMEOUT),
            max_output_bytes: 4096,
            ..ProcessOptions::default()
        })
        .await;
        match result {
            Ok(output) if output.exit_code() == Some(0) => {
                tracing::debug!(container = name, "removed container");
            }
            Ok(output) => tracing::warn!(
                container = name,
                exit_code = ?output.exit_code(),
                stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                "container removal reported failure"
            ),
            Err(err) => tracing::warn!(container = name, error = %err, "container removal failed"),
        }
    }
}

/// Issues a detached `rm -f` for the container if the run future is
/// dropped before it could clean up itself.
struct ContainerGuard {
    binary: String,
    name: String,
    armed: bool,
}

impl ContainerGuard {
    fn new(binary: &str, name: &str) -> Self {
        Self {
            binary: binary.to_string(),
            name: name.to_string(),
            armed: true,
        }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for ContainerGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if tokio::runtime::Handle::try_current().is_err() {
            tracing::warn!(container = %self.name, "no runtime to remove abandoned container");
            return;
        }
        // The child is reaped by tokio in the background.
        match tokio::process::Command::new(&self.binary)
            .args(["rm", "-f", self.name.as_str()])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
        {
            Ok(_) => tracing::debug!(container = %self.name, "removing abandoned container"),
            Err(err) => tracing::warn!(
                container = %self.name,
                error = %err,
                "failed to remove abandoned container"
            ),
        }
    }
}

#[async_trait]
impl IsolationRuntime for ContainerRuntime {
    fn name(&self) -> &'static str {
        "container"
    }

    async fn run(&self, request: IsolationRequest) -> Result<RawOutcome, SandboxError> {
        let name = format!("codegate-{}", Uuid::new_v4().simple());
        let args = self.run_args(&name, &request);
        tracing::debug!(container = %name, image = self.image(request.language), "starting container");

        let guard = ContainerGuard::new(&self.binary, &name);
        let result = ProcessRunner::run(ProcessOptions {
            program: self.binary.clone(),
            args,
            timeout: Some(request.timeout),
            cancellation_token: Some(request.cancel.clone()),
            max_output_bytes: request.max_output_bytes,
            ..ProcessOptions::default()
        })
        .await;

        // Killing the client does not stop the container; `--rm` only
        // covers a client that saw the container exit.
        match &result {
            Ok(output) if !output.timed_out && !output.cancelled => guard.disarm(),
            Err(SandboxError::Spawn { .. }) => guard.disarm(),
            _ => {
                guard.disarm();
                self.remove(&name).await;
            }
        }
        let output = result?;

        if output.exit_code() == Some(DOCKER_CREATE_FAILED) {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(SandboxError::Runtime(format!(
                "{} could not start the container: {}",
                self.binary,
                stderr.trim()
            )));
        }

        Ok(output.into_raw_outcome())
    }
}
