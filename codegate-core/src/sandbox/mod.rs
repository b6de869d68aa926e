//! Sandboxed execution of an artifact's test harness.
//!
//! [`SandboxExecutor`] is a thin adapter: it materializes the artifact into
//! a sealed scratch workspace, hands an [`IsolationRequest`] to an
//! [`IsolationRuntime`], and converts the raw result. Teardown of the
//! workspace is tied to a guard, so it runs on every exit path.

mod container;
mod process;
mod workspace;

pub use container::ContainerRuntime;
pub use process::{ProcessOptions, ProcessOutput, ProcessRunner, ProcessRuntime};
pub use workspace::SandboxWorkspace;

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use codegate_config::{ResourceLimits, RuntimeKind, SandboxConfig};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::artifact::{Artifact, Language};
use crate::report::ExecutionOutcome;

/// Failures of the isolation machinery itself. None of these mean the
/// artifact is broken.
#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("failed to prepare sandbox workspace: {message}")]
    Workspace {
        message: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("isolation runtime failed: {0}")]
    Runtime(String),
    #[error("invalid test harness: {0}")]
    InvalidHarness(String),
}

impl SandboxError {
    /// Whether trying again could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        !matches!(self, Self::InvalidHarness(_))
    }
}

/// A file placed next to the artifact, e.g. a pytest module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HarnessFile {
    /// Relative path inside the workspace.
    pub path: String,
    pub contents: String,
}

/// Files and command that exercise the artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestHarness {
    #[serde(default)]
    pub files: Vec<HarnessFile>,
    pub command: Vec<String>,
}

impl TestHarness {
    pub fn new(command: Vec<String>) -> Self {
        Self {
            files: Vec::new(),
            command,
        }
    }

    /// Run the entrypoint directly; passes when it exits 0.
    pub fn smoke(language: Language) -> Self {
        let command = match language {
            Language::Python => vec!["python3".to_string(), language.entrypoint().to_string()],
            Language::JavaScript => vec!["node".to_string(), language.entrypoint().to_string()],
        };
        Self::new(command)
    }

    /// `python3 -m pytest` over the workspace; the image must ship pytest.
    pub fn pytest() -> Self {
        Self::new(
            ["python3", "-m", "pytest", "-q", "-p", "no:cacheprovider"]
                .into_iter()
                .map(str::to_string)
                .collect(),
        )
    }

    #[must_use]
    pub fn with_file(mut self, path: impl Into<String>, contents: impl Into<String>) -> Self {
        self.files.push(HarnessFile {
            path: path.into(),
            contents: contents.into(),
        });
        self
    }
}

/// Everything a runtime needs for one execution.
#[derive(Debug, Clone)]
pub struct IsolationRequest {
    pub language: Language,
    pub workspace: PathBuf,
    pub command: Vec<String>,
    pub limits: ResourceLimits,
    pub network_access: bool,
    pub timeout: Duration,
    pub max_output_bytes: usize,
    pub cancel: CancellationToken,
}

/// Result reported by a runtime before conversion.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawOutcome {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
    pub cancelled: bool,
    pub duration: Duration,
}

/// An external isolation primitive. Implementations must release every
/// resource they create before returning, on success and on error.
#[async_trait]
pub trait IsolationRuntime: Send + Sync {
    fn name(&self) -> &'static str;

    async fn run(&self, request: IsolationRequest) -> Result<RawOutcome, SandboxError>;
}

/// Build the runtime selected by `[sandbox] runtime`.
pub fn runtime_from_config(config: &SandboxConfig) -> Arc<dyn IsolationRuntime> {
    match config.runtime {
        RuntimeKind::Container => Arc::new(ContainerRuntime::from_config(config)),
        RuntimeKind::Process => Arc::new(ProcessRuntime::new()),
    }
}

#[derive(Clone)]
pub struct SandboxExecutor {
    runtime: Arc<dyn IsolationRuntime>,
    limits: ResourceLimits,
    network_access: bool,
    max_output_bytes: usize,
}

impl fmt::Debug for SandboxExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SandboxExecutor")
            .field("runtime", &self.runtime.name())
            .field("limits", &self.limits)
            .field("network_access", &self.network_access)
            .field("max_output_bytes", &self.max_output_bytes)
            .finish()
    }
}

impl SandboxExecutor {
    pub fn new(runtime: Arc<dyn IsolationRuntime>, config: &SandboxConfig) -> Self {
        Self {
            runtime,
            limits: config.limits,
            network_access: config.network_access,
            max_output_bytes: config.max_output_bytes,
        }
    }

    pub fn runtime_name(&self) -> &'static str {
        self.runtime.name()
    }

    pub async fn execute(
        &self,
        artifact: &Artifact,
        harness: &TestHarness,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<ExecutionOutcome, SandboxError> {
        if harness.command.is_empty() {
            return Err(SandboxError::InvalidHarness(
                "harness command is empty".to_string(),
            ));
        }

        let workspace = SandboxWorkspace::materialize(artifact, harness)?;
        let request = IsolationRequest {
            language: artifact.language(),
            workspace: workspace.path().to_path_buf(),
            command: harness.command.clone(),
            limits: self.limits,
            network_access: self.network_access,
            timeout,
            max_output_bytes: self.max_output_bytes,
            cancel: cancel.clone(),
        };

        tracing::debug!(
            artifact = %artifact.id().short(),
            runtime = self.runtime.name(),
            timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            "starting sandbox execution"
        );
        let result = self.runtime.run(request).await;
        // Dropping the guard restores permissions and deletes the tree.
        drop(workspace);

        let raw = result?;
        let outcome = ExecutionOutcome {
            exit_code: if raw.timed_out || raw.cancelled {
                None
            } else {
                raw.exit_code
            },
            timed_out: raw.timed_out,
            cancelled: raw.cancelled,
            stdout: raw.stdout,
            stderr: raw.stderr,
            duration_ms: u64::try_from(raw.duration.as_millis()).unwrap_or(u64::MAX),
        };
        tracing::debug!(
            artifact = %artifact.id().short(),
            exit_code = ?outcome.exit_code,
            timed_out = outcome.timed_out,
            cancelled = outcome.cancelled,
            duration_ms = outcome.duration_ms,
            "sandbox execution finished"
        );
        Ok(outcome)
    }
}
