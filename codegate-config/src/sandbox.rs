//! Sandbox execution settings.
//!
//! Policy values (limits, images, timeouts) live here rather than in the
//! executor so operators can tighten them without a rebuild.

use std::time::Duration;

use anyhow::{Result, ensure};
use serde::{Deserialize, Serialize};

use crate::constants::sandbox::{
    DEFAULT_INFRASTRUCTURE_RETRIES, DEFAULT_MAX_OUTPUT_BYTES, DEFAULT_NODE_IMAGE,
    DEFAULT_PYTHON_IMAGE, DEFAULT_TIMEOUT_SECS, MAX_TIMEOUT_SECS, MIN_TIMEOUT_SECS,
};

/// Isolation primitive used to run artifacts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeKind {
    /// Docker-compatible container CLI (no network, read-only mount).
    #[default]
    Container,
    /// Plain child process in a scratch directory. Weaker isolation, meant
    /// for local development and tests.
    Process,
}

impl RuntimeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Container => "container",
            Self::Process => "process",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "container" | "docker" => Some(Self::Container),
            "process" | "local" => Some(Self::Process),
            _ => None,
        }
    }
}

/// Resource limits for sandboxed execution. Zero means unlimited.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct ResourceLimits {
    /// Maximum memory usage in megabytes.
    #[serde(default = "ResourceLimits::default_memory_mb")]
    pub max_memory_mb: u64,

    /// Maximum number of processes/threads. Prevents fork bombs.
    #[serde(default = "ResourceLimits::default_max_pids")]
    pub max_pids: u32,

    /// CPU time limit in seconds.
    #[serde(default = "ResourceLimits::default_cpu_time_secs")]
    pub cpu_time_secs: u64,

    /// Fractional CPU quota handed to the container runtime.
    #[serde(default = "ResourceLimits::default_cpus")]
    pub cpus: f64,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self::conservative()
    }
}

impl ResourceLimits {
    const fn default_memory_mb() -> u64 {
        512
    }

    const fn default_max_pids() -> u32 {
        64
    }

    const fn default_cpu_time_secs() -> u64 {
        60
    }

    const fn default_cpus() -> f64 {
        1.0
    }

    /// Create new resource limits with all values unlimited.
    pub fn unlimited() -> Self {
        Self {
            max_memory_mb: 0,
            max_pids: 0,
            cpu_time_secs: 0,
            cpus: 0.0,
        }
    }

    /// Limits suitable for untrusted, machine-generated code.
    pub fn conservative() -> Self {
        Self {
            max_memory_mb: Self::default_memory_mb(),
            max_pids: Self::default_max_pids(),
            cpu_time_secs: Self::default_cpu_time_secs(),
            cpus: Self::default_cpus(),
        }
    }

    /// Check if any limits are set.
    pub fn has_limits(&self) -> bool {
        self.max_memory_mb > 0 || self.max_pids > 0 || self.cpu_time_secs > 0 || self.cpus > 0.0
    }
}

/// Container image and harness command for one language.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct LanguageSettings {
    /// Image used by the container runtime.
    pub image: String,
    /// Command run inside the sandbox. Empty means "run the entrypoint".
    #[serde(default)]
    pub command: Vec<String>,
}

impl LanguageSettings {
    fn python() -> Self {
        Self {
            image: DEFAULT_PYTHON_IMAGE.to_string(),
            command: Vec::new(),
        }
    }

    fn javascript() -> Self {
        Self {
            image: DEFAULT_NODE_IMAGE.to_string(),
            command: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct SandboxConfig {
    #[serde(default)]
    pub runtime: RuntimeKind,

    /// Wall clock budget for one execution.
    #[serde(default = "SandboxConfig::default_timeout_secs")]
    pub timeout_secs: u64,

    /// Times an infrastructure failure is retried before it is reported.
    #[serde(default = "SandboxConfig::default_infrastructure_retries")]
    pub infrastructure_retries: u32,

    /// Per-stream capture cap; output beyond it is dropped.
    #[serde(default = "SandboxConfig::default_max_output_bytes")]
    pub max_output_bytes: usize,

    /// Grant network access to the sandbox. Off unless explicitly enabled.
    #[serde(default)]
    pub network_access: bool,

    /// Container CLI binary for the container runtime.
    #[serde(default = "SandboxConfig::default_container_binary")]
    pub container_binary: String,

    #[serde(default)]
    pub limits: ResourceLimits,

    #[serde(default = "LanguageSettings::python")]
    pub python: LanguageSettings,

    #[serde(default = "LanguageSettings::javascript")]
    pub javascript: LanguageSettings,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            runtime: RuntimeKind::default(),
            timeout_secs: Self::default_timeout_secs(),
            infrastructure_retries: Self::default_infrastructure_retries(),
            max_output_bytes: Self::default_max_output_bytes(),
            network_access: false,
            container_binary: Self::default_container_binary(),
            limits: ResourceLimits::default(),
            python: LanguageSettings::python(),
            javascript: LanguageSettings::javascript(),
        }
    }
}

impl SandboxConfig {
    const fn default_timeout_secs() -> u64 {
        DEFAULT_TIMEOUT_SECS
    }

    const fn default_infrastructure_retries() -> u32 {
        DEFAULT_INFRASTRUCTURE_RETRIES
    }

    const fn default_max_output_bytes() -> usize {
        DEFAULT_MAX_OUTPUT_BYTES
    }

    fn default_container_binary() -> String {
        "docker".to_string()
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(resolve_timeout(Some(self.timeout_secs)))
    }

    /// Weak spots in the policy worth surfacing to an operator at startup.
    pub fn warnings(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.network_access {
            warnings.push("sandbox.network_access is enabled; artifacts can reach the network".to_string());
        }
        if self.limits.max_memory_mb == 0 {
            warnings.push("sandbox.limits.max_memory_mb is unlimited".to_string());
        }
        if self.limits.max_pids == 0 {
            warnings.push("sandbox.limits.max_pids is unlimited; fork bombs are not contained".to_string());
        }
        if self.limits.cpu_time_secs == 0 {
            warnings.push("sandbox.limits.cpu_time_secs is unlimited".to_string());
        }
        if self.runtime == RuntimeKind::Process {
            warnings.push(
                "sandbox.runtime = \"process\" provides no filesystem or network isolation"
                    .to_string(),
            );
        }
        warnings
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(
            (MIN_TIMEOUT_SECS..=MAX_TIMEOUT_SECS).contains(&self.timeout_secs),
            "sandbox.timeout_secs must be between {MIN_TIMEOUT_SECS} and {MAX_TIMEOUT_SECS} seconds"
        );
        ensure!(
            self.max_output_bytes >= 1024,
            "sandbox.max_output_bytes must be at least 1024 bytes"
        );
        ensure!(
            self.limits.cpus.is_finite() && self.limits.cpus >= 0.0,
            "sandbox.limits.cpus must be a non-negative number"
        );
        ensure!(
            !self.container_binary.trim().is_empty(),
            "sandbox.container_binary cannot be empty"
        );
        for (name, settings) in [("python", &self.python), ("javascript", &self.javascript)] {
            ensure!(
                !settings.image.trim().is_empty(),
                "sandbox.{name}.image cannot be empty"
            );
            ensure!(
                settings.command.iter().all(|part| !part.is_empty()),
                "sandbox.{name}.command cannot contain empty arguments"
            );
        }
        Ok(())
    }
}

/// Resolve a user-supplied timeout into a bounded, non-zero value.
pub fn resolve_timeout(user_timeout: Option<u64>) -> u64 {
    match user_timeout {
        None | Some(0) => DEFAULT_TIMEOUT_SECS,
        Some(value) if value < MIN_TIMEOUT_SECS => MIN_TIMEOUT_SECS,
        Some(value) if value > MAX_TIMEOUT_SECS => MAX_TIMEOUT_SECS,
        Some(value) => value,
    }
}
