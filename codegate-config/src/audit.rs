use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Result, ensure};
use serde::{Deserialize, Serialize};

use crate::constants::audit::DEFAULT_TIMEOUT_MS;

/// Dependency audit settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct AuditConfig {
    /// Budget for one whole audit call against the vulnerability source.
    #[serde(default = "AuditConfig::default_timeout_ms")]
    pub timeout_ms: u64,

    /// Optional TOML advisory database loaded at startup.
    #[serde(default)]
    pub advisory_db: Option<PathBuf>,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            timeout_ms: Self::default_timeout_ms(),
            advisory_db: None,
        }
    }
}

impl AuditConfig {
    const fn default_timeout_ms() -> u64 {
        DEFAULT_TIMEOUT_MS
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.timeout_ms >= 50,
            "audit.timeout_ms must be at least 50ms"
        );
        Ok(())
    }
}
