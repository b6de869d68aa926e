use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::{
    AuditConfig, DebugConfig, RetryConfig, RulesConfig, SandboxConfig, ScoringConfig,
};

/// Root of `codegate.toml`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct CodegateConfig {
    #[serde(default)]
    pub scoring: ScoringConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub sandbox: SandboxConfig,

    #[serde(default)]
    pub audit: AuditConfig,

    #[serde(default)]
    pub rules: RulesConfig,

    #[serde(default)]
    pub debug: DebugConfig,
}

impl CodegateConfig {
    pub fn validate(&self) -> Result<()> {
        self.scoring
            .validate()
            .context("Invalid [scoring] configuration")?;
        self.retry.validate().context("Invalid [retry] configuration")?;
        self.sandbox
            .validate()
            .context("Invalid [sandbox] configuration")?;
        self.audit.validate().context("Invalid [audit] configuration")?;
        Ok(())
    }
}
