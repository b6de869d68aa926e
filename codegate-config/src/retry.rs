use anyhow::{Result, ensure};
use serde::{Deserialize, Serialize};

use crate::constants::retry::{DEFAULT_MAX_ATTEMPTS, MAX_ATTEMPTS_CEILING};

/// Budget for the regeneration loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct RetryConfig {
    /// Maximum number of validations performed in one session.
    #[serde(default = "RetryConfig::default_max_attempts")]
    pub max_attempts: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: Self::default_max_attempts(),
        }
    }
}

impl RetryConfig {
    const fn default_max_attempts() -> u32 {
        DEFAULT_MAX_ATTEMPTS
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(
            (1..=MAX_ATTEMPTS_CEILING).contains(&self.max_attempts),
            "retry.max_attempts must be between 1 and {MAX_ATTEMPTS_CEILING}"
        );
        Ok(())
    }
}
