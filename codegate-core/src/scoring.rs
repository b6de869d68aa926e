use codegate_config::ScoringConfig;

use crate::finding::{Finding, Severity};

/// Multiplicative per-severity penalty model for the security score.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoringPolicy {
    critical: f64,
    warning: f64,
    info: f64,
}

impl Default for ScoringPolicy {
    fn default() -> Self {
        Self::from_config(&ScoringConfig::default())
    }
}

impl ScoringPolicy {
    /// Factors outside `[0, 1]` are clamped so the score can never grow
    /// as findings are added.
    pub fn from_config(config: &ScoringConfig) -> Self {
        Self {
            critical: clamp_factor(config.critical),
            warning: clamp_factor(config.warning),
            info: clamp_factor(config.info),
        }
    }

    pub fn factor(&self, severity: Severity) -> f64 {
        match severity {
            Severity::Critical => self.critical,
            Severity::Warning => self.warning,
            Severity::Info => self.info,
        }
    }

    /// Start at 1.0 and multiply by the factor of each finding.
    pub fn score(&self, findings: &[Finding]) -> f64 {
        findings
            .iter()
            .fold(1.0_f64, |score, finding| score * self.factor(finding.severity))
            .clamp(0.0, 1.0)
    }
}

fn clamp_factor(value: f64) -> f64 {
    if value.is_finite() {
        value.clamp(0.0, 1.0)
    } else {
        1.0
    }
}
