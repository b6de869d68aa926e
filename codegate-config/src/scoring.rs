use anyhow::{Result, ensure};
use serde::{Deserialize, Serialize};

/// Per-severity multiplicative penalty factors for the security score.
///
/// Each finding multiplies the running score (starting at 1.0) by the factor
/// of its severity. Factors are policy, not contract, hence configurable.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct ScoringConfig {
    #[serde(default = "ScoringConfig::default_critical")]
    pub critical: f64,
    #[serde(default = "ScoringConfig::default_warning")]
    pub warning: f64,
    #[serde(default = "ScoringConfig::default_info")]
    pub info: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            critical: Self::default_critical(),
            warning: Self::default_warning(),
            info: Self::default_info(),
        }
    }
}

impl ScoringConfig {
    const fn default_critical() -> f64 {
        0.7
    }

    const fn default_warning() -> f64 {
        0.9
    }

    const fn default_info() -> f64 {
        1.0
    }

    pub fn validate(&self) -> Result<()> {
        for (name, factor) in [
            ("critical", self.critical),
            ("warning", self.warning),
            ("info", self.info),
        ] {
            ensure!(
                factor.is_finite() && (0.0..=1.0).contains(&factor),
                "scoring.{name} must be a factor between 0.0 and 1.0 (got {factor})"
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_factors() {
        let config = ScoringConfig::default();
        assert!((config.critical - 0.7).abs() < f64::EPSILON);
        assert!((config.warning - 0.9).abs() < f64::EPSILON);
        assert!((config.info - 1.0).abs() < f64::EPSILON);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn out_of_range_factors_fail_validation() {
        let amplifying = ScoringConfig {
            warning: 1.2,
            ..Default::default()
        };
        assert!(amplifying.validate().is_err());

        let nan = ScoringConfig {
            critical: f64::NAN,
            ..Default::default()
        };
        assert!(nan.validate().is_err());
    }
}
