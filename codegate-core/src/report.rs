use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::artifact::ArtifactId;
use crate::finding::{Finding, FindingKind};
use crate::scoring::ScoringPolicy;

/// Result of running an artifact's harness inside the sandbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    /// `None` when the run was timed out, cancelled or killed by a signal.
    pub exit_code: Option<i32>,
    pub timed_out: bool,
    #[serde(default)]
    pub cancelled: bool,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
}

impl ExecutionOutcome {
    pub fn succeeded(&self) -> bool {
        !self.timed_out && !self.cancelled && self.exit_code == Some(0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub artifact_id: ArtifactId,
    pub valid: bool,
    pub findings: Vec<Finding>,
    /// `None` when execution was skipped (syntax error) or the sandbox
    /// itself failed.
    pub execution_outcome: Option<ExecutionOutcome>,
    pub security_score: f64,
    /// Set when the isolation primitive failed, as opposed to the code.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sandbox_failure: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl ValidationReport {
    /// Derive `valid` and the score from the parts.
    pub fn assemble(
        artifact_id: ArtifactId,
        findings: Vec<Finding>,
        execution_outcome: Option<ExecutionOutcome>,
        sandbox_failure: Option<String>,
        scoring: &ScoringPolicy,
    ) -> Self {
        let mut report = Self {
            artifact_id,
            valid: false,
            findings,
            execution_outcome,
            security_score: 1.0,
            sandbox_failure,
            created_at: Utc::now(),
        };
        report.recompute(scoring);
        report
    }

    /// Re-derive `valid` and `security_score` after findings changed.
    pub fn recompute(&mut self, scoring: &ScoringPolicy) {
        self.security_score = scoring.score(&self.findings);
        let execution_ok = self
            .execution_outcome
            .as_ref()
            .is_none_or(ExecutionOutcome::succeeded);
        self.valid = !self.has_critical() && execution_ok && self.sandbox_failure.is_none();
    }

    pub fn has_critical(&self) -> bool {
        self.findings.iter().any(Finding::is_critical)
    }

    pub fn timed_out(&self) -> bool {
        self.execution_outcome
            .as_ref()
            .is_some_and(|outcome| outcome.timed_out)
    }

    pub fn findings_of(&self, kind: FindingKind) -> impl Iterator<Item = &Finding> {
        self.findings.iter().filter(move |finding| finding.kind == kind)
    }
}
