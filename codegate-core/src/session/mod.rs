//! Bounded validate/regenerate loop for one artifact lineage.
//!
//! [`RetryCoordinator::run`] drives the state machine
//!
//! ```text
//! Validating --valid--------------------------> Accepted
//! Validating --invalid, budget left-----------> Regenerating --new artifact--> Validating
//! Validating --invalid, budget spent----------> Exhausted(BudgetSpent)
//! Validating --sandbox broken-----------------> Exhausted(SandboxUnavailable)
//! Regenerating --generator error--------------> Exhausted(RegenerationFailed)
//! Regenerating --artifact seen before---------> Exhausted(NoChange)
//! any --token cancelled-----------------------> Cancelled
//! ```
//!
//! The coordinator calls out through [`Validator`] and [`Regenerator`];
//! neither holds a reference back to it.

mod generator;
mod log;

pub use generator::Regenerator;
pub use log::{AttemptLog, AttemptRecord};

use std::fmt;
use std::sync::{Mutex, PoisonError};

use chrono::Utc;
use codegate_exec_events::{
    AttemptCompletedEvent, AttemptStartedEvent, EventEmitter, RegenerationRequestedEvent,
    SessionEvent, SessionFinishedEvent, SessionStartedEvent,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::artifact::Artifact;
use crate::finding::{Finding, FindingKind, Severity};
use crate::report::ValidationReport;
use crate::validator::Validator;

pub const REGENERATION_FAILED_CODE: &str = "session.regeneration-failed";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("max_attempts must be at least 1 (got {0})")]
    InvalidBudget(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExhaustionReason {
    /// Every attempt was used and the last report is still invalid.
    BudgetSpent,
    /// The generator returned an artifact that was already validated.
    NoChange,
    RegenerationFailed,
    /// The isolation runtime failed even after in-place retries.
    SandboxUnavailable,
}

impl ExhaustionReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::BudgetSpent => "budget_spent",
            Self::NoChange => "no_change",
            Self::RegenerationFailed => "regeneration_failed",
            Self::SandboxUnavailable => "sandbox_unavailable",
        }
    }
}

impl fmt::Display for ExhaustionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SessionState {
    Validating,
    Regenerating,
    Accepted,
    Exhausted { reason: ExhaustionReason },
    Cancelled,
}

impl SessionState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Validating => "validating",
            Self::Regenerating => "regenerating",
            Self::Accepted => "accepted",
            Self::Exhausted { .. } => "exhausted",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Validating | Self::Regenerating)
    }

    pub fn exhaustion_reason(self) -> Option<ExhaustionReason> {
        match self {
            Self::Exhausted { reason } => Some(reason),
            _ => None,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exhausted { reason } => write!(f, "exhausted ({reason})"),
            other => f.write_str(other.as_str()),
        }
    }
}

/// What a finished session hands back to its caller.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionOutcome {
    pub session_id: Uuid,
    pub state: SessionState,
    /// Report of the last validation, plus the regeneration failure
    /// finding when the generator errored.
    pub report: ValidationReport,
    pub attempts: AttemptLog,
}

impl SessionOutcome {
    pub fn accepted(&self) -> bool {
        self.state == SessionState::Accepted
    }

    /// Plain-text account of every attempt, suitable for a terminal or a
    /// generator prompt.
    pub fn summary(&self) -> String {
        let mut out = format!(
            "session {}: {} after {} attempt(s)\n",
            self.session_id,
            self.state,
            self.attempts.len()
        );
        for record in &self.attempts {
            let report = &record.report;
            out.push_str(&format!(
                "\nattempt {} [{}] at {}: {}, score {:.2}\n",
                record.attempt_number,
                record.artifact_id.short(),
                record.timestamp.to_rfc3339(),
                if report.valid { "valid" } else { "invalid" },
                report.security_score,
            ));
            describe_report(&mut out, report);
        }
        if self.attempts.last().map(|record| &record.report) != Some(&self.report) {
            out.push_str("\nfinal report:\n");
            describe_report(&mut out, &self.report);
        }
        out
    }
}

fn describe_report(out: &mut String, report: &ValidationReport) {
    for finding in &report.findings {
        match &finding.code {
            Some(code) => out.push_str(&format!("  - {finding} ({code})\n")),
            None => out.push_str(&format!("  - {finding}\n")),
        }
    }
    if let Some(failure) = &report.sandbox_failure {
        out.push_str(&format!("  sandbox failure: {failure}\n"));
    }
    if let Some(outcome) = &report.execution_outcome {
        let status = if outcome.timed_out {
            "timed out".to_string()
        } else if outcome.cancelled {
            "cancelled".to_string()
        } else {
            match outcome.exit_code {
                Some(code) => format!("exit code {code}"),
                None => "killed by signal".to_string(),
            }
        };
        out.push_str(&format!(
            "  execution: {status} in {} ms\n",
            outcome.duration_ms
        ));
        if !outcome.succeeded() {
            let tail = stderr_tail(&outcome.stderr, 5);
            if !tail.is_empty() {
                out.push_str("  stderr:\n");
                for line in tail {
                    out.push_str(&format!("    {line}\n"));
                }
            }
        }
    }
}

fn stderr_tail(stderr: &str, lines: usize) -> Vec<&str> {
    let all: Vec<&str> = stderr.lines().filter(|line| !line.trim().is_empty()).collect();
    all[all.len().saturating_sub(lines)..].to_vec()
}

/// Runs validation sessions. One coordinator may serve many concurrent
/// sessions; each call to [`RetryCoordinator::run`] owns its own log.
pub struct RetryCoordinator {
    validator: Validator,
    emitter: Option<Mutex<Box<dyn EventEmitter>>>,
}

impl fmt::Debug for RetryCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryCoordinator")
            .field("validator", &self.validator)
            .field("emitter", &self.emitter.is_some())
            .finish()
    }
}

impl RetryCoordinator {
    pub fn new(validator: Validator) -> Self {
        Self {
            validator,
            emitter: None,
        }
    }

    #[must_use]
    pub fn with_emitter(mut self, emitter: impl EventEmitter + 'static) -> Self {
        self.emitter = Some(Mutex::new(Box::new(emitter)));
        self
    }

    pub fn validator(&self) -> &Validator {
        &self.validator
    }

    pub async fn run(
        &self,
        initial: Artifact,
        regenerator: &dyn Regenerator,
        max_attempts: u32,
        cancel: &CancellationToken,
    ) -> Result<SessionOutcome, SessionError> {
        if max_attempts == 0 {
            return Err(SessionError::InvalidBudget(max_attempts));
        }

        let session_id = Uuid::new_v4();
        let session = session_id.to_string();
        let capacity = usize::try_from(max_attempts).unwrap_or(usize::MAX);
        let mut attempts = AttemptLog::with_capacity(capacity);
        let mut artifact = initial;
        let mut attempt: u32 = 1;

        tracing::info!(
            session = %session,
            artifact = %artifact.id().short(),
            max_attempts,
            "validation session started"
        );
        self.emit(SessionEvent::SessionStarted(SessionStartedEvent {
            session_id: session.clone(),
            artifact_id: artifact.id().to_string(),
            max_attempts,
        }));

        loop {
            self.transition(&session, attempt, SessionState::Validating);
            self.emit(SessionEvent::AttemptStarted(AttemptStartedEvent {
                session_id: session.clone(),
                attempt,
                artifact_id: artifact.id().to_string(),
            }));

            let report = self.validator.validate_with_cancel(&artifact, cancel).await;
            attempts.append(AttemptRecord {
                attempt_number: attempt,
                artifact_id: artifact.id().clone(),
                report: report.clone(),
                timestamp: Utc::now(),
            });
            self.emit(SessionEvent::AttemptCompleted(AttemptCompletedEvent {
                session_id: session.clone(),
                attempt,
                artifact_id: artifact.id().to_string(),
                valid: report.valid,
                security_score: report.security_score,
                finding_count: report.findings.len(),
                timed_out: report.timed_out(),
            }));

            let execution_cancelled = report
                .execution_outcome
                .as_ref()
                .is_some_and(|outcome| outcome.cancelled);
            let terminal = if execution_cancelled {
                Some(SessionState::Cancelled)
            } else if report.valid {
                Some(SessionState::Accepted)
            } else if cancel.is_cancelled() {
                Some(SessionState::Cancelled)
            } else if report.sandbox_failure.is_some() {
                Some(exhausted(ExhaustionReason::SandboxUnavailable))
            } else if attempt >= max_attempts {
                Some(exhausted(ExhaustionReason::BudgetSpent))
            } else {
                None
            };
            if let Some(state) = terminal {
                return Ok(self.finish(session_id, state, report, attempts));
            }

            self.transition(&session, attempt, SessionState::Regenerating);
            self.emit(SessionEvent::RegenerationRequested(RegenerationRequestedEvent {
                session_id: session.clone(),
                attempt,
                findings: report.findings.iter().map(finding_label).collect(),
            }));

            let regenerated = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                result = regenerator.regenerate(&artifact, &report.findings) => Some(result),
            };

            let next = match regenerated {
                None => {
                    return Ok(self.finish(session_id, SessionState::Cancelled, report, attempts));
                }
                Some(Ok(next)) => next,
                Some(Err(err)) => {
                    tracing::warn!(session = %session, attempt, error = format!("{err:#}"), "regeneration failed");
                    let mut report = report;
                    report.findings.push(
                        Finding::new(
                            FindingKind::Regeneration,
                            Severity::Critical,
                            format!("regeneration failed: {err:#}"),
                        )
                        .with_code(REGENERATION_FAILED_CODE),
                    );
                    report.recompute(self.validator.scoring());
                    return Ok(self.finish(
                        session_id,
                        exhausted(ExhaustionReason::RegenerationFailed),
                        report,
                        attempts,
                    ));
                }
            };

            if attempts.contains_artifact(next.id()) {
                tracing::info!(
                    session = %session,
                    attempt,
                    artifact = %next.id().short(),
                    "regeneration produced an artifact that was already validated"
                );
                return Ok(self.finish(
                    session_id,
                    exhausted(ExhaustionReason::NoChange),
                    report,
                    attempts,
                ));
            }

            if cancel.is_cancelled() {
                return Ok(self.finish(session_id, SessionState::Cancelled, report, attempts));
            }

            artifact = next;
            attempt += 1;
        }
    }

    fn finish(
        &self,
        session_id: Uuid,
        state: SessionState,
        report: ValidationReport,
        attempts: AttemptLog,
    ) -> SessionOutcome {
        let session = session_id.to_string();
        let performed = u32::try_from(attempts.len()).unwrap_or(u32::MAX);
        tracing::info!(
            session = %session,
            state = state.as_str(),
            reason = state.exhaustion_reason().map(ExhaustionReason::as_str),
            attempts = performed,
            valid = report.valid,
            security_score = report.security_score,
            "validation session finished"
        );
        self.emit(SessionEvent::SessionFinished(SessionFinishedEvent {
            session_id: session,
            state: state.as_str().to_string(),
            reason: state
                .exhaustion_reason()
                .map(|reason| reason.as_str().to_string()),
            attempts: performed,
        }));
        SessionOutcome {
            session_id,
            state,
            report,
            attempts,
        }
    }

    fn transition(&self, session: &str, attempt: u32, state: SessionState) {
        tracing::debug!(session, attempt, state = state.as_str(), "session state changed");
    }

    fn emit(&self, event: SessionEvent) {
        if let Some(emitter) = &self.emitter {
            let mut emitter = emitter.lock().unwrap_or_else(PoisonError::into_inner);
            emitter.emit(&event);
        }
    }
}

fn exhausted(reason: ExhaustionReason) -> SessionState {
    SessionState::Exhausted { reason }
}

fn finding_label(finding: &Finding) -> String {
    finding
        .code
        .clone()
        .unwrap_or_else(|| finding.message.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn terminal_states_serialize_with_reason() {
        let value = serde_json::to_value(exhausted(ExhaustionReason::NoChange)).expect("serialize");
        assert_eq!(value, serde_json::json!({"state": "exhausted", "reason": "no_change"}));
        let value = serde_json::to_value(SessionState::Accepted).expect("serialize");
        assert_eq!(value, serde_json::json!({"state": "accepted"}));
    }

    #[test]
    fn only_loop_states_are_non_terminal() {
        assert!(!SessionState::Validating.is_terminal());
        assert!(!SessionState::Regenerating.is_terminal());
        assert!(SessionState::Cancelled.is_terminal());
        assert!(exhausted(ExhaustionReason::BudgetSpent).is_terminal());
        assert_eq!(
            exhausted(ExhaustionReason::SandboxUnavailable).to_string(),
            "exhausted (sandbox_unavailable)"
        );
    }

    #[test]
    fn stderr_tail_keeps_last_non_blank_lines() {
        let stderr = "a\n\nb\nc\n  \nd\n";
        assert_eq!(stderr_tail(stderr, 2), vec!["c", "d"]);
        assert_eq!(stderr_tail("", 3), Vec::<&str>::new());
    }
}
