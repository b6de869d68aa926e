//! One-shot validation of a single artifact.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use codegate_config::CodegateConfig;
use tokio_util::sync::CancellationToken;

use crate::artifact::{Artifact, Language};
use crate::audit::{DependencyAuditor, VulnerabilitySource};
use crate::finding::{Finding, FindingKind, Severity};
use crate::report::{ExecutionOutcome, ValidationReport};
use crate::rules::RuleEngine;
use crate::sandbox::{IsolationRuntime, SandboxExecutor, TestHarness};
use crate::scoring::ScoringPolicy;

/// Orchestrates the rule engine, dependency auditor and sandbox for one
/// artifact. Holds configuration only; every call is independent.
#[derive(Clone)]
pub struct Validator {
    rules: Arc<RuleEngine>,
    auditor: DependencyAuditor,
    sandbox: SandboxExecutor,
    scoring: ScoringPolicy,
    timeout: Duration,
    infrastructure_retries: u32,
    harnesses: HashMap<Language, TestHarness>,
}

impl fmt::Debug for Validator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Validator")
            .field("auditor", &self.auditor)
            .field("sandbox", &self.sandbox)
            .field("scoring", &self.scoring)
            .field("timeout", &self.timeout)
            .field("infrastructure_retries", &self.infrastructure_retries)
            .finish_non_exhaustive()
    }
}

impl Validator {
    pub fn new(
        rules: RuleEngine,
        auditor: DependencyAuditor,
        sandbox: SandboxExecutor,
        scoring: ScoringPolicy,
        timeout: Duration,
    ) -> Self {
        Self {
            rules: Arc::new(rules),
            auditor,
            sandbox,
            scoring,
            timeout,
            infrastructure_retries: 0,
            harnesses: HashMap::new(),
        }
    }

    /// Wire every component from configuration around the given
    /// vulnerability source and isolation runtime.
    pub fn from_config(
        config: &CodegateConfig,
        source: Arc<dyn VulnerabilitySource>,
        runtime: Arc<dyn IsolationRuntime>,
    ) -> Self {
        let mut validator = Self::new(
            RuleEngine::from_config(&config.rules),
            DependencyAuditor::new(source, config.audit.timeout()),
            SandboxExecutor::new(runtime, &config.sandbox),
            ScoringPolicy::from_config(&config.scoring),
            config.sandbox.timeout(),
        )
        .with_infrastructure_retries(config.sandbox.infrastructure_retries);

        for (language, settings) in [
            (Language::Python, &config.sandbox.python),
            (Language::JavaScript, &config.sandbox.javascript),
        ] {
            if !settings.command.is_empty() {
                validator = validator.with_harness(language, TestHarness::new(settings.command.clone()));
            }
        }
        validator
    }

    #[must_use]
    pub fn with_infrastructure_retries(mut self, retries: u32) -> Self {
        self.infrastructure_retries = retries;
        self
    }

    /// Replace the default smoke harness for a language.
    #[must_use]
    pub fn with_harness(mut self, language: Language, harness: TestHarness) -> Self {
        self.harnesses.insert(language, harness);
        self
    }

    pub fn scoring(&self) -> &ScoringPolicy {
        &self.scoring
    }

    pub fn rules(&self) -> &RuleEngine {
        &self.rules
    }

    pub fn harness_for(&self, language: Language) -> TestHarness {
        self.harnesses
            .get(&language)
            .cloned()
            .unwrap_or_else(|| TestHarness::smoke(language))
    }

    pub async fn validate(&self, artifact: &Artifact) -> ValidationReport {
        self.validate_with_cancel(artifact, &CancellationToken::new())
            .await
    }

    /// Like [`Validator::validate`], but an in-flight sandbox run is
    /// terminated as soon as `cancel` fires.
    pub async fn validate_with_cancel(
        &self,
        artifact: &Artifact,
        cancel: &CancellationToken,
    ) -> ValidationReport {
        let rules = Arc::clone(&self.rules);
        let source = artifact.source().to_string();
        let language = artifact.language();
        let rule_task = tokio::task::spawn_blocking(move || rules.check(&source, language));
        let audit_task = self.auditor.audit(artifact.dependencies());

        let (rule_result, audit_findings) = tokio::join!(rule_task, audit_task);
        let rule_findings = rule_result.unwrap_or_else(|err| {
            tracing::error!(error = %err, "rule engine task failed");
            vec![
                Finding::new(
                    FindingKind::Syntax,
                    Severity::Critical,
                    format!("static analysis failed: {err}"),
                )
                .with_code("rules.internal"),
            ]
        });

        let unparseable = rule_findings
            .iter()
            .any(|finding| finding.kind == FindingKind::Syntax && finding.is_critical());

        let mut findings = rule_findings;
        findings.extend(audit_findings);

        let (execution_outcome, sandbox_failure) = if unparseable {
            tracing::debug!(artifact = %artifact.id().short(), "skipping sandbox for unparseable source");
            (None, None)
        } else {
            self.execute(artifact, cancel).await
        };

        let report = ValidationReport::assemble(
            artifact.id().clone(),
            findings,
            execution_outcome,
            sandbox_failure,
            &self.scoring,
        );
        tracing::info!(
            artifact = %artifact.id().short(),
            valid = report.valid,
            findings = report.findings.len(),
            security_score = report.security_score,
            sandbox_failure = report.sandbox_failure.is_some(),
            "validation finished"
        );
        report
    }

    /// Run the sandbox, retrying infrastructure failures in place.
    async fn execute(
        &self,
        artifact: &Artifact,
        cancel: &CancellationToken,
    ) -> (Option<ExecutionOutcome>, Option<String>) {
        if cancel.is_cancelled() {
            return (Some(cancelled_outcome()), None);
        }

        let harness = self.harness_for(artifact.language());
        let mut retries = 0;
        loop {
            match self
                .sandbox
                .execute(artifact, &harness, self.timeout, cancel)
                .await
            {
                Ok(outcome) => return (Some(outcome), None),
                Err(err)
                    if err.is_transient()
                        && retries < self.infrastructure_retries
                        && !cancel.is_cancelled() =>
                {
                    retries += 1;
                    tracing::warn!(
                        artifact = %artifact.id().short(),
                        runtime = self.sandbox.runtime_name(),
                        error = %err,
                        retry = retries,
                        "sandbox infrastructure failure, retrying"
                    );
                }
                Err(err) => {
                    tracing::error!(
                        artifact = %artifact.id().short(),
                        runtime = self.sandbox.runtime_name(),
                        error = %err,
                        "sandbox infrastructure failure"
                    );
                    return (None, Some(err.to_string()));
                }
            }
        }
    }
}

fn cancelled_outcome() -> ExecutionOutcome {
    ExecutionOutcome {
        exit_code: None,
        timed_out: false,
        cancelled: true,
        stdout: String::new(),
        stderr: String::new(),
        duration_ms: 0,
    }
}
