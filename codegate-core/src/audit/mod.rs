//! Dependency audit against a vulnerability data source.

mod database;

pub use database::{AdvisoryDatabase, lowest_admitted_version, normalize_package_name};

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::artifact::DependencyRef;
use crate::finding::{Finding, FindingKind, Severity};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Advisory {
    pub id: String,
    pub severity: Severity,
    #[serde(default)]
    pub summary: Option<String>,
}

/// Answer for one `(name, constraint)` query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    /// The source has never heard of the package.
    Unknown,
    /// The package is known; the list may be empty.
    Known(Vec<Advisory>),
}

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("vulnerability source unavailable: {0}")]
    Unavailable(String),
    #[error("failed to load advisory database from {path}: {reason}")]
    Database { path: String, reason: String },
}

#[async_trait]
pub trait VulnerabilitySource: Send + Sync {
    async fn lookup(&self, dependency: &DependencyRef) -> Result<Lookup, AuditError>;
}

#[async_trait]
impl<T: VulnerabilitySource + ?Sized> VulnerabilitySource for Arc<T> {
    async fn lookup(&self, dependency: &DependencyRef) -> Result<Lookup, AuditError> {
        (**self).lookup(dependency).await
    }
}

pub const AUDIT_UNAVAILABLE: &str = "audit unavailable";
pub const UNRESOLVABLE: &str = "unresolvable";

/// Queries a [`VulnerabilitySource`] for every declared dependency.
///
/// The whole call is time-boxed. A timeout or source error stops further
/// queries and adds a single "audit unavailable" warning; findings for
/// dependencies already checked are kept.
#[derive(Clone)]
pub struct DependencyAuditor {
    source: Arc<dyn VulnerabilitySource>,
    timeout: Duration,
}

impl std::fmt::Debug for DependencyAuditor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DependencyAuditor")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl DependencyAuditor {
    pub fn new(source: Arc<dyn VulnerabilitySource>, timeout: Duration) -> Self {
        Self { source, timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub async fn audit(&self, dependencies: &[DependencyRef]) -> Vec<Finding> {
        let mut findings = Vec::new();
        if dependencies.is_empty() {
            return findings;
        }

        let outcome =
            tokio::time::timeout(self.timeout, self.query_all(dependencies, &mut findings)).await;
        let failure = match outcome {
            Ok(Ok(())) => None,
            Ok(Err(err)) => Some(err.to_string()),
            Err(_) => Some(format!("timed out after {} ms", self.timeout.as_millis())),
        };

        if let Some(reason) = failure {
            tracing::warn!(%reason, checked = findings.len(), "dependency audit unavailable");
            findings.push(
                Finding::new(
                    FindingKind::VulnerableDependency,
                    Severity::Warning,
                    AUDIT_UNAVAILABLE,
                )
                .with_code("audit.unavailable"),
            );
        }
        findings
    }

    async fn query_all(
        &self,
        dependencies: &[DependencyRef],
        findings: &mut Vec<Finding>,
    ) -> Result<(), AuditError> {
        for dependency in dependencies {
            match self.source.lookup(dependency).await? {
                Lookup::Unknown => {
                    tracing::debug!(dependency = %dependency, "dependency not found in source");
                    findings.push(
                        Finding::new(
                            FindingKind::VulnerableDependency,
                            Severity::Warning,
                            format!("{UNRESOLVABLE}: {dependency}"),
                        )
                        .with_code("audit.unresolvable"),
                    );
                }
                Lookup::Known(advisories) => {
                    for advisory in advisories {
                        let message = match &advisory.summary {
                            Some(summary) => format!("{}: {dependency} ({summary})", advisory.id),
                            None => format!("{}: {dependency}", advisory.id),
                        };
                        findings.push(
                            Finding::new(
                                FindingKind::VulnerableDependency,
                                advisory.severity,
                                message,
                            )
                            .with_code(advisory.id),
                        );
                    }
                }
            }
        }
        Ok(())
    }
}

/// A source that knows nothing; every dependency is unresolvable.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmptySource;

#[async_trait]
impl VulnerabilitySource for EmptySource {
    async fn lookup(&self, _dependency: &DependencyRef) -> Result<Lookup, AuditError> {
        Ok(Lookup::Unknown)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Scripted {
        calls: AtomicUsize,
        fail_on: Option<usize>,
        stall: bool,
    }

    #[async_trait]
    impl VulnerabilitySource for Scripted {
        async fn lookup(&self, dependency: &DependencyRef) -> Result<Lookup, AuditError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_on == Some(call) {
                if self.stall {
                    std::future::pending::<()>().await;
                }
                return Err(AuditError::Unavailable("connection refused".to_string()));
            }
            if dependency.name == "ghost" {
                return Ok(Lookup::Unknown);
            }
            if dependency.name == "badlib" {
                return Ok(Lookup::Known(vec![Advisory {
                    id: "GHSA-0001".to_string(),
                    severity: Severity::Critical,
                    summary: None,
                }]));
            }
            Ok(Lookup::Known(Vec::new()))
        }
    }

    fn auditor(fail_on: Option<usize>, stall: bool) -> DependencyAuditor {
        DependencyAuditor::new(
            Arc::new(Scripted {
                calls: AtomicUsize::new(0),
                fail_on,
                stall,
            }),
            Duration::from_millis(100),
        )
    }

    fn deps() -> Vec<DependencyRef> {
        vec![
            DependencyRef::new("ghost", ""),
            DependencyRef::new("badlib", "==1.0"),
            DependencyRef::new("requests", ">=2"),
        ]
    }

    #[tokio::test]
    async fn maps_lookups_to_findings() {
        let findings = auditor(None, false).audit(&deps()).await;
        assert_eq!(findings.len(), 2);
        assert_eq!(findings[0].severity, Severity::Warning);
        assert!(findings[0].message.starts_with(UNRESOLVABLE));
        assert_eq!(findings[1].severity, Severity::Critical);
        assert_eq!(findings[1].code.as_deref(), Some("GHSA-0001"));
    }

    #[tokio::test]
    async fn source_error_keeps_earlier_findings() {
        let findings = auditor(Some(2), false).audit(&deps()).await;
        assert_eq!(findings.len(), 3);
        assert_eq!(findings[2].message, AUDIT_UNAVAILABLE);
        assert_eq!(findings[2].severity, Severity::Warning);
    }

    #[tokio::test]
    async fn stalled_source_times_out_with_one_finding() {
        let findings = auditor(Some(0), true).audit(&deps()).await;
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].message, AUDIT_UNAVAILABLE);
    }

    #[tokio::test]
    async fn no_dependencies_no_queries() {
        assert!(auditor(Some(0), false).audit(&[]).await.is_empty());
    }
}
