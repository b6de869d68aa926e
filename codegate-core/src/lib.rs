//! # codegate-core
//!
//! Validation runtime for machine-produced code. An [`Artifact`] goes
//! through three independent checks and comes back as a
//! [`ValidationReport`]:
//!
//! - **Static rules** ([`rules`]): tree-sitter parsing plus a declarative
//!   table of forbidden constructs per language.
//! - **Dependency audit** ([`audit`]): declared requirements checked
//!   against a [`VulnerabilitySource`], bounded by a short timeout.
//! - **Sandbox execution** ([`sandbox`]): the artifact and its test
//!   harness run in a read-only, resource-limited, network-less context.
//!
//! [`RetryCoordinator`] wraps the [`Validator`] in a bounded
//! regenerate-and-revalidate loop and returns the final report along
//! with an append-only [`AttemptLog`].
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use codegate_config::CodegateConfig;
//! use codegate_core::{AdvisoryDatabase, Artifact, Language, RetryCoordinator, Validator};
//! use codegate_core::sandbox::runtime_from_config;
//!
//! # async fn demo(regenerator: &dyn codegate_core::Regenerator) -> anyhow::Result<()> {
//! let config = CodegateConfig::default();
//! let validator = Validator::from_config(
//!     &config,
//!     Arc::new(AdvisoryDatabase::bundled()?),
//!     runtime_from_config(&config.sandbox),
//! );
//! let coordinator = RetryCoordinator::new(validator);
//! let outcome = coordinator
//!     .run(
//!         Artifact::new("print('hello')", Language::Python),
//!         regenerator,
//!         config.retry.max_attempts,
//!         &tokio_util::sync::CancellationToken::new(),
//!     )
//!     .await?;
//! println!("{}", outcome.summary());
//! # Ok(())
//! # }
//! ```

pub mod artifact;
pub mod audit;
pub mod finding;
pub mod report;
pub mod rules;
pub mod sandbox;
pub mod scoring;
pub mod session;
pub mod validator;

pub use artifact::{Artifact, ArtifactError, ArtifactId, DependencyRef, Language};
pub use audit::{
    Advisory, AdvisoryDatabase, AuditError, DependencyAuditor, EmptySource, Lookup,
    VulnerabilitySource,
};
pub use finding::{Finding, FindingKind, Location, Severity};
pub use report::{ExecutionOutcome, ValidationReport};
pub use rules::{Rule, RuleEngine, RuleTable};
pub use sandbox::{IsolationRuntime, SandboxError, SandboxExecutor, TestHarness};
pub use scoring::ScoringPolicy;
pub use session::{
    AttemptLog, AttemptRecord, ExhaustionReason, Regenerator, RetryCoordinator, SessionError,
    SessionOutcome, SessionState,
};
pub use validator::Validator;
