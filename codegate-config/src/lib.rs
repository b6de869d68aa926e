//! Typed configuration for codegate.
//!
//! Every section deserializes from `codegate.toml` with per-field serde
//! defaults, so an empty file (or no file at all) yields a usable
//! configuration. [`ConfigManager`] stacks the user and workspace files as
//! TOML layers and validates the merged result before handing it out.

pub mod audit;
pub mod constants;
pub mod debug;
pub mod loader;
pub mod retry;
pub mod rules;
pub mod sandbox;
pub mod scoring;

pub use audit::AuditConfig;
pub use debug::{DebugConfig, TraceLevel};
pub use loader::{CodegateConfig, ConfigManager, ConfigPaths, merge_toml_values};
pub use retry::RetryConfig;
pub use rules::RulesConfig;
pub use sandbox::{LanguageSettings, ResourceLimits, RuntimeKind, SandboxConfig};
pub use scoring::ScoringConfig;
