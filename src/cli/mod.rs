use std::fs;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use codegate_config::{CodegateConfig, ConfigManager};
use codegate_core::sandbox::runtime_from_config;
use codegate_core::{AdvisoryDatabase, Artifact, Language, Validator};
use tokio_util::sync::CancellationToken;

mod args;
mod rules;
mod session;
mod validate;

pub use args::{Cli, Commands};
pub use rules::handle_rules_command;
pub use session::{SessionCommandOptions, handle_session_command};
pub use validate::handle_validate_command;

/// Resolve configuration from `--config` or the default locations, then
/// apply command-line overrides.
pub fn load_configuration(args: &Cli) -> Result<ConfigManager> {
    let mut manager = match &args.config {
        Some(path) => ConfigManager::load_from_file(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
        None => ConfigManager::load().context("Failed to load configuration")?,
    };

    if let Some(runtime) = args.runtime {
        let mut sandbox = toml::Table::new();
        sandbox.insert(
            "runtime".to_string(),
            toml::Value::String(runtime.as_str().to_string()),
        );
        let mut overrides = toml::Table::new();
        overrides.insert("sandbox".to_string(), toml::Value::Table(sandbox));
        manager
            .apply_runtime_overrides(toml::Value::Table(overrides))
            .context("Failed to apply --runtime override")?;
    }

    Ok(manager)
}

/// Read an artifact from a JSON document or a bare `.py` / `.js` file.
pub fn load_artifact(path: &Path) -> Result<Artifact> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read artifact {}", path.display()))?;
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or_default();

    if extension.eq_ignore_ascii_case("json") {
        return serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse artifact JSON {}", path.display()));
    }

    let language: Language = extension.parse().with_context(|| {
        format!(
            "Cannot infer the language of {}; use a .py, .js or .json file",
            path.display()
        )
    })?;
    Ok(Artifact::new(content, language))
}

/// Build a validator wired to the configured advisory database and runtime.
pub fn build_validator(config: &CodegateConfig) -> Result<Validator> {
    let database = match &config.audit.advisory_db {
        Some(path) => AdvisoryDatabase::load(path)
            .with_context(|| format!("Failed to load advisory database {}", path.display()))?,
        None => AdvisoryDatabase::bundled().context("Failed to load bundled advisories")?,
    };
    tracing::debug!(packages = database.len(), "advisory database loaded");

    for warning in config.sandbox.warnings() {
        tracing::warn!("{warning}");
    }

    let runtime = runtime_from_config(&config.sandbox);
    tracing::debug!(runtime = runtime.name(), "isolation runtime selected");
    Ok(Validator::from_config(config, Arc::new(database), runtime))
}

/// Token cancelled on the first Ctrl-C.
pub fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, cancelling");
            trigger.cancel();
        }
    });
    token
}

fn print_json<T: serde::Serialize>(value: &T, pretty: bool) -> Result<()> {
    let rendered = if pretty {
        serde_json::to_string_pretty(value)
    } else {
        serde_json::to_string(value)
    }
    .context("Failed to serialize output")?;
    println!("{rendered}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_fs::TempDir;
    use assert_fs::prelude::*;

    #[test]
    fn loads_json_and_bare_source_artifacts() {
        let dir = TempDir::new().expect("tempdir");
        let json = dir.child("artifact.json");
        json.write_str(
            r#"{"source": "import requests\n", "language": "python",
                "dependencies": [{"name": "requests", "version_constraint": "==2.19.0"}]}"#,
        )
        .expect("write json");
        let script = dir.child("main.js");
        script.write_str("console.log('hi');\n").expect("write js");

        let from_json = load_artifact(json.path()).expect("json artifact");
        assert_eq!(from_json.language(), Language::Python);
        assert_eq!(from_json.dependencies().len(), 1);

        let from_source = load_artifact(script.path()).expect("source artifact");
        assert_eq!(from_source.language(), Language::JavaScript);
        assert_eq!(from_source.source(), "console.log('hi');\n");
    }

    #[test]
    fn unknown_extension_is_an_error() {
        let dir = TempDir::new().expect("tempdir");
        let file = dir.child("main.rb");
        file.write_str("puts 1").expect("write");
        let error = load_artifact(file.path()).expect_err("unsupported");
        assert!(format!("{error:#}").contains("Cannot infer the language"));
    }
}
