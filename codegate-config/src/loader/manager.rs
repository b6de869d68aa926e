use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::constants::{CONFIG_FILE_NAME, USER_CONFIG_DIR, env};
use crate::loader::config::CodegateConfig;
use crate::loader::layers::{ConfigLayerEntry, ConfigLayerSource, ConfigLayerStack};

/// Candidate files consulted while building the layer stack.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigPaths {
    /// User-level config; skipped when missing.
    pub home_config: Option<PathBuf>,
    /// Workspace config; skipped when missing.
    pub workspace_config: Option<PathBuf>,
}

impl ConfigPaths {
    /// Default locations for a workspace: `~/.codegate/codegate.toml` and
    /// `<workspace>/codegate.toml`.
    pub fn for_workspace(workspace: &Path) -> Self {
        Self {
            home_config: home_config_path(),
            workspace_config: Some(workspace.join(CONFIG_FILE_NAME)),
        }
    }
}

fn home_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(USER_CONFIG_DIR).join(CONFIG_FILE_NAME))
}

/// Loads, layers and validates `codegate.toml`.
#[derive(Debug, Clone)]
pub struct ConfigManager {
    config: CodegateConfig,
    config_path: Option<PathBuf>,
    layer_stack: ConfigLayerStack,
}

impl ConfigManager {
    /// Load configuration from the default locations.
    ///
    /// `CODEGATE_CONFIG_PATH` wins over `CODEGATE_WORKSPACE`, which wins over
    /// the current directory.
    pub fn load() -> Result<Self> {
        if let Ok(config_path) = std::env::var(env::CONFIG_PATH) {
            let trimmed = config_path.trim();
            if !trimmed.is_empty() {
                return Self::load_from_file(trimmed).with_context(|| {
                    format!(
                        "Failed to load configuration from {}={}",
                        env::CONFIG_PATH,
                        trimmed
                    )
                });
            }
        }

        if let Ok(workspace_path) = std::env::var(env::WORKSPACE) {
            let trimmed = workspace_path.trim();
            if !trimmed.is_empty() {
                return Self::load_from_workspace(trimmed).with_context(|| {
                    format!(
                        "Failed to load configuration from {}={}",
                        env::WORKSPACE,
                        trimmed
                    )
                });
            }
        }

        Self::load_from_workspace(std::env::current_dir()?)
    }

    pub fn load_from_workspace(workspace: impl AsRef<Path>) -> Result<Self> {
        Self::load_from_paths(&ConfigPaths::for_workspace(workspace.as_ref()))
    }

    /// Load the user config and then an explicit file on top of it.
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        // An explicit file must exist, unlike the discovered layers.
        if !path.is_file() {
            anyhow::bail!("Config file not found: {}", path.display());
        }
        Self::load_from_paths(&ConfigPaths {
            home_config: home_config_path(),
            workspace_config: Some(path.to_path_buf()),
        })
    }

    pub fn load_from_paths(paths: &ConfigPaths) -> Result<Self> {
        let mut layer_stack = ConfigLayerStack::default();

        if let Some(home_config) = &paths.home_config
            && home_config.is_file()
        {
            let toml = load_toml_from_file(home_config)?;
            layer_stack.push(ConfigLayerEntry::new(
                ConfigLayerSource::User {
                    file: home_config.clone(),
                },
                toml,
            ));
        }

        if let Some(workspace_config) = &paths.workspace_config
            && workspace_config.is_file()
        {
            let toml = load_toml_from_file(workspace_config)?;
            layer_stack.push(ConfigLayerEntry::new(
                ConfigLayerSource::Workspace {
                    file: workspace_config.clone(),
                },
                toml,
            ));
        }

        let config = if layer_stack.is_empty() {
            tracing::debug!("no codegate.toml found, using defaults");
            CodegateConfig::default()
        } else {
            let merged: CodegateConfig = layer_stack
                .effective_config()
                .try_into()
                .context("Failed to deserialize effective configuration")?;
            merged
        };

        config
            .validate()
            .context("Configuration failed validation")?;

        let config_path = layer_stack.last_file().map(Path::to_path_buf);
        Ok(Self {
            config,
            config_path,
            layer_stack,
        })
    }

    /// Apply a runtime layer (CLI flags) on top of the loaded files.
    pub fn apply_runtime_overrides(&mut self, overrides: toml::Value) -> Result<()> {
        let mut stack = self.layer_stack.clone();
        stack.push(ConfigLayerEntry::new(ConfigLayerSource::Runtime, overrides));

        let config: CodegateConfig = stack
            .effective_config()
            .try_into()
            .context("Failed to apply runtime configuration overrides")?;
        config
            .validate()
            .context("Runtime overrides produced an invalid configuration")?;

        self.config = config;
        self.layer_stack = stack;
        Ok(())
    }

    pub fn config(&self) -> &CodegateConfig {
        &self.config
    }

    pub fn into_config(self) -> CodegateConfig {
        self.config
    }

    /// Highest-precedence file that contributed to the configuration.
    pub fn config_path(&self) -> Option<&Path> {
        self.config_path.as_deref()
    }

    pub fn layer_stack(&self) -> &ConfigLayerStack {
        &self.layer_stack
    }
}

fn load_toml_from_file(path: &Path) -> Result<toml::Value> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}
