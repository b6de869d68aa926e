use std::path::{Path, PathBuf};

use toml::Value as TomlValue;

use crate::loader::merge_toml_values;

/// Where a configuration layer came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigLayerSource {
    /// `~/.codegate/codegate.toml`
    User { file: PathBuf },
    /// `codegate.toml` in the workspace root, or an explicit `--config` file.
    Workspace { file: PathBuf },
    /// Overrides applied after loading (CLI flags).
    Runtime,
}

impl ConfigLayerSource {
    pub fn file(&self) -> Option<&Path> {
        match self {
            Self::User { file } | Self::Workspace { file } => Some(file),
            Self::Runtime => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConfigLayerEntry {
    pub source: ConfigLayerSource,
    pub config: TomlValue,
}

impl ConfigLayerEntry {
    pub fn new(source: ConfigLayerSource, config: TomlValue) -> Self {
        Self { source, config }
    }
}

/// Configuration layers ordered from lowest to highest precedence.
#[derive(Debug, Clone, Default)]
pub struct ConfigLayerStack {
    layers: Vec<ConfigLayerEntry>,
}

impl ConfigLayerStack {
    pub fn push(&mut self, layer: ConfigLayerEntry) {
        self.layers.push(layer);
    }

    /// Merge all layers into a single effective table.
    pub fn effective_config(&self) -> TomlValue {
        let mut merged = TomlValue::Table(toml::Table::new());
        for layer in &self.layers {
            merge_toml_values(&mut merged, &layer.config);
        }
        merged
    }

    pub fn layers(&self) -> &[ConfigLayerEntry] {
        &self.layers
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// Path of the highest-precedence file layer.
    pub fn last_file(&self) -> Option<&Path> {
        self.layers.iter().rev().find_map(|layer| layer.source.file())
    }
}
