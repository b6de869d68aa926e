//! Candidate code units and their content address.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ArtifactError {
    #[error("unsupported language '{0}' (expected python or javascript)")]
    UnsupportedLanguage(String),
}

/// Languages the rule engine and sandbox know how to handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Python,
    #[serde(alias = "js", alias = "node")]
    JavaScript,
}

impl Language {
    pub const ALL: [Self; 2] = [Self::Python, Self::JavaScript];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Python => "python",
            Self::JavaScript => "javascript",
        }
    }

    /// File name the artifact is materialized under in the sandbox.
    pub fn entrypoint(self) -> &'static str {
        match self {
            Self::Python => "main.py",
            Self::JavaScript => "main.js",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Language {
    type Err = ArtifactError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "python" | "py" => Ok(Self::Python),
            "javascript" | "js" | "node" => Ok(Self::JavaScript),
            other => Err(ArtifactError::UnsupportedLanguage(other.to_string())),
        }
    }
}

/// One declared dependency, e.g. `requests` / `>=2.20`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DependencyRef {
    pub name: String,
    #[serde(default)]
    pub version_constraint: String,
}

impl DependencyRef {
    pub fn new(name: impl Into<String>, version_constraint: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version_constraint: version_constraint.into(),
        }
    }
}

impl fmt::Display for DependencyRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.version_constraint.is_empty() {
            f.write_str(&self.name)
        } else {
            write!(f, "{}{}", self.name, self.version_constraint)
        }
    }
}

/// Lowercase hex SHA-256 content address of an artifact.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArtifactId(String);

impl ArtifactId {
    /// Hash the source followed by every dependency in declaration order.
    /// Each field is length-prefixed so `("ab", "c")` and `("a", "bc")`
    /// address differently.
    pub fn compute(source: &str, dependencies: &[DependencyRef]) -> Self {
        let mut hasher = Sha256::new();
        update_field(&mut hasher, source.as_bytes());
        hasher.update((dependencies.len() as u64).to_le_bytes());
        for dependency in dependencies {
            update_field(&mut hasher, dependency.name.as_bytes());
            update_field(&mut hasher, dependency.version_constraint.as_bytes());
        }
        let digest = hasher.finalize();
        let mut hex = String::with_capacity(digest.len() * 2);
        for byte in digest {
            hex.push_str(&format!("{byte:02x}"));
        }
        Self(hex)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 hex characters, for logs.
    pub fn short(&self) -> &str {
        &self.0[..self.0.len().min(12)]
    }
}

fn update_field(hasher: &mut Sha256, bytes: &[u8]) {
    hasher.update((bytes.len() as u64).to_le_bytes());
    hasher.update(bytes);
}

impl fmt::Display for ArtifactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An immutable candidate code unit. The id is computed once at
/// construction and every builder step recomputes it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Artifact {
    id: ArtifactId,
    source: String,
    language: Language,
    dependencies: Vec<DependencyRef>,
    metadata: BTreeMap<String, String>,
}

impl Artifact {
    pub fn new(source: impl Into<String>, language: Language) -> Self {
        let source = source.into();
        Self {
            id: ArtifactId::compute(&source, &[]),
            source,
            language,
            dependencies: Vec::new(),
            metadata: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_dependencies(mut self, dependencies: impl IntoIterator<Item = DependencyRef>) -> Self {
        self.dependencies = dependencies.into_iter().collect();
        self.id = ArtifactId::compute(&self.source, &self.dependencies);
        self
    }

    /// Metadata is carried along for the caller and never affects identity.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn id(&self) -> &ArtifactId {
        &self.id
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn language(&self) -> Language {
        self.language
    }

    pub fn dependencies(&self) -> &[DependencyRef] {
        &self.dependencies
    }

    pub fn metadata(&self) -> &BTreeMap<String, String> {
        &self.metadata
    }
}

/// Wire shape accepted from generators and files; the id is never trusted
/// from input and is always recomputed.
#[derive(Deserialize)]
struct ArtifactInput {
    source: String,
    language: Language,
    #[serde(default)]
    dependencies: Vec<DependencyRef>,
    #[serde(default)]
    metadata: BTreeMap<String, String>,
}

impl<'de> Deserialize<'de> for Artifact {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let input = ArtifactInput::deserialize(deserializer)?;
        let mut artifact =
            Self::new(input.source, input.language).with_dependencies(input.dependencies);
        artifact.metadata = input.metadata;
        Ok(artifact)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn identity_ignores_language_and_metadata() {
        let python = Artifact::new("print(1)", Language::Python);
        let js = Artifact::new("print(1)", Language::JavaScript).with_metadata("prompt", "x");
        assert_eq!(python.id(), js.id());
        assert_eq!(python.id().as_str().len(), 64);
    }

    #[test]
    fn identity_tracks_dependencies_and_their_order() {
        let base = Artifact::new("x = 1", Language::Python);
        let one = base
            .clone()
            .with_dependencies([DependencyRef::new("a", "==1"), DependencyRef::new("b", "")]);
        let swapped = base
            .clone()
            .with_dependencies([DependencyRef::new("b", ""), DependencyRef::new("a", "==1")]);
        assert_ne!(base.id(), one.id());
        assert_ne!(one.id(), swapped.id());
    }

    #[test]
    fn fields_are_length_prefixed() {
        let left = ArtifactId::compute("ab", &[DependencyRef::new("c", "")]);
        let right = ArtifactId::compute("a", &[DependencyRef::new("bc", "")]);
        assert_ne!(left, right);
    }

    #[test]
    fn deserialization_recomputes_id() {
        let artifact: Artifact = serde_json::from_str(
            r#"{"id":"forged","source":"print('hi')","language":"python",
                "dependencies":[{"name":"requests","version_constraint":">=2.0"}]}"#,
        )
        .expect("artifact json");
        let expected = Artifact::new("print('hi')", Language::Python)
            .with_dependencies([DependencyRef::new("requests", ">=2.0")]);
        assert_eq!(artifact.id(), expected.id());
        assert_eq!(artifact.dependencies().len(), 1);
    }

    #[test]
    fn language_parsing() {
        assert_eq!("Python".parse::<Language>(), Ok(Language::Python));
        assert_eq!("node".parse::<Language>(), Ok(Language::JavaScript));
        assert!("ruby".parse::<Language>().is_err());
    }
}
