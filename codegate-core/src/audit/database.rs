use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use semver::{Version, VersionReq};
use serde::Deserialize;

use super::{Advisory, AuditError, Lookup, VulnerabilitySource};
use crate::artifact::DependencyRef;
use crate::finding::Severity;

const BUNDLED: &str = include_str!("../../data/advisories.toml");

#[derive(Debug, Deserialize)]
struct DatabaseFile {
    #[serde(default)]
    package: Vec<PackageEntry>,
}

#[derive(Debug, Deserialize)]
struct PackageEntry {
    name: String,
    #[serde(default, rename = "advisory")]
    advisories: Vec<AdvisoryEntry>,
}

#[derive(Debug, Deserialize)]
struct AdvisoryEntry {
    id: String,
    severity: String,
    affected: String,
    #[serde(default)]
    summary: Option<String>,
}

#[derive(Debug, Clone)]
struct AffectedRange {
    advisory: Advisory,
    affected: VersionReq,
}

/// In-memory advisory map keyed by normalized package name.
#[derive(Debug, Clone, Default)]
pub struct AdvisoryDatabase {
    packages: HashMap<String, Vec<AffectedRange>>,
}

impl AdvisoryDatabase {
    /// The snapshot compiled into the binary.
    pub fn bundled() -> Result<Self, AuditError> {
        Self::from_toml_str(BUNDLED, "<bundled>")
    }

    pub fn load(path: &Path) -> Result<Self, AuditError> {
        let content = std::fs::read_to_string(path).map_err(|err| AuditError::Database {
            path: path.display().to_string(),
            reason: err.to_string(),
        })?;
        Self::from_toml_str(&content, &path.display().to_string())
    }

    pub fn from_toml_str(content: &str, origin: &str) -> Result<Self, AuditError> {
        let database_error = |reason: String| AuditError::Database {
            path: origin.to_string(),
            reason,
        };
        let file: DatabaseFile =
            toml::from_str(content).map_err(|err| database_error(err.to_string()))?;

        let mut packages: HashMap<String, Vec<AffectedRange>> = HashMap::new();
        for package in file.package {
            let ranges = packages.entry(normalize_package_name(&package.name)).or_default();
            for entry in package.advisories {
                let severity = Severity::parse_lenient(&entry.severity).ok_or_else(|| {
                    database_error(format!(
                        "advisory {} has unknown severity '{}'",
                        entry.id, entry.severity
                    ))
                })?;
                let affected = VersionReq::parse(&entry.affected).map_err(|err| {
                    database_error(format!(
                        "advisory {} has invalid range '{}': {err}",
                        entry.id, entry.affected
                    ))
                })?;
                ranges.push(AffectedRange {
                    advisory: Advisory {
                        id: entry.id,
                        severity,
                        summary: entry.summary,
                    },
                    affected,
                });
            }
        }
        Ok(Self { packages })
    }

    pub fn len(&self) -> usize {
        self.packages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }

    /// Synchronous form of [`VulnerabilitySource::lookup`].
    pub fn query(&self, dependency: &DependencyRef) -> Lookup {
        let Some(ranges) = self.packages.get(&normalize_package_name(&dependency.name)) else {
            return Lookup::Unknown;
        };
        let Some(lowest) = lowest_admitted_version(&dependency.version_constraint) else {
            tracing::debug!(
                dependency = %dependency,
                "version constraint could not be interpreted"
            );
            return Lookup::Unknown;
        };
        Lookup::Known(
            ranges
                .iter()
                .filter(|range| range.affected.matches(&lowest))
                .map(|range| range.advisory.clone())
                .collect(),
        )
    }
}

#[async_trait]
impl VulnerabilitySource for AdvisoryDatabase {
    async fn lookup(&self, dependency: &DependencyRef) -> Result<Lookup, AuditError> {
        Ok(self.query(dependency))
    }
}

/// PEP 503 normalization: lowercase with runs of `-`, `_` and `.` folded
/// into a single `-`.
pub fn normalize_package_name(name: &str) -> String {
    let mut normalized = String::with_capacity(name.len());
    let mut pending_separator = false;
    for ch in name.trim().chars() {
        if matches!(ch, '-' | '_' | '.') {
            pending_separator = true;
            continue;
        }
        if pending_separator && !normalized.is_empty() {
            normalized.push('-');
        }
        pending_separator = false;
        normalized.extend(ch.to_lowercase());
    }
    normalized
}

/// The lowest version a pip- or npm-style constraint admits.
///
/// Lower-bound clauses (`==`, `>=`, `~=`, `^`, `~`, `>`, bare versions)
/// raise the floor; upper bounds and exclusions do not. An empty constraint
/// or `*` admits `0.0.0`. Returns `None` when a clause cannot be read.
pub fn lowest_admitted_version(constraint: &str) -> Option<Version> {
    let mut floor = Version::new(0, 0, 0);
    for clause in constraint.split(',').map(str::trim) {
        if clause.is_empty() || clause == "*" {
            continue;
        }
        let (operator, raw) = split_operator(clause);
        let version = parse_loose_version(raw)?;
        let candidate = match operator {
            "<" | "<=" | "!=" => continue,
            ">" => Version::new(version.major, version.minor, version.patch + 1),
            _ => version,
        };
        if candidate > floor {
            floor = candidate;
        }
    }
    Some(floor)
}

fn split_operator(clause: &str) -> (&str, &str) {
    const OPERATORS: [&str; 10] = ["===", "==", ">=", "<=", "~=", "!=", ">", "<", "^", "~"];
    for operator in OPERATORS {
        if let Some(rest) = clause.strip_prefix(operator) {
            return (operator, rest.trim());
        }
    }
    match clause.strip_prefix('=') {
        Some(rest) => ("==", rest.trim()),
        None => ("", clause),
    }
}

/// Accepts `1`, `1.2`, `1.2.3`, `1.2.*`, `v1.2.3` and PEP 440 suffixes such
/// as `2.0rc1` (the suffix is dropped).
fn parse_loose_version(raw: &str) -> Option<Version> {
    let raw = raw.trim().trim_start_matches('v');
    if let Ok(version) = Version::parse(raw) {
        return Some(version);
    }
    let mut parts = [0_u64; 3];
    let mut seen = 0;
    for (index, segment) in raw.split('.').take(3).enumerate() {
        if segment == "*" || segment == "x" {
            break;
        }
        let digits: String = segment.chars().take_while(char::is_ascii_digit).collect();
        if digits.is_empty() {
            break;
        }
        parts[index] = digits.parse().ok()?;
        seen = index + 1;
        if digits.len() != segment.len() {
            break;
        }
    }
    (seen > 0).then(|| Version::new(parts[0], parts[1], parts[2]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn v(major: u64, minor: u64, patch: u64) -> Option<Version> {
        Some(Version::new(major, minor, patch))
    }

    #[test]
    fn names_fold_like_pep_503() {
        assert_eq!(normalize_package_name("PyYAML"), "pyyaml");
        assert_eq!(normalize_package_name("zope.interface"), "zope-interface");
        assert_eq!(normalize_package_name("Foo__Bar-.baz"), "foo-bar-baz");
    }

    #[test]
    fn lowest_version_follows_lower_bounds() {
        assert_eq!(lowest_admitted_version(""), v(0, 0, 0));
        assert_eq!(lowest_admitted_version("*"), v(0, 0, 0));
        assert_eq!(lowest_admitted_version("==2.19.1"), v(2, 19, 1));
        assert_eq!(lowest_admitted_version(">=2.0,<3"), v(2, 0, 0));
        assert_eq!(lowest_admitted_version("~=1.4"), v(1, 4, 0));
        assert_eq!(lowest_admitted_version("<3"), v(0, 0, 0));
        assert_eq!(lowest_admitted_version(">1.0.0"), v(1, 0, 1));
        assert_eq!(lowest_admitted_version("^4.17.20"), v(4, 17, 20));
        assert_eq!(lowest_admitted_version("1.2.*"), v(1, 2, 0));
        assert_eq!(lowest_admitted_version("==2.0rc1"), v(2, 0, 0));
        assert_eq!(lowest_admitted_version("latest"), None);
    }

    #[test]
    fn bundled_database_parses() {
        let database = AdvisoryDatabase::bundled().expect("bundled database");
        assert!(!database.is_empty());
    }

    #[test]
    fn query_matches_affected_ranges() {
        let database = AdvisoryDatabase::from_toml_str(
            r#"
            [[package]]
            name = "PyYAML"
            [[package.advisory]]
            id = "CVE-2020-14343"
            severity = "critical"
            affected = "<5.4.0"

            [[package]]
            name = "clean-lib"
            "#,
            "test",
        )
        .expect("database");

        match database.query(&DependencyRef::new("pyyaml", "==5.3")) {
            Lookup::Known(advisories) => {
                assert_eq!(advisories.len(), 1);
                assert_eq!(advisories[0].severity, Severity::Critical);
            }
            Lookup::Unknown => panic!("pyyaml should be known"),
        }
        assert_eq!(
            database.query(&DependencyRef::new("py_yaml", ">=5.4")),
            Lookup::Unknown
        );
        assert_eq!(
            database.query(&DependencyRef::new("PyYAML", ">=5.4")),
            Lookup::Known(Vec::new())
        );
        assert_eq!(
            database.query(&DependencyRef::new("clean_lib", "")),
            Lookup::Known(Vec::new())
        );
        assert_eq!(
            database.query(&DependencyRef::new("nowhere", "")),
            Lookup::Unknown
        );
    }

    #[test]
    fn invalid_entries_are_rejected() {
        let bad_severity = AdvisoryDatabase::from_toml_str(
            "[[package]]\nname = \"x\"\n[[package.advisory]]\nid = \"A\"\nseverity = \"apocalyptic\"\naffected = \"<1\"\n",
            "test",
        );
        assert!(matches!(bad_severity, Err(AuditError::Database { .. })));

        let bad_range = AdvisoryDatabase::from_toml_str(
            "[[package]]\nname = \"x\"\n[[package.advisory]]\nid = \"A\"\nseverity = \"low\"\naffected = \"not a range\"\n",
            "test",
        );
        assert!(bad_range.is_err());
    }

    #[test]
    fn source_lookup_uses_the_bundled_data() {
        let database = AdvisoryDatabase::bundled().expect("bundled database");
        let lookup = tokio_test::block_on(
            database.lookup(&DependencyRef::new("unheard-of-package", "==1.0")),
        )
        .expect("lookup");
        assert_eq!(lookup, Lookup::Unknown);
    }
}
