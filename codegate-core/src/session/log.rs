use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};

use crate::artifact::ArtifactId;
use crate::report::ValidationReport;

const PREALLOCATED_RECORDS: usize = 8;

/// One validation performed during a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptRecord {
    /// 1-based.
    pub attempt_number: u32,
    pub artifact_id: ArtifactId,
    pub report: ValidationReport,
    pub timestamp: DateTime<Utc>,
}

/// Append-only history of one session, bounded by its attempt budget.
///
/// Records can only be added through the coordinator that owns the log;
/// callers get it back by value once the session is over.
#[derive(Debug, Clone, PartialEq)]
pub struct AttemptLog {
    records: Vec<AttemptRecord>,
    capacity: usize,
}

impl AttemptLog {
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            records: Vec::with_capacity(capacity.min(PREALLOCATED_RECORDS)),
            capacity,
        }
    }

    /// Returns `false` and drops the record when the log is full.
    pub(crate) fn append(&mut self, record: AttemptRecord) -> bool {
        if self.records.len() >= self.capacity {
            tracing::error!(
                attempt = record.attempt_number,
                capacity = self.capacity,
                "attempt log is full, record dropped"
            );
            return false;
        }
        self.records.push(record);
        true
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[AttemptRecord] {
        &self.records
    }

    pub fn iter(&self) -> impl Iterator<Item = &AttemptRecord> {
        self.records.iter()
    }

    pub fn last(&self) -> Option<&AttemptRecord> {
        self.records.last()
    }

    /// Whether any recorded attempt validated this content address.
    pub fn contains_artifact(&self, id: &ArtifactId) -> bool {
        self.records.iter().any(|record| &record.artifact_id == id)
    }
}

impl<'a> IntoIterator for &'a AttemptLog {
    type Item = &'a AttemptRecord;
    type IntoIter = std::slice::Iter<'a, AttemptRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}

impl Serialize for AttemptLog {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(&self.records)
    }
}
