use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use anyhow::Result;
use sha2::{Digest, Sha256};

use crate::changes::{ChangedTicket, SnapshotDiff};
use crate::snapshot::{read_json_or, write_json_atomic};

pub type NotifiedSet = BTreeSet<String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ChangeKind {
    Added,
    Removed,
    Updated,
}

impl ChangeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Added => "added",
            Self::Removed => "removed",
            Self::Updated => "updated",
        }
    }
}

/// Label line followed by one `kind\tkey\tsummary` line per change, sorted by
/// key then kind. URLs do not participate.
pub fn canonicalize(diff: &SnapshotDiff, label: &str) -> String {
    let mut rows: Vec<(&str, ChangeKind, &str)> = Vec::with_capacity(diff.total_changes());
    let buckets: [(ChangeKind, &[ChangedTicket]); 3] = [
        (ChangeKind::Added, &diff.added),
        (ChangeKind::Removed, &diff.removed),
        (ChangeKind::Updated, &diff.updated),
    ];
    for (kind, bucket) in buckets {
        for item in bucket {
            rows.push((item.key.as_str(), kind, item.summary.as_str()));
        }
    }
    rows.sort();

    let mut output = escape_field(label);
    output.push('\n');
    for (key, kind, summary) in rows {
        output.push_str(kind.as_str());
        output.push('\t');
        output.push_str(&escape_field(key));
        output.push('\t');
        output.push_str(&escape_field(summary));
        output.push('\n');
    }
    output
}

pub fn fingerprint(diff: &SnapshotDiff, label: &str) -> String {
    let digest = Sha256::digest(canonicalize(diff, label).as_bytes());
    let mut output = String::with_capacity(64);
    for byte in digest.iter() {
        output.push_str(&format!("{byte:02x}"));
    }
    output
}

pub fn should_notify(fingerprint: &str, notified: &NotifiedSet) -> bool {
    !notified.contains(fingerprint)
}

pub fn record_notified(fingerprint: &str, mut notified: NotifiedSet) -> NotifiedSet {
    notified.insert(fingerprint.to_string());
    notified
}

fn escape_field(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('\t', "\\t")
        .replace('\n', "\\n")
}

/// Persistence seam for the notified-fingerprint and notified-key sets.
pub trait SetStore {
    /// Absent or unreadable state loads as an empty set.
    fn load(&self) -> NotifiedSet;
    fn save(&self, set: &NotifiedSet) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct JsonSetStore {
    path: PathBuf,
}

impl JsonSetStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SetStore for JsonSetStore {
    fn load(&self) -> NotifiedSet {
        read_json_or::<Vec<String>>(&self.path, Vec::new())
            .into_iter()
            .collect()
    }

    fn save(&self, set: &NotifiedSet) -> Result<()> {
        let values = set.iter().collect::<Vec<_>>();
        write_json_atomic(&self.path, &values)
    }
}
