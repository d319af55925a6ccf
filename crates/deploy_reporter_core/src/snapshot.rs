use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use tracing::warn;

use crate::tracker::TicketRecord;

pub const UNASSIGNED: &str = "unassigned";

/// One ticket as captured by a run. `scheduled_date` is the only field that
/// counts toward "updated".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketSnapshotEntry {
    pub key: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub summary: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub status: String,
    #[serde(default = "unassigned")]
    pub assignee: String,
    #[serde(default, rename = "deploy_date", deserialize_with = "null_as_empty")]
    pub scheduled_date: String,
}

fn unassigned() -> String {
    UNASSIGNED.to_string()
}

fn null_as_empty<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

/// Key-sorted entries, one per key. When a key repeats, the first record
/// wins.
pub fn serialize(tickets: &[TicketRecord]) -> Vec<TicketSnapshotEntry> {
    let mut entries = BTreeMap::new();
    for ticket in tickets {
        if entries.contains_key(ticket.key.as_str()) {
            warn!(key = %ticket.key, "duplicate ticket key in result set; keeping first");
            continue;
        }
        let entry = TicketSnapshotEntry {
            key: ticket.key.clone(),
            summary: ticket.summary.clone(),
            status: ticket.status.clone(),
            assignee: ticket
                .assignee
                .as_ref()
                .map(|assignee| assignee.display_name.trim())
                .filter(|name| !name.is_empty())
                .map(ToString::to_string)
                .unwrap_or_else(unassigned),
            scheduled_date: ticket.scheduled_date.clone().unwrap_or_default(),
        };
        entries.insert(ticket.key.clone(), entry);
    }
    entries.into_values().collect()
}

/// Snapshots compare as maps keyed by ticket key; sequence order is ignored.
pub fn index_by_key(entries: &[TicketSnapshotEntry]) -> BTreeMap<&str, &TicketSnapshotEntry> {
    entries
        .iter()
        .map(|entry| (entry.key.as_str(), entry))
        .collect()
}

#[derive(Debug, Clone)]
pub struct SnapshotStore {
    path: PathBuf,
}

impl SnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Missing or unreadable snapshots mean "first run".
    pub fn load(&self) -> Option<Vec<TicketSnapshotEntry>> {
        read_json_or(&self.path, None)
    }

    pub fn save(&self, entries: &[TicketSnapshotEntry]) -> Result<()> {
        write_json_atomic(&self.path, entries)
    }
}

/// Read a JSON document, falling back to `default` when the file is absent
/// or does not parse.
pub(crate) fn read_json_or<T: DeserializeOwned>(path: &Path, default: T) -> T {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(_) => return default,
    };
    match serde_json::from_str(&content) {
        Ok(value) => value,
        Err(error) => {
            warn!(path = %path.display(), %error, "ignoring unparseable state file");
            default
        }
    }
}

/// Whole-file rewrite through a sibling temp file and rename.
pub(crate) fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let rendered = serde_json::to_string_pretty(value).context("failed to serialize state")?;
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| "state.json".to_string());
    let temp_path = path.with_file_name(format!(".{file_name}.tmp"));
    fs::write(&temp_path, rendered)
        .with_context(|| format!("failed to write {}", temp_path.display()))?;
    fs::rename(&temp_path, path)
        .with_context(|| format!("failed to replace {}", path.display()))?;
    Ok(())
}
