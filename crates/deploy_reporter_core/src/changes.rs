use serde::Serialize;

use crate::snapshot::{TicketSnapshotEntry, index_by_key};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChangedTicket {
    pub key: String,
    pub summary: String,
    pub url: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SnapshotDiff {
    pub added: Vec<ChangedTicket>,
    pub removed: Vec<ChangedTicket>,
    pub updated: Vec<ChangedTicket>,
}

impl SnapshotDiff {
    pub fn total_changes(&self) -> usize {
        self.added.len() + self.removed.len() + self.updated.len()
    }

    pub fn is_empty(&self) -> bool {
        self.total_changes() == 0
    }

    pub fn summary_line(&self) -> String {
        format!(
            "+{} -{} ~{} (total: {})",
            self.added.len(),
            self.removed.len(),
            self.updated.len(),
            self.total_changes()
        )
    }
}

/// Classify tickets by presence first; a ticket present on both sides is
/// "updated" only when its scheduled date moved. Summary, status and
/// assignee edits are not reported.
pub fn diff<F>(
    previous: Option<&[TicketSnapshotEntry]>,
    current: &[TicketSnapshotEntry],
    url_for: F,
) -> SnapshotDiff
where
    F: Fn(&str) -> String,
{
    let changed = |entry: &TicketSnapshotEntry| ChangedTicket {
        key: entry.key.clone(),
        summary: entry.summary.clone(),
        url: url_for(&entry.key),
    };

    let current_by_key = index_by_key(current);
    let Some(previous) = previous else {
        return SnapshotDiff {
            added: current_by_key.values().map(|entry| changed(entry)).collect(),
            ..SnapshotDiff::default()
        };
    };
    let previous_by_key = index_by_key(previous);

    let mut output = SnapshotDiff::default();
    for (key, entry) in &current_by_key {
        match previous_by_key.get(key) {
            None => output.added.push(changed(entry)),
            Some(before) if before.scheduled_date != entry.scheduled_date => {
                output.updated.push(changed(entry));
            }
            Some(_) => {}
        }
    }
    for (key, entry) in &previous_by_key {
        if !current_by_key.contains_key(key) {
            output.removed.push(changed(entry));
        }
    }
    output
}
