//! Last-writer-wins merge engine
//!
//! Records are keyed by `id` and compared by `updated_at`. A remote version
//! replaces the local one only when its timestamp is strictly greater, so a
//! tie keeps the existing (local) entry and re-applying the same snapshot is
//! a no-op. Tombstones are ordinary versions: a delete wins or loses by the
//! same rule, which is what stops stale copies from resurrecting it.
//!
//! The same functions run on devices and on the server.

use std::collections::HashMap;

use serde_json::Value;

use crate::models::SyncRecord;

/// Per-merge counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeStats {
    /// Remote records with no local counterpart
    pub inserted: usize,
    /// Local records replaced by a strictly newer remote version
    pub replaced: usize,
    /// Remote records discarded because the local version was newer or equal
    pub kept_local: usize,
}

/// Merge `remote` into `local`, keeping tombstones.
///
/// This is the persisting pathway: its output is what gets written to local
/// storage or the server store. Output order is local order followed by
/// newly inserted remote records.
pub fn merge_records<T: SyncRecord>(local: &[T], remote: &[T]) -> Vec<T> {
    merge_with_stats(local, remote).0
}

/// [`merge_records`] plus counters describing what happened.
pub fn merge_with_stats<T: SyncRecord>(local: &[T], remote: &[T]) -> (Vec<T>, MergeStats) {
    let mut merged: Vec<T> = Vec::with_capacity(local.len() + remote.len());
    let mut index: HashMap<String, usize> = HashMap::with_capacity(local.len() + remote.len());
    let mut stats = MergeStats::default();

    for record in local {
        upsert(&mut merged, &mut index, record, None);
    }
    for record in remote {
        upsert(&mut merged, &mut index, record, Some(&mut stats));
    }

    (merged, stats)
}

fn upsert<T: SyncRecord>(
    merged: &mut Vec<T>,
    index: &mut HashMap<String, usize>,
    incoming: &T,
    stats: Option<&mut MergeStats>,
) {
    match index.get(incoming.id()) {
        None => {
            index.insert(incoming.id().to_string(), merged.len());
            merged.push(incoming.clone());
            if let Some(stats) = stats {
                stats.inserted += 1;
            }
        }
        Some(&position) => {
            if incoming.updated_at() > merged[position].updated_at() {
                merged[position] = incoming.clone();
                if let Some(stats) = stats {
                    stats.replaced += 1;
                }
            } else if let Some(stats) = stats {
                stats.kept_local += 1;
            }
        }
    }
}

/// Read-side projection: drop tombstones.
pub fn visible<T: SyncRecord>(records: &[T]) -> Vec<T> {
    records
        .iter()
        .filter(|record| !record.is_deleted())
        .cloned()
        .collect()
}

/// Merge and project for display in one step.
pub fn merge_visible<T: SyncRecord>(local: &[T], remote: &[T]) -> Vec<T> {
    visible(&merge_records(local, remote))
}

/// Coerce an untrusted JSON value into records.
///
/// Anything that is not an array is an empty collection; array elements that
/// do not match the record shape are dropped.
pub fn records_from_value<T: SyncRecord>(value: Value) -> Vec<T> {
    match value {
        Value::Array(items) => items
            .into_iter()
            .filter_map(|item| serde_json::from_value(item).ok())
            .collect(),
        _ => Vec::new(),
    }
}

/// Merge two untrusted JSON payloads, keeping tombstones.
pub fn merge_json<T: SyncRecord>(local: Value, remote: Value) -> Vec<T> {
    merge_records(&records_from_value::<T>(local), &records_from_value::<T>(remote))
}
