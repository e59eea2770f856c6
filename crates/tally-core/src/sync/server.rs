//! Remote side of the sync contract.
//!
//! The collection store keeps one durable array per collection. A push merges
//! the incoming batch with the stored array using the client merge engine,
//! and both pushes and pulls answer with the records the store accepted after
//! the caller's cursor.
//!
//! Cursors are store time. Every version the store inserts or replaces is
//! stamped with `syncedAt`, so an edit made offline hours ago still reaches
//! peers whose cursor is newer than its `updatedAt`.

use std::collections::HashMap;

use super::SyncResponse;
use crate::merge::{merge_with_stats, MergeStats};
use crate::models::{Record, SyncRecord};

/// Outcome of merging one pushed batch into the stored collection.
#[derive(Debug, Clone, PartialEq)]
pub struct PushResult {
    /// New durable contents, tombstones included
    pub stored: Vec<Record>,
    /// Whether `stored` differs from what was there before
    pub changed: bool,
    pub stats: MergeStats,
    pub response: SyncResponse<Record>,
}

/// Merge `incoming` into `stored` and build the reply for the caller.
///
/// Versions the store takes are stamped with `now` as their `syncedAt`.
/// Re-sending the same batch leaves `stored` unchanged.
pub fn apply_push(
    stored: &[Record],
    incoming: &[Record],
    since: Option<i64>,
    now: i64,
) -> PushResult {
    let previous = stored
        .iter()
        .map(|record| (record.id.as_str(), record.updated_at))
        .collect::<HashMap<_, _>>();

    let (mut merged, stats) = merge_with_stats(stored, incoming);
    for record in &mut merged {
        let accepted = previous
            .get(record.id.as_str())
            .is_none_or(|&updated_at| record.updated_at > updated_at);
        if accepted {
            record.synced_at = Some(now);
        }
    }

    let changed = stats.inserted > 0 || stats.replaced > 0 || merged.len() != stored.len();
    let response = answer_pull(&merged, since, now);
    PushResult {
        stored: merged,
        changed,
        stats,
        response,
    }
}

/// Build a read-only reply from the stored collection.
pub fn answer_pull(stored: &[Record], since: Option<i64>, now: i64) -> SyncResponse<Record> {
    SyncResponse {
        data: changed_since(stored, since),
        total_count: stored.len(),
        sync_time: now,
    }
}

/// Records the store accepted strictly after `since` (all when `None`).
pub fn changed_since(records: &[Record], since: Option<i64>) -> Vec<Record> {
    let Some(since) = since else {
        return records.to_vec();
    };
    records
        .iter()
        .filter(|record| change_stamp(record) > since)
        .cloned()
        .collect()
}

/// Store receipt time, or `updatedAt` for versions written before stamping.
pub fn change_stamp(record: &Record) -> i64 {
    record.synced_at.unwrap_or_else(|| record.updated_at())
}
