//! Local storage retention
//!
//! Local collections are a recent-use cache of the server. A sweep evicts
//! records older than the retention window and tombstones the server has
//! already received, at most once per calendar day, or sooner when storage
//! use crosses a threshold.
//!
//! Eviction rules per collection:
//! - protected keys (session, users, settings, outlets) are never touched
//! - collections keyed by a domain date (stock checks) drop records whose
//!   date falls before the window
//! - other core collections only drop tombstones
//! - non-core collections drop tombstones and records older than the window
//!   by `updatedAt`, falling back to their date field; once empty the key is
//!   removed
//!
//! A tombstone is dropped only once it is older than the window, or older
//! than the snapshot this device last pushed successfully.
//!
//! Each key is rewritten under the store's writer lock for that key, the same
//! lock collection mutations hold. Views published before the sweep are stale
//! until their owner refreshes them.

use std::sync::Arc;

use serde_json::Value;

use crate::error::Result;
use crate::models::{
    acked_key, CollectionName, CollectionSpec, Record, SyncRecord, CURRENT_USER_KEY,
    DEVICE_ID_KEY, KEY_PREFIX, LAST_CLEANUP_KEY, SETTINGS_KEY, USERS_KEY,
};
use crate::store::KeyValueStore;
use crate::util::{day_index, DAY_MS};

const PROTECTED_KEYS: [&str; 5] = [
    CURRENT_USER_KEY,
    USERS_KEY,
    SETTINGS_KEY,
    LAST_CLEANUP_KEY,
    DEVICE_ID_KEY,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionConfig {
    /// Days of history kept locally
    pub window_days: u32,
    /// Storage use that triggers a sweep regardless of the daily schedule
    pub size_threshold_bytes: u64,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            window_days: 7,
            size_threshold_bytes: 4 * 1024 * 1024,
        }
    }
}

/// What one sweep did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub keys_scanned: usize,
    pub records_dropped: usize,
    pub keys_removed: usize,
    /// Keys skipped because they could not be read or rewritten
    pub keys_failed: usize,
}

pub struct RetentionPolicy<S> {
    store: Arc<S>,
    config: RetentionConfig,
}

impl<S: KeyValueStore> RetentionPolicy<S> {
    pub const fn new(store: Arc<S>, config: RetentionConfig) -> Self {
        Self { store, config }
    }

    pub const fn config(&self) -> RetentionConfig {
        self.config
    }

    /// Sweep if none ran today or storage use is over the threshold.
    pub async fn maybe_run(&self, now: i64) -> Result<Option<SweepReport>> {
        let last = self
            .store
            .get(LAST_CLEANUP_KEY)
            .await?
            .and_then(|raw| raw.trim().parse::<i64>().ok());
        let due = last.is_none_or(|last| day_index(last) != day_index(now));

        let usage = self.store.usage_bytes().await?;
        let over_threshold = usage > self.config.size_threshold_bytes;

        if !due && !over_threshold {
            return Ok(None);
        }
        if over_threshold {
            tracing::info!(
                usage,
                threshold = self.config.size_threshold_bytes,
                "Storage over threshold; sweeping"
            );
        }
        self.run(now).await.map(Some)
    }

    /// Sweep every collection key now.
    ///
    /// Per-key failures are logged and counted; only failing to enumerate
    /// keys or to record the sweep time is an error.
    pub async fn run(&self, now: i64) -> Result<SweepReport> {
        let cutoff = (day_index(now) - i64::from(self.config.window_days)) * DAY_MS;
        let mut report = SweepReport::default();

        for key in self.store.keys().await? {
            if PROTECTED_KEYS.contains(&key.as_str()) {
                continue;
            }
            let Some(name) = key
                .strip_prefix(KEY_PREFIX)
                .and_then(|name| CollectionName::new(name).ok())
            else {
                continue;
            };
            let spec = name.spec();
            if spec.protected {
                continue;
            }

            report.keys_scanned += 1;
            match self.sweep_key(&key, &name, spec, cutoff).await {
                Ok(swept) => {
                    report.records_dropped += swept.dropped;
                    report.keys_removed += usize::from(swept.removed);
                }
                Err(error) => {
                    tracing::warn!(key = %key, error = %error, "Retention sweep skipped key");
                    report.keys_failed += 1;
                }
            }
        }

        self.store.set(LAST_CLEANUP_KEY, &now.to_string()).await?;
        tracing::info!(
            scanned = report.keys_scanned,
            dropped = report.records_dropped,
            removed = report.keys_removed,
            failed = report.keys_failed,
            "Retention sweep finished"
        );
        Ok(report)
    }

    async fn sweep_key(
        &self,
        key: &str,
        name: &CollectionName,
        spec: CollectionSpec,
        cutoff: i64,
    ) -> Result<KeySweep> {
        let lock = self.store.key_lock(key);
        let _guard = lock.lock().await;

        let Some(raw) = self.store.get(key).await? else {
            return Ok(KeySweep::default());
        };
        let Value::Array(items) = serde_json::from_str::<Value>(&raw)? else {
            return Ok(KeySweep::default());
        };
        let acked = self
            .store
            .get(&acked_key(name))
            .await?
            .and_then(|raw| raw.trim().parse::<i64>().ok());

        let total = items.len();
        let kept = items
            .into_iter()
            .filter(|item| {
                // Elements we cannot interpret are left alone.
                serde_json::from_value::<Record>(item.clone())
                    .map_or(true, |record| !evictable(&record, spec, cutoff, acked))
            })
            .collect::<Vec<_>>();

        let dropped = total - kept.len();
        if dropped == 0 {
            return Ok(KeySweep::default());
        }

        if kept.is_empty() && !spec.core {
            self.store.remove(key).await?;
            tracing::debug!(key, dropped, "Removed emptied collection");
            return Ok(KeySweep {
                dropped,
                removed: true,
            });
        }

        self.store.set(key, &serde_json::to_string(&kept)?).await?;
        tracing::debug!(key, dropped, kept = kept.len(), "Trimmed collection");
        Ok(KeySweep {
            dropped,
            removed: false,
        })
    }
}

#[derive(Debug, Default)]
struct KeySweep {
    dropped: usize,
    removed: bool,
}

fn evictable(record: &Record, spec: CollectionSpec, cutoff: i64, acked: Option<i64>) -> bool {
    let age = record_age(record, spec);
    let expired = age.is_some_and(|timestamp| timestamp < cutoff);

    if record.is_deleted() {
        let pushed = acked.is_some_and(|acked| record.updated_at() < acked);
        return pushed || expired;
    }

    match (spec.core, spec.date_field) {
        (true, Some(_)) | (false, _) => expired,
        (true, None) => false,
    }
}

/// Timestamp the retention window is measured against.
fn record_age(record: &Record, spec: CollectionSpec) -> Option<i64> {
    let by_date = spec
        .date_field
        .and_then(|field| record.domain_timestamp(field));
    let by_update = (record.updated_at() > 0).then(|| record.updated_at());

    if spec.core {
        by_date.or(by_update)
    } else {
        by_update.or(by_date)
    }
}
