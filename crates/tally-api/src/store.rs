//! Durable per-collection JSON files.
//!
//! Each collection is one `<name>.json` array under the data directory.
//! Pushes for the same collection are serialized; every write goes to a
//! temporary file that is renamed over the old one, so readers never see a
//! partial array.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use tally_core::merge::MergeStats;
use tally_core::store::decode_collection;
use tally_core::sync::server::{answer_pull, apply_push};
use tally_core::sync::SyncResponse;
use tally_core::{CollectionName, Record};
use tokio::sync::Mutex;

use crate::error::AppError;

pub struct CollectionStore {
    dir: PathBuf,
    locks: Mutex<HashMap<CollectionName, Arc<Mutex<()>>>>,
}

/// Result of one accepted push.
#[derive(Debug)]
pub struct Accepted {
    pub stats: MergeStats,
    pub response: SyncResponse<Record>,
    /// Full stored collection after the merge
    pub stored: Vec<Record>,
}

impl CollectionStore {
    pub async fn open(dir: impl Into<PathBuf>) -> std::io::Result<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self {
            dir,
            locks: Mutex::new(HashMap::new()),
        })
    }

    /// Merge a pushed batch into the stored collection.
    pub async fn push(
        &self,
        name: &CollectionName,
        incoming: &[Record],
        since: Option<i64>,
    ) -> Result<Accepted, AppError> {
        let lock = self.lock_for(name).await;
        let _guard = lock.lock().await;

        let stored = self.read(name).await?;
        let result = apply_push(&stored, incoming, since, now_ms());
        if result.changed {
            self.write(name, &result.stored).await?;
        }
        tracing::info!(
            collection = %name,
            received = incoming.len(),
            inserted = result.stats.inserted,
            replaced = result.stats.replaced,
            total = result.stored.len(),
            "Accepted push"
        );

        Ok(Accepted {
            stats: result.stats,
            response: result.response,
            stored: result.stored,
        })
    }

    /// Records the store accepted after `since`, read-only.
    pub async fn pull(
        &self,
        name: &CollectionName,
        since: Option<i64>,
    ) -> Result<SyncResponse<Record>, AppError> {
        let stored = self.read(name).await?;
        Ok(answer_pull(&stored, since, now_ms()))
    }

    async fn lock_for(&self, name: &CollectionName) -> Arc<Mutex<()>> {
        self.locks
            .lock()
            .await
            .entry(name.clone())
            .or_default()
            .clone()
    }

    fn path(&self, name: &CollectionName) -> PathBuf {
        self.dir.join(format!("{name}.json"))
    }

    async fn read(&self, name: &CollectionName) -> Result<Vec<Record>, AppError> {
        let path = self.path(name);
        let raw = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(error) => return Err(error.into()),
        };

        match decode_collection::<Record>(&raw) {
            Ok((records, skipped)) => {
                if skipped > 0 {
                    tracing::warn!(
                        collection = %name,
                        skipped,
                        "Stored collection has unreadable records"
                    );
                }
                Ok(records)
            }
            Err(reason) => {
                let quarantined = quarantine(&path).await?;
                tracing::error!(
                    collection = %name,
                    %reason,
                    quarantined = %quarantined.display(),
                    "Stored collection is corrupt; starting it empty"
                );
                Ok(Vec::new())
            }
        }
    }

    async fn write(&self, name: &CollectionName, records: &[Record]) -> Result<(), AppError> {
        let path = self.path(name);
        let temp = self.dir.join(format!(".{name}.json.tmp"));
        let payload = serde_json::to_vec(records)
            .map_err(|error| AppError::Storage(error.to_string()))?;
        tokio::fs::write(&temp, payload).await?;
        tokio::fs::rename(&temp, &path).await?;
        Ok(())
    }
}

async fn quarantine(path: &Path) -> std::io::Result<PathBuf> {
    let file_name = path
        .file_name()
        .map_or_else(|| "collection".to_string(), |name| name.to_string_lossy().to_string());
    let target = path.with_file_name(format!("{file_name}.corrupt-{}", now_ms()));
    tokio::fs::rename(path, &target).await?;
    Ok(target)
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}
