//! In-process collection store speaking the sync contract.
//!
//! Used by tests and local tooling to run several replicas against one store
//! without a network. Failure and latency can be injected.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::Mutex;

use super::server::{answer_pull, apply_push};
use super::{SyncResponse, SyncTransport};
use crate::error::{Error, Result};
use crate::models::{CollectionName, Record, SyncRecord};
use crate::util::now_ms;

#[derive(Default)]
pub struct MemoryRemote {
    collections: Mutex<HashMap<CollectionName, Vec<Record>>>,
    calls: AtomicUsize,
    failing: AtomicBool,
    delay_ms: AtomicU64,
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of push and pull round trips served so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Make every following call fail with a transport error.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Hold every following call for `delay` before answering.
    pub fn set_delay(&self, delay: Duration) {
        let millis = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self.delay_ms.store(millis, Ordering::SeqCst);
    }

    /// Current durable contents of a collection, tombstones included.
    pub async fn snapshot(&self, collection: &CollectionName) -> Vec<Record> {
        self.collections
            .lock()
            .await
            .get(collection)
            .cloned()
            .unwrap_or_default()
    }

    /// Replace a collection's contents.
    pub async fn seed(&self, collection: &CollectionName, records: Vec<Record>) {
        self.collections
            .lock()
            .await
            .insert(collection.clone(), records);
    }

    async fn begin_call(&self) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let delay = self.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::Transport("remote store unavailable (503)".to_string()));
        }
        Ok(())
    }
}

impl SyncTransport for MemoryRemote {
    async fn push<T: SyncRecord>(
        &self,
        collection: &CollectionName,
        records: &[T],
        since: Option<i64>,
    ) -> Result<SyncResponse<T>> {
        self.begin_call().await?;
        let incoming: Vec<Record> = serde_json::from_value(serde_json::to_value(records)?)?;

        let mut collections = self.collections.lock().await;
        let stored = collections.entry(collection.clone()).or_default();
        let result = apply_push(stored, &incoming, since, now_ms());
        if result.changed {
            *stored = result.stored;
        }
        drop(collections);

        convert_response(result.response)
    }

    async fn pull<T: SyncRecord>(
        &self,
        collection: &CollectionName,
        since: Option<i64>,
    ) -> Result<SyncResponse<T>> {
        self.begin_call().await?;
        let collections = self.collections.lock().await;
        let stored = collections.get(collection).map_or(&[][..], Vec::as_slice);
        let response = answer_pull(stored, since, now_ms());
        drop(collections);

        convert_response(response)
    }
}

fn convert_response<T: SyncRecord>(response: SyncResponse<Record>) -> Result<SyncResponse<T>> {
    let data = response
        .data
        .into_iter()
        .map(serde_json::to_value)
        .collect::<std::result::Result<Vec<_>, _>>()?
        .into_iter()
        .filter_map(|value| serde_json::from_value(value).ok())
        .collect();
    Ok(SyncResponse {
        data,
        total_count: response.total_count,
        sync_time: response.sync_time,
    })
}
