//! Per-collection sync orchestration
//!
//! A [`CollectionSync`] owns one persisted collection on this device. It
//! loads the local copy, applies user mutations (stamping each with the
//! device id and a monotonically increasing `updated_at`), and reconciles
//! with the remote store on demand.
//!
//! Storage, merging and the transport all work on schema-free [`Record`]s;
//! `T` is only the shape observers see. A stored version that does not fit
//! `T`, such as a bare `{id, updatedAt, deleted}` tombstone, still merges and
//! stays on disk. It is left out of the view.
//!
//! Mutations, the final write of a sync and retention sweeps all hold the
//! store's lock for the collection key. The sync re-reads local storage under
//! that lock before merging, so an edit that lands while a request is in
//! flight is merged rather than overwritten.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use super::{SyncMode, SyncOutcome, SyncReport, SyncTransport};
use crate::device::DeviceIdentity;
use crate::error::{Error, Result};
use crate::merge::merge_records;
use crate::models::{acked_key, cursor_key, storage_key, CollectionName, Record, SyncRecord};
use crate::state::{CollectionSnapshot, Phase, SyncState};
use crate::store::{load_collection, persist_collection, KeyValueStore};
use crate::util::now_ms;

/// Tunables for one orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncOptions {
    /// Upper bound for one transport round trip
    pub request_timeout: Duration,
    /// Records kept when a write hits the storage quota
    pub emergency_keep: usize,
    /// How far before the stored cursor incremental requests start
    pub cursor_overlap: Duration,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            emergency_keep: 200,
            cursor_overlap: Duration::from_secs(60),
        }
    }
}

pub struct CollectionSync<T, S, R> {
    name: CollectionName,
    key: String,
    cursor_key: String,
    acked_key: String,
    store: Arc<S>,
    transport: Arc<R>,
    identity: Arc<DeviceIdentity<S>>,
    options: SyncOptions,
    state: watch::Sender<CollectionSnapshot<T>>,
    in_flight: AtomicBool,
}

impl<T, S, R> CollectionSync<T, S, R>
where
    T: SyncRecord,
    S: KeyValueStore,
    R: SyncTransport,
{
    pub fn new(
        name: CollectionName,
        store: Arc<S>,
        transport: Arc<R>,
        identity: Arc<DeviceIdentity<S>>,
        options: SyncOptions,
    ) -> Self {
        let (state, _) = watch::channel(CollectionSnapshot::default());
        Self {
            key: storage_key(&name),
            cursor_key: cursor_key(&name),
            acked_key: acked_key(&name),
            name,
            store,
            transport,
            identity,
            options,
            state,
            in_flight: AtomicBool::new(false),
        }
    }

    pub const fn name(&self) -> &CollectionName {
        &self.name
    }

    /// Observe snapshots as they are published.
    pub fn subscribe(&self) -> watch::Receiver<CollectionSnapshot<T>> {
        self.state.subscribe()
    }

    /// The latest published snapshot.
    pub fn snapshot(&self) -> CollectionSnapshot<T> {
        self.state.borrow().clone()
    }

    /// Tombstone-free records currently shown to observers.
    pub fn records(&self) -> Arc<Vec<T>> {
        Arc::clone(&self.state.borrow().data)
    }

    /// Read the persisted collection and publish it.
    ///
    /// Corrupt local data is cleared and the collection becomes ready with no
    /// records. Storage failures also leave it ready and empty, and are
    /// returned.
    pub async fn load(&self) -> Result<()> {
        self.state.send_modify(|snapshot| {
            snapshot.phase = Phase::Loading;
            snapshot.is_loading = true;
        });

        let loaded = async {
            let outcome = load_collection::<Record, S>(&self.store, &self.key).await?;
            let cursor = self.read_timestamp(&self.cursor_key).await?;
            Ok::<_, Error>((outcome, cursor))
        }
        .await;

        match loaded {
            Ok((outcome, cursor)) => {
                tracing::debug!(
                    collection = %self.name,
                    records = outcome.records.len(),
                    skipped = outcome.skipped,
                    "Loaded local collection"
                );
                let data = Arc::new(self.project(&outcome.records));
                self.state.send_modify(|snapshot| {
                    snapshot.phase = Phase::Ready;
                    snapshot.is_loading = false;
                    snapshot.data = data;
                    snapshot.last_sync_time = cursor;
                    snapshot.last_error = outcome.recovered;
                });
                Ok(())
            }
            Err(error) => {
                tracing::warn!(
                    collection = %self.name,
                    error = %error,
                    "Failed to load local collection"
                );
                let message = error.to_string();
                self.state.send_modify(|snapshot| {
                    snapshot.phase = Phase::Ready;
                    snapshot.is_loading = false;
                    snapshot.data = Arc::new(Vec::new());
                    snapshot.last_error = Some(message);
                });
                Err(error)
            }
        }
    }

    /// Re-read storage and republish the view, e.g. after a retention sweep.
    pub async fn refresh(&self) -> Result<()> {
        let lock = self.store.key_lock(&self.key);
        let _guard = lock.lock().await;
        let records = self.read_local().await?;
        self.publish(&records);
        Ok(())
    }

    /// Insert a new record, or revive a deleted one with the same id.
    ///
    /// Like sync writes, a write over the storage quota keeps only the newest
    /// `emergency_keep` records (this one always among them) and retries once.
    pub async fn add(&self, mut record: T) -> Result<T> {
        let device_id = self.identity.device_id().await?;
        let lock = self.store.key_lock(&self.key);
        let _guard = lock.lock().await;

        let mut records = self.read_local().await?;
        let position = records.iter().position(|r| r.id == record.id());
        if let Some(position) = position {
            if !records[position].is_deleted() {
                return Err(Error::InvalidInput(format!(
                    "{} already contains a record with id {}",
                    self.name,
                    record.id()
                )));
            }
        }

        record.touch(
            next_stamp(position.map(|p| records[p].updated_at)),
            &device_id,
        );
        let stored = to_record(&record)?;
        match position {
            Some(position) => records[position] = stored,
            None => records.push(stored),
        }

        self.write_local(records, record.id()).await?;
        tracing::debug!(collection = %self.name, id = record.id(), "Added record");
        Ok(record)
    }

    /// Modify a live record in place.
    pub async fn update<F>(&self, id: &str, edit: F) -> Result<T>
    where
        F: FnOnce(&mut T) + Send,
    {
        let device_id = self.identity.device_id().await?;
        let lock = self.store.key_lock(&self.key);
        let _guard = lock.lock().await;

        let mut records = self.read_local().await?;
        let position = self.live_position(&records, id)?;
        let previous = records[position].updated_at;

        let mut record: T = from_record(&records[position])?;
        edit(&mut record);
        if record.id() != id {
            return Err(Error::InvalidInput("Record ids cannot be changed".to_string()));
        }
        record.touch(next_stamp(Some(previous)), &device_id);
        records[position] = to_record(&record)?;

        self.write_local(records, id).await?;
        tracing::debug!(collection = %self.name, id, "Updated record");
        Ok(record)
    }

    /// Replace a live record with a tombstone.
    pub async fn soft_delete(&self, id: &str) -> Result<()> {
        let device_id = self.identity.device_id().await?;
        let lock = self.store.key_lock(&self.key);
        let _guard = lock.lock().await;

        let mut records = self.read_local().await?;
        let position = self.live_position(&records, id)?;
        let previous = records[position].updated_at;

        let record = &mut records[position];
        record.mark_deleted();
        record.touch(next_stamp(Some(previous)), &device_id);

        self.write_local(records, id).await?;
        tracing::debug!(collection = %self.name, id, "Deleted record");
        Ok(())
    }

    /// Reconcile with the remote store, asking only for changes since the
    /// last successful sync.
    pub async fn sync_now(&self, mode: SyncMode) -> Result<SyncOutcome> {
        self.run_sync(mode, false).await
    }

    /// Reconcile and ask the remote store for everything it holds.
    pub async fn force_download(&self, mode: SyncMode) -> Result<SyncOutcome> {
        self.run_sync(mode, true).await
    }

    async fn run_sync(&self, mode: SyncMode, full: bool) -> Result<SyncOutcome> {
        let Some(_flight) = FlightGuard::acquire(&self.in_flight) else {
            tracing::debug!(collection = %self.name, "Sync already in flight; skipping");
            return Ok(SyncOutcome::Skipped);
        };

        self.state.send_modify(|snapshot| {
            snapshot.sync_state = SyncState::Syncing;
            if mode == SyncMode::Loud {
                snapshot.is_syncing = true;
            }
        });

        match self.sync_cycle(full).await {
            Ok(report) => {
                tracing::info!(
                    collection = %self.name,
                    sent = report.sent,
                    received = report.received,
                    stored = report.stored,
                    "Sync complete"
                );
                self.state.send_modify(|snapshot| {
                    snapshot.is_syncing = false;
                    snapshot.sync_state = SyncState::Synced;
                    snapshot.last_sync_time = Some(report.sync_time);
                    snapshot.last_error = None;
                });
                Ok(SyncOutcome::Completed(report))
            }
            Err(error) => {
                let message = error.to_string();
                self.state.send_modify(|snapshot| {
                    snapshot.is_syncing = false;
                    snapshot.sync_state = SyncState::Error;
                    snapshot.last_error = Some(message.clone());
                });
                match mode {
                    SyncMode::Silent => {
                        tracing::warn!(
                            collection = %self.name,
                            error = %message,
                            "Background sync failed"
                        );
                        Ok(SyncOutcome::Failed(message))
                    }
                    SyncMode::Loud => {
                        tracing::error!(collection = %self.name, error = %message, "Sync failed");
                        Err(error)
                    }
                }
            }
        }
    }

    async fn sync_cycle(&self, full: bool) -> Result<SyncReport> {
        let read_at = now_ms();
        let local = self.read_local().await?;
        let since = if full {
            None
        } else {
            let overlap =
                i64::try_from(self.options.cursor_overlap.as_millis()).unwrap_or(i64::MAX);
            self.read_timestamp(&self.cursor_key)
                .await?
                .map(|cursor| cursor.saturating_sub(overlap))
        };

        let timeout = self.options.request_timeout;
        let push = self.transport.push(&self.name, local.as_slice(), since);
        let response = tokio::time::timeout(timeout, push)
            .await
            .map_err(|_| Error::Timeout(timeout))??;

        let lock = self.store.key_lock(&self.key);
        let _guard = lock.lock().await;
        let current = self.read_local().await?;
        let merged = merge_records(&current, &response.data);
        let stored = self.persist_with_recovery(merged, None).await?;
        self.store
            .set(&self.cursor_key, &response.sync_time.to_string())
            .await?;
        self.store.set(&self.acked_key, &read_at.to_string()).await?;
        self.publish(&stored);

        Ok(SyncReport {
            sent: local.len(),
            received: response.data.len(),
            remote_total: response.total_count,
            stored: stored.len(),
            sync_time: response.sync_time,
        })
    }

    async fn read_local(&self) -> Result<Vec<Record>> {
        Ok(load_collection::<Record, S>(&self.store, &self.key)
            .await?
            .records)
    }

    /// Persist a mutation, keeping `edited` if the quota forces a trim.
    async fn write_local(&self, records: Vec<Record>, edited: &str) -> Result<()> {
        let stored = self.persist_with_recovery(records, Some(edited)).await?;
        self.publish(&stored);
        Ok(())
    }

    /// Write the collection, trimming to the newest records once if the
    /// store is over quota.
    async fn persist_with_recovery(
        &self,
        records: Vec<Record>,
        pinned: Option<&str>,
    ) -> Result<Vec<Record>> {
        match persist_collection(self.store.as_ref(), &self.key, &records).await {
            Ok(()) => Ok(records),
            Err(error) if error.is_quota_exceeded() => {
                let before = records.len();
                let trimmed = newest(records, self.options.emergency_keep, pinned);
                tracing::warn!(
                    collection = %self.name,
                    before,
                    after = trimmed.len(),
                    "Storage quota exceeded; keeping only the newest records"
                );
                persist_collection(self.store.as_ref(), &self.key, &trimmed).await?;
                Ok(trimmed)
            }
            Err(error) => Err(error),
        }
    }

    async fn read_timestamp(&self, key: &str) -> Result<Option<i64>> {
        Ok(self
            .store
            .get(key)
            .await?
            .and_then(|raw| raw.trim().parse::<i64>().ok()))
    }

    fn live_position(&self, records: &[Record], id: &str) -> Result<usize> {
        records
            .iter()
            .position(|r| r.id == id && !r.is_deleted())
            .ok_or_else(|| Error::NotFound(format!("{} {id}", self.name)))
    }

    /// Tombstone-free view in the observers' shape.
    fn project(&self, records: &[Record]) -> Vec<T> {
        let mut unfit = 0_usize;
        let view = records
            .iter()
            .filter(|record| !record.is_deleted())
            .filter_map(|record| from_record(record).inspect_err(|_| unfit += 1).ok())
            .collect();
        if unfit > 0 {
            tracing::debug!(
                collection = %self.name,
                unfit,
                "Hid stored records that do not fit the view shape"
            );
        }
        view
    }

    fn publish(&self, records: &[Record]) {
        let data = Arc::new(self.project(records));
        self.state.send_modify(|snapshot| snapshot.data = data);
    }
}

fn to_record<T: SyncRecord>(record: &T) -> Result<Record> {
    Ok(serde_json::from_value(serde_json::to_value(record)?)?)
}

fn from_record<T: SyncRecord>(record: &Record) -> Result<T> {
    Ok(serde_json::from_value(serde_json::to_value(record)?)?)
}

/// Next `updated_at` for a local edit: wall clock, but always past the
/// previous version.
fn next_stamp(previous: Option<i64>) -> i64 {
    let now = now_ms();
    previous.map_or(now, |previous| now.max(previous.saturating_add(1)))
}

/// Keep `keep` records, preserving order: `pinned` first, then live records,
/// newest first.
fn newest(records: Vec<Record>, keep: usize, pinned: Option<&str>) -> Vec<Record> {
    if records.len() <= keep {
        return records;
    }
    let mut order = (0..records.len()).collect::<Vec<_>>();
    order.sort_by_key(|&index| {
        let record = &records[index];
        let is_pinned = pinned == Some(record.id.as_str());
        std::cmp::Reverse((is_pinned, !record.is_deleted(), record.updated_at))
    });
    let mut retained = vec![false; records.len()];
    for &index in order.iter().take(keep) {
        retained[index] = true;
    }
    records
        .into_iter()
        .zip(retained)
        .filter_map(|(record, keep)| keep.then_some(record))
        .collect()
}

/// Single-flight token; clears the flag when dropped.
struct FlightGuard<'a>(&'a AtomicBool);

impl<'a> FlightGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Collection, Product, Record};
    use crate::store::MemoryStore;
    use crate::sync::MemoryRemote;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    type ProductSync = CollectionSync<Product, MemoryStore, MemoryRemote>;

    fn replica(store: MemoryStore, remote: &Arc<MemoryRemote>) -> (Arc<MemoryStore>, ProductSync) {
        let store = Arc::new(store);
        let sync = CollectionSync::new(
            Collection::Products.into(),
            store.clone(),
            remote.clone(),
            Arc::new(DeviceIdentity::new(store.clone())),
            SyncOptions::default(),
        );
        (store, sync)
    }

    async fn persisted(store: &MemoryStore) -> Vec<Product> {
        load_collection::<Product, _>(store, "tally.products")
            .await
            .unwrap()
            .records
    }

    #[tokio::test]
    async fn load_recovers_from_corrupt_storage() {
        let remote = Arc::new(MemoryRemote::new());
        let store = MemoryStore::new();
        store.set("tally.products", "{not json").await.unwrap();
        let (_, sync) = replica(store, &remote);

        sync.load().await.unwrap();
        let snapshot = sync.snapshot();
        assert_eq!(snapshot.phase, Phase::Ready);
        assert!(!snapshot.is_loading);
        assert!(snapshot.data.is_empty());
        assert!(snapshot.last_error.is_some());
    }

    #[tokio::test]
    async fn mutations_stamp_and_hide_tombstones() {
        let remote = Arc::new(MemoryRemote::new());
        let (store, sync) = replica(MemoryStore::new(), &remote);
        sync.load().await.unwrap();

        let added = sync.add(Product::new("Flour", "kg")).await.unwrap();
        assert!(added.device_id.as_deref().unwrap().starts_with("device-"));
        assert_eq!(sync.records().len(), 1);

        let updated = sync
            .update(&added.id, |product| product.quantity = 12.5)
            .await
            .unwrap();
        assert!(updated.updated_at > added.updated_at);

        sync.soft_delete(&added.id).await.unwrap();
        assert!(sync.records().is_empty());

        let stored = persisted(&store).await;
        assert_eq!(stored.len(), 1);
        assert!(stored[0].is_deleted());
        assert!(stored[0].updated_at > updated.updated_at);
    }

    #[tokio::test]
    async fn add_rejects_live_duplicates_but_revives_tombstones() {
        let remote = Arc::new(MemoryRemote::new());
        let (_, sync) = replica(MemoryStore::new(), &remote);

        let added = sync.add(Product::new("Sugar", "kg")).await.unwrap();
        assert!(sync.add(added.clone()).await.is_err());

        sync.soft_delete(&added.id).await.unwrap();
        let mut revived = added.clone();
        revived.deleted = None;
        let revived = sync.add(revived).await.unwrap();
        assert!(!revived.is_deleted());
        assert_eq!(sync.records().len(), 1);
    }

    #[tokio::test]
    async fn editing_missing_or_deleted_records_is_not_found() {
        let remote = Arc::new(MemoryRemote::new());
        let (_, sync) = replica(MemoryStore::new(), &remote);
        assert!(matches!(
            sync.update("nope", |_| {}).await,
            Err(Error::NotFound(_))
        ));

        let added = sync.add(Product::new("Salt", "kg")).await.unwrap();
        sync.soft_delete(&added.id).await.unwrap();
        assert!(matches!(
            sync.soft_delete(&added.id).await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn concurrent_syncs_make_one_round_trip() {
        let remote = Arc::new(MemoryRemote::new());
        remote.set_delay(Duration::from_millis(50));
        let (_, sync) = replica(MemoryStore::new(), &remote);

        let (first, second) = tokio::join!(
            sync.sync_now(SyncMode::Silent),
            sync.sync_now(SyncMode::Silent)
        );
        let outcomes = [first.unwrap(), second.unwrap()];
        assert_eq!(remote.calls(), 1);
        assert!(outcomes.contains(&SyncOutcome::Skipped));
        assert!(outcomes
            .iter()
            .any(|outcome| matches!(outcome, SyncOutcome::Completed(_))));

        // The guard is released once the first sync finishes.
        assert!(matches!(
            sync.sync_now(SyncMode::Silent).await.unwrap(),
            SyncOutcome::Completed(_)
        ));
    }

    #[tokio::test]
    async fn silent_failure_keeps_local_state() {
        let remote = Arc::new(MemoryRemote::new());
        let (_, sync) = replica(MemoryStore::new(), &remote);
        sync.add(Product::new("Flour", "kg")).await.unwrap();

        remote.set_failing(true);
        let outcome = sync.sync_now(SyncMode::Silent).await.unwrap();
        assert!(matches!(outcome, SyncOutcome::Failed(_)));

        let snapshot = sync.snapshot();
        assert_eq!(snapshot.data.len(), 1);
        assert_eq!(snapshot.sync_state, SyncState::Error);
        assert!(!snapshot.is_syncing);
        assert_eq!(snapshot.last_sync_time, None);
    }

    #[tokio::test]
    async fn loud_failure_is_returned() {
        let remote = Arc::new(MemoryRemote::new());
        remote.set_failing(true);
        let (_, sync) = replica(MemoryStore::new(), &remote);

        let error = sync.sync_now(SyncMode::Loud).await.unwrap_err();
        assert!(matches!(error, Error::Transport(_)));
        assert!(!sync.snapshot().is_syncing);
    }

    #[tokio::test]
    async fn slow_remote_times_out() {
        let remote = Arc::new(MemoryRemote::new());
        remote.set_delay(Duration::from_millis(200));
        let store = Arc::new(MemoryStore::new());
        let sync: ProductSync = CollectionSync::new(
            Collection::Products.into(),
            store.clone(),
            remote,
            Arc::new(DeviceIdentity::new(store)),
            SyncOptions {
                request_timeout: Duration::from_millis(20),
                ..SyncOptions::default()
            },
        );

        let error = sync.sync_now(SyncMode::Loud).await.unwrap_err();
        assert!(matches!(error, Error::Timeout(_)));
    }

    #[tokio::test]
    async fn tombstones_propagate_between_replicas() {
        let remote = Arc::new(MemoryRemote::new());
        let (store_a, a) = replica(MemoryStore::new(), &remote);
        let (store_b, b) = replica(MemoryStore::new(), &remote);

        let flour = a.add(Product::new("Flour", "kg")).await.unwrap();
        a.sync_now(SyncMode::Loud).await.unwrap();
        b.sync_now(SyncMode::Loud).await.unwrap();
        assert_eq!(b.records().len(), 1);

        a.soft_delete(&flour.id).await.unwrap();
        a.sync_now(SyncMode::Loud).await.unwrap();
        b.sync_now(SyncMode::Loud).await.unwrap();

        assert!(b.records().is_empty());
        for store in [&store_a, &store_b] {
            let stored = persisted(store).await;
            assert_eq!(stored.len(), 1);
            assert!(stored[0].is_deleted());
        }
        let name = CollectionName::from(Collection::Products);
        assert!(remote.snapshot(&name).await[0].is_deleted());
    }

    #[tokio::test]
    async fn edit_during_sync_is_not_overwritten() {
        let remote = Arc::new(MemoryRemote::new());
        remote.set_delay(Duration::from_millis(50));
        let (store, sync) = replica(MemoryStore::new(), &remote);

        let (synced, added) = tokio::join!(sync.sync_now(SyncMode::Loud), async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            sync.add(Product::new("Yeast", "g")).await
        });
        synced.unwrap();
        let added = added.unwrap();

        let stored = persisted(&store).await;
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].id, added.id);
        assert_eq!(sync.records().len(), 1);
    }

    #[tokio::test]
    async fn quota_exceeded_keeps_newest_records() {
        let remote = Arc::new(MemoryRemote::new());
        let name = CollectionName::from(Collection::Products);
        let seeded = (1..=50)
            .map(|i| {
                serde_json::from_value::<Record>(json!({
                    "id": format!("p{i:02}"),
                    "name": "Product",
                    "unit": "pcs",
                    "quantity": 1.0,
                    "updatedAt": i
                }))
                .unwrap()
            })
            .collect();
        remote.seed(&name, seeded).await;

        let store = Arc::new(MemoryStore::with_budget(1_500));
        let sync: ProductSync = CollectionSync::new(
            name,
            store.clone(),
            remote,
            Arc::new(DeviceIdentity::new(store.clone())),
            SyncOptions {
                emergency_keep: 5,
                ..SyncOptions::default()
            },
        );

        let outcome = sync.sync_now(SyncMode::Loud).await.unwrap();
        let SyncOutcome::Completed(report) = outcome else {
            panic!("expected a completed sync, got {outcome:?}");
        };
        assert_eq!(report.received, 50);
        assert_eq!(report.stored, 5);

        let ids = persisted(&store)
            .await
            .into_iter()
            .map(|product| product.id)
            .collect::<Vec<_>>();
        assert_eq!(ids, vec!["p46", "p47", "p48", "p49", "p50"]);
    }

    #[tokio::test]
    async fn bare_remote_tombstone_hides_typed_record() {
        let remote = Arc::new(MemoryRemote::new());
        let (store, sync) = replica(MemoryStore::new(), &remote);
        let flour = sync.add(Product::new("Flour", "kg")).await.unwrap();
        sync.sync_now(SyncMode::Loud).await.unwrap();

        let name = CollectionName::from(Collection::Products);
        let tombstone = serde_json::from_value::<Record>(json!({
            "id": flour.id,
            "updatedAt": flour.updated_at + 1_000,
            "deleted": true
        }))
        .unwrap();
        remote.seed(&name, vec![tombstone]).await;

        sync.force_download(SyncMode::Loud).await.unwrap();
        assert!(sync.records().is_empty());

        let stored = load_collection::<Record, _>(store.as_ref(), "tally.products")
            .await
            .unwrap()
            .records;
        assert_eq!(stored.len(), 1);
        assert!(stored[0].is_deleted());
        assert_eq!(stored[0].updated_at, flour.updated_at + 1_000);

        // A later push of the stale live copy cannot resurrect it.
        sync.sync_now(SyncMode::Loud).await.unwrap();
        assert!(remote.snapshot(&name).await[0].is_deleted());
    }

    #[tokio::test]
    async fn records_that_do_not_fit_the_view_are_kept_on_disk() {
        let remote = Arc::new(MemoryRemote::new());
        let store = MemoryStore::new();
        store
            .set(
                "tally.products",
                r#"[{"id":"odd","updatedAt":3,"name":{"en":"Flour"}}]"#,
            )
            .await
            .unwrap();
        let (store, sync) = replica(store, &remote);
        sync.load().await.unwrap();
        assert!(sync.records().is_empty());

        sync.add(Product::new("Sugar", "kg")).await.unwrap();
        assert_eq!(sync.records().len(), 1);

        let stored = load_collection::<Record, _>(store.as_ref(), "tally.products")
            .await
            .unwrap()
            .records;
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[0].id, "odd");
        assert_eq!(stored[0].field("name"), Some(&json!({"en": "Flour"})));
    }

    #[tokio::test]
    async fn mutation_over_quota_trims_and_keeps_the_edit() {
        let remote = Arc::new(MemoryRemote::new());
        let seeded = (1..=40)
            .map(|i| json!({"id": format!("s{i:02}"), "updatedAt": i}))
            .collect::<Vec<_>>();
        let store = Arc::new(MemoryStore::with_budget(1_250));
        store
            .set("tally.products", &serde_json::to_string(&seeded).unwrap())
            .await
            .unwrap();
        let sync: ProductSync = CollectionSync::new(
            Collection::Products.into(),
            store.clone(),
            remote,
            Arc::new(DeviceIdentity::new(store.clone())),
            SyncOptions {
                emergency_keep: 5,
                ..SyncOptions::default()
            },
        );

        let added = sync.add(Product::new("Flour", "kg")).await.unwrap();

        let ids = load_collection::<Record, _>(store.as_ref(), "tally.products")
            .await
            .unwrap()
            .records
            .into_iter()
            .map(|record| record.id)
            .collect::<Vec<_>>();
        assert_eq!(ids, vec!["s37", "s38", "s39", "s40", added.id.as_str()]);
        assert_eq!(sync.records().len(), 1);
    }

    #[tokio::test]
    async fn refresh_republishes_storage() {
        let remote = Arc::new(MemoryRemote::new());
        let (store, sync) = replica(MemoryStore::new(), &remote);
        sync.add(Product::new("Flour", "kg")).await.unwrap();

        store.set("tally.products", "[]").await.unwrap();
        assert_eq!(sync.records().len(), 1);
        sync.refresh().await.unwrap();
        assert!(sync.records().is_empty());
    }

    #[test]
    fn newest_keeps_most_recent_in_original_order() {
        let records: Vec<Record> = serde_json::from_value(json!([
            {"id": "a", "updatedAt": 3},
            {"id": "b", "updatedAt": 9},
            {"id": "c", "updatedAt": 1},
            {"id": "d", "updatedAt": 7}
        ]))
        .unwrap();
        let kept = newest(records, 2, None);
        let ids = kept.iter().map(|r| r.id.as_str()).collect::<Vec<_>>();
        assert_eq!(ids, vec!["b", "d"]);
    }

    #[test]
    fn newest_prefers_live_records() {
        let records: Vec<Record> = serde_json::from_value(json!([
            {"id": "a", "updatedAt": 3},
            {"id": "b", "updatedAt": 9, "deleted": true},
            {"id": "c", "updatedAt": 1}
        ]))
        .unwrap();
        let kept = newest(records, 2, None);
        let ids = kept.iter().map(|r| r.id.as_str()).collect::<Vec<_>>();
        assert_eq!(ids, vec!["a", "c"]);
    }

    #[test]
    fn newest_always_keeps_the_edited_record() {
        let records: Vec<Record> = serde_json::from_value(json!([
            {"id": "gone", "updatedAt": 50, "deleted": true},
            {"id": "a", "updatedAt": 3},
            {"id": "b", "updatedAt": 9}
        ]))
        .unwrap();
        let kept = newest(records, 2, Some("gone"));
        let ids = kept.iter().map(|r| r.id.as_str()).collect::<Vec<_>>();
        assert_eq!(ids, vec!["gone", "b"]);
    }

    #[test]
    fn next_stamp_is_strictly_increasing() {
        let future = now_ms() + 60_000;
        assert_eq!(next_stamp(Some(future)), future + 1);
        assert!(next_stamp(None) > 0);
    }
}
