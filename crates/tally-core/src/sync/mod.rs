//! Replica synchronization
//!
//! A collection is reconciled by pushing the full local set (tombstones
//! included) to a remote collection store and merging back whatever the
//! store returns. Both sides run [`crate::merge`], so every replica and the
//! server apply the same deterministic rule.

use std::future::Future;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::models::{CollectionName, SyncRecord};

mod collection;
mod endpoint;
mod hub;
mod memory;
mod rpc;
pub mod server;
mod transport;

pub use collection::{CollectionSync, SyncOptions};
pub use endpoint::EndpointTransport;
pub use hub::{ManagedCollection, SyncHub};
pub use memory::MemoryRemote;
pub use rpc::RpcTransport;
pub use transport::{AnyTransport, TransportKind};

/// Push request body: the full local batch plus the caller's cursor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushRequest<T> {
    pub collection: CollectionName,
    pub data: Vec<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_sync_time: Option<i64>,
}

/// Pull request body: read-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullRequest {
    pub collection: CollectionName,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_sync_time: Option<i64>,
}

/// Authoritative answer from the remote store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncResponse<T> {
    /// Records updated after the request's `lastSyncTime` (all when absent)
    pub data: Vec<T>,
    /// Records held by the store for this collection, tombstones included
    pub total_count: usize,
    /// Store time of this answer; the caller's next cursor
    pub sync_time: i64,
}

/// Whether a sync was requested by the user or by the background timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    /// Background: no `is_syncing` flag, failures are logged and swallowed
    Silent,
    /// User-triggered: raises `is_syncing` and returns failures
    Loud,
}

/// Result of a completed sync cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncReport {
    /// Local records pushed
    pub sent: usize,
    /// Records returned by the remote store
    pub received: usize,
    /// Records the remote store holds
    pub remote_total: usize,
    /// Records persisted locally after the merge, tombstones included
    pub stored: usize,
    pub sync_time: i64,
}

/// What a call to `sync_now` did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    Completed(SyncReport),
    /// Another sync of the same collection was already in flight
    Skipped,
    /// A silent sync failed; the error was logged and local state kept
    Failed(String),
}

/// Call boundary to a remote collection store.
///
/// Implementations must surface non-2xx responses and malformed bodies as
/// errors, never as an empty success.
pub trait SyncTransport: Send + Sync + 'static {
    /// Send the local batch; the store merges it and answers with the records
    /// updated after `since` (everything when `None`).
    fn push<T: SyncRecord>(
        &self,
        collection: &CollectionName,
        records: &[T],
        since: Option<i64>,
    ) -> impl Future<Output = Result<SyncResponse<T>>> + Send;

    /// Read records updated after `since` without mutating the store.
    fn pull<T: SyncRecord>(
        &self,
        collection: &CollectionName,
        since: Option<i64>,
    ) -> impl Future<Output = Result<SyncResponse<T>>> + Send;
}
