//! Observable per-collection state.

use std::sync::Arc;

/// Unified sync indicator shown next to a collection.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SyncState {
    /// Never synced in this process
    #[default]
    Offline,
    Syncing,
    Synced,
    Error,
}

/// Lifecycle of a collection orchestrator.
///
/// `Loading` always ends in `Ready`, with empty data when the local copy was
/// missing or unreadable.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Phase {
    #[default]
    Uninitialized,
    Loading,
    Ready,
}

/// What observers of a collection see.
#[derive(Debug, Clone)]
pub struct CollectionSnapshot<T> {
    pub phase: Phase,
    /// Tombstone-free view
    pub data: Arc<Vec<T>>,
    pub is_loading: bool,
    /// Only raised by user-triggered syncs
    pub is_syncing: bool,
    pub sync_state: SyncState,
    pub last_sync_time: Option<i64>,
    pub last_error: Option<String>,
}

impl<T> Default for CollectionSnapshot<T> {
    fn default() -> Self {
        Self {
            phase: Phase::Uninitialized,
            data: Arc::new(Vec::new()),
            is_loading: false,
            is_syncing: false,
            sync_state: SyncState::Offline,
            last_sync_time: None,
            last_error: None,
        }
    }
}
