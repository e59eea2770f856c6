//! Local key-value persistence
//!
//! Every higher layer reads and writes through [`KeyValueStore`]: string keys,
//! JSON-serialized string values. Each collection lives under its own key, so
//! writes to different collections never conflict.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::error::Result;

mod collection_io;
mod locks;
mod memory;
pub mod sqlite;

pub use collection_io::{decode_collection, load_collection, persist_collection, LoadOutcome};
pub use locks::KeyLocks;
pub use memory::MemoryStore;
pub use sqlite::LibSqlStore;

/// Async key-value storage shared by all collections on a device.
pub trait KeyValueStore: Send + Sync + 'static {
    /// Read a value
    fn get(&self, key: &str) -> impl Future<Output = Result<Option<String>>> + Send;

    /// Write a value, failing with `Error::QuotaExceeded` when over budget
    fn set(&self, key: &str, value: &str) -> impl Future<Output = Result<()>> + Send;

    /// Remove a value (no-op when absent)
    fn remove(&self, key: &str) -> impl Future<Output = Result<()>> + Send;

    /// Remove several values in one call
    fn remove_many(&self, keys: &[String]) -> impl Future<Output = Result<()>> + Send;

    /// List every stored key
    fn keys(&self) -> impl Future<Output = Result<Vec<String>>> + Send;

    /// Approximate bytes used by keys and values
    fn usage_bytes(&self) -> impl Future<Output = Result<u64>> + Send;

    /// Writer lock for `key`, held across read-modify-write cycles.
    fn key_lock(&self, key: &str) -> Arc<Mutex<()>>;
}
