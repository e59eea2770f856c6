//! In-memory store used by tests and ephemeral replicas

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::Mutex;

use super::{KeyLocks, KeyValueStore};
use crate::error::{Error, Result};

/// `BTreeMap`-backed store with an optional byte budget.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<String, String>>,
    budget_bytes: Option<u64>,
    locks: KeyLocks,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store that rejects writes pushing usage above `budget_bytes`.
    pub fn with_budget(budget_bytes: u64) -> Self {
        Self {
            entries: Mutex::new(BTreeMap::new()),
            budget_bytes: Some(budget_bytes),
            locks: KeyLocks::new(),
        }
    }
}

fn entry_size(key: &str, value: &str) -> u64 {
    (key.len() + value.len()) as u64
}

impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.lock().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut entries = self.entries.lock().await;
        if let Some(budget) = self.budget_bytes {
            let others: u64 = entries
                .iter()
                .filter(|(existing, _)| existing.as_str() != key)
                .map(|(existing, stored)| entry_size(existing, stored))
                .sum();
            let needed = others + entry_size(key, value);
            if needed > budget {
                return Err(Error::QuotaExceeded {
                    key: key.to_string(),
                    needed,
                    budget,
                });
            }
        }
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.entries.lock().await.remove(key);
        Ok(())
    }

    async fn remove_many(&self, keys: &[String]) -> Result<()> {
        let mut entries = self.entries.lock().await;
        for key in keys {
            entries.remove(key);
        }
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>> {
        Ok(self.entries.lock().await.keys().cloned().collect())
    }

    async fn usage_bytes(&self) -> Result<u64> {
        Ok(self
            .entries
            .lock()
            .await
            .iter()
            .map(|(key, value)| entry_size(key, value))
            .sum())
    }

    fn key_lock(&self, key: &str) -> Arc<Mutex<()>> {
        self.locks.for_key(key)
    }
}
