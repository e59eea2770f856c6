//! Per-key writer locks
//!
//! Collection writers (user mutations, the final write of a sync, retention
//! sweeps) read a key, modify the value and write it back. Holding the key's
//! lock across that cycle keeps concurrent writers from overwriting each
//! other.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::Mutex as AsyncMutex;

#[derive(Debug, Default)]
pub struct KeyLocks {
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl KeyLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// The lock guarding `key`; every caller gets the same one.
    pub fn for_key(&self, key: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(key.to_string()).or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_key_shares_one_lock() {
        let locks = KeyLocks::new();
        let first = locks.for_key("tally.orders");
        let second = locks.for_key("tally.orders");
        assert!(Arc::ptr_eq(&first, &second));
        assert!(!Arc::ptr_eq(&first, &locks.for_key("tally.products")));
    }

    #[tokio::test]
    async fn held_lock_blocks_other_writers() {
        let locks = KeyLocks::new();
        let lock = locks.for_key("tally.orders");
        let _guard = lock.lock().await;
        assert!(locks.for_key("tally.orders").try_lock().is_err());
    }
}
