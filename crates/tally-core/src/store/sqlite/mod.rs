//! libSQL-backed key-value store

mod connection;
mod migrations;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::Mutex;

pub use connection::Database;

use super::{KeyLocks, KeyValueStore};
use crate::error::{Error, Result};
use crate::util::now_ms;

/// Persistent device store: one `kv_store` row per key in a local libSQL file.
#[derive(Clone)]
pub struct LibSqlStore {
    db: Arc<Mutex<Database>>,
    db_path: Option<PathBuf>,
    budget_bytes: Option<u64>,
    locks: Arc<KeyLocks>,
}

impl LibSqlStore {
    /// Open the store at the given filesystem path.
    ///
    /// A file that is not a valid database is moved aside and replaced by an
    /// empty store, the same way corrupt collection values are discarded.
    pub async fn open_path(db_path: impl Into<PathBuf>, budget_bytes: Option<u64>) -> Result<Self> {
        let db_path = db_path.into();
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let db = match Database::open(&db_path).await {
            Ok(db) => db,
            Err(error) if Self::is_corrupted_db_error(&error) => {
                tracing::warn!(
                    "Local store at {} is unreadable: {}. Moving it aside and starting empty.",
                    db_path.display(),
                    error
                );
                Self::quarantine_corrupted_db_files(&db_path)?;
                Database::open(&db_path).await?
            }
            Err(error) => return Err(error),
        };

        Ok(Self {
            db: Arc::new(Mutex::new(db)),
            db_path: Some(db_path),
            budget_bytes,
            locks: Arc::new(KeyLocks::new()),
        })
    }

    /// Open an in-memory store (primarily for tests).
    pub async fn open_in_memory(budget_bytes: Option<u64>) -> Result<Self> {
        let db = Database::open_in_memory().await?;
        Ok(Self {
            db: Arc::new(Mutex::new(db)),
            db_path: None,
            budget_bytes,
            locks: Arc::new(KeyLocks::new()),
        })
    }

    /// Filesystem location, when file-backed.
    pub fn path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    fn is_corrupted_db_error(error: &Error) -> bool {
        let message = error.to_string().to_ascii_lowercase();
        message.contains("file is not a database")
            || message.contains("database disk image is malformed")
    }

    fn quarantine_corrupted_db_files(db_path: &Path) -> Result<()> {
        let Some(base_name) = db_path.file_name().and_then(|name| name.to_str()) else {
            return Ok(());
        };

        if db_path.exists() {
            let timestamp = now_ms();
            let backup_path = db_path.with_file_name(format!("{base_name}.corrupt-{timestamp}"));
            std::fs::rename(db_path, &backup_path)?;
            tracing::warn!(
                "Moved corrupted local store from {} to {}",
                db_path.display(),
                backup_path.display()
            );
        }

        let Some(parent) = db_path.parent() else {
            return Ok(());
        };
        let parent = if parent.as_os_str().is_empty() {
            Path::new(".")
        } else {
            parent
        };
        let sidecar_prefix = format!("{base_name}-");

        for entry in std::fs::read_dir(parent)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let file_name = entry.file_name();
            let file_name = file_name.to_string_lossy();
            if file_name.starts_with(&sidecar_prefix) {
                let path = entry.path();
                std::fs::remove_file(&path)?;
                tracing::warn!("Removed stale local store file {}", path.display());
            }
        }

        Ok(())
    }
}

impl KeyValueStore for LibSqlStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let db = self.db.lock().await;
        let mut rows = db
            .connection()
            .query("SELECT value FROM kv_store WHERE key = ?", [key])
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(row.get::<String>(0)?)),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let db = self.db.lock().await;
        let conn = db.connection();

        if let Some(budget) = self.budget_bytes {
            let mut rows = conn
                .query(
                    "SELECT COALESCE(SUM(LENGTH(CAST(key AS BLOB)) + LENGTH(CAST(value AS BLOB))), 0)
                     FROM kv_store WHERE key != ?",
                    [key],
                )
                .await?;
            let others = match rows.next().await? {
                Some(row) => u64::try_from(row.get::<i64>(0)?).unwrap_or(0),
                None => 0,
            };
            let needed = others + (key.len() + value.len()) as u64;
            if needed > budget {
                return Err(Error::QuotaExceeded {
                    key: key.to_string(),
                    needed,
                    budget,
                });
            }
        }

        conn.execute(
            "INSERT OR REPLACE INTO kv_store (key, value, updated_at) VALUES (?, ?, ?)",
            libsql::params![key, value, now_ms()],
        )
        .await?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let db = self.db.lock().await;
        db.connection()
            .execute("DELETE FROM kv_store WHERE key = ?", [key])
            .await?;
        Ok(())
    }

    async fn remove_many(&self, keys: &[String]) -> Result<()> {
        if keys.is_empty() {
            return Ok(());
        }

        let db = self.db.lock().await;
        let conn = db.connection();
        conn.execute("BEGIN TRANSACTION", ()).await?;

        for key in keys {
            if let Err(e) = conn
                .execute("DELETE FROM kv_store WHERE key = ?", [key.as_str()])
                .await
            {
                conn.execute("ROLLBACK", ()).await.ok();
                return Err(e.into());
            }
        }

        if let Err(e) = conn.execute("COMMIT", ()).await {
            conn.execute("ROLLBACK", ()).await.ok();
            return Err(e.into());
        }
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>> {
        let db = self.db.lock().await;
        let mut rows = db
            .connection()
            .query("SELECT key FROM kv_store ORDER BY key", ())
            .await?;

        let mut keys = Vec::new();
        while let Some(row) = rows.next().await? {
            keys.push(row.get::<String>(0)?);
        }
        Ok(keys)
    }

    async fn usage_bytes(&self) -> Result<u64> {
        let db = self.db.lock().await;
        let mut rows = db
            .connection()
            .query(
                "SELECT COALESCE(SUM(LENGTH(CAST(key AS BLOB)) + LENGTH(CAST(value AS BLOB))), 0) FROM kv_store",
                (),
            )
            .await?;
        match rows.next().await? {
            Some(row) => Ok(u64::try_from(row.get::<i64>(0)?).unwrap_or(0)),
            None => Ok(0),
        }
    }

    fn key_lock(&self, key: &str) -> Arc<Mutex<()>> {
        self.locks.for_key(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test(flavor = "multi_thread")]
    async fn in_memory_set_get_remove() {
        let store = LibSqlStore::open_in_memory(None).await.unwrap();
        store.set("tally.products", "[]").await.unwrap();
        store.set("tally.deviceId", "dev-1").await.unwrap();

        assert_eq!(
            store.get("tally.products").await.unwrap().as_deref(),
            Some("[]")
        );
        assert_eq!(
            store.keys().await.unwrap(),
            vec!["tally.deviceId".to_string(), "tally.products".to_string()]
        );

        store.remove("tally.products").await.unwrap();
        assert_eq!(store.get("tally.products").await.unwrap(), None);

        store
            .remove_many(&["tally.deviceId".to_string()])
            .await
            .unwrap();
        assert!(store.keys().await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn budget_is_enforced() {
        let store = LibSqlStore::open_in_memory(Some(32)).await.unwrap();
        store.set("a", "0123456789").await.unwrap();
        assert_eq!(store.usage_bytes().await.unwrap(), 11);

        let error = store.set("b", "x".repeat(40).as_str()).await.unwrap_err();
        assert!(error.is_quota_exceeded());
        assert_eq!(store.get("b").await.unwrap(), None);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn values_survive_reopen() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("tally.db");
        {
            let store = LibSqlStore::open_path(&path, None).await.unwrap();
            store.set("tally.deviceId", "dev-7").await.unwrap();
        }

        let store = LibSqlStore::open_path(&path, None).await.unwrap();
        assert_eq!(
            store.get("tally.deviceId").await.unwrap().as_deref(),
            Some("dev-7")
        );
    }

    #[test]
    fn detects_corrupted_db_errors() {
        assert!(LibSqlStore::is_corrupted_db_error(&Error::InvalidInput(
            "SQLite failure: file is not a database".to_string()
        )));
        assert!(!LibSqlStore::is_corrupted_db_error(&Error::InvalidInput(
            "bad key".to_string()
        )));
    }

    #[tokio::test]
    async fn clones_share_key_locks() {
        let store = LibSqlStore::open_in_memory(None).await.unwrap();
        let clone = store.clone();
        assert!(Arc::ptr_eq(
            &store.key_lock("tally.orders"),
            &clone.key_lock("tally.orders")
        ));
    }

    #[test]
    fn quarantine_moves_db_and_removes_sidecars() {
        let tmp = tempdir().unwrap();
        let db_path = tmp.path().join("tally.db");
        let wal_path = tmp.path().join("tally.db-wal");
        std::fs::write(&db_path, b"bad-db").unwrap();
        std::fs::write(&wal_path, b"wal").unwrap();

        LibSqlStore::quarantine_corrupted_db_files(&db_path).unwrap();

        assert!(!db_path.exists());
        assert!(!wal_path.exists());
        let found_backup = std::fs::read_dir(tmp.path()).unwrap().any(|entry| {
            entry
                .unwrap()
                .file_name()
                .to_string_lossy()
                .starts_with("tally.db.corrupt-")
        });
        assert!(found_backup);
    }
}
