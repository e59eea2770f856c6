use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use serde_json::{Map, Value};
use tally_core::config::ClientConfig;
use tally_core::device::DeviceIdentity;
use tally_core::models::{Collection, Session};
use tally_core::retention::RetentionPolicy;
use tally_core::store::LibSqlStore;
use tally_core::sync::{
    AnyTransport, CollectionSync, SyncHub, SyncResponse, SyncTransport,
};
use tally_core::{CollectionName, Record, SyncRecord};

use crate::error::CliError;

pub type LocalCollection = CollectionSync<Record, LibSqlStore, NoRemote>;
pub type SyncedCollection = CollectionSync<Record, LibSqlStore, AnyTransport>;

/// Everything a command needs: configuration and the opened local store.
pub struct Context {
    pub config: ClientConfig,
    pub db_path: PathBuf,
    pub store: Arc<LibSqlStore>,
    pub identity: Arc<DeviceIdentity<LibSqlStore>>,
}

impl Context {
    pub async fn open(db_path: Option<PathBuf>) -> Result<Self, CliError> {
        let config = ClientConfig::from_env()?;
        let db_path = db_path.unwrap_or_else(default_db_path);
        Self::open_with(config, db_path).await
    }

    pub async fn open_with(config: ClientConfig, db_path: PathBuf) -> Result<Self, CliError> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let store = Arc::new(
            LibSqlStore::open_path(db_path.clone(), Some(config.storage_budget_bytes)).await?,
        );
        let identity = Arc::new(DeviceIdentity::new(store.clone()));
        Ok(Self {
            config,
            db_path,
            store,
            identity,
        })
    }

    /// A collection opened for local reads and edits only.
    pub async fn local(&self, name: &CollectionName) -> Result<LocalCollection, CliError> {
        let collection = CollectionSync::new(
            name.clone(),
            self.store.clone(),
            Arc::new(NoRemote),
            self.identity.clone(),
            self.config.sync_options(),
        );
        collection.load().await?;
        Ok(collection)
    }

    pub fn transport(&self) -> Result<Arc<AnyTransport>, CliError> {
        if self.config.server_url.is_none() {
            return Err(CliError::SyncNotConfigured);
        }
        Ok(Arc::new(self.config.transport()?))
    }

    pub fn session(&self) -> Result<Session, CliError> {
        self.config.session().ok_or(CliError::NotSignedIn)
    }

    /// A hub over `names`, signed in as the configured user.
    pub fn hub(&self, names: &[CollectionName]) -> Result<SyncHub<LibSqlStore>, CliError> {
        let transport = self.transport()?;
        let session = self.session()?;

        let retention = Arc::new(RetentionPolicy::new(
            self.store.clone(),
            self.config.retention(),
        ));
        let mut hub = SyncHub::new(self.config.sync_interval).with_retention(retention);
        for name in names {
            let collection: SyncedCollection = CollectionSync::new(
                name.clone(),
                self.store.clone(),
                transport.clone(),
                self.identity.clone(),
                self.config.sync_options(),
            );
            hub.register(Arc::new(collection));
        }
        hub.sign_in(session);
        Ok(hub)
    }

    pub fn retention(&self) -> RetentionPolicy<LibSqlStore> {
        RetentionPolicy::new(self.store.clone(), self.config.retention())
    }
}

/// Stand-in transport for commands that never touch the network.
pub struct NoRemote;

impl SyncTransport for NoRemote {
    async fn push<T: SyncRecord>(
        &self,
        _collection: &CollectionName,
        _records: &[T],
        _since: Option<i64>,
    ) -> tally_core::Result<SyncResponse<T>> {
        Err(tally_core::Error::Transport("sync is not configured".to_string()))
    }

    async fn pull<T: SyncRecord>(
        &self,
        _collection: &CollectionName,
        _since: Option<i64>,
    ) -> tally_core::Result<SyncResponse<T>> {
        Err(tally_core::Error::Transport("sync is not configured".to_string()))
    }
}

pub fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("tally")
        .join("tally.db")
}

pub fn display_path(path: &Path) -> String {
    path.display().to_string()
}

/// Every catalogue collection, in sync order.
pub fn all_collections() -> Vec<CollectionName> {
    Collection::ALL.iter().copied().map(CollectionName::from).collect()
}

pub fn parse_collection(raw: &str) -> Result<CollectionName, CliError> {
    Ok(CollectionName::new(raw)?)
}

/// Parse command-line record fields, which must form a JSON object.
pub fn parse_fields(raw: &str) -> Result<Map<String, Value>, CliError> {
    match serde_json::from_str::<Value>(raw)? {
        Value::Object(map) => Ok(map),
        _ => Err(CliError::FieldsNotObject),
    }
}

#[derive(Debug, Serialize)]
pub struct RecordListItem {
    pub id: String,
    pub updated_at: i64,
    pub relative_time: String,
    pub device_id: Option<String>,
    pub deleted: bool,
    pub fields: Map<String, Value>,
}

pub fn record_to_list_item(record: &Record) -> RecordListItem {
    let now_ms = Utc::now().timestamp_millis();
    RecordListItem {
        id: record.id.clone(),
        updated_at: record.updated_at,
        relative_time: format_relative_time(record.updated_at, now_ms),
        device_id: record.device_id.clone(),
        deleted: record.is_deleted(),
        fields: record.fields.clone(),
    }
}

pub fn format_record_lines(records: &[Record]) -> Vec<String> {
    let now_ms = Utc::now().timestamp_millis();
    records
        .iter()
        .map(|record| {
            let short_id = record.id.chars().take(13).collect::<String>();
            let preview = record_preview(record, 48);
            let relative_time = format_relative_time(record.updated_at, now_ms);
            if record.is_deleted() {
                format!("{short_id:<13}  {preview:<48}  {relative_time:<10}  (deleted)")
            } else {
                format!("{short_id:<13}  {preview:<48}  {relative_time}")
            }
        })
        .collect()
}

pub fn record_preview(record: &Record, max_chars: usize) -> String {
    let text = Value::Object(record.fields.clone()).to_string();
    if text.chars().count() > max_chars {
        let truncated = text.chars().take(max_chars - 3).collect::<String>();
        format!("{truncated}...")
    } else {
        text
    }
}

pub fn format_relative_time(timestamp_ms: i64, now_ms: i64) -> String {
    if timestamp_ms <= 0 {
        return "never".to_string();
    }
    let diff = now_ms.saturating_sub(timestamp_ms);
    let minute = 60_000;
    let hour = 60 * minute;
    let day = 24 * hour;
    let week = 7 * day;
    let month = 30 * day;
    let year = 365 * day;

    if diff < minute {
        "just now".to_string()
    } else if diff < hour {
        format!("{}m ago", diff / minute)
    } else if diff < day {
        format!("{}h ago", diff / hour)
    } else if diff < week {
        format!("{}d ago", diff / day)
    } else if diff < month {
        format!("{}w ago", diff / week)
    } else if diff < year {
        format!("{}mo ago", diff / month)
    } else {
        format!("{}y ago", diff / year)
    }
}
