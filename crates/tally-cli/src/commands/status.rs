use std::path::PathBuf;

use serde::Serialize;
use tally_core::models::{cursor_key, storage_key, LAST_CLEANUP_KEY};
use tally_core::store::{load_collection, KeyValueStore};
use tally_core::{Record, SyncRecord};

use crate::commands::common::{all_collections, display_path, format_relative_time, Context};
use crate::error::CliError;

#[derive(Debug, Serialize)]
pub struct StatusReport {
    pub device_id: String,
    pub db_path: String,
    pub server_url: Option<String>,
    pub transport: String,
    pub usage_bytes: u64,
    pub budget_bytes: u64,
    pub last_cleanup: Option<i64>,
    pub collections: Vec<CollectionStatus>,
}

#[derive(Debug, Serialize)]
pub struct CollectionStatus {
    pub name: String,
    pub live: usize,
    pub deleted: usize,
    pub last_sync_time: Option<i64>,
}

pub async fn run_status(as_json: bool, db_path: Option<PathBuf>) -> Result<(), CliError> {
    let ctx = Context::open(db_path).await?;
    let report = collect_status(&ctx).await?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    let now_ms = chrono::Utc::now().timestamp_millis();
    println!("Device:    {}", report.device_id);
    println!("Database:  {}", report.db_path);
    println!(
        "Server:    {} ({})",
        report.server_url.as_deref().unwrap_or("not configured"),
        report.transport
    );
    println!("Storage:   {} / {} bytes", report.usage_bytes, report.budget_bytes);
    println!(
        "Cleanup:   {}",
        format_relative_time(report.last_cleanup.unwrap_or(0), now_ms)
    );
    println!();
    for collection in &report.collections {
        println!(
            "{:<20}  {:>5} live  {:>5} deleted  synced {}",
            collection.name,
            collection.live,
            collection.deleted,
            format_relative_time(collection.last_sync_time.unwrap_or(0), now_ms)
        );
    }
    Ok(())
}

pub async fn collect_status(ctx: &Context) -> Result<StatusReport, CliError> {
    let store = ctx.store.as_ref();
    let mut collections = Vec::new();
    for name in all_collections() {
        let records = load_collection::<Record, _>(store, &storage_key(&name))
            .await?
            .records;
        let deleted = records.iter().filter(|record| record.is_deleted()).count();
        collections.push(CollectionStatus {
            name: name.to_string(),
            live: records.len() - deleted,
            deleted,
            last_sync_time: read_timestamp(store, &cursor_key(&name)).await?,
        });
    }

    Ok(StatusReport {
        device_id: ctx.identity.device_id().await?,
        db_path: display_path(&ctx.db_path),
        server_url: ctx.config.server_url.clone(),
        transport: ctx.config.transport.to_string(),
        usage_bytes: store.usage_bytes().await?,
        budget_bytes: ctx.config.storage_budget_bytes,
        last_cleanup: read_timestamp(store, LAST_CLEANUP_KEY).await?,
        collections,
    })
}

async fn read_timestamp<S: KeyValueStore>(store: &S, key: &str) -> Result<Option<i64>, CliError> {
    Ok(store
        .get(key)
        .await?
        .and_then(|raw| raw.trim().parse::<i64>().ok()))
}
