use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "tally")]
#[command(about = "Offline-first stock records with multi-device sync")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Optional path to the local database file
    #[arg(long, global = true, value_name = "PATH")]
    pub db_path: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Print this device's sync identity
    Device,
    /// List records in a collection
    List {
        /// Collection name (products, stockChecks, orders, ...)
        collection: String,
        /// Include deleted records
        #[arg(long)]
        all: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Add a record from a JSON object
    Add {
        /// Collection name
        collection: String,
        /// Record fields as a JSON object
        fields: String,
        /// Use this id instead of generating one
        #[arg(long)]
        id: Option<String>,
    },
    /// Merge a JSON object into an existing record
    Update {
        /// Collection name
        collection: String,
        /// Record ID
        id: String,
        /// Fields to overwrite as a JSON object
        fields: String,
    },
    /// Delete a record (kept as a tombstone until synced)
    Delete {
        /// Collection name
        collection: String,
        /// Record ID
        id: String,
    },
    /// Sync one or every collection with the server
    Sync {
        /// Only sync this collection
        collection: Option<String>,
        /// Download everything instead of changes since the last sync
        #[arg(long)]
        force: bool,
    },
    /// Evict old synced data from local storage
    Cleanup {
        /// Sweep even if one already ran today
        #[arg(long)]
        force: bool,
    },
    /// Show local storage and sync status
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Keep syncing in the foreground until interrupted
    Watch,
}
