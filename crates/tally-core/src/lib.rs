//! tally-core - Core library for Tally
//!
//! This crate contains the record model, the local key-value store, the
//! last-writer-wins merge engine and the per-collection sync orchestration
//! shared by every Tally client (CLI, devices) and by the sync server.

pub mod config;
pub mod device;
pub mod error;
pub mod merge;
pub mod models;
pub mod retention;
pub mod state;
pub mod store;
pub mod sync;
pub mod util;

pub use error::{Error, Result};
pub use models::{CollectionName, Record, SyncRecord};
