use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] tally_core::Error),
    #[error(transparent)]
    Config(#[from] tally_core::config::ConfigError),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("Record fields must be a JSON object")]
    FieldsNotObject,
    #[error("Sync is not configured. Set TALLY_SERVER_URL to enable `tally sync`.")]
    SyncNotConfigured,
    #[error("No user configured. Set TALLY_USER_ID and TALLY_USERNAME before syncing.")]
    NotSignedIn,
}
