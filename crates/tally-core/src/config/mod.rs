//! Client runtime configuration.
//!
//! Read from `TALLY_*` environment variables (the CLI also loads a `.env`
//! file first). Everything has a default except the server URL, which is only
//! needed once something actually syncs.

use std::collections::HashMap;
use std::env;
use std::fmt;
use std::ops::RangeInclusive;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::models::Session;
use crate::retention::RetentionConfig;
use crate::sync::{AnyTransport, SyncOptions, TransportKind};
use crate::util::is_http_url;

const MIB: u64 = 1024 * 1024;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingVar(&'static str),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub server_url: Option<String>,
    pub transport: TransportKind,
    pub sync_interval: Duration,
    pub request_timeout: Duration,
    pub retention_days: u32,
    pub storage_budget_bytes: u64,
    pub cleanup_threshold_bytes: u64,
    pub emergency_keep: usize,
    pub user_id: Option<String>,
    pub username: Option<String>,
    pub role: String,
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("ClientConfig")
            .field("server_url", &self.server_url)
            .field("transport", &self.transport)
            .field("sync_interval", &self.sync_interval)
            .field("request_timeout", &self.request_timeout)
            .field("retention_days", &self.retention_days)
            .field("storage_budget_bytes", &self.storage_budget_bytes)
            .field("cleanup_threshold_bytes", &self.cleanup_threshold_bytes)
            .field("emergency_keep", &self.emergency_keep)
            .field("user_id", &self.user_id.as_ref().map(|_| "[REDACTED]"))
            .field("username", &self.username)
            .field("role", &self.role)
            .finish()
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: None,
            transport: TransportKind::Rpc,
            sync_interval: Duration::from_secs(60),
            request_timeout: Duration::from_secs(30),
            retention_days: 7,
            storage_budget_bytes: 5 * MIB,
            cleanup_threshold_bytes: 4 * MIB,
            emergency_keep: 200,
            user_id: None,
            username: None,
            role: "staff".to_string(),
        }
    }
}

impl ClientConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let values: HashMap<String, String> = env::vars().collect();
        Self::from_lookup(|name| values.get(name).cloned())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let server_url = optional_trimmed(&lookup, "TALLY_SERVER_URL")
            .map(|value| value.trim_end_matches('/').to_string());
        if let Some(url) = server_url.as_deref() {
            if !is_http_url(url) {
                return Err(ConfigError::Invalid(
                    "TALLY_SERVER_URL must start with http:// or https://".to_string(),
                ));
            }
        }

        let transport = optional_trimmed(&lookup, "TALLY_TRANSPORT")
            .map(|value| value.parse::<TransportKind>())
            .transpose()
            .map_err(|_| {
                ConfigError::Invalid("TALLY_TRANSPORT must be 'rpc' or 'endpoint'".to_string())
            })?
            .unwrap_or(defaults.transport);

        let sync_interval_secs =
            bounded(&lookup, "TALLY_SYNC_INTERVAL_SECS", 60_u64, 5..=3_600)?;
        let request_timeout_secs =
            bounded(&lookup, "TALLY_REQUEST_TIMEOUT_SECS", 30_u64, 1..=300)?;
        let retention_days = bounded(&lookup, "TALLY_RETENTION_DAYS", 7_u32, 1..=365)?;
        let storage_budget_bytes = at_least(
            &lookup,
            "TALLY_STORAGE_BUDGET_BYTES",
            defaults.storage_budget_bytes,
            64 * 1024,
        )?;
        let cleanup_threshold_bytes = at_least(
            &lookup,
            "TALLY_CLEANUP_THRESHOLD_BYTES",
            defaults.cleanup_threshold_bytes,
            0,
        )?;
        if cleanup_threshold_bytes > storage_budget_bytes {
            return Err(ConfigError::Invalid(
                "TALLY_CLEANUP_THRESHOLD_BYTES must not exceed TALLY_STORAGE_BUDGET_BYTES"
                    .to_string(),
            ));
        }
        let emergency_keep = bounded(
            &lookup,
            "TALLY_EMERGENCY_KEEP",
            defaults.emergency_keep,
            1..=100_000,
        )?;

        Ok(Self {
            server_url,
            transport,
            sync_interval: Duration::from_secs(sync_interval_secs),
            request_timeout: Duration::from_secs(request_timeout_secs),
            retention_days,
            storage_budget_bytes,
            cleanup_threshold_bytes,
            emergency_keep,
            user_id: optional_trimmed(&lookup, "TALLY_USER_ID"),
            username: optional_trimmed(&lookup, "TALLY_USERNAME"),
            role: value_or_default(&lookup, "TALLY_ROLE", &defaults.role),
        })
    }

    /// The configured user, when both id and username are set.
    pub fn session(&self) -> Option<Session> {
        Some(Session::new(
            self.user_id.clone()?,
            self.username.clone()?,
            self.role.clone(),
        ))
    }

    pub const fn sync_options(&self) -> SyncOptions {
        SyncOptions {
            request_timeout: self.request_timeout,
            emergency_keep: self.emergency_keep,
            cursor_overlap: Duration::from_secs(60),
        }
    }

    pub const fn retention(&self) -> RetentionConfig {
        RetentionConfig {
            window_days: self.retention_days,
            size_threshold_bytes: self.cleanup_threshold_bytes,
        }
    }

    /// Build the configured transport.
    pub fn transport(&self) -> crate::Result<AnyTransport> {
        let url = self
            .server_url
            .as_deref()
            .ok_or(ConfigError::MissingVar("TALLY_SERVER_URL"))?;
        AnyTransport::new(self.transport, url, self.request_timeout)
    }
}

fn bounded<T>(
    lookup: impl Fn(&str) -> Option<String>,
    name: &str,
    default: T,
    range: RangeInclusive<T>,
) -> Result<T, ConfigError>
where
    T: FromStr + PartialOrd + fmt::Display,
{
    let invalid = || {
        ConfigError::Invalid(format!(
            "{name} must be an integer in [{}, {}]",
            range.start(),
            range.end()
        ))
    };
    let Some(raw) = optional_trimmed(lookup, name) else {
        return Ok(default);
    };
    let value = raw.parse::<T>().map_err(|_| invalid())?;
    if range.contains(&value) {
        Ok(value)
    } else {
        Err(invalid())
    }
}

fn at_least(
    lookup: impl Fn(&str) -> Option<String>,
    name: &str,
    default: u64,
    min: u64,
) -> Result<u64, ConfigError> {
    let Some(raw) = optional_trimmed(lookup, name) else {
        return Ok(default);
    };
    raw.parse::<u64>()
        .ok()
        .filter(|value| *value >= min)
        .ok_or_else(|| ConfigError::Invalid(format!("{name} must be an integer >= {min}")))
}

fn value_or_default(lookup: impl Fn(&str) -> Option<String>, name: &str, default: &str) -> String {
    optional_trimmed(lookup, name).unwrap_or_else(|| default.to_string())
}

fn optional_trimmed(lookup: impl Fn(&str) -> Option<String>, name: &str) -> Option<String> {
    lookup(name).and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}
