use std::collections::HashMap;
use std::env;
use std::path::PathBuf;

use thiserror::Error;

const DEFAULT_MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: String,
    pub data_dir: PathBuf,
    pub max_body_bytes: usize,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let values: HashMap<String, String> = env::vars().collect();
        Self::from_lookup(|name| values.get(name).cloned())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let bind_addr = value_or_default(&lookup, "TALLY_API_BIND_ADDR", "127.0.0.1:8080");
        let data_dir = PathBuf::from(value_or_default(&lookup, "TALLY_API_DATA_DIR", "./data"));

        let max_body_bytes = optional_trimmed(&lookup, "TALLY_API_MAX_BODY_BYTES")
            .map_or(Ok(DEFAULT_MAX_BODY_BYTES), |value| {
                value.parse::<usize>().map_err(|_| {
                    ConfigError::Invalid(
                        "TALLY_API_MAX_BODY_BYTES must be an integer >= 1024".to_string(),
                    )
                })
            })?;
        if max_body_bytes < 1024 {
            return Err(ConfigError::Invalid(
                "TALLY_API_MAX_BODY_BYTES must be >= 1024".to_string(),
            ));
        }

        Ok(Self {
            bind_addr,
            data_dir,
            max_body_bytes,
        })
    }
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

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config_from(pairs: &[(&str, &str)]) -> Result<AppConfig, ConfigError> {
        let map: HashMap<&str, &str> = pairs.iter().copied().collect();
        AppConfig::from_lookup(|key| map.get(key).map(|value| (*value).to_string()))
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config.bind_addr, "127.0.0.1:8080");
        assert_eq!(config.data_dir, PathBuf::from("./data"));
        assert_eq!(config.max_body_bytes, DEFAULT_MAX_BODY_BYTES);
    }

    #[test]
    fn rejects_tiny_body_limit() {
        let err = config_from(&[("TALLY_API_MAX_BODY_BYTES", "12")]).unwrap_err();
        assert!(err.to_string().contains("TALLY_API_MAX_BODY_BYTES"));
        assert!(config_from(&[("TALLY_API_MAX_BODY_BYTES", "lots")]).is_err());
    }

    #[test]
    fn reads_overrides() {
        let config = config_from(&[
            ("TALLY_API_BIND_ADDR", "0.0.0.0:9000"),
            ("TALLY_API_DATA_DIR", "/var/lib/tally"),
        ])
        .unwrap();
        assert_eq!(config.bind_addr, "0.0.0.0:9000");
        assert_eq!(config.data_dir, PathBuf::from("/var/lib/tally"));
    }
}
