//! Request/response transport: one round trip pushes the local batch and
//! returns the store's post-merge answer.

use std::time::Duration;

use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::Value;

use super::{PullRequest, PushRequest, SyncResponse, SyncTransport};
use crate::error::{Error, Result};
use crate::models::{CollectionName, SyncRecord};
use crate::util::{compact_text, is_http_url, normalize_text_option};

#[derive(Clone)]
pub struct RpcTransport {
    base_url: String,
    client: reqwest::Client,
}

impl RpcTransport {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        Ok(Self {
            base_url: normalize_base_url(base_url.into())?,
            client: reqwest::Client::builder().timeout(timeout).build()?,
        })
    }

    async fn call<B, T>(&self, path: &str, body: &B) -> Result<SyncResponse<T>>
    where
        B: serde::Serialize + Sync,
        T: SyncRecord,
    {
        let response = self
            .client
            .post(format!("{}{path}", self.base_url))
            .header(reqwest::header::ACCEPT, "application/json")
            .json(body)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(Error::Transport(parse_api_error(status, &text)));
        }
        parse_sync_response(&text)
    }
}

impl SyncTransport for RpcTransport {
    async fn push<T: SyncRecord>(
        &self,
        collection: &CollectionName,
        records: &[T],
        since: Option<i64>,
    ) -> Result<SyncResponse<T>> {
        let body = PushRequest {
            collection: collection.clone(),
            data: records.to_vec(),
            last_sync_time: since,
        };
        self.call("/v1/sync", &body).await
    }

    async fn pull<T: SyncRecord>(
        &self,
        collection: &CollectionName,
        since: Option<i64>,
    ) -> Result<SyncResponse<T>> {
        let body = PullRequest {
            collection: collection.clone(),
            last_sync_time: since,
        };
        self.call("/v1/pull", &body).await
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawSyncResponse {
    data: Value,
    total_count: usize,
    sync_time: i64,
}

/// Parse a sync reply, rejecting bodies without a `data` array.
///
/// Individual elements that do not match the record shape are skipped.
pub(crate) fn parse_sync_response<T: SyncRecord>(body: &str) -> Result<SyncResponse<T>> {
    let raw: RawSyncResponse = serde_json::from_str(body).map_err(|error| {
        Error::Transport(format!(
            "malformed sync response ({error}): {}",
            compact_text(body)
        ))
    })?;
    let Value::Array(items) = raw.data else {
        return Err(Error::Transport(
            "malformed sync response: `data` is not an array".to_string(),
        ));
    };

    let total = items.len();
    let data = items
        .into_iter()
        .filter_map(|item| serde_json::from_value::<T>(item).ok())
        .collect::<Vec<_>>();
    if data.len() < total {
        tracing::warn!(
            dropped = total - data.len(),
            "Ignored unreadable records in sync response"
        );
    }

    Ok(SyncResponse {
        data,
        total_count: raw.total_count,
        sync_time: raw.sync_time,
    })
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: Option<String>,
    message: Option<String>,
}

pub(crate) fn parse_api_error(status: StatusCode, body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<ApiErrorBody>(body) {
        if let Some(message) = payload.message.or(payload.error) {
            return format!("{} ({})", message.trim(), status.as_u16());
        }
    }

    let trimmed = compact_text(body);
    if trimmed.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        format!("{} ({})", trimmed, status.as_u16())
    }
}

pub(crate) fn normalize_base_url(raw: String) -> Result<String> {
    let url = normalize_text_option(Some(raw))
        .ok_or_else(|| Error::InvalidInput("server URL must not be empty".to_string()))?;
    if is_http_url(&url) {
        Ok(url.trim_end_matches('/').to_string())
    } else {
        Err(Error::InvalidInput(
            "server URL must include http:// or https://".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Record;

    #[test]
    fn normalize_base_url_rejects_invalid_values() {
        assert!(normalize_base_url(String::new()).is_err());
        assert!(normalize_base_url("sync.example.com".to_string()).is_err());
        assert_eq!(
            normalize_base_url(" https://sync.example.com/ ".to_string()).unwrap(),
            "https://sync.example.com"
        );
    }

    #[test]
    fn parse_sync_response_requires_data_array() {
        assert!(parse_sync_response::<Record>("not json").is_err());
        assert!(
            parse_sync_response::<Record>(r#"{"data":{},"totalCount":0,"syncTime":1}"#).is_err()
        );
        assert!(parse_sync_response::<Record>(r#"{"totalCount":0,"syncTime":1}"#).is_err());
    }

    #[test]
    fn parse_sync_response_skips_bad_elements() {
        let parsed = parse_sync_response::<Record>(
            r#"{"data":[{"id":"a","updatedAt":2},{"nope":1}],"totalCount":2,"syncTime":9}"#,
        )
        .unwrap();
        assert_eq!(parsed.data.len(), 1);
        assert_eq!(parsed.total_count, 2);
        assert_eq!(parsed.sync_time, 9);
    }

    #[test]
    fn parse_api_error_prefers_json_message() {
        assert_eq!(
            parse_api_error(StatusCode::BAD_REQUEST, r#"{"error":"bad collection"}"#),
            "bad collection (400)"
        );
        assert_eq!(parse_api_error(StatusCode::BAD_GATEWAY, ""), "HTTP 502");
    }
}
