//! Plain file-endpoint transport.
//!
//! The store exposes one upload and one download endpoint per collection,
//! both carrying the raw JSON array. The server merges uploads before
//! storing them and answers with the merged array; cursor filtering on the
//! store's `syncedAt` stamps happens here, after the download.

use std::time::Duration;

use serde_json::Value;

use super::rpc::{normalize_base_url, parse_api_error};
use super::server::changed_since;
use super::{SyncResponse, SyncTransport};
use crate::error::{Error, Result};
use crate::models::{CollectionName, Record, SyncRecord};
use crate::util::{compact_text, now_ms};

#[derive(Clone)]
pub struct EndpointTransport {
    base_url: String,
    client: reqwest::Client,
}

impl EndpointTransport {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        Ok(Self {
            base_url: normalize_base_url(base_url.into())?,
            client: reqwest::Client::builder().timeout(timeout).build()?,
        })
    }

    fn url(&self, path: &str, collection: &CollectionName) -> String {
        // Collection names are restricted to URL-safe characters.
        format!("{}/{path}?endpoint={}", self.base_url, collection.as_str())
    }

    async fn read_array(response: reqwest::Response) -> Result<Vec<Record>> {
        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(Error::Transport(parse_api_error(status, &text)));
        }
        parse_array_body(&text)
    }
}

impl SyncTransport for EndpointTransport {
    async fn push<T: SyncRecord>(
        &self,
        collection: &CollectionName,
        records: &[T],
        since: Option<i64>,
    ) -> Result<SyncResponse<T>> {
        let response = self
            .client
            .post(self.url("sync", collection))
            .json(records)
            .send()
            .await?;
        let all = Self::read_array(response).await?;
        Ok(filter_snapshot(&all, since))
    }

    async fn pull<T: SyncRecord>(
        &self,
        collection: &CollectionName,
        since: Option<i64>,
    ) -> Result<SyncResponse<T>> {
        let response = self
            .client
            .get(self.url("get", collection))
            .send()
            .await?;
        let all = Self::read_array(response).await?;
        Ok(filter_snapshot(&all, since))
    }
}

fn filter_snapshot<T: SyncRecord>(all: &[Record], since: Option<i64>) -> SyncResponse<T> {
    let data = changed_since(all, since)
        .into_iter()
        .filter_map(|record| {
            serde_json::to_value(record)
                .ok()
                .and_then(|value| serde_json::from_value(value).ok())
        })
        .collect();
    SyncResponse {
        data,
        total_count: all.len(),
        sync_time: now_ms(),
    }
}

fn parse_array_body(body: &str) -> Result<Vec<Record>> {
    let value: Value = serde_json::from_str(body).map_err(|error| {
        Error::Transport(format!(
            "malformed collection body ({error}): {}",
            compact_text(body)
        ))
    })?;
    let Value::Array(items) = value else {
        return Err(Error::Transport(
            "malformed collection body: expected a JSON array".to_string(),
        ));
    };
    Ok(items
        .into_iter()
        .filter_map(|item| serde_json::from_value(item).ok())
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Record;

    #[test]
    fn url_carries_collection_as_endpoint() {
        let transport =
            EndpointTransport::new("http://localhost:8080/", Duration::from_secs(5)).unwrap();
        let name = CollectionName::new("stockChecks").unwrap();
        assert_eq!(
            transport.url("get", &name),
            "http://localhost:8080/get?endpoint=stockChecks"
        );
    }

    #[test]
    fn non_array_bodies_are_errors() {
        assert!(parse_array_body("{}").is_err());
        assert!(parse_array_body("<html>").is_err());
        assert_eq!(parse_array_body("[]").unwrap().len(), 0);
    }

    #[test]
    fn snapshot_is_filtered_by_store_stamp() {
        let all = parse_array_body(
            r#"[{"id":"a","updatedAt":5},{"id":"b","updatedAt":15},{"id":"c","updatedAt":1,"syncedAt":20}]"#,
        )
        .unwrap();
        let response = filter_snapshot::<Record>(&all, Some(10));
        assert_eq!(response.total_count, 3);
        let ids = response
            .data
            .iter()
            .map(|record| record.id.as_str())
            .collect::<Vec<_>>();
        assert_eq!(ids, vec!["b", "c"]);
    }
}
