//! Safe loading and persisting of collection arrays
//!
//! Persisted values may be truncated, hand-edited or written by an older app
//! version. Decoding never fails past this module: corrupt values are cleared
//! and reported through [`LoadOutcome`].

use serde_json::Value;

use super::KeyValueStore;
use crate::error::Result;
use crate::models::SyncRecord;

/// Result of reading one collection key.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadOutcome<T> {
    /// Records that decoded cleanly, tombstones included
    pub records: Vec<T>,
    /// Array elements dropped because they did not match the record shape
    pub skipped: usize,
    /// Set when the whole value was unreadable and the key was cleared
    pub recovered: Option<String>,
}

impl<T> LoadOutcome<T> {
    fn empty() -> Self {
        Self {
            records: Vec::new(),
            skipped: 0,
            recovered: None,
        }
    }
}

/// Decode a persisted JSON array into records.
///
/// Elements that fail to decode are skipped and counted. A value that is not
/// JSON, or not an array, is an error describing why.
pub fn decode_collection<T: SyncRecord>(raw: &str) -> std::result::Result<(Vec<T>, usize), String> {
    let value: Value =
        serde_json::from_str(raw).map_err(|error| format!("invalid JSON: {error}"))?;
    let Value::Array(items) = value else {
        return Err(format!("expected a JSON array, found {}", json_kind(&value)));
    };

    let total = items.len();
    let records = items
        .into_iter()
        .filter_map(|item| serde_json::from_value::<T>(item).ok())
        .collect::<Vec<_>>();
    let skipped = total - records.len();
    Ok((records, skipped))
}

/// Load a collection, clearing the key when its value is corrupt.
///
/// Storage-layer failures propagate; data-shape failures never do.
pub async fn load_collection<T, S>(store: &S, key: &str) -> Result<LoadOutcome<T>>
where
    T: SyncRecord,
    S: KeyValueStore,
{
    let Some(raw) = store.get(key).await? else {
        return Ok(LoadOutcome::empty());
    };
    if raw.trim().is_empty() {
        return Ok(LoadOutcome::empty());
    }

    match decode_collection::<T>(&raw) {
        Ok((records, skipped)) => {
            if skipped > 0 {
                tracing::warn!(key, skipped, "Dropped unreadable records while loading");
            }
            Ok(LoadOutcome {
                records,
                skipped,
                recovered: None,
            })
        }
        Err(reason) => {
            tracing::warn!(key, %reason, "Corrupt local collection; clearing it");
            store.remove(key).await?;
            Ok(LoadOutcome {
                records: Vec::new(),
                skipped: 0,
                recovered: Some(reason),
            })
        }
    }
}

/// Serialize and write a collection, tombstones included.
pub async fn persist_collection<T, S>(store: &S, key: &str, records: &[T]) -> Result<()>
where
    T: SyncRecord,
    S: KeyValueStore,
{
    let payload = serde_json::to_string(records)?;
    store.set(key, &payload).await
}

const fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Record;
    use crate::store::MemoryStore;

    #[tokio::test]
    async fn missing_key_loads_empty() {
        let store = MemoryStore::new();
        let outcome = load_collection::<Record, _>(&store, "tally.products")
            .await
            .unwrap();
        assert!(outcome.records.is_empty());
        assert_eq!(outcome.recovered, None);
    }

    #[tokio::test]
    async fn corrupt_values_are_cleared() {
        for corrupt in ["not json", r#"{"id":"p1"}"#, r#"[{"id":"p1","updatedAt":1"#] {
            let store = MemoryStore::new();
            store.set("tally.products", corrupt).await.unwrap();

            let outcome = load_collection::<Record, _>(&store, "tally.products")
                .await
                .unwrap();
            assert!(outcome.records.is_empty(), "input: {corrupt}");
            assert!(outcome.recovered.is_some(), "input: {corrupt}");
            assert_eq!(store.get("tally.products").await.unwrap(), None);
        }
    }

    #[tokio::test]
    async fn bad_elements_are_skipped_not_fatal() {
        let store = MemoryStore::new();
        store
            .set(
                "tally.products",
                r#"[{"id":"p1","updatedAt":1},42,{"name":"no id"},{"id":"p2"}]"#,
            )
            .await
            .unwrap();

        let outcome = load_collection::<Record, _>(&store, "tally.products")
            .await
            .unwrap();
        let ids = outcome
            .records
            .iter()
            .map(|record| record.id.as_str())
            .collect::<Vec<_>>();
        assert_eq!(ids, vec!["p1", "p2"]);
        assert_eq!(outcome.skipped, 2);
        assert!(outcome.recovered.is_none());
    }

    #[tokio::test]
    async fn persist_keeps_tombstones() {
        let store = MemoryStore::new();
        let mut record = Record::with_id("c1", serde_json::Map::new());
        record.touch(500, "dev-a");
        record.mark_deleted();

        persist_collection(&store, "tally.customers", &[record])
            .await
            .unwrap();
        let outcome = load_collection::<Record, _>(&store, "tally.customers")
            .await
            .unwrap();
        assert_eq!(outcome.records.len(), 1);
        assert!(outcome.records[0].is_deleted());
    }
}
