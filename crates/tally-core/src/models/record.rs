//! Syncable record contract and the schema-free JSON record

use chrono::{DateTime, NaiveDate};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// The minimal shape every synced domain entity satisfies.
///
/// `updated_at` is the only input to conflict resolution. `device_id` is an
/// attribution tag and never affects ordering.
pub trait SyncRecord: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Identifier, unique within its collection and immutable.
    fn id(&self) -> &str;

    /// Last mutation timestamp (Unix ms); `0` when unknown.
    fn updated_at(&self) -> i64;

    /// Replica that produced the current version.
    fn device_id(&self) -> Option<&str>;

    /// Tombstone flag.
    fn is_deleted(&self) -> bool;

    /// Stamp a local mutation.
    fn touch(&mut self, now: i64, device_id: &str);

    /// Turn the record into a tombstone. Callers stamp it with `touch` afterwards.
    fn mark_deleted(&mut self);

    /// Domain date used by retention (e.g. a stock check's `date`), in Unix ms.
    fn domain_timestamp(&self, _field: &str) -> Option<i64> {
        None
    }
}

/// Wire names of the sync fields; never treated as domain fields.
const RESERVED_FIELDS: [&str; 5] = ["id", "updatedAt", "deviceId", "deleted", "syncedAt"];

/// Generate a new record identifier (UUID v7, time-sortable).
#[must_use]
pub fn new_record_id() -> String {
    Uuid::now_v7().to_string()
}

/// A schema-free record: the sync fields plus arbitrary domain fields.
///
/// This is the shape the server stores and the shape used for collections
/// that have no dedicated Rust type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    /// Unique identifier
    #[serde(deserialize_with = "lenient_id")]
    pub id: String,
    /// Last update timestamp (Unix ms); missing or unreadable values count as 0
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub updated_at: i64,
    /// Replica that authored this version
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    /// Soft delete flag for sync
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted: Option<bool>,
    /// When the collection store accepted this version (store clock, Unix ms)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub synced_at: Option<i64>,
    /// Domain fields
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Record {
    /// Create a record with a fresh id and the given domain fields.
    ///
    /// The sync fields are left unstamped until the record is written locally.
    #[must_use]
    pub fn new(fields: Map<String, Value>) -> Self {
        Self::with_id(new_record_id(), fields)
    }

    /// Create a record with a caller-chosen id.
    #[must_use]
    pub fn with_id(id: impl Into<String>, mut fields: Map<String, Value>) -> Self {
        for reserved in RESERVED_FIELDS {
            fields.remove(reserved);
        }
        Self {
            id: id.into(),
            updated_at: 0,
            device_id: None,
            deleted: None,
            synced_at: None,
            fields,
        }
    }

    /// Read a domain field.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Overwrite domain fields from a JSON object, ignoring the sync fields.
    pub fn apply_patch(&mut self, patch: Map<String, Value>) {
        for (key, value) in patch {
            if RESERVED_FIELDS.contains(&key.as_str()) {
                continue;
            }
            self.fields.insert(key, value);
        }
    }
}

impl SyncRecord for Record {
    fn id(&self) -> &str {
        &self.id
    }

    fn updated_at(&self) -> i64 {
        self.updated_at
    }

    fn device_id(&self) -> Option<&str> {
        self.device_id.as_deref()
    }

    fn is_deleted(&self) -> bool {
        self.deleted == Some(true)
    }

    fn touch(&mut self, now: i64, device_id: &str) {
        self.updated_at = now;
        self.device_id = Some(device_id.to_string());
    }

    fn mark_deleted(&mut self) {
        self.deleted = Some(true);
    }

    fn domain_timestamp(&self, field: &str) -> Option<i64> {
        self.fields.get(field).and_then(parse_timestamp_value)
    }
}

/// Interpret a JSON value as a Unix-ms timestamp.
///
/// Accepts integers, floats, numeric strings, RFC 3339 strings and plain
/// `YYYY-MM-DD` dates (midnight UTC).
pub fn parse_timestamp_value(value: &Value) -> Option<i64> {
    match value {
        Value::Number(number) => number.as_i64().or_else(|| {
            #[allow(clippy::cast_possible_truncation)]
            number.as_f64().filter(|v| v.is_finite()).map(|v| v as i64)
        }),
        Value::String(text) => {
            let text = text.trim();
            if let Ok(millis) = text.parse::<i64>() {
                return Some(millis);
            }
            if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
                return Some(parsed.timestamp_millis());
            }
            let date_part = text.get(..10).unwrap_or(text);
            NaiveDate::parse_from_str(date_part, "%Y-%m-%d")
                .ok()
                .and_then(|date| date.and_hms_opt(0, 0, 0))
                .map(|datetime| datetime.and_utc().timestamp_millis())
        }
        _ => None,
    }
}

fn lenient_timestamp<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(parse_timestamp_value(&value).unwrap_or(0))
}

fn lenient_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(id) if !id.trim().is_empty() => Ok(id),
        Value::Number(number) => Ok(number.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "record id must be a non-empty string, got {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn missing_updated_at_defaults_to_zero() {
        let record: Record = serde_json::from_value(json!({"id": "p1", "name": "Flour"})).unwrap();
        assert_eq!(record.updated_at, 0);
        assert!(!record.is_deleted());
        assert_eq!(record.field("name"), Some(&json!("Flour")));
    }

    #[test]
    fn unreadable_updated_at_defaults_to_zero() {
        let record: Record =
            serde_json::from_value(json!({"id": "p1", "updatedAt": {"nested": true}})).unwrap();
        assert_eq!(record.updated_at, 0);
    }

    #[test]
    fn numeric_ids_are_accepted() {
        let record: Record = serde_json::from_value(json!({"id": 42, "updatedAt": 5})).unwrap();
        assert_eq!(record.id, "42");
    }

    #[test]
    fn empty_id_is_rejected() {
        assert!(serde_json::from_value::<Record>(json!({"id": "  "})).is_err());
        assert!(serde_json::from_value::<Record>(json!({"name": "no id"})).is_err());
    }

    #[test]
    fn serializes_with_camel_case_sync_fields() {
        let mut record = Record::with_id("c1", Map::new());
        record.touch(500, "dev-a");
        record.mark_deleted();

        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(
            value,
            json!({"id": "c1", "updatedAt": 500, "deviceId": "dev-a", "deleted": true})
        );
    }

    #[test]
    fn reserved_keys_are_stripped_from_domain_fields() {
        let fields = json!({"id": "x", "updatedAt": 9, "name": "Sugar"});
        let Value::Object(fields) = fields else {
            unreachable!()
        };
        let record = Record::with_id("p2", fields);
        assert_eq!(record.id, "p2");
        assert_eq!(record.updated_at, 0);
        assert_eq!(record.fields.len(), 1);
    }

    #[test]
    fn store_receipt_time_is_a_sync_field() {
        let mut record: Record =
            serde_json::from_value(json!({"id": "c1", "updatedAt": 5, "syncedAt": 900})).unwrap();
        assert_eq!(record.synced_at, Some(900));
        assert!(record.fields.is_empty());

        let Value::Object(patch) = json!({"syncedAt": 1, "name": "Acme"}) else {
            unreachable!()
        };
        record.apply_patch(patch);
        assert_eq!(record.synced_at, Some(900));
        assert_eq!(record.field("name"), Some(&json!("Acme")));
    }

    #[test]
    fn parse_timestamp_value_accepts_common_shapes() {
        assert_eq!(parse_timestamp_value(&json!(1_000)), Some(1_000));
        assert_eq!(parse_timestamp_value(&json!(1_000.7)), Some(1_000));
        assert_eq!(parse_timestamp_value(&json!("1000")), Some(1_000));
        assert_eq!(parse_timestamp_value(&json!("1970-01-02")), Some(86_400_000));
        assert_eq!(
            parse_timestamp_value(&json!("1970-01-01T00:00:01Z")),
            Some(1_000)
        );
        assert_eq!(parse_timestamp_value(&json!("yesterday")), None);
        assert_eq!(parse_timestamp_value(&json!(null)), None);
    }
}
