//! Stock check model

use serde::{Deserialize, Serialize};

use super::record::{new_record_id, parse_timestamp_value, SyncRecord};

/// One counted line of a stock check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StockCheckLine {
    pub product_id: String,
    pub counted: f64,
}

/// A dated stock count taken at an outlet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StockCheck {
    /// Unique identifier
    pub id: String,
    /// Outlet the count was taken at
    #[serde(default)]
    pub outlet_id: String,
    /// Business date of the count (`YYYY-MM-DD` or RFC 3339)
    #[serde(default)]
    pub date: String,
    /// Counted lines
    #[serde(default)]
    pub lines: Vec<StockCheckLine>,
    /// Last update timestamp (Unix ms)
    #[serde(default)]
    pub updated_at: i64,
    /// Replica that authored this version
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    /// Soft delete flag for sync
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted: Option<bool>,
}

impl StockCheck {
    #[must_use]
    pub fn new(outlet_id: impl Into<String>, date: impl Into<String>) -> Self {
        Self {
            id: new_record_id(),
            outlet_id: outlet_id.into(),
            date: date.into(),
            lines: Vec::new(),
            updated_at: 0,
            device_id: None,
            deleted: None,
        }
    }
}

impl SyncRecord for StockCheck {
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
        if field == "date" {
            parse_timestamp_value(&serde_json::Value::String(self.date.clone()))
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_domain_timestamp_uses_date() {
        let check = StockCheck::new("outlet-1", "1970-01-03");
        assert_eq!(check.domain_timestamp("date"), Some(2 * 86_400_000));
        assert_eq!(check.domain_timestamp("createdAt"), None);
    }
}
