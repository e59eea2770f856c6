//! Product model

use serde::{Deserialize, Serialize};

use super::record::{new_record_id, SyncRecord};

/// A product in the shared catalogue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    /// Unique identifier
    pub id: String,
    /// Display name
    #[serde(default)]
    pub name: String,
    /// Optional category label
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    /// Unit of measure (kg, pcs, ...)
    #[serde(default)]
    pub unit: String,
    /// Quantity currently on hand
    #[serde(default)]
    pub quantity: f64,
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

impl Product {
    /// Create a new product with a fresh id
    #[must_use]
    pub fn new(name: impl Into<String>, unit: impl Into<String>) -> Self {
        Self {
            id: new_record_id(),
            name: name.into(),
            category: None,
            unit: unit.into(),
            quantity: 0.0,
            updated_at: 0,
            device_id: None,
            deleted: None,
        }
    }
}

impl SyncRecord for Product {
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
}
