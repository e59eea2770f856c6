//! Collection catalogue and storage key naming

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Namespace shared by every persisted key.
pub const KEY_PREFIX: &str = "tally.";
/// Stable per-installation device identifier.
pub const DEVICE_ID_KEY: &str = "tally.deviceId";
/// Timestamp of the last retention sweep.
pub const LAST_CLEANUP_KEY: &str = "tally.lastCleanup";
/// Signed-in user.
pub const CURRENT_USER_KEY: &str = "tally.currentUser";
/// Cached user list.
pub const USERS_KEY: &str = "tally.users";
/// Local device settings.
pub const SETTINGS_KEY: &str = "tally.settings";

const CURSOR_PREFIX: &str = "tally.cursor.";
const ACKED_PREFIX: &str = "tally.acked.";
const MAX_NAME_LEN: usize = 64;

/// Storage key holding a collection's persisted array.
pub fn storage_key(name: &CollectionName) -> String {
    format!("{KEY_PREFIX}{}", name.as_str())
}

/// Storage key holding a collection's last successful sync time.
pub fn cursor_key(name: &CollectionName) -> String {
    format!("{CURSOR_PREFIX}{}", name.as_str())
}

/// Storage key holding the local time up to which every record was pushed.
///
/// Written after a successful sync with the time the pushed snapshot was
/// read; tombstones stamped before it are confirmed to have reached the server.
pub fn acked_key(name: &CollectionName) -> String {
    format!("{ACKED_PREFIX}{}", name.as_str())
}

/// A validated collection name.
///
/// Names are limited to ASCII letters, digits, `-` and `_` so they are safe to
/// use as storage keys, URL query values and server-side file names.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CollectionName(String);

impl CollectionName {
    /// Validate and wrap a collection name.
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        let name = name.trim();
        if name.is_empty() {
            return Err(Error::InvalidInput(
                "Collection name cannot be empty".to_string(),
            ));
        }
        if name.len() > MAX_NAME_LEN {
            return Err(Error::InvalidInput(format!(
                "Collection name exceeds {MAX_NAME_LEN} characters"
            )));
        }
        if !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(Error::InvalidInput(format!(
                "Collection name '{name}' may only contain letters, digits, '-' and '_'"
            )));
        }
        Ok(Self(name.to_string()))
    }

    /// Get the name as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Catalogue entry for this name, or a default spec for ad-hoc collections.
    pub fn spec(&self) -> CollectionSpec {
        Collection::from_name(&self.0).map_or(
            CollectionSpec {
                date_field: None,
                core: false,
                protected: false,
            },
            Collection::spec,
        )
    }
}

impl fmt::Display for CollectionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for CollectionName {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl TryFrom<String> for CollectionName {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<CollectionName> for String {
    fn from(value: CollectionName) -> Self {
        value.0
    }
}

impl From<Collection> for CollectionName {
    fn from(value: Collection) -> Self {
        Self(value.name().to_string())
    }
}

/// Per-collection configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollectionSpec {
    /// Domain date field consulted by retention when `updatedAt` is absent
    pub date_field: Option<&'static str>,
    /// Permanent collection: its key survives a sweep even when empty
    pub core: bool,
    /// Never touched by the retention sweep
    pub protected: bool,
}

/// The business collections every device keeps a replica of.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    Products,
    StockChecks,
    Requests,
    Outlets,
    Customers,
    Orders,
    Recipes,
    StoreProducts,
    Suppliers,
    Grns,
    ProductionRequests,
    ProductionApprovals,
    ActivityLogs,
    Users,
}

impl Collection {
    /// Every known collection, in sync order.
    pub const ALL: [Self; 14] = [
        Self::Users,
        Self::Outlets,
        Self::Products,
        Self::StockChecks,
        Self::Requests,
        Self::Customers,
        Self::Orders,
        Self::Recipes,
        Self::StoreProducts,
        Self::Suppliers,
        Self::Grns,
        Self::ProductionRequests,
        Self::ProductionApprovals,
        Self::ActivityLogs,
    ];

    /// Wire and storage name.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Products => "products",
            Self::StockChecks => "stockChecks",
            Self::Requests => "requests",
            Self::Outlets => "outlets",
            Self::Customers => "customers",
            Self::Orders => "orders",
            Self::Recipes => "recipes",
            Self::StoreProducts => "storeProducts",
            Self::Suppliers => "suppliers",
            Self::Grns => "grns",
            Self::ProductionRequests => "productionRequests",
            Self::ProductionApprovals => "productionApprovals",
            Self::ActivityLogs => "activityLogs",
            Self::Users => "users",
        }
    }

    /// Look up a catalogue entry by its wire name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|collection| collection.name() == name)
    }

    pub const fn spec(self) -> CollectionSpec {
        match self {
            Self::StockChecks => CollectionSpec {
                date_field: Some("date"),
                core: true,
                protected: false,
            },
            Self::Outlets | Self::Users => CollectionSpec {
                date_field: None,
                core: true,
                protected: true,
            },
            Self::Products
            | Self::Customers
            | Self::Recipes
            | Self::StoreProducts
            | Self::Suppliers => CollectionSpec {
                date_field: None,
                core: true,
                protected: false,
            },
            Self::Requests
            | Self::Orders
            | Self::Grns
            | Self::ProductionRequests
            | Self::ProductionApprovals
            | Self::ActivityLogs => CollectionSpec {
                date_field: Some("createdAt"),
                core: false,
                protected: false,
            },
        }
    }
}
