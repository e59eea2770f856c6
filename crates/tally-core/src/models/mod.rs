//! Data models for Tally

mod collection;
mod product;
mod record;
mod session;
mod stock_check;

pub use collection::{
    acked_key, cursor_key, storage_key, Collection, CollectionName, CollectionSpec,
    CURRENT_USER_KEY, DEVICE_ID_KEY, KEY_PREFIX, LAST_CLEANUP_KEY, SETTINGS_KEY, USERS_KEY,
};
pub use product::Product;
pub use record::{new_record_id, parse_timestamp_value, Record, SyncRecord};
pub use session::Session;
pub use stock_check::{StockCheck, StockCheckLine};
