//! Device identity
//!
//! Every locally authored record is tagged with the id of the replica that
//! wrote it. The id is created once per installation and cached in-process.
//! It is an attribution tag, not a credential.

use std::sync::Arc;

use tokio::sync::OnceCell;
use uuid::Uuid;

use crate::error::Result;
use crate::models::DEVICE_ID_KEY;
use crate::store::KeyValueStore;
use crate::util::now_ms;

/// Lazily resolves and caches this installation's device id.
pub struct DeviceIdentity<S> {
    store: Arc<S>,
    cached: OnceCell<String>,
}

impl<S: KeyValueStore> DeviceIdentity<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            cached: OnceCell::new(),
        }
    }

    /// Return the device id, creating and persisting one on first use.
    ///
    /// Storage failures propagate so that a broken store is never masked by
    /// a fresh id on every run.
    pub async fn device_id(&self) -> Result<String> {
        let id = self
            .cached
            .get_or_try_init(|| async {
                if let Some(existing) = self.store.get(DEVICE_ID_KEY).await? {
                    let existing = existing.trim().trim_matches('"').to_string();
                    if !existing.is_empty() {
                        return Ok(existing);
                    }
                }

                let generated = generate_device_id(now_ms());
                self.store.set(DEVICE_ID_KEY, &generated).await?;
                tracing::info!(device_id = %generated, "Created device identity");
                Ok::<_, crate::Error>(generated)
            })
            .await?;
        Ok(id.clone())
    }
}

/// `device-<ms>-<random>`: enough entropy for attribution across replicas.
fn generate_device_id(now: i64) -> String {
    let random = Uuid::new_v4().simple().to_string();
    format!("device-{now}-{}", &random[..9])
}
