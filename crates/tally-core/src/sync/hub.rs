//! Session-scoped background sync
//!
//! The hub owns every registered collection. While a session is active it
//! runs a fixed-interval loop that syncs each collection silently and then
//! gives the retention policy a chance to sweep. Ending the session stops the
//! loop; syncing without a session is refused.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::{CollectionSync, SyncMode, SyncOutcome, SyncTransport};
use crate::error::{Error, Result};
use crate::models::{CollectionName, Session, SyncRecord};
use crate::retention::RetentionPolicy;
use crate::store::KeyValueStore;
use crate::util::now_ms;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Object-safe view of a collection orchestrator.
pub trait ManagedCollection: Send + Sync {
    fn name(&self) -> &CollectionName;

    fn load(&self) -> BoxFuture<'_, Result<()>>;

    /// Re-read storage and republish without a loading phase.
    fn refresh(&self) -> BoxFuture<'_, Result<()>>;

    /// Sync once; `full` ignores the stored cursor.
    fn sync(&self, mode: SyncMode, full: bool) -> BoxFuture<'_, Result<SyncOutcome>>;
}

impl<T, S, R> ManagedCollection for CollectionSync<T, S, R>
where
    T: SyncRecord,
    S: KeyValueStore,
    R: SyncTransport,
{
    fn name(&self) -> &CollectionName {
        Self::name(self)
    }

    fn load(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(Self::load(self))
    }

    fn refresh(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(Self::refresh(self))
    }

    fn sync(&self, mode: SyncMode, full: bool) -> BoxFuture<'_, Result<SyncOutcome>> {
        if full {
            Box::pin(self.force_download(mode))
        } else {
            Box::pin(self.sync_now(mode))
        }
    }
}

pub struct SyncHub<S> {
    collections: Vec<Arc<dyn ManagedCollection>>,
    retention: Option<Arc<RetentionPolicy<S>>>,
    interval: Duration,
    session: Mutex<Option<Session>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl<S: KeyValueStore> SyncHub<S> {
    pub fn new(interval: Duration) -> Self {
        Self {
            collections: Vec::new(),
            retention: None,
            interval,
            session: Mutex::new(None),
            task: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn with_retention(mut self, policy: Arc<RetentionPolicy<S>>) -> Self {
        self.retention = Some(policy);
        self
    }

    /// Add a collection; collections sync in registration order.
    pub fn register(&mut self, collection: Arc<dyn ManagedCollection>) {
        self.collections.push(collection);
    }

    pub fn collections(&self) -> &[Arc<dyn ManagedCollection>] {
        &self.collections
    }

    pub fn collection(&self, name: &CollectionName) -> Option<&Arc<dyn ManagedCollection>> {
        self.collections.iter().find(|c| c.name() == name)
    }

    pub fn session(&self) -> Option<Session> {
        self.session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Load every collection, continuing past failures.
    pub async fn load_all(&self) {
        for collection in &self.collections {
            if let Err(error) = collection.load().await {
                tracing::warn!(
                    collection = %collection.name(),
                    error = %error,
                    "Collection load failed"
                );
            }
        }
    }

    /// Record the signed-in user without arming the background loop.
    pub fn sign_in(&self, session: Session) {
        *self.session.lock().unwrap_or_else(PoisonError::into_inner) = Some(session);
    }

    /// Arm background sync for `session`, replacing any previous session.
    ///
    /// The first round runs immediately.
    pub fn start_session(&self, session: Session) {
        tracing::info!(
            user = %session.username,
            interval = ?self.interval,
            "Starting sync session"
        );
        self.sign_in(session);

        let collections = self.collections.clone();
        let retention = self.retention.clone();
        let interval = self.interval;
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                sync_round(&collections, SyncMode::Silent, false).await;
                if let Some(retention) = &retention {
                    match retention.maybe_run(now_ms()).await {
                        Ok(Some(report)) if report.records_dropped > 0 => {
                            refresh_all(&collections).await;
                        }
                        Ok(_) => {}
                        Err(error) => tracing::warn!(error = %error, "Retention sweep failed"),
                    }
                }
            }
        });

        if let Some(previous) = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(handle)
        {
            previous.abort();
        }
    }

    /// Stop background sync and forget the session.
    pub fn end_session(&self) {
        if let Some(task) = self.task.lock().unwrap_or_else(PoisonError::into_inner).take() {
            task.abort();
        }
        if self
            .session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .is_some()
        {
            tracing::info!("Ended sync session");
        }
    }

    /// Sync every collection once.
    ///
    /// A loud round stops at the first failure and returns it.
    pub async fn sync_all(
        &self,
        mode: SyncMode,
        full: bool,
    ) -> Result<Vec<(CollectionName, SyncOutcome)>> {
        if self.session().is_none() {
            return Err(Error::NotSignedIn);
        }
        let mut outcomes = Vec::with_capacity(self.collections.len());
        for collection in &self.collections {
            let outcome = collection.sync(mode, full).await?;
            outcomes.push((collection.name().clone(), outcome));
        }
        Ok(outcomes)
    }
}

impl<S> Drop for SyncHub<S> {
    fn drop(&mut self) {
        if let Some(task) = self.task.get_mut().unwrap_or_else(PoisonError::into_inner).take() {
            task.abort();
        }
    }
}

/// Republish every collection after storage changed underneath it.
async fn refresh_all(collections: &[Arc<dyn ManagedCollection>]) {
    for collection in collections {
        if let Err(error) = collection.refresh().await {
            tracing::warn!(
                collection = %collection.name(),
                error = %error,
                "Collection refresh failed"
            );
        }
    }
}

async fn sync_round(collections: &[Arc<dyn ManagedCollection>], mode: SyncMode, full: bool) {
    for collection in collections {
        // Silent syncs report failures as outcomes; anything else is logged.
        if let Err(error) = collection.sync(mode, full).await {
            tracing::warn!(collection = %collection.name(), error = %error, "Sync round failed");
        }
    }
}
