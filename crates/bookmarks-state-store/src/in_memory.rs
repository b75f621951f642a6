//! In-memory implementation of the `SagaStateStore` trait.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use bookmarks_core::clock::Clock;
use bookmarks_core::error::DomainError;
use bookmarks_core::state_store::SagaStateStore;
use chrono::{DateTime, TimeDelta, Utc};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use crate::ttl_millis;

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: DateTime<Utc>,
}

/// Process-local state store.
///
/// Entries expire against the injected clock: an entry past its deadline is
/// invisible to every operation and is dropped the next time its key is
/// touched or [`InMemoryStateStore::purge_expired`] runs, which
/// [`InMemoryStateStore::spawn_purger`] does on a timer. A single mutex
/// makes the conditional operations atomic.
pub struct InMemoryStateStore {
    entries: Mutex<HashMap<String, Entry>>,
    clock: Arc<dyn Clock>,
}

impl InMemoryStateStore {
    /// Creates an empty store reading time from `clock`.
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            clock,
        }
    }

    /// Drops every expired entry and returns how many were removed.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Infrastructure` if the internal mutex is poisoned.
    pub fn purge_expired(&self) -> Result<usize, DomainError> {
        let now = self.clock.now();
        let mut entries = self.lock()?;
        let before = entries.len();
        entries.retain(|_, entry| entry.expires_at > now);
        let purged = before - entries.len();
        if purged > 0 {
            debug!(purged, "purged expired saga state");
        }
        Ok(purged)
    }

    /// Runs [`purge_expired`](Self::purge_expired) every `period` on the
    /// Tokio runtime. The task ends once the last other handle to `store` is
    /// dropped.
    pub fn spawn_purger(store: &Arc<Self>, period: Duration) -> JoinHandle<()> {
        let store = Arc::downgrade(store);
        tokio::spawn(async move {
            let mut ticks = tokio::time::interval(period);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticks.tick().await;
            loop {
                ticks.tick().await;
                let Some(store) = store.upgrade() else {
                    debug!("state store dropped, purger stopping");
                    return;
                };
                if let Err(err) = store.purge_expired() {
                    warn!(error = %err, "failed to purge expired saga state");
                }
            }
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<String, Entry>>, DomainError> {
        self.entries
            .lock()
            .map_err(|_| DomainError::Infrastructure("state store mutex poisoned".into()))
    }

    fn deadline(&self, ttl: Duration) -> DateTime<Utc> {
        let millis = i64::try_from(ttl_millis(ttl)).unwrap_or(i64::MAX);
        self.clock.now() + TimeDelta::try_milliseconds(millis).unwrap_or(TimeDelta::MAX)
    }

    /// Returns the live entry for `key`, evicting it first if it expired.
    fn live<'a>(
        entries: &'a mut HashMap<String, Entry>,
        key: &str,
        now: DateTime<Utc>,
    ) -> Option<&'a Entry> {
        if entries.get(key).is_some_and(|entry| entry.expires_at <= now) {
            entries.remove(key);
        }
        entries.get(key)
    }
}

#[async_trait]
impl SagaStateStore for InMemoryStateStore {
    async fn get(&self, key: &str) -> Result<Option<String>, DomainError> {
        let now = self.clock.now();
        let mut entries = self.lock()?;
        Ok(Self::live(&mut entries, key, now).map(|entry| entry.value.clone()))
    }

    async fn set_with_ttl(
        &self,
        key: &str,
        ttl: Duration,
        value: &str,
    ) -> Result<(), DomainError> {
        let expires_at = self.deadline(ttl);
        self.lock()?.insert(
            key.to_owned(),
            Entry {
                value: value.to_owned(),
                expires_at,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), DomainError> {
        self.lock()?.remove(key);
        Ok(())
    }

    async fn set_if_absent_with_ttl(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, DomainError> {
        let now = self.clock.now();
        let expires_at = self.deadline(ttl);
        let mut entries = self.lock()?;
        if Self::live(&mut entries, key, now).is_some() {
            return Ok(false);
        }
        entries.insert(
            key.to_owned(),
            Entry {
                value: value.to_owned(),
                expires_at,
            },
        );
        Ok(true)
    }

    async fn delete_if_equals(&self, key: &str, expected: &str) -> Result<bool, DomainError> {
        let now = self.clock.now();
        let mut entries = self.lock()?;
        let owned = Self::live(&mut entries, key, now).is_some_and(|entry| entry.value == expected);
        if owned {
            entries.remove(key);
        }
        Ok(owned)
    }
}
