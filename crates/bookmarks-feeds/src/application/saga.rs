//! Time-windowed aggregation of card-collection events into feed activities.
//!
//! Events for the same card and actor that arrive within one window are
//! merged into a single [`PendingActivity`] kept in the shared state store.
//! The first event of a window schedules a flush for when the window closes;
//! the flush turns the pending state into one [`Activity`].
//!
//! Every read-modify-write of a key's state happens under a per-key lock
//! taken with an atomic set-if-absent, so replicas consuming the same queue
//! never interleave on one key. The lock value is a fresh token per
//! acquisition and is released with an owner-checked delete. State and lock
//! both carry TTLs, so a crashed holder never wedges a key.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use backon::{BackoffBuilder, ExponentialBuilder, Retryable};
use bookmarks_core::clock::Clock;
use bookmarks_core::error::DomainError;
use bookmarks_core::scheduler::{ScheduledTask, Scheduler};
use bookmarks_core::state_store::SagaStateStore;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::domain::activity::Activity;
use crate::domain::pending::{FeedContribution, PendingActivity};
use crate::domain::repository::FeedRepository;

const PENDING_KEY_PREFIX: &str = "feed-saga:pending";
const LOCK_KEY_PREFIX: &str = "feed-saga:lock";

/// State-store key holding the pending activity for `key`.
#[must_use]
pub fn pending_key(key: &str) -> String {
    format!("{PENDING_KEY_PREFIX}:{key}")
}

/// State-store key holding the lock for `key`.
#[must_use]
pub fn lock_key(key: &str) -> String {
    format!("{LOCK_KEY_PREFIX}:{key}")
}

/// Invalid saga configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SagaConfigError {
    /// The window has zero length.
    #[error("aggregation window must be longer than zero")]
    EmptyWindow,

    /// The lock could expire while a flush still holds it.
    #[error(
        "lock TTL ({lock_ttl_ms}ms) must exceed the window plus the longest flush ({required_ms}ms)"
    )]
    LockTtlTooShort {
        /// Configured lock TTL.
        lock_ttl_ms: u64,
        /// Window plus the worst-case flush duration.
        required_ms: u64,
    },

    /// A flush must try the write at least once.
    #[error("flush attempts must be at least 1")]
    NoFlushAttempts,
}

/// Saga timing and retry settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SagaConfig {
    /// Length of an aggregation window.
    pub window_ms: u64,
    /// Extra lifetime of pending state beyond the window.
    pub state_margin_ms: u64,
    /// Lifetime of a lock.
    pub lock_ttl_ms: u64,
    /// Extra lock attempts after the first; 0 tries once.
    pub lock_retries: usize,
    /// Delay before the first extra lock attempt.
    pub lock_retry_delay_ms: u64,
    /// Activity writes attempted per flush.
    pub flush_attempts: usize,
    /// Delay before the first repeated activity write.
    pub flush_retry_base_ms: u64,
    /// Time allowed for one activity write before it counts as failed.
    pub flush_write_timeout_ms: u64,
}

impl Default for SagaConfig {
    fn default() -> Self {
        Self {
            window_ms: 3_000,
            state_margin_ms: 5_000,
            lock_ttl_ms: 10_000,
            lock_retries: 2,
            lock_retry_delay_ms: 50,
            flush_attempts: 3,
            flush_retry_base_ms: 200,
            flush_write_timeout_ms: 2_000,
        }
    }
}

impl SagaConfig {
    /// Checks the settings for consistency.
    ///
    /// # Errors
    ///
    /// Returns the first inconsistency found.
    pub fn validate(&self) -> Result<(), SagaConfigError> {
        if self.window_ms == 0 {
            return Err(SagaConfigError::EmptyWindow);
        }
        if self.flush_attempts == 0 {
            return Err(SagaConfigError::NoFlushAttempts);
        }
        let flush_ms = u64::try_from(self.longest_flush().as_millis()).unwrap_or(u64::MAX);
        let required_ms = self.window_ms.saturating_add(flush_ms);
        if self.lock_ttl_ms <= required_ms {
            return Err(SagaConfigError::LockTtlTooShort {
                lock_ttl_ms: self.lock_ttl_ms,
                required_ms,
            });
        }
        Ok(())
    }

    /// Length of an aggregation window.
    #[must_use]
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }

    /// Lifetime of pending state: window plus margin.
    #[must_use]
    pub fn state_ttl(&self) -> Duration {
        Duration::from_millis(self.window_ms.saturating_add(self.state_margin_ms))
    }

    /// Lifetime of a lock.
    #[must_use]
    pub fn lock_ttl(&self) -> Duration {
        Duration::from_millis(self.lock_ttl_ms)
    }

    /// Time allowed for one activity write.
    #[must_use]
    pub fn flush_write_timeout(&self) -> Duration {
        Duration::from_millis(self.flush_write_timeout_ms)
    }

    /// Upper bound on a flush: every write timing out, plus the delays
    /// between them.
    #[must_use]
    pub fn longest_flush(&self) -> Duration {
        let writes = u32::try_from(self.flush_attempts).unwrap_or(u32::MAX);
        let delays: Duration = self.flush_backoff().build().sum();
        delays.saturating_add(self.flush_write_timeout().saturating_mul(writes))
    }

    fn lock_backoff(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(Duration::from_millis(self.lock_retry_delay_ms))
            .with_max_times(self.lock_retries)
            .with_jitter()
    }

    fn flush_backoff(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(Duration::from_millis(self.flush_retry_base_ms))
            .with_max_times(self.flush_attempts.saturating_sub(1))
    }
}

/// Pending state as read, with the exact stored text.
struct Stored {
    raw: String,
    pending: PendingActivity,
}

enum LockAttemptError {
    Busy,
    Store(DomainError),
}

#[derive(Default)]
struct PendingFlushes {
    next_generation: u64,
    tasks: HashMap<String, (u64, ScheduledTask)>,
}

/// Aggregates `CardAddedToLibrary` and `CardAddedToCollection` events into
/// `CardCollected` feed activities.
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct CardCollectionSaga {
    state: Arc<dyn SagaStateStore>,
    feed: Arc<dyn FeedRepository>,
    scheduler: Arc<dyn Scheduler>,
    clock: Arc<dyn Clock>,
    config: SagaConfig,
    flushes: Arc<Mutex<PendingFlushes>>,
}

impl CardCollectionSaga {
    /// Creates a saga.
    ///
    /// # Errors
    ///
    /// Returns `SagaConfigError` if `config` is inconsistent.
    pub fn new(
        state: Arc<dyn SagaStateStore>,
        feed: Arc<dyn FeedRepository>,
        scheduler: Arc<dyn Scheduler>,
        clock: Arc<dyn Clock>,
        config: SagaConfig,
    ) -> Result<Self, SagaConfigError> {
        config.validate()?;
        Ok(Self {
            state,
            feed,
            scheduler,
            clock,
            config,
            flushes: Arc::new(Mutex::new(PendingFlushes::default())),
        })
    }

    /// The active configuration.
    #[must_use]
    pub fn config(&self) -> &SagaConfig {
        &self.config
    }

    /// Folds one contribution into its key's window, opening a window and
    /// scheduling its flush if none is open.
    ///
    /// If another holder keeps the key's lock through every attempt the
    /// contribution is dropped.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Infrastructure` if the state store fails.
    #[instrument(skip_all, fields(key = %contribution.aggregation_key()))]
    pub async fn handle(&self, contribution: &FeedContribution) -> Result<(), DomainError> {
        let key = contribution.aggregation_key();
        let Some(token) = self.acquire_lock(&key).await? else {
            debug!("lock held elsewhere, dropping contribution");
            return Ok(());
        };

        let result = self.merge_or_open(&key, contribution).await;
        self.release_lock(&key, &token).await;
        result
    }

    /// Closes the window for `key`, writing its activity.
    ///
    /// Runs from the scheduler when a window ends. If the lock is busy the
    /// flush is abandoned and the state is left to its TTL. Once the lock is
    /// held, the state that was flushed and the lock are removed whether or
    /// not the activity write succeeded. State rewritten by another holder
    /// during the flush is left in place.
    #[instrument(skip(self))]
    pub async fn flush(&self, key: &str) {
        match self.acquire_lock(key).await {
            Ok(Some(token)) => {
                self.flush_locked(key).await;
                self.release_lock(key, &token).await;
            }
            Ok(None) => debug!("lock held elsewhere, abandoning flush"),
            Err(err) => error!(error = %err, "failed to take lock for flush"),
        }
    }

    /// Cancels every flush scheduled by this process and returns how many
    /// were cancelled. Pending state left behind expires with its TTL.
    pub fn cancel_pending_flushes(&self) -> usize {
        let mut flushes = self.flushes.lock().unwrap_or_else(PoisonError::into_inner);
        let cancelled = flushes.tasks.len();
        for (_, (_, task)) in flushes.tasks.drain() {
            task.cancel();
        }
        if cancelled > 0 {
            info!(cancelled, "cancelled pending feed flushes");
        }
        cancelled
    }

    /// Number of flushes scheduled by this process and not yet run.
    #[must_use]
    pub fn pending_flush_count(&self) -> usize {
        self.flushes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .tasks
            .len()
    }

    async fn merge_or_open(
        &self,
        key: &str,
        contribution: &FeedContribution,
    ) -> Result<(), DomainError> {
        let now = self.clock.now();
        let window = self.config.window();

        match self.load_pending(key).await?.map(|stored| stored.pending) {
            Some(mut pending) if pending.is_open_at(now, window) => {
                pending.merge(contribution);
                self.store_pending(key, &pending).await?;
                debug!(collections = pending.collection_ids.len(), "merged into open window");
            }
            stale => {
                if stale.is_some() {
                    debug!("replacing expired window");
                }
                let pending = PendingActivity::open(contribution, now);
                self.store_pending(key, &pending).await?;
                self.schedule_flush(key);
                debug!(window_ms = self.config.window_ms, "opened aggregation window");
            }
        }
        Ok(())
    }

    async fn flush_locked(&self, key: &str) {
        let Stored { raw, pending } = match self.load_pending(key).await {
            Ok(Some(stored)) => stored,
            Ok(None) => {
                debug!("no pending activity to flush");
                return;
            }
            Err(err) => {
                error!(error = %err, "failed to read pending activity");
                return;
            }
        };

        let activity = Activity::card_collected(&pending, self.clock.now());
        let write = || async {
            tokio::time::timeout(
                self.config.flush_write_timeout(),
                self.feed.add_activity(&activity),
            )
            .await
            .map_err(|_| DomainError::Infrastructure("activity write timed out".into()))?
        };
        let written = write
            .retry(self.config.flush_backoff())
            .when(DomainError::is_transient)
            .notify(|err: &DomainError, delay: Duration| {
                warn!(error = %err, ?delay, "activity write failed, retrying");
            })
            .await;

        match written {
            Ok(()) => info!(
                activity_id = %activity.id,
                actor_id = %activity.actor_id,
                card_id = %activity.metadata.card_id,
                "feed activity recorded"
            ),
            Err(err) => error!(
                error = %err,
                pending = ?pending,
                "dropping feed activity after failed writes"
            ),
        }

        match self.state.delete_if_equals(&pending_key(key), &raw).await {
            Ok(true) => {}
            Ok(false) => warn!("pending activity replaced during flush, keeping the newer window"),
            Err(err) => {
                warn!(error = %err, "failed to delete pending activity, leaving it to expire");
            }
        }
    }

    async fn load_pending(&self, key: &str) -> Result<Option<Stored>, DomainError> {
        let Some(raw) = self.state.get(&pending_key(key)).await? else {
            return Ok(None);
        };
        match serde_json::from_str(&raw) {
            Ok(pending) => Ok(Some(Stored { raw, pending })),
            Err(err) => {
                warn!(error = %err, "discarding unreadable pending activity");
                Ok(None)
            }
        }
    }

    async fn store_pending(&self, key: &str, pending: &PendingActivity) -> Result<(), DomainError> {
        let raw = serde_json::to_string(pending)
            .map_err(|e| DomainError::Infrastructure(format!("failed to encode saga state: {e}")))?;
        self.state
            .set_with_ttl(&pending_key(key), self.config.state_ttl(), &raw)
            .await
    }

    fn schedule_flush(&self, key: &str) {
        let mut flushes = self.flushes.lock().unwrap_or_else(PoisonError::into_inner);
        let generation = flushes.next_generation;
        flushes.next_generation += 1;

        let saga = self.clone();
        let flush_key = key.to_owned();
        let task = self.scheduler.schedule(
            self.config.window(),
            Box::pin(async move {
                saga.forget_flush(&flush_key, generation);
                saga.flush(&flush_key).await;
            }),
        );

        if let Some((_, previous)) = flushes.tasks.insert(key.to_owned(), (generation, task)) {
            previous.cancel();
        }
    }

    fn forget_flush(&self, key: &str, generation: u64) {
        let mut flushes = self.flushes.lock().unwrap_or_else(PoisonError::into_inner);
        if flushes
            .tasks
            .get(key)
            .is_some_and(|(scheduled, _)| *scheduled == generation)
        {
            flushes.tasks.remove(key);
        }
    }

    async fn acquire_lock(&self, key: &str) -> Result<Option<String>, DomainError> {
        let lock_key = lock_key(key);
        let token = Uuid::new_v4().to_string();
        let ttl = self.config.lock_ttl();

        let attempt = || async {
            match self.state.set_if_absent_with_ttl(&lock_key, &token, ttl).await {
                Ok(true) => Ok(()),
                Ok(false) => Err(LockAttemptError::Busy),
                Err(err) => Err(LockAttemptError::Store(err)),
            }
        };

        match attempt
            .retry(self.config.lock_backoff())
            .when(|err| matches!(err, LockAttemptError::Busy))
            .await
        {
            Ok(()) => Ok(Some(token)),
            Err(LockAttemptError::Busy) => Ok(None),
            Err(LockAttemptError::Store(err)) => Err(err),
        }
    }

    async fn release_lock(&self, key: &str, token: &str) {
        match self.state.delete_if_equals(&lock_key(key), token).await {
            Ok(true) => {}
            Ok(false) => warn!("lock expired before release"),
            Err(err) => warn!(error = %err, "failed to release lock, leaving it to expire"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use bookmarks_state_store::in_memory::InMemoryStateStore;
    use bookmarks_test_support::{ManualClock, ManualScheduler};
    use chrono::{DateTime, TimeZone, Utc};

    use crate::domain::pending::ContributionSource;
    use crate::infrastructure::in_memory::InMemoryFeedRepository;

    const ALICE: &str = "did:plc:alice";

    struct Harness {
        clock: ManualClock,
        scheduler: Arc<ManualScheduler>,
        state: Arc<InMemoryStateStore>,
        saga: CardCollectionSaga,
    }

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 15, 10, 0, 0).unwrap()
    }

    fn config() -> SagaConfig {
        SagaConfig {
            lock_retries: 0,
            ..SagaConfig::default()
        }
    }

    /// Wires a saga over an in-memory state store, optionally seen through
    /// `wrap`, and the given feed repository.
    fn build(
        feed: Arc<dyn FeedRepository>,
        config: SagaConfig,
        wrap: impl FnOnce(Arc<InMemoryStateStore>) -> Arc<dyn SagaStateStore>,
    ) -> Harness {
        let clock = ManualClock::new(start());
        let scheduler = Arc::new(ManualScheduler::new(clock.clone()));
        let state = Arc::new(InMemoryStateStore::new(Arc::new(clock.clone())));
        let saga = CardCollectionSaga::new(
            wrap(Arc::clone(&state)),
            feed,
            Arc::clone(&scheduler) as Arc<dyn Scheduler>,
            Arc::new(clock.clone()),
            config,
        )
        .unwrap();
        Harness {
            clock,
            scheduler,
            state,
            saga,
        }
    }

    fn harness() -> (Harness, Arc<InMemoryFeedRepository>) {
        let feed = Arc::new(InMemoryFeedRepository::new());
        let h = build(Arc::clone(&feed) as Arc<dyn FeedRepository>, config(), |s| s);
        (h, feed)
    }

    fn library_save(card_id: Uuid) -> FeedContribution {
        FeedContribution {
            card_id,
            actor_id: ALICE.to_owned(),
            source: ContributionSource::LibrarySave,
        }
    }

    fn collection_add(card_id: Uuid, collection_id: Uuid) -> FeedContribution {
        FeedContribution {
            card_id,
            actor_id: ALICE.to_owned(),
            source: ContributionSource::CollectionAdd { collection_id },
        }
    }

    #[derive(Default)]
    struct FailingFeedRepository {
        attempts: AtomicUsize,
    }

    #[async_trait]
    impl FeedRepository for FailingFeedRepository {
        async fn add_activity(&self, _activity: &Activity) -> Result<(), DomainError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            Err(DomainError::Infrastructure("feed store down".into()))
        }

        async fn activities_for_actor(
            &self,
            _actor_id: &str,
            _limit: usize,
        ) -> Result<Vec<Activity>, DomainError> {
            Ok(Vec::new())
        }
    }

    /// Never finishes a write.
    #[derive(Default)]
    struct HangingFeedRepository {
        attempts: AtomicUsize,
    }

    #[async_trait]
    impl FeedRepository for HangingFeedRepository {
        async fn add_activity(&self, _activity: &Activity) -> Result<(), DomainError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            std::future::pending().await
        }

        async fn activities_for_actor(
            &self,
            _actor_id: &str,
            _limit: usize,
        ) -> Result<Vec<Activity>, DomainError> {
            Ok(Vec::new())
        }
    }

    /// Stands in for a second holder that opens a new window for `key`
    /// while an activity write is in flight.
    struct OverwritingFeedRepository {
        state: std::sync::OnceLock<Arc<InMemoryStateStore>>,
        key: String,
        newer: String,
    }

    #[async_trait]
    impl FeedRepository for OverwritingFeedRepository {
        async fn add_activity(&self, _activity: &Activity) -> Result<(), DomainError> {
            if let Some(state) = self.state.get() {
                state
                    .set_with_ttl(&pending_key(&self.key), Duration::from_secs(8), &self.newer)
                    .await?;
            }
            Ok(())
        }

        async fn activities_for_actor(
            &self,
            _actor_id: &str,
            _limit: usize,
        ) -> Result<Vec<Activity>, DomainError> {
            Ok(Vec::new())
        }
    }

    /// Reports every lock as taken for the first `busy_for` attempts.
    struct ContendedStateStore {
        inner: Arc<InMemoryStateStore>,
        busy_for: usize,
        lock_attempts: AtomicUsize,
    }

    #[async_trait]
    impl SagaStateStore for ContendedStateStore {
        async fn get(&self, key: &str) -> Result<Option<String>, DomainError> {
            self.inner.get(key).await
        }

        async fn set_with_ttl(
            &self,
            key: &str,
            ttl: Duration,
            value: &str,
        ) -> Result<(), DomainError> {
            self.inner.set_with_ttl(key, ttl, value).await
        }

        async fn delete(&self, key: &str) -> Result<(), DomainError> {
            self.inner.delete(key).await
        }

        async fn set_if_absent_with_ttl(
            &self,
            key: &str,
            value: &str,
            ttl: Duration,
        ) -> Result<bool, DomainError> {
            if self.lock_attempts.fetch_add(1, Ordering::SeqCst) < self.busy_for {
                return Ok(false);
            }
            self.inner.set_if_absent_with_ttl(key, value, ttl).await
        }

        async fn delete_if_equals(&self, key: &str, expected: &str) -> Result<bool, DomainError> {
            self.inner.delete_if_equals(key, expected).await
        }
    }

    fn read_pending(raw: &str) -> PendingActivity {
        serde_json::from_str(raw).unwrap()
    }

    #[tokio::test]
    async fn test_first_event_opens_window_and_schedules_one_flush() {
        // Arrange
        let (h, _feed) = harness();
        let contribution = library_save(Uuid::new_v4());
        let key = contribution.aggregation_key();

        // Act
        h.saga.handle(&contribution).await.unwrap();

        // Assert
        let raw = h.state.get(&pending_key(&key)).await.unwrap().unwrap();
        let pending = read_pending(&raw);
        assert_eq!(pending.window_start, start());
        assert!(pending.has_library_event);
        assert_eq!(h.scheduler.pending(), 1);
        assert_eq!(h.saga.pending_flush_count(), 1);
        assert_eq!(h.state.get(&lock_key(&key)).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_library_then_collection_event_yields_one_activity() {
        // Arrange
        let (h, feed) = harness();
        let card_id = Uuid::new_v4();
        let collection_id = Uuid::new_v4();

        // Act
        h.saga.handle(&library_save(card_id)).await.unwrap();
        h.scheduler.advance(Duration::from_millis(500)).await;
        h.saga
            .handle(&collection_add(card_id, collection_id))
            .await
            .unwrap();
        h.scheduler.advance(Duration::from_millis(2_500)).await;

        // Assert
        let activities = feed.all().unwrap();
        assert_eq!(activities.len(), 1);
        assert_eq!(activities[0].actor_id, ALICE);
        assert_eq!(activities[0].metadata.card_id, card_id);
        assert_eq!(activities[0].metadata.collection_ids, Some(vec![collection_id]));
        assert_eq!(activities[0].created_at, start() + chrono::TimeDelta::seconds(3));
        assert_eq!(h.scheduler.pending(), 0);
    }

    #[tokio::test]
    async fn test_second_event_in_window_does_not_schedule_another_flush() {
        let (h, _feed) = harness();
        let card_id = Uuid::new_v4();

        h.saga.handle(&library_save(card_id)).await.unwrap();
        h.saga
            .handle(&collection_add(card_id, Uuid::new_v4()))
            .await
            .unwrap();

        assert_eq!(h.scheduler.pending(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_delivery_merges_idempotently() {
        let (h, feed) = harness();
        let card_id = Uuid::new_v4();
        let collection_id = Uuid::new_v4();
        let add = collection_add(card_id, collection_id);

        h.saga.handle(&add).await.unwrap();
        h.saga.handle(&add).await.unwrap();
        h.scheduler.advance(Duration::from_secs(3)).await;

        let activities = feed.all().unwrap();
        assert_eq!(activities.len(), 1);
        assert_eq!(activities[0].metadata.collection_ids, Some(vec![collection_id]));
    }

    #[tokio::test]
    async fn test_event_just_inside_window_merges() {
        // Arrange
        let (h, feed) = harness();
        let card_id = Uuid::new_v4();
        h.saga.handle(&library_save(card_id)).await.unwrap();

        // Act
        h.scheduler.advance(Duration::from_millis(2_999)).await;
        h.saga
            .handle(&collection_add(card_id, Uuid::new_v4()))
            .await
            .unwrap();
        h.scheduler.advance(Duration::from_secs(10)).await;

        // Assert
        assert_eq!(feed.all().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_event_just_after_window_starts_a_new_activity() {
        // Arrange
        let (h, feed) = harness();
        let card_id = Uuid::new_v4();
        h.saga.handle(&library_save(card_id)).await.unwrap();

        // Act
        h.scheduler.advance(Duration::from_millis(3_001)).await;
        h.saga
            .handle(&collection_add(card_id, Uuid::new_v4()))
            .await
            .unwrap();
        h.scheduler.advance(Duration::from_secs(10)).await;

        // Assert
        let activities = feed.all().unwrap();
        assert_eq!(activities.len(), 2);
        assert_eq!(activities[0].metadata.collection_ids, None);
        assert_eq!(activities[1].metadata.collection_ids.as_ref().map(Vec::len), Some(1));
    }

    #[tokio::test]
    async fn test_different_actors_aggregate_separately() {
        let (h, feed) = harness();
        let card_id = Uuid::new_v4();
        let mut bob = library_save(card_id);
        bob.actor_id = "did:plc:bob".to_owned();

        h.saga.handle(&library_save(card_id)).await.unwrap();
        h.saga.handle(&bob).await.unwrap();
        h.scheduler.advance(Duration::from_secs(3)).await;

        assert_eq!(feed.all().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_flush_removes_state_and_lock() {
        // Arrange
        let (h, _feed) = harness();
        let contribution = library_save(Uuid::new_v4());
        let key = contribution.aggregation_key();
        h.saga.handle(&contribution).await.unwrap();

        // Act
        h.scheduler.advance(Duration::from_secs(3)).await;

        // Assert
        assert_eq!(h.state.get(&pending_key(&key)).await.unwrap(), None);
        assert_eq!(h.state.get(&lock_key(&key)).await.unwrap(), None);
        assert_eq!(h.saga.pending_flush_count(), 0);
    }

    #[tokio::test]
    async fn test_flush_without_pending_state_writes_nothing() {
        let (h, feed) = harness();

        h.saga.flush("missing|did:plc:alice").await;

        assert!(feed.all().unwrap().is_empty());
        assert_eq!(h.state.get(&lock_key("missing|did:plc:alice")).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_contribution_is_dropped_while_lock_is_held_elsewhere() {
        // Arrange
        let (h, _feed) = harness();
        let contribution = library_save(Uuid::new_v4());
        let key = contribution.aggregation_key();
        h.state
            .set_if_absent_with_ttl(&lock_key(&key), "other-replica", Duration::from_secs(10))
            .await
            .unwrap();

        // Act
        h.saga.handle(&contribution).await.unwrap();

        // Assert
        assert_eq!(h.state.get(&pending_key(&key)).await.unwrap(), None);
        assert_eq!(h.scheduler.pending(), 0);
        assert_eq!(
            h.state.get(&lock_key(&key)).await.unwrap().as_deref(),
            Some("other-replica")
        );
    }

    #[tokio::test]
    async fn test_flush_is_abandoned_while_lock_is_held_elsewhere() {
        let (h, feed) = harness();
        let contribution = library_save(Uuid::new_v4());
        let key = contribution.aggregation_key();
        h.saga.handle(&contribution).await.unwrap();
        h.state
            .set_if_absent_with_ttl(&lock_key(&key), "other-replica", Duration::from_secs(30))
            .await
            .unwrap();

        h.scheduler.advance(Duration::from_secs(3)).await;

        assert!(feed.all().unwrap().is_empty());
        assert!(h.state.get(&pending_key(&key)).await.unwrap().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_busy_lock_is_retried_before_giving_up() {
        // Arrange
        let feed = Arc::new(InMemoryFeedRepository::new());
        let contended = Arc::new(std::sync::OnceLock::new());
        let handle = Arc::clone(&contended);
        let h = build(
            feed,
            SagaConfig {
                lock_retries: 3,
                ..SagaConfig::default()
            },
            move |inner| {
                let store = Arc::new(ContendedStateStore {
                    inner,
                    busy_for: 2,
                    lock_attempts: AtomicUsize::new(0),
                });
                let _ = handle.set(Arc::clone(&store));
                store as Arc<dyn SagaStateStore>
            },
        );
        let contribution = library_save(Uuid::new_v4());

        // Act
        h.saga.handle(&contribution).await.unwrap();

        // Assert
        let store = contended.get().unwrap();
        assert_eq!(store.lock_attempts.load(Ordering::SeqCst), 3);
        let key = contribution.aggregation_key();
        assert!(h.state.get(&pending_key(&key)).await.unwrap().is_some());
        assert_eq!(h.scheduler.pending(), 1);
    }

    #[tokio::test]
    async fn test_expired_window_is_replaced_and_rescheduled() {
        // Arrange
        let (h, _feed) = harness();
        let card_id = Uuid::new_v4();
        let key = library_save(card_id).aggregation_key();
        let stale = PendingActivity::open(&library_save(card_id), start());
        h.state
            .set_with_ttl(
                &pending_key(&key),
                Duration::from_secs(8),
                &serde_json::to_string(&stale).unwrap(),
            )
            .await
            .unwrap();
        h.clock.advance(Duration::from_secs(4));

        // Act
        h.saga
            .handle(&collection_add(card_id, Uuid::new_v4()))
            .await
            .unwrap();

        // Assert
        let raw = h.state.get(&pending_key(&key)).await.unwrap().unwrap();
        let pending = read_pending(&raw);
        assert_eq!(pending.window_start, start() + chrono::TimeDelta::seconds(4));
        assert!(!pending.has_library_event);
        assert_eq!(h.scheduler.pending(), 1);
    }

    #[tokio::test]
    async fn test_unreadable_state_is_replaced_by_a_new_window() {
        let (h, _feed) = harness();
        let contribution = library_save(Uuid::new_v4());
        let key = contribution.aggregation_key();
        h.state
            .set_with_ttl(&pending_key(&key), Duration::from_secs(8), "not json")
            .await
            .unwrap();

        h.saga.handle(&contribution).await.unwrap();

        let raw = h.state.get(&pending_key(&key)).await.unwrap().unwrap();
        assert!(read_pending(&raw).has_library_event);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_activity_write_is_retried_then_dropped_with_cleanup() {
        // Arrange
        let failing = Arc::new(FailingFeedRepository::default());
        let h = build(Arc::clone(&failing) as Arc<dyn FeedRepository>, config(), |s| s);
        let contribution = library_save(Uuid::new_v4());
        let key = contribution.aggregation_key();
        h.saga.handle(&contribution).await.unwrap();

        // Act
        h.scheduler.advance(Duration::from_secs(3)).await;

        // Assert
        assert_eq!(failing.attempts.load(Ordering::SeqCst), 3);
        assert_eq!(h.state.get(&pending_key(&key)).await.unwrap(), None);
        assert_eq!(h.state.get(&lock_key(&key)).await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_activity_write_times_out_and_is_retried() {
        // Arrange
        let hanging = Arc::new(HangingFeedRepository::default());
        let h = build(Arc::clone(&hanging) as Arc<dyn FeedRepository>, config(), |s| s);
        let contribution = library_save(Uuid::new_v4());
        let key = contribution.aggregation_key();
        h.saga.handle(&contribution).await.unwrap();

        // Act
        h.scheduler.advance(Duration::from_secs(3)).await;

        // Assert
        assert_eq!(hanging.attempts.load(Ordering::SeqCst), 3);
        assert_eq!(h.state.get(&pending_key(&key)).await.unwrap(), None);
        assert_eq!(h.state.get(&lock_key(&key)).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_flush_keeps_window_opened_by_another_holder_during_write() {
        // Arrange
        let card_id = Uuid::new_v4();
        let contribution = library_save(card_id);
        let key = contribution.aggregation_key();
        let newer = PendingActivity::open(
            &collection_add(card_id, Uuid::new_v4()),
            start() + chrono::TimeDelta::seconds(3),
        );
        let newer = serde_json::to_string(&newer).unwrap();
        let feed = Arc::new(OverwritingFeedRepository {
            state: std::sync::OnceLock::new(),
            key: key.clone(),
            newer: newer.clone(),
        });
        let racing = Arc::clone(&feed);
        let h = build(feed as Arc<dyn FeedRepository>, config(), move |inner| {
            let _ = racing.state.set(Arc::clone(&inner));
            inner as Arc<dyn SagaStateStore>
        });
        h.saga.handle(&contribution).await.unwrap();

        // Act
        h.scheduler.advance(Duration::from_secs(3)).await;

        // Assert
        let kept = h.state.get(&pending_key(&key)).await.unwrap();
        assert_eq!(kept.as_deref(), Some(newer.as_str()));
        assert_eq!(h.state.get(&lock_key(&key)).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_cancel_pending_flushes_stops_scheduled_flushes() {
        let (h, feed) = harness();
        h.saga.handle(&library_save(Uuid::new_v4())).await.unwrap();
        h.saga.handle(&library_save(Uuid::new_v4())).await.unwrap();

        let cancelled = h.saga.cancel_pending_flushes();
        h.scheduler.advance(Duration::from_secs(5)).await;

        assert_eq!(cancelled, 2);
        assert_eq!(h.scheduler.pending(), 0);
        assert!(feed.all().unwrap().is_empty());
    }

    #[test]
    fn test_config_rejects_lock_ttl_not_longer_than_window_plus_flush() {
        let config = SagaConfig {
            lock_ttl_ms: 9_600,
            ..SagaConfig::default()
        };

        assert_eq!(
            config.validate(),
            Err(SagaConfigError::LockTtlTooShort {
                lock_ttl_ms: 9_600,
                required_ms: 9_600,
            })
        );
    }

    #[test]
    fn test_config_rejects_flush_retries_that_outlast_the_lock() {
        // Arrange
        let config = SagaConfig {
            flush_attempts: 6,
            flush_retry_base_ms: 2_000,
            ..SagaConfig::default()
        };

        // Act
        let result = config.validate();

        // Assert
        assert_eq!(config.longest_flush(), Duration::from_secs(62 + 12));
        assert_eq!(
            result,
            Err(SagaConfigError::LockTtlTooShort {
                lock_ttl_ms: 10_000,
                required_ms: 77_000,
            })
        );
    }

    #[test]
    fn test_config_rejects_empty_window_and_zero_flush_attempts() {
        let empty = SagaConfig {
            window_ms: 0,
            ..SagaConfig::default()
        };
        let no_flush = SagaConfig {
            flush_attempts: 0,
            ..SagaConfig::default()
        };

        assert_eq!(empty.validate(), Err(SagaConfigError::EmptyWindow));
        assert_eq!(no_flush.validate(), Err(SagaConfigError::NoFlushAttempts));
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = SagaConfig::default();

        assert_eq!(config.validate(), Ok(()));
        assert_eq!(config.window(), Duration::from_secs(3));
        assert_eq!(config.state_ttl(), Duration::from_secs(8));
        assert_eq!(config.lock_ttl(), Duration::from_secs(10));
        assert_eq!(config.longest_flush(), Duration::from_millis(600 + 6_000));
    }

    #[test]
    fn test_config_deserializes_with_defaults_for_missing_fields() {
        let config: SagaConfig = serde_json::from_str(r#"{"window_ms": 1500}"#).unwrap();

        assert_eq!(config.window_ms, 1_500);
        assert_eq!(config.lock_ttl_ms, 10_000);
    }
}
