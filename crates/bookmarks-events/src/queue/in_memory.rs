//! Process-local queues for tests and single-process runs.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::debug;
use uuid::Uuid;

use super::{
    Broker, DeliveryPolicy, FailureOutcome, JobQueue, JobRecord, QueueError, QueueJob,
    ReceivedJob,
};

#[derive(Default)]
struct State {
    waiting: VecDeque<QueueJob>,
    delayed: Vec<(Instant, QueueJob)>,
    active: HashMap<Uuid, QueueJob>,
    completed: VecDeque<JobRecord>,
    failed: VecDeque<JobRecord>,
}

impl State {
    fn promote_due(&mut self, now: Instant) {
        let (due, pending): (Vec<_>, Vec<_>) = std::mem::take(&mut self.delayed)
            .into_iter()
            .partition(|(ready_at, _)| *ready_at <= now);
        self.delayed = pending;
        self.waiting.extend(due.into_iter().map(|(_, job)| job));
    }
}

fn record(history: &mut VecDeque<JobRecord>, entry: JobRecord, keep: usize) {
    history.push_front(entry);
    history.truncate(keep);
}

/// In-memory queue with the same delivery semantics as the Redis queue.
///
/// Retry delays run on `tokio::time`, so paused-clock tests see retries
/// become ready as virtual time advances.
pub struct InMemoryJobQueue {
    name: String,
    policy: DeliveryPolicy,
    state: Mutex<State>,
}

impl InMemoryJobQueue {
    /// Creates an empty queue.
    #[must_use]
    pub fn new(name: &str, policy: DeliveryPolicy) -> Self {
        Self {
            name: name.to_owned(),
            policy,
            state: Mutex::new(State::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Jobs ready for delivery, oldest first.
    #[must_use]
    pub fn waiting(&self) -> Vec<QueueJob> {
        self.state().waiting.iter().cloned().collect()
    }

    /// Number of jobs waiting out a retry delay.
    #[must_use]
    pub fn delayed_count(&self) -> usize {
        self.state().delayed.len()
    }

    /// Number of jobs delivered and not yet settled.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.state().active.len()
    }

    /// Completed history, newest first.
    #[must_use]
    pub fn completed(&self) -> Vec<JobRecord> {
        self.state().completed.iter().cloned().collect()
    }

    /// Failed history, newest first.
    #[must_use]
    pub fn failed(&self) -> Vec<JobRecord> {
        self.state().failed.iter().cloned().collect()
    }

    /// Returns `true` once nothing is waiting, delayed or active.
    #[must_use]
    pub fn is_drained(&self) -> bool {
        let state = self.state();
        state.waiting.is_empty() && state.delayed.is_empty() && state.active.is_empty()
    }

    fn take_active(state: &mut State, received: &ReceivedJob) -> QueueJob {
        state
            .active
            .remove(&received.job.id)
            .unwrap_or_else(|| received.job.clone())
    }
}

#[async_trait]
impl JobQueue for InMemoryJobQueue {
    fn name(&self) -> &str {
        &self.name
    }

    fn policy(&self) -> DeliveryPolicy {
        self.policy
    }

    async fn enqueue(&self, job: QueueJob) -> Result<(), QueueError> {
        self.state().waiting.push_back(job);
        Ok(())
    }

    async fn dequeue(&self) -> Result<Option<ReceivedJob>, QueueError> {
        let mut state = self.state();
        state.promote_due(Instant::now());
        let Some(job) = state.waiting.pop_front() else {
            return Ok(None);
        };
        state.active.insert(job.id, job.clone());
        let receipt = job.id.to_string();
        Ok(Some(ReceivedJob::new(job, receipt)))
    }

    async fn complete(&self, received: ReceivedJob) -> Result<(), QueueError> {
        let mut state = self.state();
        let job = Self::take_active(&mut state, &received);
        record(
            &mut state.completed,
            JobRecord::completed(job),
            self.policy.keep_completed,
        );
        Ok(())
    }

    async fn fail(
        &self,
        received: ReceivedJob,
        reason: &str,
    ) -> Result<FailureOutcome, QueueError> {
        let mut state = self.state();
        let mut job = Self::take_active(&mut state, &received);
        job.attempts_made += 1;

        match self.policy.retry_delay(job.attempts_made) {
            Some(delay) => {
                debug!(queue = %self.name, job_id = %job.id, ?delay, "job scheduled for retry");
                state.delayed.push((Instant::now() + delay, job));
                Ok(FailureOutcome::Retrying { delay })
            }
            None => {
                record(
                    &mut state.failed,
                    JobRecord::failed(job, reason),
                    self.policy.keep_failed,
                );
                Ok(FailureOutcome::Exhausted)
            }
        }
    }

    async fn discard(&self, received: ReceivedJob, reason: &str) -> Result<(), QueueError> {
        let mut state = self.state();
        let job = Self::take_active(&mut state, &received);
        record(
            &mut state.failed,
            JobRecord::failed(job, reason),
            self.policy.keep_failed,
        );
        Ok(())
    }
}

/// Hands out one shared [`InMemoryJobQueue`] per queue name.
///
/// The policy passed when a name is first requested sticks for the life of
/// the broker.
#[derive(Default)]
pub struct InMemoryBroker {
    queues: Mutex<HashMap<String, Arc<InMemoryJobQueue>>>,
}

impl InMemoryBroker {
    /// Creates a broker with no queues.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the typed queue called `name`, creating it if needed.
    #[must_use]
    pub fn in_memory_queue(&self, name: &str, policy: DeliveryPolicy) -> Arc<InMemoryJobQueue> {
        let mut queues = self.queues.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(
            queues
                .entry(name.to_owned())
                .or_insert_with(|| Arc::new(InMemoryJobQueue::new(name, policy))),
        )
    }

    /// Returns the queue called `name` if anything has created it.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<InMemoryJobQueue>> {
        self.queues
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }
}

impl Broker for InMemoryBroker {
    fn queue(&self, name: &str, policy: DeliveryPolicy) -> Arc<dyn JobQueue> {
        self.in_memory_queue(name, policy)
    }
}
