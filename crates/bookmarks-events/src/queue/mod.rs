//! Durable job queues that carry serialized events between processes.
//!
//! A queue hands out one job at a time, keeps it active until the consumer
//! settles it, and applies the queue's [`DeliveryPolicy`] when the consumer
//! reports a failure: the job is redelivered after an exponential backoff
//! until its attempts are spent, then moved to the failed history.

mod in_memory;
mod redis_queue;

pub use in_memory::{InMemoryBroker, InMemoryJobQueue};
pub use redis_queue::{RedisBroker, RedisJobQueue};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bookmarks_core::error::DomainError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Errors raised by queue backends.
#[derive(Debug, Error)]
pub enum QueueError {
    /// The backend could not be reached or rejected the command.
    #[error("queue backend error: {0}")]
    Backend(String),

    /// A stored job could not be encoded or decoded.
    #[error("malformed job: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl QueueError {
    /// Returns `true` if repeating the operation may succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Backend(_))
    }
}

impl From<QueueError> for DomainError {
    fn from(err: QueueError) -> Self {
        DomainError::Infrastructure(err.to_string())
    }
}

/// Per-queue retry and retention settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DeliveryPolicy {
    /// Total deliveries allowed per job, including the first.
    pub attempts: u32,
    /// Delay before the first redelivery; each later one doubles it.
    pub backoff_base_ms: u64,
    /// Completed jobs kept for inspection.
    pub keep_completed: usize,
    /// Failed jobs kept for inspection.
    pub keep_failed: usize,
    /// How long a delivered job may stay unsettled before the Redis queue
    /// treats its consumer as dead and delivers it again.
    pub lease_ms: u64,
}

impl Default for DeliveryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff_base_ms: 2_000,
            keep_completed: 100,
            keep_failed: 500,
            lease_ms: 30_000,
        }
    }
}

impl DeliveryPolicy {
    /// Delay before the first redelivery.
    #[must_use]
    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    /// How long a delivered job may stay unsettled.
    #[must_use]
    pub fn lease(&self) -> Duration {
        Duration::from_millis(self.lease_ms)
    }

    /// Delay before redelivering a job that has now failed `failures` times,
    /// or `None` once its attempts are spent.
    ///
    /// The delay is `base × 2^(failures − 1)`.
    #[must_use]
    pub fn retry_delay(&self, failures: u32) -> Option<Duration> {
        if failures == 0 || failures >= self.attempts {
            return None;
        }
        let factor = 2_u32.saturating_pow(failures - 1);
        Some(self.backoff_base().saturating_mul(factor))
    }
}

/// Delivery policies by queue name, with a fallback for unlisted queues.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct QueuePolicies {
    /// Policy for queues without an override.
    pub default: DeliveryPolicy,
    /// Per-queue overrides.
    pub overrides: HashMap<String, DeliveryPolicy>,
}

impl QueuePolicies {
    /// Returns the policy that applies to `queue`.
    #[must_use]
    pub fn for_queue(&self, queue: &str) -> DeliveryPolicy {
        self.overrides.get(queue).copied().unwrap_or(self.default)
    }
}

/// A unit of work on a queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueJob {
    /// Unique job id.
    pub id: Uuid,
    /// Job name; for event jobs, the event type.
    pub name: String,
    /// Serialized event.
    pub payload: serde_json::Value,
    /// Deliveries that have already failed.
    pub attempts_made: u32,
    /// When the job was first enqueued.
    pub enqueued_at: DateTime<Utc>,
}

impl QueueJob {
    /// Creates a fresh job.
    #[must_use]
    pub fn new(name: &str, payload: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.to_owned(),
            payload,
            attempts_made: 0,
            enqueued_at: Utc::now(),
        }
    }
}

/// A settled job kept in a queue's completed or failed history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRecord {
    /// The job as it was last delivered.
    pub job: QueueJob,
    /// When the job was settled.
    pub finished_at: DateTime<Utc>,
    /// Why the job failed, for failed jobs.
    pub failed_reason: Option<String>,
}

impl JobRecord {
    fn completed(job: QueueJob) -> Self {
        Self {
            job,
            finished_at: Utc::now(),
            failed_reason: None,
        }
    }

    fn failed(job: QueueJob, reason: &str) -> Self {
        Self {
            job,
            finished_at: Utc::now(),
            failed_reason: Some(reason.to_owned()),
        }
    }
}

/// A job handed to a consumer, together with the receipt the backend needs
/// to settle it.
#[derive(Debug, Clone)]
pub struct ReceivedJob {
    /// The delivered job.
    pub job: QueueJob,
    receipt: String,
}

impl ReceivedJob {
    fn new(job: QueueJob, receipt: String) -> Self {
        Self { job, receipt }
    }

    /// 1-based number of this delivery.
    #[must_use]
    pub fn attempt(&self) -> u32 {
        self.job.attempts_made + 1
    }
}

/// What a queue did with a failed job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOutcome {
    /// The job will be redelivered after `delay`.
    Retrying {
        /// Backoff before the next delivery.
        delay: Duration,
    },
    /// The job's attempts are spent; it moved to the failed history.
    Exhausted,
}

/// A named queue with at-least-once delivery.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Queue name.
    fn name(&self) -> &str;

    /// The policy applied to failed jobs.
    fn policy(&self) -> DeliveryPolicy;

    /// Appends a job.
    ///
    /// # Errors
    ///
    /// Returns `QueueError::Backend` if the backend rejects the write.
    async fn enqueue(&self, job: QueueJob) -> Result<(), QueueError>;

    /// Takes the next ready job, if any, without blocking.
    ///
    /// # Errors
    ///
    /// Returns `QueueError::Backend` if the backend cannot be read.
    async fn dequeue(&self) -> Result<Option<ReceivedJob>, QueueError>;

    /// Acknowledges a job as done.
    ///
    /// # Errors
    ///
    /// Returns `QueueError::Backend` if the backend rejects the write.
    async fn complete(&self, received: ReceivedJob) -> Result<(), QueueError>;

    /// Reports a failed delivery; the queue schedules a redelivery or moves
    /// the job to the failed history.
    ///
    /// # Errors
    ///
    /// Returns `QueueError::Backend` if the backend rejects the write.
    async fn fail(
        &self,
        received: ReceivedJob,
        reason: &str,
    ) -> Result<FailureOutcome, QueueError>;

    /// Moves a job straight to the failed history without retrying it.
    ///
    /// # Errors
    ///
    /// Returns `QueueError::Backend` if the backend rejects the write.
    async fn discard(&self, received: ReceivedJob, reason: &str) -> Result<(), QueueError>;
}

/// Factory for queue clients.
pub trait Broker: Send + Sync {
    /// Returns a client for the queue called `name`.
    fn queue(&self, name: &str, policy: DeliveryPolicy) -> Arc<dyn JobQueue>;
}
