//! Queue-backed implementation of the `EventPublisher` port.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use backon::{ExponentialBuilder, Retryable};
use bookmarks_core::error::DomainError;
use bookmarks_core::event::DomainEvent;
use bookmarks_core::publisher::EventPublisher;
use bookmarks_library::domain::events::LibraryEvent;
use serde::Deserialize;
use tracing::{debug, instrument, warn};

use crate::mapper;
use crate::queue::{Broker, JobQueue, QueueError, QueueJob, QueuePolicies};
use crate::routing::RoutingTable;

/// In-process retry applied to transient enqueue failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct EnqueueRetry {
    /// First retry delay.
    pub min_delay_ms: u64,
    /// Upper bound on any single delay.
    pub max_delay_ms: u64,
    /// Retries after the first attempt.
    pub max_times: usize,
}

impl Default for EnqueueRetry {
    fn default() -> Self {
        Self {
            min_delay_ms: 100,
            max_delay_ms: 2_000,
            max_times: 3,
        }
    }
}

impl EnqueueRetry {
    fn backoff(self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(Duration::from_millis(self.min_delay_ms))
            .with_max_delay(Duration::from_millis(self.max_delay_ms))
            .with_max_times(self.max_times)
            .with_jitter()
    }
}

/// Publishes library events to every queue their type is routed to.
///
/// Queue clients are created on first use with the queue's delivery policy
/// and reused afterwards. Fan-out is not atomic: if one queue rejects a job,
/// jobs already written to other queues stay there.
pub struct QueuePublisher {
    broker: Arc<dyn Broker>,
    routing: RoutingTable,
    policies: QueuePolicies,
    retry: EnqueueRetry,
    queues: Mutex<HashMap<String, Arc<dyn JobQueue>>>,
}

impl QueuePublisher {
    /// Creates a publisher over `broker`.
    #[must_use]
    pub fn new(broker: Arc<dyn Broker>, routing: RoutingTable, policies: QueuePolicies) -> Self {
        Self {
            broker,
            routing,
            policies,
            retry: EnqueueRetry::default(),
            queues: Mutex::new(HashMap::new()),
        }
    }

    /// Overrides the enqueue retry settings.
    #[must_use]
    pub fn with_retry(mut self, retry: EnqueueRetry) -> Self {
        self.retry = retry;
        self
    }

    fn queue(&self, name: &str) -> Arc<dyn JobQueue> {
        let mut queues = self.queues.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(queues.entry(name.to_owned()).or_insert_with(|| {
            debug!(queue = %name, "creating queue client");
            self.broker.queue(name, self.policies.for_queue(name))
        }))
    }

    async fn enqueue(&self, queue: &dyn JobQueue, job: &QueueJob) -> Result<(), QueueError> {
        (|| async { queue.enqueue(job.clone()).await })
            .retry(self.retry.backoff())
            .when(QueueError::is_transient)
            .notify(|err: &QueueError, delay: Duration| {
                warn!(queue = %queue.name(), error = %err, ?delay, "enqueue failed, retrying");
            })
            .await
    }
}

#[async_trait]
impl EventPublisher<LibraryEvent> for QueuePublisher {
    #[instrument(skip_all, fields(event_count = events.len()))]
    async fn publish_events(&self, events: &[LibraryEvent]) -> Result<(), DomainError> {
        for event in events {
            let payload = mapper::encode(event)
                .map_err(|err| DomainError::Infrastructure(err.to_string()))?;

            for queue_name in self.routing.targets(event.kind_type()) {
                let queue = self.queue(queue_name);
                let job = QueueJob::new(event.event_type(), payload.clone());
                self.enqueue(queue.as_ref(), &job).await?;
                debug!(
                    queue = %queue_name,
                    job_id = %job.id,
                    event_type = event.event_type(),
                    aggregate_id = %event.aggregate_id(),
                    "event enqueued"
                );
            }
        }
        Ok(())
    }
}
