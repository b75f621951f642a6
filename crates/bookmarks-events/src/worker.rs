//! Queue consumer that dispatches decoded events to registered handlers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use bookmarks_core::error::DomainError;
use bookmarks_core::event::DomainEvent;
use bookmarks_core::subscriber::{EventHandler, EventSubscriber};
use bookmarks_library::domain::events::{EventType, LibraryEvent};
use serde::Deserialize;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::mapper;
use crate::queue::{FailureOutcome, JobQueue, QueueError, ReceivedJob};

type HandlerMap = HashMap<String, Arc<dyn EventHandler<LibraryEvent>>>;

/// Consumer tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct WorkerSettings {
    /// Jobs processed at the same time.
    pub concurrency: usize,
    /// Pause between polls when the queue is empty.
    pub poll_interval_ms: u64,
    /// How long `stop` waits for in-flight jobs.
    pub shutdown_grace_ms: u64,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            concurrency: 5,
            poll_interval_ms: 250,
            shutdown_grace_ms: 10_000,
        }
    }
}

impl WorkerSettings {
    fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

#[derive(Clone)]
struct Dispatcher {
    queue: Arc<dyn JobQueue>,
    handlers: Arc<RwLock<HandlerMap>>,
}

impl Dispatcher {
    fn handler(&self, event_type: &str) -> Option<Arc<dyn EventHandler<LibraryEvent>>> {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(event_type)
            .cloned()
    }

    /// Runs one delivered job to a settled state.
    async fn process(&self, received: ReceivedJob) {
        let queue = self.queue.name();
        let job_id = received.job.id;

        let event = match mapper::decode(&received.job.payload) {
            Ok(event) => event,
            Err(err) => {
                error!(
                    queue,
                    %job_id,
                    job_name = %received.job.name,
                    error = %err,
                    "discarding undecodable job"
                );
                let reason = err.to_string();
                if let Err(err) = self.queue.discard(received, &reason).await {
                    error!(queue, %job_id, error = %err, "failed to discard job");
                }
                return;
            }
        };

        let Some(handler) = self.handler(event.event_type()) else {
            warn!(
                queue,
                %job_id,
                event_type = event.event_type(),
                "no handler registered, acknowledging job"
            );
            self.settle_complete(received).await;
            return;
        };

        let attempt = received.attempt();
        match handler.handle(&event).await {
            Ok(()) => {
                debug!(queue, %job_id, handler = handler.name(), attempt, "job handled");
                self.settle_complete(received).await;
            }
            Err(err) => {
                let reason = err.to_string();
                match self.queue.fail(received, &reason).await {
                    Ok(FailureOutcome::Retrying { delay }) => {
                        warn!(
                            queue,
                            %job_id,
                            handler = handler.name(),
                            attempt,
                            ?delay,
                            error = %err,
                            "handler failed, job will be retried"
                        );
                    }
                    Ok(FailureOutcome::Exhausted) => {
                        error!(
                            queue,
                            %job_id,
                            handler = handler.name(),
                            attempt,
                            error = %err,
                            "handler failed, attempts exhausted"
                        );
                    }
                    Err(queue_err) => {
                        error!(queue, %job_id, error = %queue_err, "failed to report job failure");
                    }
                }
            }
        }
    }

    async fn settle_complete(&self, received: ReceivedJob) {
        let job_id = received.job.id;
        if let Err(err) = self.queue.complete(received).await {
            error!(queue = self.queue.name(), %job_id, error = %err, "failed to acknowledge job");
        }
    }
}

/// Consumes one queue with bounded concurrency.
///
/// Each job runs on its own task once a concurrency permit is free. Handlers
/// are looked up by the decoded event's type; a type with no handler is
/// acknowledged without work. A worker can be started once: after `stop` it
/// stays stopped.
pub struct QueueWorker {
    dispatcher: Dispatcher,
    settings: WorkerSettings,
    cancel: CancellationToken,
    tracker: TaskTracker,
    started: AtomicBool,
}

impl QueueWorker {
    /// Creates a stopped worker over `queue`.
    #[must_use]
    pub fn new(queue: Arc<dyn JobQueue>, settings: WorkerSettings) -> Self {
        Self {
            dispatcher: Dispatcher {
                queue,
                handlers: Arc::new(RwLock::new(HashMap::new())),
            },
            settings,
            cancel: CancellationToken::new(),
            tracker: TaskTracker::new(),
            started: AtomicBool::new(false),
        }
    }

    /// Name of the consumed queue.
    #[must_use]
    pub fn queue_name(&self) -> &str {
        self.dispatcher.queue.name()
    }

    /// Dequeues and processes a single job inline, returning whether one was
    /// available.
    ///
    /// # Errors
    ///
    /// Returns the queue error if the dequeue itself fails.
    pub async fn process_next(&self) -> Result<bool, QueueError> {
        match self.dispatcher.queue.dequeue().await? {
            Some(received) => {
                self.dispatcher.process(received).await;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn consume(
        dispatcher: Dispatcher,
        settings: WorkerSettings,
        cancel: CancellationToken,
        tracker: TaskTracker,
    ) {
        let permits = Arc::new(Semaphore::new(settings.concurrency.max(1)));

        loop {
            let permit = tokio::select! {
                () = cancel.cancelled() => break,
                permit = Arc::clone(&permits).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            match dispatcher.queue.dequeue().await {
                Ok(Some(received)) => {
                    let dispatcher = dispatcher.clone();
                    tracker.spawn(async move {
                        dispatcher.process(received).await;
                        drop(permit);
                    });
                    continue;
                }
                Ok(None) => drop(permit),
                Err(err) => {
                    drop(permit);
                    warn!(queue = dispatcher.queue.name(), error = %err, "dequeue failed");
                }
            }

            tokio::select! {
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(settings.poll_interval()) => {}
            }
        }

        debug!(queue = dispatcher.queue.name(), "consumer loop exited");
    }
}

#[async_trait]
impl EventSubscriber<LibraryEvent> for QueueWorker {
    fn subscribe(&self, event_type: &str, handler: Arc<dyn EventHandler<LibraryEvent>>) {
        if event_type.parse::<EventType>().is_err() {
            warn!(
                event_type,
                handler = handler.name(),
                "handler registered for unknown event type"
            );
        }
        info!(
            queue = self.queue_name(),
            event_type,
            handler = handler.name(),
            "handler registered"
        );
        self.dispatcher
            .handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(event_type.to_owned(), handler);
    }

    async fn start(&self) -> Result<(), DomainError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(DomainError::Validation(format!(
                "worker for queue {} has already been started",
                self.queue_name()
            )));
        }

        self.tracker.spawn(Self::consume(
            self.dispatcher.clone(),
            self.settings,
            self.cancel.clone(),
            self.tracker.clone(),
        ));
        info!(
            queue = self.queue_name(),
            concurrency = self.settings.concurrency,
            "worker started"
        );
        Ok(())
    }

    async fn stop(&self) {
        self.cancel.cancel();
        self.tracker.close();
        let grace = self.settings.shutdown_grace();
        if tokio::time::timeout(grace, self.tracker.wait()).await.is_err() {
            warn!(
                queue = self.queue_name(),
                ?grace,
                "in-flight jobs still running after shutdown grace"
            );
        } else {
            info!(queue = self.queue_name(), "worker stopped");
        }
    }
}
