//! Composition root.
//!
//! [`Backends`] holds every store the pipeline talks to; [`Pipeline`] wires
//! the publisher, the consumer and the feed saga over them.

use std::sync::Arc;

use bookmarks_core::clock::{Clock, SystemClock};
use bookmarks_core::error::DomainError;
use bookmarks_core::publisher::EventPublisher;
use bookmarks_core::scheduler::{Scheduler, TokioScheduler};
use bookmarks_core::state_store::SagaStateStore;
use bookmarks_core::subscriber::EventSubscriber;
use bookmarks_events::publisher::QueuePublisher;
use bookmarks_events::queue::{Broker, InMemoryBroker, QueueError, RedisBroker};
use bookmarks_events::routing::{FEEDS_QUEUE, RoutingError};
use bookmarks_events::worker::QueueWorker;
use bookmarks_feeds::application::event_handlers::{
    CardAddedToCollectionHandler, CardAddedToLibraryHandler,
};
use bookmarks_feeds::application::saga::{CardCollectionSaga, SagaConfigError};
use bookmarks_feeds::domain::repository::FeedRepository;
use bookmarks_feeds::infrastructure::in_memory::InMemoryFeedRepository;
use bookmarks_feeds::infrastructure::pg_feed_repository::PgFeedRepository;
use bookmarks_feeds::infrastructure::schema;
use bookmarks_library::domain::events::{EventType, LibraryEvent};
use bookmarks_state_store::in_memory::InMemoryStateStore;
use bookmarks_state_store::redis_store::RedisStateStore;
use sqlx::migrate::MigrateError;
use sqlx::postgres::PgPoolOptions;
use thiserror::Error;
use tracing::{info, warn};

use crate::config::{Backend, ConfigError, WorkerConfig};

/// Startup failures.
#[derive(Debug, Error)]
pub enum AppError {
    /// Configuration is invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The routing table is invalid.
    #[error("invalid routing table: {0}")]
    Routing(#[from] RoutingError),

    /// The saga settings are invalid.
    #[error("invalid saga configuration: {0}")]
    Saga(#[from] SagaConfigError),

    /// The queue backend is unreachable.
    #[error(transparent)]
    Queue(#[from] QueueError),

    /// The saga state store is unreachable.
    #[error(transparent)]
    Domain(#[from] DomainError),

    /// The feed database is unreachable.
    #[error("feed database error: {0}")]
    Database(#[from] sqlx::Error),

    /// The feed schema could not be migrated.
    #[error("feed schema migration failed: {0}")]
    Migrate(#[from] MigrateError),
}

/// Stores and services the pipeline runs on.
pub struct Backends {
    /// Queue broker shared by publisher and consumer.
    pub broker: Arc<dyn Broker>,
    /// Saga state and lock store.
    pub state: Arc<dyn SagaStateStore>,
    /// Feed activity store.
    pub feed: Arc<dyn FeedRepository>,
    /// Runs the saga's deferred flushes.
    pub scheduler: Arc<dyn Scheduler>,
    /// Time source for events and saga windows.
    pub clock: Arc<dyn Clock>,
}

impl Backends {
    /// Connects the backends named by `config`.
    ///
    /// # Errors
    ///
    /// Returns `AppError` if Redis or PostgreSQL cannot be reached, or the
    /// feed schema cannot be migrated.
    pub async fn connect(config: &WorkerConfig) -> Result<Self, AppError> {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);

        let (broker, state): (Arc<dyn Broker>, Arc<dyn SagaStateStore>) = match config.backend {
            Backend::Redis => {
                let broker = RedisBroker::connect(&config.redis_url, &config.key_prefix).await?;
                let state = RedisStateStore::connect(&config.redis_url, &config.key_prefix).await?;
                (Arc::new(broker) as Arc<dyn Broker>, Arc::new(state) as Arc<dyn SagaStateStore>)
            }
            Backend::Memory => {
                warn!("queues and saga state are process-local; run a single replica only");
                let state = Arc::new(InMemoryStateStore::new(Arc::clone(&clock)));
                InMemoryStateStore::spawn_purger(&state, config.saga.state_ttl());
                (
                    Arc::new(InMemoryBroker::new()) as Arc<dyn Broker>,
                    state as Arc<dyn SagaStateStore>,
                )
            }
        };

        let feed: Arc<dyn FeedRepository> = match &config.database_url {
            Some(url) => {
                let pool = PgPoolOptions::new().max_connections(10).connect(url).await?;
                schema::migrate(&pool).await?;
                info!("feed activities stored in PostgreSQL");
                Arc::new(PgFeedRepository::new(pool))
            }
            None => {
                warn!("no database_url configured; feed activities are kept in memory");
                Arc::new(InMemoryFeedRepository::new())
            }
        };

        Ok(Self {
            broker,
            state,
            feed,
            scheduler: Arc::new(TokioScheduler),
            clock,
        })
    }
}

/// The assembled event pipeline for one worker process.
pub struct Pipeline {
    publisher: Arc<QueuePublisher>,
    worker: Arc<QueueWorker>,
    saga: CardCollectionSaga,
    feed: Arc<dyn FeedRepository>,
}

impl Pipeline {
    /// Wires publisher, consumer and saga over `backends`.
    ///
    /// The consumer reads `config.worker.queue`. The feed handlers are
    /// registered only when that queue is the feeds queue; jobs on any other
    /// queue are acknowledged without work.
    ///
    /// # Errors
    ///
    /// Returns `AppError` if the routing table or saga settings are invalid.
    pub fn assemble(config: &WorkerConfig, backends: Backends) -> Result<Self, AppError> {
        let routing = config.routing_table()?;
        let publisher = Arc::new(QueuePublisher::new(
            Arc::clone(&backends.broker),
            routing,
            config.queues.clone(),
        ));

        let saga = CardCollectionSaga::new(
            backends.state,
            Arc::clone(&backends.feed),
            backends.scheduler,
            backends.clock,
            config.saga,
        )?;

        let queue_name = config.worker.queue.as_str();
        let queue = backends
            .broker
            .queue(queue_name, config.queues.for_queue(queue_name));
        let worker = Arc::new(QueueWorker::new(queue, config.worker.settings));

        if queue_name == FEEDS_QUEUE {
            worker.subscribe(
                EventType::CardAddedToLibrary.as_str(),
                Arc::new(CardAddedToLibraryHandler::new(saga.clone())),
            );
            worker.subscribe(
                EventType::CardAddedToCollection.as_str(),
                Arc::new(CardAddedToCollectionHandler::new(saga.clone())),
            );
        } else {
            warn!(queue = queue_name, "no handlers for this queue; jobs will be acknowledged");
        }

        Ok(Self {
            publisher,
            worker,
            saga,
            feed: backends.feed,
        })
    }

    /// Publisher routing events onto the queues.
    #[must_use]
    pub fn publisher(&self) -> Arc<dyn EventPublisher<LibraryEvent>> {
        Arc::clone(&self.publisher) as Arc<dyn EventPublisher<LibraryEvent>>
    }

    /// The queue consumer.
    #[must_use]
    pub fn worker(&self) -> &QueueWorker {
        &self.worker
    }

    /// The feed saga.
    #[must_use]
    pub fn saga(&self) -> &CardCollectionSaga {
        &self.saga
    }

    /// The feed store activities are written to.
    #[must_use]
    pub fn feed(&self) -> &dyn FeedRepository {
        self.feed.as_ref()
    }

    /// Starts consuming.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` if the pipeline was already started.
    pub async fn start(&self) -> Result<(), DomainError> {
        self.worker.start().await
    }

    /// Stops consuming, waits for in-flight jobs and cancels the saga's
    /// scheduled flushes. Their pending state expires with its TTL.
    pub async fn shutdown(&self) {
        self.worker.stop().await;
        let cancelled = self.saga.cancel_pending_flushes();
        info!(cancelled_flushes = cancelled, "pipeline shut down");
    }
}
