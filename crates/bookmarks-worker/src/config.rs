//! Worker configuration.
//!
//! Sources are layered, later ones overriding earlier ones:
//!
//! 1. `bookmarks.yaml` in the working directory, if present
//! 2. the YAML file named by `BOOKMARKS_CONFIG`, if set
//! 3. environment variables prefixed `BOOKMARKS__`, with `__` between
//!    nested keys (`BOOKMARKS__SAGA__WINDOW_MS=1500`)

use std::collections::{BTreeMap, HashMap};

use bookmarks_events::queue::QueuePolicies;
use bookmarks_events::routing::{FEEDS_QUEUE, RoutingError, RoutingTable, standard_routes};
use bookmarks_events::worker::WorkerSettings;
use bookmarks_feeds::application::saga::{SagaConfig, SagaConfigError};
use config::builder::DefaultState;
use config::{Config, ConfigBuilder, Environment, File, FileFormat};
use serde::Deserialize;
use thiserror::Error;

/// Base name of the optional configuration file in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "bookmarks";
/// Environment variable naming an extra configuration file.
pub const CONFIG_ENV_VAR: &str = "BOOKMARKS_CONFIG";
/// Prefix of configuration environment variables.
pub const CONFIG_ENV_PREFIX: &str = "BOOKMARKS";

/// Configuration problems found at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A source could not be read or did not match the expected shape.
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    /// The routing table is incomplete or malformed.
    #[error("invalid routing table: {0}")]
    Routing(#[from] RoutingError),

    /// The saga timings are inconsistent.
    #[error("invalid saga configuration: {0}")]
    Saga(#[from] SagaConfigError),

    /// The consumed queue receives no events.
    #[error("worker queue `{0}` is not a target of any route")]
    UnroutedQueue(String),

    /// The worker must process at least one job at a time.
    #[error("worker concurrency must be at least 1")]
    NoConcurrency,
}

/// Which backend holds queues and saga state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Shared Redis; required when more than one replica runs.
    #[default]
    Redis,
    /// Process-local; for development only.
    Memory,
}

/// One routing rule: an event type and the queues it is delivered to.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RouteConfig {
    /// Wire name of the event type, e.g. `CardAddedToLibraryEvent`.
    pub event_type: String,
    /// Target queues.
    pub queues: Vec<String>,
}

/// The queue this process consumes and how.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct WorkerSection {
    /// Queue to consume.
    pub queue: String,
    /// Consumer tuning.
    #[serde(flatten)]
    pub settings: WorkerSettings,
}

impl Default for WorkerSection {
    fn default() -> Self {
        Self {
            queue: FEEDS_QUEUE.to_owned(),
            settings: WorkerSettings::default(),
        }
    }
}

/// Top-level worker configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Backend for queues and saga state.
    pub backend: Backend,
    /// Redis connection URL.
    pub redis_url: String,
    /// PostgreSQL URL for the feed store; an in-memory store is used when
    /// absent.
    pub database_url: Option<String>,
    /// Prefix for every Redis key this process writes.
    pub key_prefix: String,
    /// Event routing rules.
    pub routes: Vec<RouteConfig>,
    /// Per-queue delivery policies.
    pub queues: QueuePolicies,
    /// Consumer settings.
    pub worker: WorkerSection,
    /// Feed saga settings.
    pub saga: SagaConfig,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        let routes: BTreeMap<String, Vec<String>> = standard_routes().into_iter().collect();
        Self {
            backend: Backend::Redis,
            redis_url: "redis://127.0.0.1:6379".to_owned(),
            database_url: None,
            key_prefix: "bookmarks".to_owned(),
            routes: routes
                .into_iter()
                .map(|(event_type, queues)| RouteConfig { event_type, queues })
                .collect(),
            queues: QueuePolicies::default(),
            worker: WorkerSection::default(),
            saga: SagaConfig::default(),
        }
    }
}

impl WorkerConfig {
    /// Loads configuration from the default file, the file named by
    /// `BOOKMARKS_CONFIG`, and the environment, then validates it.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a source is unreadable or the result is
    /// invalid.
    pub fn load() -> Result<Self, ConfigError> {
        let mut builder = Config::builder()
            .add_source(File::new(DEFAULT_CONFIG_FILE, FileFormat::Yaml).required(false));

        if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
            builder = builder.add_source(File::new(&path, FileFormat::Yaml).required(true));
        }

        Self::from_builder(
            builder.add_source(
                Environment::with_prefix(CONFIG_ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            ),
        )
    }

    /// Parses and validates a YAML document.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the document is malformed or invalid.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        Self::from_builder(Config::builder().add_source(File::from_str(yaml, FileFormat::Yaml)))
    }

    fn from_builder(builder: ConfigBuilder<DefaultState>) -> Result<Self, ConfigError> {
        let config: Self = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Builds the routing table described by `routes`.
    ///
    /// # Errors
    ///
    /// Returns `RoutingError` if a route is malformed or an event type has
    /// no route.
    pub fn routing_table(&self) -> Result<RoutingTable, RoutingError> {
        let mut routes: HashMap<String, Vec<String>> = HashMap::new();
        for route in &self.routes {
            routes
                .entry(route.event_type.clone())
                .or_default()
                .extend(route.queues.iter().cloned());
        }
        RoutingTable::from_config(&routes)
    }

    /// Checks the configuration for consistency.
    ///
    /// # Errors
    ///
    /// Returns the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let routing = self.routing_table()?;
        self.saga.validate()?;
        if self.worker.settings.concurrency == 0 {
            return Err(ConfigError::NoConcurrency);
        }
        if !routing.queues().contains(self.worker.queue.as_str()) {
            return Err(ConfigError::UnroutedQueue(self.worker.queue.clone()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bookmarks_events::routing::{ANALYTICS_QUEUE, SEARCH_QUEUE};
    use bookmarks_library::domain::events::EventType;

    #[test]
    fn test_defaults_are_valid_and_route_every_event_type() {
        // Arrange
        let config = WorkerConfig::default();

        // Act
        let routing = config.routing_table().unwrap();

        // Assert
        assert!(config.validate().is_ok());
        assert_eq!(
            routing.targets(EventType::CardAddedToLibrary),
            [FEEDS_QUEUE, SEARCH_QUEUE, ANALYTICS_QUEUE]
        );
        assert_eq!(config.worker.queue, FEEDS_QUEUE);
    }

    #[test]
    fn test_yaml_overrides_nested_sections() {
        // Arrange
        let yaml = r"
backend: memory
key_prefix: staging
worker:
  queue: search
  concurrency: 2
saga:
  window_ms: 1500
queues:
  overrides:
    feeds:
      attempts: 5
";

        // Act
        let config = WorkerConfig::from_yaml(yaml).unwrap();

        // Assert
        assert_eq!(config.backend, Backend::Memory);
        assert_eq!(config.key_prefix, "staging");
        assert_eq!(config.worker.queue, SEARCH_QUEUE);
        assert_eq!(config.worker.settings.concurrency, 2);
        assert_eq!(config.worker.settings.poll_interval_ms, 250);
        assert_eq!(config.saga.window_ms, 1_500);
        assert_eq!(config.saga.lock_ttl_ms, 10_000);
        assert_eq!(config.queues.for_queue(FEEDS_QUEUE).attempts, 5);
        assert_eq!(config.queues.for_queue(SEARCH_QUEUE).attempts, 3);
    }

    #[test]
    fn test_example_file_matches_defaults() {
        let config = WorkerConfig::from_yaml(include_str!("../../../bookmarks.example.yaml"))
            .unwrap();

        assert_eq!(config, WorkerConfig::default());
    }

    #[test]
    fn test_routes_missing_an_event_type_are_rejected() {
        let yaml = r"
routes:
  - event_type: CardAddedToLibraryEvent
    queues: [feeds]
";

        let result = WorkerConfig::from_yaml(yaml);

        assert!(matches!(result, Err(ConfigError::Routing(_))));
    }

    #[test]
    fn test_lock_ttl_not_covering_window_and_flush_is_rejected() {
        let yaml = r"
saga:
  window_ms: 10000
  lock_ttl_ms: 10000
";

        let result = WorkerConfig::from_yaml(yaml);

        assert!(matches!(
            result,
            Err(ConfigError::Saga(SagaConfigError::LockTtlTooShort { .. }))
        ));
    }

    #[test]
    fn test_worker_queue_must_receive_events() {
        let yaml = r"
worker:
  queue: notifications
";

        let result = WorkerConfig::from_yaml(yaml);

        assert!(matches!(
            result,
            Err(ConfigError::UnroutedQueue(queue)) if queue == "notifications"
        ));
    }
}
