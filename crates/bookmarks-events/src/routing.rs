//! Event type → target queue routing.

use std::collections::{BTreeSet, HashMap};

use bookmarks_library::domain::events::{EventType, UnknownEventType};
use thiserror::Error;

/// Queue consumed by the feeds module.
pub const FEEDS_QUEUE: &str = "feeds";
/// Queue consumed by the search indexer.
pub const SEARCH_QUEUE: &str = "search";
/// Queue consumed by analytics.
pub const ANALYTICS_QUEUE: &str = "analytics";

/// Errors raised while building a routing table.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RoutingError {
    /// An event type in the catalog has no route.
    #[error("no route configured for {0}")]
    MissingRoute(EventType),

    /// An event type is routed to an empty queue list.
    #[error("route for {0} names no queues")]
    EmptyRoute(EventType),

    /// A queue name is blank.
    #[error("route for {0} contains a blank queue name")]
    BlankQueue(EventType),

    /// A configured route names an event type outside the catalog.
    #[error(transparent)]
    UnknownEventType(#[from] UnknownEventType),
}

/// Validated routing table.
///
/// Every event type in the catalog maps to at least one queue; there is no
/// fallback queue, so a table with a gap cannot be built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingTable {
    routes: HashMap<EventType, Vec<String>>,
}

impl RoutingTable {
    /// Validates `routes` and builds a table. Duplicate queue names within a
    /// route are collapsed, keeping first-seen order.
    ///
    /// # Errors
    ///
    /// Returns `RoutingError::MissingRoute` if any catalog type is absent,
    /// `RoutingError::EmptyRoute` or `RoutingError::BlankQueue` for a route
    /// that names no usable queue.
    pub fn new(mut routes: HashMap<EventType, Vec<String>>) -> Result<Self, RoutingError> {
        for event_type in EventType::ALL {
            let queues = routes
                .get_mut(&event_type)
                .ok_or(RoutingError::MissingRoute(event_type))?;
            if queues.is_empty() {
                return Err(RoutingError::EmptyRoute(event_type));
            }
            if queues.iter().any(|queue| queue.trim().is_empty()) {
                return Err(RoutingError::BlankQueue(event_type));
            }
            let mut seen = BTreeSet::new();
            queues.retain(|queue| seen.insert(queue.clone()));
        }
        Ok(Self { routes })
    }

    /// Builds a table from configuration keyed by event type wire names.
    ///
    /// # Errors
    ///
    /// Returns `RoutingError::UnknownEventType` for a key outside the catalog,
    /// otherwise whatever [`RoutingTable::new`] returns.
    pub fn from_config(routes: &HashMap<String, Vec<String>>) -> Result<Self, RoutingError> {
        let typed = routes
            .iter()
            .map(|(name, queues)| Ok((name.parse::<EventType>()?, queues.clone())))
            .collect::<Result<HashMap<_, _>, RoutingError>>()?;
        Self::new(typed)
    }

    /// The routes the platform ships with: library saves go to feeds, search
    /// and analytics; collection adds go to feeds and search.
    #[must_use]
    pub fn standard() -> Self {
        Self {
            routes: standard_typed_routes(),
        }
    }

    /// Queues that receive events of `event_type`.
    #[must_use]
    pub fn targets(&self, event_type: EventType) -> &[String] {
        self.routes
            .get(&event_type)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Every queue named by the table.
    #[must_use]
    pub fn queues(&self) -> BTreeSet<&str> {
        self.routes
            .values()
            .flatten()
            .map(String::as_str)
            .collect()
    }
}

/// The standard routes keyed by wire name, as they appear in configuration.
#[must_use]
pub fn standard_routes() -> HashMap<String, Vec<String>> {
    standard_typed_routes()
        .into_iter()
        .map(|(event_type, queues)| (event_type.as_str().to_owned(), queues))
        .collect()
}

fn standard_typed_routes() -> HashMap<EventType, Vec<String>> {
    let queues = |names: &[&str]| -> Vec<String> {
        names.iter().map(|name| (*name).to_owned()).collect()
    };
    HashMap::from([
        (
            EventType::CardAddedToLibrary,
            queues(&[FEEDS_QUEUE, SEARCH_QUEUE, ANALYTICS_QUEUE]),
        ),
        (
            EventType::CardAddedToCollection,
            queues(&[FEEDS_QUEUE, SEARCH_QUEUE]),
        ),
    ])
}
