//! Queue event handlers for the Feeds context.
//!
//! Both handlers feed the same [`CardCollectionSaga`]; they differ only in
//! the event type they accept.

use async_trait::async_trait;
use bookmarks_core::error::DomainError;
use bookmarks_core::subscriber::EventHandler;
use bookmarks_library::domain::events::{EventType, LibraryEvent};
use tracing::warn;

use super::saga::CardCollectionSaga;
use crate::domain::pending::FeedContribution;

async fn forward(
    saga: &CardCollectionSaga,
    expected: EventType,
    handler: &'static str,
    event: &LibraryEvent,
) -> Result<(), DomainError> {
    let actual = event.kind_type();
    if actual != expected {
        warn!(handler, event_type = actual.as_str(), "ignoring unexpected event type");
        return Ok(());
    }
    saga.handle(&FeedContribution::from_event(event)).await
}

/// Routes `CardAddedToLibraryEvent` into the card-collection saga.
#[derive(Clone)]
pub struct CardAddedToLibraryHandler {
    saga: CardCollectionSaga,
}

impl CardAddedToLibraryHandler {
    /// Creates a handler feeding `saga`.
    #[must_use]
    pub fn new(saga: CardCollectionSaga) -> Self {
        Self { saga }
    }
}

#[async_trait]
impl EventHandler<LibraryEvent> for CardAddedToLibraryHandler {
    async fn handle(&self, event: &LibraryEvent) -> Result<(), DomainError> {
        forward(&self.saga, EventType::CardAddedToLibrary, self.name(), event).await
    }

    fn name(&self) -> &'static str {
        "feeds.card_added_to_library"
    }
}

/// Routes `CardAddedToCollectionEvent` into the card-collection saga.
#[derive(Clone)]
pub struct CardAddedToCollectionHandler {
    saga: CardCollectionSaga,
}

impl CardAddedToCollectionHandler {
    /// Creates a handler feeding `saga`.
    #[must_use]
    pub fn new(saga: CardCollectionSaga) -> Self {
        Self { saga }
    }
}

#[async_trait]
impl EventHandler<LibraryEvent> for CardAddedToCollectionHandler {
    async fn handle(&self, event: &LibraryEvent) -> Result<(), DomainError> {
        forward(&self.saga, EventType::CardAddedToCollection, self.name(), event).await
    }

    fn name(&self) -> &'static str {
        "feeds.card_added_to_collection"
    }
}
