//! Domain events for the Library & Collections context.
//!
//! This is the closed catalog of events other modules subscribe to. The
//! type names double as queue job names and as the `eventType`
//! discriminator on the wire.

use std::fmt;
use std::str::FromStr;

use bookmarks_core::clock::Clock;
use bookmarks_core::event::{DomainEvent, EventMetadata};
use thiserror::Error;
use uuid::Uuid;

/// Event type name for [`CardAddedToLibrary`].
pub const CARD_ADDED_TO_LIBRARY_EVENT_TYPE: &str = "CardAddedToLibraryEvent";
/// Event type name for [`CardAddedToCollection`].
pub const CARD_ADDED_TO_COLLECTION_EVENT_TYPE: &str = "CardAddedToCollectionEvent";

/// Discriminator for every event in the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventType {
    /// See [`CardAddedToLibrary`].
    CardAddedToLibrary,
    /// See [`CardAddedToCollection`].
    CardAddedToCollection,
}

impl EventType {
    /// Every known event type.
    pub const ALL: [EventType; 2] = [
        EventType::CardAddedToLibrary,
        EventType::CardAddedToCollection,
    ];

    /// Returns the wire name of the event type.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            EventType::CardAddedToLibrary => CARD_ADDED_TO_LIBRARY_EVENT_TYPE,
            EventType::CardAddedToCollection => CARD_ADDED_TO_COLLECTION_EVENT_TYPE,
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a name does not match any event in the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown event type: {0}")]
pub struct UnknownEventType(pub String);

impl FromStr for EventType {
    type Err = UnknownEventType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventType::ALL
            .into_iter()
            .find(|event_type| event_type.as_str() == s)
            .ok_or_else(|| UnknownEventType(s.to_owned()))
    }
}

/// Emitted when a curator saves a card into their library.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CardAddedToLibrary {
    /// The card identifier.
    pub card_id: Uuid,
    /// DID of the curator.
    pub curator_id: String,
}

/// Emitted when a card is added to a collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CardAddedToCollection {
    /// The card identifier.
    pub card_id: Uuid,
    /// The collection identifier.
    pub collection_id: Uuid,
    /// DID of the user who added the card.
    pub added_by: String,
}

/// Event payload variants for the Library & Collections context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LibraryEventKind {
    /// A card has been saved into a library.
    CardAddedToLibrary(CardAddedToLibrary),
    /// A card has been added to a collection.
    CardAddedToCollection(CardAddedToCollection),
}

/// Domain event envelope for the Library & Collections context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LibraryEvent {
    /// Event metadata.
    pub metadata: EventMetadata,
    /// Event-specific payload.
    pub kind: LibraryEventKind,
}

impl LibraryEvent {
    /// Builds a `CardAddedToLibrary` event raised by the card aggregate.
    #[must_use]
    pub fn card_added_to_library(card_id: Uuid, curator_id: &str, clock: &dyn Clock) -> Self {
        Self {
            metadata: EventMetadata::now(card_id, clock),
            kind: LibraryEventKind::CardAddedToLibrary(CardAddedToLibrary {
                card_id,
                curator_id: curator_id.to_owned(),
            }),
        }
    }

    /// Builds a `CardAddedToCollection` event raised by the collection
    /// aggregate.
    #[must_use]
    pub fn card_added_to_collection(
        collection_id: Uuid,
        card_id: Uuid,
        added_by: &str,
        clock: &dyn Clock,
    ) -> Self {
        Self {
            metadata: EventMetadata::now(collection_id, clock),
            kind: LibraryEventKind::CardAddedToCollection(CardAddedToCollection {
                card_id,
                collection_id,
                added_by: added_by.to_owned(),
            }),
        }
    }

    /// Returns the discriminator of this event.
    #[must_use]
    pub const fn kind_type(&self) -> EventType {
        match &self.kind {
            LibraryEventKind::CardAddedToLibrary(_) => EventType::CardAddedToLibrary,
            LibraryEventKind::CardAddedToCollection(_) => EventType::CardAddedToCollection,
        }
    }
}

impl DomainEvent for LibraryEvent {
    fn event_type(&self) -> &'static str {
        self.kind_type().as_str()
    }

    fn metadata(&self) -> &EventMetadata {
        &self.metadata
    }
}
