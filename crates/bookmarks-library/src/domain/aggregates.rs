//! Aggregate roots for the Library & Collections context.

use std::collections::HashSet;

use bookmarks_core::aggregate::AggregateRoot;
use bookmarks_core::clock::Clock;
use bookmarks_core::error::DomainError;
use uuid::Uuid;

use super::events::LibraryEvent;

/// A bookmarked card that curators can save into their libraries.
#[derive(Debug, Clone)]
pub struct Card {
    /// Aggregate identifier.
    pub id: Uuid,
    /// Curators holding the card in their library.
    library_members: HashSet<String>,
    /// Uncommitted events pending publication.
    uncommitted_events: Vec<LibraryEvent>,
}

impl Card {
    /// Creates a card that is not yet in any library.
    #[must_use]
    pub fn new(id: Uuid) -> Self {
        Self {
            id,
            library_members: HashSet::new(),
            uncommitted_events: Vec::new(),
        }
    }

    /// Returns `true` if `curator_id` holds the card in their library.
    #[must_use]
    pub fn is_in_library_of(&self, curator_id: &str) -> bool {
        self.library_members.contains(curator_id)
    }

    /// Saves the card into a curator's library, raising a
    /// `CardAddedToLibrary` event.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` if the curator already holds the card.
    pub fn add_to_library(
        &mut self,
        curator_id: &str,
        clock: &dyn Clock,
    ) -> Result<(), DomainError> {
        if !self.library_members.insert(curator_id.to_owned()) {
            return Err(DomainError::Validation(format!(
                "card {} is already in the library of {curator_id}",
                self.id
            )));
        }
        self.raise(LibraryEvent::card_added_to_library(self.id, curator_id, clock));
        Ok(())
    }
}

impl AggregateRoot for Card {
    type Event = LibraryEvent;

    fn aggregate_id(&self) -> Uuid {
        self.id
    }

    fn raise(&mut self, event: Self::Event) {
        self.uncommitted_events.push(event);
    }

    fn uncommitted_events(&self) -> &[Self::Event] {
        &self.uncommitted_events
    }

    fn collect_and_clear(&mut self) -> Vec<Self::Event> {
        std::mem::take(&mut self.uncommitted_events)
    }
}

/// A curated, ordered group of cards.
#[derive(Debug, Clone)]
pub struct Collection {
    /// Aggregate identifier.
    pub id: Uuid,
    /// DID of the collection author.
    pub author_id: String,
    /// Cards in insertion order.
    card_ids: Vec<Uuid>,
    /// Uncommitted events pending publication.
    uncommitted_events: Vec<LibraryEvent>,
}

impl Collection {
    /// Creates an empty collection.
    #[must_use]
    pub fn new(id: Uuid, author_id: &str) -> Self {
        Self {
            id,
            author_id: author_id.to_owned(),
            card_ids: Vec::new(),
            uncommitted_events: Vec::new(),
        }
    }

    /// Returns the cards in the collection.
    #[must_use]
    pub fn card_ids(&self) -> &[Uuid] {
        &self.card_ids
    }

    /// Adds a card, raising a `CardAddedToCollection` event.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` if the card is already present.
    pub fn add_card(
        &mut self,
        card_id: Uuid,
        added_by: &str,
        clock: &dyn Clock,
    ) -> Result<(), DomainError> {
        if self.card_ids.contains(&card_id) {
            return Err(DomainError::Validation(format!(
                "card {card_id} is already in collection {}",
                self.id
            )));
        }
        self.card_ids.push(card_id);
        self.raise(LibraryEvent::card_added_to_collection(
            self.id, card_id, added_by, clock,
        ));
        Ok(())
    }
}

impl AggregateRoot for Collection {
    type Event = LibraryEvent;

    fn aggregate_id(&self) -> Uuid {
        self.id
    }

    fn raise(&mut self, event: Self::Event) {
        self.uncommitted_events.push(event);
    }

    fn uncommitted_events(&self) -> &[Self::Event] {
        &self.uncommitted_events
    }

    fn collect_and_clear(&mut self) -> Vec<Self::Event> {
        std::mem::take(&mut self.uncommitted_events)
    }
}
