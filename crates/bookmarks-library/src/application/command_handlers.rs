//! Command handlers for the Library & Collections context.
//!
//! Each handler loads the aggregate, executes the command, saves it, and only
//! then collects the raised events and hands them to the publisher.

use bookmarks_core::aggregate::AggregateRoot;
use bookmarks_core::clock::Clock;
use bookmarks_core::error::DomainError;
use bookmarks_core::publisher::EventPublisher;
use tracing::{instrument, warn};
use uuid::Uuid;

use crate::domain::commands::{AddCardToCollection, AddCardToLibrary};
use crate::domain::events::LibraryEvent;
use crate::domain::repositories::{CardRepository, CollectionRepository};

/// Result of a successfully handled command.
#[derive(Debug)]
pub struct LibraryCommandResult {
    /// The aggregate ID affected by the command.
    pub aggregate_id: Uuid,
    /// The events raised by the command.
    pub events: Vec<LibraryEvent>,
    /// Non-fatal problems hit after the write was committed.
    pub warnings: Vec<String>,
}

/// Publishes events for a write that has already been committed.
///
/// Failures are logged and returned as warnings; the committed write stands.
async fn dispatch_committed(
    events: &[LibraryEvent],
    publisher: &dyn EventPublisher<LibraryEvent>,
) -> Vec<String> {
    if events.is_empty() {
        return Vec::new();
    }
    match publisher.publish_events(events).await {
        Ok(()) => Vec::new(),
        Err(err) => {
            warn!(
                error = %err,
                event_count = events.len(),
                "failed to publish events after commit"
            );
            vec![format!("event publication failed: {err}")]
        }
    }
}

/// Handles the `AddCardToLibrary` command.
///
/// # Errors
///
/// Returns `DomainError::AggregateNotFound` if the card does not exist,
/// `DomainError::Validation` if the curator already holds it, and
/// `DomainError::Infrastructure` if loading or saving fails.
#[instrument(skip_all, fields(card_id = %command.card_id, curator_id = %command.curator_id))]
pub async fn handle_add_card_to_library(
    command: &AddCardToLibrary,
    clock: &dyn Clock,
    repo: &dyn CardRepository,
    publisher: &dyn EventPublisher<LibraryEvent>,
) -> Result<LibraryCommandResult, DomainError> {
    let mut card = repo
        .find_by_id(command.card_id)
        .await?
        .ok_or(DomainError::AggregateNotFound(command.card_id))?;

    card.add_to_library(&command.curator_id, clock)?;
    repo.save(&card).await?;

    let events = card.collect_and_clear();
    let warnings = dispatch_committed(&events, publisher).await;

    Ok(LibraryCommandResult {
        aggregate_id: command.card_id,
        events,
        warnings,
    })
}

/// Handles the `AddCardToCollection` command.
///
/// # Errors
///
/// Returns `DomainError::AggregateNotFound` if the collection does not exist,
/// `DomainError::Validation` if the card is already in it, and
/// `DomainError::Infrastructure` if loading or saving fails.
#[instrument(skip_all, fields(collection_id = %command.collection_id, card_id = %command.card_id))]
pub async fn handle_add_card_to_collection(
    command: &AddCardToCollection,
    clock: &dyn Clock,
    repo: &dyn CollectionRepository,
    publisher: &dyn EventPublisher<LibraryEvent>,
) -> Result<LibraryCommandResult, DomainError> {
    let mut collection = repo
        .find_by_id(command.collection_id)
        .await?
        .ok_or(DomainError::AggregateNotFound(command.collection_id))?;

    collection.add_card(command.card_id, &command.added_by, clock)?;
    repo.save(&collection).await?;

    let events = collection.collect_and_clear();
    let warnings = dispatch_committed(&events, publisher).await;

    Ok(LibraryCommandResult {
        aggregate_id: command.collection_id,
        events,
        warnings,
    })
}

#[cfg(test)]
mod tests {
    use bookmarks_core::error::DomainError;
    use bookmarks_test_support::{FailingEventPublisher, FixedClock, RecordingEventPublisher};
    use chrono::{TimeZone, Utc};
    use uuid::Uuid;

    use crate::application::command_handlers::{
        handle_add_card_to_collection, handle_add_card_to_library,
    };
    use crate::domain::aggregates::{Card, Collection};
    use crate::domain::commands::{AddCardToCollection, AddCardToLibrary};
    use crate::domain::events::{LibraryEvent, LibraryEventKind};
    use crate::domain::repositories::{CardRepository, CollectionRepository};
    use crate::infrastructure::in_memory::{InMemoryCardRepository, InMemoryCollectionRepository};

    #[derive(Debug)]
    struct FailingCardRepository(Card);

    #[async_trait::async_trait]
    impl CardRepository for FailingCardRepository {
        async fn find_by_id(&self, _card_id: Uuid) -> Result<Option<Card>, DomainError> {
            Ok(Some(self.0.clone()))
        }

        async fn save(&self, _card: &Card) -> Result<(), DomainError> {
            Err(DomainError::Infrastructure("connection refused".into()))
        }
    }

    fn clock() -> FixedClock {
        FixedClock(Utc.with_ymd_and_hms(2026, 1, 15, 10, 0, 0).unwrap())
    }

    #[tokio::test]
    async fn test_add_card_to_library_saves_then_publishes() {
        // Arrange
        let card_id = Uuid::new_v4();
        let repo = InMemoryCardRepository::with_cards([Card::new(card_id)]);
        let publisher = RecordingEventPublisher::<LibraryEvent>::default();
        let command = AddCardToLibrary {
            card_id,
            curator_id: "did:plc:alice".to_owned(),
        };

        // Act
        let result = handle_add_card_to_library(&command, &clock(), &repo, &publisher)
            .await
            .unwrap();

        // Assert
        assert_eq!(result.aggregate_id, card_id);
        assert_eq!(result.events.len(), 1);
        assert!(result.warnings.is_empty());
        assert_eq!(publisher.published(), result.events);

        let saved = repo.find_by_id(card_id).await.unwrap().unwrap();
        assert!(saved.is_in_library_of("did:plc:alice"));
    }

    #[tokio::test]
    async fn test_add_card_to_library_returns_not_found_for_missing_card() {
        // Arrange
        let card_id = Uuid::new_v4();
        let repo = InMemoryCardRepository::default();
        let publisher = RecordingEventPublisher::<LibraryEvent>::default();
        let command = AddCardToLibrary {
            card_id,
            curator_id: "did:plc:alice".to_owned(),
        };

        // Act
        let result = handle_add_card_to_library(&command, &clock(), &repo, &publisher).await;

        // Assert
        match result.unwrap_err() {
            DomainError::AggregateNotFound(id) => assert_eq!(id, card_id),
            other => panic!("expected AggregateNotFound, got {other:?}"),
        }
        assert!(publisher.published().is_empty());
    }

    #[tokio::test]
    async fn test_publish_failure_after_commit_is_a_warning() {
        // Arrange
        let card_id = Uuid::new_v4();
        let repo = InMemoryCardRepository::with_cards([Card::new(card_id)]);
        let command = AddCardToLibrary {
            card_id,
            curator_id: "did:plc:alice".to_owned(),
        };

        // Act
        let result =
            handle_add_card_to_library(&command, &clock(), &repo, &FailingEventPublisher)
                .await
                .unwrap();

        // Assert
        assert_eq!(result.warnings.len(), 1);
        assert!(result.warnings[0].contains("event publication failed"));
        let saved = repo.find_by_id(card_id).await.unwrap().unwrap();
        assert!(saved.is_in_library_of("did:plc:alice"));
    }

    #[tokio::test]
    async fn test_nothing_is_published_when_save_fails() {
        // Arrange
        let card_id = Uuid::new_v4();
        let repo = FailingCardRepository(Card::new(card_id));
        let publisher = RecordingEventPublisher::<LibraryEvent>::default();
        let command = AddCardToLibrary {
            card_id,
            curator_id: "did:plc:alice".to_owned(),
        };

        // Act
        let result = handle_add_card_to_library(&command, &clock(), &repo, &publisher).await;

        // Assert
        assert!(matches!(result, Err(DomainError::Infrastructure(_))));
        assert!(publisher.published().is_empty());
    }

    #[tokio::test]
    async fn test_add_card_to_collection_publishes_collection_event() {
        // Arrange
        let collection_id = Uuid::new_v4();
        let card_id = Uuid::new_v4();
        let repo = InMemoryCollectionRepository::with_collections([Collection::new(
            collection_id,
            "did:plc:alice",
        )]);
        let publisher = RecordingEventPublisher::<LibraryEvent>::default();
        let command = AddCardToCollection {
            collection_id,
            card_id,
            added_by: "did:plc:alice".to_owned(),
        };

        // Act
        let result = handle_add_card_to_collection(&command, &clock(), &repo, &publisher)
            .await
            .unwrap();

        // Assert
        let published = publisher.published();
        assert_eq!(published.len(), 1);
        match &published[0].kind {
            LibraryEventKind::CardAddedToCollection(payload) => {
                assert_eq!(payload.collection_id, collection_id);
                assert_eq!(payload.card_id, card_id);
            }
            other => panic!("expected CardAddedToCollection, got {other:?}"),
        }
        assert_eq!(result.aggregate_id, collection_id);

        let saved = repo.find_by_id(collection_id).await.unwrap().unwrap();
        assert_eq!(saved.card_ids(), &[card_id]);
    }
}
