//! In-memory repositories for cards and collections.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use bookmarks_core::aggregate::AggregateRoot;
use bookmarks_core::error::DomainError;
use uuid::Uuid;

use crate::domain::aggregates::{Card, Collection};
use crate::domain::repositories::{CardRepository, CollectionRepository};

fn poisoned<T>(_: T) -> DomainError {
    DomainError::Infrastructure("repository mutex poisoned".into())
}

/// Card repository backed by a `HashMap`.
#[derive(Debug, Default)]
pub struct InMemoryCardRepository {
    cards: Mutex<HashMap<Uuid, Card>>,
}

impl InMemoryCardRepository {
    /// Creates a repository pre-populated with `cards`.
    #[must_use]
    pub fn with_cards(cards: impl IntoIterator<Item = Card>) -> Self {
        Self {
            cards: Mutex::new(cards.into_iter().map(|card| (card.id, card)).collect()),
        }
    }
}

#[async_trait]
impl CardRepository for InMemoryCardRepository {
    async fn find_by_id(&self, card_id: Uuid) -> Result<Option<Card>, DomainError> {
        Ok(self.cards.lock().map_err(poisoned)?.get(&card_id).cloned())
    }

    async fn save(&self, card: &Card) -> Result<(), DomainError> {
        let mut stored = card.clone();
        stored.collect_and_clear();
        self.cards.lock().map_err(poisoned)?.insert(stored.id, stored);
        Ok(())
    }
}

/// Collection repository backed by a `HashMap`.
#[derive(Debug, Default)]
pub struct InMemoryCollectionRepository {
    collections: Mutex<HashMap<Uuid, Collection>>,
}

impl InMemoryCollectionRepository {
    /// Creates a repository pre-populated with `collections`.
    #[must_use]
    pub fn with_collections(collections: impl IntoIterator<Item = Collection>) -> Self {
        Self {
            collections: Mutex::new(
                collections
                    .into_iter()
                    .map(|collection| (collection.id, collection))
                    .collect(),
            ),
        }
    }
}

#[async_trait]
impl CollectionRepository for InMemoryCollectionRepository {
    async fn find_by_id(&self, collection_id: Uuid) -> Result<Option<Collection>, DomainError> {
        Ok(self
            .collections
            .lock()
            .map_err(poisoned)?
            .get(&collection_id)
            .cloned())
    }

    async fn save(&self, collection: &Collection) -> Result<(), DomainError> {
        let mut stored = collection.clone();
        stored.collect_and_clear();
        self.collections
            .lock()
            .map_err(poisoned)?
            .insert(stored.id, stored);
        Ok(())
    }
}
