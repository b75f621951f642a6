//! Narrow persistence ports for cards and collections.
//!
//! The relational schema behind these lives outside the event pipeline; only
//! the load/save contract matters here.

use async_trait::async_trait;
use bookmarks_core::error::DomainError;
use uuid::Uuid;

use super::aggregates::{Card, Collection};

/// Loads and saves `Card` aggregates.
#[async_trait]
pub trait CardRepository: Send + Sync {
    /// Loads a card by id.
    async fn find_by_id(&self, card_id: Uuid) -> Result<Option<Card>, DomainError>;

    /// Durably saves a card. Pending events are not persisted.
    async fn save(&self, card: &Card) -> Result<(), DomainError>;
}

/// Loads and saves `Collection` aggregates.
#[async_trait]
pub trait CollectionRepository: Send + Sync {
    /// Loads a collection by id.
    async fn find_by_id(&self, collection_id: Uuid) -> Result<Option<Collection>, DomainError>;

    /// Durably saves a collection. Pending events are not persisted.
    async fn save(&self, collection: &Collection) -> Result<(), DomainError>;
}
