//! Commands for the Library & Collections context.

use uuid::Uuid;

/// Command to save a card into a curator's library.
#[derive(Debug, Clone)]
pub struct AddCardToLibrary {
    /// The card identifier.
    pub card_id: Uuid,
    /// DID of the curator saving the card.
    pub curator_id: String,
}

/// Command to add a card to a collection.
#[derive(Debug, Clone)]
pub struct AddCardToCollection {
    /// The collection identifier.
    pub collection_id: Uuid,
    /// The card identifier.
    pub card_id: Uuid,
    /// DID of the user adding the card.
    pub added_by: String,
}
