//! Saga state for an open aggregation window.

use std::collections::BTreeSet;
use std::time::Duration;

use bookmarks_library::domain::events::{LibraryEvent, LibraryEventKind};
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What a single event contributes to a feed activity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedContribution {
    /// The collected card.
    pub card_id: Uuid,
    /// The user who collected it.
    pub actor_id: String,
    /// How the card was collected.
    pub source: ContributionSource,
}

/// How a card reached the actor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContributionSource {
    /// Saved into the actor's library.
    LibrarySave,
    /// Added to one of the actor's collections.
    CollectionAdd {
        /// The collection the card was added to.
        collection_id: Uuid,
    },
}

impl FeedContribution {
    /// Extracts the contribution carried by a library event.
    #[must_use]
    pub fn from_event(event: &LibraryEvent) -> Self {
        match &event.kind {
            LibraryEventKind::CardAddedToLibrary(payload) => Self {
                card_id: payload.card_id,
                actor_id: payload.curator_id.clone(),
                source: ContributionSource::LibrarySave,
            },
            LibraryEventKind::CardAddedToCollection(payload) => Self {
                card_id: payload.card_id,
                actor_id: payload.added_by.clone(),
                source: ContributionSource::CollectionAdd {
                    collection_id: payload.collection_id,
                },
            },
        }
    }

    /// Key shared by every contribution that aggregates together:
    /// `{card_id}|{actor_id}`.
    #[must_use]
    pub fn aggregation_key(&self) -> String {
        format!("{}|{}", self.card_id, self.actor_id)
    }
}

/// Contributions gathered for one key while its window is open.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingActivity {
    /// The collected card.
    pub card_id: Uuid,
    /// The user who collected it.
    pub actor_id: String,
    /// Collections the card was added to during the window.
    pub collection_ids: BTreeSet<Uuid>,
    /// When the first contribution arrived.
    pub window_start: DateTime<Utc>,
    /// Whether a library save arrived.
    pub has_library_event: bool,
    /// Whether any collection add arrived.
    pub has_collection_events: bool,
}

impl PendingActivity {
    /// Opens a window at `now` seeded with `contribution`.
    #[must_use]
    pub fn open(contribution: &FeedContribution, now: DateTime<Utc>) -> Self {
        let mut pending = Self {
            card_id: contribution.card_id,
            actor_id: contribution.actor_id.clone(),
            collection_ids: BTreeSet::new(),
            window_start: now,
            has_library_event: false,
            has_collection_events: false,
        };
        pending.merge(contribution);
        pending
    }

    /// Folds a contribution in. Merging the same contribution twice leaves
    /// the state unchanged.
    pub fn merge(&mut self, contribution: &FeedContribution) {
        match contribution.source {
            ContributionSource::LibrarySave => self.has_library_event = true,
            ContributionSource::CollectionAdd { collection_id } => {
                self.collection_ids.insert(collection_id);
                self.has_collection_events = true;
            }
        }
    }

    /// When a window of length `window` opened at `window_start` closes.
    #[must_use]
    pub fn window_end(&self, window: Duration) -> DateTime<Utc> {
        self.window_start + TimeDelta::from_std(window).unwrap_or(TimeDelta::MAX)
    }

    /// Returns `true` while `now` is inside the window.
    #[must_use]
    pub fn is_open_at(&self, now: DateTime<Utc>, window: Duration) -> bool {
        now < self.window_end(window)
    }
}
