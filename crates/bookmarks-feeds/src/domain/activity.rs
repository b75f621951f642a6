//! Feed activities.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::pending::PendingActivity;

/// Kinds of feed activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActivityType {
    /// A user saved a card and/or filed it into collections.
    CardCollected,
}

impl ActivityType {
    /// Stored name of the activity type.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            ActivityType::CardCollected => "CardCollected",
        }
    }
}

impl fmt::Display for ActivityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActivityType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CardCollected" => Ok(ActivityType::CardCollected),
            other => Err(format!("unknown activity type: {other}")),
        }
    }
}

/// Activity details.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityMetadata {
    /// The collected card.
    pub card_id: Uuid,
    /// Collections the card was added to, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collection_ids: Option<Vec<Uuid>>,
}

/// An entry in a user's feed. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Activity {
    /// Activity identifier.
    pub id: Uuid,
    /// The user the activity is about.
    pub actor_id: String,
    /// Activity kind.
    #[serde(rename = "type")]
    pub activity_type: ActivityType,
    /// Activity details.
    pub metadata: ActivityMetadata,
    /// When the activity was recorded.
    pub created_at: DateTime<Utc>,
}

impl Activity {
    /// Builds the `CardCollected` activity for a closed window.
    ///
    /// Collection ids come out in sorted order; a window with no collection
    /// adds yields `collection_ids: None`.
    #[must_use]
    pub fn card_collected(pending: &PendingActivity, created_at: DateTime<Utc>) -> Self {
        let collection_ids = (!pending.collection_ids.is_empty())
            .then(|| pending.collection_ids.iter().copied().collect());
        Self {
            id: Uuid::new_v4(),
            actor_id: pending.actor_id.clone(),
            activity_type: ActivityType::CardCollected,
            metadata: ActivityMetadata {
                card_id: pending.card_id,
                collection_ids,
            },
            created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::pending::{ContributionSource, FeedContribution};
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 15, 10, 0, 3).unwrap()
    }

    #[test]
    fn test_library_only_window_has_no_collection_ids() {
        let card_id = Uuid::new_v4();
        let pending = PendingActivity::open(
            &FeedContribution {
                card_id,
                actor_id: "did:plc:alice".to_owned(),
                source: ContributionSource::LibrarySave,
            },
            now(),
        );

        let activity = Activity::card_collected(&pending, now());

        assert_eq!(activity.activity_type, ActivityType::CardCollected);
        assert_eq!(activity.actor_id, "did:plc:alice");
        assert_eq!(activity.metadata.card_id, card_id);
        assert_eq!(activity.metadata.collection_ids, None);
        assert_eq!(activity.created_at, now());
    }

    #[test]
    fn test_collection_ids_are_carried_over() {
        let collection_id = Uuid::new_v4();
        let pending = PendingActivity::open(
            &FeedContribution {
                card_id: Uuid::new_v4(),
                actor_id: "did:plc:alice".to_owned(),
                source: ContributionSource::CollectionAdd { collection_id },
            },
            now(),
        );

        let activity = Activity::card_collected(&pending, now());

        assert_eq!(activity.metadata.collection_ids, Some(vec![collection_id]));
    }

    #[test]
    fn test_activity_type_parses_its_own_name() {
        assert_eq!(
            ActivityType::CardCollected.as_str().parse::<ActivityType>(),
            Ok(ActivityType::CardCollected)
        );
        assert!("CardLiked".parse::<ActivityType>().is_err());
    }
}
