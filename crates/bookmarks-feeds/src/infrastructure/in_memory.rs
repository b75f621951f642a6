//! In-memory feed repository.

use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use bookmarks_core::error::DomainError;

use crate::domain::activity::Activity;
use crate::domain::repository::FeedRepository;

/// Process-local feed store.
#[derive(Debug, Default)]
pub struct InMemoryFeedRepository {
    activities: Mutex<Vec<Activity>>,
}

impl InMemoryFeedRepository {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every stored activity in insertion order.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Infrastructure` if the internal mutex is poisoned.
    pub fn all(&self) -> Result<Vec<Activity>, DomainError> {
        Ok(self.lock()?.clone())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Vec<Activity>>, DomainError> {
        self.activities
            .lock()
            .map_err(|_| DomainError::Infrastructure("feed store mutex poisoned".into()))
    }
}

#[async_trait]
impl FeedRepository for InMemoryFeedRepository {
    async fn add_activity(&self, activity: &Activity) -> Result<(), DomainError> {
        let mut activities = self.lock()?;
        if !activities.iter().any(|stored| stored.id == activity.id) {
            activities.push(activity.clone());
        }
        Ok(())
    }

    async fn activities_for_actor(
        &self,
        actor_id: &str,
        limit: usize,
    ) -> Result<Vec<Activity>, DomainError> {
        let mut matching: Vec<Activity> = self
            .lock()?
            .iter()
            .filter(|activity| activity.actor_id == actor_id)
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        matching.truncate(limit);
        Ok(matching)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::activity::{ActivityMetadata, ActivityType};
    use chrono::{DateTime, TimeDelta, TimeZone, Utc};
    use uuid::Uuid;

    fn activity(actor_id: &str, created_at: DateTime<Utc>) -> Activity {
        Activity {
            id: Uuid::new_v4(),
            actor_id: actor_id.to_owned(),
            activity_type: ActivityType::CardCollected,
            metadata: ActivityMetadata {
                card_id: Uuid::new_v4(),
                collection_ids: None,
            },
            created_at,
        }
    }

    #[tokio::test]
    async fn test_activities_for_actor_are_newest_first_and_limited() {
        // Arrange
        let repo = InMemoryFeedRepository::new();
        let start = Utc.with_ymd_and_hms(2026, 1, 15, 10, 0, 0).unwrap();
        for minutes in 0..3 {
            repo.add_activity(&activity("did:plc:alice", start + TimeDelta::minutes(minutes)))
                .await
                .unwrap();
        }
        repo.add_activity(&activity("did:plc:bob", start)).await.unwrap();

        // Act
        let feed = repo.activities_for_actor("did:plc:alice", 2).await.unwrap();

        // Assert
        assert_eq!(feed.len(), 2);
        assert_eq!(feed[0].created_at, start + TimeDelta::minutes(2));
        assert_eq!(feed[1].created_at, start + TimeDelta::minutes(1));
    }

    #[tokio::test]
    async fn test_adding_same_activity_twice_stores_it_once() {
        let repo = InMemoryFeedRepository::new();
        let entry = activity("did:plc:alice", Utc::now());

        repo.add_activity(&entry).await.unwrap();
        repo.add_activity(&entry).await.unwrap();

        assert_eq!(repo.all().unwrap(), vec![entry]);
    }
}
