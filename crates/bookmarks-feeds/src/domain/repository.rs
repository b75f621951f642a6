//! Feed storage port.

use async_trait::async_trait;
use bookmarks_core::error::DomainError;

use super::activity::Activity;

/// Repository for feed activities.
#[async_trait]
pub trait FeedRepository: Send + Sync {
    /// Stores an activity. Storing an activity whose id already exists is a
    /// no-op.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Infrastructure` if the write fails.
    async fn add_activity(&self, activity: &Activity) -> Result<(), DomainError>;

    /// Returns up to `limit` of the actor's activities, newest first.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Infrastructure` if the read fails.
    async fn activities_for_actor(
        &self,
        actor_id: &str,
        limit: usize,
    ) -> Result<Vec<Activity>, DomainError>;
}
