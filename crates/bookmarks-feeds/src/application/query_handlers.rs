//! Query handlers for the Feeds context.

use bookmarks_core::error::DomainError;
use serde::Serialize;

use crate::domain::activity::Activity;
use crate::domain::repository::FeedRepository;

/// Largest page a single feed read returns.
pub const MAX_FEED_LIMIT: usize = 100;

/// Read-only view of a user's feed.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActorFeedView {
    /// The user whose feed this is.
    pub actor_id: String,
    /// Activities, newest first.
    pub activities: Vec<Activity>,
}

/// Retrieves up to `limit` of an actor's feed activities, newest first.
/// Limits above [`MAX_FEED_LIMIT`] are clamped.
///
/// # Errors
///
/// Returns `DomainError::Validation` if `actor_id` is blank or `limit` is 0.
/// Returns `DomainError::Infrastructure` if the feed store fails.
pub async fn get_actor_feed(
    actor_id: &str,
    limit: usize,
    repo: &dyn FeedRepository,
) -> Result<ActorFeedView, DomainError> {
    if actor_id.trim().is_empty() {
        return Err(DomainError::Validation("actor id must not be blank".into()));
    }
    if limit == 0 {
        return Err(DomainError::Validation("feed limit must be at least 1".into()));
    }

    let activities = repo
        .activities_for_actor(actor_id, limit.min(MAX_FEED_LIMIT))
        .await?;
    Ok(ActorFeedView {
        actor_id: actor_id.to_owned(),
        activities,
    })
}
