//! `PostgreSQL` implementation of the `FeedRepository` trait.

use async_trait::async_trait;
use bookmarks_core::error::DomainError;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::domain::activity::{Activity, ActivityMetadata, ActivityType};
use crate::domain::repository::FeedRepository;

/// PostgreSQL-backed feed repository over the `feed_activities` table.
#[derive(Debug, Clone)]
pub struct PgFeedRepository {
    pool: PgPool,
}

impl PgFeedRepository {
    /// Creates a new `PgFeedRepository`.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(FromRow)]
struct ActivityRow {
    id: Uuid,
    actor_id: String,
    activity_type: String,
    metadata: serde_json::Value,
    created_at: DateTime<Utc>,
}

impl TryFrom<ActivityRow> for Activity {
    type Error = DomainError;

    fn try_from(row: ActivityRow) -> Result<Self, Self::Error> {
        let activity_type = row
            .activity_type
            .parse::<ActivityType>()
            .map_err(DomainError::Infrastructure)?;
        let metadata: ActivityMetadata = serde_json::from_value(row.metadata).map_err(|e| {
            DomainError::Infrastructure(format!("malformed metadata for activity {}: {e}", row.id))
        })?;
        Ok(Activity {
            id: row.id,
            actor_id: row.actor_id,
            activity_type,
            metadata,
            created_at: row.created_at,
        })
    }
}

fn db_error(err: sqlx::Error) -> DomainError {
    DomainError::Infrastructure(format!("database error: {err}"))
}

#[async_trait]
impl FeedRepository for PgFeedRepository {
    async fn add_activity(&self, activity: &Activity) -> Result<(), DomainError> {
        let metadata = serde_json::to_value(&activity.metadata)
            .map_err(|e| DomainError::Infrastructure(format!("failed to encode metadata: {e}")))?;

        sqlx::query(
            "INSERT INTO feed_activities (id, actor_id, activity_type, metadata, created_at) \
             VALUES ($1, $2, $3, $4, $5) \
             ON CONFLICT (id) DO NOTHING",
        )
        .bind(activity.id)
        .bind(&activity.actor_id)
        .bind(activity.activity_type.as_str())
        .bind(metadata)
        .bind(activity.created_at)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(())
    }

    async fn activities_for_actor(
        &self,
        actor_id: &str,
        limit: usize,
    ) -> Result<Vec<Activity>, DomainError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows: Vec<ActivityRow> = sqlx::query_as(
            "SELECT id, actor_id, activity_type, metadata, created_at \
             FROM feed_activities \
             WHERE actor_id = $1 \
             ORDER BY created_at DESC \
             LIMIT $2",
        )
        .bind(actor_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        rows.into_iter().map(Activity::try_from).collect()
    }
}
