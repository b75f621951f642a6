//! Feed database schema.

use sqlx::PgPool;
use sqlx::migrate::{MigrateError, Migrator};
use tracing::info;

/// Migrations for the feed tables, embedded from the workspace `migrations/`
/// directory.
pub static MIGRATOR: Migrator = sqlx::migrate!("../../migrations");

/// Applies every pending migration to `pool`.
///
/// # Errors
///
/// Returns `MigrateError` if a migration fails or the applied history no
/// longer matches the embedded files.
pub async fn migrate(pool: &PgPool) -> Result<(), MigrateError> {
    MIGRATOR.run(pool).await?;
    info!(migrations = MIGRATOR.iter().count(), "feed schema up to date");
    Ok(())
}
