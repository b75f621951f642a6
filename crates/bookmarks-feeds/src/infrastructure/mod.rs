//! Infrastructure adapters for the Feeds context.

pub mod in_memory;
pub mod pg_feed_repository;
pub mod schema;
