//! Application layer for the Feeds context.

pub mod event_handlers;
pub mod query_handlers;
pub mod saga;
