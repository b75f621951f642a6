//! Bookmarks — Feeds bounded context.
//!
//! Turns library and collection events into user-facing feed activities.
//! Bursts of related events for the same card and actor are collapsed into
//! a single `CardCollected` activity by the [`application::saga`].

pub mod application;
pub mod domain;
pub mod infrastructure;
