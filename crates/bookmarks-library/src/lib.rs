//! Bookmarks — Library & Collections bounded context.
//!
//! Owns cards saved into curators' libraries and the collections they are
//! grouped into. State changes raise the cross-module domain events that
//! feeds, search and analytics consume.

pub mod application;
pub mod domain;
pub mod infrastructure;
