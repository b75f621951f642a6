//! Domain layer for the Feeds context.

pub mod activity;
pub mod pending;
pub mod repository;
