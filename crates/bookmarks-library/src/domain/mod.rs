//! Domain layer for the Library & Collections context.

pub mod aggregates;
pub mod commands;
pub mod events;
pub mod repositories;
