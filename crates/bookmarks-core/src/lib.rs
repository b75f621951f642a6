//! Bookmarks Core — shared domain abstractions.
//!
//! This crate defines the fundamental traits and types that all bounded
//! contexts depend on: domain events and the aggregates that raise them, the
//! publish/subscribe ports used to move events between contexts, and the
//! clock, scheduler and state-store seams the feed saga is built on. It
//! contains no broker or cache code.

pub mod aggregate;
pub mod clock;
pub mod error;
pub mod event;
pub mod publisher;
pub mod scheduler;
pub mod state_store;
pub mod subscriber;
