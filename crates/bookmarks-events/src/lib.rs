//! Bookmarks Events — moving domain events between bounded contexts.
//!
//! Events leave an aggregate through a [`publisher::QueuePublisher`], which
//! maps them to their flat wire form and fans them out to the queues named by
//! the [`routing::RoutingTable`]. A [`worker::QueueWorker`] consumes one queue
//! and dispatches each decoded event to the handler registered for its type.

pub mod mapper;
pub mod publisher;
pub mod queue;
pub mod routing;
pub mod worker;
