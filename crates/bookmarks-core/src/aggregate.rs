//! Aggregate root abstraction.

use uuid::Uuid;

use crate::event::DomainEvent;

/// Trait for aggregate roots that raise domain events as a side effect of
/// state changes.
///
/// Events are held on the aggregate until the surrounding write has been
/// committed. The unit of work then calls [`AggregateRoot::collect_and_clear`]
/// exactly once and hands the events to a publisher, so nothing is
/// dispatched for a write that never landed.
pub trait AggregateRoot: Send + Sync {
    /// The event type this aggregate produces.
    type Event: DomainEvent;

    /// Returns the aggregate identifier.
    fn aggregate_id(&self) -> Uuid;

    /// Attaches an event to the aggregate's pending list.
    fn raise(&mut self, event: Self::Event);

    /// Returns events raised since the last collection.
    fn uncommitted_events(&self) -> &[Self::Event];

    /// Returns and empties the pending event list.
    fn collect_and_clear(&mut self) -> Vec<Self::Event>;
}
