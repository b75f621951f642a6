//! Event subscription port.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::DomainError;
use crate::event::DomainEvent;

/// Handler for one kind of domain event delivered from a queue.
///
/// Delivery is at-least-once, so implementations must tolerate seeing the
/// same event more than once.
#[async_trait]
pub trait EventHandler<E: DomainEvent>: Send + Sync {
    /// Processes an event.
    ///
    /// # Errors
    ///
    /// Any error leaves the delivery unacknowledged; the broker redelivers
    /// it according to the queue's retry policy.
    async fn handle(&self, event: &E) -> Result<(), DomainError>;

    /// Handler name for logging.
    fn name(&self) -> &'static str;
}

/// Port for consuming domain events from a queue.
#[async_trait]
pub trait EventSubscriber<E: DomainEvent>: Send + Sync {
    /// Registers `handler` for `event_type`. A later registration for the
    /// same type replaces the earlier one.
    fn subscribe(&self, event_type: &str, handler: Arc<dyn EventHandler<E>>);

    /// Begins consuming.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` if the subscriber is already running.
    async fn start(&self) -> Result<(), DomainError>;

    /// Stops dequeuing and drains in-flight work.
    async fn stop(&self);
}
