//! Event publication port.

use async_trait::async_trait;

use crate::error::DomainError;
use crate::event::DomainEvent;

/// Port for handing committed domain events to asynchronous consumers.
///
/// Publication is a secondary effect of the business write that raised the
/// events. Callers must not roll that write back when this fails; they log
/// and surface a warning instead.
#[async_trait]
pub trait EventPublisher<E: DomainEvent>: Send + Sync {
    /// Publishes every event to all of its target queues.
    ///
    /// There is no atomicity across events or queues: an error may leave
    /// some targets enqueued and others not.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Infrastructure` if serialization or the broker
    /// fails.
    async fn publish_events(&self, events: &[E]) -> Result<(), DomainError>;
}
