//! Domain event abstractions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::clock::Clock;

/// Metadata attached to every domain event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventMetadata {
    /// Aggregate this event belongs to.
    pub aggregate_id: Uuid,
    /// When the event occurred, at millisecond precision.
    pub occurred_at: DateTime<Utc>,
}

impl EventMetadata {
    /// Creates metadata stamped with the current time of `clock`.
    ///
    /// The timestamp is truncated to whole milliseconds, which is the
    /// precision carried on the wire.
    #[must_use]
    pub fn now(aggregate_id: Uuid, clock: &dyn Clock) -> Self {
        Self {
            aggregate_id,
            occurred_at: clock.now_millis(),
        }
    }

    /// Rebuilds metadata for an event read back from storage or a queue,
    /// preserving its original occurrence time.
    #[must_use]
    pub fn restored(aggregate_id: Uuid, occurred_at: DateTime<Utc>) -> Self {
        Self {
            aggregate_id,
            occurred_at,
        }
    }
}

/// Trait that all domain events implement.
pub trait DomainEvent: Send + Sync + Clone + std::fmt::Debug + 'static {
    /// Returns the event type name (used for routing and handler lookup).
    fn event_type(&self) -> &'static str;

    /// Returns the metadata for this event.
    fn metadata(&self) -> &EventMetadata;

    /// Returns the identifier of the aggregate that raised the event.
    fn aggregate_id(&self) -> Uuid {
        self.metadata().aggregate_id
    }

    /// Returns when the event occurred.
    fn occurred_at(&self) -> DateTime<Utc> {
        self.metadata().occurred_at
    }
}
