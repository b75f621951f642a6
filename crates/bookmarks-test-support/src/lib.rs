//! Shared test mocks and utilities for the bookmarks event pipeline.

mod clock;
mod publisher;
mod scheduler;

pub use clock::{FixedClock, ManualClock};
pub use publisher::{FailingEventPublisher, RecordingEventPublisher};
pub use scheduler::ManualScheduler;
