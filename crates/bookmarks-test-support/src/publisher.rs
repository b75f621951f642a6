//! Test publishers — mock `EventPublisher` implementations for tests.

use std::sync::Mutex;

use async_trait::async_trait;
use bookmarks_core::error::DomainError;
use bookmarks_core::event::DomainEvent;
use bookmarks_core::publisher::EventPublisher;

/// A publisher that records every event it is given and always succeeds.
#[derive(Debug)]
pub struct RecordingEventPublisher<E> {
    published: Mutex<Vec<E>>,
}

impl<E> Default for RecordingEventPublisher<E> {
    fn default() -> Self {
        Self {
            published: Mutex::new(Vec::new()),
        }
    }
}

impl<E: Clone> RecordingEventPublisher<E> {
    /// Returns a snapshot of all events published so far.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn published(&self) -> Vec<E> {
        self.published.lock().unwrap().clone()
    }
}

#[async_trait]
impl<E: DomainEvent> EventPublisher<E> for RecordingEventPublisher<E> {
    async fn publish_events(&self, events: &[E]) -> Result<(), DomainError> {
        self.published.lock().unwrap().extend_from_slice(events);
        Ok(())
    }
}

/// A publisher that always returns an infrastructure error. Useful for
/// testing that publication failures never undo a committed write.
#[derive(Debug)]
pub struct FailingEventPublisher;

#[async_trait]
impl<E: DomainEvent> EventPublisher<E> for FailingEventPublisher {
    async fn publish_events(&self, _events: &[E]) -> Result<(), DomainError> {
        Err(DomainError::Infrastructure("broker unreachable".into()))
    }
}
