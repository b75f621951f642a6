//! Domain error types.

use thiserror::Error;
use uuid::Uuid;

/// Error returned across every port in the workspace.
///
/// Adapters map their own failures (Redis, PostgreSQL, queue codecs) into
/// [`DomainError::Infrastructure`] at the trait boundary.
#[derive(Debug, Error)]
pub enum DomainError {
    /// No aggregate exists with this id.
    #[error("aggregate not found: {0}")]
    AggregateNotFound(Uuid),

    /// The request breaks a business rule.
    #[error("validation error: {0}")]
    Validation(String),

    /// A backing service failed.
    #[error("infrastructure error: {0}")]
    Infrastructure(String),
}

impl DomainError {
    /// Returns `true` if repeating the operation may succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Infrastructure(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_infrastructure_errors_are_transient() {
        assert!(DomainError::Infrastructure("redis down".into()).is_transient());
        assert!(!DomainError::Validation("duplicate".into()).is_transient());
        assert!(!DomainError::AggregateNotFound(Uuid::nil()).is_transient());
    }
}
