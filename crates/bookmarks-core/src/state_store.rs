//! Saga state store abstraction.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::DomainError;

/// Key/value store holding in-flight saga state.
///
/// Every entry carries a time-to-live, so state and locks left behind by a
/// crashed process disappear on their own. Implementations shared between
/// processes must make [`SagaStateStore::set_if_absent_with_ttl`] and
/// [`SagaStateStore::delete_if_equals`] atomic; the saga's mutual exclusion
/// rests on them.
#[async_trait]
pub trait SagaStateStore: Send + Sync {
    /// Returns the live value stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Infrastructure` if the store is unreachable.
    async fn get(&self, key: &str) -> Result<Option<String>, DomainError>;

    /// Stores `value` under `key`, replacing any previous value and TTL.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Infrastructure` if the store is unreachable.
    async fn set_with_ttl(
        &self,
        key: &str,
        ttl: Duration,
        value: &str,
    ) -> Result<(), DomainError>;

    /// Removes `key` if present.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Infrastructure` if the store is unreachable.
    async fn delete(&self, key: &str) -> Result<(), DomainError>;

    /// Stores `value` under `key` only if no live value exists. Returns
    /// whether the write happened.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Infrastructure` if the store is unreachable.
    async fn set_if_absent_with_ttl(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, DomainError>;

    /// Removes `key` only if its live value equals `expected`. Returns
    /// whether the entry was removed.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Infrastructure` if the store is unreachable.
    async fn delete_if_equals(&self, key: &str, expected: &str) -> Result<bool, DomainError>;
}
