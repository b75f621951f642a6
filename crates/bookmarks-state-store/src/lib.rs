//! Saga state store implementations.
//!
//! [`in_memory::InMemoryStateStore`] serves single-process deployments and
//! tests; [`redis_store::RedisStateStore`] is shared by every worker replica
//! and is what makes the feed saga's lock hold across processes.

pub mod in_memory;
pub mod redis_store;

use std::time::Duration;

/// Converts a TTL to whole milliseconds, rounding sub-millisecond values up
/// so an entry is never stored without expiry.
pub(crate) fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}
