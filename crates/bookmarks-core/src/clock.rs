//! Time source seam.
//!
//! Saga windows, TTLs and event timestamps all read time through [`Clock`],
//! so tests can pin or step it.

use chrono::{DateTime, SubsecRound, Utc};

/// Source of the current time.
pub trait Clock: Send + Sync {
    /// Returns the current time.
    fn now(&self) -> DateTime<Utc>;

    /// Returns the current time truncated to whole milliseconds, the
    /// precision event timestamps carry on the wire.
    fn now_millis(&self) -> DateTime<Utc> {
        self.now().trunc_subsecs(3)
    }
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
