//! Delayed-task scheduling abstraction.
//!
//! The feed saga defers its flush by the aggregation window. Routing that
//! delay through a trait lets production use tokio timers while tests drive
//! virtual time by hand.

use std::time::Duration;

use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;

/// A unit of deferred work.
pub type ScheduledJob = BoxFuture<'static, ()>;

/// Handle to a scheduled job. Dropping the handle does not cancel the job.
#[derive(Debug, Clone, Default)]
pub struct ScheduledTask {
    token: CancellationToken,
}

impl ScheduledTask {
    /// Wraps a cancellation token observed by the scheduler.
    #[must_use]
    pub fn new(token: CancellationToken) -> Self {
        Self { token }
    }

    /// Prevents the job from running if it has not started yet.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Returns `true` once [`ScheduledTask::cancel`] has been called.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Returns the token the scheduler should observe.
    #[must_use]
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

/// Abstraction over deferred execution.
pub trait Scheduler: Send + Sync {
    /// Runs `job` once `delay` has elapsed unless the returned task is
    /// cancelled first.
    fn schedule(&self, delay: Duration, job: ScheduledJob) -> ScheduledTask;
}

/// Production scheduler backed by `tokio::time`.
///
/// Must be used from within a tokio runtime.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioScheduler;

impl Scheduler for TokioScheduler {
    fn schedule(&self, delay: Duration, job: ScheduledJob) -> ScheduledTask {
        let task = ScheduledTask::default();
        let token = task.token().clone();
        tokio::spawn(async move {
            tokio::select! {
                () = token.cancelled() => {}
                () = tokio::time::sleep(delay) => job.await,
            }
        });
        task
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_tokio_scheduler_runs_job_after_delay() {
        // Arrange
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&runs);

        // Act
        let _task = TokioScheduler.schedule(
            Duration::from_secs(3),
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );
        tokio::time::sleep(Duration::from_millis(2_999)).await;
        let before = runs.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(2)).await;
        tokio::task::yield_now().await;

        // Assert
        assert_eq!(before, 0);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_task_never_runs() {
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&runs);

        let task = TokioScheduler.schedule(
            Duration::from_secs(1),
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );
        task.cancel();
        tokio::time::sleep(Duration::from_secs(2)).await;
        tokio::task::yield_now().await;

        assert!(task.is_cancelled());
        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }
}
