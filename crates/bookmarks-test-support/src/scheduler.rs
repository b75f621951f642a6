//! Test scheduler — runs scheduled jobs only when virtual time is advanced.

use std::sync::Mutex;
use std::time::Duration;

use bookmarks_core::clock::Clock;
use bookmarks_core::scheduler::{ScheduledJob, ScheduledTask, Scheduler};
use chrono::{DateTime, TimeDelta, Utc};

use crate::clock::ManualClock;

struct PendingJob {
    due: DateTime<Utc>,
    sequence: u64,
    task: ScheduledTask,
    job: ScheduledJob,
}

#[derive(Default)]
struct Queue {
    jobs: Vec<PendingJob>,
    next_sequence: u64,
}

/// A `Scheduler` driven by a shared `ManualClock`.
///
/// Jobs never run on their own. [`ManualScheduler::advance`] moves the
/// clock forward and runs every due job inline, in due-time order, with the
/// clock set to each job's due time while it runs.
pub struct ManualScheduler {
    clock: ManualClock,
    queue: Mutex<Queue>,
}

impl ManualScheduler {
    /// Creates a scheduler that reads and moves `clock`.
    #[must_use]
    pub fn new(clock: ManualClock) -> Self {
        Self {
            clock,
            queue: Mutex::new(Queue::default()),
        }
    }

    /// Number of jobs scheduled and neither run nor cancelled.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn pending(&self) -> usize {
        self.queue
            .lock()
            .unwrap()
            .jobs
            .iter()
            .filter(|pending| !pending.task.is_cancelled())
            .count()
    }

    /// Advances virtual time by `by`, running every job that falls due.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned or `by` overflows `TimeDelta`.
    pub async fn advance(&self, by: Duration) {
        let delta = TimeDelta::from_std(by).expect("duration fits in TimeDelta");
        let target = self.clock.now() + delta;
        while let Some(pending) = self.take_next_due(target) {
            if pending.due > self.clock.now() {
                self.clock.set(pending.due);
            }
            if !pending.task.is_cancelled() {
                pending.job.await;
            }
        }
        self.clock.set(target);
    }

    fn take_next_due(&self, target: DateTime<Utc>) -> Option<PendingJob> {
        let mut queue = self.queue.lock().unwrap();
        let index = queue
            .jobs
            .iter()
            .enumerate()
            .filter(|(_, pending)| pending.due <= target)
            .min_by_key(|(_, pending)| (pending.due, pending.sequence))
            .map(|(index, _)| index)?;
        Some(queue.jobs.swap_remove(index))
    }
}

impl Scheduler for ManualScheduler {
    fn schedule(&self, delay: Duration, job: ScheduledJob) -> ScheduledTask {
        let task = ScheduledTask::default();
        let due = self.clock.now() + TimeDelta::from_std(delay).expect("delay fits in TimeDelta");
        let mut queue = self.queue.lock().unwrap();
        let sequence = queue.next_sequence;
        queue.next_sequence += 1;
        queue.jobs.push(PendingJob {
            due,
            sequence,
            task: task.clone(),
            job,
        });
        task
    }
}
