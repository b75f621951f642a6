//! Redis-backed queues shared by every worker replica.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, RedisError, Script};
use tracing::{error, info, warn};

use super::{
    Broker, DeliveryPolicy, FailureOutcome, JobQueue, JobRecord, QueueError, QueueJob,
    ReceivedJob,
};

/// Moves up to `ARGV[2]` jobs whose retry time (`ARGV[1]`, epoch millis) has
/// passed from the delayed set `KEYS[1]` onto the wait list `KEYS[2]`.
const PROMOTE_DUE_SCRIPT: &str = r"
local due = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', ARGV[1], 'LIMIT', 0, tonumber(ARGV[2]))
for _, job in ipairs(due) do
    redis.call('ZREM', KEYS[1], job)
    redis.call('LPUSH', KEYS[2], job)
end
return #due
";

/// Takes the oldest job from the wait list `KEYS[1]`, moves it onto the
/// active list `KEYS[2]` and records its lease deadline `ARGV[1]` in the
/// lease set `KEYS[3]`.
const TAKE_SCRIPT: &str = r"
local job = redis.call('RPOP', KEYS[1])
if not job then
    return false
end
redis.call('LPUSH', KEYS[2], job)
redis.call('ZADD', KEYS[3], ARGV[1], job)
return job
";

/// Takes back the delivered job `ARGV[1]` if its lease in `KEYS[1]` is still
/// recorded, removing it from the active list `KEYS[2]` and pushing `ARGV[2]`
/// onto the list `KEYS[3]`. `ARGV[3]` bounds that list: negative keeps every
/// entry, zero drops `ARGV[2]`, otherwise the list is trimmed to that many.
/// Returns 1 if this call took the job.
const RECLAIM_SCRIPT: &str = r"
if redis.call('ZREM', KEYS[1], ARGV[1]) == 0 then
    return 0
end
redis.call('LREM', KEYS[2], 1, ARGV[1])
local keep = tonumber(ARGV[3])
if keep ~= 0 then
    redis.call('LPUSH', KEYS[3], ARGV[2])
end
if keep > 0 then
    redis.call('LTRIM', KEYS[3], 0, keep - 1)
end
return 1
";

const PROMOTE_BATCH: usize = 100;
const RECLAIM_BATCH: usize = 100;

/// Failure reason recorded for jobs whose consumer stopped settling them.
pub const STALLED_REASON: &str = "job stalled: lease expired before it was settled";

fn backend_error(err: RedisError) -> QueueError {
    QueueError::Backend(err.to_string())
}

/// `LTRIM` stop index that keeps the newest `keep` entries.
fn trim_stop(keep: usize) -> i64 {
    i64::try_from(keep).unwrap_or(i64::MAX) - 1
}

fn epoch_millis_after(delay: Duration) -> i64 {
    let delay = i64::try_from(delay.as_millis()).unwrap_or(i64::MAX);
    Utc::now().timestamp_millis().saturating_add(delay)
}

/// History bound in the form `RECLAIM_SCRIPT` expects.
fn history_bound(keep: usize) -> i64 {
    i64::try_from(keep).unwrap_or(i64::MAX)
}

/// Where a job taken back from a dead consumer goes.
#[derive(Debug, PartialEq)]
enum Reclaimed {
    /// Back onto the wait list, one attempt spent.
    Requeue(String),
    /// Into the failed history.
    Failed(String),
}

/// Decides what happens to the stalled delivery `receipt`: the lost
/// delivery counts as a failed attempt, so the job is requeued while
/// attempts remain. Unreadable jobs go to the failed history as stored.
fn reclaim_stalled(policy: &DeliveryPolicy, receipt: &str) -> Result<Reclaimed, QueueError> {
    let Ok(mut job) = serde_json::from_str::<QueueJob>(receipt) else {
        return Ok(Reclaimed::Failed(receipt.to_owned()));
    };
    job.attempts_made += 1;
    if job.attempts_made < policy.attempts {
        Ok(Reclaimed::Requeue(serde_json::to_string(&job)?))
    } else {
        let entry = JobRecord::failed(job, STALLED_REASON);
        Ok(Reclaimed::Failed(serde_json::to_string(&entry)?))
    }
}

struct QueueKeys {
    wait: String,
    active: String,
    leases: String,
    delayed: String,
    completed: String,
    failed: String,
}

impl QueueKeys {
    fn new(prefix: &str, name: &str) -> Self {
        let base = format!("{prefix}:queue:{name}");
        Self {
            wait: format!("{base}:wait"),
            active: format!("{base}:active"),
            leases: format!("{base}:leases"),
            delayed: format!("{base}:delayed"),
            completed: format!("{base}:completed"),
            failed: format!("{base}:failed"),
        }
    }
}

/// A queue stored in Redis.
///
/// Layout under `{prefix}:queue:{name}`:
/// - `wait`: list of ready jobs, pushed on the left and taken from the right
/// - `active`: list of delivered, unsettled jobs
/// - `leases`: sorted set of delivered jobs scored by lease deadline
/// - `delayed`: sorted set of jobs awaiting retry, scored by ready time
/// - `completed` / `failed`: capped history lists, newest first
///
/// Jobs are stored as JSON; the exact string doubles as the receipt used to
/// remove a job from `active` when it is settled.
///
/// A delivery holds a lease of [`DeliveryPolicy::lease`]. Every `dequeue`
/// first takes back deliveries whose lease ran out, so a job whose consumer
/// crashed is delivered again with one attempt spent.
pub struct RedisJobQueue {
    conn: ConnectionManager,
    name: String,
    policy: DeliveryPolicy,
    keys: QueueKeys,
    promote_due: Script,
    take: Script,
    reclaim: Script,
}

impl RedisJobQueue {
    /// Creates a client for queue `name` under `key_prefix`.
    #[must_use]
    pub fn new(
        conn: ConnectionManager,
        key_prefix: &str,
        name: &str,
        policy: DeliveryPolicy,
    ) -> Self {
        Self {
            conn,
            name: name.to_owned(),
            policy,
            keys: QueueKeys::new(key_prefix, name),
            promote_due: Script::new(PROMOTE_DUE_SCRIPT),
            take: Script::new(TAKE_SCRIPT),
            reclaim: Script::new(RECLAIM_SCRIPT),
        }
    }

    /// Settles an active job: removes it from `active` and its lease and,
    /// when `keep` is non-zero, records `entry` in `history`.
    async fn settle(
        &self,
        receipt: &str,
        history: &str,
        entry: &str,
        keep: usize,
    ) -> Result<(), QueueError> {
        let mut conn = self.conn.clone();
        let mut pipe = redis::pipe();
        pipe.atomic()
            .cmd("LREM")
            .arg(&self.keys.active)
            .arg(1)
            .arg(receipt)
            .ignore()
            .cmd("ZREM")
            .arg(&self.keys.leases)
            .arg(receipt)
            .ignore();
        if keep > 0 {
            pipe.cmd("LPUSH")
                .arg(history)
                .arg(entry)
                .ignore()
                .cmd("LTRIM")
                .arg(history)
                .arg(0)
                .arg(trim_stop(keep))
                .ignore();
        }
        let _: () = pipe.query_async(&mut conn).await.map_err(backend_error)?;
        Ok(())
    }

    /// Takes back deliveries whose lease has run out.
    async fn reclaim_expired(&self, conn: &mut ConnectionManager) -> Result<(), QueueError> {
        let expired: Vec<String> = redis::cmd("ZRANGEBYSCORE")
            .arg(&self.keys.leases)
            .arg("-inf")
            .arg(Utc::now().timestamp_millis())
            .arg("LIMIT")
            .arg(0)
            .arg(RECLAIM_BATCH)
            .query_async(conn)
            .await
            .map_err(backend_error)?;

        for receipt in expired {
            let outcome = reclaim_stalled(&self.policy, &receipt)?;
            let requeued = matches!(outcome, Reclaimed::Requeue(_));
            let (target, entry, bound) = match outcome {
                Reclaimed::Requeue(entry) => (&self.keys.wait, entry, -1),
                Reclaimed::Failed(entry) => (
                    &self.keys.failed,
                    entry,
                    history_bound(self.policy.keep_failed),
                ),
            };
            let taken: i64 = self
                .reclaim
                .key(&self.keys.leases)
                .key(&self.keys.active)
                .key(target)
                .arg(&receipt)
                .arg(entry)
                .arg(bound)
                .invoke_async(conn)
                .await
                .map_err(backend_error)?;
            if taken == 1 {
                warn!(queue = %self.name, requeued, "reclaimed stalled job");
            }
        }
        Ok(())
    }
}

#[async_trait]
impl JobQueue for RedisJobQueue {
    fn name(&self) -> &str {
        &self.name
    }

    fn policy(&self) -> DeliveryPolicy {
        self.policy
    }

    async fn enqueue(&self, job: QueueJob) -> Result<(), QueueError> {
        let raw = serde_json::to_string(&job)?;
        let mut conn = self.conn.clone();
        let _: i64 = conn
            .lpush(&self.keys.wait, raw)
            .await
            .map_err(backend_error)?;
        Ok(())
    }

    async fn dequeue(&self) -> Result<Option<ReceivedJob>, QueueError> {
        let mut conn = self.conn.clone();
        self.reclaim_expired(&mut conn).await?;
        let _: i64 = self
            .promote_due
            .key(&self.keys.delayed)
            .key(&self.keys.wait)
            .arg(Utc::now().timestamp_millis())
            .arg(PROMOTE_BATCH)
            .invoke_async(&mut conn)
            .await
            .map_err(backend_error)?;

        let raw: Option<String> = self
            .take
            .key(&self.keys.wait)
            .key(&self.keys.active)
            .key(&self.keys.leases)
            .arg(epoch_millis_after(self.policy.lease()))
            .invoke_async(&mut conn)
            .await
            .map_err(backend_error)?;
        let Some(raw) = raw else {
            return Ok(None);
        };

        match serde_json::from_str::<QueueJob>(&raw) {
            Ok(job) => Ok(Some(ReceivedJob::new(job, raw))),
            Err(err) => {
                error!(queue = %self.name, error = %err, "unreadable job moved to failed list");
                self.settle(&raw, &self.keys.failed, &raw, self.policy.keep_failed)
                    .await?;
                Ok(None)
            }
        }
    }

    async fn complete(&self, received: ReceivedJob) -> Result<(), QueueError> {
        let entry = serde_json::to_string(&JobRecord::completed(received.job))?;
        self.settle(
            &received.receipt,
            &self.keys.completed,
            &entry,
            self.policy.keep_completed,
        )
        .await
    }

    async fn fail(
        &self,
        received: ReceivedJob,
        reason: &str,
    ) -> Result<FailureOutcome, QueueError> {
        let mut job = received.job;
        job.attempts_made += 1;

        let Some(delay) = self.policy.retry_delay(job.attempts_made) else {
            let entry = serde_json::to_string(&JobRecord::failed(job, reason))?;
            self.settle(
                &received.receipt,
                &self.keys.failed,
                &entry,
                self.policy.keep_failed,
            )
            .await?;
            return Ok(FailureOutcome::Exhausted);
        };

        let retry = serde_json::to_string(&job)?;
        let mut conn = self.conn.clone();
        let _: () = redis::pipe()
            .atomic()
            .cmd("LREM")
            .arg(&self.keys.active)
            .arg(1)
            .arg(&received.receipt)
            .ignore()
            .cmd("ZREM")
            .arg(&self.keys.leases)
            .arg(&received.receipt)
            .ignore()
            .cmd("ZADD")
            .arg(&self.keys.delayed)
            .arg(epoch_millis_after(delay))
            .arg(retry)
            .ignore()
            .query_async(&mut conn)
            .await
            .map_err(backend_error)?;
        Ok(FailureOutcome::Retrying { delay })
    }

    async fn discard(&self, received: ReceivedJob, reason: &str) -> Result<(), QueueError> {
        let entry = serde_json::to_string(&JobRecord::failed(received.job, reason))?;
        self.settle(
            &received.receipt,
            &self.keys.failed,
            &entry,
            self.policy.keep_failed,
        )
        .await
    }
}

/// Creates [`RedisJobQueue`] clients over one shared connection.
#[derive(Clone)]
pub struct RedisBroker {
    conn: ConnectionManager,
    key_prefix: String,
}

impl RedisBroker {
    /// Connects to Redis at `url`.
    ///
    /// # Errors
    ///
    /// Returns `QueueError::Backend` if the URL is invalid or the server
    /// cannot be reached.
    pub async fn connect(url: &str, key_prefix: &str) -> Result<Self, QueueError> {
        let client = Client::open(url).map_err(backend_error)?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(backend_error)?;

        info!(url = %url, key_prefix = %key_prefix, "Connected to Redis for job queues");

        Ok(Self::from_connection(conn, key_prefix))
    }

    /// Wraps an existing connection manager.
    #[must_use]
    pub fn from_connection(conn: ConnectionManager, key_prefix: &str) -> Self {
        Self {
            conn,
            key_prefix: key_prefix.to_owned(),
        }
    }
}

impl Broker for RedisBroker {
    fn queue(&self, name: &str, policy: DeliveryPolicy) -> Arc<dyn JobQueue> {
        Arc::new(RedisJobQueue::new(
            self.conn.clone(),
            &self.key_prefix,
            name,
            policy,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keys_are_namespaced_by_prefix_and_queue() {
        let keys = QueueKeys::new("bookmarks", "feeds");

        assert_eq!(keys.wait, "bookmarks:queue:feeds:wait");
        assert_eq!(keys.active, "bookmarks:queue:feeds:active");
        assert_eq!(keys.leases, "bookmarks:queue:feeds:leases");
        assert_eq!(keys.delayed, "bookmarks:queue:feeds:delayed");
        assert_eq!(keys.completed, "bookmarks:queue:feeds:completed");
        assert_eq!(keys.failed, "bookmarks:queue:feeds:failed");
    }

    #[test]
    fn test_stalled_job_with_attempts_left_is_requeued_with_one_spent() {
        // Arrange
        let job = QueueJob::new("CardAddedToLibraryEvent", serde_json::json!({ "n": 1 }));
        let receipt = serde_json::to_string(&job).unwrap();

        // Act
        let outcome = reclaim_stalled(&DeliveryPolicy::default(), &receipt).unwrap();

        // Assert
        let Reclaimed::Requeue(raw) = outcome else {
            panic!("expected requeue, got {outcome:?}");
        };
        let requeued: QueueJob = serde_json::from_str(&raw).unwrap();
        assert_eq!(requeued.id, job.id);
        assert_eq!(requeued.attempts_made, 1);
    }

    #[test]
    fn test_stalled_job_on_its_last_attempt_fails() {
        let mut job = QueueJob::new("CardAddedToLibraryEvent", serde_json::json!({}));
        job.attempts_made = 2;
        let receipt = serde_json::to_string(&job).unwrap();

        let outcome = reclaim_stalled(&DeliveryPolicy::default(), &receipt).unwrap();

        let Reclaimed::Failed(raw) = outcome else {
            panic!("expected failure, got {outcome:?}");
        };
        let record: JobRecord = serde_json::from_str(&raw).unwrap();
        assert_eq!(record.job.attempts_made, 3);
        assert_eq!(record.failed_reason.as_deref(), Some(STALLED_REASON));
    }

    #[test]
    fn test_unreadable_stalled_job_fails_as_stored() {
        let outcome = reclaim_stalled(&DeliveryPolicy::default(), "not json").unwrap();

        assert_eq!(outcome, Reclaimed::Failed("not json".to_owned()));
    }

    #[test]
    fn test_history_bound_passes_keep_through() {
        assert_eq!(history_bound(0), 0);
        assert_eq!(history_bound(500), 500);
    }

    #[test]
    fn test_trim_stop_keeps_requested_count() {
        assert_eq!(trim_stop(100), 99);
        assert_eq!(trim_stop(1), 0);
    }
}
