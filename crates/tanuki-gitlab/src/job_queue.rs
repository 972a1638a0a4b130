//! Background job queue with fibonacci retry backoff. Each job kind runs on
//! its own single worker.

use std::{
    collections::VecDeque,
    future::Future,
    sync::{
        atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
        Arc, Mutex, MutexGuard,
    },
    time::Duration,
};

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tanuki_core::current_unix_timestamp_ms;

use crate::{
    chat_transport::{ChatId, MessageId, UserId},
    gitlab_api_client::NoteTarget,
};

const JOB_REASON_QUEUED: &str = "job_queued";
const JOB_REASON_SCHEDULED: &str = "job_scheduled";
const JOB_REASON_SUCCEEDED: &str = "job_succeeded";
const JOB_REASON_RETRY_SCHEDULED: &str = "job_retry_scheduled";
const JOB_REASON_RETRIES_EXHAUSTED: &str = "job_retries_exhausted";
const JOB_RECENT_REASON_CODE_CAP: usize = 16;
const JOB_IDLE_POLL_MS: u64 = 10;
const JOB_LANE_COUNT: usize = 2;

static JOB_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Work executed outside the request path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "job", rename_all = "snake_case")]
pub enum JobKind {
    SendComment {
        base_url: String,
        user_id: UserId,
        chat_id: ChatId,
        target: NoteTarget,
        body: String,
        comment_message_id: MessageId,
    },
    CacheNickMap {
        base_url: String,
        user_id: UserId,
        chat_handle: String,
    },
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SendComment { .. } => "send_comment",
            Self::CacheNickMap { .. } => "cache_nick_map",
        }
    }

    fn lane(&self) -> usize {
        match self {
            Self::SendComment { .. } => 0,
            Self::CacheNickMap { .. } => 1,
        }
    }
}

#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn execute(&self, job: &JobKind) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobQueueConfig {
    pub retry_unit: Duration,
    pub max_attempts: u32,
}

impl Default for JobQueueConfig {
    fn default() -> Self {
        Self {
            retry_unit: Duration::from_secs(1),
            max_attempts: 10,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct JobQueueHealthSnapshot {
    pub updated_unix_ms: u64,
    pub queue_depth: usize,
    pub pending_jobs: usize,
    pub queued_total: u64,
    pub succeeded_total: u64,
    pub retried_total: u64,
    pub dropped_total: u64,
    pub last_job_id: String,
    pub last_reason_code: String,
    pub reason_codes: Vec<String>,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone)]
struct QueuedJob {
    job_id: String,
    kind: JobKind,
    attempt: u32,
}

#[derive(Default)]
struct JobLane {
    queue: Mutex<VecDeque<QueuedJob>>,
    worker_running: AtomicBool,
}

struct JobQueueInner {
    config: JobQueueConfig,
    handler: Arc<dyn JobHandler>,
    lanes: [JobLane; JOB_LANE_COUNT],
    health: Mutex<JobQueueHealthSnapshot>,
    pending: AtomicUsize,
}

/// Jobs of one kind run one at a time in FIFO order; different kinds do not
/// wait on each other.
#[derive(Clone)]
pub struct JobQueue {
    inner: Arc<JobQueueInner>,
}

impl JobQueue {
    pub fn new(config: JobQueueConfig, handler: Arc<dyn JobHandler>) -> Self {
        Self {
            inner: Arc::new(JobQueueInner {
                config: JobQueueConfig {
                    retry_unit: config.retry_unit,
                    max_attempts: config.max_attempts.max(1),
                },
                handler,
                lanes: Default::default(),
                health: Mutex::new(JobQueueHealthSnapshot::default()),
                pending: AtomicUsize::new(0),
            }),
        }
    }

    pub fn enqueue(&self, kind: JobKind) -> String {
        let job = QueuedJob {
            job_id: next_job_id(),
            kind,
            attempt: 1,
        };
        let job_id = job.job_id.clone();
        self.inner.pending.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(job_id = %job_id, job = job.kind.as_str(), "job queued");
        self.update_health(&job_id, JOB_REASON_QUEUED, None, |health| {
            health.queued_total = health.queued_total.saturating_add(1);
        });
        self.push(job);
        job_id
    }

    /// Queues `kind` once `delay` has elapsed.
    pub fn schedule(&self, kind: JobKind, delay: Duration) -> String {
        let job = QueuedJob {
            job_id: next_job_id(),
            kind,
            attempt: 1,
        };
        let job_id = job.job_id.clone();
        self.inner.pending.fetch_add(1, Ordering::SeqCst);
        self.update_health(&job_id, JOB_REASON_SCHEDULED, None, |health| {
            health.queued_total = health.queued_total.saturating_add(1);
        });
        self.push_after(job, delay);
        job_id
    }

    pub fn inspect_health(&self) -> JobQueueHealthSnapshot {
        let mut health = lock_unpoisoned(&self.inner.health).clone();
        health.queue_depth = self
            .inner
            .lanes
            .iter()
            .map(|lane| lock_unpoisoned(&lane.queue).len())
            .sum();
        health.pending_jobs = self.inner.pending.load(Ordering::SeqCst);
        health
    }

    /// Waits until every queued, scheduled, or retrying job has finished.
    pub async fn wait_until_idle(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.inner.pending.load(Ordering::SeqCst) == 0 {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(JOB_IDLE_POLL_MS)).await;
        }
    }

    fn push(&self, job: QueuedJob) {
        let lane = job.kind.lane();
        lock_unpoisoned(&self.inner.lanes[lane].queue).push_back(job);
        self.schedule_worker(lane);
    }

    fn push_after(&self, job: QueuedJob, delay: Duration) {
        let queue = self.clone();
        spawn_background_future(async move {
            tokio::time::sleep(delay).await;
            queue.push(job);
        });
    }

    fn schedule_worker(&self, lane: usize) {
        if self.inner.lanes[lane]
            .worker_running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }

        let queue = self.clone();
        spawn_background_future(async move {
            queue.worker_loop(lane).await;
        });
    }

    async fn worker_loop(self, lane: usize) {
        let slot = &self.inner.lanes[lane];
        loop {
            let next_job = { lock_unpoisoned(&slot.queue).pop_front() };
            let Some(job) = next_job else {
                break;
            };
            self.execute_job(job).await;
        }

        slot.worker_running.store(false, Ordering::SeqCst);
        let has_remaining = { !lock_unpoisoned(&slot.queue).is_empty() };
        if has_remaining {
            self.schedule_worker(lane);
        }
    }

    async fn execute_job(&self, job: QueuedJob) {
        match self.inner.handler.execute(&job.kind).await {
            Ok(()) => {
                tracing::debug!(job_id = %job.job_id, attempt = job.attempt, "job succeeded");
                self.update_health(&job.job_id, JOB_REASON_SUCCEEDED, None, |health| {
                    health.succeeded_total = health.succeeded_total.saturating_add(1);
                });
                self.inner.pending.fetch_sub(1, Ordering::SeqCst);
            }
            Err(error) if job.attempt < self.inner.config.max_attempts => {
                let delay = retry_backoff(self.inner.config.retry_unit, job.attempt);
                tracing::warn!(
                    job_id = %job.job_id,
                    job = job.kind.as_str(),
                    attempt = job.attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %format!("{error:#}"),
                    "job failed; retry scheduled"
                );
                self.update_health(
                    &job.job_id,
                    JOB_REASON_RETRY_SCHEDULED,
                    Some(format!("{error:#}")),
                    |health| {
                        health.retried_total = health.retried_total.saturating_add(1);
                    },
                );
                self.push_after(
                    QueuedJob {
                        attempt: job.attempt.saturating_add(1),
                        ..job
                    },
                    delay,
                );
            }
            Err(error) => {
                tracing::error!(
                    job_id = %job.job_id,
                    job = job.kind.as_str(),
                    attempt = job.attempt,
                    reason_code = JOB_REASON_RETRIES_EXHAUSTED,
                    error = %format!("{error:#}"),
                    "job dropped after exhausting retries"
                );
                self.update_health(
                    &job.job_id,
                    JOB_REASON_RETRIES_EXHAUSTED,
                    Some(format!("{error:#}")),
                    |health| {
                        health.dropped_total = health.dropped_total.saturating_add(1);
                    },
                );
                self.inner.pending.fetch_sub(1, Ordering::SeqCst);
            }
        }
    }

    fn update_health<F>(&self, job_id: &str, reason_code: &str, error: Option<String>, mutate: F)
    where
        F: FnOnce(&mut JobQueueHealthSnapshot),
    {
        let mut health = lock_unpoisoned(&self.inner.health);
        health.updated_unix_ms = current_unix_timestamp_ms();
        health.last_job_id = job_id.to_string();
        health.last_reason_code = reason_code.to_string();
        push_recent_reason_code(&mut health.reason_codes, reason_code);
        if error.is_some() {
            health.last_error = error;
        }
        mutate(&mut health);
    }
}

/// `n`-th fibonacci number with `fibonacci(1) == fibonacci(2) == 1`.
pub fn fibonacci(n: u32) -> u64 {
    let (mut previous, mut current) = (0_u64, 1_u64);
    for _ in 1..n.max(1) {
        let next = previous.saturating_add(current);
        previous = current;
        current = next;
    }
    current
}

/// Delay before re-running a job whose `attempt` just failed.
pub fn retry_backoff(unit: Duration, attempt: u32) -> Duration {
    let factor = u32::try_from(fibonacci(attempt)).unwrap_or(u32::MAX);
    unit.saturating_mul(factor)
}

fn push_recent_reason_code(reason_codes: &mut Vec<String>, reason_code: &str) {
    reason_codes.retain(|existing| existing != reason_code);
    reason_codes.push(reason_code.to_string());
    while reason_codes.len() > JOB_RECENT_REASON_CODE_CAP {
        reason_codes.remove(0);
    }
}

fn next_job_id() -> String {
    let counter = JOB_ID_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("job-{}-{counter}", current_unix_timestamp_ms())
}

fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn spawn_background_future<F>(future: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    if let Ok(handle) = tokio::runtime::Handle::try_current() {
        handle.spawn(future);
        return;
    }

    std::thread::spawn(move || {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build();
        match runtime {
            Ok(runtime) => runtime.block_on(future),
            Err(error) => tracing::error!(%error, "job queue worker bootstrap failed"),
        }
    });
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicU32;

    use anyhow::bail;

    use super::*;

    struct FlakyHandler {
        failures_before_success: u32,
        calls: AtomicU32,
        seen: Mutex<Vec<JobKind>>,
    }

    impl FlakyHandler {
        fn new(failures_before_success: u32) -> Arc<Self> {
            Arc::new(Self {
                failures_before_success,
                calls: AtomicU32::new(0),
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl JobHandler for FlakyHandler {
        async fn execute(&self, job: &JobKind) -> Result<()> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            lock_unpoisoned(&self.seen).push(job.clone());
            if call <= self.failures_before_success {
                bail!("transient failure {call}");
            }
            Ok(())
        }
    }

    fn nick_job(handle: &str) -> JobKind {
        JobKind::CacheNickMap {
            base_url: "https://gitlab.example.com".to_string(),
            user_id: 1,
            chat_handle: handle.to_string(),
        }
    }

    fn fast_config(max_attempts: u32) -> JobQueueConfig {
        JobQueueConfig {
            retry_unit: Duration::from_millis(1),
            max_attempts,
        }
    }

    #[test]
    fn unit_fibonacci_backoff_sequence() {
        let sequence = (1..=8).map(fibonacci).collect::<Vec<_>>();
        assert_eq!(sequence, vec![1, 1, 2, 3, 5, 8, 13, 21]);
        assert_eq!(fibonacci(0), 1);
        assert_eq!(
            retry_backoff(Duration::from_secs(1), 5),
            Duration::from_secs(5)
        );
    }

    #[tokio::test]
    async fn functional_job_queue_runs_jobs_in_order() {
        let handler = FlakyHandler::new(0);
        let queue = JobQueue::new(fast_config(3), handler.clone());
        queue.enqueue(nick_job("a"));
        queue.enqueue(nick_job("b"));
        assert!(queue.wait_until_idle(Duration::from_secs(5)).await);
        let seen = lock_unpoisoned(&handler.seen).clone();
        assert_eq!(seen, vec![nick_job("a"), nick_job("b")]);
        let health = queue.inspect_health();
        assert_eq!(health.succeeded_total, 2);
        assert_eq!(health.pending_jobs, 0);
    }

    #[tokio::test]
    async fn functional_job_queue_retries_transient_failures() {
        let handler = FlakyHandler::new(2);
        let queue = JobQueue::new(fast_config(10), handler.clone());
        queue.enqueue(nick_job("retry"));
        assert!(queue.wait_until_idle(Duration::from_secs(5)).await);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 3);
        let health = queue.inspect_health();
        assert_eq!(health.retried_total, 2);
        assert_eq!(health.succeeded_total, 1);
        assert_eq!(health.dropped_total, 0);
    }

    #[tokio::test]
    async fn regression_job_queue_drops_job_after_max_attempts() {
        let handler = FlakyHandler::new(u32::MAX);
        let queue = JobQueue::new(fast_config(4), handler.clone());
        queue.enqueue(nick_job("doomed"));
        assert!(queue.wait_until_idle(Duration::from_secs(5)).await);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 4);
        let health = queue.inspect_health();
        assert_eq!(health.dropped_total, 1);
        assert_eq!(health.last_reason_code, "job_retries_exhausted");
        assert!(health
            .last_error
            .as_deref()
            .is_some_and(|error| error.contains("transient failure 4")));
    }

    struct GatedCommentHandler {
        gate: tokio::sync::Notify,
        finished: Mutex<Vec<&'static str>>,
    }

    #[async_trait]
    impl JobHandler for GatedCommentHandler {
        async fn execute(&self, job: &JobKind) -> Result<()> {
            if matches!(job, JobKind::SendComment { .. }) {
                self.gate.notified().await;
            }
            lock_unpoisoned(&self.finished).push(job.as_str());
            Ok(())
        }
    }

    #[tokio::test]
    async fn functional_stalled_comment_does_not_block_nickname_jobs() {
        let handler = Arc::new(GatedCommentHandler {
            gate: tokio::sync::Notify::new(),
            finished: Mutex::new(Vec::new()),
        });
        let queue = JobQueue::new(fast_config(1), handler.clone());
        queue.enqueue(JobKind::SendComment {
            base_url: "https://gitlab.example.com".to_string(),
            user_id: 1,
            chat_id: 2,
            target: NoteTarget::Issue {
                project_id: 3,
                issue_iid: 4,
            },
            body: "hello".to_string(),
            comment_message_id: 5,
        });
        queue.enqueue(nick_job("free"));

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while lock_unpoisoned(&handler.finished).is_empty()
            && tokio::time::Instant::now() < deadline
        {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(
            lock_unpoisoned(&handler.finished).clone(),
            vec!["cache_nick_map"]
        );
        assert_eq!(queue.inspect_health().pending_jobs, 1);

        handler.gate.notify_one();
        assert!(queue.wait_until_idle(Duration::from_secs(5)).await);
        assert_eq!(
            lock_unpoisoned(&handler.finished).clone(),
            vec!["cache_nick_map", "send_comment"]
        );
    }

    #[tokio::test]
    async fn functional_scheduled_job_waits_for_delay() {
        let handler = FlakyHandler::new(0);
        let queue = JobQueue::new(fast_config(1), handler.clone());
        queue.schedule(nick_job("later"), Duration::from_millis(50));
        assert_eq!(handler.calls.load(Ordering::SeqCst), 0);
        assert_eq!(queue.inspect_health().pending_jobs, 1);
        assert!(queue.wait_until_idle(Duration::from_secs(5)).await);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
    }
}
