use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use fanout_core::{FanoutError, Result};
use futures::FutureExt;
use futures::future::join_all;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::metrics::{self, EngineMetrics, SharedMetrics};
use crate::task::{WorkError, WorkFn, WorkOutput};
use crate::types::{JobResult, JobState};

use super::handle::{JobHandle, JobOutcome, JobShared};
use super::slots::SlotPool;

/// Per-state counts from polling a set of handles.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct JobCensus {
    pub pending: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub timed_out: usize,
}

impl JobCensus {
    pub fn total(&self) -> usize {
        self.pending + self.running + self.completed + self.failed + self.timed_out
    }

    pub fn all_terminal(&self) -> bool {
        self.pending == 0 && self.running == 0
    }
}

/// Starts background jobs and waits on them.
///
/// Cheap to clone; clones share the same metrics. Must be used from within a
/// tokio runtime.
#[derive(Debug, Clone)]
pub struct JobManager {
    metrics: SharedMetrics,
}

impl JobManager {
    pub fn new(metrics: SharedMetrics) -> Self {
        Self { metrics }
    }

    pub fn metrics_handle(&self) -> SharedMetrics {
        Arc::clone(&self.metrics)
    }

    pub fn metrics(&self) -> EngineMetrics {
        metrics::snapshot(&self.metrics)
    }

    /// Handles submitted and not yet released.
    pub fn active_jobs(&self) -> usize {
        self.metrics().active_jobs
    }

    /// Start `work(args)` as an independent background job.
    pub fn submit<A, F, Fut>(&self, name: impl Into<String>, work: F, args: A) -> JobHandle
    where
        A: Send + 'static,
        F: FnOnce(A) -> Fut + Send + 'static,
        Fut: Future<Output = WorkOutput> + Send + 'static,
    {
        let id = Uuid::new_v4().to_string();
        self.spawn(id, name.into(), None, async move { work(args).await })
    }

    /// Start a pooled job that waits for a worker slot before running.
    pub(crate) fn submit_to_slot<P: Send + 'static>(
        &self,
        id: String,
        name: String,
        payload: P,
        work: WorkFn<P>,
        slots: Arc<SlotPool>,
    ) -> JobHandle {
        self.spawn(id, name, Some(slots), async move { work(payload).await })
    }

    fn spawn<Fut>(&self, id: String, name: String, slots: Option<Arc<SlotPool>>, work: Fut) -> JobHandle
    where
        Fut: Future<Output = WorkOutput> + Send + 'static,
    {
        let shared = Arc::new(JobShared::new());
        metrics::update(&self.metrics, |m| m.active_jobs += 1);
        let join = tokio::spawn(drive(
            Arc::clone(&shared),
            slots,
            Arc::clone(&self.metrics),
            id.clone(),
            work,
        ));
        JobHandle::new(id, name, shared, join, Arc::clone(&self.metrics))
    }

    /// Count handles per state without blocking.
    pub fn poll(&self, handles: &[JobHandle]) -> JobCensus {
        let mut census = JobCensus::default();
        for handle in handles {
            match handle.state() {
                JobState::Pending => census.pending += 1,
                JobState::Running => census.running += 1,
                JobState::Completed => census.completed += 1,
                JobState::Failed => census.failed += 1,
                JobState::TimedOut => census.timed_out += 1,
            }
        }
        census
    }

    /// Wait for every handle to finish or for `timeout` to elapse.
    ///
    /// Returns exactly one result per handle, in handle order. Jobs still
    /// pending or running at the deadline are aborted and reported as
    /// `TimedOut`. Every handle is released before this returns.
    pub async fn await_all(&self, handles: Vec<JobHandle>, timeout: Duration) -> Result<Vec<JobResult>> {
        if timeout.is_zero() {
            return Err(FanoutError::invalid("await timeout must be greater than zero"));
        }
        if handles.is_empty() {
            return Ok(Vec::new());
        }

        let deadline = tokio::time::Instant::now() + timeout;
        let waits = handles
            .into_iter()
            .map(|handle| self.await_one(handle, deadline, timeout));
        Ok(join_all(waits).await)
    }

    async fn await_one(
        &self,
        mut handle: JobHandle,
        deadline: tokio::time::Instant,
        timeout: Duration,
    ) -> JobResult {
        let joined = match tokio::time::timeout_at(deadline, &mut handle.join).await {
            Ok(joined) => joined,
            Err(_) => match handle.shared.transition(JobState::TimedOut) {
                Some(prev) => {
                    handle.join.abort();
                    let result = handle.timed_out(prev, timeout);
                    self.record(&result);
                    return result;
                }
                // Finished right at the deadline; its outcome is on the way.
                None => (&mut handle.join).await,
            },
        };
        let result = handle.finish(joined);
        self.record(&result);
        result
    }

    fn record(&self, result: &JobResult) {
        match result.state {
            JobState::Completed => debug!(job = %result.id, duration = ?result.duration, "job completed"),
            JobState::TimedOut => warn!(job = %result.id, name = %result.name, "job timed out"),
            _ => warn!(
                job = %result.id,
                name = %result.name,
                error = result.error.as_deref().unwrap_or(""),
                "job failed"
            ),
        }
        metrics::update(&self.metrics, |m| m.record_finished(result.state, result.duration));
    }
}

/// Drive one job: wait for a slot (if pooled), run the work, classify the outcome.
async fn drive<Fut>(
    shared: Arc<JobShared>,
    slots: Option<Arc<SlotPool>>,
    metrics: SharedMetrics,
    id: String,
    work: Fut,
) -> JobOutcome
where
    Fut: Future<Output = WorkOutput> + Send + 'static,
{
    let _slot = match slots {
        Some(pool) => match pool.acquire().await {
            Some(slot) => {
                shared.set_slot(slot.index());
                Some(slot)
            }
            None => {
                shared.transition(JobState::Failed);
                return JobOutcome::failed("worker pool closed", Duration::ZERO);
            }
        },
        None => None,
    };

    if shared.transition(JobState::Running).is_none() {
        // Timed out while queued; the waiter already reported it.
        return JobOutcome::failed("job abandoned before start", Duration::ZERO);
    }
    let _running = RunningGuard::enter(Arc::clone(&metrics));
    debug!(job = %id, slot = ?shared.slot(), "job running");

    let start = Instant::now();
    let result = AssertUnwindSafe(work).catch_unwind().await;
    let duration = start.elapsed();

    let outcome = match result {
        Ok(Ok(value)) => JobOutcome {
            state: JobState::Completed,
            output: Some(value),
            error: None,
            skipped: false,
            duration,
        },
        Ok(Err(WorkError::Skipped(reason))) => JobOutcome {
            state: JobState::Completed,
            output: Some(Value::String(reason)),
            error: None,
            skipped: true,
            duration,
        },
        Ok(Err(WorkError::Failed(msg))) => JobOutcome::failed(msg, duration),
        Err(panic) => JobOutcome::failed(format!("panicked: {}", panic_message(&*panic)), duration),
    };
    shared.transition(outcome.state);
    outcome
}

/// Keeps the running-jobs gauge honest even when the task is aborted mid-flight.
struct RunningGuard(SharedMetrics);

impl RunningGuard {
    fn enter(metrics: SharedMetrics) -> Self {
        metrics::update(&metrics, |m| m.record_running_started());
        Self(metrics)
    }
}

impl Drop for RunningGuard {
    fn drop(&mut self) {
        metrics::update(&self.0, |m| m.record_running_stopped());
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
