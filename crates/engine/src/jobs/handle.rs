use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::task::{JoinError, JoinHandle};

use crate::metrics::{self, SharedMetrics};
use crate::types::{JobResult, JobState};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

/// State shared between a handle and the task driving its work.
#[derive(Debug)]
pub(crate) struct JobShared {
    state: Mutex<JobState>,
    slot: Mutex<Option<usize>>,
    running_since: Mutex<Option<Instant>>,
}

impl JobShared {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(JobState::Pending),
            slot: Mutex::new(None),
            running_since: Mutex::new(None),
        }
    }

    pub(crate) fn state(&self) -> JobState {
        *lock(&self.state)
    }

    /// Move to `next` if legal. Returns the previous state on success.
    /// A terminal state is never overwritten.
    pub(crate) fn transition(&self, next: JobState) -> Option<JobState> {
        let mut state = lock(&self.state);
        let prev = *state;
        if !prev.can_transition_to(next) {
            return None;
        }
        *state = next;
        if next == JobState::Running {
            *lock(&self.running_since) = Some(Instant::now());
        }
        Some(prev)
    }

    pub(crate) fn set_slot(&self, slot: usize) {
        *lock(&self.slot) = Some(slot);
    }

    pub(crate) fn slot(&self) -> Option<usize> {
        *lock(&self.slot)
    }

    pub(crate) fn running_for(&self) -> Duration {
        lock(&self.running_since).map(|t| t.elapsed()).unwrap_or_default()
    }
}

/// What the job task hands back when it finishes on its own.
#[derive(Debug)]
pub(crate) struct JobOutcome {
    pub(crate) state: JobState,
    pub(crate) output: Option<Value>,
    pub(crate) error: Option<String>,
    pub(crate) skipped: bool,
    pub(crate) duration: Duration,
}

impl JobOutcome {
    pub(crate) fn failed(error: impl Into<String>, duration: Duration) -> Self {
        Self {
            state: JobState::Failed,
            output: None,
            error: Some(error.into()),
            skipped: false,
            duration,
        }
    }
}

/// Reference to one dispatched unit of background work.
///
/// Dropping the handle aborts the underlying task, so an abandoned or
/// cancelled wait never leaves work running.
#[derive(Debug)]
pub struct JobHandle {
    id: String,
    name: String,
    started_at: DateTime<Utc>,
    pub(crate) shared: Arc<JobShared>,
    pub(crate) join: JoinHandle<JobOutcome>,
    metrics: SharedMetrics,
}

impl JobHandle {
    pub(crate) fn new(
        id: String,
        name: String,
        shared: Arc<JobShared>,
        join: JoinHandle<JobOutcome>,
        metrics: SharedMetrics,
    ) -> Self {
        Self {
            id,
            name,
            started_at: Utc::now(),
            shared,
            join,
            metrics,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current state. Non-blocking.
    pub fn state(&self) -> JobState {
        self.shared.state()
    }

    /// When the job was submitted.
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Worker slot, once a pooled job has been admitted.
    pub fn slot(&self) -> Option<usize> {
        self.shared.slot()
    }

    /// Whether the underlying task has exited.
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Result for a job the task reported on (or failed to report on).
    pub(crate) fn finish(&self, joined: Result<JobOutcome, JoinError>) -> JobResult {
        match joined {
            Ok(outcome) => self.result(outcome),
            Err(e) => {
                self.shared.transition(JobState::Failed);
                let msg = if e.is_cancelled() {
                    "job task was cancelled".to_string()
                } else {
                    format!("job task failed: {e}")
                };
                self.result(JobOutcome::failed(msg, self.shared.running_for()))
            }
        }
    }

    /// Result for a job the waiter forced into `TimedOut`.
    pub(crate) fn timed_out(&self, prev: JobState, timeout: Duration) -> JobResult {
        let duration = if prev == JobState::Running {
            self.shared.running_for()
        } else {
            Duration::ZERO
        };
        self.result(JobOutcome {
            state: JobState::TimedOut,
            output: None,
            error: Some(format!("timed out after {timeout:?} while {prev}")),
            skipped: false,
            duration,
        })
    }

    fn result(&self, outcome: JobOutcome) -> JobResult {
        let has_errors = outcome.error.is_some() && !outcome.skipped;
        JobResult {
            id: self.id.clone(),
            name: self.name.clone(),
            state: outcome.state,
            output: outcome.output,
            error: outcome.error,
            duration: outcome.duration,
            started_at: self.started_at,
            slot: self.shared.slot(),
            skipped: outcome.skipped,
            has_errors,
        }
    }
}

impl Drop for JobHandle {
    fn drop(&mut self) {
        self.join.abort();
        metrics::update(&self.metrics, |m| m.active_jobs = m.active_jobs.saturating_sub(1));
    }
}
