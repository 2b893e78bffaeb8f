use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::types::{JobState, PressureLevel};

/// Engine operational metrics.
#[derive(Debug, Clone, Serialize)]
pub struct EngineMetrics {
    /// Finished jobs by terminal state.
    pub jobs_finished: HashMap<JobState, u64>,
    /// Jobs submitted but not yet finished.
    pub active_jobs: usize,
    /// Jobs currently holding a worker slot.
    pub running_jobs: usize,
    /// Highest `running_jobs` observed.
    pub peak_running: usize,
    /// Rolling mean of job running time.
    pub avg_job_duration: Duration,
    pub last_finished: Option<DateTime<Utc>>,
    /// Limit in force for the most recent pool dispatch.
    pub current_limit: usize,
    pub current_pressure: PressureLevel,
}

impl Default for EngineMetrics {
    fn default() -> Self {
        Self {
            jobs_finished: HashMap::new(),
            active_jobs: 0,
            running_jobs: 0,
            peak_running: 0,
            avg_job_duration: Duration::ZERO,
            last_finished: None,
            current_limit: 0,
            current_pressure: PressureLevel::Normal,
        }
    }
}

/// Thread-safe handle shared by every worker.
pub type SharedMetrics = Arc<RwLock<EngineMetrics>>;

pub fn new_shared_metrics() -> SharedMetrics {
    Arc::new(RwLock::new(EngineMetrics::default()))
}

impl EngineMetrics {
    pub fn total_finished(&self) -> u64 {
        self.jobs_finished.values().sum()
    }

    /// Record a job reaching its terminal state.
    pub fn record_finished(&mut self, state: JobState, duration: Duration) {
        *self.jobs_finished.entry(state).or_default() += 1;
        self.last_finished = Some(Utc::now());

        // Incremental mean: new_avg = prev_avg + (duration - prev_avg) / count
        let count = self.total_finished();
        self.avg_job_duration = if count == 1 {
            duration
        } else {
            let prev_nanos = self.avg_job_duration.as_nanos() as f64;
            let cur_nanos = duration.as_nanos() as f64;
            let avg_nanos = prev_nanos + (cur_nanos - prev_nanos) / count as f64;
            Duration::from_nanos(avg_nanos as u64)
        };
    }

    pub fn record_running_started(&mut self) {
        self.running_jobs += 1;
        self.peak_running = self.peak_running.max(self.running_jobs);
    }

    pub fn record_running_stopped(&mut self) {
        self.running_jobs = self.running_jobs.saturating_sub(1);
    }
}

/// Apply `f` to the shared metrics, tolerating a poisoned lock.
pub(crate) fn update(metrics: &SharedMetrics, f: impl FnOnce(&mut EngineMetrics)) {
    let mut guard = metrics.write().unwrap_or_else(|e| e.into_inner());
    f(&mut guard);
}

pub(crate) fn snapshot(metrics: &SharedMetrics) -> EngineMetrics {
    metrics.read().unwrap_or_else(|e| e.into_inner()).clone()
}
