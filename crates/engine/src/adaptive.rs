//! Feedback-driven concurrency for long batches.
//!
//! This is a simple hill-climbing controller, not a PID loop. Each slice runs
//! at the current limit; its throughput then nudges the limit by at most one
//! step up or down. Single-step moves favour stability over fast convergence
//! and keep the limit from oscillating.

use std::time::{Duration, Instant};

use fanout_core::{AdaptiveConfig, FanoutError, Result};
use serde::Serialize;
use tracing::info;

use crate::pool::WorkerPool;
use crate::task::WorkItem;
use crate::types::JobResult;

/// What happened in one slice of an adaptive run.
#[derive(Debug, Clone, Serialize)]
pub struct SliceReport {
    pub index: usize,
    pub size: usize,
    /// Limit the slice ran at.
    pub limit: usize,
    pub elapsed: Duration,
    /// Items per second.
    pub throughput: f64,
    /// Limit chosen for the following slice.
    pub next_limit: usize,
}

/// Next throttle limit given one slice's observed throughput.
///
/// Throughput (items/second) at or above `increase_ratio * slice_len` steps the
/// limit up (capped at `max_limit`); below `decrease_ratio * slice_len` steps it
/// down (floored at 1). A zero elapsed time counts as unbounded throughput.
pub fn next_limit(
    current: usize,
    max_limit: usize,
    slice_len: usize,
    elapsed: Duration,
    config: &AdaptiveConfig,
) -> usize {
    let throughput = throughput(slice_len, elapsed);
    let size = slice_len as f64;
    if throughput >= config.increase_ratio * size {
        (current + 1).min(max_limit)
    } else if throughput < config.decrease_ratio * size {
        current.saturating_sub(1).max(1)
    } else {
        current
    }
}

fn throughput(items: usize, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs > 0.0 { items as f64 / secs } else { f64::INFINITY }
}

/// Slice size for `total` items split into `batch_count` batches.
pub fn slice_size(total: usize, batch_count: usize, min_batch_size: usize) -> usize {
    total.div_ceil(batch_count.max(1)).max(min_batch_size).max(1)
}

#[derive(Debug, Clone)]
pub struct AdaptiveController {
    pool: WorkerPool,
    config: AdaptiveConfig,
}

impl AdaptiveController {
    pub fn new(pool: WorkerPool, config: AdaptiveConfig) -> Self {
        Self { pool, config }
    }

    pub fn config(&self) -> &AdaptiveConfig {
        &self.config
    }

    /// Run `items` in sequential slices, adjusting the limit between slices.
    pub async fn run_adaptive<P: Send + 'static>(
        &self,
        items: Vec<WorkItem<P>>,
        initial_limit: usize,
        max_limit: usize,
        batch_count: usize,
    ) -> Result<Vec<JobResult>> {
        let (results, _) = self
            .run_adaptive_traced(items, initial_limit, max_limit, batch_count)
            .await?;
        Ok(results)
    }

    /// Like [`run_adaptive`](Self::run_adaptive), also returning a report per slice.
    pub async fn run_adaptive_traced<P: Send + 'static>(
        &self,
        items: Vec<WorkItem<P>>,
        initial_limit: usize,
        max_limit: usize,
        batch_count: usize,
    ) -> Result<(Vec<JobResult>, Vec<SliceReport>)> {
        if max_limit < 1 {
            return Err(FanoutError::invalid("max_limit must be at least 1"));
        }
        if batch_count < 1 {
            return Err(FanoutError::invalid("batch_count must be at least 1"));
        }

        let total = items.len();
        let size = slice_size(total, batch_count, self.config.min_batch_size);
        let mut limit = initial_limit.clamp(1, max_limit);
        let mut results = Vec::with_capacity(total);
        let mut reports = Vec::new();
        info!(items = total, slice_size = size, limit, max_limit, "adaptive run starting");

        let mut rest = items.into_iter();
        loop {
            let slice: Vec<WorkItem<P>> = rest.by_ref().take(size).collect();
            if slice.is_empty() {
                break;
            }
            let slice_len = slice.len();

            let started = Instant::now();
            let slice_results = self
                .pool
                .run(slice, limit, self.config.slice_timeout())
                .await?;
            let elapsed = started.elapsed();

            let next = next_limit(limit, max_limit, slice_len, elapsed, &self.config);
            let report = SliceReport {
                index: reports.len(),
                size: slice_len,
                limit,
                elapsed,
                throughput: throughput(slice_len, elapsed),
                next_limit: next,
            };
            if next != limit {
                info!(
                    slice = report.index,
                    from = limit,
                    to = next,
                    throughput = report.throughput,
                    "adjusted throttle limit"
                );
            }
            reports.push(report);
            results.extend(slice_results);
            limit = next;
        }

        Ok((results, reports))
    }
}
