use std::future::Future;
use std::time::Duration;

use fanout_core::{FanoutError, Result};
use tracing::info;

use crate::aggregate::AggregateSummary;
use crate::jobs::JobHandle;
use crate::partition::{self, DependencyGraph};
use crate::task::{WorkItem, WorkOutput};
use crate::types::{JobResult, WorkloadClass};

use super::core::Engine;

impl Engine {
    /// Run every item with at most `limit` in flight.
    ///
    /// `timeout` bounds the whole run; `None` uses the configured pool timeout.
    pub async fn run_parallel<P: Send + 'static>(
        &self,
        items: Vec<WorkItem<P>>,
        limit: usize,
        timeout: Option<Duration>,
    ) -> Result<Vec<JobResult>> {
        let timeout = timeout.unwrap_or_else(|| self.config.pool.timeout());
        self.pool.run(items, limit, timeout).await
    }

    /// Run items in throughput-tuned slices.
    ///
    /// Without an `initial_limit` the run starts from the throttle limit for
    /// `workload` at the configured default load factor.
    pub async fn run_adaptive_parallel<P: Send + 'static>(
        &self,
        items: Vec<WorkItem<P>>,
        workload: WorkloadClass,
        initial_limit: Option<usize>,
        max_limit: usize,
        batch_count: usize,
    ) -> Result<Vec<JobResult>> {
        let initial = match initial_limit {
            Some(limit) => limit,
            None => self.compute_throttle(
                workload,
                max_limit,
                self.config.throttle.default_load_factor,
            )?,
        };
        self.adaptive
            .run_adaptive(items, initial, max_limit, batch_count)
            .await
    }

    /// Start `work(args)` as a background job.
    pub fn submit_job<A, F, Fut>(&self, name: impl Into<String>, work: F, args: A) -> JobHandle
    where
        A: Send + 'static,
        F: FnOnce(A) -> Fut + Send + 'static,
        Fut: Future<Output = WorkOutput> + Send + 'static,
    {
        self.jobs.submit(name, work, args)
    }

    /// Wait for background jobs; `None` uses the configured wait timeout.
    pub async fn await_jobs(
        &self,
        handles: Vec<JobHandle>,
        timeout: Option<Duration>,
    ) -> Result<Vec<JobResult>> {
        let timeout = timeout.unwrap_or_else(|| self.config.jobs.wait_timeout());
        self.jobs.await_all(handles, timeout).await
    }

    /// Greedy grouping so no two related items share a group.
    pub fn partition_by_dependency<T, F>(
        &self,
        items: Vec<T>,
        depends: F,
        max_group_size: usize,
    ) -> Result<Vec<Vec<T>>>
    where
        F: Fn(&T, &T) -> bool,
    {
        partition::partition(items, depends, max_group_size)
    }

    pub fn merge_results(&self, results: &[JobResult]) -> AggregateSummary {
        AggregateSummary::merge(results)
    }

    /// Partition `items` by `graph`, then run the groups one after another.
    ///
    /// Each group gets its own `timeout` window (configured pool timeout when
    /// `None`). Results are concatenated in group order.
    pub async fn run_partitioned<P: Send + 'static>(
        &self,
        items: Vec<WorkItem<P>>,
        graph: &DependencyGraph,
        max_group_size: usize,
        limit: usize,
        timeout: Option<Duration>,
    ) -> Result<Vec<JobResult>> {
        if limit < 1 {
            return Err(FanoutError::invalid("concurrency limit must be at least 1"));
        }
        let timeout = timeout.unwrap_or_else(|| self.config.pool.timeout());
        if timeout.is_zero() {
            return Err(FanoutError::invalid("pool timeout must be greater than zero"));
        }

        let total = items.len();
        let groups = graph.partition_items(items, max_group_size)?;
        info!(items = total, groups = groups.len(), "running dependency groups");

        let mut results = Vec::with_capacity(total);
        for group in groups {
            results.extend(self.pool.run(group, limit, timeout).await?);
        }
        Ok(results)
    }
}
