//! Fixed-concurrency worker pool.
//!
//! Every item becomes a slotted job on the [`JobManager`]; at most `limit`
//! jobs hold a slot at once. A single deadline measured from pool start
//! bounds the whole run.

use std::sync::Arc;
use std::time::{Duration, Instant};

use fanout_core::{FanoutError, Result};
use tracing::info;

use crate::jobs::{JobManager, SlotPool};
use crate::metrics;
use crate::task::WorkItem;
use crate::types::{JobResult, JobState};

#[derive(Debug, Clone)]
pub struct WorkerPool {
    jobs: JobManager,
}

impl WorkerPool {
    pub fn new(jobs: JobManager) -> Self {
        Self { jobs }
    }

    pub fn jobs(&self) -> &JobManager {
        &self.jobs
    }

    /// Run every item with at most `limit` running concurrently.
    ///
    /// Always returns one result per item. Items still pending or running when
    /// `timeout` elapses are reported as `TimedOut`; a failing or panicking
    /// item never affects its siblings.
    pub async fn run<P: Send + 'static>(
        &self,
        items: Vec<WorkItem<P>>,
        limit: usize,
        timeout: Duration,
    ) -> Result<Vec<JobResult>> {
        if limit < 1 {
            return Err(FanoutError::invalid("concurrency limit must be at least 1"));
        }
        if timeout.is_zero() {
            return Err(FanoutError::invalid("pool timeout must be greater than zero"));
        }
        if items.is_empty() {
            return Ok(Vec::new());
        }

        let total = items.len();
        let slots = SlotPool::new(limit.min(total));
        metrics::update(&self.jobs.metrics_handle(), |m| m.current_limit = limit);
        info!(items = total, limit, slots = slots.size(), timeout = ?timeout, "worker pool starting");

        let started = Instant::now();
        let handles = items
            .into_iter()
            .map(|item| {
                let (id, name, payload, work) = item.into_parts();
                self.jobs.submit_to_slot(id, name, payload, work, Arc::clone(&slots))
            })
            .collect();
        let results = self.jobs.await_all(handles, timeout).await?;

        let count = |state: JobState| results.iter().filter(|r| r.state == state).count();
        info!(
            items = total,
            completed = count(JobState::Completed),
            failed = count(JobState::Failed),
            timed_out = count(JobState::TimedOut),
            elapsed = ?started.elapsed(),
            "worker pool finished"
        );
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde_json::{Value, json};

    use super::*;
    use crate::metrics::new_shared_metrics;
    use crate::task::{WorkError, WorkOutput};

    fn pool() -> WorkerPool {
        WorkerPool::new(JobManager::new(new_shared_metrics()))
    }

    fn sleepers(count: usize, ms: u64) -> Vec<WorkItem<u64>> {
        WorkItem::batch(vec![ms; count], |ms: u64| async move {
            tokio::time::sleep(Duration::from_millis(ms)).await;
            Ok(json!(ms))
        })
    }

    async fn fail_on_three(n: u32) -> WorkOutput {
        match n {
            3 => panic!("item three exploded"),
            5 => Err(WorkError::failed("item five refused")),
            _ => Ok(json!(n * 10)),
        }
    }

    #[tokio::test]
    async fn empty_input_schedules_nothing() {
        let results = pool().run(Vec::<WorkItem<()>>::new(), 4, Duration::from_secs(1)).await.unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn invalid_limit_or_timeout_rejected() {
        let p = pool();
        assert!(p.run(sleepers(2, 1), 0, Duration::from_secs(1)).await.is_err());
        assert!(p.run(sleepers(2, 1), 2, Duration::ZERO).await.is_err());
        assert_eq!(p.jobs().metrics().total_finished(), 0);
    }

    #[tokio::test]
    async fn throttling_is_enforced() {
        let started = Instant::now();
        let results = pool().run(sleepers(10, 100), 2, Duration::from_secs(10)).await.unwrap();
        let elapsed = started.elapsed();

        assert_eq!(results.len(), 10);
        assert!(results.iter().all(|r| r.state == JobState::Completed));
        assert!(elapsed >= Duration::from_millis(400), "finished too fast: {elapsed:?}");
    }

    #[tokio::test]
    async fn never_exceeds_limit() {
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let (r, p) = (Arc::clone(&running), Arc::clone(&peak));
        let items = WorkItem::batch(0..20u32, move |_: u32| {
            let (running, peak) = (Arc::clone(&r), Arc::clone(&p));
            async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                running.fetch_sub(1, Ordering::SeqCst);
                Ok(Value::Null)
            }
        });

        let p = pool();
        let results = p.run(items, 3, Duration::from_secs(10)).await.unwrap();
        assert_eq!(results.len(), 20);
        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert!(p.jobs().metrics().peak_running <= 3);
        assert_eq!(p.jobs().metrics().current_limit, 3);
    }

    #[tokio::test]
    async fn failures_are_isolated() {
        let items = WorkItem::batch(0..8u32, fail_on_three);
        let results = pool().run(items, 3, Duration::from_secs(5)).await.unwrap();

        assert_eq!(results.len(), 8);
        for r in &results {
            match r.id.as_str() {
                "item-3" => {
                    assert_eq!(r.state, JobState::Failed);
                    assert!(r.error.as_deref().unwrap().contains("exploded"));
                }
                "item-5" => {
                    assert_eq!(r.state, JobState::Failed);
                    assert_eq!(r.error.as_deref(), Some("item five refused"));
                }
                _ => {
                    assert_eq!(r.state, JobState::Completed, "{} affected by sibling", r.id);
                    assert!(r.output.is_some());
                }
            }
        }
    }

    #[tokio::test]
    async fn timeout_preserves_finished_results() {
        let mut items = sleepers(2, 10);
        items.extend(WorkItem::batch(vec![5_000u64; 3], |ms: u64| async move {
            tokio::time::sleep(Duration::from_millis(ms)).await;
            Ok(json!(ms))
        }));

        let results = pool().run(items, 2, Duration::from_millis(300)).await.unwrap();
        assert_eq!(results.len(), 5);
        let completed = results.iter().filter(|r| r.state == JobState::Completed).count();
        let timed_out = results.iter().filter(|r| r.state == JobState::TimedOut).count();
        assert_eq!(completed, 2);
        assert_eq!(timed_out, 3);
    }

    #[tokio::test]
    async fn full_parallelism_when_limit_exceeds_items() {
        let started = Instant::now();
        let results = pool().run(sleepers(5, 100), 50, Duration::from_secs(5)).await.unwrap();
        assert_eq!(results.len(), 5);
        assert!(started.elapsed() < Duration::from_millis(450));

        let slots: HashSet<_> = results.iter().filter_map(|r| r.slot).collect();
        assert_eq!(slots.len(), 5);
        assert!(slots.iter().all(|&s| s < 5));
    }

    #[tokio::test]
    async fn results_correlate_by_item_id() {
        let items: Vec<_> = ["alpha", "beta", "gamma"]
            .into_iter()
            .map(|name| WorkItem::new(name, name.len(), |n: usize| async move { Ok(json!(n)) }))
            .collect();
        let results = pool().run(items, 2, Duration::from_secs(5)).await.unwrap();
        let ids: HashSet<_> = results.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, HashSet::from(["alpha", "beta", "gamma"]));
        let beta = results.iter().find(|r| r.id == "beta").unwrap();
        assert_eq!(beta.output, Some(json!(4)));
    }
}
