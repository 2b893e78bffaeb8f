use std::sync::Arc;

use fanout_core::{EngineConfig, Result};
use tracing::info;

use crate::adaptive::AdaptiveController;
use crate::jobs::JobManager;
use crate::metrics::{self, EngineMetrics, SharedMetrics};
use crate::monitor::{ResourceProbe, SystemProbe};
use crate::pool::WorkerPool;
use crate::throttle::ThrottleCalculator;
use crate::types::{ResourceSnapshot, ThrottleDecision, WorkloadClass};

/// The fan-out engine. Owns the throttle cache, the job manager and the
/// pools built on it; every instance is isolated from every other.
pub struct Engine {
    pub(super) config: EngineConfig,
    pub(super) throttle: Arc<ThrottleCalculator>,
    pub(super) jobs: JobManager,
    pub(super) pool: WorkerPool,
    pub(super) adaptive: AdaptiveController,
    pub(super) metrics: SharedMetrics,
}

impl Engine {
    /// Engine reading host resources from the operating system.
    pub fn new(config: EngineConfig) -> Result<Self> {
        Self::with_probe(config, Arc::new(SystemProbe))
    }

    /// Engine with an injected resource probe.
    pub fn with_probe(config: EngineConfig, probe: Arc<dyn ResourceProbe>) -> Result<Self> {
        config.validate()?;

        let metrics = metrics::new_shared_metrics();
        let jobs = JobManager::new(Arc::clone(&metrics));
        let pool = WorkerPool::new(jobs.clone());
        let adaptive = AdaptiveController::new(pool.clone(), config.adaptive.clone());
        let throttle = Arc::new(ThrottleCalculator::new(probe, config.throttle.clone()));

        info!(
            cache_ttl = ?config.throttle.cache_ttl(),
            pool_timeout = ?config.pool.timeout(),
            "fan-out engine ready"
        );

        Ok(Self {
            config,
            throttle,
            jobs,
            pool,
            adaptive,
            metrics,
        })
    }

    /// Concurrency limit for `workload`, always within `[1, max_limit]`.
    pub fn compute_throttle(
        &self,
        workload: WorkloadClass,
        max_limit: usize,
        load_factor: f64,
    ) -> Result<usize> {
        Ok(self.throttle_decision(workload, max_limit, load_factor)?.limit)
    }

    /// Limit for `workload` using the configured default cap and load factor.
    pub fn default_throttle(&self, workload: WorkloadClass) -> Result<usize> {
        let throttle = &self.config.throttle;
        self.compute_throttle(workload, throttle.default_max_limit, throttle.default_load_factor)
    }

    /// Full throttle decision, including the resource snapshot behind it.
    pub fn throttle_decision(
        &self,
        workload: WorkloadClass,
        max_limit: usize,
        load_factor: f64,
    ) -> Result<ThrottleDecision> {
        let decision = self.throttle.decide(workload, max_limit, load_factor)?;
        metrics::update(&self.metrics, |m| m.current_pressure = decision.snapshot.level);
        Ok(decision)
    }

    /// Decisions for several classes taken against one fresh resource sample,
    /// so every limit agrees with the returned snapshot.
    pub fn throttle_report(
        &self,
        classes: &[WorkloadClass],
        max_limit: usize,
        load_factor: f64,
    ) -> Result<(ResourceSnapshot, Vec<ThrottleDecision>)> {
        let snapshot = self.throttle.monitor().sample();
        let decisions = classes
            .iter()
            .map(|&class| self.throttle.decide_from(snapshot, class, max_limit, load_factor))
            .collect::<Result<Vec<_>>>()?;
        metrics::update(&self.metrics, |m| m.current_pressure = snapshot.level);
        Ok((snapshot, decisions))
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn throttle(&self) -> &ThrottleCalculator {
        &self.throttle
    }

    pub fn jobs(&self) -> &JobManager {
        &self.jobs
    }

    /// Snapshot of the engine metrics.
    pub fn metrics(&self) -> EngineMetrics {
        metrics::snapshot(&self.metrics)
    }
}
