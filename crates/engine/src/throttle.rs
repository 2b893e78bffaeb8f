//! Concurrency limit computation.
//!
//! `limit = clamp(ceil(ceil(base(class, cpus) * load_factor) * reduction), 1, max_limit)`
//!
//! Both products are taken in integer thousandths so an exact whole product
//! is never pushed over by float error.
//!
//! Decisions are cached per `(class, max_limit, load_factor)` for the
//! configured TTL. The cache is owned by the calculator instance; losing it
//! only costs a resample.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use chrono::Utc;
use fanout_core::{FanoutError, Result, ThrottleConfig};
use tracing::{debug, info};

use crate::monitor::{ResourceMonitor, ResourceProbe};
use crate::types::{ResourceSnapshot, ThrottleDecision, WorkloadClass};

/// Cache key. The load factor is stored in thousandths so the key is hashable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct ThrottleKey {
    workload: WorkloadClass,
    max_limit: usize,
    load_millis: u32,
}

impl ThrottleKey {
    fn new(workload: WorkloadClass, max_limit: usize, load_factor: f64) -> Result<Self> {
        if max_limit < 1 {
            return Err(FanoutError::invalid("max_limit must be at least 1"));
        }
        if !(0.1..=1.0).contains(&load_factor) {
            return Err(FanoutError::invalid(format!(
                "load_factor must be within 0.1..=1.0, got {load_factor}"
            )));
        }
        Ok(Self {
            workload,
            max_limit,
            load_millis: (load_factor * 1000.0).round() as u32,
        })
    }
}

/// A cached decision and when it was stored. Freshness uses the monotonic
/// clock so wall-clock jumps cannot extend its life.
struct CachedDecision {
    decision: ThrottleDecision,
    stored: Instant,
}

pub struct ThrottleCalculator {
    monitor: ResourceMonitor,
    config: ThrottleConfig,
    cache: Mutex<HashMap<ThrottleKey, CachedDecision>>,
}

impl ThrottleCalculator {
    pub fn new(probe: Arc<dyn ResourceProbe>, config: ThrottleConfig) -> Self {
        Self {
            monitor: ResourceMonitor::new(probe, config.clone()),
            config,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn monitor(&self) -> &ResourceMonitor {
        &self.monitor
    }

    /// Optimal concurrency limit for a workload class. Always in `[1, max_limit]`.
    pub fn get_limit(
        &self,
        workload: WorkloadClass,
        max_limit: usize,
        load_factor: f64,
    ) -> Result<usize> {
        Ok(self.decide(workload, max_limit, load_factor)?.limit)
    }

    /// Full decision, served from cache while it is still valid.
    pub fn decide(
        &self,
        workload: WorkloadClass,
        max_limit: usize,
        load_factor: f64,
    ) -> Result<ThrottleDecision> {
        let key = ThrottleKey::new(workload, max_limit, load_factor)?;
        if let Some(cached) = self.cached(&key) {
            debug!(workload = %workload, limit = cached.limit, "throttle cache hit");
            return Ok(cached);
        }

        let decision = compute(self.monitor.sample(), &key, load_factor);
        info!(
            workload = %workload,
            limit = decision.limit,
            cpus = decision.snapshot.cpu_count,
            memory_pressure = decision.snapshot.memory_pressure,
            "computed throttle limit"
        );
        if !self.config.cache_ttl().is_zero() {
            self.cache
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .insert(key, CachedDecision { decision: decision.clone(), stored: Instant::now() });
        }
        Ok(decision)
    }

    fn cached(&self, key: &ThrottleKey) -> Option<ThrottleDecision> {
        let ttl = self.config.cache_ttl();
        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        let entry = cache.get(key)?;
        if entry.stored.elapsed() < ttl {
            return Some(entry.decision.clone());
        }
        cache.remove(key);
        None
    }

    /// Decision for an already-taken snapshot. Bypasses the cache, so several
    /// classes can be judged against the same sample.
    pub fn decide_from(
        &self,
        snapshot: ResourceSnapshot,
        workload: WorkloadClass,
        max_limit: usize,
        load_factor: f64,
    ) -> Result<ThrottleDecision> {
        let key = ThrottleKey::new(workload, max_limit, load_factor)?;
        Ok(compute(snapshot, &key, load_factor))
    }

    /// Drop every cached decision.
    pub fn invalidate(&self) {
        self.cache.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }

    /// Number of decisions currently cached (valid or not yet evicted).
    pub fn cached_entries(&self) -> usize {
        self.cache.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

fn compute(snapshot: ResourceSnapshot, key: &ThrottleKey, load_factor: f64) -> ThrottleDecision {
    let base = key.workload.base_limit(snapshot.cpu_count) as u64;
    let adjusted = (base * u64::from(key.load_millis)).div_ceil(1000);
    let reduction_millis = (snapshot.reduction_factor * 1000.0).round() as u64;
    let memory_adjusted = (adjusted * reduction_millis).div_ceil(1000);
    let limit = usize::try_from(memory_adjusted)
        .unwrap_or(usize::MAX)
        .clamp(1, key.max_limit);

    ThrottleDecision {
        workload: key.workload,
        max_limit: key.max_limit,
        load_factor,
        limit,
        snapshot,
        computed_at: Utc::now(),
    }
}
