//! Host resource sampling.
//!
//! [`ResourceMonitor::sample`] never fails: when the host cannot be queried it
//! logs a warning and falls back to the configured default pressure with no
//! reduction, so a broken probe can only cost throughput, never progress.

use std::sync::{Arc, Mutex};

use fanout_core::ThrottleConfig;
use tracing::warn;

use crate::types::{PressureLevel, ResourceSnapshot, assess_pressure};

#[derive(Debug, Clone, thiserror::Error)]
pub enum ProbeError {
    #[error("resource query unsupported on this platform: {0}")]
    Unsupported(String),
    #[error("resource query failed: {0}")]
    Query(String),
}

/// Source of raw host measurements.
pub trait ResourceProbe: Send + Sync {
    /// Number of logical CPUs.
    fn cpu_count(&self) -> Result<usize, ProbeError>;

    /// Percentage of physical memory in use (0-100).
    fn memory_pressure(&self) -> Result<f64, ProbeError>;
}

/// Reads the live host: `/proc/meminfo` and the scheduler's parallelism hint.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemProbe;

impl ResourceProbe for SystemProbe {
    fn cpu_count(&self) -> Result<usize, ProbeError> {
        std::thread::available_parallelism()
            .map(|n| n.get())
            .map_err(|e| ProbeError::Query(e.to_string()))
    }

    fn memory_pressure(&self) -> Result<f64, ProbeError> {
        if !cfg!(target_os = "linux") {
            return Err(ProbeError::Unsupported(std::env::consts::OS.to_string()));
        }
        let meminfo = std::fs::read_to_string("/proc/meminfo")
            .map_err(|e| ProbeError::Query(format!("/proc/meminfo: {e}")))?;
        parse_meminfo(&meminfo)
    }
}

/// Compute used-memory percentage from `/proc/meminfo` contents.
fn parse_meminfo(contents: &str) -> Result<f64, ProbeError> {
    let field = |name: &str| -> Option<u64> {
        contents
            .lines()
            .find_map(|line| line.strip_prefix(name))
            .and_then(|rest| rest.trim_start_matches(':').split_whitespace().next())
            .and_then(|kb| kb.parse().ok())
    };

    let total = field("MemTotal")
        .filter(|&t| t > 0)
        .ok_or_else(|| ProbeError::Query("MemTotal missing from /proc/meminfo".into()))?;
    let available = field("MemAvailable")
        .or_else(|| Some(field("MemFree")? + field("Buffers")? + field("Cached")?))
        .ok_or_else(|| ProbeError::Query("MemAvailable missing from /proc/meminfo".into()))?;

    let used = total.saturating_sub(available);
    Ok(used as f64 / total as f64 * 100.0)
}

/// Probe with caller-controlled values, for tests and simulations.
#[derive(Debug)]
pub struct StaticProbe {
    cpus: usize,
    pressure: Mutex<Option<f64>>,
}

impl StaticProbe {
    pub fn new(cpus: usize, memory_pressure: f64) -> Self {
        Self { cpus, pressure: Mutex::new(Some(memory_pressure)) }
    }

    /// A probe whose memory query always fails.
    pub fn failing(cpus: usize) -> Self {
        Self { cpus, pressure: Mutex::new(None) }
    }

    pub fn set_memory_pressure(&self, memory_pressure: f64) {
        *self.pressure.lock().unwrap_or_else(|e| e.into_inner()) = Some(memory_pressure);
    }
}

impl ResourceProbe for StaticProbe {
    fn cpu_count(&self) -> Result<usize, ProbeError> {
        Ok(self.cpus)
    }

    fn memory_pressure(&self) -> Result<f64, ProbeError> {
        self.pressure
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .ok_or_else(|| ProbeError::Query("memory counters unavailable".into()))
    }
}

/// Samples host resources and classifies memory pressure.
#[derive(Clone)]
pub struct ResourceMonitor {
    probe: Arc<dyn ResourceProbe>,
    config: ThrottleConfig,
}

impl ResourceMonitor {
    pub fn new(probe: Arc<dyn ResourceProbe>, config: ThrottleConfig) -> Self {
        Self { probe, config }
    }

    pub fn system(config: ThrottleConfig) -> Self {
        Self::new(Arc::new(SystemProbe), config)
    }

    /// Take a fresh snapshot. Falls back to safe defaults on query failure.
    pub fn sample(&self) -> ResourceSnapshot {
        let cpu_count = match self.probe.cpu_count() {
            Ok(n) => n,
            Err(e) => {
                warn!(error = %e, "cpu count query failed, assuming 1");
                1
            }
        };

        match self.probe.memory_pressure() {
            Ok(pct) => {
                let memory_pressure = pct.clamp(0.0, 100.0);
                let level = assess_pressure(memory_pressure, &self.config);
                ResourceSnapshot {
                    memory_pressure,
                    cpu_count,
                    reduction_factor: level.reduction_factor(&self.config),
                    level,
                }
            }
            Err(e) => {
                warn!(
                    error = %e,
                    fallback = self.config.fallback_pressure_percent,
                    "memory pressure query failed, using safe default"
                );
                ResourceSnapshot {
                    memory_pressure: self.config.fallback_pressure_percent,
                    cpu_count,
                    reduction_factor: 1.0,
                    level: PressureLevel::Normal,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MEMINFO: &str = "MemTotal:       16000000 kB\n\
                           MemFree:         2000000 kB\n\
                           MemAvailable:    4000000 kB\n\
                           Buffers:          500000 kB\n\
                           Cached:          1500000 kB\n";

    #[test]
    fn parse_meminfo_uses_available() {
        let pct = parse_meminfo(MEMINFO).unwrap();
        assert!((pct - 75.0).abs() < 1e-9, "got {pct}");
    }

    #[test]
    fn parse_meminfo_falls_back_to_free_buffers_cached() {
        let old_kernel = "MemTotal: 1000 kB\nMemFree: 100 kB\nBuffers: 50 kB\nCached: 50 kB\n";
        let pct = parse_meminfo(old_kernel).unwrap();
        assert!((pct - 80.0).abs() < 1e-9, "got {pct}");
    }

    #[test]
    fn parse_meminfo_rejects_garbage() {
        assert!(parse_meminfo("").is_err());
        assert!(parse_meminfo("MemTotal: 0 kB\nMemAvailable: 0 kB\n").is_err());
    }

    #[test]
    fn sample_classifies_pressure() {
        let probe = Arc::new(StaticProbe::new(8, 85.0));
        let monitor = ResourceMonitor::new(probe.clone(), ThrottleConfig::default());

        let snap = monitor.sample();
        assert_eq!(snap.cpu_count, 8);
        assert_eq!(snap.level, PressureLevel::Elevated);
        assert_eq!(snap.reduction_factor, 0.75);

        probe.set_memory_pressure(95.0);
        let snap = monitor.sample();
        assert_eq!(snap.level, PressureLevel::Critical);
        assert_eq!(snap.reduction_factor, 0.5);
    }

    #[test]
    fn sample_never_fails() {
        let monitor = ResourceMonitor::new(Arc::new(StaticProbe::failing(4)), ThrottleConfig::default());
        let snap = monitor.sample();
        assert_eq!(snap.memory_pressure, 50.0);
        assert_eq!(snap.cpu_count, 4);
        assert_eq!(snap.reduction_factor, 1.0);
        assert_eq!(snap.level, PressureLevel::Normal);
    }

    #[test]
    fn out_of_range_pressure_is_clamped() {
        let monitor = ResourceMonitor::new(Arc::new(StaticProbe::new(2, 140.0)), ThrottleConfig::default());
        let snap = monitor.sample();
        assert_eq!(snap.memory_pressure, 100.0);
        assert_eq!(snap.level, PressureLevel::Critical);
    }

    #[test]
    fn system_probe_reports_cpus() {
        let monitor = ResourceMonitor::system(ThrottleConfig::default());
        let snap = monitor.sample();
        assert!(snap.cpu_count >= 1);
        assert!((0.0..=100.0).contains(&snap.memory_pressure));
    }
}
