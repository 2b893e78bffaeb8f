use std::env;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{FanoutError, Result};

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env_opt(key).and_then(|v| v.parse().ok())
}

// ── Top-level config ──────────────────────────────────────────

/// Configuration for the parallel execution engine.
///
/// Parsed from TOML with `FANOUT_<SECTION>_<KEY>` environment overrides.
/// Every section is optional; missing keys fall back to the defaults below.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub throttle: ThrottleConfig,
    #[serde(default)]
    pub pool: PoolConfig,
    #[serde(default)]
    pub jobs: JobsConfig,
    #[serde(default)]
    pub adaptive: AdaptiveConfig,
}

// ── Section configs ───────────────────────────────────────────

/// Throttle computation and memory-pressure policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThrottleConfig {
    /// How long a cached throttle decision stays valid. 0 disables the cache.
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_seconds: u64,
    /// Memory pressure (percent) above which concurrency is reduced.
    #[serde(default = "default_elevated_pressure")]
    pub elevated_pressure_percent: f64,
    /// Memory pressure (percent) above which concurrency is halved.
    #[serde(default = "default_critical_pressure")]
    pub critical_pressure_percent: f64,
    #[serde(default = "default_elevated_reduction")]
    pub elevated_reduction: f64,
    #[serde(default = "default_critical_reduction")]
    pub critical_reduction: f64,
    /// Pressure assumed when the host cannot be queried.
    #[serde(default = "default_fallback_pressure")]
    pub fallback_pressure_percent: f64,
    #[serde(default = "default_max_limit")]
    pub default_max_limit: usize,
    #[serde(default = "default_load_factor")]
    pub default_load_factor: f64,
}

fn default_cache_ttl() -> u64 { 300 }
fn default_elevated_pressure() -> f64 { 80.0 }
fn default_critical_pressure() -> f64 { 90.0 }
fn default_elevated_reduction() -> f64 { 0.75 }
fn default_critical_reduction() -> f64 { 0.5 }
fn default_fallback_pressure() -> f64 { 50.0 }
fn default_max_limit() -> usize { 32 }
fn default_load_factor() -> f64 { 1.0 }

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            cache_ttl_seconds: default_cache_ttl(),
            elevated_pressure_percent: default_elevated_pressure(),
            critical_pressure_percent: default_critical_pressure(),
            elevated_reduction: default_elevated_reduction(),
            critical_reduction: default_critical_reduction(),
            fallback_pressure_percent: default_fallback_pressure(),
            default_max_limit: default_max_limit(),
            default_load_factor: default_load_factor(),
        }
    }
}

impl ThrottleConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_seconds)
    }
}

/// Fixed-concurrency worker pool defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Aggregate wall-clock budget for one `run` call.
    #[serde(default = "default_pool_timeout")]
    pub timeout_seconds: u64,
}

fn default_pool_timeout() -> u64 { 300 }

impl Default for PoolConfig {
    fn default() -> Self {
        Self { timeout_seconds: default_pool_timeout() }
    }
}

impl PoolConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

/// Background job defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobsConfig {
    #[serde(default = "default_wait_timeout")]
    pub wait_timeout_seconds: u64,
}

fn default_wait_timeout() -> u64 { 300 }

impl Default for JobsConfig {
    fn default() -> Self {
        Self { wait_timeout_seconds: default_wait_timeout() }
    }
}

impl JobsConfig {
    pub fn wait_timeout(&self) -> Duration {
        Duration::from_secs(self.wait_timeout_seconds)
    }
}

/// Hill-climbing controller settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdaptiveConfig {
    /// Smallest slice the controller will dispatch (except the final remainder).
    #[serde(default = "default_min_batch")]
    pub min_batch_size: usize,
    /// Throughput at or above `increase_ratio * slice_size` raises the limit by one.
    #[serde(default = "default_increase_ratio")]
    pub increase_ratio: f64,
    /// Throughput below `decrease_ratio * slice_size` lowers the limit by one.
    #[serde(default = "default_decrease_ratio")]
    pub decrease_ratio: f64,
    /// Timeout applied to each slice dispatched through the pool.
    #[serde(default = "default_slice_timeout")]
    pub slice_timeout_seconds: u64,
}

fn default_min_batch() -> usize { 10 }
fn default_increase_ratio() -> f64 { 0.8 }
fn default_decrease_ratio() -> f64 { 0.3 }
fn default_slice_timeout() -> u64 { 300 }

impl Default for AdaptiveConfig {
    fn default() -> Self {
        Self {
            min_batch_size: default_min_batch(),
            increase_ratio: default_increase_ratio(),
            decrease_ratio: default_decrease_ratio(),
            slice_timeout_seconds: default_slice_timeout(),
        }
    }
}

impl AdaptiveConfig {
    pub fn slice_timeout(&self) -> Duration {
        Duration::from_secs(self.slice_timeout_seconds)
    }
}

// ── Loading & Validation ──────────────────────────────────────

impl EngineConfig {
    /// Parse config from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let mut config: Self = toml::from_str(toml_str)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Load config from a file path.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml(&content)
    }

    /// Defaults plus environment overrides, including any `.env` file.
    pub fn from_env() -> Result<Self> {
        load_dotenv();
        let mut config = Self::default();
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides.
    ///
    /// Convention: `FANOUT_SECTION_KEY` overrides `section.key`, e.g.
    /// `FANOUT_THROTTLE_CACHE_TTL_SECONDS` or `FANOUT_ADAPTIVE_MIN_BATCH_SIZE`.
    /// Unparseable values are ignored.
    fn apply_env_overrides(&mut self) {
        let t = &mut self.throttle;
        if let Some(v) = env_parse("FANOUT_THROTTLE_CACHE_TTL_SECONDS") {
            t.cache_ttl_seconds = v;
        }
        if let Some(v) = env_parse("FANOUT_THROTTLE_ELEVATED_PRESSURE_PERCENT") {
            t.elevated_pressure_percent = v;
        }
        if let Some(v) = env_parse("FANOUT_THROTTLE_CRITICAL_PRESSURE_PERCENT") {
            t.critical_pressure_percent = v;
        }
        if let Some(v) = env_parse("FANOUT_THROTTLE_DEFAULT_MAX_LIMIT") {
            t.default_max_limit = v;
        }
        if let Some(v) = env_parse("FANOUT_THROTTLE_DEFAULT_LOAD_FACTOR") {
            t.default_load_factor = v;
        }
        if let Some(v) = env_parse("FANOUT_POOL_TIMEOUT_SECONDS") {
            self.pool.timeout_seconds = v;
        }
        if let Some(v) = env_parse("FANOUT_JOBS_WAIT_TIMEOUT_SECONDS") {
            self.jobs.wait_timeout_seconds = v;
        }
        let a = &mut self.adaptive;
        if let Some(v) = env_parse("FANOUT_ADAPTIVE_MIN_BATCH_SIZE") {
            a.min_batch_size = v;
        }
        if let Some(v) = env_parse("FANOUT_ADAPTIVE_INCREASE_RATIO") {
            a.increase_ratio = v;
        }
        if let Some(v) = env_parse("FANOUT_ADAPTIVE_DECREASE_RATIO") {
            a.decrease_ratio = v;
        }
        if let Some(v) = env_parse("FANOUT_ADAPTIVE_SLICE_TIMEOUT_SECONDS") {
            a.slice_timeout_seconds = v;
        }
    }

    /// Reject values that would make the engine misbehave.
    pub fn validate(&self) -> Result<()> {
        self.validate_throttle()?;
        self.validate_timeouts()?;
        self.validate_adaptive()?;
        Ok(())
    }

    fn validate_throttle(&self) -> Result<()> {
        let t = &self.throttle;
        for (name, pct) in [
            ("elevated_pressure_percent", t.elevated_pressure_percent),
            ("critical_pressure_percent", t.critical_pressure_percent),
            ("fallback_pressure_percent", t.fallback_pressure_percent),
        ] {
            if !(0.0..=100.0).contains(&pct) {
                return Err(FanoutError::invalid(format!(
                    "throttle.{name} must be within 0..=100, got {pct}"
                )));
            }
        }
        if t.elevated_pressure_percent > t.critical_pressure_percent {
            return Err(FanoutError::invalid(format!(
                "throttle.elevated_pressure_percent ({}) exceeds critical_pressure_percent ({})",
                t.elevated_pressure_percent, t.critical_pressure_percent
            )));
        }
        for (name, factor) in [
            ("elevated_reduction", t.elevated_reduction),
            ("critical_reduction", t.critical_reduction),
        ] {
            if !(factor > 0.0 && factor <= 1.0) {
                return Err(FanoutError::invalid(format!(
                    "throttle.{name} must be within (0, 1], got {factor}"
                )));
            }
        }
        if t.default_max_limit < 1 {
            return Err(FanoutError::invalid("throttle.default_max_limit must be at least 1"));
        }
        if !(0.1..=1.0).contains(&t.default_load_factor) {
            return Err(FanoutError::invalid(format!(
                "throttle.default_load_factor must be within 0.1..=1.0, got {}",
                t.default_load_factor
            )));
        }
        Ok(())
    }

    fn validate_timeouts(&self) -> Result<()> {
        for (name, secs) in [
            ("pool.timeout_seconds", self.pool.timeout_seconds),
            ("jobs.wait_timeout_seconds", self.jobs.wait_timeout_seconds),
            ("adaptive.slice_timeout_seconds", self.adaptive.slice_timeout_seconds),
        ] {
            if secs == 0 {
                return Err(FanoutError::invalid(format!("{name} must be greater than zero")));
            }
        }
        Ok(())
    }

    fn validate_adaptive(&self) -> Result<()> {
        let a = &self.adaptive;
        if a.min_batch_size < 1 {
            return Err(FanoutError::invalid("adaptive.min_batch_size must be at least 1"));
        }
        for (name, ratio) in [
            ("increase_ratio", a.increase_ratio),
            ("decrease_ratio", a.decrease_ratio),
        ] {
            if !(0.0..=1.0).contains(&ratio) {
                return Err(FanoutError::invalid(format!(
                    "adaptive.{name} must be within 0..=1, got {ratio}"
                )));
            }
        }
        if a.decrease_ratio > a.increase_ratio {
            return Err(FanoutError::invalid(format!(
                "adaptive.decrease_ratio ({}) exceeds increase_ratio ({})",
                a.decrease_ratio, a.increase_ratio
            )));
        }
        Ok(())
    }

    /// Print a summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Engine config loaded:");
        tracing::info!(
            "  throttle:  cache_ttl={}s, pressure={}%/{}%, max_limit={}",
            self.throttle.cache_ttl_seconds,
            self.throttle.elevated_pressure_percent,
            self.throttle.critical_pressure_percent,
            self.throttle.default_max_limit
        );
        tracing::info!("  pool:      timeout={}s", self.pool.timeout_seconds);
        tracing::info!("  jobs:      wait_timeout={}s", self.jobs.wait_timeout_seconds);
        tracing::info!(
            "  adaptive:  min_batch={}, ratios={}/{}",
            self.adaptive.min_batch_size,
            self.adaptive.increase_ratio,
            self.adaptive.decrease_ratio
        );
    }

    /// JSON view of the config for diagnostics output.
    pub fn summary(&self) -> serde_json::Value {
        serde_json::json!({
            "throttle": {
                "cache_ttl_seconds": self.throttle.cache_ttl_seconds,
                "elevated_pressure_percent": self.throttle.elevated_pressure_percent,
                "critical_pressure_percent": self.throttle.critical_pressure_percent,
                "default_max_limit": self.throttle.default_max_limit,
                "default_load_factor": self.throttle.default_load_factor,
            },
            "pool": { "timeout_seconds": self.pool.timeout_seconds },
            "jobs": { "wait_timeout_seconds": self.jobs.wait_timeout_seconds },
            "adaptive": {
                "min_batch_size": self.adaptive.min_batch_size,
                "increase_ratio": self.adaptive.increase_ratio,
                "decrease_ratio": self.adaptive.decrease_ratio,
                "slice_timeout_seconds": self.adaptive.slice_timeout_seconds,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = EngineConfig::default();
        config.validate().unwrap();
        assert_eq!(config.throttle.cache_ttl(), Duration::from_secs(300));
        assert_eq!(config.throttle.elevated_pressure_percent, 80.0);
        assert_eq!(config.throttle.critical_pressure_percent, 90.0);
        assert_eq!(config.adaptive.min_batch_size, 10);
        assert_eq!(config.adaptive.increase_ratio, 0.8);
        assert_eq!(config.adaptive.decrease_ratio, 0.3);
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let config = EngineConfig::from_toml(
            r#"
            [adaptive]
            min_batch_size = 4

            [pool]
            timeout_seconds = 12
            "#,
        )
        .unwrap();
        assert_eq!(config.adaptive.min_batch_size, 4);
        assert_eq!(config.adaptive.increase_ratio, 0.8);
        assert_eq!(config.pool.timeout(), Duration::from_secs(12));
        assert_eq!(config.throttle.default_max_limit, 32);
    }

    #[test]
    fn empty_toml_is_default() {
        let config = EngineConfig::from_toml("").unwrap();
        assert_eq!(config.jobs.wait_timeout_seconds, 300);
    }

    #[test]
    fn zero_timeout_rejected() {
        let err = EngineConfig::from_toml("[jobs]\nwait_timeout_seconds = 0\n").unwrap_err();
        assert!(matches!(err, FanoutError::InvalidConfiguration(_)));
        assert!(err.to_string().contains("jobs.wait_timeout_seconds"));
    }

    #[test]
    fn inverted_thresholds_rejected() {
        let mut config = EngineConfig::default();
        config.throttle.elevated_pressure_percent = 95.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn out_of_range_reduction_rejected() {
        let mut config = EngineConfig::default();
        config.throttle.critical_reduction = 0.0;
        assert!(config.validate().is_err());
        config.throttle.critical_reduction = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn inverted_ratios_rejected() {
        let mut config = EngineConfig::default();
        config.adaptive.decrease_ratio = 0.9;
        assert!(config.validate().is_err());
    }

    #[test]
    fn load_factor_bounds() {
        let mut config = EngineConfig::default();
        config.throttle.default_load_factor = 0.05;
        assert!(config.validate().is_err());
        config.throttle.default_load_factor = 0.1;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn malformed_toml_is_parse_error() {
        let err = EngineConfig::from_toml("[pool\ntimeout_seconds = 1").unwrap_err();
        assert!(matches!(err, FanoutError::ConfigParse(_)));
    }

    #[test]
    fn from_file_reads_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[throttle]\ndefault_max_limit = 8").unwrap();
        let config = EngineConfig::from_file(file.path()).unwrap();
        assert_eq!(config.throttle.default_max_limit, 8);
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = EngineConfig::from_file("/nonexistent/fanout.toml").unwrap_err();
        assert!(matches!(err, FanoutError::ConfigIo(_)));
    }
}
