use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use fanout_core::{FanoutError, ThrottleConfig};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Categorical hint used to bias the base concurrency estimate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WorkloadClass {
    /// One worker per logical CPU.
    Cpu,
    /// Two workers per CPU; items mostly wait on disk.
    Io,
    /// Three workers per CPU; items mostly wait on remote peers.
    Network,
    /// Half again as many workers as CPUs, rounded up.
    Mixed,
}

impl WorkloadClass {
    pub const ALL: [WorkloadClass; 4] = [Self::Cpu, Self::Io, Self::Network, Self::Mixed];

    /// Concurrency estimate before load and memory adjustments.
    pub fn base_limit(self, cpu_count: usize) -> usize {
        match self {
            Self::Cpu => cpu_count,
            Self::Io => cpu_count * 2,
            Self::Network => cpu_count * 3,
            Self::Mixed => (cpu_count * 3).div_ceil(2),
        }
    }
}

impl fmt::Display for WorkloadClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cpu => write!(f, "CPU"),
            Self::Io => write!(f, "IO"),
            Self::Network => write!(f, "Network"),
            Self::Mixed => write!(f, "Mixed"),
        }
    }
}

impl FromStr for WorkloadClass {
    type Err = FanoutError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "cpu" => Ok(Self::Cpu),
            "io" => Ok(Self::Io),
            "network" => Ok(Self::Network),
            "mixed" => Ok(Self::Mixed),
            other => Err(FanoutError::invalid(format!(
                "unknown workload class '{other}', expected CPU, IO, Network or Mixed"
            ))),
        }
    }
}

/// Host memory pressure level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PressureLevel {
    /// Full concurrency.
    Normal,
    /// Above the elevated threshold: concurrency scaled by `elevated_reduction`.
    Elevated,
    /// Above the critical threshold: concurrency scaled by `critical_reduction`.
    Critical,
}

impl PressureLevel {
    pub fn reduction_factor(self, config: &ThrottleConfig) -> f64 {
        match self {
            Self::Normal => 1.0,
            Self::Elevated => config.elevated_reduction,
            Self::Critical => config.critical_reduction,
        }
    }
}

/// Assess pressure level from a memory utilization percentage.
pub fn assess_pressure(memory_pressure: f64, config: &ThrottleConfig) -> PressureLevel {
    if memory_pressure > config.critical_pressure_percent {
        PressureLevel::Critical
    } else if memory_pressure > config.elevated_pressure_percent {
        PressureLevel::Elevated
    } else {
        PressureLevel::Normal
    }
}

/// Point-in-time view of host resources. Never cached on its own.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ResourceSnapshot {
    /// Percentage of host memory in use.
    pub memory_pressure: f64,
    pub cpu_count: usize,
    /// Multiplier in (0, 1] applied to the load-adjusted limit.
    pub reduction_factor: f64,
    pub level: PressureLevel,
}

/// A computed concurrency limit and the inputs it was derived from.
#[derive(Debug, Clone, Serialize)]
pub struct ThrottleDecision {
    pub workload: WorkloadClass,
    pub max_limit: usize,
    pub load_factor: f64,
    pub limit: usize,
    pub snapshot: ResourceSnapshot,
    pub computed_at: DateTime<Utc>,
}

/// Lifecycle state of one dispatched unit of work.
///
/// `Pending -> Running -> {Completed | Failed | TimedOut}`. Pending work may
/// also time out directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobState {
    Pending,
    Running,
    Completed,
    Failed,
    TimedOut,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::TimedOut)
    }

    /// Whether `self -> next` is a legal transition.
    pub fn can_transition_to(self, next: JobState) -> bool {
        match (self, next) {
            (Self::Pending, Self::Running) => true,
            (Self::Pending | Self::Running, n) if n.is_terminal() => true,
            _ => false,
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::TimedOut => "timed_out",
        };
        f.write_str(s)
    }
}

/// Outcome of one job. Produced exactly once per handle.
#[derive(Debug, Clone, Serialize)]
pub struct JobResult {
    /// Item id (pool) or generated job id (background jobs).
    pub id: String,
    pub name: String,
    /// Always terminal.
    pub state: JobState,
    /// Result payload on success.
    pub output: Option<Value>,
    /// Captured error text on failure or timeout.
    pub error: Option<String>,
    /// Time spent running; zero if the job never left `Pending`.
    pub duration: Duration,
    pub started_at: DateTime<Utc>,
    /// Worker slot that ran the job, when dispatched through a pool.
    pub slot: Option<usize>,
    /// Completed, but the work function declined to do anything.
    pub skipped: bool,
    pub has_errors: bool,
}

impl JobResult {
    pub fn is_success(&self) -> bool {
        self.state == JobState::Completed
    }
}
