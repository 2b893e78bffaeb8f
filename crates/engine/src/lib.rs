//! Resource-aware parallel execution engine.
//!
//! Sizes concurrency from host CPU and memory pressure, fans work out over a
//! bounded pool with per-item failure isolation and explicit timeouts, tunes
//! its limit from observed throughput, and folds results into one summary.

pub mod adaptive;
pub mod aggregate;
pub mod engine;
pub mod jobs;
pub mod metrics;
pub mod monitor;
pub mod partition;
pub mod pool;
pub mod task;
pub mod throttle;
pub mod types;

pub use adaptive::{AdaptiveController, SliceReport, next_limit};
pub use aggregate::{AggregateSummary, FailureRecord};
pub use engine::Engine;
pub use jobs::{JobCensus, JobHandle, JobManager};
pub use metrics::{EngineMetrics, SharedMetrics, new_shared_metrics};
pub use monitor::{ProbeError, ResourceMonitor, ResourceProbe, StaticProbe, SystemProbe};
pub use partition::{DependencyGraph, TaskDependency, partition};
pub use pool::WorkerPool;
pub use task::{WorkError, WorkFn, WorkItem, WorkOutput, work_fn};
pub use throttle::ThrottleCalculator;
pub use types::{
    JobResult, JobState, PressureLevel, ResourceSnapshot, ThrottleDecision, WorkloadClass,
    assess_pressure,
};

pub use fanout_core::{EngineConfig, FanoutError, Result};
