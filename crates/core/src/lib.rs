pub mod config;
pub mod error;

pub use config::{AdaptiveConfig, EngineConfig, JobsConfig, PoolConfig, ThrottleConfig};
pub use error::*;
