//! Public entry points of the fan-out engine.
//!
//! Split into focused submodules:
//! - `core`: Engine struct, constructors, throttle decisions and accessors
//! - `execution`: pooled, adaptive and partitioned runs plus background jobs

mod core;
mod execution;

pub use self::core::Engine;
