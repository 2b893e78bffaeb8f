//! Background job lifecycle: submit, poll, wait with timeout, cleanup.
//!
//! Split into focused submodules:
//! - `handle`: `JobHandle` and the shared per-job state cell
//! - `manager`: `JobManager` (spawning, polling, `await_all`)
//! - `slots`: numbered worker slots gating how many jobs run at once

mod handle;
mod manager;
mod slots;

pub use self::handle::JobHandle;
pub use self::manager::{JobCensus, JobManager};
pub(crate) use self::slots::SlotPool;
