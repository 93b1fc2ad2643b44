//! Scheduler core module
//!
//! - `runqueue`: per-core vruntime-ordered run queue
//! - `scheduler`: the scheduling context and its core loop
//! - `loadbalancer`: per-core load mirrors and migration
//! - `statistics`: global counters

pub mod error;
pub mod loadbalancer;
pub mod runqueue;
pub mod scheduler;
pub mod statistics;

pub use error::{SchedulerError, SchedulerResult};
pub use scheduler::{Decision, Scheduler};
