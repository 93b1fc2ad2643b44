//! Exo-OS fair scheduler
//!
//! Weighted-fair CPU scheduling for a multi-core kernel:
//! - Per-core run queues ordered by virtual runtime
//! - Hierarchical task groups with quota/period bandwidth control
//! - Cross-core load balancing, one migration per pass
//!
//! All state hangs off an explicit [`Scheduler`] value. Several instances
//! can coexist; nothing is global.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod config;
pub mod scheduler;

pub use config::SchedConfig;
pub use scheduler::{
    Decision, GroupId, Migration, NoopSwitch, Scheduler, SchedulerError, SchedulerResult,
    SwitchHook, TaskId, TaskState,
};
