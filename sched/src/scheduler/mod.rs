//! Scheduler subsystem
//!
//! Weighted-fair scheduler: weight table, sched entities, task groups with
//! bandwidth control, per-core run queues and the load balancer.

pub mod core;
pub mod entity;
pub mod group;
pub mod switch;
pub mod weight;

// Re-exports
pub use self::core::error::{ErrorKind, SchedulerError, SchedulerResult};
pub use self::core::loadbalancer::Migration;
pub use self::core::runqueue::CoreStats;
pub use self::core::scheduler::{Decision, Scheduler};
pub use self::core::statistics::StatsSnapshot;
pub use entity::{TaskId, TaskStats, TaskState};
pub use group::{GroupFlags, GroupId, GroupStats};
pub use switch::{NoopSwitch, SwitchHook, SwitchStats};
