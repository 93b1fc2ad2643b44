//! Sched entity - the per-task scheduling record
//!
//! Owned by exactly one core run queue at a time. Holds the virtual
//! runtime that orders the queue and the per-entity bandwidth window.

pub mod state;

use core::fmt;

pub use state::{validate_transition, TaskState};

use crate::scheduler::core::runqueue::VruntimeKey;
use crate::scheduler::group::GroupId;
use crate::scheduler::weight::{scale_vruntime, weight_of};

/// Opaque task handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(pub u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "T{}", self.0)
    }
}

#[derive(Debug, Clone)]
pub struct SchedEntity {
    pub(crate) id: TaskId,
    pub(crate) state: TaskState,
    pub(crate) niceness: i32,
    pub(crate) weight: u64,
    pub(crate) vruntime: u64,
    /// Dispatch timestamp; `Some` only while the entity holds the CPU
    pub(crate) exec_start: Option<u64>,
    pub(crate) sum_exec_runtime: u64,
    pub(crate) group: GroupId,
    pub(crate) core_id: usize,
    /// End of the current entity window; `None` until first dispatch
    pub(crate) deadline: Option<u64>,
    pub(crate) runtime_left: u64,
    /// Key under which the entity sits in its core's index
    pub(crate) index_key: Option<VruntimeKey>,
    pub(crate) last_migration: Option<u64>,

    pub(crate) deadline_misses: u64,
    pub(crate) budget_exhaustions: u64,
    pub(crate) nr_switches: u64,
    pub(crate) nr_migrations: u64,
}

impl SchedEntity {
    pub(crate) fn new(id: TaskId, niceness: i32, group: GroupId, core_id: usize, vruntime: u64) -> Self {
        Self {
            id,
            state: TaskState::Ready,
            niceness,
            weight: weight_of(niceness),
            vruntime,
            exec_start: None,
            sum_exec_runtime: 0,
            group,
            core_id,
            deadline: None,
            runtime_left: 0,
            index_key: None,
            last_migration: None,
            deadline_misses: 0,
            budget_exhaustions: 0,
            nr_switches: 0,
            nr_migrations: 0,
        }
    }

    /// Consume the dispatch timestamp and return the time run since.
    ///
    /// `None` when the entity was never dispatched; callers then skip
    /// accounting entirely.
    pub(crate) fn take_delta(&mut self, now: u64) -> Option<u64> {
        self.exec_start.take().map(|start| now.saturating_sub(start))
    }

    /// Charge `delta` of execution to the entity itself.
    ///
    /// Group propagation is the caller's business; this covers the
    /// entity-local counters, window and virtual runtime.
    pub(crate) fn charge(&mut self, delta: u64, now: u64, period_ns: u64) {
        self.sum_exec_runtime = self.sum_exec_runtime.saturating_add(delta);

        if self.runtime_left <= delta {
            if self.runtime_left > 0 {
                self.budget_exhaustions += 1;
            }
            self.runtime_left = 0;
            self.deadline = Some(now.saturating_add(period_ns));
        } else {
            self.runtime_left -= delta;
        }

        self.vruntime = self.vruntime.saturating_add(scale_vruntime(delta, self.weight));
    }

    /// Window over (or never armed)?
    #[inline]
    pub(crate) fn window_expired(&self, now: u64) -> bool {
        self.deadline.map_or(true, |deadline| now >= deadline)
    }

    /// Start a fresh window. Returns true when the old one ended unspent.
    pub(crate) fn rearm_window(&mut self, now: u64, budget_ns: u64, period_ns: u64) -> bool {
        let missed = self.deadline.is_some() && self.runtime_left > 0;
        if missed {
            self.deadline_misses += 1;
        }
        self.runtime_left = budget_ns;
        self.deadline = Some(now.saturating_add(period_ns));
        missed
    }

    pub(crate) fn set_niceness(&mut self, niceness: i32) {
        self.niceness = niceness;
        self.weight = weight_of(niceness);
    }

    pub fn snapshot(&self) -> TaskStats {
        TaskStats {
            id: self.id,
            state: self.state,
            niceness: self.niceness,
            weight: self.weight,
            vruntime: self.vruntime,
            sum_exec_runtime: self.sum_exec_runtime,
            group: self.group,
            core_id: self.core_id,
            deadline: self.deadline,
            runtime_left: self.runtime_left,
            deadline_misses: self.deadline_misses,
            budget_exhaustions: self.budget_exhaustions,
            nr_switches: self.nr_switches,
            nr_migrations: self.nr_migrations,
        }
    }
}

/// Read-only view of one task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskStats {
    pub id: TaskId,
    pub state: TaskState,
    pub niceness: i32,
    pub weight: u64,
    pub vruntime: u64,
    pub sum_exec_runtime: u64,
    pub group: GroupId,
    pub core_id: usize,
    pub deadline: Option<u64>,
    pub runtime_left: u64,
    pub deadline_misses: u64,
    pub budget_exhaustions: u64,
    pub nr_switches: u64,
    pub nr_migrations: u64,
}
