//! Task groups
//!
//! Hierarchical containers for sched entities. Each group carries a
//! bandwidth window shared by everything below it; charging a task charges
//! every ancestor. Groups live in an arena keyed by [`GroupId`] and refer to
//! each other by handle only.

pub mod bandwidth;

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt;
use core::sync::atomic::{AtomicU64, Ordering};

use bitflags::bitflags;
use hashbrown::HashMap;
use log::{debug, info};
use spin::{Mutex, RwLock};

pub use bandwidth::Bandwidth;

use crate::config::MAX_GROUP_DEPTH;
use crate::scheduler::core::error::{SchedulerError, SchedulerResult};
use crate::scheduler::entity::TaskId;

/// Opaque group handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupId(pub u64);

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "G{}", self.0)
    }
}

bitflags! {
    /// Group status bits
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct GroupFlags: u32 {
        /// Quota used up in the current window
        const THROTTLED = 0b0001;
        /// A quota is configured
        const LIMITED   = 0b0010;
        /// Destroyed; stale handles must not attach to it
        const DEAD      = 0b0100;
    }
}

pub struct TaskGroup {
    id: GroupId,
    parent: Option<GroupId>,
    depth: usize,
    inner: Mutex<GroupInner>,
}

struct GroupInner {
    bandwidth: Bandwidth,
    group_vruntime: u64,
    /// Sum of member task weights
    weight: u64,
    children: Vec<GroupId>,
    tasks: Vec<TaskId>,
    flags: GroupFlags,
    total_runtime: u64,
    nr_throttled: u64,
}

impl GroupInner {
    fn new(bandwidth: Bandwidth) -> Self {
        let mut flags = GroupFlags::empty();
        flags.set(GroupFlags::LIMITED, bandwidth.quota_ns().is_some());
        Self {
            bandwidth,
            group_vruntime: 0,
            weight: 0,
            children: Vec::new(),
            tasks: Vec::new(),
            flags,
            total_runtime: 0,
            nr_throttled: 0,
        }
    }

    /// Lazy window reset; clears the throttle bit
    fn refresh(&mut self, id: GroupId, now: u64) {
        if self.bandwidth.refresh(now) && self.flags.contains(GroupFlags::THROTTLED) {
            self.flags.remove(GroupFlags::THROTTLED);
            debug!("[SCHED] {} unthrottled, next window ends at {}", id, self.bandwidth.deadline_ns());
        }
    }
}

/// Read-only view of one group
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupStats {
    pub id: GroupId,
    pub parent: Option<GroupId>,
    pub depth: usize,
    pub period_ns: u64,
    pub quota_ns: Option<u64>,
    pub runtime_ns: u64,
    pub deadline_ns: u64,
    pub group_vruntime: u64,
    pub weight: u64,
    pub nr_tasks: usize,
    pub nr_children: usize,
    pub flags: GroupFlags,
    pub total_runtime: u64,
    pub nr_throttled: u64,
}

/// Group arena
pub(crate) struct GroupTable {
    groups: RwLock<HashMap<GroupId, Arc<TaskGroup>>>,
    next_id: AtomicU64,
    max_groups: usize,
    max_depth: usize,
    root: GroupId,
}

impl GroupTable {
    /// Create the arena with its root group (unlimited, depth 0)
    pub(crate) fn new(max_groups: usize, max_depth: usize, period_ns: u64, now: u64) -> Self {
        let root = GroupId(0);
        let mut groups = HashMap::new();
        groups.insert(
            root,
            Arc::new(TaskGroup {
                id: root,
                parent: None,
                depth: 0,
                inner: Mutex::new(GroupInner::new(Bandwidth::unlimited(period_ns, now))),
            }),
        );
        Self {
            groups: RwLock::new(groups),
            next_id: AtomicU64::new(1),
            max_groups,
            max_depth,
            root,
        }
    }

    #[inline]
    pub(crate) fn root(&self) -> GroupId {
        self.root
    }

    pub(crate) fn len(&self) -> usize {
        self.groups.read().len()
    }

    /// Look a group up; the arena lock is released before returning
    pub(crate) fn get(&self, id: GroupId) -> SchedulerResult<Arc<TaskGroup>> {
        self.groups
            .read()
            .get(&id)
            .cloned()
            .ok_or(SchedulerError::GroupNotFound { group_id: id.0 })
    }

    pub(crate) fn contains(&self, id: GroupId) -> bool {
        self.groups.read().contains_key(&id)
    }

    /// Visit `start` and every ancestor, child first, one lock at a time.
    fn walk_up<F>(&self, start: GroupId, mut visit: F)
    where
        F: FnMut(&TaskGroup, &mut GroupInner),
    {
        let mut current = Some(start);
        let mut hops = 0usize;
        while let Some(id) = current {
            // Ancestors of a live group cannot be destroyed, only `start` can vanish
            let Ok(group) = self.get(id) else { break };
            {
                let mut inner = group.inner.lock();
                visit(&group, &mut inner);
            }
            hops += 1;
            crate::sched_assert!(hops <= MAX_GROUP_DEPTH + 1, "group hierarchy has a cycle");
            current = group.parent;
        }
    }

    pub(crate) fn create(&self, parent: GroupId, bandwidth: Bandwidth) -> SchedulerResult<GroupId> {
        let parent_group = self.get(parent)?;
        let depth = parent_group.depth + 1;
        if depth >= self.max_depth {
            return Err(SchedulerError::GroupDepthExceeded { depth, max: self.max_depth });
        }

        let id = GroupId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let group = Arc::new(TaskGroup {
            id,
            parent: Some(parent),
            depth,
            inner: Mutex::new(GroupInner::new(bandwidth)),
        });

        {
            let mut groups = self.groups.write();
            if groups.len() >= self.max_groups {
                return Err(SchedulerError::GroupLimitReached {
                    current: groups.len(),
                    max: self.max_groups,
                });
            }
            groups.insert(id, group);
        }

        {
            let mut inner = parent_group.inner.lock();
            if inner.flags.contains(GroupFlags::DEAD) {
                drop(inner);
                self.groups.write().remove(&id);
                return Err(SchedulerError::GroupNotFound { group_id: parent.0 });
            }
            inner.children.push(id);
        }

        info!("[SCHED] Created group {} under {} (depth {})", id, parent, depth);
        Ok(id)
    }

    pub(crate) fn destroy(&self, id: GroupId) -> SchedulerResult<()> {
        if id == self.root {
            return Err(SchedulerError::RootGroup);
        }
        let group = self.get(id)?;
        {
            let mut inner = group.inner.lock();
            if inner.flags.contains(GroupFlags::DEAD) {
                return Err(SchedulerError::GroupNotFound { group_id: id.0 });
            }
            if !inner.tasks.is_empty() || !inner.children.is_empty() {
                return Err(SchedulerError::GroupBusy {
                    group_id: id.0,
                    tasks: inner.tasks.len(),
                    children: inner.children.len(),
                });
            }
            inner.flags.insert(GroupFlags::DEAD);
        }

        self.groups.write().remove(&id);
        if let Some(parent) = group.parent.and_then(|p| self.get(p).ok()) {
            parent.inner.lock().children.retain(|&child| child != id);
        }

        info!("[SCHED] Destroyed group {}", id);
        Ok(())
    }

    /// Replace a group's bandwidth; a new window starts at `now`
    pub(crate) fn set_bandwidth(&self, id: GroupId, bandwidth: Bandwidth) -> SchedulerResult<()> {
        let group = self.get(id)?;
        let mut inner = group.inner.lock();
        inner.bandwidth = bandwidth;
        inner.flags.remove(GroupFlags::THROTTLED);
        inner.flags.set(GroupFlags::LIMITED, bandwidth.quota_ns().is_some());
        debug!(
            "[SCHED] {} bandwidth: quota {:?} / period {}ns",
            id,
            bandwidth.quota_ns(),
            bandwidth.period_ns()
        );
        Ok(())
    }

    /// True when `group` and every ancestor have quota left this window
    pub(crate) fn has_budget(&self, group: GroupId, now: u64) -> bool {
        let mut budget = true;
        self.walk_up(group, |g, inner| {
            inner.refresh(g.id, now);
            if !inner.bandwidth.has_budget() {
                budget = false;
            }
        });
        budget
    }

    /// Charge `delta` of execution to `group` and all its ancestors
    pub(crate) fn propagate_runtime(&self, group: GroupId, delta: u64, now: u64) {
        self.walk_up(group, |g, inner| {
            inner.refresh(g.id, now);
            inner.group_vruntime = inner.group_vruntime.saturating_add(delta);
            inner.total_runtime = inner.total_runtime.saturating_add(delta);
            if inner.bandwidth.charge(delta) {
                inner.flags.insert(GroupFlags::THROTTLED);
                inner.nr_throttled += 1;
                debug!(
                    "[SCHED] {} throttled: {}ns used, window ends at {}",
                    g.id,
                    inner.bandwidth.runtime_ns(),
                    inner.bandwidth.deadline_ns()
                );
            }
        });
    }

    pub(crate) fn attach_task(&self, group: GroupId, task: TaskId, weight: u64) -> SchedulerResult<()> {
        let g = self.get(group)?;
        let mut inner = g.inner.lock();
        if inner.flags.contains(GroupFlags::DEAD) {
            return Err(SchedulerError::GroupNotFound { group_id: group.0 });
        }
        inner.tasks.push(task);
        inner.weight = inner.weight.saturating_add(weight);
        Ok(())
    }

    pub(crate) fn detach_task(&self, group: GroupId, task: TaskId, weight: u64) {
        if let Ok(g) = self.get(group) {
            let mut inner = g.inner.lock();
            inner.tasks.retain(|&t| t != task);
            inner.weight = inner.weight.saturating_sub(weight);
        }
    }

    pub(crate) fn reweight(&self, group: GroupId, old_weight: u64, new_weight: u64) {
        if let Ok(g) = self.get(group) {
            let mut inner = g.inner.lock();
            inner.weight = inner.weight.saturating_sub(old_weight).saturating_add(new_weight);
        }
    }

    /// Window grant for one member: `(budget, period)`.
    ///
    /// The group's quota (or whole period if unlimited) is split by weight
    /// among its members.
    pub(crate) fn quota_share(&self, group: GroupId, weight: u64, fallback_period: u64) -> (u64, u64) {
        let Ok(g) = self.get(group) else {
            return (fallback_period, fallback_period);
        };
        let inner = g.inner.lock();
        let total = inner.weight.max(weight).max(1);
        let grant = inner.bandwidth.quota_or_period() as u128 * weight as u128 / total as u128;
        (grant as u64, inner.bandwidth.period_ns())
    }

    pub(crate) fn period_of(&self, group: GroupId) -> Option<u64> {
        self.get(group).ok().map(|g| g.inner.lock().bandwidth.period_ns())
    }

    pub(crate) fn stats(&self, id: GroupId) -> SchedulerResult<GroupStats> {
        let group = self.get(id)?;
        let inner = group.inner.lock();
        Ok(GroupStats {
            id,
            parent: group.parent,
            depth: group.depth,
            period_ns: inner.bandwidth.period_ns(),
            quota_ns: inner.bandwidth.quota_ns(),
            runtime_ns: inner.bandwidth.runtime_ns(),
            deadline_ns: inner.bandwidth.deadline_ns(),
            group_vruntime: inner.group_vruntime,
            weight: inner.weight,
            nr_tasks: inner.tasks.len(),
            nr_children: inner.children.len(),
            flags: inner.flags,
            total_runtime: inner.total_runtime,
            nr_throttled: inner.nr_throttled,
        })
    }
}
