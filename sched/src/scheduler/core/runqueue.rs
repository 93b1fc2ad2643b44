//! Per-core run queue
//!
//! Ready entities are indexed by `(vruntime, seq)`; the sequence number
//! breaks ties in insertion order. The run queue owns the record of every
//! entity assigned to its core, whatever its state. The running entity is
//! never in the index.

use alloc::collections::BTreeMap;
use alloc::vec::Vec;

use hashbrown::HashMap;

use super::error::invariant_violated;
use crate::scheduler::entity::{SchedEntity, TaskId, TaskState};
use crate::scheduler::switch::SwitchStats;
use crate::scheduler::weight::BASE_WEIGHT;

/// Ordering key of the vruntime index
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct VruntimeKey {
    pub vruntime: u64,
    pub seq: u64,
}

pub struct CoreRunQueue {
    core_id: usize,
    ordered_index: BTreeMap<VruntimeKey, TaskId>,
    entities: HashMap<TaskId, SchedEntity>,
    running: Option<TaskId>,
    min_vruntime: u64,
    capacity: u64,
    next_seq: u64,
    /// Start of the running entity's uninterrupted slice
    slice_start: Option<u64>,
    pub(crate) switch_stats: SwitchStats,
    pub(crate) migrations_in: u64,
    pub(crate) migrations_out: u64,
}

impl CoreRunQueue {
    pub fn new(core_id: usize, capacity: u64) -> Self {
        Self {
            core_id,
            ordered_index: BTreeMap::new(),
            entities: HashMap::new(),
            running: None,
            min_vruntime: 0,
            capacity,
            next_seq: 0,
            slice_start: None,
            switch_stats: SwitchStats::default(),
            migrations_in: 0,
            migrations_out: 0,
        }
    }

    #[inline]
    pub fn core_id(&self) -> usize {
        self.core_id
    }

    #[inline]
    pub fn ready_count(&self) -> usize {
        self.ordered_index.len()
    }

    /// Ready load in weight units
    #[inline]
    pub fn load(&self) -> u64 {
        self.ready_count() as u64 * BASE_WEIGHT
    }

    #[inline]
    pub fn running(&self) -> Option<TaskId> {
        self.running
    }

    #[inline]
    pub fn min_vruntime(&self) -> u64 {
        self.min_vruntime
    }

    pub fn contains(&self, id: TaskId) -> bool {
        self.entities.contains_key(&id)
    }

    pub(crate) fn entity(&self, id: TaskId) -> &SchedEntity {
        self.entities
            .get(&id)
            .unwrap_or_else(|| invariant_violated("entity missing from its core"))
    }

    pub(crate) fn entity_mut(&mut self, id: TaskId) -> &mut SchedEntity {
        self.entities
            .get_mut(&id)
            .unwrap_or_else(|| invariant_violated("entity missing from its core"))
    }

    /// Take ownership of an entity record (not yet indexed)
    pub(crate) fn attach(&mut self, mut entity: SchedEntity) {
        entity.core_id = self.core_id;
        entity.index_key = None;
        let previous = self.entities.insert(entity.id, entity);
        crate::sched_assert!(previous.is_none(), "entity attached twice");
    }

    /// Give up an entity record; it must be neither indexed nor running
    pub(crate) fn detach(&mut self, id: TaskId) -> SchedEntity {
        crate::sched_assert!(self.running != Some(id), "detaching the running entity");
        let entity = self
            .entities
            .remove(&id)
            .unwrap_or_else(|| invariant_violated("detaching unknown entity"));
        crate::sched_assert!(entity.index_key.is_none(), "detaching an indexed entity");
        entity
    }

    /// Insert into the index and mark Ready
    pub(crate) fn enqueue(&mut self, id: TaskId) {
        crate::sched_assert!(self.running != Some(id), "enqueueing the running entity");
        let seq = self.next_seq;
        self.next_seq += 1;

        let entity = self.entity_mut(id);
        crate::sched_assert!(entity.index_key.is_none(), "entity indexed twice");
        let key = VruntimeKey { vruntime: entity.vruntime, seq };
        entity.index_key = Some(key);
        entity.state = TaskState::Ready;

        self.ordered_index.insert(key, id);
    }

    /// Remove from the index; the caller sets the new state
    pub(crate) fn dequeue(&mut self, id: TaskId) {
        let key = self
            .entity_mut(id)
            .index_key
            .take()
            .unwrap_or_else(|| invariant_violated("dequeue of an entity not in the index"));
        let removed = self.ordered_index.remove(&key);
        crate::sched_assert!(removed == Some(id), "index key does not match entity");
    }

    pub(crate) fn is_queued(&self, id: TaskId) -> bool {
        self.entities.get(&id).map_or(false, |e| e.index_key.is_some())
    }

    pub fn leftmost(&self) -> Option<TaskId> {
        self.ordered_index.values().next().copied()
    }

    /// Ready entities in dispatch order
    pub fn ready_iter(&self) -> impl Iterator<Item = TaskId> + '_ {
        self.ordered_index.values().copied()
    }

    /// Put `id` on the CPU at `now`
    pub(crate) fn set_running(&mut self, id: TaskId, now: u64) {
        crate::sched_assert!(self.running.is_none(), "core already has a running entity");
        let entity = self.entity_mut(id);
        crate::sched_assert!(entity.index_key.is_none(), "running entity still indexed");
        entity.state = TaskState::Running;
        entity.exec_start = Some(now);
        self.running = Some(id);
    }

    #[inline]
    pub(crate) fn clear_running(&mut self) {
        self.running = None;
    }

    pub(crate) fn start_slice(&mut self, now: u64) {
        self.slice_start = Some(now);
    }

    /// Close the open slice, returning its length
    pub(crate) fn end_slice(&mut self, now: u64) -> Option<u64> {
        self.slice_start.take().map(|start| now.saturating_sub(start))
    }

    /// Raise the floor to the smallest live vruntime; never lowers it
    pub(crate) fn update_min_vruntime(&mut self) {
        let running = self.running.map(|id| self.entity(id).vruntime);
        let leftmost = self.ordered_index.keys().next().map(|key| key.vruntime);

        let candidate = match (running, leftmost) {
            (Some(r), Some(l)) => Some(r.min(l)),
            (r, l) => r.or(l),
        };
        if let Some(vruntime) = candidate {
            self.min_vruntime = self.min_vruntime.max(vruntime);
        }
    }

    /// Ready entity to hand to another core.
    ///
    /// The leftmost one not migrated within `cost_ns`; the plain leftmost if
    /// every candidate moved recently.
    pub(crate) fn migration_candidate(&self, now: u64, cost_ns: u64) -> Option<TaskId> {
        self.ordered_index
            .values()
            .copied()
            .find(|&id| {
                self.entity(id)
                    .last_migration
                    .map_or(true, |at| now.saturating_sub(at) >= cost_ns)
            })
            .or_else(|| self.leftmost())
    }

    /// Verify index/running/state consistency.
    pub(crate) fn verify(&self) {
        if let Some(id) = self.running {
            let entity = self.entity(id);
            crate::sched_assert!(entity.index_key.is_none(), "running entity present in the index");
            crate::sched_assert!(entity.state == TaskState::Running, "running slot holds a non-running entity");
        }
        for (key, &id) in &self.ordered_index {
            let entity = self.entity(id);
            crate::sched_assert!(entity.index_key == Some(*key), "stale index key");
            crate::sched_assert!(entity.state == TaskState::Ready, "indexed entity not Ready");
            crate::sched_assert!(entity.core_id == self.core_id, "indexed entity owned by another core");
        }
        let ready = self.entities.values().filter(|e| e.state == TaskState::Ready).count();
        crate::sched_assert!(ready == self.ordered_index.len(), "ready count out of sync");
    }

    pub fn stats(&self) -> CoreStats {
        CoreStats {
            core_id: self.core_id,
            ready: self.ready_count(),
            ready_tasks: self.ready_iter().collect(),
            running: self.running,
            blocked: self
                .entities
                .values()
                .filter(|e| e.state == TaskState::Blocked)
                .count(),
            min_vruntime: self.min_vruntime,
            load: self.load(),
            capacity: self.capacity,
            switches: self.switch_stats,
            migrations_in: self.migrations_in,
            migrations_out: self.migrations_out,
        }
    }
}

/// Read-only view of one core
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoreStats {
    pub core_id: usize,
    pub ready: usize,
    /// Ready tasks in dispatch order
    pub ready_tasks: Vec<TaskId>,
    pub running: Option<TaskId>,
    pub blocked: usize,
    pub min_vruntime: u64,
    pub load: u64,
    pub capacity: u64,
    pub switches: SwitchStats,
    pub migrations_in: u64,
    pub migrations_out: u64,
}
