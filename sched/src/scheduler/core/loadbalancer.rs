//! Load Balancer - Multi-core task distribution
//!
//! Each core publishes its ready count and running flag into atomics so the
//! busiest/idlest scan never takes a run queue lock. Moving a task does:
//! both run queues are locked, under the global migration lock.

use alloc::boxed::Box;
use core::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use log::debug;
use spin::{Mutex, MutexGuard};

use super::runqueue::CoreRunQueue;
use crate::scheduler::entity::TaskId;
use crate::scheduler::weight::BASE_WEIGHT;

/// Minimum ready-count gap that justifies a migration between busy cores
pub const MIN_IMBALANCE: usize = 2;

/// Per-core load mirror
#[derive(Debug)]
pub struct CpuLoad {
    pub cpu_id: usize,
    /// Ready (indexed) tasks
    pub ready: AtomicUsize,
    /// 1 when a task occupies the running slot
    pub running: AtomicUsize,
    /// Tasks migrated away from this core
    pub migrations_out: AtomicU64,
    /// Tasks migrated to this core
    pub migrations_in: AtomicU64,
}

impl CpuLoad {
    pub const fn new(cpu_id: usize) -> Self {
        Self {
            cpu_id,
            ready: AtomicUsize::new(0),
            running: AtomicUsize::new(0),
            migrations_out: AtomicU64::new(0),
            migrations_in: AtomicU64::new(0),
        }
    }

    /// Ready load in weight units
    pub fn load(&self) -> u64 {
        self.ready.load(Ordering::Relaxed) as u64 * BASE_WEIGHT
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed) != 0
    }

    /// Mirror the run queue; caller holds its lock
    pub fn publish(&self, rq: &CoreRunQueue) {
        self.ready.store(rq.ready_count(), Ordering::Relaxed);
        self.running.store(rq.running().is_some() as usize, Ordering::Relaxed);
    }
}

/// Load imbalance status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadImbalance {
    /// Nothing worth moving
    Balanced,
    Unbalanced { busiest: usize, idlest: usize, delta: usize },
}

/// One completed migration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Migration {
    pub task: TaskId,
    pub from_core: usize,
    pub to_core: usize,
    /// Virtual runtime after renormalization on the destination
    pub vruntime: u64,
}

/// Would moving one ready task from a core with `src_ready` to one with
/// `dst_ready` (and `dst_running`) reduce the imbalance?
#[inline]
pub fn worth_migrating(src_ready: usize, dst_ready: usize, dst_running: bool) -> bool {
    if src_ready == 0 {
        return false;
    }
    src_ready >= dst_ready + MIN_IMBALANCE || (dst_ready == 0 && !dst_running)
}

/// Load balancer state
pub struct LoadBalancer {
    cpu_loads: Box<[CpuLoad]>,
    /// Serializes migrations; held by whoever locks more than one core
    migration_lock: Mutex<()>,
    balance_iterations: AtomicU64,
    total_migrations: AtomicU64,
}

impl LoadBalancer {
    pub fn new(num_cores: usize) -> Self {
        Self {
            cpu_loads: (0..num_cores).map(CpuLoad::new).collect(),
            migration_lock: Mutex::new(()),
            balance_iterations: AtomicU64::new(0),
            total_migrations: AtomicU64::new(0),
        }
    }

    #[inline]
    pub fn cpu_load(&self, cpu: usize) -> &CpuLoad {
        &self.cpu_loads[cpu]
    }

    pub fn publish(&self, rq: &CoreRunQueue) {
        self.cpu_loads[rq.core_id()].publish(rq);
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, ()> {
        let guard = self.migration_lock.lock();
        self.balance_iterations.fetch_add(1, Ordering::Relaxed);
        guard
    }

    /// `None` when another balance pass is in flight
    pub(crate) fn try_lock(&self) -> Option<MutexGuard<'_, ()>> {
        let guard = self.migration_lock.try_lock()?;
        self.balance_iterations.fetch_add(1, Ordering::Relaxed);
        Some(guard)
    }

    /// Find the least loaded core; an idle core wins ties against a busy one
    pub fn find_idlest(&self) -> Option<usize> {
        let mut best = None;
        let mut best_key = (u64::MAX, true);

        for cpu in self.cpu_loads.iter() {
            let key = (cpu.load(), cpu.is_running());
            if key < best_key {
                best_key = key;
                best = Some(cpu.cpu_id);
            }
        }

        best
    }

    /// Find the most loaded core with at least one ready task
    pub fn find_busiest(&self) -> Option<usize> {
        let mut busiest = None;
        let mut max_load = 0;

        for cpu in self.cpu_loads.iter() {
            let load = cpu.load();
            if load > max_load {
                max_load = load;
                busiest = Some(cpu.cpu_id);
            }
        }

        busiest
    }

    /// Calculate load imbalance from the published mirrors
    pub fn calculate_imbalance(&self) -> LoadImbalance {
        let (Some(busiest), Some(idlest)) = (self.find_busiest(), self.find_idlest()) else {
            return LoadImbalance::Balanced;
        };
        if busiest == idlest {
            return LoadImbalance::Balanced;
        }

        let src = &self.cpu_loads[busiest];
        let dst = &self.cpu_loads[idlest];
        let src_ready = src.ready.load(Ordering::Relaxed);
        let dst_ready = dst.ready.load(Ordering::Relaxed);

        if worth_migrating(src_ready, dst_ready, dst.is_running()) {
            LoadImbalance::Unbalanced {
                busiest,
                idlest,
                delta: src_ready.saturating_sub(dst_ready),
            }
        } else {
            LoadImbalance::Balanced
        }
    }

    /// Move one ready task from `src` to `dst`.
    ///
    /// The caller holds the migration lock and both run queue locks. The
    /// decision is re-checked against the locked queues since the mirrors
    /// may be stale. With `cost_ns`, tasks migrated within that window are
    /// passed over when another candidate exists; without it the leftmost
    /// task moves.
    pub(crate) fn migrate_one(
        &self,
        src: &mut CoreRunQueue,
        dst: &mut CoreRunQueue,
        now: u64,
        cost_ns: Option<u64>,
    ) -> Option<Migration> {
        if !worth_migrating(src.ready_count(), dst.ready_count(), dst.running().is_some()) {
            return None;
        }
        let task = match cost_ns {
            Some(cost_ns) => src.migration_candidate(now, cost_ns),
            None => src.leftmost(),
        }?;

        src.dequeue(task);
        let mut entity = src.detach(task);
        entity.vruntime = entity
            .vruntime
            .saturating_sub(src.min_vruntime())
            .saturating_add(dst.min_vruntime());
        entity.last_migration = Some(now);
        entity.nr_migrations += 1;
        let vruntime = entity.vruntime;

        dst.attach(entity);
        dst.enqueue(task);

        src.migrations_out += 1;
        dst.migrations_in += 1;
        self.record_migration(src.core_id(), dst.core_id());
        self.publish(src);
        self.publish(dst);

        debug!(
            "[SCHED] Migrated {} from core {} to core {} (vruntime {})",
            task,
            src.core_id(),
            dst.core_id(),
            vruntime
        );

        Some(Migration {
            task,
            from_core: src.core_id(),
            to_core: dst.core_id(),
            vruntime,
        })
    }

    /// Record a migration
    pub fn record_migration(&self, from_cpu: usize, to_cpu: usize) {
        self.cpu_loads[from_cpu].migrations_out.fetch_add(1, Ordering::Relaxed);
        self.cpu_loads[to_cpu].migrations_in.fetch_add(1, Ordering::Relaxed);
        self.total_migrations.fetch_add(1, Ordering::Relaxed);
    }

    /// Get statistics
    pub fn stats(&self) -> LoadBalancerStats {
        LoadBalancerStats {
            num_cores: self.cpu_loads.len(),
            total_ready: self
                .cpu_loads
                .iter()
                .map(|cpu| cpu.ready.load(Ordering::Relaxed))
                .sum(),
            balance_iterations: self.balance_iterations.load(Ordering::Relaxed),
            total_migrations: self.total_migrations.load(Ordering::Relaxed),
            imbalance: self.calculate_imbalance(),
        }
    }
}

/// Load balancer statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadBalancerStats {
    pub num_cores: usize,
    pub total_ready: usize,
    pub balance_iterations: u64,
    pub total_migrations: u64,
    pub imbalance: LoadImbalance,
}
