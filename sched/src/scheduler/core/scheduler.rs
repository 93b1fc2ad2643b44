//! Fair scheduler - per-core run queues with group bandwidth control
//!
//! One [`Scheduler`] value owns every core's run queue, the task group
//! arena and the load balancer.
//!
//! Lock order: migration lock → core run queue → task group. The task
//! directory and the group arena are leaves, held only for a lookup or an
//! insert. A core loop never blocks on the migration lock while holding its
//! own run queue; it uses `try_lock` and skips balancing instead.

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use hashbrown::HashMap;
use log::{debug, info, trace};
use spin::{Mutex, MutexGuard, RwLock};

use super::error::{SchedulerError, SchedulerResult};
use super::loadbalancer::{LoadBalancer, LoadBalancerStats, LoadImbalance, Migration};
use super::runqueue::{CoreRunQueue, CoreStats};
use super::statistics::{SchedulerStats, StatsSnapshot};
use crate::config::SchedConfig;
use crate::scheduler::entity::{validate_transition, SchedEntity, TaskId, TaskState, TaskStats};
use crate::scheduler::group::{Bandwidth, GroupId, GroupStats, GroupTable};
use crate::scheduler::switch::{NoopSwitch, SwitchHook};
use crate::scheduler::weight::{is_valid_niceness, weight_of, NICE_MAX, NICE_MIN};
use crate::sched_error;

/// Outcome of one scheduling decision on a core
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// `next` was dispatched in place of `prev`
    Switched { prev: Option<TaskId>, next: TaskId },
    /// The running task keeps the core
    Continued(TaskId),
    /// Nothing eligible to run
    Idle,
}

impl Decision {
    /// Task on the core after the decision
    pub fn running(&self) -> Option<TaskId> {
        match *self {
            Self::Switched { next, .. } => Some(next),
            Self::Continued(id) => Some(id),
            Self::Idle => None,
        }
    }
}

/// Group budget answers for the duration of one decision
#[derive(Default)]
struct BudgetCache {
    seen: Vec<(GroupId, bool)>,
}

impl BudgetCache {
    fn check(&mut self, group: GroupId, probe: impl FnOnce() -> bool) -> bool {
        if let Some(&(_, budget)) = self.seen.iter().find(|(g, _)| *g == group) {
            return budget;
        }
        let budget = probe();
        self.seen.push((group, budget));
        budget
    }
}

pub struct Scheduler<H: SwitchHook = NoopSwitch> {
    config: SchedConfig,
    cores: Box<[Mutex<CoreRunQueue>]>,
    balancer: LoadBalancer,
    groups: GroupTable,
    /// Task → owning core
    directory: RwLock<HashMap<TaskId, usize>>,
    next_task_id: AtomicU64,
    live_tasks: AtomicUsize,
    /// Latest time observed by any core
    clock: AtomicU64,
    stats: SchedulerStats,
    hook: H,
}

impl Scheduler {
    pub fn new(config: SchedConfig) -> SchedulerResult<Self> {
        Self::with_hook(config, NoopSwitch)
    }
}

impl<H: SwitchHook> Scheduler<H> {
    pub fn with_hook(config: SchedConfig, hook: H) -> SchedulerResult<Self> {
        config.validate().map_err(|err| sched_error!(err))?;

        let cores = (0..config.num_cores)
            .map(|id| Mutex::new(CoreRunQueue::new(id, config.core_capacity)))
            .collect();

        info!(
            "[SCHED] Fair scheduler ready: {} cores, latency {}ns, default period {}ns",
            config.num_cores, config.fair_latency_ns, config.default_period_ns
        );

        Ok(Self {
            balancer: LoadBalancer::new(config.num_cores),
            groups: GroupTable::new(
                config.max_groups,
                config.max_group_depth,
                config.default_period_ns,
                0,
            ),
            config,
            cores,
            directory: RwLock::new(HashMap::new()),
            next_task_id: AtomicU64::new(1),
            live_tasks: AtomicUsize::new(0),
            clock: AtomicU64::new(0),
            stats: SchedulerStats::new(),
            hook,
        })
    }

    // ═══════════════════════════════════════════════════════════════
    // Accessors
    // ═══════════════════════════════════════════════════════════════

    pub fn config(&self) -> &SchedConfig {
        &self.config
    }

    pub fn num_cores(&self) -> usize {
        self.cores.len()
    }

    pub fn root_group(&self) -> GroupId {
        self.groups.root()
    }

    pub fn hook(&self) -> &H {
        &self.hook
    }

    /// Latest timestamp passed to [`tick`](Self::tick)
    pub fn now(&self) -> u64 {
        self.clock.load(Ordering::Acquire)
    }

    pub fn nr_tasks(&self) -> usize {
        self.live_tasks.load(Ordering::Acquire)
    }

    pub fn nr_groups(&self) -> usize {
        self.groups.len()
    }

    fn core(&self, core_id: usize) -> SchedulerResult<&Mutex<CoreRunQueue>> {
        self.cores.get(core_id).ok_or(SchedulerError::InvalidCore {
            core_id,
            num_cores: self.cores.len(),
        })
    }

    /// Lock the run queue that owns `id`, following concurrent migrations
    fn lock_task(&self, id: TaskId) -> SchedulerResult<MutexGuard<'_, CoreRunQueue>> {
        loop {
            let core_id = *self
                .directory
                .read()
                .get(&id)
                .ok_or(SchedulerError::TaskNotFound { task_id: id.0 })?;
            let rq = self.cores[core_id].lock();
            if rq.contains(id) {
                return Ok(rq);
            }
            drop(rq);
            core::hint::spin_loop();
        }
    }

    #[inline]
    fn verify(&self, rq: &CoreRunQueue) {
        if cfg!(feature = "invariant_checks") {
            rq.verify();
        }
    }

    // ═══════════════════════════════════════════════════════════════
    // Tasks
    // ═══════════════════════════════════════════════════════════════

    /// Create a Ready task in `group` on the least loaded core.
    ///
    /// The task starts at that core's `min_vruntime` so it neither jumps
    /// ahead of nor lags behind the tasks already there.
    pub fn create_task(&self, niceness: i32, group: Option<GroupId>) -> SchedulerResult<TaskId> {
        if !is_valid_niceness(niceness) {
            return Err(sched_error!(SchedulerError::InvalidNiceness {
                value: niceness,
                min: NICE_MIN,
                max: NICE_MAX,
            }));
        }
        let group = group.ok_or_else(|| sched_error!(SchedulerError::MissingGroup))?;

        let max = self.config.max_tasks;
        self.live_tasks
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| (n < max).then_some(n + 1))
            .map_err(|current| sched_error!(SchedulerError::TaskLimitReached { current, max }))?;

        let id = TaskId(self.next_task_id.fetch_add(1, Ordering::Relaxed));
        let weight = weight_of(niceness);
        if let Err(err) = self.groups.attach_task(group, id, weight) {
            self.live_tasks.fetch_sub(1, Ordering::AcqRel);
            return Err(sched_error!(err));
        }

        let core_id = self.balancer.find_idlest().unwrap_or(0);
        {
            let mut rq = self.cores[core_id].lock();
            let entity = SchedEntity::new(id, niceness, group, core_id, rq.min_vruntime());
            rq.attach(entity);
            rq.enqueue(id);
            self.directory.write().insert(id, core_id);
            self.balancer.publish(&rq);
            self.verify(&rq);
        }

        self.stats.record_spawn();
        info!(
            "[SCHED] Created task {} (nice {}, weight {}) in {} on core {}",
            id, niceness, weight, group, core_id
        );
        Ok(id)
    }

    /// Take a task out of Ready/Running. A running task is charged for
    /// its slice and leaves the core immediately.
    pub fn block(&self, id: TaskId) -> SchedulerResult<()> {
        let now = self.now();
        let mut rq = self.lock_task(id)?;
        let state = rq.entity(id).state;
        if !validate_transition(state, TaskState::Blocked) {
            return Err(sched_error!(SchedulerError::InvalidStateTransition {
                task_id: id.0,
                from: state,
                to: TaskState::Blocked,
            }));
        }

        match state {
            TaskState::Ready => rq.dequeue(id),
            TaskState::Running => {
                self.account(&mut rq, id, now);
                rq.clear_running();
                rq.end_slice(now);
            }
            _ => {}
        }
        rq.entity_mut(id).state = TaskState::Blocked;

        self.balancer.publish(&rq);
        self.verify(&rq);
        debug!("[SCHED] {} blocked on core {}", id, rq.core_id());
        Ok(())
    }

    /// Put a blocked task back in its core's index, no earlier than the
    /// core's `min_vruntime`
    pub fn unblock(&self, id: TaskId) -> SchedulerResult<()> {
        let mut rq = self.lock_task(id)?;
        let state = rq.entity(id).state;
        if state != TaskState::Blocked {
            return Err(sched_error!(SchedulerError::InvalidStateTransition {
                task_id: id.0,
                from: state,
                to: TaskState::Ready,
            }));
        }

        let floor = rq.min_vruntime();
        let entity = rq.entity_mut(id);
        entity.vruntime = entity.vruntime.max(floor);
        rq.enqueue(id);

        self.balancer.publish(&rq);
        self.verify(&rq);
        debug!("[SCHED] {} unblocked on core {}", id, rq.core_id());
        Ok(())
    }

    /// The running task gives up the rest of its quantum.
    ///
    /// Its virtual runtime is raised to at least that of the first ready
    /// task whose groups have budget, then the core loop runs without the
    /// preemption gate.
    pub fn yield_task(&self, id: TaskId) -> SchedulerResult<Decision> {
        let now = self.now();
        let mut rq = self.lock_task(id)?;
        if rq.running() != Some(id) {
            let state = rq.entity(id).state;
            return Err(sched_error!(SchedulerError::InvalidStateTransition {
                task_id: id.0,
                from: state,
                to: TaskState::Ready,
            }));
        }

        let mut budgets = BudgetCache::default();
        if let Some(eligible) = self.pick_next(&rq, now, &mut budgets) {
            let floor = rq.entity(eligible).vruntime;
            let entity = rq.entity_mut(id);
            entity.vruntime = entity.vruntime.max(floor);
        }
        self.stats.record_yield();

        Ok(self.run_core_loop(&mut rq, now, true))
    }

    pub fn set_niceness(&self, id: TaskId, niceness: i32) -> SchedulerResult<()> {
        if !is_valid_niceness(niceness) {
            return Err(sched_error!(SchedulerError::InvalidNiceness {
                value: niceness,
                min: NICE_MIN,
                max: NICE_MAX,
            }));
        }
        let now = self.now();
        let mut rq = self.lock_task(id)?;

        // Charge the slice so far at the old weight
        if rq.running() == Some(id) {
            self.account(&mut rq, id, now);
            rq.entity_mut(id).exec_start = Some(now);
        }

        let entity = rq.entity_mut(id);
        let (group, old_weight) = (entity.group, entity.weight);
        entity.set_niceness(niceness);
        let new_weight = entity.weight;
        self.groups.reweight(group, old_weight, new_weight);

        debug!("[SCHED] {} niceness {} (weight {} -> {})", id, niceness, old_weight, new_weight);
        Ok(())
    }

    /// Move a task's group membership
    pub fn move_task(&self, id: TaskId, group: GroupId) -> SchedulerResult<()> {
        let now = self.now();
        let mut rq = self.lock_task(id)?;
        let (old_group, weight) = {
            let entity = rq.entity(id);
            (entity.group, entity.weight)
        };
        if old_group == group {
            return Ok(());
        }

        self.groups.attach_task(group, id, weight).map_err(|err| sched_error!(err))?;

        // The old group pays for the slice so far
        if rq.running() == Some(id) {
            self.account(&mut rq, id, now);
            rq.entity_mut(id).exec_start = Some(now);
        }
        self.groups.detach_task(old_group, id, weight);
        rq.entity_mut(id).group = group;

        info!("[SCHED] Moved {} from {} to {}", id, old_group, group);
        Ok(())
    }

    /// Remove a task in any state.
    ///
    /// Returns its final statistics, or `None` if it was already gone.
    pub fn remove_task(&self, id: TaskId) -> Option<TaskStats> {
        let now = self.now();
        let Ok(mut rq) = self.lock_task(id) else {
            return None;
        };

        match rq.entity(id).state {
            TaskState::Ready => rq.dequeue(id),
            TaskState::Running => {
                self.account(&mut rq, id, now);
                rq.clear_running();
                rq.end_slice(now);
            }
            _ => {}
        }
        let mut entity = rq.detach(id);
        entity.state = TaskState::Terminated;
        self.directory.write().remove(&id);
        self.balancer.publish(&rq);
        self.verify(&rq);
        drop(rq);

        self.groups.detach_task(entity.group, id, entity.weight);
        self.live_tasks.fetch_sub(1, Ordering::AcqRel);
        self.stats.record_destroy();

        info!(
            "[SCHED] Removed task {} after {}ns of execution",
            id, entity.sum_exec_runtime
        );
        Some(entity.snapshot())
    }

    // ═══════════════════════════════════════════════════════════════
    // Groups
    // ═══════════════════════════════════════════════════════════════

    /// Create an unlimited group; `None` means under the root
    pub fn create_group(&self, parent: Option<GroupId>) -> SchedulerResult<GroupId> {
        let bandwidth = Bandwidth::unlimited(self.config.default_period_ns, self.now());
        self.groups
            .create(parent.unwrap_or(self.groups.root()), bandwidth)
            .map_err(|err| sched_error!(err))
    }

    pub fn create_group_with_bandwidth(
        &self,
        parent: Option<GroupId>,
        period_ns: u64,
        quota_ns: u64,
    ) -> SchedulerResult<GroupId> {
        let bandwidth =
            Bandwidth::limited(period_ns, quota_ns, self.now()).map_err(|err| sched_error!(err))?;
        self.groups
            .create(parent.unwrap_or(self.groups.root()), bandwidth)
            .map_err(|err| sched_error!(err))
    }

    /// Limit a group to `quota_ns` per `period_ns`, starting a new window
    pub fn set_bandwidth(&self, group: GroupId, period_ns: u64, quota_ns: u64) -> SchedulerResult<()> {
        let bandwidth =
            Bandwidth::limited(period_ns, quota_ns, self.now()).map_err(|err| sched_error!(err))?;
        self.groups.set_bandwidth(group, bandwidth).map_err(|err| sched_error!(err))
    }

    pub fn clear_bandwidth(&self, group: GroupId) -> SchedulerResult<()> {
        let bandwidth = Bandwidth::unlimited(self.config.default_period_ns, self.now());
        self.groups.set_bandwidth(group, bandwidth).map_err(|err| sched_error!(err))
    }

    pub fn destroy_group(&self, group: GroupId) -> SchedulerResult<()> {
        self.groups.destroy(group).map_err(|err| sched_error!(err))
    }

    /// Budget check for `group` and its ancestors at `now`
    pub fn group_has_budget(&self, group: GroupId, now: u64) -> SchedulerResult<bool> {
        if !self.groups.contains(group) {
            return Err(SchedulerError::GroupNotFound { group_id: group.0 });
        }
        Ok(self.groups.has_budget(group, now))
    }

    // ═══════════════════════════════════════════════════════════════
    // Core loop
    // ═══════════════════════════════════════════════════════════════

    /// Timer tick on `core_id` at `now`: runs one scheduling decision
    pub fn tick(&self, core_id: usize, now: u64) -> SchedulerResult<Decision> {
        let core = self.core(core_id)?;
        self.clock.fetch_max(now, Ordering::AcqRel);
        let mut rq = core.lock();
        Ok(self.run_core_loop(&mut rq, now, false))
    }

    /// Scheduling decision at the current clock, e.g. after a wakeup
    pub fn schedule(&self, core_id: usize) -> SchedulerResult<Decision> {
        let core = self.core(core_id)?;
        let now = self.now();
        let mut rq = core.lock();
        Ok(self.run_core_loop(&mut rq, now, false))
    }

    /// Charge the time since dispatch to the entity and its groups
    fn account(&self, rq: &mut CoreRunQueue, id: TaskId, now: u64) {
        let Some(delta) = rq.entity_mut(id).take_delta(now) else {
            return;
        };
        let group = rq.entity(id).group;
        self.groups.propagate_runtime(group, delta, now);
        let period = self
            .groups
            .period_of(group)
            .unwrap_or(self.config.default_period_ns);
        rq.entity_mut(id).charge(delta, now, period);
        rq.update_min_vruntime();
    }

    /// Leftmost ready task whose group hierarchy has budget
    fn pick_next(&self, rq: &CoreRunQueue, now: u64, budgets: &mut BudgetCache) -> Option<TaskId> {
        rq.ready_iter().find(|&id| {
            let group = rq.entity(id).group;
            budgets.check(group, || self.groups.has_budget(group, now))
        })
    }

    fn should_preempt(
        &self,
        rq: &CoreRunQueue,
        prev: TaskId,
        next: TaskId,
        now: u64,
        budgets: &mut BudgetCache,
    ) -> bool {
        let prev = rq.entity(prev);
        let next = rq.entity(next);

        let prev_budget = budgets.check(prev.group, || self.groups.has_budget(prev.group, now));
        let next_budget = budgets.check(next.group, || self.groups.has_budget(next.group, now));
        if !prev_budget && next_budget {
            return true;
        }

        if next.vruntime.saturating_add(self.config.fair_latency_ns) < prev.vruntime {
            return true;
        }

        matches!((next.deadline, prev.deadline), (Some(n), Some(p)) if n < p)
    }

    /// Rearm an expired entity window with its share of the group quota
    fn refresh_window(&self, rq: &mut CoreRunQueue, id: TaskId, now: u64) {
        let (group, weight) = {
            let entity = rq.entity(id);
            if !entity.window_expired(now) {
                return;
            }
            (entity.group, entity.weight)
        };
        let (budget, period) = self
            .groups
            .quota_share(group, weight, self.config.default_period_ns);
        if rq.entity_mut(id).rearm_window(now, budget, period) {
            debug!("[SCHED] {} missed its window deadline", id);
        }
    }

    fn run_core_loop(&self, rq: &mut CoreRunQueue, now: u64, yielding: bool) -> Decision {
        let core_id = rq.core_id();
        let mut budgets = BudgetCache::default();

        // Take the current task off the CPU
        let prev = rq.running();
        let mut requeued = None;
        if let Some(prev_id) = prev {
            self.account(rq, prev_id, now);
            rq.clear_running();
            if rq.entity(prev_id).state == TaskState::Running {
                rq.enqueue(prev_id);
                requeued = Some(prev_id);
            }
        }
        rq.update_min_vruntime();
        self.stats.record_pick(rq.ready_count());

        let mut next = self.pick_next(rq, now, &mut budgets);
        if next.is_none() || rq.ready_count() > self.config.balance_threshold() {
            if self.balance_from(rq, now).is_some() {
                next = self.pick_next(rq, now, &mut budgets);
            }
        }
        // Balancing may have moved the requeued task away
        let requeued = requeued.filter(|&id| rq.is_queued(id));

        let Some(next_id) = next else {
            rq.end_slice(now);
            rq.switch_stats.record_idle();
            self.stats.record_idle();
            self.balancer.publish(rq);
            self.verify(rq);
            trace!("[SCHED] core {} idle", core_id);
            self.hook.idle(core_id);
            return Decision::Idle;
        };

        if let Some(prev_id) = requeued {
            let keep = next_id == prev_id
                || (!yielding && !self.should_preempt(rq, prev_id, next_id, now, &mut budgets));
            if keep {
                rq.dequeue(prev_id);
                rq.set_running(prev_id, now);
                self.refresh_window(rq, prev_id, now);
                rq.switch_stats.record_continue();
                self.balancer.publish(rq);
                self.verify(rq);
                return Decision::Continued(prev_id);
            }
            if !yielding {
                self.stats.record_preemption();
            }
        }

        // Dispatch
        rq.dequeue(next_id);
        rq.set_running(next_id, now);
        rq.entity_mut(next_id).nr_switches += 1;
        self.refresh_window(rq, next_id, now);
        let slice = rq.end_slice(now);
        rq.start_slice(now);
        rq.switch_stats.record_switch(slice);
        self.stats.record_switch();
        self.balancer.publish(rq);
        self.verify(rq);

        trace!("[SCHED] core {}: {:?} -> {}", core_id, prev, next_id);
        self.hook.switch(core_id, prev, next_id);
        Decision::Switched { prev, next: next_id }
    }

    // ═══════════════════════════════════════════════════════════════
    // Load balancing
    // ═══════════════════════════════════════════════════════════════

    /// Move one task between two locked run queues and record it
    fn migrate_locked(
        &self,
        src: &mut CoreRunQueue,
        dst: &mut CoreRunQueue,
        now: u64,
        cost_ns: Option<u64>,
    ) -> Option<Migration> {
        let migration = self.balancer.migrate_one(src, dst, now, cost_ns)?;
        self.directory.write().insert(migration.task, migration.to_core);
        self.stats.record_migration();
        self.verify(src);
        self.verify(dst);
        Some(migration)
    }

    /// Opportunistic balance from inside a core loop that holds `rq`
    fn balance_from(&self, rq: &mut CoreRunQueue, now: u64) -> Option<Migration> {
        let _guard = self.balancer.try_lock()?;
        self.stats.record_balance();
        self.balancer.publish(rq);

        let LoadImbalance::Unbalanced { busiest, idlest, .. } = self.balancer.calculate_imbalance() else {
            return None;
        };
        let this = rq.core_id();
        let cost = Some(self.config.migration_cost_ns);

        if busiest == this {
            let mut dst = self.cores[idlest].lock();
            self.migrate_locked(rq, &mut dst, now, cost)
        } else if idlest == this {
            let mut src = self.cores[busiest].lock();
            self.migrate_locked(&mut src, rq, now, cost)
        } else {
            let mut src = self.cores[busiest].lock();
            let mut dst = self.cores[idlest].lock();
            self.migrate_locked(&mut src, &mut dst, now, cost)
        }
    }

    /// Periodic balance pass: at most one task moves, always the busiest
    /// core's leftmost
    pub fn rebalance(&self) -> Option<Migration> {
        let _guard = self.balancer.lock();
        self.stats.record_balance();

        let LoadImbalance::Unbalanced { busiest, idlest, .. } = self.balancer.calculate_imbalance() else {
            return None;
        };
        let now = self.now();
        let mut src = self.cores[busiest].lock();
        let mut dst = self.cores[idlest].lock();
        self.migrate_locked(&mut src, &mut dst, now, None)
    }

    // ═══════════════════════════════════════════════════════════════
    // Statistics
    // ═══════════════════════════════════════════════════════════════

    pub fn task_stats(&self, id: TaskId) -> SchedulerResult<TaskStats> {
        let rq = self.lock_task(id)?;
        Ok(rq.entity(id).snapshot())
    }

    pub fn group_stats(&self, group: GroupId) -> SchedulerResult<GroupStats> {
        self.groups.stats(group)
    }

    pub fn core_stats(&self, core_id: usize) -> SchedulerResult<CoreStats> {
        Ok(self.core(core_id)?.lock().stats())
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn balancer_stats(&self) -> LoadBalancerStats {
        self.balancer.stats()
    }

    /// Verify every core's run queue, regardless of `invariant_checks`
    pub fn check_invariants(&self) {
        for core in self.cores.iter() {
            core.lock().verify();
        }
    }
}
