//! Statistics - Scheduler activity tracking
//!
//! Global counters shared by every core. Relaxed atomics: the values are
//! monotonic tallies, not synchronization.

use core::sync::atomic::{AtomicU64, Ordering};

/// Global scheduler statistics
pub struct SchedulerStats {
    /// Dispatches of a different task than the one running
    pub total_switches: AtomicU64,

    /// Tasks created
    pub total_tasks: AtomicU64,

    /// Tasks removed
    pub total_destroyed: AtomicU64,

    /// Core loop runs
    pub total_picks: AtomicU64,

    /// Switches that displaced a still-runnable task
    pub preemptions: AtomicU64,

    /// Voluntary yields
    pub yields: AtomicU64,

    /// Decisions that left a core idle
    pub idle_decisions: AtomicU64,

    /// Load balancer passes that took the migration lock
    pub balance_iterations: AtomicU64,

    /// Tasks moved between cores
    pub migrations: AtomicU64,

    /// Deepest ready queue observed on any core
    pub max_ready: AtomicU64,
}

impl SchedulerStats {
    pub const fn new() -> Self {
        Self {
            total_switches: AtomicU64::new(0),
            total_tasks: AtomicU64::new(0),
            total_destroyed: AtomicU64::new(0),
            total_picks: AtomicU64::new(0),
            preemptions: AtomicU64::new(0),
            yields: AtomicU64::new(0),
            idle_decisions: AtomicU64::new(0),
            balance_iterations: AtomicU64::new(0),
            migrations: AtomicU64::new(0),
            max_ready: AtomicU64::new(0),
        }
    }

    /// Record context switch
    pub fn record_switch(&self) {
        self.total_switches.fetch_add(1, Ordering::Relaxed);
    }

    /// Record scheduling decision and the ready depth it saw
    pub fn record_pick(&self, ready: usize) {
        self.total_picks.fetch_add(1, Ordering::Relaxed);

        let ready = ready as u64;
        let mut current_max = self.max_ready.load(Ordering::Relaxed);
        while ready > current_max {
            match self.max_ready.compare_exchange_weak(
                current_max,
                ready,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(x) => current_max = x,
            }
        }
    }

    pub fn record_spawn(&self) {
        self.total_tasks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_destroy(&self) {
        self.total_destroyed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record preemption
    pub fn record_preemption(&self) {
        self.preemptions.fetch_add(1, Ordering::Relaxed);
    }

    /// Record voluntary yield
    pub fn record_yield(&self) {
        self.yields.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_idle(&self) {
        self.idle_decisions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_balance(&self) {
        self.balance_iterations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_migration(&self) {
        self.migrations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            total_switches: self.total_switches.load(Ordering::Relaxed),
            total_tasks: self.total_tasks.load(Ordering::Relaxed),
            total_destroyed: self.total_destroyed.load(Ordering::Relaxed),
            total_picks: self.total_picks.load(Ordering::Relaxed),
            preemptions: self.preemptions.load(Ordering::Relaxed),
            yields: self.yields.load(Ordering::Relaxed),
            idle_decisions: self.idle_decisions.load(Ordering::Relaxed),
            balance_iterations: self.balance_iterations.load(Ordering::Relaxed),
            migrations: self.migrations.load(Ordering::Relaxed),
            max_ready: self.max_ready.load(Ordering::Relaxed),
        }
    }
}

impl Default for SchedulerStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time copy of [`SchedulerStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub total_switches: u64,
    pub total_tasks: u64,
    pub total_destroyed: u64,
    pub total_picks: u64,
    pub preemptions: u64,
    pub yields: u64,
    pub idle_decisions: u64,
    pub balance_iterations: u64,
    pub migrations: u64,
    pub max_ready: u64,
}

impl StatsSnapshot {
    /// Tasks still alive
    pub fn live_tasks(&self) -> u64 {
        self.total_tasks.saturating_sub(self.total_destroyed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_max_ready_only_grows() {
        let stats = SchedulerStats::new();
        stats.record_pick(4);
        stats.record_pick(2);
        stats.record_pick(7);

        let snap = stats.snapshot();
        assert_eq!(snap.total_picks, 3);
        assert_eq!(snap.max_ready, 7);
    }

    #[test]
    fn test_live_tasks() {
        let stats = SchedulerStats::new();
        stats.record_spawn();
        stats.record_spawn();
        stats.record_destroy();
        assert_eq!(stats.snapshot().live_tasks(), 1);
    }
}
