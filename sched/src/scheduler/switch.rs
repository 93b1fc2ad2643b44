//! Context switch boundary
//!
//! The scheduler only decides; saving and restoring register state is the
//! platform's job, reached through [`SwitchHook`].

use crate::scheduler::entity::TaskId;

/// Platform context-switch hook.
///
/// Called with the core's run queue lock held: implementations must not
/// call back into the scheduler.
pub trait SwitchHook: Send + Sync {
    /// `next` takes the core; `prev` is the task it replaces, if any
    fn switch(&self, core: usize, prev: Option<TaskId>, next: TaskId);

    /// Nothing runnable on `core`
    fn idle(&self, _core: usize) {}
}

/// Hook that does nothing (simulation, tests)
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSwitch;

impl SwitchHook for NoopSwitch {
    #[inline]
    fn switch(&self, _core: usize, _prev: Option<TaskId>, _next: TaskId) {}
}

/// Per-core switch statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SwitchStats {
    pub total_switches: u64,
    /// Decisions that kept the current task running
    pub continuations: u64,
    pub idle_decisions: u64,
    /// Slices ended by a switch
    pub total_slice_ns: u64,
    pub min_slice_ns: u64,
    pub max_slice_ns: u64,
}

impl SwitchStats {
    pub fn average_slice_ns(&self) -> u64 {
        if self.total_switches == 0 {
            0
        } else {
            self.total_slice_ns / self.total_switches
        }
    }

    /// `slice_ns` is how long the outgoing task ran, when there was one
    pub fn record_switch(&mut self, slice_ns: Option<u64>) {
        self.total_switches += 1;

        if let Some(slice) = slice_ns {
            self.total_slice_ns = self.total_slice_ns.saturating_add(slice);

            if self.min_slice_ns == 0 || slice < self.min_slice_ns {
                self.min_slice_ns = slice;
            }

            if slice > self.max_slice_ns {
                self.max_slice_ns = slice;
            }
        }
    }

    pub fn record_continue(&mut self) {
        self.continuations += 1;
    }

    pub fn record_idle(&mut self) {
        self.idle_decisions += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slice_bounds() {
        let mut stats = SwitchStats::default();
        stats.record_switch(None);
        stats.record_switch(Some(3_000));
        stats.record_switch(Some(1_000));
        stats.record_continue();

        assert_eq!(stats.total_switches, 3);
        assert_eq!(stats.min_slice_ns, 1_000);
        assert_eq!(stats.max_slice_ns, 3_000);
        assert_eq!(stats.average_slice_ns(), 4_000 / 3);
        assert_eq!(stats.continuations, 1);
    }
}
