//! Scheduler configuration
//!
//! Tunables for one [`Scheduler`](crate::Scheduler) instance, checked once
//! by [`SchedConfig::validate`] at construction.

use crate::scheduler::core::error::{SchedulerError, SchedulerResult};
use crate::scheduler::weight::BASE_WEIGHT;

/// Maximum number of cores one scheduler drives
pub const MAX_CPUS: usize = 64;

/// Maximum task group nesting (the root group has depth 0)
pub const MAX_GROUP_DEPTH: usize = 8;

/// Shortest accepted bandwidth period (1ms)
pub const GROUP_MIN_PERIOD_NS: u64 = 1_000_000;

/// Longest accepted bandwidth period (1s)
pub const GROUP_MAX_PERIOD_NS: u64 = 1_000_000_000;

/// Smallest quota, as a percentage of the period
pub const MIN_BANDWIDTH_PERCENT: u64 = 1;

/// Virtual runtime lead a waiting task needs before it preempts (6ms)
pub const FAIR_LATENCY_NS: u64 = 6_000_000;

/// Window length for groups without a bandwidth limit (100ms)
pub const DEFAULT_PERIOD_NS: u64 = 100_000_000;

/// A task migrated more recently than this is not picked again (1ms)
pub const MIGRATION_COST_NS: u64 = 1_000_000;

pub const DEFAULT_MAX_TASKS: usize = 4096;
pub const DEFAULT_MAX_GROUPS: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedConfig {
    /// Number of cores, each with its own run queue
    pub num_cores: usize,
    /// Core capacity in weight units; a core whose ready count exceeds
    /// `core_capacity / BASE_WEIGHT` asks the balancer for help
    pub core_capacity: u64,
    pub fair_latency_ns: u64,
    pub default_period_ns: u64,
    pub migration_cost_ns: u64,
    pub max_tasks: usize,
    pub max_groups: usize,
    pub max_group_depth: usize,
}

impl SchedConfig {
    pub const fn new(num_cores: usize) -> Self {
        Self {
            num_cores,
            core_capacity: BASE_WEIGHT,
            fair_latency_ns: FAIR_LATENCY_NS,
            default_period_ns: DEFAULT_PERIOD_NS,
            migration_cost_ns: MIGRATION_COST_NS,
            max_tasks: DEFAULT_MAX_TASKS,
            max_groups: DEFAULT_MAX_GROUPS,
            max_group_depth: MAX_GROUP_DEPTH,
        }
    }

    pub const fn with_core_capacity(mut self, capacity: u64) -> Self {
        self.core_capacity = capacity;
        self
    }

    pub const fn with_fair_latency(mut self, latency_ns: u64) -> Self {
        self.fair_latency_ns = latency_ns;
        self
    }

    pub const fn with_default_period(mut self, period_ns: u64) -> Self {
        self.default_period_ns = period_ns;
        self
    }

    pub const fn with_migration_cost(mut self, cost_ns: u64) -> Self {
        self.migration_cost_ns = cost_ns;
        self
    }

    pub const fn with_max_tasks(mut self, max: usize) -> Self {
        self.max_tasks = max;
        self
    }

    pub const fn with_max_groups(mut self, max: usize) -> Self {
        self.max_groups = max;
        self
    }

    pub const fn with_max_group_depth(mut self, depth: usize) -> Self {
        self.max_group_depth = depth;
        self
    }

    /// Ready count above which a core triggers balancing from its loop
    #[inline]
    pub const fn balance_threshold(&self) -> usize {
        (self.core_capacity / BASE_WEIGHT) as usize
    }

    pub fn validate(&self) -> SchedulerResult<()> {
        let reason = if self.num_cores == 0 {
            "num_cores must be at least 1"
        } else if self.num_cores > MAX_CPUS {
            "num_cores exceeds MAX_CPUS"
        } else if self.core_capacity < BASE_WEIGHT {
            "core_capacity below BASE_WEIGHT"
        } else if self.default_period_ns < GROUP_MIN_PERIOD_NS
            || self.default_period_ns > GROUP_MAX_PERIOD_NS
        {
            "default_period_ns outside [1ms, 1s]"
        } else if self.max_tasks == 0 {
            "max_tasks must be at least 1"
        } else if self.max_groups == 0 {
            "max_groups must leave room for the root group"
        } else if self.max_group_depth == 0 || self.max_group_depth > MAX_GROUP_DEPTH {
            "max_group_depth outside [1, 8]"
        } else {
            return Ok(());
        };
        Err(SchedulerError::InvalidConfig { reason })
    }
}

impl Default for SchedConfig {
    fn default() -> Self {
        Self::new(1)
    }
}
