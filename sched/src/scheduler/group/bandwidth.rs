//! Quota/period bandwidth control
//!
//! A group may run for `quota` nanoseconds per `period`. Windows are reset
//! lazily: whoever observes `now >= deadline` starts the next one.

use crate::config::{GROUP_MAX_PERIOD_NS, GROUP_MIN_PERIOD_NS, MIN_BANDWIDTH_PERCENT};
use crate::scheduler::core::error::{SchedulerError, SchedulerResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bandwidth {
    period_ns: u64,
    /// `None` means unlimited
    quota_ns: Option<u64>,
    /// Consumed in the current window
    runtime_ns: u64,
    /// End of the current window (absolute)
    deadline_ns: u64,
}

impl Bandwidth {
    /// Unlimited bandwidth; the window only paces statistics
    pub fn unlimited(period_ns: u64, now: u64) -> Self {
        Self {
            period_ns,
            quota_ns: None,
            runtime_ns: 0,
            deadline_ns: now.saturating_add(period_ns),
        }
    }

    pub fn limited(period_ns: u64, quota_ns: u64, now: u64) -> SchedulerResult<Self> {
        Self::validate(period_ns, quota_ns)?;
        Ok(Self {
            period_ns,
            quota_ns: Some(quota_ns),
            runtime_ns: 0,
            deadline_ns: now.saturating_add(period_ns),
        })
    }

    /// Period in [1ms, 1s]; quota between 1% and 100% of the period
    pub fn validate(period_ns: u64, quota_ns: u64) -> SchedulerResult<()> {
        let min_quota = period_ns.saturating_mul(MIN_BANDWIDTH_PERCENT) / 100;
        if !(GROUP_MIN_PERIOD_NS..=GROUP_MAX_PERIOD_NS).contains(&period_ns)
            || quota_ns < min_quota
            || quota_ns > period_ns
        {
            return Err(SchedulerError::InvalidBandwidth { period_ns, quota_ns });
        }
        Ok(())
    }

    /// Start a new window if the current one is over.
    ///
    /// Returns true when a reset happened.
    pub fn refresh(&mut self, now: u64) -> bool {
        if now >= self.deadline_ns {
            self.runtime_ns = 0;
            self.deadline_ns = now.saturating_add(self.period_ns);
            true
        } else {
            false
        }
    }

    #[inline]
    pub fn has_budget(&self) -> bool {
        self.quota_ns.map_or(true, |quota| self.runtime_ns < quota)
    }

    /// Add consumed runtime. Returns true when this charge used up the
    /// last of the quota.
    pub fn charge(&mut self, delta: u64) -> bool {
        let had_budget = self.has_budget();
        self.runtime_ns = self.runtime_ns.saturating_add(delta);
        had_budget && !self.has_budget()
    }

    /// Runtime a window grants: the quota, or the whole period if unlimited
    #[inline]
    pub fn quota_or_period(&self) -> u64 {
        self.quota_ns.unwrap_or(self.period_ns)
    }

    pub fn period_ns(&self) -> u64 {
        self.period_ns
    }

    pub fn quota_ns(&self) -> Option<u64> {
        self.quota_ns
    }

    pub fn runtime_ns(&self) -> u64 {
        self.runtime_ns
    }

    pub fn deadline_ns(&self) -> u64 {
        self.deadline_ns
    }
}
