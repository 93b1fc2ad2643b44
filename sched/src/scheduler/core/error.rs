//! Scheduler Error Handling
//!
//! Typed errors for every fallible scheduler operation, with recovery
//! hints. Rejected calls never leave partial state behind.

use core::fmt;

use crate::scheduler::entity::TaskState;

/// Scheduler error types with detailed context
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerError {
    // ═══════════════════════════════════════════════════════════════
    // Parameter Errors
    // ═══════════════════════════════════════════════════════════════

    /// Niceness outside the weight table
    InvalidNiceness { value: i32, min: i32, max: i32 },

    /// No group given where one is required
    MissingGroup,

    /// Group handle does not name a live group
    GroupNotFound { group_id: u64 },

    /// Nesting would exceed the maximum group depth
    GroupDepthExceeded { depth: usize, max: usize },

    /// The root group cannot be destroyed or reparented
    RootGroup,

    /// Bandwidth period/quota outside the accepted ranges
    InvalidBandwidth { period_ns: u64, quota_ns: u64 },

    /// Core index out of range
    InvalidCore { core_id: usize, num_cores: usize },

    /// Task handle does not name a live task
    TaskNotFound { task_id: u64 },

    /// Lifecycle transition not allowed
    InvalidStateTransition {
        task_id: u64,
        from: TaskState,
        to: TaskState,
    },

    /// Rejected configuration value
    InvalidConfig { reason: &'static str },

    // ═══════════════════════════════════════════════════════════════
    // Resource Errors
    // ═══════════════════════════════════════════════════════════════

    /// Task pool is full
    TaskLimitReached { current: usize, max: usize },

    /// Group pool is full
    GroupLimitReached { current: usize, max: usize },

    /// Group still has member tasks or child groups
    GroupBusy { group_id: u64, tasks: usize, children: usize },

    // ═══════════════════════════════════════════════════════════════
    // Internal Errors (should never happen)
    // ═══════════════════════════════════════════════════════════════

    /// Internal scheduler invariant violated
    InternalError { reason: &'static str },
}

/// Coarse error classes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidParameter,
    ResourceExhausted,
    InvariantViolation,
}

impl fmt::Display for SchedulerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidNiceness { value, min, max } => {
                write!(f, "Niceness {} outside [{}, {}]", value, min, max)
            }
            Self::GroupNotFound { group_id } => write!(f, "Group {} not found", group_id),
            Self::GroupDepthExceeded { depth, max } => {
                write!(f, "Group depth {} exceeds limit {}", depth, max)
            }
            Self::InvalidBandwidth { period_ns, quota_ns } => {
                write!(f, "Invalid bandwidth: quota {}ns / period {}ns", quota_ns, period_ns)
            }
            Self::InvalidCore { core_id, num_cores } => {
                write!(f, "Core {} out of range (0..{})", core_id, num_cores)
            }
            Self::TaskNotFound { task_id } => write!(f, "Task {} not found", task_id),
            Self::InvalidStateTransition { task_id, from, to } => {
                write!(f, "Task {}: invalid transition {} -> {}", task_id, from, to)
            }
            Self::InvalidConfig { reason } => write!(f, "Invalid config: {}", reason),
            Self::TaskLimitReached { current, max } => {
                write!(f, "Task limit reached: {}/{}", current, max)
            }
            Self::GroupLimitReached { current, max } => {
                write!(f, "Group limit reached: {}/{}", current, max)
            }
            Self::GroupBusy { group_id, tasks, children } => {
                write!(f, "Group {} busy: {} tasks, {} children", group_id, tasks, children)
            }
            Self::InternalError { reason } => write!(f, "Internal error: {}", reason),
            _ => write!(f, "{:?}", self),
        }
    }
}

impl SchedulerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::TaskLimitReached { .. }
            | Self::GroupLimitReached { .. }
            | Self::GroupBusy { .. } => ErrorKind::ResourceExhausted,
            Self::InternalError { .. } => ErrorKind::InvariantViolation,
            _ => ErrorKind::InvalidParameter,
        }
    }

    /// Get recovery hint for this error
    pub fn recovery_hint(&self) -> &'static str {
        match self {
            Self::InvalidNiceness { .. } => "Use a niceness in [-20, 19]",
            Self::GroupDepthExceeded { .. } => "Flatten the group hierarchy",
            Self::InvalidBandwidth { .. } => {
                "Period must be 1ms..=1s and quota between 1% and 100% of it"
            }
            Self::TaskNotFound { .. } => "Task may have already been removed",
            Self::TaskLimitReached { .. } => "Remove tasks or raise max_tasks",
            Self::GroupLimitReached { .. } => "Destroy unused groups or raise max_groups",
            Self::GroupBusy { .. } => "Move or remove member tasks and child groups first",
            Self::InvalidStateTransition { .. } => "Check task lifecycle management",
            _ => "Check scheduler configuration",
        }
    }

    /// Is this a recoverable error?
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Self::InternalError { .. })
    }

    /// Should this error be logged?
    pub fn should_log(&self) -> bool {
        match self {
            Self::TaskNotFound { .. } => false, // Common during teardown
            Self::GroupBusy { .. } => false,    // Caller retries after draining
            _ => true,
        }
    }

    /// Get error severity (0-3)
    pub fn severity(&self) -> u8 {
        match self {
            Self::InternalError { .. } => 3,
            Self::TaskLimitReached { .. } | Self::GroupLimitReached { .. } => 2,
            Self::InvalidStateTransition { .. } | Self::InvalidConfig { .. } => 1,
            _ => 0,
        }
    }
}

/// Result type for scheduler operations
pub type SchedulerResult<T> = Result<T, SchedulerError>;

/// Abort on a broken run-queue or group invariant.
#[cold]
#[track_caller]
pub(crate) fn invariant_violated(reason: &'static str) -> ! {
    panic!("[SCHED CRITICAL] Invariant violated: {}", reason)
}

/// Log a scheduler error with context and pass it through
#[macro_export]
macro_rules! sched_error {
    ($err:expr) => {{
        let err: $crate::scheduler::SchedulerError = $err;
        if err.should_log() {
            ::log::error!("[SCHED] Error: {} (hint: {})", err, err.recovery_hint());
        }
        err
    }};
}

/// Macro for critical scheduler assertions
#[macro_export]
macro_rules! sched_assert {
    ($cond:expr, $reason:expr) => {
        if !$cond {
            panic!("[SCHED CRITICAL] Invariant violated: {}", $reason);
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classes() {
        assert_eq!(
            SchedulerError::TaskLimitReached { current: 4, max: 4 }.kind(),
            ErrorKind::ResourceExhausted
        );
        assert_eq!(SchedulerError::MissingGroup.kind(), ErrorKind::InvalidParameter);
        assert_eq!(
            SchedulerError::InternalError { reason: "x" }.kind(),
            ErrorKind::InvariantViolation
        );
        assert!(!SchedulerError::InternalError { reason: "x" }.is_recoverable());
        assert_eq!(SchedulerError::InternalError { reason: "x" }.severity(), 3);
    }

    #[test]
    fn test_display() {
        let err = SchedulerError::InvalidNiceness { value: 25, min: -20, max: 19 };
        assert_eq!(format!("{}", err), "Niceness 25 outside [-20, 19]");

        let err = SchedulerError::InvalidStateTransition {
            task_id: 7,
            from: TaskState::Blocked,
            to: TaskState::Blocked,
        };
        assert_eq!(format!("{}", err), "Task 7: invalid transition Blocked -> Blocked");
    }

    #[test]
    fn test_sched_error_passes_through() {
        let err = crate::sched_error!(SchedulerError::TaskNotFound { task_id: 3 });
        assert_eq!(err, SchedulerError::TaskNotFound { task_id: 3 });
    }

    #[test]
    #[should_panic(expected = "Invariant violated")]
    fn test_sched_assert_panics() {
        crate::sched_assert!(1 + 1 == 3, "arithmetic");
    }
}
