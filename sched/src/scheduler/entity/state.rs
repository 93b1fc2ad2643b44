//! State - Task state machine
//!
//! Lifecycle of a sched entity and its allowed transitions

use core::fmt;

/// Task state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TaskState {
    /// Waiting in its core's vruntime index
    Ready = 0,

    /// Occupying its core's running slot
    Running = 1,

    /// Off the index until unblocked
    Blocked = 2,

    /// Removed from the scheduler
    Terminated = 3,
}

impl TaskState {
    /// Check if state is schedulable
    pub fn is_schedulable(self) -> bool {
        matches!(self, Self::Ready)
    }

    /// Check if state is active
    pub fn is_active(self) -> bool {
        matches!(self, Self::Running | Self::Ready)
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Ready => write!(f, "Ready"),
            Self::Running => write!(f, "Running"),
            Self::Blocked => write!(f, "Blocked"),
            Self::Terminated => write!(f, "Terminated"),
        }
    }
}

/// Validate state transition
pub fn validate_transition(from: TaskState, to: TaskState) -> bool {
    use TaskState::*;

    match (from, to) {
        // Dispatch and preemption
        (Ready, Running) | (Running, Ready) => true,

        // Blocking from either active state
        (Running, Blocked) | (Ready, Blocked) => true,

        // Wakeup
        (Blocked, Ready) => true,

        // Teardown
        (Ready | Running | Blocked, Terminated) => true,

        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_transitions() {
        assert!(validate_transition(TaskState::Ready, TaskState::Running));
        assert!(validate_transition(TaskState::Running, TaskState::Blocked));
        assert!(validate_transition(TaskState::Blocked, TaskState::Ready));
        assert!(validate_transition(TaskState::Blocked, TaskState::Terminated));
    }

    #[test]
    fn test_invalid_transitions() {
        assert!(!validate_transition(TaskState::Blocked, TaskState::Running));
        assert!(!validate_transition(TaskState::Blocked, TaskState::Blocked));
        assert!(!validate_transition(TaskState::Terminated, TaskState::Ready));
    }
}
