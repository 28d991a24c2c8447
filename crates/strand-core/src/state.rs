//! Task state

use core::fmt;

/// Observable state of a task
///
/// A live task is in exactly one of: in the runnable ring (`Running` when
/// it is the current one, `Runnable` otherwise), `Blocked` on exactly one
/// channel, or `Suspended` (alive but taken out of the ring, e.g. while
/// sleeping).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TaskState {
    /// Created, body possibly bound, not yet started
    Unstarted = 0,

    /// Currently executing
    Running = 1,

    /// In the runnable ring, waiting for its turn
    Runnable = 2,

    /// Alive but not in the ring and not on a channel
    Suspended = 3,

    /// Queued on a channel
    Blocked = 4,

    /// Body returned, raised, or was killed
    Dead = 5,
}

impl TaskState {
    /// Alive means started and not yet dead
    #[inline]
    pub const fn is_alive(&self) -> bool {
        !matches!(self, TaskState::Unstarted | TaskState::Dead)
    }

    /// Whether the task sits in the runnable ring
    #[inline]
    pub const fn is_scheduled(&self) -> bool {
        matches!(self, TaskState::Running | TaskState::Runnable)
    }

    #[inline]
    pub const fn is_blocked(&self) -> bool {
        matches!(self, TaskState::Blocked)
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskState::Unstarted => "unstarted",
            TaskState::Running => "running",
            TaskState::Runnable => "runnable",
            TaskState::Suspended => "suspended",
            TaskState::Blocked => "blocked",
            TaskState::Dead => "dead",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_predicates() {
        assert!(TaskState::Running.is_alive());
        assert!(TaskState::Blocked.is_alive());
        assert!(TaskState::Suspended.is_alive());
        assert!(!TaskState::Dead.is_alive());
        assert!(!TaskState::Unstarted.is_alive());

        assert!(TaskState::Running.is_scheduled());
        assert!(TaskState::Runnable.is_scheduled());
        assert!(!TaskState::Suspended.is_scheduled());
        assert!(!TaskState::Blocked.is_scheduled());

        assert!(TaskState::Blocked.is_blocked());
        assert!(!TaskState::Runnable.is_blocked());
    }

    #[test]
    fn test_state_display() {
        assert_eq!(TaskState::Blocked.to_string(), "blocked");
        assert_eq!(TaskState::Dead.to_string(), "dead");
    }
}
