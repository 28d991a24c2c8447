//! Task and channel identifier types

use core::fmt;

use crate::constants::{TASK_MAIN, TASK_NONE};

/// Identifier of a task within one scheduler
///
/// Ids are handed out monotonically and never reused while the scheduler
/// lives, so a stale handle to a dead task can never alias a new one.
/// `u32::MAX` is reserved as the "no task" sentinel and `0` always names
/// the thread's original (main) task.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct TaskId(u32);

impl TaskId {
    /// Sentinel value indicating no task
    pub const NONE: TaskId = TaskId(TASK_NONE);

    /// The task that created the scheduler
    pub const MAIN: TaskId = TaskId(TASK_MAIN);

    #[inline]
    pub const fn new(id: u32) -> Self {
        TaskId(id)
    }

    #[inline]
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    #[inline]
    pub const fn is_none(self) -> bool {
        self.0 == TASK_NONE
    }

    #[inline]
    pub const fn is_main(self) -> bool {
        self.0 == TASK_MAIN
    }

    /// Convert to Option
    #[inline]
    pub const fn to_option(self) -> Option<TaskId> {
        if self.is_none() {
            None
        } else {
            Some(self)
        }
    }

    /// The id following this one
    #[inline]
    pub const fn next(self) -> TaskId {
        TaskId(self.0 + 1)
    }
}

impl From<u32> for TaskId {
    #[inline]
    fn from(id: u32) -> Self {
        TaskId(id)
    }
}

impl From<TaskId> for u32 {
    #[inline]
    fn from(id: TaskId) -> Self {
        id.0
    }
}

impl fmt::Debug for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_none() {
            write!(f, "TaskId(NONE)")
        } else if self.is_main() {
            write!(f, "TaskId(main)")
        } else {
            write!(f, "TaskId({})", self.0)
        }
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_none() {
            write!(f, "none")
        } else if self.is_main() {
            write!(f, "main")
        } else {
            write!(f, "t{}", self.0)
        }
    }
}

impl Default for TaskId {
    fn default() -> Self {
        TaskId::NONE
    }
}

/// Identifier of a channel, used for the blocked-on back-reference
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct ChannelId(pub u64);

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ch{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_id_basics() {
        let id = TaskId::new(42);
        assert_eq!(id.as_u32(), 42);
        assert!(!id.is_none());
        assert!(!id.is_main());
        assert_eq!(id.next(), TaskId::new(43));
    }

    #[test]
    fn test_task_id_sentinels() {
        assert!(TaskId::NONE.is_none());
        assert_eq!(TaskId::NONE.to_option(), None);
        assert!(TaskId::MAIN.is_main());
        assert_eq!(TaskId::default(), TaskId::NONE);
    }

    #[test]
    fn test_task_id_display() {
        assert_eq!(TaskId::MAIN.to_string(), "main");
        assert_eq!(TaskId::new(7).to_string(), "t7");
        assert_eq!(format!("{:?}", TaskId::NONE), "TaskId(NONE)");
        assert_eq!(ChannelId(3).to_string(), "ch3");
    }
}
