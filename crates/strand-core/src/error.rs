//! Error types for the strand scheduler

use core::fmt;

/// Result type for scheduler operations that never suspend
pub type SchedResult<T> = Result<T, SchedError>;

/// Misuse of the scheduler, or a failure setting it up
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedError {
    /// `remove()` called on the task that is currently running
    CurrentTask,

    /// Ring operation on a task that is blocked on a channel
    BlockedTask,

    /// Operation needs a live task but the task is dead or never started
    DeadTask,

    /// `start()` on a task without a body
    NotBound,

    /// `bind()` on a task that already has a body
    AlreadyBound,

    /// `start()` called twice
    AlreadyStarted,

    /// The last runnable task tried to block with no peer that could wake it
    Deadlock,

    /// No task with this id in the scheduler
    TaskNotFound,

    /// Scheduler not initialized
    NotInitialized,

    /// A scheduler already owns this OS thread
    AlreadyInitialized,

    /// Stack allocation/protection failed
    MemoryError(MemoryError),

    /// Platform-specific error (errno)
    PlatformError(i32),
}

impl SchedError {
    /// Type errors are raised for body binding mistakes; everything else is
    /// a runtime error.
    #[inline]
    pub fn is_type_error(&self) -> bool {
        matches!(self, SchedError::NotBound | SchedError::AlreadyBound)
    }
}

impl fmt::Display for SchedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchedError::CurrentTask => write!(f, "cannot remove the current task"),
            SchedError::BlockedTask => write!(f, "task is blocked on a channel"),
            SchedError::DeadTask => write!(f, "cannot run an unbound (dead) task"),
            SchedError::NotBound => write!(f, "task body must be bound before start"),
            SchedError::AlreadyBound => write!(f, "task body is already bound"),
            SchedError::AlreadyStarted => write!(f, "task already started"),
            SchedError::Deadlock => {
                write!(f, "deadlock: the last runnable task cannot be blocked")
            }
            SchedError::TaskNotFound => write!(f, "task not found"),
            SchedError::NotInitialized => write!(f, "scheduler not initialized"),
            SchedError::AlreadyInitialized => {
                write!(f, "a scheduler already runs on this thread")
            }
            SchedError::MemoryError(e) => write!(f, "memory error: {}", e),
            SchedError::PlatformError(code) => write!(f, "platform error: {}", code),
        }
    }
}

impl std::error::Error for SchedError {}

/// Stack memory errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemoryError {
    /// mmap failed
    AllocationFailed,

    /// mprotect on the guard page failed
    ProtectionFailed,

    /// madvise failed
    AdviseFailed,

    /// Requested stack size is below the minimum or overflows
    InvalidSize,
}

impl fmt::Display for MemoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemoryError::AllocationFailed => write!(f, "stack allocation failed"),
            MemoryError::ProtectionFailed => write!(f, "guard page protection failed"),
            MemoryError::AdviseFailed => write!(f, "memory advise failed"),
            MemoryError::InvalidSize => write!(f, "invalid stack size"),
        }
    }
}

impl From<MemoryError> for SchedError {
    fn from(e: MemoryError) -> Self {
        SchedError::MemoryError(e)
    }
}
