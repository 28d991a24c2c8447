//! Exceptions carried as values
//!
//! A [`Bomb`] is what a task "raises". Instead of unwinding across a stack
//! switch, it is stored in the target task's mailbox or sent through a
//! channel, and every suspension point hands it back as the `Err` side of a
//! [`TaskResult`]. Re-raising a bomb at a new site creates a fresh trace
//! chained to the original via [`std::error::Error::source`].

use core::fmt;
use std::io;

use crate::error::SchedError;
use crate::id::TaskId;

/// Result of any operation that may suspend the calling task
pub type TaskResult<T> = Result<T, Bomb>;

/// What kind of exception a bomb carries
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum BombKind {
    /// Delivered by `kill()`; a task dying of it dies silently
    TaskExit,
    /// Scheduler misuse
    Runtime,
    /// Body binding mistakes
    Type,
    /// Last runnable task blocked with nobody to wake it
    Deadlock,
    /// Fatal I/O error with its errno (0 when unknown)
    Io(i32),
    /// A timed operation ran out of time
    Timeout,
    /// A task body panicked
    Panic,
    /// Application-level bad value
    Value,
    /// Any other application-defined exception
    Custom(String),
}

impl BombKind {
    pub fn name(&self) -> &str {
        match self {
            BombKind::TaskExit => "TaskExit",
            BombKind::Runtime => "RuntimeError",
            BombKind::Type => "TypeError",
            BombKind::Deadlock => "DeadlockError",
            BombKind::Io(_) => "IOError",
            BombKind::Timeout => "TimeoutError",
            BombKind::Panic => "Panic",
            BombKind::Value => "ValueError",
            BombKind::Custom(name) => name,
        }
    }
}

impl fmt::Display for BombKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BombKind::Io(errno) => write!(f, "IOError[{}]", errno),
            other => f.write_str(other.name()),
        }
    }
}

/// One step of a bomb's trace: the task that raised or re-raised it, and where
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceFrame {
    pub task: TaskId,
    pub site: String,
}

impl fmt::Display for TraceFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} in {}", self.site, self.task)
    }
}

/// An exception packaged as a value
#[derive(Debug, Clone)]
pub struct Bomb {
    kind: BombKind,
    value: String,
    trace: Vec<TraceFrame>,
    cause: Option<Box<Bomb>>,
}

impl Bomb {
    pub fn new(kind: BombKind, value: impl Into<String>) -> Self {
        Bomb {
            kind,
            value: value.into(),
            trace: Vec::new(),
            cause: None,
        }
    }

    pub fn task_exit() -> Self {
        Bomb::new(BombKind::TaskExit, "")
    }

    pub fn runtime(msg: impl Into<String>) -> Self {
        Bomb::new(BombKind::Runtime, msg)
    }

    pub fn type_error(msg: impl Into<String>) -> Self {
        Bomb::new(BombKind::Type, msg)
    }

    pub fn deadlock() -> Self {
        Bomb::new(BombKind::Deadlock, SchedError::Deadlock.to_string())
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        Bomb::new(BombKind::Timeout, msg)
    }

    pub fn value_error(msg: impl Into<String>) -> Self {
        Bomb::new(BombKind::Value, msg)
    }

    pub fn panic(msg: impl Into<String>) -> Self {
        Bomb::new(BombKind::Panic, msg)
    }

    /// Fatal I/O error for `op` failing with `errno`
    pub fn io(errno: i32, op: &str) -> Self {
        let text = io::Error::from_raw_os_error(errno);
        Bomb::new(BombKind::Io(errno), format!("{}: {}", op, text))
    }

    #[inline]
    pub fn kind(&self) -> &BombKind {
        &self.kind
    }

    #[inline]
    pub fn value(&self) -> &str {
        &self.value
    }

    /// Frames recorded at this raise site (not including the cause's)
    #[inline]
    pub fn trace(&self) -> &[TraceFrame] {
        &self.trace
    }

    /// The bomb this one was re-raised from
    #[inline]
    pub fn cause(&self) -> Option<&Bomb> {
        self.cause.as_deref()
    }

    /// Follow the cause chain to the first raise
    pub fn root(&self) -> &Bomb {
        let mut b = self;
        while let Some(c) = b.cause() {
            b = c;
        }
        b
    }

    #[inline]
    pub fn is_task_exit(&self) -> bool {
        self.kind == BombKind::TaskExit
    }

    /// Deadlocks are runtime errors too
    #[inline]
    pub fn is_runtime_error(&self) -> bool {
        matches!(self.kind, BombKind::Runtime | BombKind::Deadlock)
    }

    pub fn errno(&self) -> Option<i32> {
        match self.kind {
            BombKind::Io(e) if e != 0 => Some(e),
            _ => None,
        }
    }

    /// Record where this bomb was raised
    pub fn at(mut self, task: TaskId, site: impl Into<String>) -> Self {
        self.trace.push(TraceFrame {
            task,
            site: site.into(),
        });
        self
    }

    /// Re-raise at a new site: same kind and value, a fresh trace, and the
    /// original kept as the cause.
    pub fn rethrow(self, task: TaskId, site: impl Into<String>) -> Bomb {
        Bomb {
            kind: self.kind.clone(),
            value: self.value.clone(),
            trace: vec![TraceFrame {
                task,
                site: site.into(),
            }],
            cause: Some(Box::new(self)),
        }
    }
}

impl PartialEq for Bomb {
    /// Two bombs are the same exception when kind and value match; traces
    /// differ by construction.
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind && self.value == other.value
    }
}

impl fmt::Display for Bomb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.value.is_empty() {
            write!(f, "{}", self.kind)
        } else {
            write!(f, "{}: {}", self.kind, self.value)
        }
    }
}

impl std::error::Error for Bomb {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause
            .as_deref()
            .map(|c| c as &(dyn std::error::Error + 'static))
    }
}

impl From<SchedError> for Bomb {
    fn from(e: SchedError) -> Self {
        let kind = if e == SchedError::Deadlock {
            BombKind::Deadlock
        } else if e.is_type_error() {
            BombKind::Type
        } else {
            BombKind::Runtime
        };
        Bomb::new(kind, e.to_string())
    }
}

impl From<io::Error> for Bomb {
    fn from(e: io::Error) -> Self {
        if e.kind() == io::ErrorKind::TimedOut && e.raw_os_error().is_none() {
            return Bomb::timeout(e.to_string());
        }
        Bomb::new(BombKind::Io(e.raw_os_error().unwrap_or(0)), e.to_string())
    }
}

impl From<Bomb> for io::Error {
    fn from(b: Bomb) -> Self {
        match b.kind {
            BombKind::Io(errno) if errno != 0 => io::Error::from_raw_os_error(errno),
            BombKind::Timeout => io::Error::new(io::ErrorKind::TimedOut, b),
            _ => io::Error::other(b),
        }
    }
}
