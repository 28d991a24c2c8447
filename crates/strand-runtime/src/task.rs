//! Task records and handles
//!
//! The scheduler owns one [`TaskRecord`] per task; user code holds cheap
//! [`Task`] handles that name a task by id and forward to the scheduler.

use std::any::Any;
use std::cell::UnsafeCell;
use std::fmt;

use strand_core::error::SchedResult;
use strand_core::{Bomb, ChannelId, TaskId, TaskResult, TaskState};

use crate::arch::SavedRegs;
use crate::memory::Stack;
use crate::scheduler::Scheduler;

/// Boxed task body
pub(crate) type Body = Box<dyn FnOnce() -> TaskResult<()>>;

/// A task's single-slot resumption mailbox
pub(crate) enum Tempval {
    Empty,
    Value(Box<dyn Any>),
    Bomb(Bomb),
}

impl Tempval {
    pub(crate) fn is_bomb(&self) -> bool {
        matches!(self, Tempval::Bomb(_))
    }
}

/// Scheduler-side state of one task
pub(crate) struct TaskRecord {
    pub name: Option<String>,
    pub body: Option<Body>,
    /// Boxed so the address handed to `context_switch` survives map growth
    pub regs: Box<UnsafeCell<SavedRegs>>,
    pub stack: Option<Stack>,
    pub started: bool,
    pub alive: bool,
    pub blocked_on: Option<ChannelId>,
    pub tempval: Tempval,
}

impl TaskRecord {
    pub(crate) fn new() -> Self {
        Self {
            name: None,
            body: None,
            regs: Box::new(UnsafeCell::new(SavedRegs::default())),
            stack: None,
            started: false,
            alive: false,
            blocked_on: None,
            tempval: Tempval::Empty,
        }
    }

    /// The thread's original stack, already running
    pub(crate) fn main() -> Self {
        Self {
            name: Some("main".to_string()),
            started: true,
            alive: true,
            ..Self::new()
        }
    }

    #[inline]
    pub(crate) fn regs_ptr(&self) -> *mut SavedRegs {
        self.regs.get()
    }
}

/// Handle to a task
///
/// Handles stay valid after the task dies; operations on a dead task
/// either do nothing (`kill`, `throw`) or fail with a runtime error.
#[derive(Clone)]
pub struct Task {
    id: TaskId,
    sched: Scheduler,
}

impl Task {
    pub(crate) fn new(id: TaskId, sched: Scheduler) -> Self {
        Self { id, sched }
    }

    #[inline]
    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.sched
    }

    pub fn state(&self) -> TaskState {
        self.sched.task_state(self.id)
    }

    /// Started and not yet finished
    pub fn is_alive(&self) -> bool {
        self.state().is_alive()
    }

    pub fn is_blocked(&self) -> bool {
        self.state().is_blocked()
    }

    pub fn is_current(&self) -> bool {
        self.sched.current() == self.id
    }

    pub fn name(&self) -> Option<String> {
        self.sched.task_name(self.id)
    }

    pub fn set_name(&self, name: impl Into<String>) -> &Self {
        self.sched.set_task_name(self.id, name.into());
        self
    }

    /// Attach a body to an unbound task
    pub fn bind<F>(&self, body: F) -> SchedResult<&Self>
    where
        F: FnOnce() -> TaskResult<()> + 'static,
    {
        self.sched.bind(self.id, Box::new(body))?;
        Ok(self)
    }

    /// Give the task a stack and append it to the ring
    pub fn start(&self) -> SchedResult<&Self> {
        self.sched.start(self.id)?;
        Ok(self)
    }

    /// Store a value to be returned by the task's pending suspension
    pub fn set_tempval<T: Any>(&self, value: T) -> SchedResult<&Self> {
        self.sched.set_tempval(self.id, Box::new(value))?;
        Ok(self)
    }

    /// Store a bomb to be raised by the task's pending suspension
    pub fn set_bomb(&self, bomb: Bomb) -> SchedResult<&Self> {
        self.sched.set_bomb(self.id, bomb)?;
        Ok(self)
    }

    pub fn insert(&self) -> SchedResult<&Self> {
        self.sched.insert(self.id)?;
        Ok(self)
    }

    pub fn remove(&self) -> SchedResult<&Self> {
        self.sched.remove(self.id)?;
        Ok(self)
    }

    pub fn run(&self) -> TaskResult<()> {
        self.sched.run(self.id)
    }

    pub fn throw(&self, bomb: Bomb) -> TaskResult<()> {
        self.sched.throw(self.id, bomb)
    }

    pub fn kill(&self) -> TaskResult<()> {
        self.sched.kill(self.id)
    }
}

impl PartialEq for Task {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.sched.same_as(&other.sched)
    }
}

impl Eq for Task {}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("state", &self.state())
            .finish()
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{}({})", self.id, name),
            None => write!(f, "{}", self.id),
        }
    }
}
