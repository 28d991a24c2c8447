//! Main scheduler implementation
//!
//! One scheduler per OS thread. Tasks form a ring of runnable ids; the
//! task at the front of the ring is the one executing. Switching is a
//! register-level swap between task stacks, and every call that may switch
//! reports what it found in the caller's mailbox when it resumes: a value,
//! nothing, or a [`Bomb`] to raise.
//!
//! No `RefCell` borrow is ever held across a context switch.

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::mem;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;

use strand_core::error::{SchedError, SchedResult};
use strand_core::{kdebug, kerror, kprint, ktrace};
use strand_core::{Bomb, ChannelId, TaskId, TaskResult, TaskState};

use crate::arch::{context_switch, init_context, SavedRegs};
use crate::config::RuntimeConfig;
use crate::memory::StackPool;
use crate::task::{Body, Task, TaskRecord, Tempval};
use crate::tls::{self, ThreadClaim};

pub(crate) struct SchedInner {
    tasks: RefCell<HashMap<TaskId, TaskRecord>>,
    /// Runnable tasks; the executing task sits at the front
    ring: RefCell<VecDeque<TaskId>>,
    current: Cell<TaskId>,
    next_task: Cell<TaskId>,
    next_channel: Cell<u64>,
    /// Finished tasks whose stacks are still in use until the next switch
    zombies: RefCell<Vec<TaskId>>,
    pool: StackPool,
    config: RuntimeConfig,
    switch_count: Cell<u64>,
    schedule_count: Cell<u64>,
    _claim: ThreadClaim,
}

/// Handle to this thread's scheduler
///
/// Cloning is cheap; all clones refer to the same ring.
#[derive(Clone)]
pub struct Scheduler {
    inner: Rc<SchedInner>,
}

impl Scheduler {
    /// Create the scheduler for the calling thread
    ///
    /// The caller becomes the main task. Fails with `AlreadyInitialized`
    /// if another scheduler is alive on this thread.
    pub fn new(config: &RuntimeConfig) -> SchedResult<Scheduler> {
        let claim = tls::claim_thread()?;

        let mut tasks = HashMap::new();
        tasks.insert(TaskId::MAIN, TaskRecord::main());
        let mut ring = VecDeque::new();
        ring.push_back(TaskId::MAIN);

        kprint::set_log_task(TaskId::MAIN.as_u32());
        kdebug!(
            "scheduler created: stack_size={} stack_cache={}",
            config.stack_size,
            config.stack_cache
        );

        Ok(Scheduler {
            inner: Rc::new(SchedInner {
                tasks: RefCell::new(tasks),
                ring: RefCell::new(ring),
                current: Cell::new(TaskId::MAIN),
                next_task: Cell::new(TaskId::MAIN.next()),
                next_channel: Cell::new(1),
                zombies: RefCell::new(Vec::new()),
                pool: StackPool::new(config.stack_size, config.stack_cache),
                config: config.clone(),
                switch_count: Cell::new(0),
                schedule_count: Cell::new(0),
                _claim: claim,
            }),
        })
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }

    /// Whether two handles refer to the same scheduler
    pub fn same_as(&self, other: &Scheduler) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    // ========================================================================
    // Task creation
    // ========================================================================

    /// Create an unbound, unstarted task
    pub fn task(&self) -> Task {
        let id = self.inner.next_task.get();
        self.inner.next_task.set(id.next());
        self.inner.tasks.borrow_mut().insert(id, TaskRecord::new());
        Task::new(id, self.clone())
    }

    /// Create a task running `body` and append it to the ring, just before
    /// the current task in round-robin order
    pub fn spawn<F>(&self, body: F) -> SchedResult<Task>
    where
        F: FnOnce() -> TaskResult<()> + 'static,
    {
        let task = self.task();
        task.bind(body)?;
        task.start()?;
        Ok(task)
    }

    pub(crate) fn bind(&self, id: TaskId, body: Body) -> SchedResult<()> {
        let mut tasks = self.inner.tasks.borrow_mut();
        let rec = tasks.get_mut(&id).ok_or(SchedError::TaskNotFound)?;
        if rec.started {
            return Err(SchedError::AlreadyStarted);
        }
        if rec.body.is_some() {
            return Err(SchedError::AlreadyBound);
        }
        rec.body = Some(body);
        Ok(())
    }

    pub(crate) fn start(&self, id: TaskId) -> SchedResult<()> {
        {
            let mut tasks = self.inner.tasks.borrow_mut();
            let rec = tasks.get_mut(&id).ok_or(SchedError::TaskNotFound)?;
            if rec.started {
                return Err(SchedError::AlreadyStarted);
            }
            if rec.body.is_none() {
                return Err(SchedError::NotBound);
            }

            let stack = self.inner.pool.acquire()?;
            let arg = Rc::as_ptr(&self.inner) as usize;
            // SAFETY: the record owns both the registers and the stack; the
            // stack outlives the task and `arg` outlives every task.
            unsafe { init_context(&mut *rec.regs_ptr(), stack.top(), task_entry, arg) };
            rec.stack = Some(stack);
            rec.started = true;
            rec.alive = true;
        }
        self.inner.ring.borrow_mut().push_back(id);
        ktrace!("started {}", id);
        Ok(())
    }

    // ========================================================================
    // Introspection
    // ========================================================================

    #[inline]
    pub fn current(&self) -> TaskId {
        self.inner.current.get()
    }

    pub fn current_task(&self) -> Task {
        Task::new(self.current(), self.clone())
    }

    pub fn main_task(&self) -> Task {
        Task::new(TaskId::MAIN, self.clone())
    }

    /// Handle for an existing task id
    pub fn task_by_id(&self, id: TaskId) -> Option<Task> {
        if self.inner.tasks.borrow().contains_key(&id) {
            Some(Task::new(id, self.clone()))
        } else {
            None
        }
    }

    /// Number of tasks in the ring, the current one included
    pub fn runcount(&self) -> usize {
        self.inner.ring.borrow().len()
    }

    /// Context switches performed so far
    pub fn switch_count(&self) -> u64 {
        self.inner.switch_count.get()
    }

    /// `schedule()` calls made so far
    pub fn schedule_count(&self) -> u64 {
        self.inner.schedule_count.get()
    }

    /// Ids in the ring, front (current) first
    pub fn ring(&self) -> Vec<TaskId> {
        self.inner.ring.borrow().iter().copied().collect()
    }

    /// The task that would run last in the current round
    pub fn ring_tail(&self) -> Option<TaskId> {
        self.inner.ring.borrow().back().copied()
    }

    pub fn task_state(&self, id: TaskId) -> TaskState {
        let tasks = self.inner.tasks.borrow();
        let Some(rec) = tasks.get(&id) else {
            return TaskState::Dead;
        };
        if !rec.started {
            TaskState::Unstarted
        } else if !rec.alive {
            TaskState::Dead
        } else if id == self.current() {
            TaskState::Running
        } else if rec.blocked_on.is_some() {
            TaskState::Blocked
        } else if self.inner.ring.borrow().contains(&id) {
            TaskState::Runnable
        } else {
            TaskState::Suspended
        }
    }

    pub(crate) fn task_name(&self, id: TaskId) -> Option<String> {
        self.inner
            .tasks
            .borrow()
            .get(&id)
            .and_then(|rec| rec.name.clone())
    }

    pub(crate) fn set_task_name(&self, id: TaskId, name: String) {
        if let Some(rec) = self.inner.tasks.borrow_mut().get_mut(&id) {
            rec.name = Some(name);
        }
    }

    pub(crate) fn blocked_on(&self, id: TaskId) -> Option<ChannelId> {
        self.inner
            .tasks
            .borrow()
            .get(&id)
            .and_then(|rec| rec.blocked_on)
    }

    pub(crate) fn next_channel_id(&self) -> ChannelId {
        let id = self.inner.next_channel.get();
        self.inner.next_channel.set(id + 1);
        ChannelId(id)
    }

    // ========================================================================
    // Mailbox
    // ========================================================================

    pub(crate) fn set_tempval(&self, id: TaskId, value: Box<dyn Any>) -> SchedResult<()> {
        self.store_tempval(id, Tempval::Value(value))
    }

    pub(crate) fn set_bomb(&self, id: TaskId, bomb: Bomb) -> SchedResult<()> {
        self.store_tempval(id, Tempval::Bomb(bomb))
    }

    fn store_tempval(&self, id: TaskId, value: Tempval) -> SchedResult<()> {
        let old = {
            let mut tasks = self.inner.tasks.borrow_mut();
            match tasks.get_mut(&id) {
                Some(rec) if rec.alive => mem::replace(&mut rec.tempval, value),
                _ => return Err(SchedError::DeadTask),
            }
        };
        drop(old);
        Ok(())
    }

    // ========================================================================
    // Switching
    // ========================================================================

    /// Move the current task to the tail and run the next one
    pub fn schedule(&self) -> TaskResult<()> {
        self.inner.count_schedule();
        let next = self.inner.rotate_past_current();
        self.inner.switch_to(next);
        self.inner.resume_unit()
    }

    /// `schedule()`, leaving `value` in the mailbox
    ///
    /// Returns whatever is in the mailbox on resumption: `value` itself if
    /// nobody replaced it.
    pub fn schedule_with<T: Any>(&self, value: T) -> TaskResult<Option<T>> {
        self.set_tempval(self.current(), Box::new(value))?;
        self.inner.count_schedule();
        let next = self.inner.rotate_past_current();
        self.inner.switch_to(next);
        self.inner.resume_value()
    }

    /// Remove the current task from the ring and run the next one
    ///
    /// The caller stays suspended until something inserts or runs it again.
    /// If main is the only runnable task, this returns immediately.
    pub fn schedule_remove(&self) -> TaskResult<()> {
        self.inner.remove_current_and_switch();
        self.inner.resume_unit()
    }

    /// `schedule_remove()` returning the value a waker stored with
    /// [`Task::set_tempval`]
    pub fn suspend_for<T: Any>(&self) -> TaskResult<Option<T>> {
        self.inner.remove_current_and_switch();
        self.inner.resume_value()
    }

    /// Block the current task on a channel until a peer or a bomb wakes it
    pub(crate) fn block_current(&self, channel: ChannelId) -> TaskResult<()> {
        let me = self.current();
        self.inner.set_blocked(me, Some(channel));
        if !self.inner.remove_current_and_switch() {
            self.inner.set_blocked(me, None);
            return Err(Bomb::deadlock().at(me, format!("block on {}", channel)));
        }
        self.inner.set_blocked(me, None);
        self.inner.resume_unit()
    }

    /// Clear a task's blocked mark so it can be inserted again
    pub(crate) fn unblock(&self, id: TaskId) {
        self.inner.set_blocked(id, None);
    }

    /// Put a runnable task right after the current one
    pub(crate) fn insert_next(&self, id: TaskId) {
        let mut ring = self.inner.ring.borrow_mut();
        if ring.contains(&id) {
            return;
        }
        let at = ring.len().min(1);
        ring.insert(at, id);
    }

    // ========================================================================
    // Ring membership
    // ========================================================================

    /// Append a task to the ring; no-op if it is already there
    pub fn insert(&self, id: TaskId) -> SchedResult<()> {
        {
            let tasks = self.inner.tasks.borrow();
            let rec = tasks.get(&id).ok_or(SchedError::DeadTask)?;
            if !rec.alive {
                return Err(SchedError::DeadTask);
            }
            if rec.blocked_on.is_some() {
                return Err(SchedError::BlockedTask);
            }
        }
        let mut ring = self.inner.ring.borrow_mut();
        if !ring.contains(&id) {
            ring.push_back(id);
        }
        Ok(())
    }

    /// Take a task out of the ring; no-op if it is not there
    pub fn remove(&self, id: TaskId) -> SchedResult<()> {
        if self.blocked_on(id).is_some() {
            return Err(SchedError::BlockedTask);
        }
        if id == self.current() {
            return Err(SchedError::CurrentTask);
        }
        self.inner.ring.borrow_mut().retain(|&t| t != id);
        Ok(())
    }

    /// Make a task current right away
    ///
    /// The ring is rotated to the task if it is runnable, otherwise the task
    /// is pushed to the front. Returns when the caller is scheduled again.
    pub fn run(&self, id: TaskId) -> TaskResult<()> {
        match self.task_state(id) {
            TaskState::Running => return Ok(()),
            TaskState::Blocked => return Err(SchedError::BlockedTask.into()),
            TaskState::Dead | TaskState::Unstarted => return Err(SchedError::DeadTask.into()),
            TaskState::Runnable | TaskState::Suspended => {}
        }
        self.inner.bring_to_front(id);
        self.inner.switch_to(id);
        self.inner.resume_unit()
    }

    /// Raise `bomb` inside a task
    ///
    /// A dead target is ignored. If the target is the caller, the bomb is
    /// returned right away. A blocked target is released from its channel
    /// and runs next; its channel operation fails with the bomb.
    pub fn throw(&self, id: TaskId, bomb: Bomb) -> TaskResult<()> {
        let me = self.current();
        if id == me {
            return Err(bomb);
        }
        if !self.task_state(id).is_alive() {
            return Ok(());
        }
        self.inner.set_blocked(id, None);
        self.set_bomb(id, bomb.at(me, format!("throw to {}", id)))?;
        self.inner.bring_to_front(id);
        self.inner.switch_to(id);
        self.inner.resume_unit()
    }

    /// Raise `TaskExit` inside a task; the task dies silently
    pub fn kill(&self, id: TaskId) -> TaskResult<()> {
        self.throw(id, Bomb::task_exit())
    }
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("current", &self.current())
            .field("ring", &self.ring())
            .field("switch_count", &self.switch_count())
            .finish()
    }
}

impl SchedInner {
    fn count_schedule(&self) {
        self.schedule_count.set(self.schedule_count.get() + 1);
    }

    fn set_blocked(&self, id: TaskId, channel: Option<ChannelId>) {
        if let Some(rec) = self.tasks.borrow_mut().get_mut(&id) {
            rec.blocked_on = channel;
        }
    }

    /// Rotate the current task to the tail; returns the new front
    fn rotate_past_current(&self) -> TaskId {
        let me = self.current.get();
        let mut ring = self.ring.borrow_mut();
        if ring.front() == Some(&me) && ring.len() > 1 {
            ring.rotate_left(1);
        }
        ring.front().copied().unwrap_or(me)
    }

    fn bring_to_front(&self, id: TaskId) {
        let mut ring = self.ring.borrow_mut();
        match ring.iter().position(|&t| t == id) {
            Some(i) => ring.rotate_left(i),
            None => ring.push_front(id),
        }
    }

    /// Returns `false` when nothing was switched to (main alone in the ring)
    fn remove_current_and_switch(&self) -> bool {
        let me = self.current.get();
        let next = {
            let mut ring = self.ring.borrow_mut();
            ring.retain(|&t| t != me);
            if ring.is_empty() {
                if me.is_main() {
                    ring.push_front(me);
                    return false;
                }
                // Main must stay reachable; if it was waiting on a channel
                // nobody can wake it any more.
                self.wake_main_for_deadlock(me);
                ring.push_back(TaskId::MAIN);
            }
            ring[0]
        };
        self.switch_to(next);
        true
    }

    /// Give main a deadlock bomb if it is blocked on a channel
    fn wake_main_for_deadlock(&self, culprit: TaskId) {
        let mut tasks = self.tasks.borrow_mut();
        if let Some(main) = tasks.get_mut(&TaskId::MAIN) {
            if main.blocked_on.take().is_some() {
                main.tempval = Tempval::Bomb(Bomb::deadlock().at(culprit, "last runnable task"));
            }
        }
    }

    /// Switch stacks from the current task to `next`
    fn switch_to(&self, next: TaskId) {
        let cur = self.current.get();
        if cur == next {
            return;
        }
        let (old, new) = {
            let tasks = self.tasks.borrow();
            match (tasks.get(&cur), tasks.get(&next)) {
                (Some(a), Some(b)) => (a.regs_ptr(), b.regs_ptr() as *const SavedRegs),
                _ => {
                    kerror!("cannot switch from {} to unknown task {}", cur, next);
                    return;
                }
            }
        };
        self.current.set(next);
        self.switch_count.set(self.switch_count.get() + 1);
        kprint::set_log_task(next.as_u32());

        // SAFETY: both register blocks are boxed inside live task records;
        // `old` is a zombie at worst, and zombies are reaped only after this
        // switch completes.
        unsafe { context_switch(old, new) };

        self.reap_zombies();
    }

    /// Free records and stacks of tasks that finished before the last switch
    fn reap_zombies(&self) {
        let dead = mem::take(&mut *self.zombies.borrow_mut());
        for id in dead {
            let rec = self.tasks.borrow_mut().remove(&id);
            if let Some(mut rec) = rec {
                if let Some(stack) = rec.stack.take() {
                    self.pool.release(stack);
                }
            }
        }
    }

    fn take_tempval(&self) -> Tempval {
        let me = self.current.get();
        let mut tasks = self.tasks.borrow_mut();
        match tasks.get_mut(&me) {
            Some(rec) => mem::replace(&mut rec.tempval, Tempval::Empty),
            None => Tempval::Empty,
        }
    }

    fn resume_unit(&self) -> TaskResult<()> {
        match self.take_tempval() {
            Tempval::Bomb(bomb) => Err(bomb),
            Tempval::Value(_) | Tempval::Empty => Ok(()),
        }
    }

    fn resume_value<T: Any>(&self) -> TaskResult<Option<T>> {
        match self.take_tempval() {
            Tempval::Empty => Ok(None),
            Tempval::Bomb(bomb) => Err(bomb),
            Tempval::Value(v) => v
                .downcast::<T>()
                .map(|v| Some(*v))
                .map_err(|_| Bomb::type_error("mailbox holds a value of another type")),
        }
    }

    /// Retire the current task and switch away for good
    fn finish_current(&self, result: TaskResult<()>) -> ! {
        let me = self.current.get();
        let stale = {
            let mut tasks = self.tasks.borrow_mut();
            match tasks.get_mut(&me) {
                Some(rec) => {
                    rec.alive = false;
                    rec.blocked_on = None;
                    mem::replace(&mut rec.tempval, Tempval::Empty)
                }
                None => Tempval::Empty,
            }
        };
        drop(stale);

        let next = {
            let mut ring = self.ring.borrow_mut();
            ring.retain(|&t| t != me);
            if ring.is_empty() {
                let bomb = match result {
                    Err(bomb) if !bomb.is_task_exit() => bomb,
                    _ => Bomb::deadlock(),
                };
                let mut tasks = self.tasks.borrow_mut();
                if let Some(main) = tasks.get_mut(&TaskId::MAIN) {
                    main.blocked_on = None;
                    main.tempval = Tempval::Bomb(bomb.at(me, "task exit"));
                }
                ring.push_front(TaskId::MAIN);
            } else if let Err(bomb) = &result {
                if !bomb.is_task_exit() {
                    kerror!("task {} died: {}", me, bomb);
                }
            }
            ring[0]
        };

        ktrace!("{} finished, switching to {}", me, next);
        self.zombies.borrow_mut().push(me);
        self.switch_to(next);

        kerror!("finished task {} was resumed", me);
        std::process::abort()
    }
}

/// First frame of every task stack
extern "C" fn task_entry(arg: usize) {
    // SAFETY: `arg` is the scheduler that started this task; tasks only run
    // while their scheduler is alive.
    let inner = unsafe { &*(arg as *const SchedInner) };
    inner.reap_zombies();

    let me = inner.current.get();
    let (body, pending) = {
        let mut tasks = inner.tasks.borrow_mut();
        match tasks.get_mut(&me) {
            Some(rec) => {
                let pending = match mem::replace(&mut rec.tempval, Tempval::Empty) {
                    Tempval::Bomb(bomb) => Some(bomb),
                    _ => None,
                };
                (rec.body.take(), pending)
            }
            None => (None, None),
        }
    };

    let result = match (pending, body) {
        // Bombed before it ever ran: the body is dropped unrun
        (Some(bomb), body) => {
            drop(body);
            Err(bomb)
        }
        (None, Some(body)) => run_body(body),
        (None, None) => Err(SchedError::NotBound.into()),
    };

    inner.finish_current(result)
}

fn run_body(body: Body) -> TaskResult<()> {
    match panic::catch_unwind(AssertUnwindSafe(body)) {
        Ok(result) => result,
        Err(payload) => {
            let msg = if let Some(s) = payload.downcast_ref::<&str>() {
                (*s).to_string()
            } else if let Some(s) = payload.downcast_ref::<String>() {
                s.clone()
            } else {
                "task panicked".to_string()
            };
            Err(Bomb::panic(msg))
        }
    }
}
