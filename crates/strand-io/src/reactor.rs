//! # Reactor
//!
//! Multiplexes descriptor readiness and sleep timers for the tasks of one
//! scheduler. The loop runs as an ordinary task ("reactor"), spawned lazily
//! the first time somebody waits, and ends itself once nothing is pending
//! and no other task is runnable. Main can also drive it directly with
//! [`Reactor::run`].
//!
//! ## One iteration
//!
//! ```text
//!  purge closed slots from the wake-up lists
//!  pending slots or timers?
//!  ├─ yes: timeout = 0 if anything else is runnable,
//!  │       else earliest deadline + slack, else infinite
//!  │       poll ─► ready slots get `true` (one per waiter)
//!  │            ─► expired timed slots get `false`
//!  │            ─► due sleepers are re-inserted
//!  │       run the woken tasks, loop task goes to the tail
//!  ├─ no, nothing else runnable: loop ends
//!  └─ no: schedule()
//! ```
//!
//! Moving the loop behind the freshly woken tasks is done by a small
//! helper task: the loop runs it, it re-inserts the loop at the ring's tail
//! and removes itself, so every woken task gets a turn before the next
//! poll.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashSet};
use std::mem;
use std::rc::{Rc, Weak};
use std::time::{Duration, Instant};

use nix::errno::Errno;
use strand_core::error::SchedResult;
use strand_core::{kdebug, kinfo, ktrace, Bomb, TaskId, TaskResult};
use strand_runtime::{IoMode, Scheduler, Task};

use crate::poller::{new_poller, Poller, Ready};
use crate::syscall;
use crate::timer::{TimerQueue, TimerState, TimerStats};
use crate::wait_slot::{Direction, SlotId, WaitSlot};

type SlotMap = BTreeMap<SlotId, Rc<WaitSlot>>;

struct ReactorInner {
    sched: Scheduler,
    mode: IoMode,
    slack: Duration,
    poller: RefCell<Box<dyn Poller>>,
    next_slot: Cell<u64>,

    pending_reads: RefCell<SlotMap>,
    pending_writes: RefCell<SlotMap>,
    /// Pending slots with a `wake_up_at`
    read_wake_ups: RefCell<Vec<Rc<WaitSlot>>>,
    write_wake_ups: RefCell<Vec<Rc<WaitSlot>>>,
    /// Retired since the last iteration
    closed: RefCell<HashSet<SlotId>>,
    timers: RefCell<TimerQueue>,

    loop_task: RefCell<Option<Task>>,
    /// Task running the current iteration
    driver: Cell<TaskId>,
    reinsert: Cell<TaskId>,
    iterations: Cell<u64>,
}

/// Readiness and timer multiplexer, shared by handle
#[derive(Clone)]
pub struct Reactor {
    inner: Rc<ReactorInner>,
}

impl Reactor {
    /// Create a reactor for `sched`, using the configured I/O mode
    pub fn new(sched: &Scheduler) -> SchedResult<Reactor> {
        let config = sched.config();
        let poller = new_poller(config.io_mode, config.max_events);
        let inner = Rc::new(ReactorInner {
            sched: sched.clone(),
            mode: poller.mode(),
            slack: config.timer_slack,
            poller: RefCell::new(poller),
            next_slot: Cell::new(0),
            pending_reads: RefCell::new(BTreeMap::new()),
            pending_writes: RefCell::new(BTreeMap::new()),
            read_wake_ups: RefCell::new(Vec::new()),
            write_wake_ups: RefCell::new(Vec::new()),
            closed: RefCell::new(HashSet::new()),
            timers: RefCell::new(TimerQueue::new()),
            loop_task: RefCell::new(None),
            driver: Cell::new(TaskId::NONE),
            reinsert: Cell::new(TaskId::NONE),
            iterations: Cell::new(0),
        });

        let weak = Rc::downgrade(&inner);
        let helper = sched.spawn(move || reinsert_loop(weak))?;
        helper.set_name("reactor-reinsert").remove()?;
        inner.reinsert.set(helper.id());

        Ok(Reactor { inner })
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.inner.sched
    }

    /// Multiplexing mode actually in use (never `Auto`)
    pub fn mode(&self) -> IoMode {
        self.inner.mode
    }

    /// Slots or timers waiting for the loop
    pub fn has_pending(&self) -> bool {
        self.inner.has_pending()
    }

    /// Loop iterations that polled
    pub fn iterations(&self) -> u64 {
        self.inner.iterations.get()
    }

    pub fn timer_stats(&self) -> TimerStats {
        self.inner.timers.borrow().stats()
    }

    /// The loop task, if one is alive
    pub fn loop_task(&self) -> Option<Task> {
        self.inner
            .loop_task
            .borrow()
            .as_ref()
            .filter(|t| t.is_alive())
            .cloned()
    }

    /// Waits must check readiness themselves before blocking
    pub fn needs_recheck(&self) -> bool {
        self.inner.poller.borrow().needs_recheck()
    }

    /// Create a wait slot for one direction of `fd`
    pub fn new_slot(&self, fd: i32, direction: Direction) -> TaskResult<Rc<WaitSlot>> {
        let id = SlotId(self.inner.next_slot.get());
        self.inner.next_slot.set(id.0 + 1);
        let slot = Rc::new(WaitSlot::new(&self.inner.sched, id, fd, direction));
        match self.inner.poller.borrow_mut().register(&slot) {
            Ok(()) => {}
            // Regular files cannot be polled; they never report EAGAIN either.
            Err(Errno::EPERM) => kdebug!("fd {} is not pollable", fd),
            Err(e) => return Err(Bomb::io(e as i32, "register")),
        }
        Ok(slot)
    }

    /// Run the loop on the calling task until no work is left
    ///
    /// A loop task started earlier is killed first.
    pub fn run(&self) -> TaskResult<()> {
        let sched = &self.inner.sched;
        let me = sched.current_task();
        let old = self.inner.loop_task.replace(Some(me.clone()));
        if let Some(old) = old {
            if old != me && old.is_alive() {
                old.remove()?;
                old.kill()?;
            }
        }

        kinfo!("reactor loop on {}, mode {}", me, self.inner.mode);
        let result = self.inner.drive();
        self.inner.loop_task.replace(None);
        result
    }

    /// Spawn the loop task unless one is alive
    pub fn ensure_running(&self) -> SchedResult<()> {
        if self.loop_task().is_some() {
            return Ok(());
        }
        let weak = Rc::downgrade(&self.inner);
        let task = self.inner.sched.spawn(move || loop_task_body(weak))?;
        task.set_name("reactor");
        kdebug!("reactor loop task {} spawned", task.id());
        self.inner.loop_task.replace(Some(task));
        Ok(())
    }

    /// Block the current task until `slot` is ready
    ///
    /// Returns `false` when `deadline` passes first or the slot is retired.
    /// A wake-up meant for another waiter of the same slot is absorbed and
    /// the wait resumes.
    pub fn wait(&self, slot: &Rc<WaitSlot>, deadline: Option<Instant>) -> TaskResult<bool> {
        let inner = &self.inner;
        loop {
            if slot.is_retired() {
                return Ok(false);
            }
            if self.needs_recheck() && syscall::poll_ready(slot.fd(), slot.direction().poll_events())
            {
                return Ok(true);
            }
            if deadline.is_some_and(|at| Instant::now() >= at) {
                return Ok(syscall::poll_ready(slot.fd(), slot.direction().poll_events()));
            }

            inner.add_pending(slot, deadline);
            self.ensure_running()?;
            slot.reset_credit();
            match slot.channel().receive() {
                Ok(true) => return Ok(true),
                Ok(false) => continue,
                Err(bomb) => {
                    if slot.channel().balance() >= 0 {
                        inner.unpend(slot);
                    }
                    return Err(bomb);
                }
            }
        }
    }

    /// Suspend the current task for `duration`
    ///
    /// Returns `true` when the full duration elapsed, `false` when the task
    /// was inserted back into the ring early.
    pub fn sleep(&self, duration: Duration) -> TaskResult<bool> {
        if duration.is_zero() {
            return Ok(true);
        }
        let inner = &self.inner;
        let Some(deadline) = Instant::now().checked_add(duration) else {
            // Beyond any representable deadline: only an early wake-up ends it.
            inner.sched.schedule_remove()?;
            return Ok(false);
        };
        let me = inner.sched.current();
        let handle = inner.timers.borrow_mut().insert(me, deadline);

        let result = self
            .ensure_running()
            .map_err(Bomb::from)
            .and_then(|()| inner.sched.schedule_remove());
        if handle.state() == TimerState::Fired {
            return result.map(|()| true);
        }
        inner.timers.borrow_mut().cancel(&handle);
        result.map(|()| false)
    }

    /// Retire `slot`: forget its descriptor and wake its waiters with `false`
    ///
    /// Called right before the descriptor is closed. Idempotent.
    pub fn retire(&self, slot: &Rc<WaitSlot>) -> TaskResult<()> {
        let inner = &self.inner;
        if slot.is_retired() {
            return Ok(());
        }
        inner.poller.borrow_mut().forget(slot.fd());
        inner.unpend(slot);
        let fd = slot.retire();
        inner.closed.borrow_mut().insert(slot.id());
        ktrace!("{} for fd {} retired", slot.id(), fd);
        inner.wake(slot, false)
    }
}

impl std::fmt::Debug for Reactor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reactor")
            .field("mode", &self.inner.mode)
            .field("pending_reads", &self.inner.pending_reads.borrow().len())
            .field("pending_writes", &self.inner.pending_writes.borrow().len())
            .field("iterations", &self.inner.iterations.get())
            .finish()
    }
}

/// Body of the lazily spawned loop task
///
/// A failure is raised in main; main is the one waiting on the results.
fn loop_task_body(weak: Weak<ReactorInner>) -> TaskResult<()> {
    let Some(inner) = weak.upgrade() else {
        return Ok(());
    };
    kinfo!("reactor loop started, mode {}", inner.mode);
    match inner.drive() {
        Err(bomb) if !bomb.is_task_exit() => {
            let sched = inner.sched.clone();
            drop(inner);
            sched.throw(TaskId::MAIN, bomb)
        }
        other => other,
    }
}

/// Body of the reinsert helper: move the driver to the tail, step aside
fn reinsert_loop(weak: Weak<ReactorInner>) -> TaskResult<()> {
    loop {
        let Some((sched, driver)) = weak.upgrade().map(|r| (r.sched.clone(), r.driver.get()))
        else {
            return Ok(());
        };
        sched.remove(driver)?;
        sched.insert(driver)?;
        sched.schedule_remove()?;
    }
}

impl ReactorInner {
    fn has_pending(&self) -> bool {
        !self.pending_reads.borrow().is_empty()
            || !self.pending_writes.borrow().is_empty()
            || self.timers.borrow().has_pending()
    }

    fn pending(&self, direction: Direction) -> &RefCell<SlotMap> {
        match direction {
            Direction::Read => &self.pending_reads,
            Direction::Write => &self.pending_writes,
        }
    }

    fn wake_ups(&self, direction: Direction) -> &RefCell<Vec<Rc<WaitSlot>>> {
        match direction {
            Direction::Read => &self.read_wake_ups,
            Direction::Write => &self.write_wake_ups,
        }
    }

    fn add_pending(&self, slot: &Rc<WaitSlot>, deadline: Option<Instant>) {
        let dir = slot.direction();
        self.pending(dir).borrow_mut().insert(slot.id(), slot.clone());
        if let Some(at) = deadline {
            let earliest = slot.wake_up_at().map_or(at, |cur| cur.min(at));
            slot.set_wake_up_at(Some(earliest));
            let mut list = self.wake_ups(dir).borrow_mut();
            if !list.iter().any(|s| s.id() == slot.id()) {
                list.push(slot.clone());
            }
        }
    }

    fn unpend(&self, slot: &WaitSlot) {
        self.pending(slot.direction()).borrow_mut().remove(&slot.id());
        slot.set_wake_up_at(None);
    }

    /// Answer every receiver waiting on `slot`
    ///
    /// The slot's channel is sender-preferred, so this never switches.
    fn wake(&self, slot: &WaitSlot, ready: bool) -> TaskResult<()> {
        for _ in 0..(-slot.channel().balance()).max(0) {
            slot.channel().send(ready)?;
        }
        Ok(())
    }

    fn drive(&self) -> TaskResult<()> {
        while self.iterate()? {}
        Ok(())
    }

    /// One loop iteration; `false` once the loop should end
    fn iterate(&self) -> TaskResult<bool> {
        let sched = &self.sched;
        self.purge_closed();

        if !self.has_pending() {
            if sched.runcount() <= 1 {
                kdebug!(
                    "reactor loop done after {} iterations",
                    self.iterations.get()
                );
                return Ok(false);
            }
            sched.schedule()?;
            return Ok(true);
        }

        let timeout = self.poll_timeout();
        ktrace!(
            "reactor iteration {}: timeout {:?}",
            self.iterations.get(),
            timeout
        );
        let ready = self.poll(timeout)?;

        let helper = self.reinsert.get();
        sched.remove(helper)?;
        sched.insert(helper)?;

        for slot in ready.write.iter().chain(ready.read.iter()) {
            self.unpend(slot);
            self.wake(slot, true)?;
        }

        let now = Instant::now();
        self.expire(Direction::Write, now)?;
        self.expire(Direction::Read, now)?;

        let due = self.timers.borrow_mut().pop_due(now);
        for task in due {
            if let Err(e) = sched.insert(task) {
                ktrace!("sleeper {} not re-inserted: {}", task, e);
            }
        }

        self.iterations.set(self.iterations.get() + 1);

        self.driver.set(sched.current());
        if sched.ring_tail() == Some(helper) {
            sched.remove(helper)?;
            sched.schedule()?;
        } else {
            sched.run(helper)?;
        }
        Ok(true)
    }

    fn purge_closed(&self) {
        let closed = mem::take(&mut *self.closed.borrow_mut());
        if closed.is_empty() {
            return;
        }
        for list in [&self.read_wake_ups, &self.write_wake_ups] {
            list.borrow_mut().retain(|s| !closed.contains(&s.id()));
        }
    }

    fn poll_timeout(&self) -> Option<Duration> {
        if self.sched.runcount() > 1 {
            return Some(Duration::ZERO);
        }
        let mut earliest = self.timers.borrow_mut().next_deadline();
        for list in [&self.read_wake_ups, &self.write_wake_ups] {
            for at in list.borrow().iter().filter_map(|s| s.wake_up_at()) {
                earliest = Some(earliest.map_or(at, |e| e.min(at)));
            }
        }
        earliest.map(|at| at.saturating_duration_since(Instant::now()) + self.slack)
    }

    fn poll(&self, timeout: Option<Duration>) -> TaskResult<Ready> {
        let reads: Vec<_> = self.pending_reads.borrow().values().cloned().collect();
        let writes: Vec<_> = self.pending_writes.borrow().values().cloned().collect();
        let mut poller = self.poller.borrow_mut();
        loop {
            match poller.poll(&reads, &writes, timeout) {
                Ok(ready) => return Ok(ready),
                Err(Errno::EINTR) | Err(Errno::EAGAIN) => continue,
                Err(e) => {
                    return Err(Bomb::io(e as i32, self.mode.as_str())
                        .at(self.sched.current(), "reactor poll"))
                }
            }
        }
    }

    /// Time out the slots whose `wake_up_at` has passed
    fn expire(&self, direction: Direction, now: Instant) -> TaskResult<()> {
        let list = mem::take(&mut *self.wake_ups(direction).borrow_mut());
        let mut keep = Vec::with_capacity(list.len());
        let mut expired = Vec::new();
        {
            let pending = self.pending(direction).borrow();
            for slot in list {
                if !pending.contains_key(&slot.id()) {
                    continue;
                }
                match slot.wake_up_at() {
                    Some(at) if now >= at => expired.push(slot),
                    Some(_) => keep.push(slot),
                    None => {}
                }
            }
        }
        self.wake_ups(direction).borrow_mut().extend(keep);
        for slot in expired {
            self.unpend(&slot);
            self.wake(&slot, false)?;
        }
        Ok(())
    }
}

impl Drop for ReactorInner {
    fn drop(&mut self) {
        let helper = self.reinsert.get();
        if self.sched.task_state(helper).is_alive() {
            let _ = self.sched.kill(helper);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strand_runtime::RuntimeConfig;

    const MODES: [IoMode; 3] = [IoMode::Select, IoMode::EpollLevel, IoMode::EpollEdge];

    fn on_thread(f: impl FnOnce() + Send + 'static) {
        std::thread::spawn(f).join().unwrap();
    }

    fn setup(mode: IoMode) -> (Scheduler, Reactor) {
        let config = RuntimeConfig::new().io_mode(mode);
        let sched = Scheduler::new(&config).unwrap();
        let reactor = Reactor::new(&sched).unwrap();
        (sched, reactor)
    }

    fn nonblocking_pipe() -> (i32, i32) {
        let (r, w) = syscall::pipe().unwrap();
        syscall::set_fd_blocking(r, false).unwrap();
        syscall::set_fd_blocking(w, false).unwrap();
        (r, w)
    }

    #[test]
    fn test_helper_stays_out_of_ring() {
        on_thread(|| {
            let (sched, reactor) = setup(IoMode::Select);
            assert_eq!(sched.runcount(), 1);
            assert!(!reactor.has_pending());
            assert!(reactor.loop_task().is_none());
            assert_eq!(reactor.mode(), IoMode::Select);
        });
    }

    #[test]
    fn test_sleep_returns_true_after_duration() {
        for mode in MODES {
            on_thread(move || {
                let (sched, reactor) = setup(mode);
                let start = Instant::now();
                assert!(reactor.sleep(Duration::from_millis(20)).unwrap());
                assert!(start.elapsed() >= Duration::from_millis(20));
                assert!(!reactor.has_pending());
                assert_eq!(reactor.timer_stats().total_fired, 1);
                assert!(reactor.iterations() >= 1);
                assert_eq!(sched.current(), TaskId::MAIN);
            });
        }
    }

    #[test]
    fn test_sleep_zero_does_not_suspend() {
        on_thread(|| {
            let (sched, reactor) = setup(IoMode::Select);
            assert!(reactor.sleep(Duration::ZERO).unwrap());
            assert_eq!(sched.switch_count(), 0);
        });
    }

    #[test]
    fn test_sleepers_wake_in_deadline_order() {
        on_thread(|| {
            let (sched, reactor) = setup(IoMode::EpollLevel);
            let log = Rc::new(RefCell::new(Vec::new()));
            for (name, ms) in [("c", 30u64), ("a", 10), ("b", 20)] {
                let r = reactor.clone();
                let log = log.clone();
                sched
                    .spawn(move || {
                        r.sleep(Duration::from_millis(ms))?;
                        log.borrow_mut().push(name);
                        Ok(())
                    })
                    .unwrap();
            }
            reactor.run().unwrap();
            assert_eq!(*log.borrow(), vec!["a", "b", "c"]);
        });
    }

    #[test]
    fn test_sleep_interrupted_by_insert() {
        on_thread(|| {
            let (sched, reactor) = setup(IoMode::Select);
            let r = reactor.clone();
            let sleeper = sched
                .spawn(move || {
                    let full = r.sleep(Duration::from_secs(60))?;
                    assert!(!full);
                    Ok(())
                })
                .unwrap();
            // let the sleeper suspend
            sched.schedule().unwrap();
            assert!(reactor.has_pending());
            sleeper.insert().unwrap();
            reactor.run().unwrap();
            assert!(!sleeper.is_alive());
            assert!(!reactor.has_pending());
            assert_eq!(reactor.timer_stats().total_cancelled, 1);
        });
    }

    #[test]
    fn test_wait_readable_across_modes() {
        for mode in MODES {
            on_thread(move || {
                let (sched, reactor) = setup(mode);
                let (r, w) = nonblocking_pipe();
                let slot = reactor.new_slot(r, Direction::Read).unwrap();

                let log = Rc::new(RefCell::new(Vec::new()));
                let (rx, l) = (reactor.clone(), log.clone());
                let s = slot.clone();
                sched
                    .spawn(move || {
                        let ready = rx.wait(&s, None)?;
                        l.borrow_mut().push(format!("reader:{}", ready));
                        Ok(())
                    })
                    .unwrap();
                let l = log.clone();
                let rw = reactor.clone();
                sched
                    .spawn(move || {
                        rw.sleep(Duration::from_millis(5))?;
                        l.borrow_mut().push("writer".to_string());
                        syscall::write(w, b"x").map_err(|e| Bomb::io(e as i32, "write"))?;
                        Ok(())
                    })
                    .unwrap();

                reactor.run().unwrap();
                assert_eq!(*log.borrow(), vec!["writer", "reader:true"]);
                assert_eq!(slot.channel().balance(), 0);
                assert!(!reactor.has_pending());
                syscall::close(r).unwrap();
                syscall::close(w).unwrap();
            });
        }
    }

    #[test]
    fn test_wait_times_out_with_false() {
        for mode in MODES {
            on_thread(move || {
                let (_sched, reactor) = setup(mode);
                let (r, w) = nonblocking_pipe();
                let slot = reactor.new_slot(r, Direction::Read).unwrap();

                let start = Instant::now();
                let deadline = start + Duration::from_millis(15);
                assert!(!reactor.wait(&slot, Some(deadline)).unwrap());
                assert!(Instant::now() >= deadline);
                assert!(!reactor.has_pending());
                assert_eq!(slot.wake_up_at(), None);

                // already past: no suspension at all
                assert!(!reactor.wait(&slot, Some(start)).unwrap());
                syscall::close(r).unwrap();
                syscall::close(w).unwrap();
            });
        }
    }

    #[test]
    fn test_past_deadline_still_reports_readiness() {
        for mode in MODES {
            on_thread(move || {
                let (sched, reactor) = setup(mode);
                let (r, w) = nonblocking_pipe();
                let slot = reactor.new_slot(r, Direction::Read).unwrap();
                syscall::write(w, b"x").unwrap();

                let switches = sched.switch_count();
                assert!(reactor.wait(&slot, Some(Instant::now())).unwrap());
                assert_eq!(sched.switch_count(), switches);
                assert!(!reactor.has_pending());
                syscall::close(r).unwrap();
                syscall::close(w).unwrap();
            });
        }
    }

    #[test]
    fn test_endless_sleep_ends_only_when_woken() {
        on_thread(|| {
            let (sched, reactor) = setup(IoMode::EpollLevel);
            let r = reactor.clone();
            let woke = Rc::new(Cell::new(None));
            let w = woke.clone();
            let sleeper = sched
                .spawn(move || {
                    w.set(Some(r.sleep(Duration::MAX)?));
                    Ok(())
                })
                .unwrap();
            sched.schedule().unwrap();
            assert!(sleeper.is_alive());
            assert!(!reactor.has_pending());
            sleeper.insert().unwrap();
            reactor.run().unwrap();
            assert_eq!(woke.get(), Some(false));
        });
    }

    #[test]
    fn test_edge_mode_rechecks_before_blocking() {
        on_thread(|| {
            let (sched, reactor) = setup(IoMode::EpollEdge);
            assert!(reactor.needs_recheck());
            let (r, w) = nonblocking_pipe();
            let slot = reactor.new_slot(r, Direction::Read).unwrap();
            syscall::write(w, b"x").unwrap();
            let switches = sched.switch_count();
            assert!(reactor.wait(&slot, None).unwrap());
            assert_eq!(sched.switch_count(), switches);
            syscall::close(r).unwrap();
            syscall::close(w).unwrap();
        });
    }

    #[test]
    fn test_retire_wakes_waiters_with_false() {
        for mode in MODES {
            on_thread(move || {
                let (sched, reactor) = setup(mode);
                let (r, w) = nonblocking_pipe();
                let slot = reactor.new_slot(r, Direction::Read).unwrap();

                let result = Rc::new(Cell::new(None));
                let (rx, s, out) = (reactor.clone(), slot.clone(), result.clone());
                sched
                    .spawn(move || {
                        out.set(Some(rx.wait(&s, None)?));
                        Ok(())
                    })
                    .unwrap();
                sched.schedule().unwrap();
                assert_eq!(slot.channel().balance(), -1);

                reactor.retire(&slot).unwrap();
                reactor.retire(&slot).unwrap();
                assert_eq!(slot.fd(), -2 - r);
                reactor.run().unwrap();

                assert_eq!(result.get(), Some(false));
                assert!(!reactor.has_pending());
                assert!(!reactor.wait(&slot, None).unwrap());
                syscall::close(r).unwrap();
                syscall::close(w).unwrap();
            });
        }
    }

    #[test]
    fn test_killed_waiter_leaves_nothing_pending() {
        on_thread(|| {
            let (sched, reactor) = setup(IoMode::EpollEdge);
            let (r, w) = nonblocking_pipe();
            let slot = reactor.new_slot(r, Direction::Read).unwrap();
            let (rx, s) = (reactor.clone(), slot.clone());
            let waiter = sched
                .spawn(move || rx.wait(&s, None).map(drop))
                .unwrap();
            sched.schedule().unwrap();
            assert!(reactor.has_pending());

            waiter.kill().unwrap();
            assert!(!waiter.is_alive());
            assert!(!reactor.has_pending());
            reactor.run().unwrap();
            syscall::close(r).unwrap();
            syscall::close(w).unwrap();
        });
    }

    #[test]
    fn test_loop_ends_with_deadlock_then_respawns() {
        on_thread(|| {
            let (sched, reactor) = setup(IoMode::Select);
            let ch = sched.channel::<i32>();
            reactor.ensure_running().unwrap();
            let first = reactor.loop_task().unwrap();

            // nothing pending and nobody left to send: main is told
            let err = ch.receive().unwrap_err();
            assert_eq!(err.root().kind(), &strand_core::BombKind::Deadlock);
            assert!(!first.is_alive());
            assert!(reactor.loop_task().is_none());

            assert!(reactor.sleep(Duration::from_millis(1)).unwrap());
            let second = reactor.loop_task().unwrap();
            assert_ne!(first.id(), second.id());
            assert_eq!(reactor.timer_stats().total_fired, 1);
        });
    }

    #[test]
    fn test_run_replaces_loop_task() {
        on_thread(|| {
            let (sched, reactor) = setup(IoMode::Select);
            let r = reactor.clone();
            sched
                .spawn(move || r.sleep(Duration::from_millis(5)).map(drop))
                .unwrap();
            sched.schedule().unwrap();
            let old = reactor.loop_task().unwrap();

            reactor.run().unwrap();
            assert!(!old.is_alive());
            assert!(reactor.loop_task().is_none());
            assert_eq!(sched.runcount(), 1);
        });
    }
}
