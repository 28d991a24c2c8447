//! Wait slots
//!
//! A [`WaitSlot`] is the rendezvous point between one descriptor direction
//! and the tasks waiting on it. Waiters block in `receive()` on the slot's
//! channel; the reactor answers `true` when the descriptor is ready and
//! `false` when the wait expired or the descriptor was closed.
//!
//! Each slot also carries the I/O *credit*: how many more non-blocking
//! attempts may succeed back to back before the task is made to yield.

use std::cell::Cell;
use std::fmt;
use std::time::Instant;

use strand_core::TaskResult;
use strand_runtime::{Channel, Scheduler};

/// Reactor-wide slot identifier
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SlotId(pub u64);

impl fmt::Debug for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SlotId({})", self.0)
    }
}

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "slot{}", self.0)
    }
}

/// Which readiness a slot waits for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Read,
    Write,
}

impl Direction {
    #[inline]
    pub fn index(self) -> usize {
        match self {
            Direction::Read => 0,
            Direction::Write => 1,
        }
    }

    /// `poll(2)` event bits for this direction
    pub fn poll_events(self) -> libc::c_short {
        match self {
            Direction::Read => libc::POLLIN,
            Direction::Write => libc::POLLOUT,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Read => f.write_str("read"),
            Direction::Write => f.write_str("write"),
        }
    }
}

/// One descriptor direction plus its waiters
pub struct WaitSlot {
    id: SlotId,
    fd: Cell<i32>,
    direction: Direction,
    /// Sender-preferred, so the reactor never switches while waking
    channel: Channel<bool>,
    credit: Cell<i32>,
    credits_per_iteration: i32,
    wake_up_at: Cell<Option<Instant>>,
}

impl WaitSlot {
    pub(crate) fn new(sched: &Scheduler, id: SlotId, fd: i32, direction: Direction) -> Self {
        let channel = sched.channel();
        channel.set_preference(1);
        let credits = sched.config().credits_per_iteration;
        Self {
            id,
            fd: Cell::new(fd),
            direction,
            channel,
            credit: Cell::new(credits),
            credits_per_iteration: credits,
            wake_up_at: Cell::new(None),
        }
    }

    #[inline]
    pub fn id(&self) -> SlotId {
        self.id
    }

    /// Descriptor, or a negative sentinel once retired
    #[inline]
    pub fn fd(&self) -> i32 {
        self.fd.get()
    }

    #[inline]
    pub fn direction(&self) -> Direction {
        self.direction
    }

    #[inline]
    pub fn channel(&self) -> &Channel<bool> {
        &self.channel
    }

    pub fn credit(&self) -> i32 {
        self.credit.get()
    }

    pub fn wake_up_at(&self) -> Option<Instant> {
        self.wake_up_at.get()
    }

    pub(crate) fn set_wake_up_at(&self, at: Option<Instant>) {
        self.wake_up_at.set(at);
    }

    pub fn is_retired(&self) -> bool {
        self.fd.get() < 0
    }

    /// Spend one credit; yield once the budget runs out
    pub fn charge(&self, sched: &Scheduler) -> TaskResult<()> {
        let left = self.credit.get() - 1;
        if left < 0 {
            self.credit.set(self.credits_per_iteration);
            sched.schedule()
        } else {
            self.credit.set(left);
            Ok(())
        }
    }

    /// Refill after a real wait
    pub fn reset_credit(&self) {
        self.credit.set(self.credits_per_iteration);
    }

    /// Replace the descriptor with a sentinel that can never be a valid fd
    ///
    /// The original descriptor stays recoverable for diagnostics as
    /// `-2 - sentinel`.
    pub(crate) fn retire(&self) -> i32 {
        let fd = self.fd.get();
        if fd >= 0 {
            self.fd.set(-2 - fd);
        }
        fd
    }
}

impl fmt::Debug for WaitSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WaitSlot")
            .field("id", &self.id)
            .field("fd", &self.fd.get())
            .field("direction", &self.direction)
            .field("balance", &self.channel.balance())
            .field("credit", &self.credit.get())
            .finish()
    }
}
