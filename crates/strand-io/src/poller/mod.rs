//! Readiness pollers
//!
//! A [`Poller`] turns the reactor's pending read/write slots into the list
//! of slots whose descriptor became ready, waiting at most `timeout`.
//!
//! | Mode          | Backend        | Registration                         |
//! |---------------|----------------|--------------------------------------|
//! | `select`      | `select(2)`    | rebuilt from the pending sets        |
//! | `epoll-level` | `epoll(7)`     | interest masks diffed every poll     |
//! | `epoll-edge`  | `epoll(7)` ET  | once per descriptor, `IN|OUT|ET`     |

mod select;

#[cfg(any(target_os = "linux", target_os = "android"))]
mod epoll;

use std::rc::Rc;
use std::time::Duration;

use strand_core::kwarn;
use strand_runtime::IoMode;

use crate::syscall::SysResult;
use crate::wait_slot::WaitSlot;

pub use select::SelectPoller;

#[cfg(any(target_os = "linux", target_os = "android"))]
pub use epoll::{EdgePoller, LevelPoller};

/// Slots reported ready by one poll
#[derive(Default)]
pub struct Ready {
    pub read: Vec<Rc<WaitSlot>>,
    pub write: Vec<Rc<WaitSlot>>,
}

impl Ready {
    pub fn is_empty(&self) -> bool {
        self.read.is_empty() && self.write.is_empty()
    }
}

/// Multiplexing backend driven by the reactor loop
pub trait Poller {
    fn mode(&self) -> IoMode;

    /// Called once when a slot is created
    fn register(&mut self, _slot: &Rc<WaitSlot>) -> SysResult<()> {
        Ok(())
    }

    /// Drop every registration for `fd`; it is about to be closed
    fn forget(&mut self, _fd: i32) {}

    /// Wait for readiness among the pending slots
    ///
    /// `EINTR` is returned as an error; the reactor retries.
    fn poll(
        &mut self,
        reads: &[Rc<WaitSlot>],
        writes: &[Rc<WaitSlot>],
        timeout: Option<Duration>,
    ) -> SysResult<Ready>;

    /// Readiness that arrived before a slot went pending is only
    /// reported once; waiters must check it themselves first.
    fn needs_recheck(&self) -> bool {
        false
    }
}

/// Build the poller for `mode`, falling back to `select` when epoll is
/// not available.
pub fn new_poller(mode: IoMode, max_events: usize) -> Box<dyn Poller> {
    match mode.resolve() {
        #[cfg(any(target_os = "linux", target_os = "android"))]
        IoMode::EpollEdge => match EdgePoller::new(max_events) {
            Ok(p) => return Box::new(p),
            Err(e) => kwarn!("epoll unavailable ({}), using select", e),
        },
        #[cfg(any(target_os = "linux", target_os = "android"))]
        IoMode::EpollLevel => match LevelPoller::new(max_events) {
            Ok(p) => return Box::new(p),
            Err(e) => kwarn!("epoll unavailable ({}), using select", e),
        },
        IoMode::Select => {}
        #[allow(unreachable_patterns)]
        other => kwarn!("{} not supported on this platform, using select", other),
    }
    let _ = max_events;
    Box::new(SelectPoller::new())
}
