//! # strand-io - descriptors and timers for strand tasks
//!
//! Tasks call blocking-style I/O; when a descriptor would block, only the
//! calling task is suspended and the reactor loop wakes it once the
//! descriptor is ready.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │          Task code                                       │
//! │   sock.recv(4096, 0)     ← looks like blocking I/O      │
//! │   sock.sendall(&resp, 0) ← but only this task waits     │
//! └──────────────────┬──────────────────────────────────────┘
//!                    │ EAGAIN → reactor.wait(slot)
//!                    ▼
//! ┌─────────────────────────────────────────────────────────┐
//! │         WaitSlot (one per fd direction)                  │
//! │   channel.receive() blocks the task; credit bounds       │
//! │   back-to-back attempts before a forced yield            │
//! └──────────────────┬──────────────────────────────────────┘
//!                    │
//! ┌──────────────────▼──────────────────────────────────────┐
//! │         Reactor loop task                                │
//! │   select / epoll-level / epoll-edge + sleep timers       │
//! │   ready slot → send(true), expired slot → send(false)    │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```ignore
//! use strand_io::{NonBlockingSocket, Reactor};
//! use strand_runtime::{RuntimeConfig, Scheduler};
//!
//! let sched = Scheduler::new(&RuntimeConfig::from_env())?;
//! let reactor = Reactor::new(&sched)?;
//! let listener = NonBlockingSocket::listen_tcp(&reactor, &"127.0.0.1:8080".parse()?, 128)?;
//! loop {
//!     let (conn, _peer) = listener.accept()?;
//!     sched.spawn(move || {
//!         let request = conn.recv(4096, 0)?;
//!         conn.sendall(&request, 0)
//!     })?;
//! }
//! ```

pub mod file;
pub mod poller;
pub mod reactor;
pub mod socket;
pub mod syscall;
pub mod timeout;
pub mod timer;
pub mod wait_slot;

pub use file::NonBlockingFile;
pub use poller::{new_poller, Poller, Ready};
pub use reactor::Reactor;
pub use socket::NonBlockingSocket;
pub use syscall::set_fd_blocking;
pub use timeout::run_with_timeout;
pub use timer::{TimerHandle, TimerQueue, TimerState, TimerStats};
pub use wait_slot::{Direction, SlotId, WaitSlot};
