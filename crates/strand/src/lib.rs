//! # strand - cooperative tasks on one OS thread
//!
//! Stackful tasks that switch only at explicit suspension points, rendezvous
//! channels between them, and a readiness reactor that lets tasks perform
//! blocking-style file and socket I/O without blocking the thread.
//!
//! ## Quick Start
//!
//! ```ignore
//! use std::time::Duration;
//! use strand::{Runtime, RuntimeConfig};
//!
//! fn main() -> strand::TaskResult<()> {
//!     let rt = Runtime::new(&RuntimeConfig::from_env())?;
//!     rt.block_on(|| {
//!         let ch = rt.scheduler().channel::<u32>();
//!         let tx = ch.clone();
//!         let r = rt.reactor().clone();
//!         rt.spawn(move || {
//!             r.sleep(Duration::from_millis(10))?;
//!             tx.send(7)
//!         })?;
//!         println!("got {}", ch.receive()?);
//!         Ok(())
//!     })
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      User Code                              │
//! │        spawn(), channel send/receive, sock.recv()           │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Scheduler                              │
//! │     runnable ring, suspend/resume, kill/throw, stacks       │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       Reactor                               │
//! │   loop task: poll fds + timers, wake waiting tasks          │
//! └─────────────────────────────────────────────────────────────┘
//! ```

use std::time::Duration;

// Re-export core types
pub use strand_core::{
    Bomb, BombKind, ChannelId, IoAdapter, NonBlockingTransport, SchedError, SchedResult,
    TaskId, TaskResult, TaskState, TraceFrame,
};

// Re-export kprint macros for debug logging
pub use strand_core::{kdebug, kerror, kinfo, kprint, kprintln, ktrace, kwarn};
pub use strand_core::kprint::{init as init_logging, set_flush_enabled, set_log_level, LogLevel};

// Re-export env utilities
pub use strand_core::{env_get, env_get_bool, env_get_opt, env_get_str, env_is_set};

// Re-export runtime types
pub use strand_runtime::{Channel, ConfigError, IoMode, Queue, RuntimeConfig, Scheduler, Task};

// Re-export I/O types
pub use strand_io::{
    run_with_timeout, set_fd_blocking, Direction, NonBlockingFile, NonBlockingSocket, Reactor,
    TimerStats,
};

/// A scheduler and its reactor, bound to the calling thread
pub struct Runtime {
    sched: Scheduler,
    reactor: Reactor,
}

impl Runtime {
    /// Create the runtime for the calling thread
    ///
    /// Fails with `AlreadyInitialized` if this thread already has a scheduler.
    pub fn new(config: &RuntimeConfig) -> SchedResult<Self> {
        let sched = Scheduler::new(config)?;
        let reactor = Reactor::new(&sched)?;
        Ok(Self { sched, reactor })
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.sched
    }

    pub fn reactor(&self) -> &Reactor {
        &self.reactor
    }

    /// Spawn a task at the tail of the runnable ring
    pub fn spawn<F>(&self, body: F) -> SchedResult<Task>
    where
        F: FnOnce() -> TaskResult<()> + 'static,
    {
        self.sched.spawn(body)
    }

    /// Suspend the current task for `duration`
    ///
    /// Returns `false` if the task was woken early.
    pub fn sleep(&self, duration: Duration) -> TaskResult<bool> {
        self.reactor.sleep(duration)
    }

    /// Run `f` on the main task, then drive the reactor until no other
    /// task is left
    ///
    /// An error from `f` is returned after the remaining tasks have run,
    /// ahead of any error raised while running them.
    pub fn block_on<F, T>(&self, f: F) -> TaskResult<T>
    where
        F: FnOnce() -> TaskResult<T>,
    {
        let result = f();
        let driven = self.reactor.run();
        let value = result?;
        driven?;
        Ok(value)
    }
}
