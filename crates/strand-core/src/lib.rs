//! # strand-core
//!
//! Core types for the strand single-threaded cooperative runtime.
//!
//! This crate is platform-agnostic and contains no OS-specific code.
//! Context switching, stacks and the scheduler live in `strand-runtime`;
//! descriptors and the reactor live in `strand-io`.
//!
//! ## Modules
//!
//! - `id` - Task and channel identifier types
//! - `state` - Task state enum
//! - `bomb` - Exceptions carried as values across suspension points
//! - `error` - Scheduler and memory error types
//! - `traits` - `NonBlockingTransport` and its `std::io` adapter
//! - `kprint` - Kernel-style leveled logging macros
//! - `env` - Environment variable utilities

#![allow(dead_code)]

pub mod id;
pub mod state;
pub mod bomb;
pub mod error;
pub mod traits;
pub mod kprint;
pub mod env;

// Re-exports for convenience
pub use id::{ChannelId, TaskId};
pub use state::TaskState;
pub use bomb::{Bomb, BombKind, TaskResult, TraceFrame};
pub use error::{MemoryError, SchedError, SchedResult};
pub use traits::{IoAdapter, NonBlockingTransport};
pub use env::{env_get, env_get_bool, env_get_duration_us, env_get_opt, env_get_str, env_is_set};

/// Runtime-wide constants
pub mod constants {
    /// Guard page size placed below every task stack (4 KB)
    pub const GUARD_SIZE: usize = 4096;

    /// Smallest stack a task may be given
    pub const MIN_STACK_SIZE: usize = 16 * 1024;

    /// Default stack size per task
    pub const DEFAULT_STACK_SIZE: usize = 256 * 1024;

    /// Non-blocking I/O attempts on one wait slot before a forced `schedule()`
    pub const CREDITS_PER_ITERATION: i32 = 32;

    /// No task sentinel value
    pub const TASK_NONE: u32 = u32::MAX;

    /// Id reserved for the thread's original ("main") task
    pub const TASK_MAIN: u32 = 0;
}
