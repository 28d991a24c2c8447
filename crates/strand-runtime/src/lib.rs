//! # strand-runtime
//!
//! Stackful task scheduler for the strand runtime.
//!
//! This crate provides:
//! - Context switching (architecture-specific assembly)
//! - Task stacks (mmap with guard pages, recycled through a pool)
//! - The per-thread scheduler: runnable ring, suspend/resume, kill/throw
//! - Rendezvous channels and a blocking double-ended queue
//! - Configuration with compile-time defaults and environment overrides
//!
//! Everything here is single-threaded: a [`Scheduler`] and its tasks stay
//! on the OS thread that created them.

pub mod arch;
pub mod channel;
pub mod config;
pub mod memory;
pub mod queue;
pub mod scheduler;
pub mod task;
pub mod tls;

// Re-exports
pub use channel::Channel;
pub use config::{ConfigError, IoMode, RuntimeConfig};
pub use queue::Queue;
pub use scheduler::Scheduler;
pub use task::Task;

