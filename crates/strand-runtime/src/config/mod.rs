//! Runtime configuration
//!
//! Provides compile-time defaults with runtime environment overrides.
//!
//! # Configuration Priority (highest wins)
//!
//! 1. Builder calls
//! 2. Environment variables (runtime)
//! 3. The `STRAND_CONFIG_RS` file (compile-time, merged by build.rs)
//! 4. Library defaults
//!
//! # Example
//!
//! ```rust,ignore
//! use strand_runtime::config::{IoMode, RuntimeConfig};
//!
//! let config = RuntimeConfig::from_env()
//!     .io_mode(IoMode::EpollLevel)
//!     .credits_per_iteration(16);
//! ```

pub mod defaults;

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use strand_core::constants::MIN_STACK_SIZE;
use strand_core::env::{env_get, env_get_duration_us};

/// How the reactor multiplexes descriptors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoMode {
    /// `select(2)`; portable, limited to FD_SETSIZE descriptors
    Select,
    /// Level-triggered epoll, interest masks recomputed every iteration
    EpollLevel,
    /// Edge-triggered epoll, one persistent registration per descriptor
    EpollEdge,
    /// Edge-triggered epoll where available, select otherwise
    Auto,
}

impl IoMode {
    /// Resolve `Auto` for the current platform
    pub fn resolve(self) -> IoMode {
        match self {
            IoMode::Auto if cfg!(target_os = "linux") => IoMode::EpollEdge,
            IoMode::Auto => IoMode::Select,
            other => other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            IoMode::Select => "select",
            IoMode::EpollLevel => "epoll-level",
            IoMode::EpollEdge => "epoll-edge",
            IoMode::Auto => "auto",
        }
    }
}

impl fmt::Display for IoMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IoMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "select" => Ok(IoMode::Select),
            "epoll-level" | "epoll_level" | "level" => Ok(IoMode::EpollLevel),
            "epoll-edge" | "epoll_edge" | "edge" => Ok(IoMode::EpollEdge),
            "auto" => Ok(IoMode::Auto),
            _ => Err(ConfigError::InvalidValue("unknown io mode")),
        }
    }
}

/// Scheduler and reactor configuration with builder pattern.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Usable stack bytes per task (a guard page is added below)
    pub stack_size: usize,
    /// Released stacks kept for reuse
    pub stack_cache: usize,
    /// I/O attempts on one wait slot before a forced yield
    pub credits_per_iteration: i32,
    /// Reactor multiplexing mode
    pub io_mode: IoMode,
    /// Events fetched per epoll_wait
    pub max_events: usize,
    /// Added to poll timeouts so deadlines are not missed by rounding
    pub timer_slack: Duration,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

impl RuntimeConfig {
    /// Create config from compile-time defaults with environment overrides.
    ///
    /// Environment variables (all optional):
    /// - `STRAND_STACK_SIZE` - Stack bytes per task
    /// - `STRAND_STACK_CACHE` - Released stacks kept for reuse
    /// - `STRAND_CREDITS_PER_ITERATION` - I/O attempts before a forced yield
    /// - `STRAND_IO_MODE` - select | epoll-level | epoll-edge | auto
    /// - `STRAND_MAX_EVENTS` - Events per epoll_wait
    /// - `STRAND_TIMER_SLACK_US` - Poll timeout slack in microseconds
    pub fn from_env() -> Self {
        let defaults = Self::new();
        Self {
            stack_size: env_get("STRAND_STACK_SIZE", defaults.stack_size),
            stack_cache: env_get("STRAND_STACK_CACHE", defaults.stack_cache),
            credits_per_iteration: env_get(
                "STRAND_CREDITS_PER_ITERATION",
                defaults.credits_per_iteration,
            ),
            io_mode: env_get("STRAND_IO_MODE", defaults.io_mode),
            max_events: env_get("STRAND_MAX_EVENTS", defaults.max_events),
            timer_slack: env_get_duration_us("STRAND_TIMER_SLACK_US", defaults.timer_slack),
        }
    }

    /// Create config with compile-time defaults only (no env override).
    pub fn new() -> Self {
        Self {
            stack_size: defaults::STACK_SIZE,
            stack_cache: defaults::STACK_CACHE,
            credits_per_iteration: defaults::CREDITS_PER_ITERATION,
            io_mode: defaults::IO_MODE.parse().unwrap_or(IoMode::Auto),
            max_events: defaults::MAX_EVENTS,
            timer_slack: Duration::from_micros(defaults::TIMER_SLACK_US),
        }
    }

    // Builder methods

    pub fn stack_size(mut self, size: usize) -> Self {
        self.stack_size = size;
        self
    }

    pub fn stack_cache(mut self, n: usize) -> Self {
        self.stack_cache = n;
        self
    }

    pub fn credits_per_iteration(mut self, n: i32) -> Self {
        self.credits_per_iteration = n;
        self
    }

    pub fn io_mode(mut self, mode: IoMode) -> Self {
        self.io_mode = mode;
        self
    }

    pub fn max_events(mut self, n: usize) -> Self {
        self.max_events = n;
        self
    }

    pub fn timer_slack(mut self, d: Duration) -> Self {
        self.timer_slack = d;
        self
    }

    /// Validate configuration and return errors if invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.stack_size < MIN_STACK_SIZE {
            return Err(ConfigError::InvalidValue("stack_size must be >= 16KB"));
        }
        if self.credits_per_iteration < 1 {
            return Err(ConfigError::InvalidValue("credits_per_iteration must be > 0"));
        }
        if self.max_events == 0 {
            return Err(ConfigError::InvalidValue("max_events must be > 0"));
        }
        Ok(())
    }

    /// Print configuration (for debugging)
    pub fn print(&self) {
        strand_core::kprintln!("strand configuration:");
        strand_core::kprintln!("  stack_size:             {}", self.stack_size);
        strand_core::kprintln!("  stack_cache:            {}", self.stack_cache);
        strand_core::kprintln!("  credits_per_iteration:  {}", self.credits_per_iteration);
        strand_core::kprintln!("  io_mode:                {}", self.io_mode);
        strand_core::kprintln!("  max_events:             {}", self.max_events);
        strand_core::kprintln!("  timer_slack:            {:?}", self.timer_slack);
    }
}

/// Configuration error
#[derive(Debug, Clone)]
pub enum ConfigError {
    InvalidValue(&'static str),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidValue(msg) => write!(f, "Invalid config: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}
