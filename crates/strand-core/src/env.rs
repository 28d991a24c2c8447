//! Environment variable utilities
//!
//! Typed lookups with defaults, used by the runtime configuration. A value
//! that is set but does not parse falls back to the default and is reported
//! at warn level rather than silently ignored.
//!
//! ```ignore
//! use strand_core::env::{env_get, env_get_bool};
//!
//! let credits: i32 = env_get("STRAND_CREDITS_PER_ITERATION", 32);
//! let flush = env_get_bool("STRAND_FLUSH_EPRINT", false);
//! ```

use std::str::FromStr;
use std::time::Duration;

/// Get environment variable parsed as type T, or return default
#[inline]
pub fn env_get<T>(key: &str, default: T) -> T
where
    T: FromStr,
{
    match std::env::var(key) {
        Ok(v) => match v.trim().parse() {
            Ok(parsed) => parsed,
            Err(_) => {
                crate::kwarn!("ignoring {}={:?}: not a valid value", key, v);
                default
            }
        },
        Err(_) => default,
    }
}

/// Get environment variable as boolean
///
/// "1", "true", "yes", "on" are true and "0", "false", "no", "off" are
/// false (case-insensitive). Unset or anything else returns the default.
#[inline]
pub fn env_get_bool(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(val) => match val.trim().to_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => true,
            "0" | "false" | "no" | "off" => false,
            _ => {
                crate::kwarn!("ignoring {}={:?}: expected a boolean", key, val);
                default
            }
        },
        Err(_) => default,
    }
}

/// `Some(T)` if the variable is set and parses, `None` otherwise
#[inline]
pub fn env_get_opt<T>(key: &str) -> Option<T>
where
    T: FromStr,
{
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

/// Get environment variable as string, or return default
#[inline]
pub fn env_get_str(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Duration given in microseconds
#[inline]
pub fn env_get_duration_us(key: &str, default: Duration) -> Duration {
    let micros: u64 = env_get(key, default.as_micros() as u64);
    Duration::from_micros(micros)
}

/// Check if environment variable is set (regardless of value)
#[inline]
pub fn env_is_set(key: &str) -> bool {
    std::env::var(key).is_ok()
}
