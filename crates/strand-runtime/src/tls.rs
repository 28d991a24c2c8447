//! Thread-local scheduler ownership
//!
//! Schedulers are passed around explicitly; the only per-thread state is a
//! flag recording that this OS thread's stack already belongs to one.

use std::cell::Cell;

use strand_core::error::{SchedError, SchedResult};

thread_local! {
    /// Whether a scheduler is alive on this OS thread
    static SCHEDULER_ACTIVE: Cell<bool> = const { Cell::new(false) };
}

/// Proof that this thread's scheduler slot is taken; released on drop
#[derive(Debug)]
pub struct ThreadClaim {
    _not_send: std::marker::PhantomData<*const ()>,
}

/// Claim the current thread for a new scheduler
pub fn claim_thread() -> SchedResult<ThreadClaim> {
    SCHEDULER_ACTIVE.with(|cell| {
        if cell.replace(true) {
            Err(SchedError::AlreadyInitialized)
        } else {
            Ok(ThreadClaim {
                _not_send: std::marker::PhantomData,
            })
        }
    })
}

/// Check if a scheduler owns this thread
#[inline]
pub fn is_claimed() -> bool {
    SCHEDULER_ACTIVE.with(|cell| cell.get())
}

impl Drop for ThreadClaim {
    fn drop(&mut self) {
        SCHEDULER_ACTIVE.with(|cell| cell.set(false));
    }
}
