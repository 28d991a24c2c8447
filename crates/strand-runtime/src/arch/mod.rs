//! Architecture-specific context switching
//!
//! Each backend provides the same three items:
//!
//! - `SavedRegs` - callee-saved registers of a suspended task
//! - `init_context` - prepare a fresh stack so the first switch lands in
//!   an entry function
//! - `context_switch` - save the current registers and load another set

cfg_if::cfg_if! {
    if #[cfg(target_arch = "x86_64")] {
        pub mod x86_64;
        pub use self::x86_64::{context_switch, init_context, SavedRegs};
    } else if #[cfg(target_arch = "aarch64")] {
        pub mod aarch64;
        pub use self::aarch64::{context_switch, init_context, SavedRegs};
    } else {
        compile_error!("strand supports x86_64 and aarch64 only");
    }
}

/// Entry point signature used by `init_context`
pub type EntryFn = extern "C" fn(usize);

/// Reached only if a task entry function returns instead of switching away
extern "C" fn task_returned() -> ! {
    strand_core::kerror!("task entry returned without switching away");
    std::process::abort()
}
