//! x86_64 context switching implementation
//!
//! Naked functions (stable since Rust 1.88) save and restore the System V
//! callee-saved registers.

use std::arch::naked_asm;

use super::{task_returned, EntryFn};

/// Callee-saved state of a suspended task
///
/// Field offsets are fixed; `context_switch` addresses them directly.
#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
pub struct SavedRegs {
    pub rsp: u64, // 0x00
    pub rip: u64, // 0x08
    pub rbx: u64, // 0x10
    pub rbp: u64, // 0x18
    pub r12: u64, // 0x20
    pub r13: u64, // 0x28
    pub r14: u64, // 0x30
    pub r15: u64, // 0x38
}

/// Initialize a new task's context
///
/// The first switch to `regs` jumps into the trampoline, which calls
/// `entry(arg)` on the new stack.
///
/// # Safety
///
/// `stack_top` must be the upper end of a writable stack that outlives
/// every switch to `regs`.
#[inline]
pub unsafe fn init_context(regs: &mut SavedRegs, stack_top: *mut u8, entry: EntryFn, arg: usize) {
    // The trampoline is entered by `jmp`, so rsp must already be 16-byte
    // aligned for its `call` to leave the callee at the ABI alignment.
    let sp = (stack_top as usize) & !0xF;

    *regs = SavedRegs {
        rsp: sp as u64,
        rip: task_entry_trampoline as usize as u64,
        r12: entry as usize as u64,
        r13: arg as u64,
        ..SavedRegs::default()
    };
}

/// Trampoline that calls the entry function with its argument
#[unsafe(naked)]
unsafe extern "C" fn task_entry_trampoline() {
    naked_asm!(
        "mov rdi, r13",
        "call r12",
        "call {returned}",
        "ud2",
        returned = sym task_returned,
    );
}

/// Switch from one task to another
///
/// Saves callee-saved registers to `old` and loads them from `new`.
/// Returns when some other task switches back to `old`.
///
/// # Safety
///
/// Both pointers must be valid `SavedRegs`; `new` must hold a context that
/// was saved by this function or prepared by `init_context`.
#[unsafe(naked)]
pub unsafe extern "C" fn context_switch(_old: *mut SavedRegs, _new: *const SavedRegs) {
    naked_asm!(
        // Save callee-saved registers to old (RDI)
        "mov [rdi + 0x00], rsp",
        "lea rax, [rip + 1f]",
        "mov [rdi + 0x08], rax",
        "mov [rdi + 0x10], rbx",
        "mov [rdi + 0x18], rbp",
        "mov [rdi + 0x20], r12",
        "mov [rdi + 0x28], r13",
        "mov [rdi + 0x30], r14",
        "mov [rdi + 0x38], r15",
        // Load callee-saved registers from new (RSI)
        "mov rsp, [rsi + 0x00]",
        "mov rax, [rsi + 0x08]",
        "mov rbx, [rsi + 0x10]",
        "mov rbp, [rsi + 0x18]",
        "mov r12, [rsi + 0x20]",
        "mov r13, [rsi + 0x28]",
        "mov r14, [rsi + 0x30]",
        "mov r15, [rsi + 0x38]",
        "jmp rax",
        // Resumption point of a saved context
        "1:",
        "ret",
    );
}
