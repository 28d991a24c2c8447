//! aarch64 context switching implementation
//!
//! AAPCS64 callee-saved state: sp, lr, x19-x29 and the low halves of
//! v8-v15 (d8-d15).

use std::arch::naked_asm;

use super::{task_returned, EntryFn};

/// Callee-saved state of a suspended task
#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
pub struct SavedRegs {
    pub sp: u64,            // 0x00
    pub lr: u64,            // 0x08
    pub x19_x28: [u64; 10], // 0x10
    pub fp: u64,            // 0x60
    pub d8_d15: [u64; 8],   // 0x68
}

/// Initialize a new task's context
///
/// # Safety
///
/// `stack_top` must be the upper end of a writable stack that outlives
/// every switch to `regs`.
#[inline]
pub unsafe fn init_context(regs: &mut SavedRegs, stack_top: *mut u8, entry: EntryFn, arg: usize) {
    let sp = (stack_top as usize) & !0xF;

    *regs = SavedRegs::default();
    regs.sp = sp as u64;
    regs.lr = task_entry_trampoline as usize as u64;
    regs.x19_x28[0] = entry as usize as u64; // x19
    regs.x19_x28[1] = arg as u64; // x20
}

#[unsafe(naked)]
unsafe extern "C" fn task_entry_trampoline() {
    naked_asm!(
        "mov x0, x20",
        "blr x19",
        "bl {returned}",
        "brk #0",
        returned = sym task_returned,
    );
}

/// Switch from one task to another
///
/// # Safety
///
/// Both pointers must be valid `SavedRegs`; `new` must hold a context that
/// was saved by this function or prepared by `init_context`.
#[unsafe(naked)]
pub unsafe extern "C" fn context_switch(_old: *mut SavedRegs, _new: *const SavedRegs) {
    naked_asm!(
        // Save to old (x0)
        "mov x9, sp",
        "str x9, [x0, #0x00]",
        "str x30, [x0, #0x08]",
        "stp x19, x20, [x0, #0x10]",
        "stp x21, x22, [x0, #0x20]",
        "stp x23, x24, [x0, #0x30]",
        "stp x25, x26, [x0, #0x40]",
        "stp x27, x28, [x0, #0x50]",
        "str x29, [x0, #0x60]",
        "stp d8, d9, [x0, #0x68]",
        "stp d10, d11, [x0, #0x78]",
        "stp d12, d13, [x0, #0x88]",
        "stp d14, d15, [x0, #0x98]",
        // Load from new (x1)
        "ldr x9, [x1, #0x00]",
        "mov sp, x9",
        "ldr x30, [x1, #0x08]",
        "ldp x19, x20, [x1, #0x10]",
        "ldp x21, x22, [x1, #0x20]",
        "ldp x23, x24, [x1, #0x30]",
        "ldp x25, x26, [x1, #0x40]",
        "ldp x27, x28, [x1, #0x50]",
        "ldr x29, [x1, #0x60]",
        "ldp d8, d9, [x1, #0x68]",
        "ldp d10, d11, [x1, #0x78]",
        "ldp d12, d13, [x1, #0x88]",
        "ldp d14, d15, [x1, #0x98]",
        "ret",
    );
}
