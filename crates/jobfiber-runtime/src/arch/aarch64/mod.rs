//! aarch64 context switching (AAPCS64)
//!
//! Saves x19-x28, the frame pointer, the link register, sp and the low
//! halves of v8-v15 (d8-d15), which is the full callee-saved set.

use std::arch::naked_asm;

use super::ContextEntry;

/// Callee-saved register file
///
/// Field offsets are hard-coded in `switch_context`.
#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
pub struct SavedRegs {
    pub x: [u64; 10], // 0x00: x19..x28
    pub fp: u64,      // 0x50: x29
    pub lr: u64,      // 0x58: x30
    pub sp: u64,      // 0x60
    pub d: [u64; 8],  // 0x68: d8..d15
}

impl SavedRegs {
    pub const ZERO: Self = Self { x: [0; 10], fp: 0, lr: 0, sp: 0, d: [0; 8] };
}

/// Prepare `regs` so that switching to it calls `entry(arg)` on the given stack
///
/// # Safety
///
/// `stack_top` must be the high end of a writable region large enough for
/// `entry` and everything it calls.
#[inline]
pub unsafe fn init_context(regs: &mut SavedRegs, stack_top: *mut u8, entry: ContextEntry, arg: usize) {
    *regs = SavedRegs::ZERO;
    regs.sp = ((stack_top as usize) & !0xF) as u64;
    regs.lr = entry_trampoline as usize as u64;
    regs.fp = 0;
    regs.x[0] = entry as usize as u64; // x19
    regs.x[1] = arg as u64; // x20
}

/// First code run on a fresh context
#[unsafe(naked)]
unsafe extern "C" fn entry_trampoline() {
    naked_asm!(
        "mov x0, x20",
        "blr x19",
        // entry never returns
        "brk #1",
    );
}

/// Save callee-saved registers into `old` and resume the context in `new`
///
/// # Safety
///
/// `new` must hold a context produced by `init_context` or a previous
/// `switch_context`, whose stack is still alive.
#[unsafe(naked)]
pub unsafe extern "C" fn switch_context(_old: *mut SavedRegs, _new: *const SavedRegs) {
    naked_asm!(
        // Save into old (x0)
        "stp x19, x20, [x0, #0x00]",
        "stp x21, x22, [x0, #0x10]",
        "stp x23, x24, [x0, #0x20]",
        "stp x25, x26, [x0, #0x30]",
        "stp x27, x28, [x0, #0x40]",
        "stp x29, x30, [x0, #0x50]",
        "mov x9, sp",
        "str x9, [x0, #0x60]",
        "stp d8, d9, [x0, #0x68]",
        "stp d10, d11, [x0, #0x78]",
        "stp d12, d13, [x0, #0x88]",
        "stp d14, d15, [x0, #0x98]",
        // Load from new (x1)
        "ldp x19, x20, [x1, #0x00]",
        "ldp x21, x22, [x1, #0x10]",
        "ldp x23, x24, [x1, #0x20]",
        "ldp x25, x26, [x1, #0x30]",
        "ldp x27, x28, [x1, #0x40]",
        "ldp x29, x30, [x1, #0x50]",
        "ldr x9, [x1, #0x60]",
        "mov sp, x9",
        "ldp d8, d9, [x1, #0x68]",
        "ldp d10, d11, [x1, #0x78]",
        "ldp d12, d13, [x1, #0x88]",
        "ldp d14, d15, [x1, #0x98]",
        // Jumps to the saved lr, or to the trampoline for a fresh context
        "ret",
    );
}

const _: () = assert!(core::mem::size_of::<SavedRegs>() == 0xA8);
