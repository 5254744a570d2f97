//! x86_64 context switching (System V AMD64)
//!
//! Only callee-saved registers are stored; the switch is an ordinary
//! function call from the compiler's point of view, so everything else is
//! already spilled by the caller.

use std::arch::naked_asm;

use super::ContextEntry;

/// Callee-saved register file
///
/// Field offsets are hard-coded in `switch_context`.
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

impl SavedRegs {
    pub const ZERO: Self = Self { rsp: 0, rip: 0, rbx: 0, rbp: 0, r12: 0, r13: 0, r14: 0, r15: 0 };
}

/// Prepare `regs` so that switching to it calls `entry(arg)` on the given stack
///
/// # Safety
///
/// `stack_top` must be the high end of a writable region large enough for
/// `entry` and everything it calls.
#[inline]
pub unsafe fn init_context(regs: &mut SavedRegs, stack_top: *mut u8, entry: ContextEntry, arg: usize) {
    // rsp is 16-byte aligned before the trampoline's `call`, so the callee
    // sees the usual rsp + 8 alignment on entry.
    let sp = (stack_top as usize) & !0xF;

    *regs = SavedRegs {
        rsp: sp as u64,
        rip: entry_trampoline as usize as u64,
        rbp: 0,
        r12: entry as usize as u64,
        r13: arg as u64,
        ..SavedRegs::default()
    };
}

/// First code run on a fresh context
#[unsafe(naked)]
unsafe extern "C" fn entry_trampoline() {
    naked_asm!(
        "mov rdi, r13",
        "call r12",
        // entry never returns
        "ud2",
    );
}

/// Save callee-saved registers into `old` and resume the context in `new`
///
/// Returns when some other context switches back into `old`.
///
/// # Safety
///
/// `new` must hold a context produced by `init_context` or a previous
/// `switch_context`, whose stack is still alive.
#[unsafe(naked)]
pub unsafe extern "C" fn switch_context(_old: *mut SavedRegs, _new: *const SavedRegs) {
    naked_asm!(
        // Save into old (rdi)
        "mov [rdi + 0x00], rsp",
        "lea rax, [rip + 1f]",
        "mov [rdi + 0x08], rax",
        "mov [rdi + 0x10], rbx",
        "mov [rdi + 0x18], rbp",
        "mov [rdi + 0x20], r12",
        "mov [rdi + 0x28], r13",
        "mov [rdi + 0x30], r14",
        "mov [rdi + 0x38], r15",
        // Load from new (rsi)
        "mov rsp, [rsi + 0x00]",
        "mov rax, [rsi + 0x08]",
        "mov rbx, [rsi + 0x10]",
        "mov rbp, [rsi + 0x18]",
        "mov r12, [rsi + 0x20]",
        "mov r13, [rsi + 0x28]",
        "mov r14, [rsi + 0x30]",
        "mov r15, [rsi + 0x38]",
        "jmp rax",
        // Resumed contexts land here with their own return address on top
        "1:",
        "ret",
    );
}

const _: () = assert!(core::mem::size_of::<SavedRegs>() == 0x40);
