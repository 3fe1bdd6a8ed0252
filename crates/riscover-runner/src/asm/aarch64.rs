//! ARM64 trampoline: the hand-written bridge between the Execution Engine's
//! call site and the fuzzed instruction sequence loaded onto the runner
//! page.
//!
//! Every one of `x0..x30` is committed to carrying a fuzzed "before" value
//! into the sequence and an "after" value back out, which leaves no spare
//! general-purpose register free to pass `RISCOVER_REGS_BEFORE`,
//! `RISCOVER_REGS_RESULT` or the runner page address as a normal argument.
//! The trampoline instead reaches the two statics by their fixed link
//! symbols (`adrp`/`add :lo12:`) and reconstructs `RUNNER_PAGE_ADDR` as an
//! immediate (`movz`, since its low 32 bits are zero), using `x29` as its
//! only scratch register — the same register `riscover_regs::aarch64`
//! already excludes from the reported diff, so clobbering it here carries
//! no information loss.
//!
//! `x30` (`lr`) is loaded from the snapshot like any other GP register and
//! captured back the same way. `blr` would overwrite it unconditionally the
//! instant it branches, so entry uses a plain `br` instead — the same
//! reason the RISC-V trampoline dedicates `t6` rather than `ra` as its own
//! link register. `br` carries no link of its own, so the return path back
//! into this trampoline is planted in the runner page's trailer
//! (`page::RunnerPage`) as a `movz`/`movk` chain that rebuilds
//! `riscover_trampoline_resume`'s address into `x29` before branching back
//! — `x29` is free for this because it is never loaded with a "before"
//! value in the first place.
//!
//! PSTATE is only partially observable from EL0. On a clean return (no
//! signal delivered) the only readable piece is the NZCV condition-flag
//! block (`mrs x0, nzcv` places it directly in bits 28:31, matching
//! `PSTATE_MASK`'s layout); the mode/exception-level bits the mask also
//! whitelists never change for a process that only ever executes at EL0,
//! so leaving them zero here is a no-op against the masked diff.

use riscover_regs::aarch64::Regs;

core::arch::global_asm!(
    r#"
    .text
    .align 4
    .global riscover_trampoline_start
    .global riscover_trampoline_enter
    .global riscover_trampoline_resume
    .global riscover_trampoline_end

riscover_trampoline_start:
riscover_trampoline_enter:
    stp x19, x20, [sp, #-96]!
    stp x21, x22, [sp, #16]
    stp x23, x24, [sp, #32]
    stp x25, x26, [sp, #48]
    stp x27, x28, [sp, #64]
    stp x29, x30, [sp, #80]

    adrp x29, {before}
    add  x29, x29, :lo12:{before}

    ldr  x0, [x29, #248]
    mov  sp, x0

    ldp x0, x1,   [x29, #0]
    ldp x2, x3,   [x29, #16]
    ldp x4, x5,   [x29, #32]
    ldp x6, x7,   [x29, #48]
    ldp x8, x9,   [x29, #64]
    ldp x10, x11, [x29, #80]
    ldp x12, x13, [x29, #96]
    ldp x14, x15, [x29, #112]
    ldp x16, x17, [x29, #128]
    ldp x18, x19, [x29, #144]
    ldp x20, x21, [x29, #160]
    ldp x22, x23, [x29, #176]
    ldp x24, x25, [x29, #192]
    ldp x26, x27, [x29, #208]
    ldr x28,      [x29, #224]
    ldr x30,      [x29, #240]

    movz x29, #0x5555, lsl #32
    br   x29

riscover_trampoline_resume:
    adrp x29, {result}
    add  x29, x29, :lo12:{result}

    stp x0, x1,   [x29, #0]
    stp x2, x3,   [x29, #16]
    stp x4, x5,   [x29, #32]
    stp x6, x7,   [x29, #48]
    stp x8, x9,   [x29, #64]
    stp x10, x11, [x29, #80]
    stp x12, x13, [x29, #96]
    stp x14, x15, [x29, #112]
    stp x16, x17, [x29, #128]
    stp x18, x19, [x29, #144]
    stp x20, x21, [x29, #160]
    stp x22, x23, [x29, #176]
    stp x24, x25, [x29, #192]
    stp x26, x27, [x29, #208]
    str x28,      [x29, #224]
    str x30,      [x29, #240]

    mov x0, sp
    str x0, [x29, #248]

    mrs x0, nzcv
    str x0, [x29, #256]
    mrs x0, fpsr
    str x0, [x29, #264]

    stp q0, q1,   [x29, #272]
    stp q2, q3,   [x29, #304]
    stp q4, q5,   [x29, #336]
    stp q6, q7,   [x29, #368]
    stp q8, q9,   [x29, #400]
    stp q10, q11, [x29, #432]
    stp q12, q13, [x29, #464]
    stp q14, q15, [x29, #496]
    stp q16, q17, [x29, #528]
    stp q18, q19, [x29, #560]
    stp q20, q21, [x29, #592]
    stp q22, q23, [x29, #624]
    stp q24, q25, [x29, #656]
    stp q26, q27, [x29, #688]
    stp q28, q29, [x29, #720]
    stp q30, q31, [x29, #752]

    ldp x29, x30, [sp, #80]
    ldp x27, x28, [sp, #64]
    ldp x25, x26, [sp, #48]
    ldp x23, x24, [sp, #32]
    ldp x21, x22, [sp, #16]
    ldp x19, x20, [sp], #96
    ret
riscover_trampoline_end:
    "#,
    before = sym crate::context::RISCOVER_REGS_BEFORE,
    result = sym crate::context::RISCOVER_REGS_RESULT,
);

extern "C" {
    fn riscover_trampoline_enter();
    static riscover_trampoline_start: u8;
    static riscover_trampoline_resume: u8;
    static riscover_trampoline_end: u8;
}

/// Address the runner page's planted return sequence must branch back to.
/// Read once at `RunnerPage::init` and baked into the trailer as a
/// `movz`/`movk` chain — see `page::RunnerPage::init`.
pub fn resume_addr() -> usize {
    unsafe { &riscover_trampoline_resume as *const u8 as usize }
}

/// `[start, end)` of the trampoline's own code, so the Signal Broker can
/// tell a fault inside the bridge apart from one inside the fuzzed
/// sequence or anywhere else.
pub fn code_range() -> (usize, usize) {
    unsafe {
        (
            &riscover_trampoline_start as *const u8 as usize,
            &riscover_trampoline_end as *const u8 as usize,
        )
    }
}

/// Enters the runner page once: loads `RISCOVER_REGS_BEFORE` into live
/// registers, branches to the runner page, and on a clean return captures
/// every register back into `RISCOVER_REGS_RESULT`.
///
/// # Safety
/// Must only be called from inside `SignalBroker::run_guarded`, with the
/// runner page already loaded and the trampoline's own callee-saved
/// bookkeeping (this function's AAPCS frame) the only thing on the Rust
/// stack below it — a trap abandons this frame via `siglongjmp` without
/// running its epilogue.
pub unsafe fn enter() {
    riscover_trampoline_enter();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn regs_before_offsets_match_trampoline_immediates() {
        assert_eq!(std::mem::offset_of!(Regs, pstate), 256);
        assert_eq!(std::mem::offset_of!(Regs, fpsr), 264);
        assert_eq!(std::mem::offset_of!(Regs, vec), 272);
    }

    #[test]
    fn gp_count_leaves_x30_at_the_last_before_slot() {
        // x30's "before" load (`ldr x30, [x29, #240]`) and "after" store
        // (`str x30, [x29, #240]`) both use the slot right before sp's.
        assert_eq!(riscover_regs::aarch64::GP_COUNT * 8, 248);
        assert_eq!((riscover_regs::aarch64::GP_COUNT - 1) * 8, 240);
    }

    #[test]
    fn code_range_is_non_empty() {
        let (start, end) = code_range();
        assert!(end > start);
    }
}
