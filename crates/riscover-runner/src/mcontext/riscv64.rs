//! `struct sigcontext` layout for riscv64 Linux
//! (`arch/riscv/include/uapi/asm/sigcontext.h`): a `user_regs_struct` (pc
//! plus the 31 general registers) followed by the FP extension union. The
//! kernel does **not** save vector state here — the Signal Broker performs
//! an explicit vector save instead (see `signal::capture_vector_state`).

use riscover_regs::Regs;

#[repr(C)]
pub struct UserRegsStruct {
    pub pc: u64,
    /// ra, sp, gp, tp, t0-2, s0-1, a0-7, s2-11, t3-6 — 31 entries, matching
    /// `riscover_regs::riscv64::GpRegs`'s x1..x31 layout exactly.
    pub x: [u64; 31],
}

#[repr(C)]
struct RiscvDExtState {
    f: [u64; 32],
    fcsr: u32,
}

#[repr(C)]
pub struct SigContext {
    pub sc_regs: UserRegsStruct,
    sc_fpregs: RiscvDExtState,
}

#[repr(C)]
struct StackT {
    sp: *mut libc::c_void,
    flags: i32,
    size: libc::size_t,
}

#[repr(C)]
pub struct UContext {
    pub uc_flags: u64,
    pub uc_link: *mut UContext,
    uc_stack: StackT,
    pub uc_sigmask: libc::sigset_t,
    pub uc_mcontext: SigContext,
}

/// # Safety
/// `ucontext` must be the pointer the kernel passed to a `SA_SIGINFO`
/// handler, unmodified.
pub unsafe fn capture(ucontext: *const libc::c_void, out: &mut Regs) -> u64 {
    let uc = &*(ucontext as *const UContext);
    out.gp.x.copy_from_slice(&uc.uc_mcontext.sc_regs.x);
    out.fp.f = uc.uc_mcontext.sc_fpregs.f;
    out.fcsr = uc.uc_mcontext.sc_fpregs.fcsr as u64;
    uc.uc_mcontext.sc_regs.pc
}
