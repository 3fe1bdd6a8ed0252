//! `struct sigcontext` / `ucontext_t` layout for arm64 Linux
//! (`arch/arm64/include/uapi/asm/sigcontext.h`), plus the FP/SIMD extension
//! record (`fpsimd_context`) that rides in `sigcontext.__reserved`.

use riscover_regs::Regs;

const FPSIMD_MAGIC: u32 = 0x4650_5001;

#[repr(C)]
struct ExtensionHeader {
    magic: u32,
    size: u32,
}

#[repr(C)]
struct FpsimdContext {
    head: ExtensionHeader,
    fpsr: u32,
    fpcr: u32,
    vregs: [[u8; 16]; 32],
}

#[repr(C)]
pub struct SigContext {
    pub fault_address: u64,
    pub regs: [u64; 31],
    pub sp: u64,
    pub pc: u64,
    pub pstate: u64,
    pub reserved: [u8; 4096],
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
    uc_sigmask: libc::sigset_t,
    pub uc_mcontext: SigContext,
}

/// Copies GP registers, sp, pc and the whitelisted pstate bits, plus the
/// scalar/vector FP bank (found via the fpsimd extension record), from the
/// kernel-provided `ucontext_t` into `out`. Returns the faulting PC.
///
/// # Safety
/// `ucontext` must be the pointer the kernel passed to a `SA_SIGINFO`
/// handler, unmodified.
pub unsafe fn capture(ucontext: *const libc::c_void, out: &mut Regs) -> u64 {
    let uc = &*(ucontext as *const UContext);
    out.gp.x[..31].copy_from_slice(&uc.uc_mcontext.regs);
    out.gp.sp = uc.uc_mcontext.sp;
    out.pstate = uc.uc_mcontext.pstate & riscover_regs::aarch64::PSTATE_MASK;

    let mut offset = 0usize;
    while offset + std::mem::size_of::<ExtensionHeader>() <= uc.uc_mcontext.reserved.len() {
        let hdr = &*(uc.uc_mcontext.reserved.as_ptr().add(offset) as *const ExtensionHeader);
        if hdr.size == 0 {
            break;
        }
        if hdr.magic == FPSIMD_MAGIC {
            let fp = &*(uc.uc_mcontext.reserved.as_ptr().add(offset) as *const FpsimdContext);
            out.fpsr = fp.fpsr as u64;
            out.vec.v = fp.vregs;
            break;
        }
        offset += hdr.size as usize;
    }

    uc.uc_mcontext.pc
}
