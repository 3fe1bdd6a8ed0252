//! The Signal Broker (C4): installs handlers on an alternate stack,
//! arms/disarms a per-run CPU-time timer, and turns a delivered trap into a
//! `TrapInfo` the Execution Engine folds into a `Result`.
//!
//! Continuation strategy: the reference client's handler resumes execution
//! by restoring a saved callee-save/stack snapshot and executing a bare
//! `ret` (`RESTORE_STATE __regs_restore; ret`, see `runner.c`). This
//! workspace reproduces the same effect — abandon the interrupted
//! trampoline and resume at the engine's call site — with `sigsetjmp` /
//! `siglongjmp` instead of hand-written restore assembly: it is the
//! portable, well-established way C (and FFI'd Rust) code unwinds out of a
//! signal handler to a fixed point, and it means the Engine never needs to
//! hand-maintain its own snapshot of its own stack frame. The one caveat
//! noted at the call site (`ExecutionEngine::run_guarded`) is that
//! `siglongjmp` does not run Rust destructors, so nothing `Drop` may live
//! on the stack between the `sigsetjmp` call and the trampoline entry.

use std::os::raw::{c_int, c_void};

use crate::context::{BrokerState, ExecutionContext, HandlerContext, JmpBuf};
use crate::mcontext;

/// Trap cause captured from `siginfo_t`/`mcontext_t`, ready to become a
/// `Result`'s `signum`/`si_code`/`si_addr`/`si_pc`/`instr_idx` fields
/// (spec.md §3).
#[derive(Clone, Copy, Debug)]
pub struct TrapInfo {
    pub signum: i32,
    pub si_code: i32,
    pub si_addr: u64,
    pub si_pc: u64,
    pub instr_idx: u32,
}

const HANDLED_SIGNALS: [c_int; 7] = [
    libc::SIGILL,
    libc::SIGSEGV,
    libc::SIGBUS,
    libc::SIGTRAP,
    libc::SIGFPE,
    libc::SIGSYS,
    libc::SIGALRM,
];

const ALT_STACK_SIZE: usize = 64 * 1024;

extern "C" {
    fn sigsetjmp(env: *mut c_void, savesigs: c_int) -> c_int;
    fn siglongjmp(env: *mut c_void, val: c_int) -> !;
}

pub struct SignalBroker {
    timer: libc::timer_t,
    _alt_stack: Box<[u8; ALT_STACK_SIZE]>,
}

/// Outcome of one guarded trampoline entry.
pub enum RunOutcome {
    Clean,
    Trapped(TrapInfo),
}

impl SignalBroker {
    /// Installs handlers for spec.md §4.4's seven signals on a fixed
    /// alternate stack, and creates (but does not arm) the per-run CPU-time
    /// timer. Must be called exactly once, before the Batch Loop starts.
    pub fn install() -> std::io::Result<Self> {
        // SAFETY: reading tp has no preconditions; this runs once, before
        // any run has had a chance to load a fuzzed value into it.
        #[cfg(target_arch = "riscv64")]
        unsafe {
            let tp: u64;
            core::arch::asm!("mv {0}, tp", out(reg) tp);
            crate::context::RISCOVER_REAL_TP = tp;
        }

        let mut alt_stack = Box::new([0u8; ALT_STACK_SIZE]);

        // SAFETY: alt_stack is heap-allocated, ALT_STACK_SIZE bytes, and
        // kept alive for the lifetime of this SignalBroker (leaked into
        // `_alt_stack`, which this struct owns for the rest of the process).
        let stack_t = libc::stack_t {
            ss_sp: alt_stack.as_mut_ptr() as *mut c_void,
            ss_flags: 0,
            ss_size: ALT_STACK_SIZE,
        };
        if unsafe { libc::sigaltstack(&stack_t, std::ptr::null_mut()) } != 0 {
            return Err(std::io::Error::last_os_error());
        }

        let mut sa: libc::sigaction = unsafe { std::mem::zeroed() };
        sa.sa_sigaction = broker_handler as usize;
        sa.sa_flags = libc::SA_SIGINFO | libc::SA_ONSTACK;
        unsafe { libc::sigemptyset(&mut sa.sa_mask) };
        for s in HANDLED_SIGNALS.iter().filter(|&&s| s != libc::SIGALRM) {
            unsafe { libc::sigaddset(&mut sa.sa_mask, *s) };
        }

        for &signum in &HANDLED_SIGNALS {
            if unsafe { libc::sigaction(signum, &sa, std::ptr::null_mut()) } != 0 {
                return Err(std::io::Error::last_os_error());
            }
        }

        let mut timer: libc::timer_t = std::ptr::null_mut();
        // SAFETY: a null `sigevent` makes the kernel deliver SIGALRM to this
        // thread by default, which is what the broker's sigaction above
        // handles.
        if unsafe { libc::timer_create(libc::CLOCK_PROCESS_CPUTIME_ID, std::ptr::null_mut(), &mut timer) } != 0 {
            return Err(std::io::Error::last_os_error());
        }

        Ok(SignalBroker {
            timer,
            _alt_stack: alt_stack,
        })
    }

    /// Runs `enter` under the broker's protection: arms the timeout,
    /// transitions `Idle -> Arming -> Running`, and returns `Clean` if
    /// `enter` returns normally or `Trapped` if a signal redirected control
    /// flow out of it via `siglongjmp`.
    ///
    /// # Safety
    /// `enter` must not rely on Rust `Drop` running on unwind — a trap
    /// bypasses normal stack unwinding entirely.
    pub unsafe fn run_guarded(&self, timeout: std::time::Duration, enter: impl FnOnce()) -> RunOutcome {
        let ctx = ExecutionContext::get();
        ctx.set_state(BrokerState::Arming);
        self.arm(timeout);

        let buf = ctx.recovery_ptr();
        ctx.set_state(BrokerState::Running);
        if sigsetjmp(buf as *mut c_void, 1) == 0 {
            enter();
            ctx.set_state(BrokerState::CleanlyReturned);
            self.disarm();
            RunOutcome::Clean
        } else {
            ctx.set_state(BrokerState::TrapCaptured);
            let trap = ctx.take_trap().expect("handler must record a TrapInfo before jumping back");
            if trap.signum != libc::SIGALRM {
                // Already disarmed by the handler; nothing to do. For a
                // timeout (SIGALRM) the timer has already fired and is
                // naturally disarmed (one-shot).
            }
            RunOutcome::Trapped(trap)
        }
    }

    fn arm(&self, timeout: std::time::Duration) {
        let its = libc::itimerspec {
            it_interval: libc::timespec { tv_sec: 0, tv_nsec: 0 },
            it_value: libc::timespec {
                tv_sec: timeout.as_secs() as libc::time_t,
                tv_nsec: timeout.subsec_nanos() as libc::c_long,
            },
        };
        unsafe { libc::timer_settime(self.timer, 0, &its, std::ptr::null_mut()) };
    }

    fn disarm(&self) {
        let its: libc::itimerspec = unsafe { std::mem::zeroed() };
        unsafe { libc::timer_settime(self.timer, 0, &its, std::ptr::null_mut()) };
    }
}

impl Drop for SignalBroker {
    fn drop(&mut self) {
        unsafe { libc::timer_delete(self.timer) };
    }
}

/// The actual signal handler, installed once by `SignalBroker::install`.
/// Mirrors `sig_handler` in the reference client's `runner.c`, replacing
/// its inline-asm continuation with `siglongjmp` (see the module doc).
extern "C" fn broker_handler(signum: c_int, info: *mut libc::siginfo_t, ucontext: *mut c_void) {
    // Restore the real thread pointer before anything else runs. A trap
    // inside a fuzzed sequence that loaded an attacker-controlled value
    // into `tp` would otherwise leave every subsequent libc/Rust TLS access
    // in this handler — allocation, `ExecutionContext::get()`, `eprintln!`
    // — running against the wrong thread-local base.
    #[cfg(target_arch = "riscv64")]
    unsafe {
        let real_tp = crate::context::RISCOVER_REAL_TP;
        core::arch::asm!("mv tp, {0}", in(reg) real_tp);
    }

    let ctx = ExecutionContext::get();
    // SAFETY: this function only runs as a signal handler, i.e. exactly the
    // precondition HandlerContext::new requires.
    let hc = unsafe { HandlerContext::new(ctx) };

    let depth = ctx.enter_signal();
    if ctx.state() != BrokerState::Running || depth > 1 {
        fatal_reentrant_signal(signum, info, depth);
    }

    // SAFETY: info is the pointer the kernel passed to this SA_SIGINFO
    // handler, unmodified.
    let si_addr = unsafe { (*info).si_addr() as u64 };
    let si_code = unsafe { (*info).si_code };

    // Discard a racing SIGALRM the same way the reference handler does:
    // temporarily ignore it, then restore the catch-all so a genuine later
    // timeout still gets delivered.
    if signum != libc::SIGALRM {
        let mut ignore: libc::sigaction = unsafe { std::mem::zeroed() };
        ignore.sa_sigaction = libc::SIG_IGN;
        unsafe {
            libc::sigaction(libc::SIGALRM, &ignore, std::ptr::null_mut());
            let mut sa: libc::sigaction = std::mem::zeroed();
            sa.sa_sigaction = broker_handler as usize;
            sa.sa_flags = libc::SA_SIGINFO | libc::SA_ONSTACK;
            libc::sigemptyset(&mut sa.sa_mask);
            libc::sigaction(libc::SIGALRM, &sa, std::ptr::null_mut());
        }
    }

    // SAFETY: handler holds exclusive access to regs_result while the
    // context is Running (the invariant run_guarded establishes).
    let regs_result = unsafe { &mut *ctx.regs_result_ptr() };
    let pc = unsafe { mcontext::capture(ucontext, regs_result) };

    #[cfg(all(target_arch = "riscv64", feature = "vector"))]
    unsafe {
        crate::asm::riscv64::capture_vector_state(&mut regs_result.vec);
    }

    let (runner_base, runner_size) = ctx.runner_range();
    let instr_idx = if pc as usize >= runner_base && (pc as usize) < runner_base + runner_size {
        ((pc as usize - runner_base) / 4 + 1) as u32
    } else {
        0
    };

    ctx.set_trap(TrapInfo {
        signum,
        si_code,
        si_addr,
        si_pc: pc,
        instr_idx,
    });

    unsafe {
        let mut mask: libc::sigset_t = std::mem::zeroed();
        libc::sigemptyset(&mut mask);
        for &s in &HANDLED_SIGNALS {
            libc::sigaddset(&mut mask, s);
        }
        libc::sigprocmask(libc::SIG_UNBLOCK, &mask, std::ptr::null_mut());
    }

    ctx.leave_signal();

    // SAFETY: buf was populated by the matching sigsetjmp in run_guarded,
    // which is still on the stack below this handler frame.
    unsafe {
        let buf: *mut JmpBuf = ctx.recovery_ptr();
        siglongjmp(buf as *mut c_void, 1);
    }
}

/// An out-of-band signal — delivered while not `Running`, or re-entrant
/// (depth > 1) — always means an instruction corrupted the handler or
/// scratch state. There is no safe recovery; dump what we can and abort.
fn fatal_reentrant_signal(signum: c_int, info: *const libc::siginfo_t, depth: u8) -> ! {
    let si_addr = unsafe { (*info).si_addr() as u64 };
    eprintln!(
        "riscover: fatal re-entrant or out-of-band signal {signum} (si_addr={si_addr:#x}, depth={depth})"
    );
    if let Ok(maps) = std::fs::read_to_string("/proc/self/maps") {
        eprintln!("{maps}");
    }
    std::process::abort();
}
