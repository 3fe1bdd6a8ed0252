//! The process-global `ExecutionContext`: the fixed location the Execution
//! Engine and the signal handler both reach by a `'static` reference rather
//! than through the interrupted stack (spec.md §9's "global mutable state"
//! design note). Single-threaded-cooperative scheduling (spec.md §5) means
//! one process-wide instance is correct; no locking is needed because the
//! Signal Broker only writes to it while the Engine has transitioned to
//! `Running`.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::OnceLock;

use riscover_regs::Regs;

use crate::signal::TrapInfo;

/// Opaque `sigjmp_buf`. Sized generously above any glibc/musl layout seen on
/// aarch64 or riscv64 Linux (the real struct is target- and libc-specific
/// and not exposed by the `libc` crate for these targets); only ever
/// written by `sigsetjmp` and read by `siglongjmp`, never inspected.
#[repr(C, align(16))]
pub struct JmpBuf(pub [u8; 256]);

impl JmpBuf {
    pub const fn zeroed() -> Self {
        JmpBuf([0u8; 256])
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[repr(u8)]
pub enum BrokerState {
    Idle = 0,
    Arming = 1,
    Running = 2,
    CleanlyReturned = 3,
    TrapCaptured = 4,
}

impl BrokerState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => BrokerState::Idle,
            1 => BrokerState::Arming,
            2 => BrokerState::Running,
            3 => BrokerState::CleanlyReturned,
            _ => BrokerState::TrapCaptured,
        }
    }
}

/// The pre-run register snapshot, reached by the hand-written trampoline
/// (`asm::aarch64`/`asm::riscv64`) via this fixed link symbol rather than a
/// register argument — spec.md §9: "the signal handler must find these by
/// a fixed symbol independent of the interrupted stack", which applies
/// equally to the trampoline, since every general-purpose register is
/// already spoken for by the fuzzed snapshot itself and none is free to
/// carry a pointer argument across the call.
#[no_mangle]
pub static mut RISCOVER_REGS_BEFORE: Regs = Regs::zeroed();

/// The post-run register snapshot, written either by the trampoline's
/// save-state epilogue (clean return) or by the Signal Broker (trap).
#[no_mangle]
pub static mut RISCOVER_REGS_RESULT: Regs = Regs::zeroed();

/// RISC-V only: the process's real thread pointer (`tp`/x4), captured once
/// at `SignalBroker::install` before any run ever loads a fuzzed value into
/// the live `tp` register. The kernel does not restore `tp` for us on
/// signal delivery the way it restores most other GP registers, and the
/// trampoline itself loads `regs_before`'s `tp` (a fuzzer-controlled value)
/// straight into the live register before branching — both the trap path
/// (`signal::broker_handler`, as its very first action) and the clean
/// return path (the trampoline's own epilogue) reload `tp` from here before
/// any further Rust/libc code can run with a corrupted thread pointer.
#[cfg(target_arch = "riscv64")]
#[no_mangle]
pub static mut RISCOVER_REAL_TP: u64 = 0;

/// Process-global state shared between the Execution Engine (the only
/// writer outside `Running`) and the signal handler (the only writer
/// during `Running`). `UnsafeCell` fields are never aliased mutably at the
/// same time: the engine only touches them while the broker is `Idle` or
/// `Arming`/`CleanlyReturned`/`TrapCaptured`, the handler only while
/// `Running`.
pub struct ExecutionContext {
    state: AtomicU8,
    depth: AtomicU8,
    pub(crate) recovery: UnsafeCell<JmpBuf>,
    pub(crate) runner_base: UnsafeCell<usize>,
    pub(crate) runner_size: UnsafeCell<usize>,
    pub(crate) trap: UnsafeCell<Option<TrapInfo>>,
}

// SAFETY: exactly one OS thread per process ever touches this (spec.md §5:
// single-threaded cooperative scheduling, the signal handler is the only
// other writer and only during `Running`), so there is no real concurrent
// access to race on.
unsafe impl Sync for ExecutionContext {}

static CONTEXT: OnceLock<ExecutionContext> = OnceLock::new();

impl ExecutionContext {
    fn new() -> Self {
        ExecutionContext {
            state: AtomicU8::new(BrokerState::Idle as u8),
            depth: AtomicU8::new(0),
            recovery: UnsafeCell::new(JmpBuf::zeroed()),
            runner_base: UnsafeCell::new(0),
            runner_size: UnsafeCell::new(0),
            trap: UnsafeCell::new(None),
        }
    }

    /// The single process-wide instance, created on first use. Every
    /// worker process (one per pinned core, see C9) gets its own address
    /// space and therefore its own copy.
    pub fn get() -> &'static ExecutionContext {
        CONTEXT.get_or_init(ExecutionContext::new)
    }

    pub fn state(&self) -> BrokerState {
        BrokerState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub(crate) fn set_state(&self, s: BrokerState) {
        self.state.store(s as u8, Ordering::SeqCst);
    }

    pub(crate) fn enter_signal(&self) -> u8 {
        self.depth.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub(crate) fn leave_signal(&self) {
        self.depth.fetch_sub(1, Ordering::SeqCst);
    }

    /// Records the runner page's address range so the handler can derive
    /// `instr_idx` from a faulting PC without any further lookup.
    pub fn set_runner_range(&self, base: usize, size: usize) {
        unsafe {
            *self.runner_base.get() = base;
            *self.runner_size.get() = size;
        }
    }

    /// # Safety
    /// Must only be called while `state() != Running` (the engine's own
    /// turn, never the handler's). Reaches the trampoline's fixed link
    /// symbol directly; there is exactly one instance per process.
    #[allow(static_mut_refs)]
    pub unsafe fn regs_before_mut(&self) -> &mut Regs {
        &mut RISCOVER_REGS_BEFORE
    }

    /// # Safety
    /// Must only be called while `state() != Running`.
    #[allow(static_mut_refs)]
    pub unsafe fn regs_result(&self) -> &Regs {
        &RISCOVER_REGS_RESULT
    }

    /// # Safety
    /// Must only be called while `state() != Running`.
    #[allow(static_mut_refs)]
    pub unsafe fn regs_result_mut(&self) -> &mut Regs {
        &mut RISCOVER_REGS_RESULT
    }

    /// # Safety
    /// Must only be called while `state() != Running`.
    pub unsafe fn take_trap(&self) -> Option<TrapInfo> {
        (*self.trap.get()).take()
    }

    pub(crate) fn recovery_ptr(&self) -> *mut JmpBuf {
        self.recovery.get()
    }

    pub(crate) fn runner_range(&self) -> (usize, usize) {
        unsafe { (*self.runner_base.get(), *self.runner_size.get()) }
    }

    /// # Safety
    /// Must only be called while the handler holds exclusive access, i.e.
    /// from inside `broker_handler` while `state() == Running`.
    pub(crate) unsafe fn regs_result_ptr(&self) -> *mut Regs {
        std::ptr::addr_of_mut!(RISCOVER_REGS_RESULT)
    }

    pub(crate) fn set_trap(&self, t: TrapInfo) {
        unsafe {
            *self.trap.get() = Some(t);
        }
    }
}

/// The narrow, `unsafe`-gated view of `ExecutionContext` the signal handler
/// is allowed to touch (spec.md §9's "unsafe context" design note). Every
/// method here assumes it is called from inside the handler while
/// `ExecutionContext::state() == Running`, which is the only time the
/// handler has exclusive access to `regs_result`/`trap`.
pub(crate) struct HandlerContext<'a> {
    pub ctx: &'a ExecutionContext,
}

impl<'a> HandlerContext<'a> {
    /// # Safety
    /// Caller must be the signal handler itself, with no other writer
    /// concurrently touching `ctx`.
    pub unsafe fn new(ctx: &'a ExecutionContext) -> Self {
        HandlerContext { ctx }
    }
}
