//! The Execution Engine (C5): orchestrates one run — load state, reset
//! mappings, enter the runner page, capture the result — and the Memory
//! Diff / Auto-Map pass (C6) layered on top of it.

pub mod automap;
pub mod error;
pub mod fuzzvalue;
pub mod memdiff;
pub mod selftest;

use std::time::Duration;

use riscover_mem::Mapping;
use riscover_regs::Regs;
use riscover_runner::{ExecutionContext, RunOutcome, RunnerPage, SignalBroker};

pub use error::{EngineError, Result};
pub use memdiff::MemChange;
pub use riscover_runner::page::MAX_SEQ_LEN;

/// Per-run CPU-time timeout (spec.md §4.4: "default ~20 ms").
pub const RUN_TIMEOUT: Duration = Duration::from_millis(20);

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Meta {
    pub cycle: u64,
    pub instret: u64,
}

/// One run's outcome (spec.md §3 `Result`).
#[derive(Clone, Debug)]
pub struct ExecResult {
    pub signum: i32,
    pub si_code: i32,
    pub si_addr: u64,
    pub si_pc: u64,
    pub instr_idx: u32,
    pub regs_after: Regs,
    pub meta: Option<Meta>,
    pub mem_changes: Vec<MemChange>,
    pub mem_changes_capped: bool,
}

impl ExecResult {
    pub fn is_clean(&self) -> bool {
        self.signum == 0
    }
}

/// Compares two results the way the idempotence property (spec.md §8)
/// requires: byte-equal snapshots, equal memory changes, equal packing —
/// meta counters are allowed to differ by baseline-subtracted noise.
pub fn result_equal(a: &ExecResult, b: &ExecResult) -> bool {
    a.signum == b.signum
        && a.si_code == b.si_code
        && a.si_addr == b.si_addr
        && a.si_pc == b.si_pc
        && a.instr_idx == b.instr_idx
        && a.regs_after == b.regs_after
        && a.mem_changes == b.mem_changes
        && a.mem_changes_capped == b.mem_changes_capped
}

#[cfg(target_arch = "aarch64")]
unsafe fn read_fp_status() -> u64 {
    let v: u64;
    core::arch::asm!("mrs {0}, fpsr", out(reg) v);
    v
}
#[cfg(target_arch = "aarch64")]
unsafe fn write_fp_status(v: u64) {
    core::arch::asm!("msr fpsr, {0}", in(reg) v);
}
#[cfg(target_arch = "aarch64")]
unsafe fn read_counters() -> (u64, u64) {
    // No unprivileged instruction-retired counter is guaranteed available
    // on ARM64 without perf_event_open (out of this workspace's stack);
    // the virtual timer counter stands in for `cycle`, `instret` is left
    // at 0. See DESIGN.md.
    let cycle: u64;
    core::arch::asm!("mrs {0}, cntvct_el0", out(reg) cycle);
    (cycle, 0)
}

#[cfg(target_arch = "riscv64")]
unsafe fn read_fp_status() -> u64 {
    let v: u64;
    core::arch::asm!("csrr {0}, fcsr", out(reg) v);
    v
}
#[cfg(target_arch = "riscv64")]
unsafe fn write_fp_status(v: u64) {
    core::arch::asm!("csrw fcsr, {0}", in(reg) v);
}
#[cfg(target_arch = "riscv64")]
unsafe fn read_counters() -> (u64, u64) {
    let cycle: u64;
    let instret: u64;
    core::arch::asm!("rdcycle {0}", out(reg) cycle);
    core::arch::asm!("rdinstret {0}", out(reg) instret);
    (cycle, instret)
}

#[cfg(target_arch = "aarch64")]
unsafe fn enter_trampoline() {
    riscover_runner::asm::aarch64::enter();
}
#[cfg(target_arch = "riscv64")]
unsafe fn enter_trampoline() {
    riscover_runner::asm::riscv64::enter();
}

pub struct ExecutionEngine {
    runner: RunnerPage,
    broker: SignalBroker,
    mappings: Vec<Mapping>,
    meta_enabled: bool,
    instret_baseline_clean: u64,
    instret_baseline_trap: u64,
    #[cfg(all(target_arch = "riscv64", feature = "vector"))]
    vlen_bytes: usize,
}

/// Reads `vlenb`, the V extension's per-register byte width, once at
/// startup. The same CSR `riscover-client::cpuinfo::detect_vector_geometry`
/// reads for the handshake's advertised vector geometry; the engine keeps
/// its own copy so `run` can stamp every snapshot's `vlen_bytes` without a
/// dependency on the client crate.
#[cfg(all(target_arch = "riscv64", feature = "vector"))]
unsafe fn detect_vlen_bytes() -> usize {
    let vlenb: u64;
    core::arch::asm!("csrr {0}, vlenb", out(reg) vlenb);
    vlenb as usize
}

impl ExecutionEngine {
    /// Maps the runner page, installs the signal handlers, calibrates the
    /// performance-counter baselines and runs every self-test in
    /// `selftest` — all before the Batch Loop accepts its first input
    /// (spec.md §4.5: "run once at init, all assertions must hold").
    pub fn init(meta_enabled: bool) -> Result<Self> {
        let runner = RunnerPage::init()?;
        let broker = SignalBroker::install()?;
        ExecutionContext::get().set_runner_range(runner.base(), riscover_mem::page_size());

        let mut engine = ExecutionEngine {
            runner,
            broker,
            mappings: Vec::new(),
            meta_enabled,
            instret_baseline_clean: 0,
            instret_baseline_trap: 0,
            #[cfg(all(target_arch = "riscv64", feature = "vector"))]
            // SAFETY: reading a CSR has no preconditions beyond the V
            // extension being present, which this feature gate asserts.
            vlen_bytes: unsafe { detect_vlen_bytes() },
        };

        if meta_enabled {
            engine.calibrate();
        }
        selftest::run_all(&mut engine).map_err(EngineError::SelfTest)?;
        Ok(engine)
    }

    /// Runs a single no-op and a single illegal instruction once each,
    /// unconditionally (never re-entrant with the real fuzzing loop), to
    /// learn the counter overhead the trampoline itself contributes on
    /// each path (spec.md §4.5's last self-test item, and §4.8 step 8).
    fn calibrate(&mut self) {
        let before = Regs::default();
        #[cfg(target_arch = "aarch64")]
        let nop = 0xD503_201Fu32;
        #[cfg(target_arch = "riscv64")]
        let nop = 0x0000_0013u32;
        #[cfg(target_arch = "aarch64")]
        let illegal = 0x0000_0000u32;
        #[cfg(target_arch = "riscv64")]
        let illegal = 0x0000_0000u32;

        let clean = self.run(&[nop], &before);
        self.instret_baseline_clean = clean.meta.map(|m| m.instret).unwrap_or(0);
        let trapped = self.run(&[illegal], &before);
        self.instret_baseline_trap = trapped.meta.map(|m| m.instret).unwrap_or(0);
    }

    pub fn attach_mapping(&mut self, mapping: Mapping) {
        self.mappings.push(mapping);
    }

    pub fn runner_base(&self) -> usize {
        self.runner.base()
    }

    /// `run` contract (spec.md §4.5 1-9): loads `regs_before`, writes
    /// `instrs` into the runner page, resets every attached mapping, enters
    /// the trampoline under the broker's protection, and builds the
    /// `ExecResult` — diffing memory and subtracting the calibrated counter
    /// baseline along the way.
    pub fn run(&mut self, instrs: &[u32], regs_before: &Regs) -> ExecResult {
        self.run_scanning(instrs, regs_before, &[])
    }

    /// Same contract as `run`, but the memory-diff scan also covers
    /// `extra_mappings` (auto-mapped pages `run_with_automap` is tracking
    /// locally, not yet folded into `self.mappings`). Without this, a
    /// memory write landing inside a page that was only just auto-mapped to
    /// let this very run proceed would never be reported, since `run`'s scan
    /// only ever looked at `self.mappings`.
    fn run_scanning(&mut self, instrs: &[u32], regs_before: &Regs, extra_mappings: &[&Mapping]) -> ExecResult {
        assert!(instrs.len() <= MAX_SEQ_LEN, "sequence exceeds MAX_SEQ_LEN");

        // SAFETY: the engine is the exclusive writer to its own FP status
        // register around a run; no other code on this thread touches it
        // between save and restore.
        let fp_status_save = unsafe { read_fp_status() };

        let ctx = ExecutionContext::get();
        // SAFETY: state is not Running here — the engine's own turn.
        unsafe {
            *ctx.regs_before_mut() = *regs_before;
            #[cfg(all(target_arch = "riscv64", feature = "vector"))]
            {
                ctx.regs_before_mut().vec.vlen_bytes = self.vlen_bytes;
            }
        }

        self.runner.load(instrs);
        for m in &self.mappings {
            m.reset();
        }

        let counters_before = if self.meta_enabled {
            Some(unsafe { read_counters() })
        } else {
            None
        };

        // SAFETY: enter_trampoline has no Drop state on its stack between
        // the broker's sigsetjmp and the branch into the runner page.
        let outcome = unsafe { self.broker.run_guarded(RUN_TIMEOUT, || enter_trampoline()) };

        let counters_after = if self.meta_enabled {
            Some(unsafe { read_counters() })
        } else {
            None
        };

        let (mut regs_after, signum, si_code, si_addr, si_pc, instr_idx) = match outcome {
            RunOutcome::Clean => {
                // SAFETY: state is CleanlyReturned, not Running.
                // The RISC-V trampoline epilogue never saves v0..v31 (see
                // DESIGN.md), so a clean return needs the same explicit
                // vector save the trap path takes in signal::capture_vector_state.
                #[cfg(all(target_arch = "riscv64", feature = "vector"))]
                unsafe {
                    let result = ctx.regs_result_mut();
                    result.vec.vlen_bytes = self.vlen_bytes;
                    riscover_runner::asm::riscv64::capture_vector_state(&mut result.vec);
                }
                let regs = unsafe { *ctx.regs_result() };
                (regs, 0, 0, 0u64, 0u64, 0u32)
            }
            RunOutcome::Trapped(trap) => {
                // SAFETY: state is TrapCaptured, not Running.
                let regs = unsafe { *ctx.regs_result() };
                (regs, trap.signum, trap.si_code, trap.si_addr, trap.si_pc, trap.instr_idx)
            }
        };

        regs_after.restore_scratch(regs_before);

        let meta = match (self.meta_enabled, counters_before, counters_after) {
            (true, Some((cb, ib)), Some((ca, ia))) => {
                let baseline = if signum == 0 {
                    self.instret_baseline_clean
                } else {
                    self.instret_baseline_trap
                };
                Some(Meta {
                    cycle: ca.saturating_sub(cb),
                    instret: ia.saturating_sub(ib).saturating_sub(baseline),
                })
            }
            _ => None,
        };

        let mut refs: Vec<&Mapping> = self.mappings.iter().collect();
        refs.extend_from_slice(extra_mappings);
        let (mem_changes, mem_changes_capped) = memdiff::scan(&refs);

        // SAFETY: this thread is the exclusive owner of its own FP status
        // register; restoring here undoes whatever the sequence left.
        unsafe { write_fp_status(fp_status_save) };

        ExecResult {
            signum,
            si_code,
            si_addr,
            si_pc,
            instr_idx,
            regs_after,
            meta,
            mem_changes,
            mem_changes_capped,
        }
    }

    /// `run_full_seq` contract (spec.md §4.5): runs every prefix
    /// `instrs[0..k]` for `k = 1..=instrs.len()`, stopping at (and
    /// including) the first trap.
    pub fn run_full_seq(&mut self, instrs: &[u32], regs_before: &Regs) -> Vec<ExecResult> {
        let mut out = Vec::new();
        for k in 1..=instrs.len() {
            let result = self.run(&instrs[..k], regs_before);
            let trapped = !result.is_clean();
            out.push(result);
            if trapped {
                break;
            }
        }
        out
    }

    /// Runs `instrs`, auto-mapping on a SIGSEGV/SIGBUS whose faulting
    /// address is a plausible candidate, up to
    /// `memdiff::CHECK_MEM_MAX_TRIES` additional attempts (spec.md §4.6).
    /// Auto-created mappings never outlive this call.
    pub fn run_with_automap(&mut self, instrs: &[u32], regs_before: &Regs) -> ExecResult {
        let mut auto: Vec<Mapping> = Vec::new();
        let mut result = self.run(instrs, regs_before);

        for _ in 0..automap::CHECK_MEM_MAX_TRIES {
            let retryable = result.signum == libc::SIGSEGV || result.signum == libc::SIGBUS;
            if !retryable {
                break;
            }
            let addr = result.si_addr;
            let already_mapped = |a: u64| {
                self.mappings.iter().any(|m| m.contains(a as usize))
                    || auto.iter().any(|m| m.contains(a as usize))
            };
            if !automap::is_candidate(addr, already_mapped) {
                break;
            }

            let page_size = riscover_mem::page_size() as u64;
            let page_addr = addr & !(page_size - 1);
            let prot = automap::gen_random_prot(page_addr);
            let content = automap::fill_deterministic(page_addr, page_size as usize);
            match Mapping::create(page_addr as usize, page_size as usize, prot, Some(content)) {
                Ok(m) => auto.push(m),
                Err(_) => break,
            }

            self.runner.load(instrs);
            let auto_refs: Vec<&Mapping> = auto.iter().collect();
            result = self.run_scanning(instrs, regs_before, &auto_refs);
        }

        for m in auto {
            m.release();
        }
        result
    }

    /// Policy check run once at startup: no fuzzing-value pointer may be
    /// within 1000 pages of an already-mapped page (spec.md §4.2).
    pub fn check_fuzzing_values_safe(&self) -> Result<()> {
        let page_size = riscover_mem::page_size() as u64;
        let pointers = fuzzvalue::all_pointer_candidates(page_size);
        riscover_mem::check_ptrs_safe(&pointers).map_err(EngineError::Mem)
    }
}

impl Drop for ExecutionEngine {
    fn drop(&mut self) {
        for m in self.mappings.drain(..) {
            m.release();
        }
    }
}
