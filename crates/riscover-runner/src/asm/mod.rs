//! Hand-written trampolines, one per target architecture, linked in via
//! `core::arch::global_asm!` as spec.md's design notes direct ("best
//! emitted as hand-written assembly... linked alongside the engine").
//!
//! Each module exposes `runner_code_start`/`runner_code_end` (so the Signal
//! Broker can tell whether a faulting PC landed inside the trampoline vs.
//! the instruction slots vs. somewhere else entirely) and a safe
//! `enter(ctx: &mut RunnerContext)` wrapper around the raw entry symbol.

#[cfg(target_arch = "aarch64")]
pub mod aarch64;
#[cfg(target_arch = "riscv64")]
pub mod riscv64;
