//! Raw kernel signal-context layouts. The libc crate's `ucontext_t` on
//! musl/glibc targets doesn't expose the FP/SIMD extension records we need,
//! so these mirror the stable kernel-userspace ABI directly (the same
//! layouts the reference client reaches via raw casts in its signal
//! handler).

#[cfg(target_arch = "aarch64")]
pub mod aarch64;
#[cfg(target_arch = "riscv64")]
pub mod riscv64;

#[cfg(target_arch = "aarch64")]
pub use aarch64::capture;
#[cfg(target_arch = "riscv64")]
pub use riscv64::capture;
