//! Typed, architecture-specific register snapshots.
//!
//! Exactly one of the `aarch64` / `riscv64` modules is compiled in, selected
//! by `target_arch`. Byte layout and field order of `Regs` are fixed for a
//! given architecture and feature set, so two snapshots can be compared with
//! a plain `==` and the signal handler can splice kernel `mcontext` data into
//! them by offset.

#[cfg(target_arch = "aarch64")]
pub mod aarch64;
#[cfg(target_arch = "riscv64")]
pub mod riscv64;

#[cfg(target_arch = "aarch64")]
pub use aarch64::Regs;
#[cfg(target_arch = "riscv64")]
pub use riscv64::Regs;

#[cfg(not(any(target_arch = "aarch64", target_arch = "riscv64")))]
compile_error!("riscover-regs only supports aarch64 and riscv64 targets");

/// One register-level difference between two snapshots, tagged with the
/// width the record packer needs to serialize it (C7 `N bytes value`).
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum RegDiff {
    /// An 8-byte GP, scalar-FP, or flag register difference.
    Scalar { abi_index: u8, before: u64, after: u64 },
    /// A 16- or V-byte vector register difference.
    Vector {
        abi_index: u8,
        before: VectorValue,
        after: VectorValue,
    },
}

/// A vector register's raw bytes, sized up to the architecture's maximum
/// register width. `len` is the architecturally meaningful prefix.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VectorValue {
    pub bytes: [u8; MAX_VECTOR_REG_BYTES],
    pub len: usize,
}

impl VectorValue {
    pub fn as_slice(&self) -> &[u8] {
        &self.bytes[..self.len]
    }
}

/// Upper bound on vector register width in bytes across both supported
/// architectures (ARM64 SIMD is fixed at 16; RISC-V V is configured at
/// runtime up to this bound). Chosen generously above any VLEN seen on
/// current silicon so the snapshot never allocates.
pub const MAX_VECTOR_REG_BYTES: usize = 256;
