//! Wire-format record packer and YAML reproducer I/O (spec.md §4.7, §6).

pub mod error;
pub mod packer;
pub mod repro;

pub use error::{ProtoError, Result};
pub use packer::{pack_multi, pack_single};
pub use repro::{load, save, validate_flags, ReproDoc, ReproInput, ReproMapping, ReproMemDiff, ReproMeta, ReproRegDelta, ReproResult};
