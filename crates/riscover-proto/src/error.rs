//! Proto-layer error taxonomy, the same `thiserror`-wrapping-the-lower-layer
//! pattern as `riscover_engine::error` and `perfrecord/src/kernel_error.rs`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtoError {
    #[error("packed body exceeds u16 (65535 bytes): {0} bytes")]
    BodyTooLarge(usize),
    #[error("reproducer I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("reproducer YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("reproducer build flags ({repro}) do not match the running binary ({binary})")]
    FlagsMismatch { repro: String, binary: String },
}

pub type Result<T> = std::result::Result<T, ProtoError>;
