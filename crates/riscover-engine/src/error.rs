//! Engine-level error taxonomy, following `perfrecord/src/kernel_error.rs`'s
//! pattern of a `thiserror` enum wrapping the lower layers' own errors
//! rather than re-flattening them to strings.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("memory mapper error: {0}")]
    Mem(#[from] riscover_mem::error::SysError),
    #[error("signal broker setup failed: {0}")]
    Signal(#[from] std::io::Error),
    #[error("engine self-test failed: {0}")]
    SelfTest(String),
}

pub type Result<T> = std::result::Result<T, EngineError>;
