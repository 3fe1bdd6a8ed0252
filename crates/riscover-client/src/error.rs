//! Client-level error taxonomy (spec.md §7): transport and configuration
//! failures are fatal and exit the worker; run-level traps never appear
//! here, they are folded into `ExecResult` by the engine instead.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("engine initialization failed: {0}")]
    Engine(#[from] riscover_engine::EngineError),

    #[error("memory mapper error: {0}")]
    Mem(#[from] riscover_mem::error::SysError),

    #[error("network I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("message of {0} bytes exceeds the negotiated maximum of {1} bytes")]
    OversizeMessage(u32, u32),

    #[error("connection closed by peer mid-message")]
    ConnectionClosed,

    #[error("record packer error: {0}")]
    Proto(#[from] riscover_proto::ProtoError),

    #[error("gzip compression error: {0}")]
    Compression(String),

    #[error("batch count {0} exceeds negotiated max_batch_n {1}")]
    BatchTooLarge(u32, u32),

    #[error("input payload truncated: expected {0} bytes, input shape requires at least that much")]
    InputTruncated(usize),

    #[error("fuzzing-value pointer table overlaps mapped memory, refusing to start")]
    UnsafeFuzzingValues,

    #[error("ASLR could not be disabled")]
    AslrNotDisabled,

    #[error("failed to pin to CPU core {0} after 10 attempts: {1}")]
    PinFailed(u32, std::io::Error),

    #[error("fixed stack switch failed: {0}")]
    StackSwitch(#[source] riscover_mem::error::SysError),
}

pub type Result<T> = std::result::Result<T, ClientError>;
