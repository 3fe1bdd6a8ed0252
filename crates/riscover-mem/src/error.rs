use thiserror::Error;

pub type Result<T> = std::result::Result<T, SysError>;

/// Typed wrapper around a raw POSIX `errno`, analogous to mapping a Mach
/// `kern_return_t` onto a typed error: callers get a `match`-able enum
/// instead of re-deriving meaning from a bare integer at every call site.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum SysError {
    #[error("address range already in use")]
    AddressInUse,

    #[error("out of memory")]
    OutOfMemory,

    #[error("invalid argument to a mapping call")]
    InvalidArgument,

    #[error("operation not permitted")]
    NotPermitted,

    #[error("no such file or address")]
    NoSuchEntity,

    #[error("shared memory descriptor exhausted its quota")]
    QuotaExceeded,

    #[error("unrecognized system error (errno {0})")]
    Other(i32),
}

impl SysError {
    pub fn from_errno(errno: i32) -> Self {
        match errno {
            libc::EEXIST => SysError::AddressInUse,
            libc::ENOMEM => SysError::OutOfMemory,
            libc::EINVAL => SysError::InvalidArgument,
            libc::EPERM => SysError::NotPermitted,
            libc::ENOENT => SysError::NoSuchEntity,
            libc::EDQUOT => SysError::QuotaExceeded,
            other => SysError::Other(other),
        }
    }

    pub fn last() -> Self {
        Self::from_errno(std::io::Error::last_os_error().raw_os_error().unwrap_or(0))
    }
}

/// Mirrors `perfrecord`'s `IntoResult` for Mach return codes: turns a raw
/// libc return value (`-1` on failure, errno set) into a typed `Result`.
pub trait IntoResult {
    type Value;

    fn into_result(self) -> Result<Self::Value>;
}

impl IntoResult for libc::c_int {
    type Value = libc::c_int;

    fn into_result(self) -> Result<libc::c_int> {
        if self == -1 {
            Err(SysError::last())
        } else {
            Ok(self)
        }
    }
}

impl IntoResult for libc::ssize_t {
    type Value = libc::ssize_t;

    fn into_result(self) -> Result<libc::ssize_t> {
        if self == -1 {
            Err(SysError::last())
        } else {
            Ok(self)
        }
    }
}

/// `mmap` returns `MAP_FAILED` (`-1` cast to pointer), not `-1` itself.
pub fn check_mmap(ptr: *mut libc::c_void) -> Result<*mut libc::c_void> {
    if ptr == libc::MAP_FAILED {
        Err(SysError::last())
    } else {
        Ok(ptr)
    }
}
