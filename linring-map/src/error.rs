use core::ffi::c_int;
use thiserror::Error;

/// The reason why a mirrored region could not be created.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Error)]
pub enum ErrorKind {
    /// The requested size was zero, or twice its page-rounded value does not fit a `usize`.
    #[error("invalid buffer size")]
    InvalidArgument,
    /// The system ran out of memory, file descriptors, or mappings.
    #[error("out of memory or mappings")]
    OutOfMemory,
    /// Another thread took the address range intended for the second half. Try again.
    #[error("address range of the mirror was taken")]
    Contention,
    /// The platform has no backend for mirrored mappings.
    #[error("mirrored mappings are not supported on this platform")]
    Unsupported,
}

/// An error from initializing a mirrored region, with the OS error number that caused it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
#[error("{kind} (os error {errno})")]
pub struct MapError {
    kind: ErrorKind,
    errno: c_int,
}

impl MapError {
    pub fn new(kind: ErrorKind, errno: c_int) -> Self {
        MapError { kind, errno }
    }

    pub fn unsupported() -> Self {
        MapError::new(ErrorKind::Unsupported, 0)
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// The numeric cause, `0` if there was no OS call involved.
    pub fn errno(&self) -> c_int {
        self.errno
    }

    /// Only a lost race for the address range resolves itself.
    pub fn is_retryable(&self) -> bool {
        self.kind == ErrorKind::Contention
    }
}
