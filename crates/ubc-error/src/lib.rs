#![forbid(unsafe_code)]
//! Error types for the user-space block cache.
//!
//! One user-facing enum, [`UbcError`], covers every failure the cache can
//! report:
//!
//! | Variant | Meaning | errno |
//! |---------|---------|-------|
//! | `Io` | backing store open/read/write/sync failure | raw errno or `EIO` |
//! | `BadHandle` | unknown or already-closed logical handle | `EBADF` |
//! | `InvalidArgument` | unsupported seek origin, negative seek offset | `EINVAL` |
//! | `Config` | invalid cache construction parameters | `EINVAL` |
//!
//! `BadHandle` and `InvalidArgument` are detected locally and returned
//! without side effects; `Io` on a miss-load aborts the whole read/write
//! call. All failures flow through the return channel — nothing panics.
//!
//! This crate intentionally does not depend on `ubc-types`: the cache crate
//! converts its typed ids into the plain integers carried here, so the error
//! type stays usable from any layer without cycles.

use thiserror::Error;

/// Unified error type for all cache operations.
#[derive(Debug, Error)]
pub enum UbcError {
    /// Operating system I/O error from the backing store (wraps `std::io::Error`).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Unknown or closed logical handle passed to an operation.
    #[error("bad handle: {0}")]
    BadHandle(u64),

    /// Structurally invalid argument (unsupported whence, negative offset).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Invalid cache configuration (zero capacity, bad block size).
    #[error("invalid cache configuration: {0}")]
    Config(String),
}

impl UbcError {
    /// Convert this error into a POSIX errno (`EBADF` / `EINVAL` / `EIO`),
    /// so callers used to the syscall surface keep their error contract.
    ///
    /// The match is exhaustive — adding a variant without assigning an errno
    /// is a compile error.
    #[must_use]
    pub fn to_errno(&self) -> libc::c_int {
        match self {
            Self::Io(err) => err.raw_os_error().unwrap_or(libc::EIO),
            Self::BadHandle(_) => libc::EBADF,
            Self::InvalidArgument(_) | Self::Config(_) => libc::EINVAL,
        }
    }
}

/// Result alias using `UbcError`.
pub type Result<T> = std::result::Result<T, UbcError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errno_mapping_covers_all_variants() {
        let cases: Vec<(UbcError, libc::c_int)> = vec![
            (UbcError::Io(std::io::Error::other("test")), libc::EIO),
            (UbcError::BadHandle(7), libc::EBADF),
            (
                UbcError::InvalidArgument("whence CUR is not supported".into()),
                libc::EINVAL,
            ),
            (UbcError::Config("capacity_blocks must be > 0".into()), libc::EINVAL),
        ];

        for (error, expected_errno) in &cases {
            assert_eq!(error.to_errno(), *expected_errno, "wrong errno for {error:?}");
        }
    }

    #[test]
    fn io_error_preserves_raw_os_error() {
        let raw = std::io::Error::from_raw_os_error(libc::ENOSPC);
        let err = UbcError::Io(raw);
        assert_eq!(err.to_errno(), libc::ENOSPC);
    }

    #[test]
    fn display_formatting() {
        assert_eq!(UbcError::BadHandle(3).to_string(), "bad handle: 3");
        assert_eq!(
            UbcError::InvalidArgument("negative seek offset -5".into()).to_string(),
            "invalid argument: negative seek offset -5"
        );
        assert!(UbcError::Config("bad".into())
            .to_string()
            .starts_with("invalid cache configuration:"));
    }
}
