#![forbid(unsafe_code)]
//! Error types for flashprobe.
//!
//! # Error Taxonomy
//!
//! flashprobe separates *outcomes* from *errors*. Running out of space,
//! reading back a different block's data, or a caller-initiated stop are
//! outcomes of a probe and are reported through `WriteOutcome`,
//! `VerificationOutcome`, and `RunResult`. `FpError` covers the cases where
//! an operation could not be carried out at all.
//!
//! | Variant | Meaning |
//! |---------|---------|
//! | `Io` | Any other operating system failure |
//! | `NoSpace` | Volume (or quota) is full |
//! | `NotFound` | Block file or target directory missing |
//! | `PermissionDenied` | Target not writable/readable |
//! | `InvalidConfig` | Run configuration rejected, or target not fresh |
//! | `Format` | Malformed block header or size arithmetic overflow |
//!
//! ## Classification of `std::io::Error`
//!
//! [`FpError::from_io`] is the single place where raw I/O errors are sorted
//! into the taxonomy. `ENOSPC` and `EDQUOT` both become `NoSpace`: a quota
//! ceiling is the capacity available to the probing user. Every store
//! implementation routes its I/O errors through it so the writer can tell
//! the expected end-of-capacity signal apart from fatal failures.

use std::io;
use thiserror::Error;

/// Unified error type for all flashprobe operations.
#[derive(Debug, Error)]
pub enum FpError {
    /// Operating system I/O error (wraps `std::io::Error`).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// No space left on the target volume.
    #[error("no space left on device")]
    NoSpace,

    /// Block file or directory not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Insufficient permissions for the requested operation.
    #[error("permission denied")]
    PermissionDenied,

    /// Run configuration failed validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Malformed on-disk data or arithmetic overflow in size computations.
    #[error("invalid format: {0}")]
    Format(String),
}

impl FpError {
    /// Classify an I/O error into the flashprobe taxonomy.
    #[must_use]
    pub fn from_io(err: io::Error) -> Self {
        if let Some(code) = err.raw_os_error() {
            if code == libc::ENOSPC || code == libc::EDQUOT {
                return Self::NoSpace;
            }
            if code == libc::EACCES || code == libc::EPERM {
                return Self::PermissionDenied;
            }
        }
        match err.kind() {
            io::ErrorKind::StorageFull => Self::NoSpace,
            io::ErrorKind::PermissionDenied => Self::PermissionDenied,
            io::ErrorKind::NotFound => Self::NotFound(err.to_string()),
            _ => Self::Io(err),
        }
    }

    /// True for the expected end-of-capacity signal.
    #[must_use]
    pub fn is_no_space(&self) -> bool {
        matches!(self, Self::NoSpace)
    }
}

/// Result alias using `FpError`.
pub type Result<T> = std::result::Result<T, FpError>;
