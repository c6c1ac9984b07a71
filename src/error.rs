//! Error kinds surfaced across the runtime (spec §7).
//!
//! Mirrors the teacher's own `diagnostic::Diagnostic`: a small struct with
//! a hand-written `Display` impl rather than a derive-macro error crate.

use std::fmt;

/// Failure classification shared by every fallible core operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// Allocation for an operand, buffer, or pool failed.
    OutOfMemory,
    /// Structural validation failed: shape mismatch, bad index, overflow, etc.
    BadData,
    /// A required reference was absent at the public boundary.
    UnexpectedNull,
    /// A driver reported failure, or a kernel's preconditions were violated.
    OpFailed,
    /// Reserved for partial driver completion; not currently produced.
    Incomplete,
    /// Operation attempted in the wrong lifecycle phase.
    BadState,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::OutOfMemory => "out of memory",
            ErrorKind::BadData => "bad data",
            ErrorKind::UnexpectedNull => "unexpected null",
            ErrorKind::OpFailed => "operation failed",
            ErrorKind::Incomplete => "incomplete",
            ErrorKind::BadState => "bad state",
        };
        f.write_str(s)
    }
}

/// An error carrying its [`ErrorKind`] plus a human-readable message.
#[derive(Clone, Debug)]
pub struct Error {
    pub kind: ErrorKind,
    pub message: String,
}

impl Error {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn bad_data(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::BadData, message)
    }

    pub fn bad_state(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::BadState, message)
    }

    pub fn op_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::OpFailed, message)
    }

    pub fn out_of_memory(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::OutOfMemory, message)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;
