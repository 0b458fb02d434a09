//! Crate-wide error hierarchy.
//!
//! Every fallible step in the PE driver and every Mach-O decoder that can fail
//! returns `Result<T, BinError>`. The Mach-O segment/section *model* itself
//! never returns `BinError` -- its operations are total, per spec.

use std::fmt;

/// Byte-level failure: out-of-bounds access or a read that ran off the end of
/// the buffer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReadError {
    #[error("offset {offset:#x} is out of bounds (buffer length {len:#x})")]
    OutOfBounds { offset: usize, len: usize },
    #[error("short read: wanted {wanted} bytes at {offset:#x}, {available} available")]
    ShortRead {
        offset: usize,
        wanted: usize,
        available: usize,
    },
}

/// Top-level error kinds, unified so every warn-and-continue boundary in the
/// PE driver can be expressed as one `Result` type.
#[derive(Debug, Clone, thiserror::Error)]
pub enum BinError {
    #[error(transparent)]
    Read(#[from] ReadError),

    /// Failure in a mandatory step. Only header parsing produces this.
    #[error("{0}")]
    Parsing(String),

    /// A structural inconsistency a decoder detected in otherwise readable
    /// bytes (e.g. a declared count whose table would run past the buffer).
    #[error("corrupted input: {reason}")]
    Corrupted { reason: String },

    /// A lookup (RVA->offset, offset->section, name->section, ...) found
    /// nothing.
    #[error("not found: {what}")]
    NotFound { what: String },
}

impl BinError {
    pub fn corrupted(reason: impl Into<String>) -> Self {
        BinError::Corrupted {
            reason: reason.into(),
        }
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        BinError::NotFound { what: what.into() }
    }

    pub fn parsing(reason: impl fmt::Display) -> Self {
        BinError::Parsing(reason.to_string())
    }
}

pub type Result<T> = std::result::Result<T, BinError>;

/// The one combinator every non-mandatory PE driver step runs through: log
/// the failure at `step` and fall through with `None` instead of aborting the
/// whole parse. `level` lets callers downgrade genuinely expected conditions
/// (e.g. an oversize TLS template) to `debug` instead of `warn`.
pub fn warn_and_continue<T>(step: &'static str, level: log::Level, r: Result<T>) -> Option<T> {
    match r {
        Ok(v) => Some(v),
        Err(e) => {
            log::log!(level, "{step}: {e}");
            None
        }
    }
}
