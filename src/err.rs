use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::HiveOffset;

pub type Result<T> = std::result::Result<T, HiveError>;
pub type FormatResult<T> = std::result::Result<T, FormatError>;

/// Coarse classification of every error this crate produces.
///
/// Callers that only care about "what went wrong" (missing path vs. corrupt data vs. wrong node
/// kind) should match on this instead of the concrete error enums.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Structural problem in the hive data.
    Format,
    /// A cell had a different type tag than the operation required.
    UnexpectedCellType,
    /// A path segment does not exist.
    NotFound,
    /// A directory operation was attempted on (or through) a value.
    NotADirectory,
    /// A content operation was attempted on a key.
    PermissionDenied,
    /// Offsets form a loop (or nest deeper than allowed).
    CycleDetected,
    /// The byte source itself failed.
    Io,
}

/// Decode-time structural errors.
#[derive(Debug, Error)]
pub enum FormatError {
    #[error(
        "Offset 0x{offset:08x}: invalid {what} signature, expected `{}`, found `{:02X?}`",
        String::from_utf8_lossy(.expected),
        .found
    )]
    BadSignature {
        what: &'static str,
        offset: u64,
        expected: &'static [u8],
        found: Vec<u8>,
    },

    #[error("Offset 0x{offset:08x}: truncated {what} (need {need} bytes, have {have})")]
    TruncatedRecord {
        what: &'static str,
        offset: u64,
        need: usize,
        have: usize,
    },

    #[error("Offset 0x{offset:08x} is outside of the hive (length {len})")]
    OffsetOutOfRange { offset: u64, len: u64 },

    #[error(
        "Offset 0x{offset:08x}: expected a {expected} cell, found tag `{}`",
        String::from_utf8_lossy(.found)
    )]
    UnexpectedCellType {
        offset: u64,
        expected: &'static str,
        found: [u8; 2],
    },

    #[error("Header checksum mismatch, stored 0x{expected:08x}, calculated 0x{found:08x}")]
    InvalidChecksum { expected: u32, found: u32 },

    #[error("Offset 0x{offset:08x}: an I/O error has occurred: {source}")]
    FailedToRead {
        offset: u64,
        #[source]
        source: io::Error,
    },
}

impl FormatError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            FormatError::UnexpectedCellType { .. } => ErrorKind::UnexpectedCellType,
            FormatError::FailedToRead { .. } => ErrorKind::Io,
            _ => ErrorKind::Format,
        }
    }
}

/// Errors surfaced by the filesystem view.
#[derive(Debug, Error)]
pub enum HiveError {
    #[error(transparent)]
    Format(#[from] FormatError),

    #[error("Failed to open file {}: {}", path.display(), source)]
    FailedToOpenFile {
        #[source]
        source: io::Error,
        path: PathBuf,
    },

    #[error("`{path}`: no such key or value")]
    NotFound { path: String },

    #[error("`{path}`: not a directory")]
    NotADirectory { path: String },

    #[error("`{path}`: is a key, it has no content to read")]
    NotAFile { path: String },

    #[error("Offset 0x{offset:08x} was reached twice while following references")]
    CycleDetected { offset: HiveOffset },

    #[error("Offset 0x{offset:08x}: subkey index nested deeper than {depth} levels")]
    IndexTooDeep { offset: HiveOffset, depth: usize },
}

impl HiveError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            HiveError::Format(e) => e.kind(),
            HiveError::FailedToOpenFile { .. } => ErrorKind::Io,
            HiveError::NotFound { .. } => ErrorKind::NotFound,
            HiveError::NotADirectory { .. } => ErrorKind::NotADirectory,
            HiveError::NotAFile { .. } => ErrorKind::PermissionDenied,
            HiveError::CycleDetected { .. } | HiveError::IndexTooDeep { .. } => {
                ErrorKind::CycleDetected
            }
        }
    }
}
