//! Error types for in-place ZIP/APK archive operations.
//!
//! This module provides the [`Error`] enum which represents every failure
//! mode of the crate, along with a convenient [`Result<T>`] type alias.
//!
//! # Error Categories
//!
//! Errors fall into four groups:
//!
//! | Category | Variants | Typical Cause |
//! |----------|----------|---------------|
//! | Resource | [`Io`][Error::Io] | File system operations, disk full |
//! | Format | [`InvalidFormat`][Error::InvalidFormat], [`CorruptHeader`][Error::CorruptHeader], [`EocdNotFound`][Error::EocdNotFound], [`Overlap`][Error::Overlap], [`EntryBeyondEof`][Error::EntryBeyondEof] | Damaged or crafted archives |
//! | Usage | [`ReadOnly`][Error::ReadOnly], [`AlreadyTracked`][Error::AlreadyTracked], [`Untracked`][Error::Untracked], [`EntryNotFound`][Error::EntryNotFound], [`EntryDeleted`][Error::EntryDeleted], [`InvalidArgument`][Error::InvalidArgument], [`Closed`][Error::Closed] | Contract violations by the caller |
//! | Compatibility | [`UnsupportedMethod`][Error::UnsupportedMethod] | Entries compressed with methods other than store/deflate |
//!
//! Integrity mismatches (CRC, "version needed to extract", extra fields) are
//! not errors: they are recorded in a [`VerifyLog`](crate::zip::VerifyLog).
//!
//! # Example
//!
//! ```rust,no_run
//! use apkzip::{Error, ZipFile, ZipOptions};
//!
//! fn open(path: &str) -> apkzip::Result<ZipFile> {
//!     match ZipFile::open(path, ZipOptions::default()) {
//!         Ok(zip) => Ok(zip),
//!         Err(e) if e.is_corruption() => {
//!             eprintln!("archive is damaged: {}", e);
//!             Err(e)
//!         }
//!         Err(e) => Err(e),
//!     }
//! }
//! ```

use std::io;

/// The main error type for archive operations.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// An I/O error occurred while touching the archive, a staging file, or
    /// a temporary directory.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The file is not a usable ZIP archive.
    #[error("Invalid ZIP format: {0}")]
    InvalidFormat(String),

    /// A record inside the archive is damaged or truncated.
    #[error("Corrupt record at offset {offset:#x}: {reason}")]
    CorruptHeader {
        /// The byte offset where corruption was detected.
        offset: u64,
        /// A description of the corruption.
        reason: String,
    },

    /// No End Of Central Directory record could be located.
    #[error("Could not find EOCD in the last {searched} bytes of the file")]
    EocdNotFound {
        /// Number of trailing bytes that were scanned.
        searched: u64,
    },

    /// An occupied byte range overlaps another occupied range.
    ///
    /// `existing` names the range that was already in place. When it reads
    /// `Central Directory`, the directory itself is considered suspect.
    #[error("{entry} at [{start:#x}, {end:#x}) overlaps with {existing}")]
    Overlap {
        /// Description of the range being added.
        entry: String,
        /// Start of the range being added.
        start: u64,
        /// End of the range being added.
        end: u64,
        /// Description of the range that was already present.
        existing: String,
    },

    /// An entry's data claims to extend past the end of the file.
    #[error("Entry '{name}' ends at {end:#x}, beyond EOF at {file_size:#x}")]
    EntryBeyondEof {
        /// The entry name.
        name: String,
        /// Where the entry claims to end.
        end: u64,
        /// Actual file size.
        file_size: u64,
    },

    /// The entry uses a compression method this crate cannot decode.
    ///
    /// The entry can still be copied raw with `merge_from`.
    #[error("Entry '{name}' uses unsupported compression method {method}")]
    UnsupportedMethod {
        /// The entry name.
        name: String,
        /// The ZIP compression method number.
        method: u16,
    },

    /// A mutating operation was attempted on a read-only archive.
    #[error("Cannot {operation}: archive is open in read-only mode")]
    ReadOnly {
        /// The rejected operation.
        operation: &'static str,
    },

    /// Tried to track an object that a position tracker already tracks.
    #[error("Object is already tracked")]
    AlreadyTracked,

    /// Tried to use an object a position tracker does not track.
    #[error("Object is not tracked")]
    Untracked,

    /// No entry with the given name exists.
    #[error("Entry not found: {name}")]
    EntryNotFound {
        /// The name that was looked up.
        name: String,
    },

    /// The entry was deleted and can no longer be read.
    #[error("Entry '{name}' has been deleted")]
    EntryDeleted {
        /// The deleted entry name.
        name: String,
    },

    /// An argument violates the operation's contract.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// A storage, blob, or temporary file was used after being closed.
    #[error("{what} is closed")]
    Closed {
        /// What was closed.
        what: &'static str,
    },

    /// Compressing an entry failed on a worker.
    #[error("Compression failed: {0}")]
    Compression(String),
}

impl Error {
    /// Returns `true` if the archive (or a record inside it) is damaged.
    ///
    /// Opening an archive fails with one of these errors and no partially
    /// parsed state is kept.
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            Error::InvalidFormat(_)
                | Error::CorruptHeader { .. }
                | Error::EocdNotFound { .. }
                | Error::Overlap { .. }
                | Error::EntryBeyondEof { .. }
        )
    }

    /// Returns `true` if the caller broke an API contract.
    ///
    /// Usage errors are raised synchronously and retrying them never helps.
    pub fn is_usage_error(&self) -> bool {
        matches!(
            self,
            Error::ReadOnly { .. }
                | Error::AlreadyTracked
                | Error::Untracked
                | Error::EntryNotFound { .. }
                | Error::EntryDeleted { .. }
                | Error::InvalidArgument(_)
                | Error::Closed { .. }
        )
    }

    /// Returns the entry name associated with this error, if any.
    pub fn entry_name(&self) -> Option<&str> {
        match self {
            Error::EntryBeyondEof { name, .. }
            | Error::UnsupportedMethod { name, .. }
            | Error::EntryNotFound { name }
            | Error::EntryDeleted { name } => Some(name.as_str()),
            _ => None,
        }
    }

    /// Creates a CorruptHeader error.
    pub fn corrupt_header(offset: u64, reason: impl Into<String>) -> Self {
        Error::CorruptHeader {
            offset,
            reason: reason.into(),
        }
    }

    /// Creates an InvalidArgument error.
    pub fn invalid_argument(reason: impl Into<String>) -> Self {
        Error::InvalidArgument(reason.into())
    }
}

impl From<Error> for io::Error {
    fn from(err: Error) -> Self {
        match err {
            Error::Io(e) => e,
            other => io::Error::other(other),
        }
    }
}

/// A specialized Result type for archive operations.
pub type Result<T> = std::result::Result<T, Error>;
