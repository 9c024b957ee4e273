//! Error types for compound file operations.
//!
//! Variants follow the failure classes of the storage layer: structural
//! corruption is fatal for the container, name collisions are local and
//! recoverable, range errors are caller mistakes, and unsupported formats
//! are reported separately so callers can show a clear message.
use thiserror::Error;

/// Main error type for compound file operations.
#[derive(Error, Debug)]
pub enum CfbError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Data does not start with the compound file signature
    #[error("Not a compound file")]
    NotCompoundFile,

    /// Recognised, but not a format this crate reads
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    /// Corrupted or malformed container
    #[error("Corrupted file: {0}")]
    Corrupted(String),

    /// A sibling with the same name already exists
    #[error("An entry named '{0}' already exists")]
    NameCollision(String),

    /// Sector or offset beyond what the container addresses
    #[error("Out of range: {0}")]
    OutOfRange(String),

    /// Stream or storage not found
    #[error("Entry not found: {0}")]
    NotFound(String),

    /// Caller supplied an unusable argument
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

impl CfbError {
    /// True for errors that mean the container itself is damaged.
    pub fn is_corruption(&self) -> bool {
        matches!(self, CfbError::Corrupted(_))
    }

    /// True for errors that mean the data is some other, known format.
    pub fn is_unsupported(&self) -> bool {
        matches!(self, CfbError::UnsupportedFormat(_))
    }
}

/// Result type for compound file operations.
pub type Result<T> = std::result::Result<T, CfbError>;
