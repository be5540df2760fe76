//! Session-scoped filesystem operations.
//!
//! Every operation takes the owning session's working directory as its root
//! and a client-supplied relative path; [`resolve::resolve_within`] confines
//! the target before any I/O happens.

mod ops;
mod resolve;
mod types;

pub use ops::{browse, config_files, create, delete, read, write};
pub use resolve::resolve_within;
pub use types::FileEntry;

use thiserror::Error;

/// Per-operation filesystem failures, reported file-specifically on the
/// wire rather than failing the connection.
#[derive(Debug, Error)]
pub enum FsError {
    #[error("path escapes the session working directory: {0}")]
    PathEscape(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("file too large: {size} bytes (limit {limit})")]
    TooLarge { size: u64, limit: u64 },

    #[error("file is not valid UTF-8 text: {0}")]
    NotUtf8(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl FsError {
    /// Stable code carried in wire `error` messages.
    pub fn wire_code(&self) -> &'static str {
        match self {
            FsError::PathEscape(_) => "invalid_path",
            FsError::NotFound(_) => "not_found",
            FsError::TooLarge { .. } | FsError::NotUtf8(_) | FsError::Io(_) => "file_error",
        }
    }
}
