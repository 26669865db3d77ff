//! Error types for the packvault engine

use std::path::PathBuf;

/// All errors that can occur during backup, restore, and verify operations
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Source or destination path is missing, empty, or otherwise unusable
    #[error("Invalid path {path}: {reason}")]
    InvalidPath {
        /// The offending path
        path: PathBuf,
        /// Why the path was rejected
        reason: String,
    },
    /// The caller lacks permission to read or write a path
    #[error("Permission denied: {0}")]
    PermissionDenied(PathBuf),
    /// The filter's filename regex failed to compile
    #[error("Invalid filter: {0}")]
    InvalidFilter(String),
    /// The file is not a packvault archive, or a newer format revision
    #[error("Unsupported archive format (bad magic or version)")]
    UnsupportedFormat,
    /// Authentication tag mismatch — wrong password or tampered archive
    #[error("Authentication failed: wrong password or tampered archive")]
    AuthenticationFailed,
    /// Structurally invalid manifest or payload after authentication
    #[error("Corrupt archive: {0}")]
    CorruptArchive(String),
    /// Key derivation or sealing failed
    #[error("Encryption failed: {0}")]
    Encryption(String),
    /// I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// Classify an I/O error against the path it touched, so permission
    /// problems surface as their own kind.
    pub fn from_io(err: std::io::Error, path: &std::path::Path) -> Self {
        match err.kind() {
            std::io::ErrorKind::PermissionDenied => EngineError::PermissionDenied(path.into()),
            std::io::ErrorKind::NotFound => EngineError::InvalidPath {
                path: path.into(),
                reason: "no such file or directory".to_string(),
            },
            _ => EngineError::Io(err),
        }
    }
}
