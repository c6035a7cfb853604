//! Content hashing for change detection
//!
//! Digests are SHA-256 in lowercase hex. They are used to notice that a file
//! changed since it was recorded, nothing more.

use sha2::{Digest, Sha256};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Reasons a file could not be hashed
#[derive(Debug, Error)]
pub enum HashError {
    /// The file does not exist. Kept apart from other I/O failures so callers
    /// can tell a vanished file from an unreadable one.
    #[error("file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl HashError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, HashError::NotFound(_))
    }
}

/// Compute the SHA-256 hash of a file's content
pub fn hash_file(path: &Path) -> Result<String, HashError> {
    let content = fs::read(path).map_err(|e| {
        if e.kind() == io::ErrorKind::NotFound {
            HashError::NotFound(path.to_path_buf())
        } else {
            HashError::Io {
                path: path.to_path_buf(),
                source: e,
            }
        }
    })?;

    Ok(hash_bytes(&content))
}

/// Compute the SHA-256 hash of an in-memory buffer
pub fn hash_bytes(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    hex::encode(hasher.finalize())
}
