use crate::content_hash::HashError;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by a [`ContentProvider`] for anything other than hashing
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to write {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to delete {}: {source}", .path.display())]
    Delete {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Access to project file content.
///
/// Paths are project-relative strings as they appear in the mapping
/// document. Implementations decide how they resolve to real locations.
/// Every operation may fail; callers treat a failure on one file as
/// "indeterminate" for that file only.
pub trait ContentProvider: Send + Sync {
    /// Reads a file as UTF-8 text.
    fn read(&self, path: &str) -> Result<String, ProviderError>;

    /// Writes a file, creating parent directories as needed.
    fn write(&self, path: &str, content: &str) -> Result<(), ProviderError>;

    /// Deletes a file. Deleting a missing file is not an error.
    fn delete(&self, path: &str) -> Result<(), ProviderError>;

    fn exists(&self, path: &str) -> bool;

    /// Content digest of a file.
    ///
    /// # Returns
    /// * `Err(HashError::NotFound)` - The file is missing. Never the digest of
    ///   empty content.
    fn hash(&self, path: &str) -> Result<String, HashError>;
}
