use crate::content_hash::{self, HashError};
use crate::data::{ContentProvider, ProviderError};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// FsContentProvider is an implementation of the ContentProvider trait that
/// resolves project-relative paths against a project root on the local disk.
///
/// Absolute paths are used as given.
#[derive(Debug, Clone)]
pub struct FsContentProvider {
    /// The project root (defaults to ".")
    root: PathBuf,
}

impl FsContentProvider {
    /// Creates a new FsContentProvider
    ///
    /// # Arguments
    /// * `root` - Optional project root. If None, defaults to "."
    pub fn new(root: Option<PathBuf>) -> Self {
        Self {
            root: root.unwrap_or_else(|| PathBuf::from(".")),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolves a mapping-document path to a location on disk
    pub fn resolve(&self, path: &str) -> PathBuf {
        let p = Path::new(path);
        if p.is_absolute() {
            p.to_path_buf()
        } else {
            self.root.join(p)
        }
    }
}

impl ContentProvider for FsContentProvider {
    fn read(&self, path: &str) -> Result<String, ProviderError> {
        let full = self.resolve(path);
        fs::read_to_string(&full).map_err(|source| ProviderError::Read { path: full, source })
    }

    /// Writes the file, creating parent directories if they don't exist
    fn write(&self, path: &str, content: &str) -> Result<(), ProviderError> {
        let full = self.resolve(path);

        if let Some(dir) = full.parent() {
            fs::create_dir_all(dir).map_err(|source| ProviderError::Write {
                path: dir.to_path_buf(),
                source,
            })?;
        }

        fs::write(&full, content).map_err(|source| ProviderError::Write { path: full, source })
    }

    fn delete(&self, path: &str) -> Result<(), ProviderError> {
        let full = self.resolve(path);
        match fs::remove_file(&full) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(ProviderError::Delete { path: full, source }),
        }
    }

    fn exists(&self, path: &str) -> bool {
        self.resolve(path).exists()
    }

    fn hash(&self, path: &str) -> Result<String, HashError> {
        content_hash::hash_file(&self.resolve(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_resolution() {
        let provider = FsContentProvider::new(Some(PathBuf::from("/tmp/project")));
        assert_eq!(
            provider.resolve("src/app.ts"),
            PathBuf::from("/tmp/project/src/app.ts")
        );
        assert_eq!(provider.resolve("/etc/hosts"), PathBuf::from("/etc/hosts"));
    }

    #[test]
    fn test_read_write_delete() {
        let dir = tempfile::tempdir().unwrap();
        let provider = FsContentProvider::new(Some(dir.path().to_path_buf()));

        assert!(!provider.exists("nested/file.txt"));
        assert!(provider.read("nested/file.txt").is_err());

        provider.write("nested/file.txt", "value").unwrap();
        assert!(provider.exists("nested/file.txt"));
        assert_eq!(provider.read("nested/file.txt").unwrap(), "value");

        provider.delete("nested/file.txt").unwrap();
        assert!(!provider.exists("nested/file.txt"));

        // Deleting twice is fine
        provider.delete("nested/file.txt").unwrap();
    }

    #[test]
    fn test_hash_tracks_content() {
        let dir = tempfile::tempdir().unwrap();
        let provider = FsContentProvider::new(Some(dir.path().to_path_buf()));

        provider.write("a.txt", "one").unwrap();
        let first = provider.hash("a.txt").unwrap();
        assert_eq!(first, provider.hash("a.txt").unwrap());

        provider.write("a.txt", "two").unwrap();
        assert_ne!(first, provider.hash("a.txt").unwrap());

        assert!(provider.hash("missing.txt").unwrap_err().is_not_found());
    }

    #[test]
    fn test_default_root() {
        let provider = FsContentProvider::new(None);
        assert_eq!(provider.root(), Path::new("."));
    }
}
