//! Abstractions for filesystem access to enable testing and mocking.
//!
//! The `FileSystem` trait lets the walker run against the real filesystem or
//! against an in-memory tree, so symlink and permission edge cases can be
//! tested deterministically (even when tests run as root).

use std::io;
use std::path::Path;

use crate::model::DirectoryEntry;

/// Abstraction for the two filesystem operations the walker needs.
///
/// Neither operation may follow symbolic links.
pub trait FileSystem: Send + Sync {
    /// Returns the status of `path` itself, without dereferencing a symlink.
    fn symlink_metadata(&self, path: &Path) -> io::Result<DirectoryEntry>;

    /// Lists the immediate children of a directory with their link-level status.
    ///
    /// The returned listing owns no open handle: the directory is closed
    /// before this returns.
    fn read_dir(&self, path: &Path) -> io::Result<Vec<DirectoryEntry>>;

    /// Checks if a path exists.
    fn exists(&self, path: &Path) -> bool {
        self.symlink_metadata(path).is_ok()
    }
}

/// Real filesystem implementation that delegates to `std::fs`.
#[derive(Debug, Default, Clone, Copy)]
pub struct RealFs;

impl RealFs {
    /// Creates a new `RealFs` instance.
    pub fn new() -> Self {
        Self
    }
}

impl FileSystem for RealFs {
    fn symlink_metadata(&self, path: &Path) -> io::Result<DirectoryEntry> {
        let metadata = std::fs::symlink_metadata(path)?;
        Ok(DirectoryEntry {
            path: path.to_path_buf(),
            size_bytes: metadata.len(),
            is_directory: metadata.is_dir(),
        })
    }

    fn read_dir(&self, path: &Path) -> io::Result<Vec<DirectoryEntry>> {
        let entries = std::fs::read_dir(path)?;
        let mut listing = Vec::new();
        for entry in entries {
            let entry = entry?;
            // DirEntry::metadata does not traverse symlinks.
            let metadata = match entry.metadata() {
                Ok(m) => m,
                // Removed between listing and stat: it no longer contributes.
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e),
            };
            listing.push(DirectoryEntry {
                path: entry.path(),
                size_bytes: metadata.len(),
                is_directory: metadata.is_dir(),
            });
        }
        Ok(listing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_real_fs_symlink_metadata_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.bin");
        std::fs::write(&path, [0u8; 42]).unwrap();

        let entry = RealFs::new().symlink_metadata(&path).unwrap();
        assert_eq!(entry.size_bytes, 42);
        assert!(!entry.is_directory);
        assert_eq!(entry.path, path);
    }

    #[test]
    fn test_real_fs_exists() {
        let dir = tempfile::tempdir().unwrap();
        let fs = RealFs::new();
        assert!(fs.exists(dir.path()));
        assert!(!fs.exists(&dir.path().join("missing")));
    }

    #[test]
    fn test_real_fs_read_dir_lists_children_only() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a"), b"abc").unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("sub").join("nested"), b"x").unwrap();

        let mut entries = RealFs::new().read_dir(dir.path()).unwrap();
        entries.sort_by(|a, b| a.path.cmp(&b.path));

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].size_bytes, 3);
        assert!(!entries[0].is_directory);
        assert!(entries[1].is_directory);
    }

    #[cfg(unix)]
    #[test]
    fn test_real_fs_does_not_follow_symlinks() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("target");
        std::fs::create_dir(&target).unwrap();
        std::os::unix::fs::symlink(&target, dir.path().join("link")).unwrap();

        let fs = RealFs::new();
        let link = fs.symlink_metadata(&dir.path().join("link")).unwrap();
        assert!(!link.is_directory);

        let listed = fs
            .read_dir(dir.path())
            .unwrap()
            .into_iter()
            .find(|e| e.path.ends_with("link"))
            .unwrap();
        assert!(!listed.is_directory);
    }
}
