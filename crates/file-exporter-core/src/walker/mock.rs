//! In-memory mock filesystem for testing the walker without touching disk.
//!
//! Clones share the same tree, so a test can keep a handle and mutate the
//! filesystem while an update loop is scanning it.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use crate::model::DirectoryEntry;
use crate::walker::traits::FileSystem;

/// Self-size reported for directories added with [`MockFs::add_dir`].
pub const MOCK_DIR_SIZE: u64 = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NodeKind {
    File,
    Dir,
    Symlink,
}

#[derive(Debug, Clone)]
struct Node {
    kind: NodeKind,
    size: u64,
    /// Opening or listing this directory fails with `PermissionDenied`.
    denied: bool,
}

/// In-memory filesystem for testing.
#[derive(Debug, Clone, Default)]
pub struct MockFs {
    nodes: Arc<RwLock<HashMap<PathBuf, Node>>>,
}

impl MockFs {
    /// Creates a new empty mock filesystem.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a regular file of `size` bytes. Parent directories are created.
    pub fn add_file(&self, path: impl AsRef<Path>, size: u64) {
        self.insert(path.as_ref(), NodeKind::File, size);
    }

    /// Adds a directory reporting [`MOCK_DIR_SIZE`] as its own size.
    pub fn add_dir(&self, path: impl AsRef<Path>) {
        self.insert(path.as_ref(), NodeKind::Dir, MOCK_DIR_SIZE);
    }

    /// Adds a symbolic link whose own size is `size`. The target is never resolved.
    pub fn add_symlink(&self, path: impl AsRef<Path>, size: u64) {
        self.insert(path.as_ref(), NodeKind::Symlink, size);
    }

    /// Makes a directory unreadable (open/list fails).
    pub fn deny(&self, path: impl AsRef<Path>) {
        if let Some(node) = self.nodes.write().unwrap().get_mut(path.as_ref()) {
            node.denied = true;
        }
    }

    /// Makes a previously denied directory readable again.
    pub fn allow(&self, path: impl AsRef<Path>) {
        if let Some(node) = self.nodes.write().unwrap().get_mut(path.as_ref()) {
            node.denied = false;
        }
    }

    /// Removes a path and everything below it.
    pub fn remove(&self, path: impl AsRef<Path>) {
        let path = path.as_ref();
        self.nodes
            .write()
            .unwrap()
            .retain(|p, _| !p.starts_with(path));
    }

    fn insert(&self, path: &Path, kind: NodeKind, size: u64) {
        let mut nodes = self.nodes.write().unwrap();

        // Add parent directories
        let mut parent = path.parent();
        while let Some(p) = parent {
            if !p.as_os_str().is_empty() {
                nodes.entry(p.to_path_buf()).or_insert(Node {
                    kind: NodeKind::Dir,
                    size: MOCK_DIR_SIZE,
                    denied: false,
                });
            }
            parent = p.parent();
        }

        nodes.insert(
            path.to_path_buf(),
            Node {
                kind,
                size,
                denied: false,
            },
        );
    }
}

fn to_entry(path: &Path, node: &Node) -> DirectoryEntry {
    DirectoryEntry {
        path: path.to_path_buf(),
        size_bytes: node.size,
        is_directory: node.kind == NodeKind::Dir,
    }
}

impl FileSystem for MockFs {
    fn symlink_metadata(&self, path: &Path) -> io::Result<DirectoryEntry> {
        let nodes = self.nodes.read().unwrap();
        nodes.get(path).map(|n| to_entry(path, n)).ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, format!("not found: {:?}", path))
        })
    }

    fn read_dir(&self, path: &Path) -> io::Result<Vec<DirectoryEntry>> {
        let nodes = self.nodes.read().unwrap();
        match nodes.get(path) {
            Some(node) if node.kind == NodeKind::Dir && node.denied => {
                return Err(io::Error::new(
                    io::ErrorKind::PermissionDenied,
                    format!("permission denied: {:?}", path),
                ));
            }
            Some(node) if node.kind == NodeKind::Dir => {}
            Some(_) => {
                return Err(io::Error::new(
                    io::ErrorKind::Other,
                    format!("not a directory: {:?}", path),
                ));
            }
            None => {
                return Err(io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("directory not found: {:?}", path),
                ));
            }
        }

        Ok(nodes
            .iter()
            .filter(|(p, _)| p.parent() == Some(path))
            .map(|(p, n)| to_entry(p, n))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_fs_add_file_creates_parents() {
        let fs = MockFs::new();
        fs.add_file("/data/a/b.txt", 10);

        assert!(fs.exists(Path::new("/data/a/b.txt")));
        assert!(fs.symlink_metadata(Path::new("/data/a")).unwrap().is_directory);
        assert!(fs.symlink_metadata(Path::new("/data")).unwrap().is_directory);
    }

    #[test]
    fn test_mock_fs_read_dir() {
        let fs = MockFs::new();
        fs.add_file("/data/1/x", 1);
        fs.add_file("/data/1/y", 2);
        fs.add_file("/data/2/z", 3);

        assert_eq!(fs.read_dir(Path::new("/data")).unwrap().len(), 2);
        assert_eq!(fs.read_dir(Path::new("/data/1")).unwrap().len(), 2);
    }

    #[test]
    fn test_mock_fs_symlink_is_not_a_directory() {
        let fs = MockFs::new();
        fs.add_symlink("/data/link", 7);

        let entry = fs.symlink_metadata(Path::new("/data/link")).unwrap();
        assert!(!entry.is_directory);
        assert_eq!(entry.size_bytes, 7);
        assert!(fs.read_dir(Path::new("/data/link")).is_err());
    }

    #[test]
    fn test_mock_fs_deny_and_allow() {
        let fs = MockFs::new();
        fs.add_dir("/data/locked");
        fs.deny("/data/locked");

        let err = fs.read_dir(Path::new("/data/locked")).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::PermissionDenied);

        fs.allow("/data/locked");
        assert!(fs.read_dir(Path::new("/data/locked")).is_ok());
    }

    #[test]
    fn test_mock_fs_remove_subtree() {
        let fs = MockFs::new();
        fs.add_file("/data/sub/f", 5);
        fs.remove("/data/sub");

        assert!(!fs.exists(Path::new("/data/sub")));
        assert!(!fs.exists(Path::new("/data/sub/f")));
        assert!(fs.exists(Path::new("/data")));
    }

    #[test]
    fn test_mock_fs_clones_share_tree() {
        let fs = MockFs::new();
        let handle = fs.clone();
        handle.add_file("/data/late", 1);
        assert!(fs.exists(Path::new("/data/late")));
    }
}
