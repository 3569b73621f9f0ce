//! Recursive directory sizer.
//!
//! Computes the total byte size of a directory tree by depth-first descent
//! without following symbolic links. The walk uses an explicit stack, so tree
//! depth is bounded by [`DirectorySizer::max_depth`] rather than by the call
//! stack.
//!
//! Every call re-walks the whole subtree; nothing is cached between calls.
//!
//! ```
//! use file_exporter_core::walker::{DirectorySizer, MockFs, MOCK_DIR_SIZE};
//!
//! let fs = MockFs::new();
//! fs.add_file("/data/a.bin", 100);
//!
//! let sizer = DirectorySizer::new(fs);
//! assert_eq!(sizer.compute_size("/data").unwrap(), 100 + MOCK_DIR_SIZE);
//! ```

pub mod mock;
pub mod traits;

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

pub use mock::{MOCK_DIR_SIZE, MockFs};
pub use traits::{FileSystem, RealFs};

/// Default limit on directory nesting below the root.
pub const DEFAULT_MAX_DEPTH: usize = 1024;

/// Error type for a failed scan. Any of these abandons the whole scan.
#[derive(Debug)]
pub enum WalkError {
    /// The root itself could not be stat'd.
    Root { path: PathBuf, source: io::Error },
    /// A directory could not be opened or listed.
    Open { path: PathBuf, source: io::Error },
    /// A directory sits deeper than the configured maximum.
    TooDeep { path: PathBuf, max_depth: usize },
}

impl WalkError {
    /// Path of the entry that stopped the walk.
    pub fn path(&self) -> &Path {
        match self {
            WalkError::Root { path, .. }
            | WalkError::Open { path, .. }
            | WalkError::TooDeep { path, .. } => path,
        }
    }
}

impl fmt::Display for WalkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WalkError::Root { path, source } => {
                write!(f, "cannot stat {}: {}", path.display(), source)
            }
            WalkError::Open { path, source } => {
                write!(f, "cannot read directory {}: {}", path.display(), source)
            }
            WalkError::TooDeep { path, max_depth } => write!(
                f,
                "directory {} exceeds maximum depth {}",
                path.display(),
                max_depth
            ),
        }
    }
}

impl std::error::Error for WalkError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            WalkError::Root { source, .. } | WalkError::Open { source, .. } => Some(source),
            WalkError::TooDeep { .. } => None,
        }
    }
}

/// Sums the link-level sizes of every entry reachable from a root.
#[derive(Debug, Clone)]
pub struct DirectorySizer<F: FileSystem> {
    fs: F,
    max_depth: usize,
}

impl<F: FileSystem> DirectorySizer<F> {
    /// Creates a sizer with [`DEFAULT_MAX_DEPTH`].
    pub fn new(fs: F) -> Self {
        Self {
            fs,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }

    /// Sets the deepest directory level (root = 0) that will still be listed.
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Computes the total size in bytes of `root` and everything below it.
    ///
    /// The root's own reported size is included. Children are sized from the
    /// status returned by the listing, so a symlink to a directory counts only
    /// as the link itself and link cycles are never entered.
    pub fn compute_size(&self, root: impl AsRef<Path>) -> Result<u64, WalkError> {
        let root = root.as_ref();
        let root_entry = self
            .fs
            .symlink_metadata(root)
            .map_err(|source| WalkError::Root {
                path: root.to_path_buf(),
                source,
            })?;

        let mut total = root_entry.size_bytes;
        if !root_entry.is_directory {
            return Ok(total);
        }

        let mut stack: Vec<(PathBuf, usize)> = vec![(root_entry.path, 0)];
        while let Some((dir, depth)) = stack.pop() {
            if depth > self.max_depth {
                return Err(WalkError::TooDeep {
                    path: dir,
                    max_depth: self.max_depth,
                });
            }

            let children = match self.fs.read_dir(&dir) {
                Ok(children) => children,
                Err(source) => return Err(WalkError::Open { path: dir, source }),
            };

            for child in children {
                total = total.saturating_add(child.size_bytes);
                if child.is_directory {
                    stack.push((child.path, depth + 1));
                }
            }
        }

        Ok(total)
    }
}
