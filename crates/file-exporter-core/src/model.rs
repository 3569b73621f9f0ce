//! Plain data types shared by the walker, the change source and the update loop.

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};

/// One filesystem object as reported without following symbolic links.
///
/// For a symlink, `size_bytes` is the size of the link itself and
/// `is_directory` is always `false`, even when the target is a directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryEntry {
    pub path: PathBuf,
    pub size_bytes: u64,
    pub is_directory: bool,
}

/// Kind of mutation reported by the change source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    Create,
    Write,
    Remove,
    Rename,
    Chmod,
}

impl OperationKind {
    pub const ALL: [OperationKind; 5] = [
        OperationKind::Create,
        OperationKind::Write,
        OperationKind::Remove,
        OperationKind::Rename,
        OperationKind::Chmod,
    ];

    /// Label value used in the last-update series.
    pub fn as_str(self) -> &'static str {
        match self {
            OperationKind::Create => "CREATE",
            OperationKind::Write => "WRITE",
            OperationKind::Remove => "REMOVE",
            OperationKind::Rename => "RENAME",
            OperationKind::Chmod => "CHMOD",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single change notification for the watched directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub kind: OperationKind,
    pub path: PathBuf,
    /// When the notification reached this process.
    pub observed_at: DateTime<Utc>,
}

impl ChangeEvent {
    pub fn new(kind: OperationKind, path: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            path: path.into(),
            observed_at: Utc::now(),
        }
    }
}

/// Seconds since the Unix epoch with millisecond precision, as published in gauges.
pub fn unix_seconds(at: DateTime<Utc>) -> f64 {
    at.timestamp_millis() as f64 / 1000.0
}
