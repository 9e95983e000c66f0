//! Record types flowing through the scan pipeline
//!
//! These are the units of work exchanged over the pipeline channels and
//! persisted to the store: non-directory entries, directory rows,
//! per-directory completion records, recursive rollups, sampled scan
//! errors, and the single scan-meta row.

use std::fs::FileType;
use std::path::PathBuf;

/// Classification of a filesystem entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Kind {
    /// Regular file
    File = 0,
    /// Directory
    Dir = 1,
    /// Symbolic link
    Symlink = 2,
    /// Anything else (fifo, socket, device)
    Other = 3,
}

impl Kind {
    /// Classify from a file type obtained via a non-following status call
    pub fn from_file_type(ft: FileType) -> Self {
        if ft.is_file() {
            Kind::File
        } else if ft.is_dir() {
            Kind::Dir
        } else if ft.is_symlink() {
            Kind::Symlink
        } else {
            Kind::Other
        }
    }

    /// Database integer representation
    pub fn as_db_int(self) -> i64 {
        self as i64
    }

    /// Convert from the database integer representation
    pub fn from_db_int(value: i64) -> Self {
        match value {
            0 => Kind::File,
            1 => Kind::Dir,
            2 => Kind::Symlink,
            _ => Kind::Other,
        }
    }

    pub fn is_file(self) -> bool {
        self == Kind::File
    }

    pub fn is_dir(self) -> bool {
        self == Kind::Dir
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Kind::File => "file",
            Kind::Dir => "dir",
            Kind::Symlink => "symlink",
            Kind::Other => "other",
        }
    }
}

/// A non-directory filesystem entry to be stored in the database
#[derive(Debug, Clone)]
pub struct Entry {
    /// Directory id of the containing directory
    pub parent_id: i64,
    /// Leaf name
    pub name: String,
    /// Entry classification (never `Kind::Dir`)
    pub kind: Kind,
    /// Apparent size in bytes (st_size)
    pub size: i64,
    /// Disk usage in bytes (st_blocks * 512)
    pub blocks: i64,
    /// Modification time (unix seconds)
    pub mtime: i64,
    /// Device id
    pub dev_id: u64,
    /// Inode number
    pub inode: u64,
}

/// A directory row
#[derive(Debug, Clone)]
pub struct Dir {
    /// Stable directory id (root = 1, assigned monotonically)
    pub id: i64,
    /// Absolute path
    pub path: PathBuf,
    /// Leaf name
    pub name: String,
    /// Parent directory id (0 for the root)
    pub parent_id: i64,
    /// Depth below the root (root = 0)
    pub depth: i64,
}

/// Per-directory completion record, emitted exactly once per directory
/// after its own listing finishes. Carries direct (non-recursive) file
/// totals and the number of immediate child directories the aggregator
/// should expect.
#[derive(Debug, Clone, Copy)]
pub struct DirCompletion {
    pub dir_id: i64,
    pub parent_id: i64,
    /// Sum of direct regular-file apparent sizes
    pub file_size: i64,
    /// Sum of direct regular-file disk bytes
    pub file_blocks: i64,
    /// Count of direct regular files
    pub file_count: i64,
    /// Number of immediate child directories emitted for this directory
    pub child_dirs: i64,
}

/// Recursive aggregate for a directory: totals over all descendants
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Rollup {
    pub dir_id: i64,
    pub total_size: i64,
    pub total_blocks: i64,
    pub total_files: i64,
    pub total_dirs: i64,
}

/// A sampled per-path scan error
#[derive(Debug, Clone)]
pub struct ScanError {
    pub path: String,
    pub message: String,
}

/// Metadata about a completed scan (single row, id = 1)
#[derive(Debug, Clone)]
pub struct ScanMeta {
    pub root_path: String,
    /// Unix seconds; written at scan start
    pub start_time: i64,
    /// Unix seconds; 0 until finalize
    pub end_time: i64,
    pub total_size: i64,
    pub total_blocks: i64,
    pub file_count: i64,
    pub dir_count: i64,
    pub error_count: i64,
}
