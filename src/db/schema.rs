//! Store schema and tuning profiles
//!
//! Defines the snapshot's relational layout and the SQLite pragma
//! profiles for the three phases of a snapshot's life: write-heavy
//! ingestion, post-load index builds, and read-only queries.
//!
//! Indexes are created after the data load; inserting into index-free
//! tables is dramatically faster at the tens-of-millions scale.

use crate::error::{DbError, DbResult};
use rusqlite::Connection;

const DIRS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS dirs (
    id INTEGER PRIMARY KEY,
    path TEXT UNIQUE NOT NULL,
    name TEXT NOT NULL,
    parent_id INTEGER,
    depth INTEGER NOT NULL
)
"#;

const ENTRIES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS entries (
    id INTEGER PRIMARY KEY,
    parent_id INTEGER NOT NULL,
    name TEXT NOT NULL,
    kind INTEGER NOT NULL,       -- 0=file, 1=dir, 2=symlink, 3=other
    size INTEGER NOT NULL,       -- apparent size in bytes
    blocks INTEGER NOT NULL,     -- disk usage in bytes (st_blocks * 512)
    mtime INTEGER NOT NULL,      -- unix timestamp
    dev_id INTEGER NOT NULL,
    inode INTEGER NOT NULL
)
"#;

const ROLLUPS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS rollups (
    dir_id INTEGER PRIMARY KEY,
    total_size INTEGER NOT NULL,
    total_blocks INTEGER NOT NULL,
    total_files INTEGER NOT NULL,
    total_dirs INTEGER NOT NULL
)
"#;

const SCAN_META_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS scan_meta (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    root_path TEXT NOT NULL,
    start_time INTEGER NOT NULL,
    end_time INTEGER,
    total_size INTEGER DEFAULT 0,
    total_blocks INTEGER DEFAULT 0,
    file_count INTEGER DEFAULT 0,
    dir_count INTEGER DEFAULT 0,
    error_count INTEGER DEFAULT 0
)
"#;

const SCAN_ERRORS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS scan_errors (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    path TEXT NOT NULL,
    message TEXT NOT NULL
)
"#;

/// Indexes built after the data load (skippable via index mode)
const INDEXES: &[&str] = &[
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_dirs_path ON dirs(path)",
    "CREATE INDEX IF NOT EXISTS idx_dirs_parent ON dirs(parent_id)",
    "CREATE INDEX IF NOT EXISTS idx_entries_parent ON entries(parent_id)",
    "CREATE INDEX IF NOT EXISTS idx_rollups_size ON rollups(total_size DESC)",
    "CREATE INDEX IF NOT EXISTS idx_rollups_blocks ON rollups(total_blocks DESC)",
    "CREATE INDEX IF NOT EXISTS idx_entries_parent_size ON entries(parent_id, size DESC)",
    "CREATE INDEX IF NOT EXISTS idx_entries_parent_blocks ON entries(parent_id, blocks DESC)",
];

/// SQLite pragmas for write-heavy ingestion
const WRITE_PRAGMAS: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;
PRAGMA cache_size = -64000;      -- 64MB cache
PRAGMA temp_store = MEMORY;
PRAGMA mmap_size = 268435456;    -- 256MB mmap
"#;

/// SQLite pragmas for read-only query sessions
const READ_PRAGMAS: &str = r#"
PRAGMA synchronous = NORMAL;
PRAGMA cache_size = -64000;
PRAGMA temp_store = MEMORY;
PRAGMA mmap_size = 268435456;
PRAGMA query_only = ON;
"#;

/// Create all tables
pub fn init_schema(conn: &Connection) -> DbResult<()> {
    for ddl in [
        DIRS_TABLE,
        ENTRIES_TABLE,
        ROLLUPS_TABLE,
        SCAN_META_TABLE,
        SCAN_ERRORS_TABLE,
    ] {
        conn.execute(ddl, [])?;
    }
    Ok(())
}

/// Apply the write-tuning profile for ingestion
pub fn apply_write_pragmas(conn: &Connection) -> DbResult<()> {
    conn.execute_batch(WRITE_PRAGMAS)?;
    Ok(())
}

/// Apply the read-tuning profile for query sessions
pub fn apply_read_pragmas(conn: &Connection) -> DbResult<()> {
    conn.execute_batch(READ_PRAGMAS)?;
    Ok(())
}

/// Configure temp storage for the index build. When `disk_temp` is true,
/// SQLite temp files go to disk (optionally under `tmp_dir`) instead of RAM.
pub fn apply_index_pragmas(
    conn: &Connection,
    disk_temp: bool,
    tmp_dir: Option<&std::path::Path>,
) -> DbResult<()> {
    if let Some(dir) = tmp_dir {
        std::fs::create_dir_all(dir).map_err(|e| DbError::TempDir {
            path: dir.to_path_buf(),
            source: e,
        })?;
        // SQLite reads this environment variable when opening temp files
        std::env::set_var("SQLITE_TMPDIR", dir);
    }

    let pragma = if disk_temp {
        "PRAGMA temp_store = FILE"
    } else {
        "PRAGMA temp_store = MEMORY"
    };
    conn.execute_batch(pragma)?;
    Ok(())
}

/// Create indexes after the initial data load
pub fn build_indexes(conn: &Connection) -> DbResult<()> {
    for idx in INDEXES {
        conn.execute(idx, [])?;
    }
    Ok(())
}

/// Prepare the store for publication: optimize, then switch journaling to
/// a portable mode so the file is a single self-contained artifact.
pub fn finalize(conn: &Connection) -> DbResult<()> {
    conn.execute_batch("PRAGMA optimize; PRAGMA journal_mode = DELETE;")?;
    Ok(())
}
