//! Read-only snapshot interface
//!
//! The browse and query front-ends consume published snapshots through
//! this module only; nothing here ever writes.

use crate::entry::{Kind, Rollup, ScanMeta};
use crate::error::DbResult;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use std::path::Path;

/// Sort order for directory listings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortKey {
    Name,
    #[default]
    Size,
    Blocks,
    Files,
}

impl SortKey {
    fn order_clause(self) -> &'static str {
        match self {
            SortKey::Name => "name ASC",
            SortKey::Size => "total_size DESC",
            SortKey::Blocks => "total_blocks DESC",
            SortKey::Files => "total_files DESC",
        }
    }
}

/// One row of a directory listing: an entry or a child directory joined
/// with its rollup totals.
#[derive(Debug, Clone)]
pub struct DisplayEntry {
    pub path: String,
    pub name: String,
    pub kind: Kind,
    pub size: i64,
    pub blocks: i64,
    pub mtime: i64,
    pub total_size: i64,
    pub total_blocks: i64,
    pub total_files: i64,
    pub total_dirs: i64,
}

/// Open a published snapshot read-only with the read-tuning profile
pub fn open_snapshot(path: &Path) -> DbResult<Connection> {
    let conn = Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )?;
    conn.execute_batch(
        "PRAGMA cache_size = -64000;
         PRAGMA temp_store = MEMORY;
         PRAGMA mmap_size = 268435456;
         PRAGMA query_only = ON;",
    )?;
    Ok(conn)
}

/// Look up a directory's id by its absolute path
pub fn dir_id_by_path(conn: &Connection, path: &str) -> DbResult<Option<i64>> {
    let id = conn
        .query_row("SELECT id FROM dirs WHERE path = ?1", params![path], |row| {
            row.get(0)
        })
        .optional()?;
    Ok(id)
}

/// Load the children of one directory: subdirectories joined with their
/// rollups, plus non-directory entries, in one sorted listing.
pub fn load_children(
    conn: &Connection,
    parent_path: &str,
    sort: SortKey,
    limit: usize,
) -> DbResult<Vec<DisplayEntry>> {
    let parent_id = match dir_id_by_path(conn, parent_path)? {
        Some(id) => id,
        None => return Ok(Vec::new()),
    };

    let query = format!(
        "SELECT d.path, d.name, 1 AS kind, 0 AS size, 0 AS blocks, 0 AS mtime,
                COALESCE(r.total_size, 0) AS total_size,
                COALESCE(r.total_blocks, 0) AS total_blocks,
                COALESCE(r.total_files, 0) AS total_files,
                COALESCE(r.total_dirs, 0) AS total_dirs
         FROM dirs d
         LEFT JOIN rollups r ON r.dir_id = d.id
         WHERE d.parent_id = ?1

         UNION ALL

         SELECT (pd.path || '/' || e.name) AS path, e.name, e.kind, e.size, e.blocks, e.mtime,
                e.size AS total_size,
                e.blocks AS total_blocks,
                CASE WHEN e.kind = 0 THEN 1 ELSE 0 END AS total_files,
                0 AS total_dirs
         FROM entries e
         JOIN dirs pd ON pd.id = e.parent_id
         WHERE e.parent_id = ?1
         ORDER BY {}
         LIMIT ?2",
        sort.order_clause()
    );

    let mut stmt = conn.prepare(&query)?;
    let rows = stmt.query_map(params![parent_id, limit as i64], |row| {
        Ok(DisplayEntry {
            path: row.get(0)?,
            name: row.get(1)?,
            kind: Kind::from_db_int(row.get(2)?),
            size: row.get(3)?,
            blocks: row.get(4)?,
            mtime: row.get(5)?,
            total_size: row.get(6)?,
            total_blocks: row.get(7)?,
            total_files: row.get(8)?,
            total_dirs: row.get(9)?,
        })
    })?;

    let mut entries = Vec::new();
    for row in rows {
        entries.push(row?);
    }
    Ok(entries)
}

/// Retrieve the rollup for one directory path, if present
pub fn get_rollup(conn: &Connection, path: &str) -> DbResult<Option<Rollup>> {
    let dir_id = match dir_id_by_path(conn, path)? {
        Some(id) => id,
        None => return Ok(None),
    };

    let rollup = conn
        .query_row(
            "SELECT total_size, total_blocks, total_files, total_dirs
             FROM rollups WHERE dir_id = ?1",
            params![dir_id],
            |row| {
                Ok(Rollup {
                    dir_id,
                    total_size: row.get(0)?,
                    total_blocks: row.get(1)?,
                    total_files: row.get(2)?,
                    total_dirs: row.get(3)?,
                })
            },
        )
        .optional()?;
    Ok(rollup)
}

/// Retrieve the scan metadata row
pub fn get_scan_meta(conn: &Connection) -> DbResult<ScanMeta> {
    let meta = conn.query_row(
        "SELECT root_path, start_time, COALESCE(end_time, 0), total_size, total_blocks,
                file_count, dir_count, error_count
         FROM scan_meta WHERE id = 1",
        [],
        |row| {
            Ok(ScanMeta {
                root_path: row.get(0)?,
                start_time: row.get(1)?,
                end_time: row.get(2)?,
                total_size: row.get(3)?,
                total_blocks: row.get(4)?,
                file_count: row.get(5)?,
                dir_count: row.get(6)?,
                error_count: row.get(7)?,
            })
        },
    )?;
    Ok(meta)
}
