//! Snapshot lifecycle management
//!
//! Wraps the scan pipeline in the full snapshot workflow: take the
//! output-directory lock, create a hidden temporary store, run the scan,
//! build indexes, finalize, atomically publish the timestamped snapshot,
//! refresh the `latest.db` symlink, and prune old snapshots per the
//! retention policy. Every phase releases its resources on failure; a
//! cancelled or failed scan leaves no published snapshot behind.

use crate::cancel::CancelToken;
use crate::config::{IndexMode, ScanOptions};
use crate::db::schema;
use crate::error::{DbError, DugError, LockError, Result};
use crate::progress::{ProgressCounters, ProgressSnapshot, Stage};
use crate::walker::{Scanner, ROOT_DIR_ID};
use chrono::Utc;
use fs2::FileExt;
use rusqlite::{params, Connection, OptionalExtension};
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

/// Snapshot filename prefix
const SNAPSHOT_PREFIX: &str = "dug-";

/// Snapshot filename suffix
const SNAPSHOT_SUFFIX: &str = ".db";

/// Lock file name inside the output directory
const LOCK_FILE: &str = ".dug.lock";

/// Name of the latest-snapshot symlink
const LATEST_LINK: &str = "latest.db";

/// Callback invoked with progress snapshots while the scan phase runs
pub type ProgressFn = dyn Fn(ProgressSnapshot) + Send + Sync;

/// Callback invoked on stage transitions
pub type StageFn = dyn Fn(Stage) + Send + Sync;

/// Advisory lock on the output directory, released on drop
struct ScanLock {
    file: File,
}

impl ScanLock {
    fn acquire(out_dir: &Path) -> std::result::Result<Self, LockError> {
        let lock_path = out_dir.join(LOCK_FILE);
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&lock_path)
            .map_err(|e| LockError::CreateFailed {
                path: lock_path.clone(),
                source: e,
            })?;

        file.try_lock_exclusive().map_err(|_| LockError::InProgress {
            dir: out_dir.to_path_buf(),
        })?;

        Ok(Self { file })
    }
}

impl Drop for ScanLock {
    fn drop(&mut self) {
        // flock releases on close anyway; the explicit unlock keeps the
        // release visible to a waiting process immediately
        let _ = fs2::FileExt::unlock(&self.file);
    }
}

/// Removes the temporary store unless the scan published it
struct TempStore {
    path: PathBuf,
    published: bool,
}

impl TempStore {
    fn new(path: PathBuf) -> Self {
        Self {
            path,
            published: false,
        }
    }

    fn publish(&mut self) {
        self.published = true;
    }
}

impl Drop for TempStore {
    fn drop(&mut self) {
        if !self.published {
            let _ = fs::remove_file(&self.path);
            // WAL sidecars outlive an aborted store
            for suffix in ["-wal", "-shm"] {
                let _ = fs::remove_file(PathBuf::from(format!(
                    "{}{suffix}",
                    self.path.display()
                )));
            }
        }
    }
}

/// Handles the scan lifecycle including locking and retention
pub struct SnapshotManager {
    out_dir: PathBuf,
    progress_fn: Option<Arc<ProgressFn>>,
    stage_fn: Option<Arc<StageFn>>,
}

impl SnapshotManager {
    pub fn new(out_dir: impl Into<PathBuf>) -> Self {
        Self {
            out_dir: out_dir.into(),
            progress_fn: None,
            stage_fn: None,
        }
    }

    /// Set a callback for progress updates during the scan
    pub fn set_progress_fn(&mut self, f: impl Fn(ProgressSnapshot) + Send + Sync + 'static) {
        self.progress_fn = Some(Arc::new(f));
    }

    /// Set a callback for stage transitions
    pub fn set_stage_fn(&mut self, f: impl Fn(Stage) + Send + Sync + 'static) {
        self.stage_fn = Some(Arc::new(f));
    }

    fn stage(&self, stage: Stage) {
        if let Some(f) = &self.stage_fn {
            f(stage);
        }
    }

    /// Execute a complete scan workflow and return the published
    /// snapshot path.
    pub fn run_scan(
        &self,
        root: &Path,
        opts: &ScanOptions,
        cancel: &CancelToken,
    ) -> Result<PathBuf> {
        fs::create_dir_all(&self.out_dir)?;

        let _lock = ScanLock::acquire(&self.out_dir)?;

        if cancel.is_cancelled() {
            return Err(DugError::Cancelled);
        }

        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        let mut temp = TempStore::new(self.out_dir.join(format!(".dug-temp-{nanos}.db")));

        let conn = Connection::open(&temp.path).map_err(|e| {
            DugError::Db(DbError::CreateFailed {
                path: temp.path.clone(),
                reason: e.to_string(),
            })
        })?;

        schema::init_schema(&conn).map_err(DugError::Db)?;
        schema::apply_write_pragmas(&conn).map_err(DugError::Db)?;

        let counters = Arc::new(ProgressCounters::default());
        seed_root(&conn, root).map_err(DugError::Db)?;
        counters.set_dirs(1);

        self.stage(Stage::Scan);
        let progress_stop = CancelToken::new();
        let progress_handle = self.spawn_progress_reporter(&counters, &progress_stop);

        let scanner = Scanner::new(opts.clone(), Arc::clone(&counters), cancel.clone());
        let scan_result = scanner.run(root, conn);

        progress_stop.cancel();
        if let Some(handle) = progress_handle {
            let _ = handle.join();
        }

        let conn = scan_result?;

        write_scan_totals(&conn, counters.errors() as i64).map_err(DugError::Db)?;

        if cancel.is_cancelled() {
            return Err(DugError::Cancelled);
        }

        if opts.index_mode != IndexMode::Skip {
            self.stage(Stage::Indexes);
            schema::apply_index_pragmas(
                &conn,
                opts.index_mode == IndexMode::Disk,
                opts.sqlite_tmp_dir.as_deref(),
            )
            .map_err(DugError::Db)?;
            schema::build_indexes(&conn).map_err(DugError::Db)?;
        }

        if cancel.is_cancelled() {
            return Err(DugError::Cancelled);
        }

        self.stage(Stage::Finalize);
        schema::finalize(&conn).map_err(DugError::Db)?;
        drop(conn);

        // Millisecond precision keeps same-second scans from colliding
        // while preserving lexicographic-chronological filename order.
        let final_name = format!(
            "{}{}{}",
            SNAPSHOT_PREFIX,
            Utc::now().format("%Y%m%d-%H%M%S%.3f"),
            SNAPSHOT_SUFFIX
        );
        let final_path = self.out_dir.join(&final_name);

        fs::rename(&temp.path, &final_path)?;
        temp.publish();
        info!(snapshot = %final_path.display(), "snapshot published");

        self.update_latest_link(&final_name);
        self.prune_old_snapshots(opts.retention);

        Ok(final_path)
    }

    /// Resolve the `latest.db` symlink to a concrete snapshot path
    pub fn latest(&self) -> Result<PathBuf> {
        let latest = self.out_dir.join(LATEST_LINK);
        Ok(fs::canonicalize(latest)?)
    }

    /// All retained snapshots, sorted by name (chronological)
    pub fn list_snapshots(&self) -> Result<Vec<PathBuf>> {
        let mut snapshots = Vec::new();
        for dirent in fs::read_dir(&self.out_dir)? {
            let dirent = dirent?;
            let name = dirent.file_name().to_string_lossy().into_owned();
            if is_snapshot_name(&name) && dirent.file_type()?.is_file() {
                snapshots.push(dirent.path());
            }
        }
        snapshots.sort();
        Ok(snapshots)
    }

    fn spawn_progress_reporter(
        &self,
        counters: &Arc<ProgressCounters>,
        stop: &CancelToken,
    ) -> Option<thread::JoinHandle<()>> {
        let progress_fn = self.progress_fn.clone()?;
        let counters = Arc::clone(counters);
        let stop = stop.clone();
        let handle = thread::Builder::new()
            .name("scan-progress".into())
            .spawn(move || {
                while !stop.is_cancelled() {
                    progress_fn(counters.snapshot());
                    thread::sleep(Duration::from_millis(100));
                }
                // One final update so the display lands on the end state
                progress_fn(counters.snapshot());
            })
            .expect("failed to spawn progress thread");
        Some(handle)
    }

    /// Refresh the latest pointer atomically via temp symlink + rename.
    /// Failure here is a warning, never fatal: the snapshot itself is
    /// already published.
    fn update_latest_link(&self, final_name: &str) {
        let latest = self.out_dir.join(LATEST_LINK);
        let temp_link = self.out_dir.join(".latest.db.tmp");

        let _ = fs::remove_file(&temp_link);
        match std::os::unix::fs::symlink(final_name, &temp_link) {
            Ok(()) => {
                if let Err(e) = fs::rename(&temp_link, &latest) {
                    let _ = fs::remove_file(&temp_link);
                    warn!("failed to update {LATEST_LINK} symlink: {e}");
                }
            }
            Err(e) => warn!("failed to create {LATEST_LINK} symlink: {e}"),
        }
    }

    /// Delete the oldest snapshots until at most `retention` remain.
    /// Zero disables pruning.
    fn prune_old_snapshots(&self, retention: usize) {
        if retention == 0 {
            return;
        }

        let snapshots = match self.list_snapshots() {
            Ok(s) => s,
            Err(e) => {
                warn!("failed to list snapshots for pruning: {e}");
                return;
            }
        };

        if snapshots.len() <= retention {
            return;
        }

        for old in &snapshots[..snapshots.len() - retention] {
            match fs::remove_file(old) {
                Ok(()) => debug!(snapshot = %old.display(), "pruned old snapshot"),
                Err(e) => warn!("failed to prune {}: {e}", old.display()),
            }
        }
    }
}

fn is_snapshot_name(name: &str) -> bool {
    name.starts_with(SNAPSHOT_PREFIX) && name.ends_with(SNAPSHOT_SUFFIX)
}

/// Insert the root's directory row and the scan_meta start row
fn seed_root(conn: &Connection, root: &Path) -> std::result::Result<(), DbError> {
    let name = root
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| root.to_string_lossy().into_owned());

    conn.execute(
        "INSERT OR REPLACE INTO dirs (id, path, name, parent_id, depth) VALUES (?1, ?2, ?3, 0, 0)",
        params![ROOT_DIR_ID, root.to_string_lossy(), name],
    )?;
    conn.execute(
        "INSERT OR REPLACE INTO scan_meta (id, root_path, start_time) VALUES (1, ?1, ?2)",
        params![root.to_string_lossy(), Utc::now().timestamp()],
    )?;
    Ok(())
}

/// Write the scan_meta completion fields. Totals come from the root's
/// rollup row; counts from the stored tables, so the invariants between
/// scan_meta and the table contents hold by construction.
fn write_scan_totals(conn: &Connection, error_count: i64) -> std::result::Result<(), DbError> {
    let (total_size, total_blocks) = conn
        .query_row(
            "SELECT total_size, total_blocks FROM rollups WHERE dir_id = ?1",
            params![ROOT_DIR_ID],
            |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?)),
        )
        .optional()?
        .unwrap_or((0, 0));

    let file_count: i64 =
        conn.query_row("SELECT COUNT(*) FROM entries WHERE kind = 0", [], |row| {
            row.get(0)
        })?;
    let dir_count: i64 = conn.query_row("SELECT COUNT(*) FROM dirs", [], |row| row.get(0))?;

    conn.execute(
        "UPDATE scan_meta SET end_time = ?1, total_size = ?2, total_blocks = ?3,
                 file_count = ?4, dir_count = ?5, error_count = ?6 WHERE id = 1",
        params![
            Utc::now().timestamp(),
            total_size,
            total_blocks,
            file_count,
            dir_count,
            error_count
        ],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_lock_contention() {
        let dir = tempdir().unwrap();

        let first = ScanLock::acquire(dir.path()).unwrap();
        let second = ScanLock::acquire(dir.path());
        assert!(matches!(second, Err(LockError::InProgress { .. })));

        drop(first);
        assert!(ScanLock::acquire(dir.path()).is_ok());
    }

    #[test]
    fn test_temp_store_cleanup_on_drop() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(".dug-temp-1.db");
        fs::write(&path, b"junk").unwrap();

        let temp = TempStore::new(path.clone());
        drop(temp);
        assert!(!path.exists());
    }

    #[test]
    fn test_temp_store_kept_when_published() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(".dug-temp-2.db");
        fs::write(&path, b"junk").unwrap();

        let mut temp = TempStore::new(path.clone());
        temp.publish();
        drop(temp);
        assert!(path.exists());
    }

    #[test]
    fn test_snapshot_name_matching() {
        assert!(is_snapshot_name("dug-20260101-000000.000.db"));
        assert!(is_snapshot_name("dug-20260101-000000.db"));
        assert!(!is_snapshot_name("latest.db"));
        assert!(!is_snapshot_name(".dug-temp-5.db"));
        assert!(!is_snapshot_name("dug-20260101.txt"));
        assert!(!is_snapshot_name(".dug.lock"));
    }

    #[test]
    fn test_prune_keeps_newest() {
        let dir = tempdir().unwrap();
        for stamp in ["20260101-000001", "20260101-000002", "20260101-000003"] {
            fs::write(dir.path().join(format!("dug-{stamp}.db")), b"x").unwrap();
        }

        let mgr = SnapshotManager::new(dir.path());
        mgr.prune_old_snapshots(2);

        let remaining = mgr.list_snapshots().unwrap();
        assert_eq!(remaining.len(), 2);
        assert!(remaining[0].ends_with("dug-20260101-000002.db"));
        assert!(remaining[1].ends_with("dug-20260101-000003.db"));
    }

    #[test]
    fn test_prune_disabled_with_zero_retention() {
        let dir = tempdir().unwrap();
        for stamp in ["20260101-000001", "20260101-000002"] {
            fs::write(dir.path().join(format!("dug-{stamp}.db")), b"x").unwrap();
        }

        let mgr = SnapshotManager::new(dir.path());
        mgr.prune_old_snapshots(0);
        assert_eq!(mgr.list_snapshots().unwrap().len(), 2);
    }
}
