//! Scan pipeline orchestration
//!
//! Builds the bounded channels, seeds the root work item, spawns the
//! walker pool, the rollup aggregator, the ingester, and the completion
//! monitor, then tears everything down in dependency order: workers
//! drain, the work queue closes, the record channels close, the
//! aggregator finishes, and finally the ingester performs its terminal
//! flush and hands the store connection back.

use crate::cancel::CancelToken;
use crate::config::ScanOptions;
use crate::db::ingester::{IngestStreams, Ingester};
use crate::entry::{Dir, DirCompletion, Entry, Rollup, ScanError};
use crate::error::{ConfigError, DugError, PipelineError, Result};
use crate::progress::{ErrorSink, ProgressCounters};
use crate::rollup::Aggregator;
use crate::walker::worker::{DirWork, WorkPush, WorkSender, Worker};
use crossbeam_channel::{bounded, select};
use rusqlite::Connection;
use std::os::unix::fs::MetadataExt;
use std::path::Path;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info};

/// The root directory's id; its parent id is 0
pub const ROOT_DIR_ID: i64 = 1;

/// Bound for the error-sample channel
const ERROR_CHANNEL_BOUND: usize = 1000;

/// Completion-monitor poll interval
const MONITOR_TICK: Duration = Duration::from_millis(50);

fn work_queue_bound(workers: usize) -> usize {
    (workers * 10_000).max(50_000)
}

fn entry_channel_bound(batch_size: usize) -> usize {
    (batch_size * 10).max(100_000)
}

fn dir_channel_bound(workers: usize) -> usize {
    (workers * 2048).max(8192)
}

fn rollup_channel_bound(batch_size: usize) -> usize {
    (batch_size * 2).max(10_000)
}

/// Coordinates one scan over an owned store connection
pub struct Scanner {
    opts: Arc<ScanOptions>,
    counters: Arc<ProgressCounters>,
    cancel: CancelToken,
}

impl Scanner {
    pub fn new(opts: ScanOptions, counters: Arc<ProgressCounters>, cancel: CancelToken) -> Self {
        Self {
            opts: Arc::new(opts),
            counters,
            cancel,
        }
    }

    /// Walk the tree under `root`, ingesting into `conn`. The root's
    /// directory row (id 1) must already exist. Returns the connection
    /// for index build and finalize.
    pub fn run(&self, root: &Path, conn: Connection) -> Result<Connection> {
        let root_meta =
            std::fs::symlink_metadata(root).map_err(|e| ConfigError::InvalidRootPath {
                path: root.to_path_buf(),
                reason: e.to_string(),
            })?;
        if !root_meta.is_dir() {
            return Err(ConfigError::InvalidRootPath {
                path: root.to_path_buf(),
                reason: "not a directory".into(),
            }
            .into());
        }
        let root_dev = root_meta.dev();

        let (entry_tx, entry_rx) = bounded::<Entry>(entry_channel_bound(self.opts.batch_size));
        let (dir_tx, dir_rx) = bounded::<Dir>(dir_channel_bound(self.opts.workers));
        let (completion_tx, completion_rx) =
            bounded::<DirCompletion>(dir_channel_bound(self.opts.workers));
        let (rollup_tx, rollup_rx) = bounded::<Rollup>(rollup_channel_bound(self.opts.batch_size));
        let (error_tx, error_rx) = bounded::<ScanError>(ERROR_CHANNEL_BOUND);
        let (work_tx_raw, work_rx) = bounded::<DirWork>(work_queue_bound(self.opts.workers));
        let work_tx = WorkSender::new(work_tx_raw);

        let errors = ErrorSink::new(error_tx, Arc::clone(&self.counters));

        debug!(
            workers = self.opts.workers,
            queue = work_queue_bound(self.opts.workers),
            entries = entry_channel_bound(self.opts.batch_size),
            "starting scan pipeline"
        );

        // Ingester owns the connection for the duration of the scan phase
        let ingester = Ingester::new(
            conn,
            IngestStreams {
                entries: entry_rx,
                dirs: dir_rx,
                rollups: rollup_rx,
                errors: error_rx,
            },
            self.opts.batch_size,
            self.opts.flush_interval_ms,
            self.opts.max_errors,
            Arc::clone(&self.counters),
            self.cancel.clone(),
        );
        let ingester_handle = spawn_named("db-ingest", move || ingester.run());

        let agg_cancel = self.cancel.clone();
        let agg_handle = spawn_named("rollup-agg", move || {
            Aggregator::new().run(completion_rx, rollup_tx, agg_cancel)
        });

        let dir_id_seq = Arc::new(AtomicI64::new(ROOT_DIR_ID));
        let in_flight = Arc::new(AtomicI64::new(0));

        let mut worker_handles: Vec<JoinHandle<()>> = Vec::with_capacity(self.opts.workers);
        for id in 0..self.opts.workers {
            let worker = Worker {
                id,
                opts: Arc::clone(&self.opts),
                root_dev,
                work_rx: work_rx.clone(),
                work_tx: work_tx.clone(),
                entry_tx: entry_tx.clone(),
                dir_tx: dir_tx.clone(),
                completion_tx: completion_tx.clone(),
                errors: errors.clone(),
                dir_id_seq: Arc::clone(&dir_id_seq),
                in_flight: Arc::clone(&in_flight),
                cancel: self.cancel.clone(),
                stack: Vec::new(),
            };
            worker_handles.push(spawn_named(&format!("walker-{id}"), move || worker.run()));
        }

        // The scanner's own copies must not keep the channels alive
        drop(entry_tx);
        drop(dir_tx);
        drop(completion_tx);
        drop(errors);
        drop(work_rx);

        // Seed the root
        in_flight.fetch_add(1, Ordering::SeqCst);
        match work_tx.push(DirWork {
            dir_id: ROOT_DIR_ID,
            parent_id: 0,
            path: root.to_path_buf(),
            depth: 0,
        }) {
            WorkPush::Queued => {}
            WorkPush::Full(_) | WorkPush::Closed => {
                in_flight.fetch_sub(1, Ordering::SeqCst);
            }
        }
        info!(root = %root.display(), "scan seeded");

        let monitor_handle = spawn_monitor(
            work_tx.clone(),
            Arc::clone(&in_flight),
            self.cancel.clone(),
        );

        for handle in worker_handles {
            if handle.join().is_err() {
                self.cancel.cancel();
            }
        }
        debug!("all workers drained");

        // Safe if the monitor already closed it
        work_tx.close();
        let _ = monitor_handle.join();

        let agg_result = agg_handle
            .join()
            .map_err(|_| PipelineError::ThreadPanicked { name: "rollup-agg" })?;

        let ingest_result = ingester_handle
            .join()
            .map_err(|_| PipelineError::ThreadPanicked { name: "db-ingest" })?;

        let conn = ingest_result.map_err(DugError::Db)?;
        agg_result.map_err(DugError::Pipeline)?;

        if self.cancel.is_cancelled() {
            return Err(DugError::Cancelled);
        }

        Ok(conn)
    }
}

fn spawn_named<T, F>(name: &str, f: F) -> JoinHandle<T>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    thread::Builder::new()
        .name(name.to_string())
        .spawn(f)
        .expect("failed to spawn pipeline thread")
}

/// Close the work queue once every known directory has completed. Workers
/// then observe the disconnect and exit.
fn spawn_monitor(
    work_tx: WorkSender,
    in_flight: Arc<AtomicI64>,
    cancel: CancelToken,
) -> JoinHandle<()> {
    spawn_named("scan-monitor", move || loop {
        let cancelled = select! {
            recv(cancel.observer()) -> _ => true,
            default(MONITOR_TICK) => false,
        };
        if cancelled {
            work_tx.close();
            return;
        }
        if in_flight.load(Ordering::SeqCst) == 0 {
            debug!("in-flight count reached zero, closing work queue");
            work_tx.close();
            return;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_bounds() {
        assert_eq!(work_queue_bound(8), 80_000);
        assert_eq!(work_queue_bound(1), 50_000);
        assert_eq!(entry_channel_bound(10_000), 100_000);
        assert_eq!(entry_channel_bound(20_000), 200_000);
        assert_eq!(dir_channel_bound(8), 16_384);
        assert_eq!(dir_channel_bound(2), 8192);
        assert_eq!(rollup_channel_bound(10_000), 20_000);
        assert_eq!(rollup_channel_bound(100), 10_000);
    }
}
