//! Batched store ingestion
//!
//! The ingester is the single owner of the store connection during the
//! scan phase. It consumes the four pipeline streams (entries, directory
//! rows, rollups, error samples), batches each kind, and flushes every
//! batch in one transaction over cached prepared statements.
//!
//! A batch is flushed when it reaches the configured size, when the
//! wall-clock flush ticker fires, or when all inputs have closed. Error
//! samples are capped: the first 1,000 are persisted, the rest only
//! counted. When a max-errors ceiling is configured and the running total
//! reaches it, the ingester cancels the whole pipeline.

use crate::cancel::CancelToken;
use crate::entry::{Dir, Entry, Rollup, ScanError};
use crate::error::DbResult;
use crate::progress::ProgressCounters;
use crossbeam_channel::{tick, Receiver, Select};
use rusqlite::{params, Connection};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Only the first N error records are persisted; the rest are counted
pub const MAX_ERRORS_SAMPLED: usize = 1000;

const INSERT_DIR: &str =
    "INSERT OR REPLACE INTO dirs (id, path, name, parent_id, depth) VALUES (?1, ?2, ?3, ?4, ?5)";
const INSERT_ENTRY: &str = "INSERT INTO entries (parent_id, name, kind, size, blocks, mtime, dev_id, inode) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)";
const INSERT_ROLLUP: &str = "INSERT OR REPLACE INTO rollups (dir_id, total_size, total_blocks, total_files, total_dirs) VALUES (?1, ?2, ?3, ?4, ?5)";
const INSERT_ERROR: &str = "INSERT INTO scan_errors (path, message) VALUES (?1, ?2)";

/// Input streams consumed by the ingester
pub struct IngestStreams {
    pub entries: Receiver<Entry>,
    pub dirs: Receiver<Dir>,
    pub rollups: Receiver<Rollup>,
    pub errors: Receiver<ScanError>,
}

/// Batched writer for the scan pipeline
pub struct Ingester {
    conn: Connection,
    streams: IngestStreams,
    batch_size: usize,
    flush_interval_ms: u64,
    max_errors: u64,
    counters: Arc<ProgressCounters>,
    cancel: CancelToken,

    entry_batch: Vec<Entry>,
    dir_batch: Vec<Dir>,
    rollup_batch: Vec<Rollup>,
    error_batch: Vec<ScanError>,
    errors_sampled: usize,
}

impl Ingester {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        conn: Connection,
        streams: IngestStreams,
        batch_size: usize,
        flush_interval_ms: u64,
        max_errors: u64,
        counters: Arc<ProgressCounters>,
        cancel: CancelToken,
    ) -> Self {
        Self {
            conn,
            streams,
            batch_size,
            flush_interval_ms,
            max_errors,
            counters,
            cancel,
            entry_batch: Vec::with_capacity(batch_size),
            dir_batch: Vec::with_capacity(batch_size),
            rollup_batch: Vec::with_capacity(batch_size),
            error_batch: Vec::with_capacity(100),
            errors_sampled: 0,
        }
    }

    /// Consume all inputs until they close, then perform a terminal flush.
    /// Returns the connection for index build and finalize. On store error,
    /// cancels the pipeline and surfaces the error.
    pub fn run(mut self) -> DbResult<Connection> {
        debug!(
            batch_size = self.batch_size,
            flush_interval_ms = self.flush_interval_ms,
            "ingester started"
        );
        let result = self.run_loop();
        if result.is_err() {
            self.cancel.cancel();
        }
        result.map(|()| self.conn)
    }

    fn run_loop(&mut self) -> DbResult<()> {
        let ticker = tick(Duration::from_millis(self.flush_interval_ms.max(1)));
        let cancel_rx = self.cancel.observer().clone();

        let entry_rx = self.streams.entries.clone();
        let dir_rx = self.streams.dirs.clone();
        let rollup_rx = self.streams.rollups.clone();
        let error_rx = self.streams.errors.clone();

        // Closed inputs are removed from the selector so they stop
        // signalling readiness; the loop ends once all four are gone.
        let mut sel = Select::new();
        let op_entry = sel.recv(&entry_rx);
        let op_dir = sel.recv(&dir_rx);
        let op_rollup = sel.recv(&rollup_rx);
        let op_error = sel.recv(&error_rx);
        let op_tick = sel.recv(&ticker);
        let op_cancel = sel.recv(&cancel_rx);
        let mut open_inputs = 4u8;

        while open_inputs > 0 {
            let oper = sel.select();
            match oper.index() {
                i if i == op_entry => match oper.recv(&entry_rx) {
                    Ok(e) => self.on_entry(e)?,
                    Err(_) => {
                        sel.remove(op_entry);
                        open_inputs -= 1;
                    }
                },
                i if i == op_dir => match oper.recv(&dir_rx) {
                    Ok(d) => self.on_dir(d)?,
                    Err(_) => {
                        sel.remove(op_dir);
                        open_inputs -= 1;
                    }
                },
                i if i == op_rollup => match oper.recv(&rollup_rx) {
                    Ok(r) => self.on_rollup(r)?,
                    Err(_) => {
                        sel.remove(op_rollup);
                        open_inputs -= 1;
                    }
                },
                i if i == op_error => match oper.recv(&error_rx) {
                    Ok(e) => self.on_error(e)?,
                    Err(_) => {
                        sel.remove(op_error);
                        open_inputs -= 1;
                    }
                },
                i if i == op_tick => {
                    let _ = oper.recv(&ticker);
                    self.flush_all()?;
                    self.check_error_ceiling();
                }
                i if i == op_cancel => {
                    let _ = oper.recv(&cancel_rx);
                    debug!("ingester cancelled, flushing partial batches");
                    return self.flush_all();
                }
                _ => unreachable!("unknown select operation"),
            }
        }

        debug!("ingester inputs closed, terminal flush");
        self.flush_all()
    }

    fn on_entry(&mut self, entry: Entry) -> DbResult<()> {
        if entry.kind.is_file() {
            self.counters.add_file(entry.blocks as u64);
        }
        self.entry_batch.push(entry);
        if self.entry_batch.len() >= self.batch_size {
            self.flush_entries()?;
        }
        Ok(())
    }

    fn on_dir(&mut self, dir: Dir) -> DbResult<()> {
        self.counters.add_dir();
        self.dir_batch.push(dir);
        if self.dir_batch.len() >= self.batch_size {
            self.flush_dirs()?;
        }
        Ok(())
    }

    fn on_rollup(&mut self, rollup: Rollup) -> DbResult<()> {
        self.rollup_batch.push(rollup);
        if self.rollup_batch.len() >= self.batch_size {
            self.flush_rollups()?;
        }
        Ok(())
    }

    fn on_error(&mut self, error: ScanError) -> DbResult<()> {
        // The total count lives in the shared counters, incremented at the
        // producer so samples dropped on a full channel are still counted.
        if self.errors_sampled < MAX_ERRORS_SAMPLED {
            self.errors_sampled += 1;
            self.error_batch.push(error);
            if self.errors_sampled == MAX_ERRORS_SAMPLED {
                self.flush_errors()?;
            }
        }
        self.check_error_ceiling();
        Ok(())
    }

    fn check_error_ceiling(&self) {
        if self.max_errors > 0
            && self.counters.errors() >= self.max_errors
            && !self.cancel.is_cancelled()
        {
            warn!(
                max_errors = self.max_errors,
                "error ceiling reached, cancelling scan"
            );
            self.cancel.cancel();
        }
    }

    /// Flush every non-empty batch
    fn flush_all(&mut self) -> DbResult<()> {
        self.flush_dirs()?;
        self.flush_entries()?;
        self.flush_rollups()?;
        self.flush_errors()
    }

    fn flush_entries(&mut self) -> DbResult<()> {
        if self.entry_batch.is_empty() {
            return Ok(());
        }

        let tx = self.conn.unchecked_transaction()?;
        {
            let mut stmt = tx.prepare_cached(INSERT_ENTRY)?;
            for e in self.entry_batch.drain(..) {
                stmt.execute(params![
                    e.parent_id,
                    e.name,
                    e.kind.as_db_int(),
                    e.size,
                    e.blocks,
                    e.mtime,
                    e.dev_id as i64,
                    e.inode as i64,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn flush_dirs(&mut self) -> DbResult<()> {
        if self.dir_batch.is_empty() {
            return Ok(());
        }

        let tx = self.conn.unchecked_transaction()?;
        {
            let mut stmt = tx.prepare_cached(INSERT_DIR)?;
            for d in self.dir_batch.drain(..) {
                stmt.execute(params![
                    d.id,
                    d.path.to_string_lossy(),
                    d.name,
                    d.parent_id,
                    d.depth,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn flush_rollups(&mut self) -> DbResult<()> {
        if self.rollup_batch.is_empty() {
            return Ok(());
        }

        let tx = self.conn.unchecked_transaction()?;
        {
            let mut stmt = tx.prepare_cached(INSERT_ROLLUP)?;
            for r in self.rollup_batch.drain(..) {
                stmt.execute(params![
                    r.dir_id,
                    r.total_size,
                    r.total_blocks,
                    r.total_files,
                    r.total_dirs,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn flush_errors(&mut self) -> DbResult<()> {
        if self.error_batch.is_empty() {
            return Ok(());
        }

        let tx = self.conn.unchecked_transaction()?;
        {
            let mut stmt = tx.prepare_cached(INSERT_ERROR)?;
            for e in self.error_batch.drain(..) {
                stmt.execute(params![e.path, e.message])?;
            }
        }
        tx.commit()?;
        Ok(())
    }
}
