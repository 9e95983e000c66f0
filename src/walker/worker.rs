//! Walker worker loop
//!
//! Each worker drains its local overflow stack first, then blocks on the
//! shared work queue. For every directory it lists children, stats each
//! non-excluded child once via a non-following status call, classifies
//! it, and emits the matching records. After the listing completes it
//! emits exactly one completion record carrying the direct file totals
//! and the observed child-directory count, then enqueues the children.

use crate::cancel::CancelToken;
use crate::config::ScanOptions;
use crate::entry::{Dir, DirCompletion, Entry, Kind};
use crate::progress::ErrorSink;
use crossbeam_channel::{select, Receiver, Sender, TrySendError};
use parking_lot::Mutex;
use std::fs;
use std::os::unix::fs::MetadataExt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// A directory awaiting processing
#[derive(Debug, Clone)]
pub(crate) struct DirWork {
    pub dir_id: i64,
    pub parent_id: i64,
    pub path: PathBuf,
    pub depth: i64,
}

/// Outcome of pushing work onto the shared queue
pub(crate) enum WorkPush {
    Queued,
    Full(DirWork),
    Closed,
}

/// Closable handle to the shared work queue.
///
/// The single underlying sender lives in a shared slot; taking it out is
/// the queue-close operation, after which every worker's receive fails
/// once the buffered items drain. This is what lets the monitor end the
/// scan when the in-flight count reaches zero.
#[derive(Clone)]
pub(crate) struct WorkSender {
    slot: Arc<Mutex<Option<Sender<DirWork>>>>,
}

impl WorkSender {
    pub fn new(tx: Sender<DirWork>) -> Self {
        Self {
            slot: Arc::new(Mutex::new(Some(tx))),
        }
    }

    /// Non-blocking push; never waits on a full queue
    pub fn push(&self, work: DirWork) -> WorkPush {
        let guard = self.slot.lock();
        match guard.as_ref() {
            Some(tx) => match tx.try_send(work) {
                Ok(()) => WorkPush::Queued,
                Err(TrySendError::Full(w)) => WorkPush::Full(w),
                Err(TrySendError::Disconnected(_)) => WorkPush::Closed,
            },
            None => WorkPush::Closed,
        }
    }

    /// Close the queue. Idempotent.
    pub fn close(&self) {
        self.slot.lock().take();
    }
}

/// True if a child on `dev_id` must be skipped under the cross-device rule
fn should_skip_device(xdev: bool, dev_id: u64, root_dev: u64) -> bool {
    xdev && dev_id != 0 && dev_id != root_dev
}

/// Blocking send that aborts on cancellation. Returns false when the
/// pipeline is shutting down.
fn send_or_cancel<T>(tx: &Sender<T>, value: T, cancel: &CancelToken) -> bool {
    select! {
        send(tx, value) -> res => res.is_ok(),
        recv(cancel.observer()) -> _ => false,
    }
}

/// One walker thread's state
pub(crate) struct Worker {
    pub id: usize,
    pub opts: Arc<ScanOptions>,
    pub root_dev: u64,
    pub work_rx: Receiver<DirWork>,
    pub work_tx: WorkSender,
    pub entry_tx: Sender<Entry>,
    pub dir_tx: Sender<Dir>,
    pub completion_tx: Sender<DirCompletion>,
    pub errors: ErrorSink,
    pub dir_id_seq: Arc<AtomicI64>,
    pub in_flight: Arc<AtomicI64>,
    pub cancel: CancelToken,
    pub stack: Vec<DirWork>,
}

impl Worker {
    /// Process work until the queue closes and the local stack is empty,
    /// or cancellation fires.
    pub fn run(mut self) {
        debug!(worker = self.id, "started");

        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            if let Some(work) = self.stack.pop() {
                self.process(work);
                continue;
            }

            let work = select! {
                recv(self.cancel.observer()) -> _ => break,
                recv(self.work_rx) -> msg => match msg {
                    Ok(work) => work,
                    Err(_) => break,
                },
            };
            self.process(work);
        }

        debug!(worker = self.id, stacked = self.stack.len(), "finished");
    }

    fn process(&mut self, work: DirWork) {
        self.walk_directory(work);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }

    fn walk_directory(&mut self, work: DirWork) {
        if self.cancel.is_cancelled() {
            return;
        }

        if self.opts.verbose {
            debug!(worker = self.id, depth = work.depth, path = %work.path.display(), "readdir");
        }

        let listing = match fs::read_dir(&work.path) {
            Ok(listing) => listing,
            Err(e) => {
                // The parent still needs this directory's completion to
                // finish: report zero direct totals and zero children.
                self.errors
                    .emit(work.path.to_string_lossy().into_owned(), e.to_string());
                self.emit_completion(&work, 0, 0, 0, 0);
                return;
            }
        };

        let mut file_size = 0i64;
        let mut file_blocks = 0i64;
        let mut file_count = 0i64;
        let mut child_dirs: Vec<DirWork> = Vec::new();

        for (i, dirent) in listing.enumerate() {
            if i % 100 == 0 && self.cancel.is_cancelled() {
                return;
            }

            let dirent = match dirent {
                Ok(d) => d,
                Err(e) => {
                    self.errors
                        .emit(work.path.to_string_lossy().into_owned(), e.to_string());
                    continue;
                }
            };

            let child_path = work.path.join(dirent.file_name());
            if self.opts.filter.is_excluded(&child_path.to_string_lossy()) {
                continue;
            }

            // Exactly one status call per child, never following symlinks
            let meta = match fs::symlink_metadata(&child_path) {
                Ok(m) => m,
                Err(e) => {
                    self.errors
                        .emit(child_path.to_string_lossy().into_owned(), e.to_string());
                    continue;
                }
            };

            if should_skip_device(self.opts.xdev, meta.dev(), self.root_dev) {
                continue;
            }

            let name = dirent.file_name().to_string_lossy().into_owned();
            let kind = Kind::from_file_type(meta.file_type());
            // st_blocks is in 512-byte units regardless of the fs block size
            let blocks = meta.blocks() as i64 * 512;

            if kind.is_dir() {
                let child_id = self.dir_id_seq.fetch_add(1, Ordering::Relaxed) + 1;
                let dir = Dir {
                    id: child_id,
                    path: child_path.clone(),
                    name,
                    parent_id: work.dir_id,
                    depth: work.depth + 1,
                };
                if !send_or_cancel(&self.dir_tx, dir, &self.cancel) {
                    return;
                }
                child_dirs.push(DirWork {
                    dir_id: child_id,
                    parent_id: work.dir_id,
                    path: child_path,
                    depth: work.depth + 1,
                });
            } else {
                if kind.is_file() {
                    file_size += meta.size() as i64;
                    file_blocks += blocks;
                    file_count += 1;
                }
                let entry = Entry {
                    parent_id: work.dir_id,
                    name,
                    kind,
                    size: meta.size() as i64,
                    blocks,
                    mtime: meta.mtime(),
                    dev_id: meta.dev(),
                    inode: meta.ino(),
                };
                if !send_or_cancel(&self.entry_tx, entry, &self.cancel) {
                    return;
                }
            }
        }

        self.emit_completion(
            &work,
            file_size,
            file_blocks,
            file_count,
            child_dirs.len() as i64,
        );

        for child in child_dirs.into_iter().rev() {
            if self.cancel.is_cancelled() {
                return;
            }
            self.enqueue_or_stack(child);
        }
    }

    /// Emit the completion record for the directory just walked. Must
    /// happen after all of its entries and before its children are
    /// enqueued.
    fn emit_completion(
        &self,
        work: &DirWork,
        file_size: i64,
        file_blocks: i64,
        file_count: i64,
        child_dirs: i64,
    ) {
        let completion = DirCompletion {
            dir_id: work.dir_id,
            parent_id: work.parent_id,
            file_size,
            file_blocks,
            file_count,
            child_dirs,
        };
        send_or_cancel(&self.completion_tx, completion, &self.cancel);
    }

    /// Hand a child directory to the pool, keeping it local when the
    /// shared queue is full. Blocking here instead would deadlock the
    /// pool on a directory with more subdirectories than the queue holds.
    fn enqueue_or_stack(&mut self, work: DirWork) {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        match self.work_tx.push(work) {
            WorkPush::Queued => {}
            WorkPush::Full(work) => self.stack.push(work),
            WorkPush::Closed => {
                // Queue closes only on cancellation while items are still
                // in flight; the work is abandoned.
                self.in_flight.fetch_sub(1, Ordering::SeqCst);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::bounded;

    #[test]
    fn test_should_skip_device() {
        assert!(should_skip_device(true, 2, 1));
        assert!(!should_skip_device(true, 1, 1));
        // A zero device id is treated as unknown, never skipped
        assert!(!should_skip_device(true, 0, 1));
        assert!(!should_skip_device(false, 2, 1));
    }

    #[test]
    fn test_work_sender_full_and_close() {
        let (tx, rx) = bounded(1);
        let sender = WorkSender::new(tx);

        let work = |id| DirWork {
            dir_id: id,
            parent_id: 0,
            path: PathBuf::from("/x"),
            depth: 0,
        };

        assert!(matches!(sender.push(work(1)), WorkPush::Queued));
        assert!(matches!(sender.push(work(2)), WorkPush::Full(w) if w.dir_id == 2));

        sender.close();
        sender.close(); // idempotent
        assert!(matches!(sender.push(work(3)), WorkPush::Closed));

        // Buffered item still drains, then the channel reads as closed
        assert_eq!(rx.recv().unwrap().dir_id, 1);
        assert!(rx.recv().is_err());
    }

    #[test]
    fn test_send_or_cancel_aborts_on_cancellation() {
        let (tx, _rx) = bounded::<u32>(0);
        let cancel = CancelToken::new();
        cancel.cancel();
        assert!(!send_or_cancel(&tx, 7, &cancel));
    }
}
