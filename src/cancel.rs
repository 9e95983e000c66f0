//! Cooperative cancellation
//!
//! A single token is cloned into every pipeline task. It combines an
//! atomic flag for cheap polling in tight loops with a channel that
//! disconnects on cancellation, so blocked channel operations can be
//! aborted with a `select!` arm.

use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cloneable cancellation token shared by all pipeline tasks
#[derive(Clone)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
    // Held until cancellation; dropping it disconnects every observer.
    holder: Arc<Mutex<Option<Sender<()>>>>,
    observer: Receiver<()>,
}

impl CancelToken {
    pub fn new() -> Self {
        let (tx, rx) = bounded::<()>(0);
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            holder: Arc::new(Mutex::new(Some(tx))),
            observer: rx,
        }
    }

    /// Signal cancellation. Idempotent; wakes every blocked observer.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
        self.holder.lock().take();
    }

    /// Cheap flag check for polling between units of work
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }

    /// Receiver that never yields a message and disconnects on cancel.
    /// Use as a `select!` arm: the `recv` completes (with `Err`) exactly
    /// when the token is cancelled.
    pub fn observer(&self) -> &Receiver<()> {
        &self.observer
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}
