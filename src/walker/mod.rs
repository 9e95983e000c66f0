//! Concurrent directory tree walker
//!
//! A fixed pool of worker threads drains a bounded work queue of
//! directories. Each worker lists a directory, stats every non-excluded
//! child exactly once (never following symlinks), classifies it, and
//! emits records downstream. Discovered subdirectories are enqueued for
//! any worker to pick up; when the shared queue is full they are pushed
//! onto the worker's local stack instead, so a worker can always make
//! progress on the directory it just listed without depending on another
//! consumer draining the queue.

mod scanner;
mod worker;

pub use scanner::{Scanner, ROOT_DIR_ID};
