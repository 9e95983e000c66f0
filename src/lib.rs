//! dug - Directory Usage Profiler
//!
//! A tool for profiling very large directory trees (tens of millions of
//! entries, typically on network filesystems) into portable SQLite snapshots.
//! Per-entry metadata and per-directory recursive aggregates ("rollups") are
//! captured in a single pass, so later browsing and querying never re-walks
//! the tree.
//!
//! # Features
//!
//! - **Bounded-Memory Scanning**: A fixed worker pool with a bounded work
//!   queue and per-worker overflow stacks keeps memory flat on arbitrarily
//!   deep or wide trees, without deadlocking on fan-out.
//!
//! - **Streaming Rollups**: Recursive size/block/file/dir totals are folded
//!   bottom-up concurrently with the walk; only in-flight directories are
//!   held in memory, never the whole tree.
//!
//! - **Batched SQLite Ingestion**: All records are batched and committed in
//!   single transactions over cached prepared statements, with WAL-mode
//!   write tuning during the load and a portable single-file artifact at
//!   the end.
//!
//! - **Atomic Snapshots**: Each scan writes a hidden temporary store that is
//!   atomically renamed into place, with a `latest.db` symlink and
//!   retention-based pruning of old snapshots.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                      Walker Pool (N threads)                     │
//! │  ┌─────────┐  ┌─────────┐  ┌─────────┐         ┌─────────┐     │
//! │  │Worker 0 │  │Worker 1 │  │Worker 2 │  ...    │Worker N │     │
//! │  │ readdir │  │ readdir │  │ readdir │         │ readdir │     │
//! │  │ lstat   │  │ lstat   │  │ lstat   │         │ lstat   │     │
//! │  └────┬────┘  └────┬────┘  └────┬────┘         └────┬────┘     │
//! │       │            │            │                    │          │
//! │       ├── entries ─┼────────────┼────────────────────┤          │
//! │       ├── dirs ────┼────────────┼────────────────────┤          │
//! │       └── completions ──────────┼────────────────────┘          │
//! │                                 │                               │
//! │            ┌────────────────────▼─────┐                         │
//! │            │   Rollup Aggregator      │                         │
//! │            │  (streaming, bottom-up)  │                         │
//! │            └────────────┬─────────────┘                         │
//! │                         │ rollups                               │
//! │                         ▼                                       │
//! │            ┌──────────────────────────┐                         │
//! │            │        Ingester          │                         │
//! │            │  - batched transactions  │                         │
//! │            │  - error sampling        │                         │
//! │            └────────────┬─────────────┘                         │
//! └─────────────────────────┼───────────────────────────────────────┘
//!                           ▼
//!                ┌────────────────────┐
//!                │  Snapshot Manager  │
//!                │  lock → scan →     │
//!                │  index → publish   │
//!                └────────────────────┘
//! ```
//!
//! # Example
//!
//! ```bash
//! # Scan a tree into ./data, keeping the last 5 snapshots
//! dug scan --root /export/projects --out ./data --retention 5
//!
//! # Inspect the latest snapshot
//! dug info --db ./data/latest.db
//!
//! # Query it directly
//! sqlite3 ./data/latest.db \
//!     "SELECT path, total_blocks FROM dirs JOIN rollups ON id = dir_id
//!      ORDER BY total_blocks DESC LIMIT 20"
//! ```

pub mod cancel;
pub mod config;
pub mod db;
pub mod entry;
pub mod error;
pub mod filter;
pub mod progress;
pub mod rollup;
pub mod snapshot;
pub mod walker;
