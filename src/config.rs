//! Configuration types for dug
//!
//! This module defines:
//! - CLI argument parsing using clap derive macros
//! - Runtime scan options with validation
//! - The index build mode

use crate::error::ConfigError;
use crate::filter::PathFilter;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::str::FromStr;

/// Maximum reasonable worker count
const MAX_WORKERS: usize = 512;

/// Batch size limits
const MIN_BATCH_SIZE: usize = 100;
const MAX_BATCH_SIZE: usize = 1_000_000;

/// Directory usage profiler with SQLite snapshot output
#[derive(Parser, Debug)]
#[command(
    name = "dug",
    version,
    about = "Directory usage profiler with SQLite snapshot output",
    long_about = "Scans a directory tree and stores per-entry metadata plus recursive\n\
                  per-directory aggregates in an atomically published SQLite snapshot.\n\n\
                  Snapshots are written to the output directory as dug-<timestamp>.db,\n\
                  with a latest.db symlink pointing at the newest one.",
    after_help = "EXAMPLES:\n    \
        dug scan --root /export/projects --out ./data\n    \
        dug scan -r /mnt/nfs -w 16 --exclude '/tmp(/|$)' --retention 5\n    \
        dug info --db ./data/latest.db\n    \
        dug list --out ./data"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

/// Subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Scan a directory tree and publish a snapshot
    Scan(ScanArgs),

    /// Display scan metadata from a snapshot
    Info(InfoArgs),

    /// List retained snapshots in an output directory
    List(ListArgs),
}

/// Arguments for the scan subcommand
#[derive(Args, Debug, Clone)]
pub struct ScanArgs {
    /// Root directory to scan
    #[arg(short = 'r', long, default_value = ".", value_name = "DIR")]
    pub root: PathBuf,

    /// Output directory for snapshots
    #[arg(short = 'o', long, default_value = "./data", value_name = "DIR")]
    pub out: PathBuf,

    /// Number of walker threads
    #[arg(short = 'w', long, default_value = "8", value_name = "NUM")]
    pub workers: usize,

    /// Don't cross filesystem boundaries
    #[arg(long, default_value = "true", action = clap::ArgAction::Set)]
    pub xdev: bool,

    /// Cancel the scan after N path errors (0 = unlimited)
    #[arg(long, default_value = "0", value_name = "NUM")]
    pub max_errors: u64,

    /// Exclude paths matching regex pattern (can be repeated)
    #[arg(short = 'e', long = "exclude", value_name = "PATTERN", action = clap::ArgAction::Append)]
    pub exclude: Vec<String>,

    /// Records per ingest transaction
    #[arg(short = 'b', long, default_value = "10000", value_name = "NUM")]
    pub batch_size: usize,

    /// Maximum time between ingest flushes in milliseconds
    #[arg(long, default_value = "1000", value_name = "MS")]
    pub flush_interval_ms: u64,

    /// Index build mode: memory|disk|skip
    #[arg(long, default_value = "memory", value_name = "MODE")]
    pub index_mode: String,

    /// Scratch directory for SQLite temp files when --index-mode disk
    #[arg(long, value_name = "DIR")]
    pub sqlite_tmp_dir: Option<PathBuf>,

    /// Number of snapshots to retain (0 = unlimited)
    #[arg(long, default_value = "5", value_name = "NUM")]
    pub retention: usize,

    /// Emit per-directory debug traces
    #[arg(short = 'v', long)]
    pub verbose: bool,

    /// Quiet mode - suppress the progress display
    #[arg(short = 'q', long)]
    pub quiet: bool,
}

/// Arguments for the info subcommand
#[derive(Args, Debug, Clone)]
pub struct InfoArgs {
    /// Path to a snapshot file
    #[arg(short = 'd', long, default_value = "./data/latest.db", value_name = "FILE")]
    pub db: PathBuf,
}

/// Arguments for the list subcommand
#[derive(Args, Debug, Clone)]
pub struct ListArgs {
    /// Output directory holding snapshots
    #[arg(short = 'o', long, default_value = "./data", value_name = "DIR")]
    pub out: PathBuf,
}

/// Index build mode after the initial data load
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IndexMode {
    /// Build indexes with SQLite temp storage in memory (fastest)
    #[default]
    Memory,
    /// Build indexes with SQLite temp storage on disk (bounded RAM)
    Disk,
    /// Skip index creation entirely
    Skip,
}

impl FromStr for IndexMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "memory" => Ok(IndexMode::Memory),
            "disk" => Ok(IndexMode::Disk),
            "skip" => Ok(IndexMode::Skip),
            other => Err(ConfigError::InvalidIndexMode {
                mode: other.to_string(),
            }),
        }
    }
}

/// Validated scan configuration
#[derive(Debug, Clone)]
pub struct ScanOptions {
    /// Walker pool size
    pub workers: usize,

    /// Skip children on devices other than the root's
    pub xdev: bool,

    /// Cancel the pipeline when total errors reach this (0 = unlimited)
    pub max_errors: u64,

    /// Compiled exclusion filter
    pub filter: PathFilter,

    /// Records per ingest transaction
    pub batch_size: usize,

    /// Wall-clock flush interval in milliseconds
    pub flush_interval_ms: u64,

    /// Index build mode
    pub index_mode: IndexMode,

    /// Scratch directory for disk-mode index builds
    pub sqlite_tmp_dir: Option<PathBuf>,

    /// Snapshots to keep (0 = unlimited)
    pub retention: usize,

    /// Per-directory debug traces
    pub verbose: bool,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            workers: 8,
            xdev: true,
            max_errors: 0,
            filter: PathFilter::with_default(),
            batch_size: 10_000,
            flush_interval_ms: 1000,
            index_mode: IndexMode::Memory,
            sqlite_tmp_dir: None,
            retention: 0,
            verbose: false,
        }
    }
}

impl ScanOptions {
    /// Create and validate scan options from CLI arguments
    pub fn from_args(args: &ScanArgs) -> Result<Self, ConfigError> {
        if args.workers == 0 || args.workers > MAX_WORKERS {
            return Err(ConfigError::InvalidWorkerCount {
                count: args.workers,
                max: MAX_WORKERS,
            });
        }

        if args.batch_size < MIN_BATCH_SIZE || args.batch_size > MAX_BATCH_SIZE {
            return Err(ConfigError::InvalidBatchSize {
                size: args.batch_size,
                min: MIN_BATCH_SIZE,
                max: MAX_BATCH_SIZE,
            });
        }

        let index_mode = args.index_mode.parse::<IndexMode>()?;

        let mut filter = PathFilter::with_default();
        for pattern in &args.exclude {
            filter.add_pattern(pattern)?;
        }

        Ok(Self {
            workers: args.workers,
            xdev: args.xdev,
            max_errors: args.max_errors,
            filter,
            batch_size: args.batch_size,
            flush_interval_ms: args.flush_interval_ms,
            index_mode,
            sqlite_tmp_dir: args.sqlite_tmp_dir.clone(),
            retention: args.retention,
            verbose: args.verbose,
        })
    }

    /// Builder-style worker count override
    pub fn with_workers(mut self, n: usize) -> Self {
        self.workers = n;
        self
    }

    /// Builder-style cross-device override
    pub fn with_xdev(mut self, xdev: bool) -> Self {
        self.xdev = xdev;
        self
    }

    /// Builder-style max-errors override
    pub fn with_max_errors(mut self, n: u64) -> Self {
        self.max_errors = n;
        self
    }

    /// Builder-style retention override
    pub fn with_retention(mut self, n: usize) -> Self {
        self.retention = n;
        self
    }
}
