//! Error types for dug
//!
//! This module defines a structured error hierarchy covering:
//! - Configuration and CLI validation errors
//! - Output-directory lock contention
//! - SQLite store errors
//! - Pipeline consistency errors
//! - Cooperative cancellation
//!
//! Per-path I/O errors (permission denied, stale handles, transient read
//! failures) are deliberately NOT represented here: they are data, not
//! failures. They flow through the scan-error stream, are counted and
//! sampled, and never abort a scan on their own.

use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type for the dug application
#[derive(Error, Debug)]
pub enum DugError {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Output-directory lock errors
    #[error("Lock error: {0}")]
    Lock(#[from] LockError),

    /// Store errors
    #[error("Database error: {0}")]
    Db(#[from] DbError),

    /// Pipeline consistency errors
    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    /// I/O errors (file operations outside the walk itself)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Scan cancelled (user signal or max-errors ceiling)
    #[error("Scan cancelled")]
    Cancelled,
}

/// Configuration and CLI errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Invalid worker count
    #[error("Invalid worker count {count}: must be between 1 and {max}")]
    InvalidWorkerCount { count: usize, max: usize },

    /// Invalid batch size
    #[error("Invalid batch size {size}: must be between {min} and {max}")]
    InvalidBatchSize { size: usize, min: usize, max: usize },

    /// Invalid exclude pattern
    #[error("Invalid exclude pattern '{pattern}': {reason}")]
    InvalidExcludePattern { pattern: String, reason: String },

    /// Unknown index build mode
    #[error("Invalid index mode '{mode}' (expected memory|disk|skip)")]
    InvalidIndexMode { mode: String },

    /// Root path error
    #[error("Invalid root path '{path}': {reason}")]
    InvalidRootPath { path: PathBuf, reason: String },
}

/// Output-directory lock errors
#[derive(Error, Debug)]
pub enum LockError {
    /// Another process holds the lock
    #[error("another scan is in progress in '{dir}'")]
    InProgress { dir: PathBuf },

    /// Lock file could not be created or locked
    #[error("failed to create lock file '{path}': {source}")]
    CreateFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Store errors
#[derive(Error, Debug)]
pub enum DbError {
    /// SQLite error
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Failed to create the store file
    #[error("Failed to create database at '{path}': {reason}")]
    CreateFailed { path: PathBuf, reason: String },

    /// Scratch directory for disk-mode index builds
    #[error("Failed to prepare sqlite temp dir '{path}': {source}")]
    TempDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Pipeline consistency errors
#[derive(Error, Debug)]
pub enum PipelineError {
    /// The completion stream closed while directories were still pending.
    /// Indicates a walker bug: an expected child never produced a completion.
    #[error("rollup aggregation incomplete: {pending} directories pending")]
    IncompleteAggregation { pending: usize },

    /// A pipeline thread panicked
    #[error("pipeline thread '{name}' panicked")]
    ThreadPanicked { name: &'static str },
}

/// Result type alias for DugError
pub type Result<T> = std::result::Result<T, DugError>;

/// Result type alias for DbError
pub type DbResult<T> = std::result::Result<T, DbError>;
