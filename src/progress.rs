//! Progress tracking and reporting
//!
//! The pipeline maintains lock-free counters readable at any time by an
//! external reporter. The terminal display uses an indicatif spinner.

use crate::entry::ScanError;
use console::style;
use crossbeam_channel::Sender;
use humansize::{format_size, BINARY};
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Scan pipeline stage, for the external progress display
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Scan,
    Indexes,
    Finalize,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Scan => "scan",
            Stage::Indexes => "indexes",
            Stage::Finalize => "finalize",
        }
    }
}

/// Lock-free progress counters shared across the pipeline
#[derive(Debug, Default)]
pub struct ProgressCounters {
    files: AtomicU64,
    dirs: AtomicU64,
    errors: AtomicU64,
    /// Cumulative disk bytes over regular files
    total_bytes: AtomicU64,
}

/// A point-in-time copy of the counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProgressSnapshot {
    pub files: u64,
    pub dirs: u64,
    pub errors: u64,
    pub total_bytes: u64,
}

impl ProgressCounters {
    pub fn add_file(&self, disk_bytes: u64) {
        self.files.fetch_add(1, Ordering::Relaxed);
        self.total_bytes.fetch_add(disk_bytes, Ordering::Relaxed);
    }

    pub fn add_dir(&self) {
        self.dirs.fetch_add(1, Ordering::Relaxed);
    }

    /// Seed the directory count (the root row is inserted outside the
    /// record stream).
    pub fn set_dirs(&self, n: u64) {
        self.dirs.store(n, Ordering::Relaxed);
    }

    pub fn add_error(&self) -> u64 {
        self.errors.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            files: self.files.load(Ordering::Relaxed),
            dirs: self.dirs.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            total_bytes: self.total_bytes.load(Ordering::Relaxed),
        }
    }
}

/// Producer-side handle for the scan-error stream.
///
/// Emission is best-effort: the total count is always incremented, but the
/// sample record is dropped when the bounded error channel is full.
#[derive(Clone)]
pub struct ErrorSink {
    tx: Sender<ScanError>,
    counters: Arc<ProgressCounters>,
}

impl ErrorSink {
    pub fn new(tx: Sender<ScanError>, counters: Arc<ProgressCounters>) -> Self {
        Self { tx, counters }
    }

    /// Count the error and try to forward a sample without blocking
    pub fn emit(&self, path: String, message: String) {
        self.counters.add_error();
        let _ = self.tx.try_send(ScanError { path, message });
    }
}

/// Progress reporter that displays scan status on a spinner line
#[derive(Clone)]
pub struct ProgressReporter {
    bar: ProgressBar,
}

impl ProgressReporter {
    pub fn new() -> Self {
        let bar = ProgressBar::new_spinner();

        bar.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.cyan.bold} {elapsed_precise} {wide_msg}")
                .expect("spinner template is valid")
                .tick_chars("◜◠◝◞◡◟·"),
        );

        bar.enable_steady_tick(Duration::from_millis(80));

        Self { bar }
    }

    /// Update the progress display from a counter snapshot
    pub fn update(&self, stage: Stage, progress: &ProgressSnapshot) {
        let msg = format!(
            "[{}] Dirs: {} | Files: {} | Disk: {} | Errors: {}",
            stage.as_str(),
            format_number(progress.dirs),
            format_number(progress.files),
            format_size(progress.total_bytes, BINARY),
            format_number(progress.errors),
        );
        self.bar.set_message(msg);
    }

    /// Set a status message
    pub fn set_status(&self, status: &str) {
        self.bar.set_message(status.to_string());
    }

    /// Finish and clear the progress display
    pub fn finish_and_clear(&self) {
        self.bar.finish_and_clear();
    }
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new()
    }
}

/// Format a number with thousands separators
pub fn format_number(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

/// Print a summary of the scan results
pub fn print_summary(progress: &ProgressSnapshot, duration: Duration, snapshot_path: &str) {
    let duration_secs = duration.as_secs_f64();
    let entries = progress.files + progress.dirs;
    let rate = if duration_secs > 0.0 {
        entries as f64 / duration_secs
    } else {
        0.0
    };

    println!();
    println!("{}", style("Scan Complete").green().bold());
    println!("{}", style("─".repeat(50)).dim());
    println!(
        "  {} {}",
        style("Directories:").bold(),
        format_number(progress.dirs)
    );
    println!("  {} {}", style("Files:").bold(), format_number(progress.files));
    println!(
        "  {} {}",
        style("Disk Usage:").bold(),
        format_size(progress.total_bytes, BINARY)
    );
    println!(
        "  {} {:.1}s ({:.0} entries/sec)",
        style("Duration:").bold(),
        duration_secs,
        rate
    );
    if progress.errors > 0 {
        println!(
            "  {} {}",
            style("Errors:").yellow().bold(),
            format_number(progress.errors)
        );
    }
    println!("  {} {}", style("Snapshot:").bold(), snapshot_path);
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::bounded;

    #[test]
    fn test_counters() {
        let counters = ProgressCounters::default();
        counters.add_file(512);
        counters.add_file(1024);
        counters.add_dir();
        counters.add_error();

        let snap = counters.snapshot();
        assert_eq!(snap.files, 2);
        assert_eq!(snap.dirs, 1);
        assert_eq!(snap.errors, 1);
        assert_eq!(snap.total_bytes, 1536);
    }

    #[test]
    fn test_error_sink_counts_dropped_samples() {
        let counters = Arc::new(ProgressCounters::default());
        let (tx, rx) = bounded(1);
        let sink = ErrorSink::new(tx, Arc::clone(&counters));

        sink.emit("/a".into(), "denied".into());
        sink.emit("/b".into(), "denied".into()); // channel full, sample dropped

        assert_eq!(counters.errors(), 2);
        assert_eq!(rx.len(), 1);
        assert_eq!(rx.recv().unwrap().path, "/a");
    }

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(42), "42");
        assert_eq!(format_number(100), "100");
        assert_eq!(format_number(2500), "2,500");
        assert_eq!(format_number(25_000_000), "25,000,000");
        assert_eq!(format_number(7_654_321), "7,654,321");
        assert_eq!(format_number(1_000_000_000), "1,000,000,000");
    }

    #[test]
    fn test_stage_labels() {
        assert_eq!(Stage::Scan.as_str(), "scan");
        assert_eq!(Stage::Indexes.as_str(), "indexes");
        assert_eq!(Stage::Finalize.as_str(), "finalize");
    }
}
