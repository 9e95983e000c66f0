//! dug - Directory Usage Profiler
//!
//! Entry point for the CLI application.

use anyhow::{bail, Context, Result};
use chrono::{Local, TimeZone};
use clap::Parser;
use console::style;
use dug::cancel::CancelToken;
use dug::config::{Cli, Command, InfoArgs, ListArgs, ScanArgs, ScanOptions};
use dug::db::reader;
use dug::progress::{format_number, print_summary, ProgressReporter};
use dug::snapshot::SnapshotManager;
use humansize::{format_size, BINARY};
use std::process::ExitCode;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::error;
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Scan(args) => {
            setup_logging(args.verbose)?;
            run_scan(args)
        }
        Command::Info(args) => {
            setup_logging(false)?;
            run_info(args)
        }
        Command::List(args) => {
            setup_logging(false)?;
            run_list(args)
        }
    }
}

fn setup_logging(verbose: bool) -> Result<()> {
    let filter = if verbose {
        EnvFilter::new("dug=debug,warn")
    } else {
        EnvFilter::new("dug=warn")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    Ok(())
}

fn run_scan(args: ScanArgs) -> Result<()> {
    let opts = ScanOptions::from_args(&args).context("Invalid configuration")?;

    let root = args
        .root
        .canonicalize()
        .with_context(|| format!("Failed to resolve root path '{}'", args.root.display()))?;

    let cancel = CancelToken::new();
    setup_signal_handler(&cancel)?;

    let mut manager = SnapshotManager::new(&args.out);

    let reporter = if args.quiet {
        None
    } else {
        Some(ProgressReporter::new())
    };

    if let Some(reporter) = reporter.clone() {
        use dug::progress::Stage;
        use parking_lot::Mutex;

        let stage = Arc::new(Mutex::new(Stage::Scan));
        let stage_for_progress = Arc::clone(&stage);
        let stage_reporter = reporter.clone();
        manager.set_stage_fn(move |s| {
            *stage.lock() = s;
            stage_reporter.set_status(&format!("[{}]", s.as_str()));
        });
        manager.set_progress_fn(move |snapshot| {
            reporter.update(*stage_for_progress.lock(), &snapshot);
        });
    }

    eprintln!("Scanning {}...", root.display());
    let start = Instant::now();

    let result = manager.run_scan(&root, &opts, &cancel);

    if let Some(reporter) = &reporter {
        reporter.finish_and_clear();
    }

    let snapshot_path = result.context("Scan failed")?;

    // Read the published metadata for the summary
    let conn = reader::open_snapshot(&snapshot_path)?;
    let meta = reader::get_scan_meta(&conn)?;
    print_summary(
        &dug::progress::ProgressSnapshot {
            files: meta.file_count as u64,
            dirs: meta.dir_count as u64,
            errors: meta.error_count as u64,
            total_bytes: meta.total_blocks as u64,
        },
        start.elapsed(),
        &snapshot_path.display().to_string(),
    );

    Ok(())
}

fn setup_signal_handler(cancel: &CancelToken) -> Result<()> {
    let cancel = cancel.clone();
    let ctrl_c_count = Arc::new(AtomicU32::new(0));
    ctrlc::set_handler(move || {
        let count = ctrl_c_count.fetch_add(1, Ordering::SeqCst);
        if count == 0 {
            eprintln!("\nInterrupt received, shutting down gracefully...");
            eprintln!("Press Ctrl+C again to force exit immediately.");
            cancel.cancel();
        } else {
            eprintln!("\nForced exit!");
            std::process::exit(130);
        }
    })
    .context("Failed to set signal handler")?;
    Ok(())
}

fn run_info(args: InfoArgs) -> Result<()> {
    let conn = reader::open_snapshot(&args.db)
        .with_context(|| format!("Failed to open snapshot '{}'", args.db.display()))?;
    let meta = reader::get_scan_meta(&conn).context("Failed to read scan metadata")?;

    println!();
    println!("{}", style("Scan Information").cyan().bold());
    println!("{}", style("─".repeat(50)).dim());
    println!("  {} {}", style("Root:").bold(), meta.root_path);
    println!(
        "  {} {}",
        style("Started:").bold(),
        format_time(meta.start_time)
    );
    if meta.end_time > 0 {
        println!(
            "  {} {}",
            style("Finished:").bold(),
            format_time(meta.end_time)
        );
        println!(
            "  {} {}s",
            style("Duration:").bold(),
            meta.end_time - meta.start_time
        );
    }
    println!(
        "  {} {}",
        style("Files:").bold(),
        format_number(meta.file_count as u64)
    );
    println!(
        "  {} {}",
        style("Directories:").bold(),
        format_number(meta.dir_count as u64)
    );
    println!(
        "  {} {}",
        style("Apparent Size:").bold(),
        format_size(meta.total_size as u64, BINARY)
    );
    println!(
        "  {} {}",
        style("Disk Usage:").bold(),
        format_size(meta.total_blocks as u64, BINARY)
    );
    if meta.error_count > 0 {
        println!(
            "  {} {}",
            style("Errors:").yellow().bold(),
            format_number(meta.error_count as u64)
        );
    }
    println!();

    Ok(())
}

fn run_list(args: ListArgs) -> Result<()> {
    let manager = SnapshotManager::new(&args.out);
    let snapshots = manager.list_snapshots().with_context(|| {
        format!(
            "Failed to list snapshots in '{}'",
            args.out.display()
        )
    })?;

    if snapshots.is_empty() {
        bail!("no snapshots found in '{}'", args.out.display());
    }

    let latest = manager.latest().ok();
    for path in &snapshots {
        let size = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);
        let is_latest = matches!(&latest, Some(l) if l.file_name() == path.file_name());
        if is_latest {
            println!(
                "{}  {}  {}",
                path.display(),
                format_size(size, BINARY),
                style("(latest)").green()
            );
        } else {
            println!("{}  {}", path.display(), format_size(size, BINARY));
        }
    }

    Ok(())
}

fn format_time(unix_secs: i64) -> String {
    match Local.timestamp_opt(unix_secs, 0) {
        chrono::LocalResult::Single(t) => t.to_rfc3339(),
        _ => unix_secs.to_string(),
    }
}
