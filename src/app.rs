//! Application orchestrator.
//! Resolves the trash and log locations, initializes logging, installs the
//! signal handler, runs the sync, and prints the final report.

use anyhow::Result;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::debug;

use psync::output::{self as out, ConsoleSink, human_size};
use psync::{InputError, ProgressSink, Results, shutdown};

use crate::cli::Args;
use crate::logging::{LogLevel, init_tracing};

/// Run the CLI application, returning the process exit code: 0 on a clean
/// run, 1 when operations failed or the run was cancelled, 2 on a fatal
/// error before or during setup.
pub fn run(args: Args) -> Result<i32> {
    let level = if args.debug {
        LogLevel::Debug
    } else if let Some(parsed) = args.log_level.as_deref().and_then(LogLevel::parse) {
        parsed
    } else if args.quiet > 0 {
        LogLevel::Quiet
    } else {
        LogLevel::Normal
    };

    let run_millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);

    let log_file = match resolve_log(&args, run_millis) {
        Ok(p) => p,
        Err(e) => {
            out::print_error(&e.to_string());
            return Ok(2);
        }
    };

    let guard_opt = init_tracing(&level, log_file.as_deref(), args.json).map_err(|e| {
        out::print_error(&format!("Failed to initialize logging: {}", e));
        e
    })?;

    // Guard needs to be dropped on SIGINT to flush logs.
    let guard_slot = Arc::new(Mutex::new(guard_opt));
    {
        let guard_slot = Arc::clone(&guard_slot);
        ctrlc::set_handler(move || {
            shutdown::request();
            out::print_warn("Received interrupt; finishing the current operation...");
            if let Ok(mut g) = guard_slot.lock() {
                let _ = g.take();
            }
        })
        .map_err(|e| anyhow::anyhow!("failed to install signal handler: {e}"))?;
    }

    let mut opts = args.to_options();
    opts.trash_root = resolve_trash(&args, run_millis);

    debug!("Starting psync: {:?}", args);

    if args.quiet == 0 {
        print_banner(&opts.src_root, &opts.dst_root);
    }

    let mut console = ConsoleSink;
    let mut silent = |_: &str| {};
    let sink: &mut dyn ProgressSink = if args.quiet > 0 { &mut silent } else { &mut console };

    let outcome = psync::sync(&opts, sink);

    // Ensure logs are flushed before exit.
    if let Ok(mut g) = guard_slot.lock() {
        let _ = g.take();
    }

    match outcome {
        Ok(mut results) => {
            results.log_file = log_file;
            if args.quiet < 2 {
                print_report(&results);
            }
            if results.is_clean() { Ok(0) } else { Ok(1) }
        }
        Err(e) => {
            out::print_error(&e.to_string());
            Ok(2)
        }
    }
}

/// Quarantine location for this run. Bare `--trash-root` puts a timestamped
/// directory next to the destination; an explicit path gets a timestamped
/// subdirectory so repeated runs never collide.
fn resolve_trash(args: &Args, run_millis: u128) -> Option<PathBuf> {
    let raw = args.trash_root.as_deref()?;
    if raw == "auto" {
        let parent = args
            .dst_root
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map_or_else(|| PathBuf::from("."), PathBuf::from);
        Some(parent.join(format!("Trash.{run_millis}")))
    } else {
        Some(PathBuf::from(raw).join(run_millis.to_string()))
    }
}

/// Log file for this run. Bare `--log` writes a timestamped file in the home
/// directory; an explicit path is used as-is but must not already exist.
fn resolve_log(args: &Args, run_millis: u128) -> Result<Option<PathBuf>, InputError> {
    let Some(raw) = args.log.as_deref() else {
        return Ok(None);
    };
    let path = if raw == "auto" {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(format!("psync.{run_millis}.log"))
    } else {
        PathBuf::from(raw)
    };
    if path.exists() {
        return Err(InputError::LogExists(path));
    }
    Ok(Some(path))
}

fn print_banner(src: &std::path::Path, dst: &std::path::Path) {
    let src_line = format!("   {}", src.display());
    let dst_line = format!("-> {}", dst.display());
    let width = src_line.len().max(dst_line.len()) + 3;
    out::print_user(&src_line);
    out::print_user(&dst_line);
    out::print_user(&"-".repeat(width));
}

fn print_report(results: &Results) {
    if results.cancelled {
        out::print_warn("Run cancelled; the destination may be partially updated.");
    }
    if results.dry_run {
        out::print_user("Dry run: nothing was changed.");
        return;
    }

    let line = |label: &str, ok: u64, failed: u64| {
        if ok > 0 || failed > 0 {
            let suffix = if failed > 0 {
                format!(" + Failed: {failed}")
            } else {
                String::new()
            };
            out::print_user(&format!("{label}: {ok}{suffix}"));
        }
    };
    line("Created", results.created, results.created_errors);
    line("Updated", results.updated, results.updated_errors);
    line("Renamed", results.renamed, results.renamed_errors);
    line("Deleted", results.deleted, results.deleted_errors);
    line(
        "Dirs created",
        results.dirs_created,
        results.dirs_created_errors,
    );
    line(
        "Dirs deleted",
        results.dirs_deleted,
        results.dirs_deleted_errors,
    );
    out::print_user(&format!("Net change: {}", human_size(results.byte_diff)));

    if let Some(trash) = &results.trash_root {
        if results.deleted > 0 {
            out::print_user(&format!("Deleted files moved to: {}", trash.display()));
        }
    }

    let err_count = results.err_count();
    if err_count > 0 {
        out::print_error(&format!("{err_count} operation(s) failed"));
        // Reprint the errors when there are few enough to read at a glance;
        // otherwise point at the log.
        if err_count <= 10 {
            for e in &results.errors {
                out::print_error(e);
            }
        } else if let Some(log) = &results.log_file {
            out::print_info(&format!("See the log for details: {}", log.display()));
        }
    } else if !results.cancelled {
        out::print_success("Sync complete.");
    }

    if let Some(log) = &results.log_file {
        out::print_user(&format!("Log written to: {}", log.display()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    fn args(argv: &[&str]) -> Args {
        Args::try_parse_from(argv).unwrap()
    }

    #[test]
    fn auto_trash_lands_next_to_destination() {
        let a = args(&["psync", "-t", "--", "/data/src", "/data/dst"]);
        let trash = resolve_trash(&a, 1234).unwrap();
        assert_eq!(trash, PathBuf::from("/data/Trash.1234"));
    }

    #[test]
    fn explicit_trash_gets_timestamped_subdir() {
        let a = args(&["psync", "-t", "/mnt/bin", "/data/src", "/data/dst"]);
        let trash = resolve_trash(&a, 1234).unwrap();
        assert_eq!(trash, PathBuf::from("/mnt/bin/1234"));
    }

    #[test]
    fn no_trash_flag_means_none() {
        let a = args(&["psync", "/data/src", "/data/dst"]);
        assert!(resolve_trash(&a, 1234).is_none());
    }

    #[test]
    fn existing_log_file_is_rejected() {
        let td = tempfile::tempdir().unwrap();
        let log = td.path().join("run.log");
        std::fs::write(&log, b"old").unwrap();
        let a = args(&[
            "psync",
            "--log",
            log.to_str().unwrap(),
            "/data/src",
            "/data/dst",
        ]);
        assert!(matches!(
            resolve_log(&a, 1),
            Err(InputError::LogExists(_))
        ));
    }
}
