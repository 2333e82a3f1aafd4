//! Core library for `psync`: one-way, single-pass directory synchronization.
//!
//! A run scans the source and destination trees under a shared filter,
//! plans the difference as an ordered operation sequence (with heuristic
//! rename detection), and applies it. Destination-only files are moved to a
//! quarantine directory rather than deleted, when one is configured.
//!
//! The pipeline is exposed piecewise (`filter`, `scan`, `plan`, `exec`) for
//! callers that want finer control; [`sync`] wires the whole thing together.

pub mod config;
pub mod errors;
pub mod exec;
pub mod filter;
pub mod output;
pub mod plan;
pub mod results;
pub mod scan;
pub mod shutdown;

pub use config::{DEFAULT_FILTER, DEFAULT_RENAME_THRESHOLD, SyncOptions};
pub use errors::{InputError, OpError, PatternError, ScanError, SyncError};
pub use filter::FilterSet;
pub use plan::{OpKind, Operation, PlanOptions};
pub use results::Results;
pub use scan::{Metadata, Snapshot};

use std::fs;
use tracing::{debug, error, info};

use crate::exec::Executor;
use crate::plan::plan;
use crate::scan::scan;

/// Receives one line per planned operation, before it is applied.
pub trait ProgressSink {
    fn line(&mut self, line: &str);
}

impl<F: FnMut(&str)> ProgressSink for F {
    fn line(&mut self, line: &str) {
        self(line);
    }
}

/// Run one synchronization pass.
///
/// Fatal pre-flight problems (bad filter, invalid roots, scan failure) come
/// back as `Err`; per-operation failures are recorded in the returned
/// [`Results`] and do not stop the run. A shutdown request stops the loop
/// between operations and marks the results cancelled.
pub fn sync(opts: &SyncOptions, sink: &mut dyn ProgressSink) -> Result<Results, SyncError> {
    opts.validate()?;
    let filter = FilterSet::compile(&opts.filter, opts.ignore_hidden, opts.case_insensitive)?;

    if !opts.dry_run {
        fs::create_dir_all(&opts.dst_root).map_err(|source| InputError::CreateRoot {
            path: opts.dst_root.clone(),
            source,
        })?;
        if let Some(trash) = &opts.trash_root {
            fs::create_dir_all(trash).map_err(|source| InputError::CreateRoot {
                path: trash.clone(),
                source,
            })?;
            config::check_trash_device(&opts.dst_root, trash)?;
        }
    }

    info!(src = %opts.src_root.display(), dst = %opts.dst_root.display(), "scanning");
    let src_snap = scan(
        &opts.src_root,
        &filter,
        opts.follow_symlinks,
        opts.case_insensitive,
    )?;
    let dst_snap = if opts.dst_root.exists() {
        scan(
            &opts.dst_root,
            &filter,
            opts.follow_symlinks,
            opts.case_insensitive,
        )?
    } else {
        // Dry run against a destination that does not exist yet: everything
        // in the source is a create.
        Snapshot::empty(&opts.dst_root)
    };
    debug!(
        src_files = src_snap.files().len(),
        dst_files = dst_snap.files().len(),
        "scan complete"
    );

    let plan_opts = PlanOptions {
        trash_root: opts.trash_root.clone(),
        rename_threshold: opts.rename_threshold,
        content_verify: opts.content_verify,
    };

    let executor = Executor::new(dst_snap.root(), opts.follow_symlinks);
    let mut results = Results {
        dry_run: opts.dry_run,
        trash_root: opts.trash_root.clone(),
        ..Results::default()
    };

    for op in plan(&src_snap, &dst_snap, &plan_opts) {
        if shutdown::is_requested() {
            info!("shutdown requested, stopping before the next operation");
            results.cancelled = true;
            break;
        }
        sink.line(&op.summary());
        if opts.dry_run {
            continue;
        }
        let outcome = executor.apply(&op);
        if let Err(e) = &outcome {
            error!(error = %e, "operation failed");
        }
        results.record(op.kind(), &outcome, op.byte_delta());
    }

    Ok(results)
}
