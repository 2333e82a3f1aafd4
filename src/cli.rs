//! CLI definition and parsing.
//!
//! Notes:
//! - `--trash-root` and `--log` take an optional value; bare flags mean
//!   "pick a location automatically".
//! - `--debug` is a shorthand for `--log-level debug`.

use clap::{ArgAction, Parser, ValueHint};
use std::path::PathBuf;

use psync::{DEFAULT_FILTER, DEFAULT_RENAME_THRESHOLD, SyncOptions};

/// One-way directory synchronizer. Makes DEST mirror SOURCE in a single
/// pass; removed files are quarantined instead of deleted.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Mirror a directory tree in one pass, quarantining removed files")]
pub struct Args {
    /// Directory to mirror from.
    #[arg(value_name = "SOURCE", value_hint = ValueHint::DirPath)]
    pub src_root: PathBuf,

    /// Directory to mirror into (created if missing).
    #[arg(value_name = "DEST", value_hint = ValueHint::DirPath)]
    pub dst_root: PathBuf,

    /// Quarantine directory for files removed from DEST. Without a value, a
    /// timestamped `Trash.<ms>` directory is created next to DEST. Omit the
    /// flag entirely to leave removed files in place.
    #[arg(
        short = 't',
        long = "trash-root",
        value_name = "DIR",
        value_hint = ValueHint::DirPath,
        num_args = 0..=1,
        default_missing_value = "auto"
    )]
    pub trash_root: Option<String>,

    /// Filter string: groups of glob patterns, each introduced by `+`
    /// (include) or `-` (exclude); first match wins. Patterns with a
    /// trailing `/` match directories.
    #[arg(short = 'f', long, value_name = "FILTER", default_value = DEFAULT_FILTER)]
    pub filter: String,

    /// Skip dotfiles and dot-directories unless a pattern names them.
    #[arg(short = 'H', long)]
    pub ignore_hidden: bool,

    /// Descend into symlinked directories and copy symlinked files.
    #[arg(short = 'L', long)]
    pub follow_symlinks: bool,

    /// Minimum file size for rename detection.
    #[arg(
        short = 'R',
        long,
        value_name = "BYTES",
        default_value_t = DEFAULT_RENAME_THRESHOLD
    )]
    pub rename_threshold: u64,

    /// Disable rename detection entirely.
    #[arg(long)]
    pub no_rename: bool,

    /// Pair renames on size and mtime alone, without comparing content.
    #[arg(short = 'm', long)]
    pub metadata_only: bool,

    /// Print the planned operations without touching the filesystem.
    #[arg(short = 'd', long)]
    pub dry_run: bool,

    /// Also write logs to a file. Without a value, a timestamped file in the
    /// home directory is used. The file must not already exist.
    #[arg(
        long,
        value_name = "FILE",
        value_hint = ValueHint::FilePath,
        num_args = 0..=1,
        default_missing_value = "auto"
    )]
    pub log: Option<String>,

    /// Treat paths case-insensitively (default on Windows).
    #[arg(long)]
    pub case_insensitive: bool,

    /// Enable debug logging (shorthand for --log-level debug).
    #[arg(long)]
    pub debug: bool,

    /// Set log level: quiet, normal, info, debug.
    #[arg(long, value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Suppress per-operation output; repeat to also silence the summary.
    #[arg(short = 'q', long = "quiet", action = ArgAction::Count)]
    pub quiet: u8,

    /// Emit logs in structured JSON.
    #[arg(long)]
    pub json: bool,
}

impl Args {
    /// Library options derived from the flags. The trash and log locations
    /// are resolved separately because they depend on the run timestamp.
    pub fn to_options(&self) -> SyncOptions {
        let mut opts = SyncOptions::new(&self.src_root, &self.dst_root);
        opts.filter = self.filter.clone();
        opts.ignore_hidden = self.ignore_hidden;
        opts.follow_symlinks = self.follow_symlinks;
        opts.rename_threshold = if self.no_rename {
            None
        } else {
            Some(self.rename_threshold)
        };
        opts.content_verify = !self.metadata_only;
        opts.case_insensitive = self.case_insensitive || cfg!(windows);
        opts.dry_run = self.dry_run;
        opts
    }
}

pub fn parse() -> Args {
    Args::parse()
}
