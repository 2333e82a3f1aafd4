//! Typed error definitions for psync.
//! The taxonomy separates fatal pre-flight failures from per-operation ones:
//! anything that fires before the first filesystem mutation aborts the run,
//! while `OpError` is captured, counted and reported without stopping it.

use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Filter-string compilation failures. All of these are rejected before any
/// scanning happens; a `FilterSet` that compiled is safe to evaluate.
#[derive(Debug, Error)]
pub enum PatternError {
    #[error("parent directories ('..') are not supported in filter patterns: {0}")]
    ParentEscape(String),

    #[error("absolute paths are not supported in filter patterns: {0}")]
    AbsolutePath(String),

    #[error("filter pattern appears before any '+' or '-' action: {0}")]
    MissingAction(String),

    #[error("unterminated quote in filter string near: {0}")]
    UnterminatedQuote(String),

    /// Covers malformed globs, including a recursive `**` that is not a full
    /// path component (globset reports that as an invalid pattern).
    #[error("invalid glob pattern '{pattern}': {source}")]
    BadGlob {
        pattern: String,
        #[source]
        source: globset::Error,
    },
}

/// Invalid inputs detected before the run mutates anything.
#[derive(Debug, Error)]
pub enum InputError {
    #[error("source root does not exist: {0}")]
    SourceMissing(PathBuf),

    #[error("source root is not a directory: {0}")]
    SourceNotADirectory(PathBuf),

    #[error("destination root exists but is not a directory: {0}")]
    DestNotADirectory(PathBuf),

    #[error("source and destination resolve to the same directory: {0}")]
    SameRoot(PathBuf),

    #[error("quarantine root exists but is not a directory: {0}")]
    TrashNotADirectory(PathBuf),

    #[error("quarantine root is not on the same file system as the destination: {0}")]
    TrashCrossDevice(PathBuf),

    #[error("log file already exists: {0}")]
    LogExists(PathBuf),

    #[error("failed to create {path}: {source}")]
    CreateRoot {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Fatal scan failures; the run aborts without touching the destination.
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("scan root is not a directory: {0}")]
    NotADirectory(PathBuf),

    #[error("symlink cycle detected at {0}")]
    SymlinkCycle(PathBuf),

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// A single failed filesystem operation. The `Display` form (`ErrorKind: path`)
/// is what ends up in the bounded error list of [`crate::Results`].
#[derive(Debug, Error)]
#[error("{kind:?}: {}", path.display())]
pub struct OpError {
    pub kind: io::ErrorKind,
    pub path: PathBuf,
    #[source]
    pub source: io::Error,
}

impl OpError {
    pub fn new(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self {
            kind: source.kind(),
            path: path.into(),
            source,
        }
    }

    /// Adapter for `.map_err(OpError::at(path))` on `io::Result` chains.
    pub(crate) fn at(path: &Path) -> impl FnOnce(io::Error) -> OpError + '_ {
        move |e| OpError::new(path, e)
    }
}

/// Umbrella for the fatal failures [`crate::sync`] can return.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Pattern(#[from] PatternError),

    #[error(transparent)]
    Input(#[from] InputError),

    #[error(transparent)]
    Scan(#[from] ScanError),
}
