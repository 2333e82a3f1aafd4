//! Tree scanner: turns a filtered directory subtree into a normalized
//! metadata snapshot.
//!
//! The walk decides inclusion before descending: directory entries are
//! evaluated against the filter as directory queries and pruned wholesale
//! when excluded. Included files are recorded with their size and mtime;
//! physically empty directories that the filter includes are recorded in a
//! separate set. Lookup keys are case-folded when the root's platform
//! convention is case-insensitive, while the original spelling is kept in a
//! side map for display and for the actual filesystem operations.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::debug;
use walkdir::WalkDir;

use crate::errors::ScanError;
use crate::filter::FilterSet;

/// Per-file identity used both for staleness checks and as the heuristic
/// rename signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Metadata {
    pub size: u64,
    pub mtime: SystemTime,
}

/// Normalized result of scanning one root under a given filter.
///
/// Invariant: every key in `files` or `empty_dirs` has an entry in
/// `real_names`. Keys use `/` separators and are case-folded when the
/// snapshot was taken case-insensitively.
#[derive(Debug)]
pub struct Snapshot {
    root: PathBuf,
    files: BTreeMap<String, Metadata>,
    empty_dirs: BTreeSet<String>,
    real_names: HashMap<String, PathBuf>,
}

impl Snapshot {
    /// Snapshot of a root that holds nothing, for planning against a
    /// destination that does not exist yet.
    pub fn empty(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            files: BTreeMap::new(),
            empty_dirs: BTreeSet::new(),
            real_names: HashMap::new(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn files(&self) -> &BTreeMap<String, Metadata> {
        &self.files
    }

    pub fn empty_dirs(&self) -> &BTreeSet<String> {
        &self.empty_dirs
    }

    /// Original-casing relative path for a normalized key. Unknown keys fall
    /// back to the key itself, hence the shared lifetime.
    pub fn real_name<'a>(&'a self, key: &'a str) -> &'a Path {
        // Holds by construction: keys are only ever inserted together with
        // their real name.
        self.real_names
            .get(key)
            .map_or_else(|| Path::new(key), PathBuf::as_path)
    }

    /// Absolute path of a snapshot entry, using its original casing.
    pub fn real_path(&self, key: &str) -> PathBuf {
        self.root.join(self.real_name(key))
    }
}

/// Scan `root`, consulting `filter` to prune subtrees and select files.
///
/// The root's own symlink is always resolved. Nested symlinks are followed
/// only when `follow_symlinks` is set, with cycle detection active;
/// otherwise they are recorded under their own (link) metadata. Fails if
/// the root is missing or not a directory, or on any unreadable entry.
pub fn scan(
    root: &Path,
    filter: &FilterSet,
    follow_symlinks: bool,
    case_insensitive: bool,
) -> Result<Snapshot, ScanError> {
    let meta = fs::metadata(root).map_err(|source| ScanError::Io {
        path: root.to_path_buf(),
        source,
    })?;
    if !meta.is_dir() {
        return Err(ScanError::NotADirectory(root.to_path_buf()));
    }
    // Resolving the root up front follows its own symlink regardless of the
    // flag and anchors strip_prefix below.
    let root = dunce::canonicalize(root).map_err(|source| ScanError::Io {
        path: root.to_path_buf(),
        source,
    })?;

    let mut snapshot = Snapshot {
        root: root.clone(),
        files: BTreeMap::new(),
        empty_dirs: BTreeSet::new(),
        real_names: HashMap::new(),
    };

    let walker = WalkDir::new(&root)
        .min_depth(1)
        .follow_links(follow_symlinks)
        .sort_by_file_name();

    let filter_root = root.clone();
    let entries = walker.into_iter().filter_entry(move |entry| {
        if !entry.file_type().is_dir() {
            return true;
        }
        let Ok(rel) = entry.path().strip_prefix(&filter_root) else {
            return false;
        };
        filter.evaluate(&rel_str(rel), true)
    });

    for entry in entries {
        let entry = entry.map_err(map_walk_error)?;
        let Ok(rel) = entry.path().strip_prefix(&root) else {
            continue;
        };
        let rel_display = rel_str(rel);
        let key = normalize_key(&rel_display, case_insensitive);

        if entry.file_type().is_dir() {
            debug!(path = %entry.path().display(), "scanning");
            // Physical emptiness, checked before any filtering of contents.
            let mut children = fs::read_dir(entry.path()).map_err(|source| ScanError::Io {
                path: entry.path().to_path_buf(),
                source,
            })?;
            if children.next().is_none() {
                snapshot.empty_dirs.insert(key.clone());
                snapshot.real_names.insert(key, rel.to_path_buf());
            }
        } else if entry.file_type().is_file() || entry.file_type().is_symlink() {
            if !filter.evaluate(&rel_display, false) {
                continue;
            }
            // When links are not followed, `metadata()` is the link's own
            // stat, so a symlink is recorded as itself and later mirrored as
            // a link.
            let meta = entry.metadata().map_err(map_walk_error)?;
            let mtime = meta.modified().map_err(|source| ScanError::Io {
                path: entry.path().to_path_buf(),
                source,
            })?;
            snapshot.files.insert(
                key.clone(),
                Metadata {
                    size: meta.len(),
                    mtime,
                },
            );
            snapshot.real_names.insert(key, rel.to_path_buf());
        }
    }

    Ok(snapshot)
}

/// Relative path as a `/`-separated string, original casing.
fn rel_str(rel: &Path) -> String {
    let parts: Vec<String> = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    parts.join("/")
}

/// Case-folded lookup key for a relative path string.
fn normalize_key(rel: &str, case_insensitive: bool) -> String {
    if case_insensitive {
        rel.to_lowercase()
    } else {
        rel.to_string()
    }
}

fn map_walk_error(err: walkdir::Error) -> ScanError {
    let path = err
        .path()
        .map(Path::to_path_buf)
        .unwrap_or_default();
    if err.loop_ancestor().is_some() {
        return ScanError::SymlinkCycle(path);
    }
    ScanError::Io {
        path,
        source: err
            .into_io_error()
            .unwrap_or_else(|| std::io::Error::other("walk error")),
    }
}
