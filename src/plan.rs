//! Diff planner: compares two snapshots and derives the ordered operation
//! sequence, including the rename-detection heuristic.
//!
//! Emission order is a correctness requirement, not a preference:
//! destination-only empty directories go first (so later creates cannot
//! collide with stale entries), then renames, then quarantine deletions,
//! then creations and updates, and finally source-only empty directories.
//! The sequence is lazy: bookkeeping is proportional to entry count, and
//! each `Operation` value is built only when the consumer reaches it.

use std::collections::HashMap;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::scan::{Metadata, Snapshot};

/// Byte window compared when confirming a rename candidate.
const VERIFY_WINDOW: u64 = 1024;

/// The operation kinds, used for per-kind accounting in `Results`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpKind {
    Create,
    Update,
    Delete,
    Rename,
    CreateDir,
    DeleteDir,
}

/// One planned filesystem change. Paths are absolute; `rel` fields keep the
/// original-casing relative spelling for summaries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    /// Remove a destination-only empty directory.
    DeleteDir { path: PathBuf, rel: String },
    /// Rename a destination file to match its new name in the source.
    Rename {
        from: PathBuf,
        to: PathBuf,
        rel_from: String,
        rel_to: String,
    },
    /// Move a destination-only file into the quarantine root.
    Delete {
        from: PathBuf,
        to: PathBuf,
        bytes: u64,
        rel: String,
    },
    /// Copy a source-only file to the destination.
    Create {
        src: PathBuf,
        dst: PathBuf,
        bytes: u64,
        rel: String,
    },
    /// Overwrite a stale destination file with the newer source copy.
    Update {
        src: PathBuf,
        dst: PathBuf,
        delta: i64,
        rel: String,
    },
    /// Create a source-only empty directory in the destination.
    CreateDir { path: PathBuf, rel: String },
}

impl Operation {
    pub fn kind(&self) -> OpKind {
        match self {
            Operation::DeleteDir { .. } => OpKind::DeleteDir,
            Operation::Rename { .. } => OpKind::Rename,
            Operation::Delete { .. } => OpKind::Delete,
            Operation::Create { .. } => OpKind::Create,
            Operation::Update { .. } => OpKind::Update,
            Operation::CreateDir { .. } => OpKind::CreateDir,
        }
    }

    /// Expected net change in stored bytes if the operation succeeds.
    /// Renames and directory operations contribute zero.
    pub fn byte_delta(&self) -> i64 {
        match self {
            Operation::Create { bytes, .. } => *bytes as i64,
            Operation::Update { delta, .. } => *delta,
            Operation::Delete { bytes, .. } => -(*bytes as i64),
            _ => 0,
        }
    }

    /// One-line summary in emission order, tagged `+`, `U`, `-` or `R`
    /// (directory variants carry a trailing separator).
    pub fn summary(&self) -> String {
        let sep = std::path::MAIN_SEPARATOR;
        match self {
            Operation::DeleteDir { rel, .. } => format!("- {rel}{sep}"),
            Operation::Rename { rel_from, rel_to, .. } => format!("R {rel_from} -> {rel_to}"),
            Operation::Delete { rel, .. } => format!("- {rel}"),
            Operation::Create { rel, .. } => format!("+ {rel}"),
            Operation::Update { rel, .. } => format!("U {rel}"),
            Operation::CreateDir { rel, .. } => format!("+ {rel}{sep}"),
        }
    }
}

/// Planner knobs; see `SyncOptions` for the user-facing defaults.
#[derive(Debug, Clone, Default)]
pub struct PlanOptions {
    /// Quarantine root; destination-only files are left untouched when absent.
    pub trash_root: Option<PathBuf>,
    /// Minimum size for rename eligibility; `None` disables rename detection.
    pub rename_threshold: Option<u64>,
    /// Confirm rename candidates by comparing a trailing byte window.
    pub content_verify: bool,
}

/// Reverse-index value for a metadata signature. Once two paths share a
/// signature, none of them is a rename candidate.
#[derive(Debug, PartialEq, Eq)]
enum SigOwner {
    Unique(String),
    Ambiguous,
}

fn reverse_index<'a>(
    keys: &[String],
    files: &'a std::collections::BTreeMap<String, Metadata>,
) -> HashMap<Metadata, SigOwner> {
    let mut index: HashMap<Metadata, SigOwner> = HashMap::new();
    for key in keys {
        index
            .entry(files[key])
            .and_modify(|owner| *owner = SigOwner::Ambiguous)
            .or_insert_with(|| SigOwner::Unique(key.clone()));
    }
    index
}

/// Compare two snapshots and produce the ordered, lazy operation sequence.
/// A pure function of its inputs: re-invoking with the same snapshots yields
/// the same sequence.
pub fn plan<'a>(
    src: &'a Snapshot,
    dst: &'a Snapshot,
    opts: &PlanOptions,
) -> impl Iterator<Item = Operation> + 'a {
    let mut src_only: Vec<String> = src
        .files()
        .keys()
        .filter(|k| !dst.files().contains_key(*k))
        .cloned()
        .collect();
    let mut dst_only: Vec<String> = dst
        .files()
        .keys()
        .filter(|k| !src.files().contains_key(*k))
        .cloned()
        .collect();
    let both: Vec<String> = src
        .files()
        .keys()
        .filter(|k| dst.files().contains_key(*k))
        .cloned()
        .collect();

    let renames = match opts.rename_threshold {
        Some(threshold) => pair_renames(
            src,
            dst,
            &mut src_only,
            &mut dst_only,
            threshold,
            opts.content_verify,
        ),
        None => Vec::new(),
    };

    let dir_deletes = dst
        .empty_dirs()
        .difference(src.empty_dirs())
        .cloned()
        .collect::<Vec<_>>()
        .into_iter()
        .map(move |key| {
            let rel = dst.real_name(&key).display().to_string();
            Operation::DeleteDir {
                path: dst.real_path(&key),
                rel,
            }
        });

    let rename_ops = renames.into_iter().map(move |(rel_from, rel_to)| {
        let from = dst.root().join(&rel_from);
        let to = dst.root().join(&rel_to);
        Operation::Rename {
            from,
            to,
            rel_from: rel_from.display().to_string(),
            rel_to: rel_to.display().to_string(),
        }
    });

    let trash_root = opts.trash_root.clone();
    let deletes = dst_only.into_iter().filter_map(move |key| {
        let trash = trash_root.as_ref()?;
        let rel_real = dst.real_name(&key);
        Some(Operation::Delete {
            from: dst.real_path(&key),
            to: trash.join(rel_real),
            bytes: dst.files()[&key].size,
            rel: rel_real.display().to_string(),
        })
    });

    let creates = src_only.into_iter().map(move |key| {
        let rel_real = src.real_name(&key);
        Operation::Create {
            src: src.real_path(&key),
            dst: dst.root().join(rel_real),
            bytes: src.files()[&key].size,
            rel: rel_real.display().to_string(),
        }
    });

    let updates = both.into_iter().filter_map(move |key| {
        let src_meta = src.files()[&key];
        let dst_meta = dst.files()[&key];
        if src_meta.mtime > dst_meta.mtime {
            Some(Operation::Update {
                src: src.real_path(&key),
                dst: dst.real_path(&key),
                delta: src_meta.size as i64 - dst_meta.size as i64,
                rel: dst.real_name(&key).display().to_string(),
            })
        } else {
            if src_meta.mtime < dst_meta.mtime {
                // Destination ahead of source: reportable anomaly, never
                // auto-resolved in either direction.
                warn!(
                    path = %dst.real_name(&key).display(),
                    "working copy is older than backed-up copy, skipping update"
                );
            }
            None
        }
    });

    let dir_creates = src
        .empty_dirs()
        .difference(dst.empty_dirs())
        .cloned()
        .collect::<Vec<_>>()
        .into_iter()
        .map(move |key| {
            let rel_real = src.real_name(&key);
            Operation::CreateDir {
                path: dst.root().join(rel_real),
                rel: rel_real.display().to_string(),
            }
        });

    dir_deletes
        .chain(rename_ops)
        .chain(deletes)
        .chain(creates)
        .chain(updates)
        .chain(dir_creates)
}

/// Pair destination-only files with source-only files sharing an unambiguous
/// metadata signature. Claimed keys are removed from both lists; returned
/// pairs are (old destination rel path, new rel path), both original casing.
fn pair_renames(
    src: &Snapshot,
    dst: &Snapshot,
    src_only: &mut Vec<String>,
    dst_only: &mut Vec<String>,
    threshold: u64,
    content_verify: bool,
) -> Vec<(PathBuf, PathBuf)> {
    // Ambiguity considers every unmatched file, including ones below the
    // size threshold; the threshold only gates which files seek a match.
    let src_index = reverse_index(src_only, src.files());
    let dst_index = reverse_index(dst_only, dst.files());

    let mut pairs = Vec::new();
    for key in dst_only.clone() {
        let meta = dst.files()[&key];
        if meta.size < threshold {
            continue;
        }
        let Some(SigOwner::Unique(rename_to)) = src_index.get(&meta) else {
            continue;
        };
        let Some(SigOwner::Unique(rename_from)) = dst_index.get(&meta) else {
            continue;
        };
        if *rename_from != key {
            continue;
        }
        if content_verify && !tails_match(&src.real_path(rename_to), &dst.real_path(&key)) {
            continue;
        }

        src_only.retain(|k| k != rename_to);
        dst_only.retain(|k| k != &key);
        pairs.push((
            dst.real_name(&key).to_path_buf(),
            src.real_name(rename_to).to_path_buf(),
        ));
    }
    pairs
}

/// Compare the trailing byte windows of two files. An unreadable file voids
/// the candidacy rather than failing the plan.
fn tails_match(a: &Path, b: &Path) -> bool {
    match (last_bytes(a, VERIFY_WINDOW), last_bytes(b, VERIFY_WINDOW)) {
        (Ok(ta), Ok(tb)) => ta == tb,
        (Err(e), _) => {
            warn!(path = %a.display(), error = %e, "could not read tail, skipping rename candidate");
            false
        }
        (_, Err(e)) => {
            warn!(path = %b.display(), error = %e, "could not read tail, skipping rename candidate");
            false
        }
    }
}

/// Read the last `n` bytes of a file (the whole file if smaller).
fn last_bytes(path: &Path, n: u64) -> io::Result<Vec<u8>> {
    let mut f = File::open(path)?;
    let len = f.metadata()?.len();
    let take = n.min(len);
    f.seek(SeekFrom::End(-(take as i64)))?;
    let mut buf = Vec::with_capacity(take as usize);
    f.read_to_end(&mut buf)?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::FilterSet;
    use crate::scan::scan;
    use filetime::{FileTime, set_file_mtime};
    use std::fs;
    use std::path::Path;
    use tempfile::tempdir;

    fn all() -> FilterSet {
        FilterSet::compile("+ **/*/ **/*", false, false).unwrap()
    }

    fn write_at(path: &Path, data: &[u8], mtime_secs: i64) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, data).unwrap();
        set_file_mtime(path, FileTime::from_unix_time(mtime_secs, 0)).unwrap();
    }

    fn snap(root: &Path) -> Snapshot {
        scan(root, &all(), false, false).unwrap()
    }

    fn plan_all(src: &Snapshot, dst: &Snapshot, opts: &PlanOptions) -> Vec<Operation> {
        plan(src, dst, opts).collect()
    }

    const T: i64 = 1_700_000_000;

    #[test]
    fn create_update_delete_and_deltas() {
        let s = tempdir().unwrap();
        let d = tempdir().unwrap();
        write_at(&s.path().join("new.txt"), b"fresh", T);
        write_at(&s.path().join("stale.txt"), &[7u8; 100], T + 10);
        write_at(&d.path().join("stale.txt"), &[7u8; 40], T);
        write_at(&d.path().join("extra.txt"), b"gone", T);

        let trash = tempdir().unwrap();
        let opts = PlanOptions {
            trash_root: Some(trash.path().to_path_buf()),
            rename_threshold: None,
            content_verify: false,
        };
        let ops = plan_all(&snap(s.path()), &snap(d.path()), &opts);
        assert_eq!(ops.len(), 3);

        assert!(matches!(&ops[0], Operation::Delete { bytes: 4, .. }));
        assert_eq!(ops[0].byte_delta(), -4);
        assert_eq!(ops[0].summary(), "- extra.txt");

        assert!(matches!(&ops[1], Operation::Create { bytes: 5, .. }));
        assert_eq!(ops[1].summary(), "+ new.txt");

        assert!(matches!(&ops[2], Operation::Update { delta: 60, .. }));
        assert_eq!(ops[2].summary(), "U stale.txt");
    }

    #[test]
    fn no_trash_means_no_delete() {
        let s = tempdir().unwrap();
        let d = tempdir().unwrap();
        write_at(&d.path().join("extra.txt"), b"keep", T);

        let ops = plan_all(&snap(s.path()), &snap(d.path()), &PlanOptions::default());
        assert!(ops.is_empty());
    }

    #[test]
    fn equal_mtime_or_newer_destination_emits_nothing() {
        let s = tempdir().unwrap();
        let d = tempdir().unwrap();
        write_at(&s.path().join("same.txt"), b"a", T);
        write_at(&d.path().join("same.txt"), b"a", T);
        write_at(&s.path().join("behind.txt"), b"b", T);
        write_at(&d.path().join("behind.txt"), b"b", T + 5);

        let ops = plan_all(&snap(s.path()), &snap(d.path()), &PlanOptions::default());
        assert!(ops.is_empty());
    }

    #[test]
    fn rename_detected_by_signature() {
        let s = tempdir().unwrap();
        let d = tempdir().unwrap();
        let body = vec![3u8; 20_000];
        write_at(&s.path().join("new-name.txt"), &body, T);
        write_at(&d.path().join("old-name.txt"), &body, T);

        let opts = PlanOptions {
            trash_root: None,
            rename_threshold: Some(10_000),
            content_verify: true,
        };
        let ops = plan_all(&snap(s.path()), &snap(d.path()), &opts);
        assert_eq!(ops.len(), 1);
        match &ops[0] {
            Operation::Rename { from, to, .. } => {
                // Both endpoints live in the destination tree.
                assert_eq!(from, &d.path().join("old-name.txt"));
                assert_eq!(to, &d.path().join("new-name.txt"));
            }
            other => panic!("expected rename, got {other:?}"),
        }
        assert_eq!(ops[0].byte_delta(), 0);
        assert_eq!(ops[0].summary(), "R old-name.txt -> new-name.txt");
    }

    #[test]
    fn threshold_boundary_is_inclusive() {
        let s = tempdir().unwrap();
        let d = tempdir().unwrap();
        write_at(&s.path().join("eligible-new"), &[1u8; 1000], T);
        write_at(&d.path().join("eligible-old"), &[1u8; 1000], T);

        let opts = PlanOptions {
            trash_root: None,
            rename_threshold: Some(1000),
            content_verify: false,
        };
        let ops = plan_all(&snap(s.path()), &snap(d.path()), &opts);
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].kind(), OpKind::Rename);
    }

    #[test]
    fn below_threshold_plans_delete_and_create() {
        let s = tempdir().unwrap();
        let d = tempdir().unwrap();
        let trash = tempdir().unwrap();
        write_at(&s.path().join("small-new"), &[1u8; 999], T);
        write_at(&d.path().join("small-old"), &[1u8; 999], T);

        let opts = PlanOptions {
            trash_root: Some(trash.path().to_path_buf()),
            rename_threshold: Some(1000),
            content_verify: false,
        };
        let ops = plan_all(&snap(s.path()), &snap(d.path()), &opts);
        let kinds: Vec<OpKind> = ops.iter().map(Operation::kind).collect();
        assert_eq!(kinds, vec![OpKind::Delete, OpKind::Create]);
    }

    #[test]
    fn ambiguity_disqualifies_every_sharer() {
        let s = tempdir().unwrap();
        let d = tempdir().unwrap();
        let body = vec![9u8; 5000];
        // Three files with one identical signature within the destination.
        write_at(&d.path().join("one"), &body, T);
        write_at(&d.path().join("two"), &body, T);
        write_at(&d.path().join("three"), &body, T);
        write_at(&s.path().join("moved"), &body, T);

        let opts = PlanOptions {
            trash_root: None,
            rename_threshold: Some(1),
            content_verify: false,
        };
        let ops = plan_all(&snap(s.path()), &snap(d.path()), &opts);
        // No rename for any sharer; the source file is an independent create.
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].kind(), OpKind::Create);
    }

    #[test]
    fn ambiguous_source_side_also_disqualifies() {
        let s = tempdir().unwrap();
        let d = tempdir().unwrap();
        let body = vec![5u8; 4000];
        write_at(&s.path().join("cand-a"), &body, T);
        write_at(&s.path().join("cand-b"), &body, T);
        write_at(&d.path().join("orphan"), &body, T);

        let opts = PlanOptions {
            trash_root: None,
            rename_threshold: Some(1),
            content_verify: false,
        };
        let ops = plan_all(&snap(s.path()), &snap(d.path()), &opts);
        let kinds: Vec<OpKind> = ops.iter().map(Operation::kind).collect();
        assert_eq!(kinds, vec![OpKind::Create, OpKind::Create]);
    }

    #[test]
    fn content_verify_voids_mismatched_tail() {
        let s = tempdir().unwrap();
        let d = tempdir().unwrap();
        let mut a = vec![0u8; 3000];
        let mut b = vec![0u8; 3000];
        a[2999] = 1;
        b[2999] = 2;
        write_at(&s.path().join("renamed"), &a, T);
        write_at(&d.path().join("original"), &b, T);

        let base = PlanOptions {
            trash_root: None,
            rename_threshold: Some(1),
            content_verify: true,
        };
        let ops = plan_all(&snap(s.path()), &snap(d.path()), &base);
        assert_eq!(ops[0].kind(), OpKind::Create);

        // Metadata-only pairing accepts the same pair.
        let relaxed = PlanOptions {
            content_verify: false,
            ..base
        };
        let ops = plan_all(&snap(s.path()), &snap(d.path()), &relaxed);
        assert_eq!(ops[0].kind(), OpKind::Rename);
    }

    #[test]
    fn directory_operations_bracket_the_sequence() {
        let s = tempdir().unwrap();
        let d = tempdir().unwrap();
        fs::create_dir_all(s.path().join("fresh-dir")).unwrap();
        fs::create_dir_all(d.path().join("stale-dir")).unwrap();
        write_at(&s.path().join("f.txt"), b"f", T);

        let ops = plan_all(&snap(s.path()), &snap(d.path()), &PlanOptions::default());
        let kinds: Vec<OpKind> = ops.iter().map(Operation::kind).collect();
        assert_eq!(kinds, vec![OpKind::DeleteDir, OpKind::Create, OpKind::CreateDir]);
        let sep = std::path::MAIN_SEPARATOR;
        assert_eq!(ops[0].summary(), format!("- stale-dir{sep}"));
        assert_eq!(ops[2].summary(), format!("+ fresh-dir{sep}"));
    }

    #[test]
    fn shared_empty_dirs_are_left_alone() {
        let s = tempdir().unwrap();
        let d = tempdir().unwrap();
        fs::create_dir_all(s.path().join("both")).unwrap();
        fs::create_dir_all(d.path().join("both")).unwrap();

        let ops = plan_all(&snap(s.path()), &snap(d.path()), &PlanOptions::default());
        assert!(ops.is_empty());
    }

    #[test]
    fn last_bytes_reads_whole_short_file() {
        let td = tempdir().unwrap();
        let p = td.path().join("short");
        fs::write(&p, b"tiny").unwrap();
        assert_eq!(last_bytes(&p, 1024).unwrap(), b"tiny");
    }
}
