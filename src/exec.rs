//! Operation executor: applies planned operations to the destination tree.
//!
//! File payloads are written via a unique sibling temp file and renamed into
//! place, so an interrupted run never leaves a partially written file under
//! its final name. Timestamp and permission preservation is best-effort;
//! everything else that fails surfaces as an [`OpError`] for the caller to
//! record.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{trace, warn};

use crate::errors::OpError;
use crate::plan::Operation;

const BUF_SIZE: usize = 1024 * 1024;

/// Applies operations against one destination root. The root bounds the
/// empty-ancestor cleanup after moves.
#[derive(Debug)]
pub struct Executor {
    dst_root: PathBuf,
    follow_symlinks: bool,
}

impl Executor {
    pub fn new(dst_root: impl Into<PathBuf>, follow_symlinks: bool) -> Self {
        Self {
            dst_root: dst_root.into(),
            follow_symlinks,
        }
    }

    /// Apply one operation. Errors are per-operation: the executor carries no
    /// state between calls, so a failure never poisons later operations.
    pub fn apply(&self, op: &Operation) -> Result<(), OpError> {
        match op {
            Operation::Create { src, dst, .. } | Operation::Update { src, dst, .. } => {
                copy_file(src, dst, self.follow_symlinks)
            }
            Operation::Delete { from, to, .. } | Operation::Rename { from, to, .. } => {
                self.move_entry(from, to)
            }
            Operation::CreateDir { path, .. } => {
                fs::create_dir_all(path).map_err(OpError::at(path))
            }
            Operation::DeleteDir { path, .. } => delete_empty_dir(path),
        }
    }

    /// Rename `from` to `to` within the destination device, then prune any
    /// directories the move left empty, stopping at the destination root.
    fn move_entry(&self, from: &Path, to: &Path) -> Result<(), OpError> {
        if fs::symlink_metadata(to).is_ok() && !same_file(from, to) {
            return Err(OpError::new(
                to,
                io::Error::new(io::ErrorKind::AlreadyExists, "target already exists"),
            ));
        }
        if let Some(parent) = to.parent() {
            fs::create_dir_all(parent).map_err(OpError::at(parent))?;
        }
        fs::rename(from, to).map_err(OpError::at(from))?;
        trace!(from = %from.display(), to = %to.display(), "moved");
        if let Some(parent) = from.parent() {
            self.delete_empty_ancestors(parent);
        }
        Ok(())
    }

    /// Remove now-empty directories from `start` upward, never crossing the
    /// destination root. Best-effort: cleanup failures are logged, not fatal.
    fn delete_empty_ancestors(&self, start: &Path) {
        let mut dir = start.to_path_buf();
        while dir != self.dst_root && dir.starts_with(&self.dst_root) {
            match fs::read_dir(&dir) {
                Ok(mut children) => {
                    if children.next().is_some() {
                        return;
                    }
                }
                Err(e) => {
                    warn!(path = %dir.display(), error = %e, "could not inspect directory during cleanup");
                    return;
                }
            }
            if let Err(e) = fs::remove_dir(&dir) {
                warn!(path = %dir.display(), error = %e, "could not remove empty directory");
                return;
            }
            trace!(path = %dir.display(), "removed empty directory");
            let Some(parent) = dir.parent() else { return };
            dir = parent.to_path_buf();
        }
    }
}

/// Copy `src` over `dst` through a unique sibling temp file, preserving the
/// source mtime and permissions, then rename into place. When links are not
/// followed, a symlink source is mirrored as a link rather than dereferenced.
fn copy_file(src: &Path, dst: &Path, follow_symlinks: bool) -> Result<(), OpError> {
    let parent = dst.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent).map_err(OpError::at(parent))?;

    if !follow_symlinks {
        let src_meta = fs::symlink_metadata(src).map_err(OpError::at(src))?;
        if src_meta.file_type().is_symlink() {
            return copy_link(src, dst, &src_meta);
        }
    }

    let tmp = unique_temp_path(parent);
    let result = write_temp_copy(src, &tmp).and_then(|()| rename_into_place(&tmp, dst));
    if result.is_err() {
        // Leave no orphaned temp behind a failed copy.
        let _ = fs::remove_file(&tmp);
    }
    result
}

/// Recreate the symlink `src` at `dst` with the same target, via a unique
/// temp name so the swap stays atomic. Link mtime is carried best-effort.
fn copy_link(src: &Path, dst: &Path, src_meta: &fs::Metadata) -> Result<(), OpError> {
    let parent = dst.parent().unwrap_or_else(|| Path::new("."));
    let target = fs::read_link(src).map_err(OpError::at(src))?;

    let tmp = unique_temp_path(parent);
    let result = symlink_any(&target, &tmp)
        .map_err(OpError::at(&tmp))
        .and_then(|()| {
            let mtime = filetime::FileTime::from_last_modification_time(src_meta);
            let _ = filetime::set_symlink_file_times(&tmp, mtime, mtime);
            rename_into_place(&tmp, dst)
        });
    if result.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    result
}

#[cfg(unix)]
fn symlink_any(target: &Path, link: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

#[cfg(windows)]
fn symlink_any(target: &Path, link: &Path) -> io::Result<()> {
    // Relative targets resolve against the link's own directory.
    let resolved = match link.parent() {
        Some(parent) if target.is_relative() => parent.join(target),
        _ => target.to_path_buf(),
    };
    if resolved.is_dir() {
        std::os::windows::fs::symlink_dir(target, link)
    } else {
        std::os::windows::fs::symlink_file(target, link)
    }
}

/// Stream `src` into a freshly created `tmp` (never clobbers), fsync it, and
/// stamp the source metadata onto it before the rename makes it visible.
fn write_temp_copy(src: &Path, tmp: &Path) -> Result<(), OpError> {
    let src_f = File::open(src).map_err(OpError::at(src))?;
    let src_meta = src_f.metadata().map_err(OpError::at(src))?;

    let tmp_f = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(tmp)
        .map_err(OpError::at(tmp))?;

    let mut reader = BufReader::with_capacity(BUF_SIZE, src_f);
    let mut writer = BufWriter::with_capacity(BUF_SIZE, tmp_f);
    io::copy(&mut reader, &mut writer).map_err(OpError::at(tmp))?;
    writer.flush().map_err(OpError::at(tmp))?;
    writer.get_ref().sync_all().map_err(OpError::at(tmp))?;
    drop(writer);

    preserve_metadata(tmp, &src_meta);
    Ok(())
}

/// Timestamps and permissions are copied best-effort; a failure here must not
/// turn a completed copy into an error.
fn preserve_metadata(dest: &Path, src_meta: &fs::Metadata) {
    let mtime = filetime::FileTime::from_last_modification_time(src_meta);
    if let Err(e) = filetime::set_file_mtime(dest, mtime) {
        warn!(path = %dest.display(), error = %e, "failed to set mtime on destination");
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = src_meta.permissions().mode() & 0o777;
        if let Err(e) = fs::set_permissions(dest, fs::Permissions::from_mode(mode)) {
            warn!(path = %dest.display(), mode = format!("{mode:o}"), error = %e, "failed to set permissions on destination");
        }
    }
    #[cfg(windows)]
    {
        if let Ok(meta) = fs::metadata(dest) {
            let mut perms = meta.permissions();
            perms.set_readonly(src_meta.permissions().readonly());
            let _ = fs::set_permissions(dest, perms);
        }
    }
}

/// Rename `tmp` over `dst`. A read-only destination is made writable for
/// the swap and the attribute is put back afterwards, whether the swap
/// succeeded or not.
fn rename_into_place(tmp: &Path, dst: &Path) -> Result<(), OpError> {
    let was_readonly = is_readonly(dst);

    // Windows rename does not overwrite; clear the target first.
    #[cfg(windows)]
    if fs::symlink_metadata(dst).is_ok() {
        if let Err(e) = remove_possibly_readonly(dst) {
            if e.kind() != io::ErrorKind::NotFound {
                return Err(OpError::new(dst, e));
            }
        }
    }

    let outcome = match fs::rename(tmp, dst) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::PermissionDenied && was_readonly => {
            set_readonly(dst, false).map_err(OpError::at(dst))?;
            fs::rename(tmp, dst).map_err(OpError::at(dst))
        }
        Err(e) => Err(OpError::new(dst, e)),
    };

    // The attribute goes back on whatever now sits at the destination,
    // even when the retry failed.
    if was_readonly {
        let _ = set_readonly(dst, true);
    }
    outcome?;

    // Persist the rename itself (best-effort, Unix only).
    #[cfg(unix)]
    if let Some(parent) = dst.parent() {
        let _ = fsync_dir(parent);
    }
    Ok(())
}

#[cfg(windows)]
fn remove_possibly_readonly(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() == io::ErrorKind::PermissionDenied && is_readonly(path) => {
            set_readonly(path, false)?;
            fs::remove_file(path)
        }
        other => other,
    }
}

fn is_readonly(path: &Path) -> bool {
    fs::metadata(path).map(|m| m.permissions().readonly()).unwrap_or(false)
}

fn set_readonly(path: &Path, readonly: bool) -> io::Result<()> {
    let meta = fs::metadata(path)?;
    let mut perms = meta.permissions();
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = perms.mode();
        perms.set_mode(if readonly { mode & !0o222 } else { mode | 0o200 });
    }
    #[cfg(not(unix))]
    perms.set_readonly(readonly);
    fs::set_permissions(path, perms)
}

fn delete_empty_dir(path: &Path) -> Result<(), OpError> {
    let mut children = fs::read_dir(path).map_err(OpError::at(path))?;
    if children.next().is_some() {
        return Err(OpError::new(
            path,
            io::Error::new(io::ErrorKind::DirectoryNotEmpty, "directory not empty"),
        ));
    }
    fs::remove_dir(path).map_err(OpError::at(path))
}

static TEMP_SEQ: std::sync::atomic::AtomicU64 = std::sync::atomic::AtomicU64::new(0);

fn unique_temp_path(dst_dir: &Path) -> PathBuf {
    let pid = std::process::id();
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    let seq = TEMP_SEQ.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
    dst_dir.join(format!(".psync.{pid}.{nanos}.{seq}.tmp"))
}

/// Same underlying file, so a rename onto it is a no-op case rename rather
/// than a clobber.
fn same_file(a: &Path, b: &Path) -> bool {
    #[cfg(unix)]
    {
        use std::os::unix::fs::MetadataExt;
        match (fs::metadata(a), fs::metadata(b)) {
            (Ok(ma), Ok(mb)) => ma.dev() == mb.dev() && ma.ino() == mb.ino(),
            _ => false,
        }
    }
    #[cfg(not(unix))]
    {
        match (dunce::canonicalize(a), dunce::canonicalize(b)) {
            (Ok(ca), Ok(cb)) => ca == cb,
            _ => false,
        }
    }
}

#[cfg(unix)]
fn fsync_dir(dir: &Path) -> io::Result<()> {
    File::open(dir)?.sync_all()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::Operation;
    use filetime::{FileTime, set_file_mtime};
    use tempfile::tempdir;

    fn exec(root: &Path) -> Executor {
        Executor::new(root, false)
    }

    #[test]
    fn create_copies_payload_and_mtime() {
        let s = tempdir().unwrap();
        let d = tempdir().unwrap();
        let src = s.path().join("f.txt");
        fs::write(&src, b"payload").unwrap();
        set_file_mtime(&src, FileTime::from_unix_time(1_600_000_000, 0)).unwrap();

        let dst = d.path().join("deep/f.txt");
        let op = Operation::Create {
            src: src.clone(),
            dst: dst.clone(),
            bytes: 7,
            rel: "deep/f.txt".into(),
        };
        exec(d.path()).apply(&op).unwrap();

        assert_eq!(fs::read(&dst).unwrap(), b"payload");
        let got = FileTime::from_last_modification_time(&fs::metadata(&dst).unwrap());
        assert_eq!(got.unix_seconds(), 1_600_000_000);
    }

    #[cfg(unix)]
    #[test]
    fn create_preserves_mode() {
        use std::os::unix::fs::PermissionsExt;
        let s = tempdir().unwrap();
        let d = tempdir().unwrap();
        let src = s.path().join("x");
        fs::write(&src, b"x").unwrap();
        fs::set_permissions(&src, fs::Permissions::from_mode(0o640)).unwrap();

        let dst = d.path().join("x");
        copy_file(&src, &dst, false).unwrap();
        let mode = fs::metadata(&dst).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o640);
    }

    #[test]
    fn failed_copy_leaves_no_temp() {
        let d = tempdir().unwrap();
        let dst = d.path().join("out");
        let err = copy_file(Path::new("/nonexistent/source"), &dst, false).unwrap_err();
        assert_eq!(err.kind, io::ErrorKind::NotFound);
        assert_eq!(fs::read_dir(d.path()).unwrap().count(), 0);
    }

    #[cfg(unix)]
    #[test]
    fn update_replaces_readonly_destination() {
        use std::os::unix::fs::PermissionsExt;
        let s = tempdir().unwrap();
        let d = tempdir().unwrap();
        let src = s.path().join("f");
        fs::write(&src, b"new").unwrap();
        fs::set_permissions(&src, fs::Permissions::from_mode(0o644)).unwrap();
        let dst = d.path().join("f");
        fs::write(&dst, b"old").unwrap();
        fs::set_permissions(&dst, fs::Permissions::from_mode(0o444)).unwrap();

        copy_file(&src, &dst, false).unwrap();
        assert_eq!(fs::read(&dst).unwrap(), b"new");
        // The replacement carries the source mode; the read-only bit that the
        // swap had to clear is put back on the result.
        let mode = fs::metadata(&dst).unwrap().permissions().mode();
        assert_eq!(mode & 0o222, 0);
    }

    #[cfg(windows)]
    #[test]
    fn update_restores_readonly_attribute() {
        let s = tempdir().unwrap();
        let d = tempdir().unwrap();
        let src = s.path().join("f");
        fs::write(&src, b"new").unwrap();
        let dst = d.path().join("f");
        fs::write(&dst, b"old").unwrap();
        set_readonly(&dst, true).unwrap();

        copy_file(&src, &dst, false).unwrap();
        assert_eq!(fs::read(&dst).unwrap(), b"new");
        assert!(fs::metadata(&dst).unwrap().permissions().readonly());
    }

    #[cfg(unix)]
    #[test]
    fn symlink_source_is_mirrored_as_link() {
        let s = tempdir().unwrap();
        let d = tempdir().unwrap();
        fs::write(s.path().join("target.txt"), b"payload").unwrap();
        let link = s.path().join("link.txt");
        std::os::unix::fs::symlink("target.txt", &link).unwrap();

        let dst = d.path().join("link.txt");
        copy_file(&link, &dst, false).unwrap();

        let meta = fs::symlink_metadata(&dst).unwrap();
        assert!(meta.file_type().is_symlink());
        assert_eq!(fs::read_link(&dst).unwrap(), Path::new("target.txt"));
    }

    #[cfg(unix)]
    #[test]
    fn followed_symlink_source_is_dereferenced() {
        let s = tempdir().unwrap();
        let d = tempdir().unwrap();
        fs::write(s.path().join("target.txt"), b"payload").unwrap();
        let link = s.path().join("link.txt");
        std::os::unix::fs::symlink("target.txt", &link).unwrap();

        let dst = d.path().join("link.txt");
        copy_file(&link, &dst, true).unwrap();

        assert!(!fs::symlink_metadata(&dst).unwrap().file_type().is_symlink());
        assert_eq!(fs::read(&dst).unwrap(), b"payload");
    }

    #[test]
    fn move_refuses_existing_distinct_target() {
        let d = tempdir().unwrap();
        fs::write(d.path().join("a"), b"a").unwrap();
        fs::write(d.path().join("b"), b"b").unwrap();

        let err = exec(d.path())
            .move_entry(&d.path().join("a"), &d.path().join("b"))
            .unwrap_err();
        assert_eq!(err.kind, io::ErrorKind::AlreadyExists);
        // Both files untouched.
        assert_eq!(fs::read(d.path().join("a")).unwrap(), b"a");
        assert_eq!(fs::read(d.path().join("b")).unwrap(), b"b");
    }

    #[test]
    fn move_creates_target_parents_and_prunes_source_dirs() {
        let d = tempdir().unwrap();
        let from = d.path().join("old/deep/f.txt");
        fs::create_dir_all(from.parent().unwrap()).unwrap();
        fs::write(&from, b"f").unwrap();

        let to = d.path().join("new/f.txt");
        exec(d.path()).move_entry(&from, &to).unwrap();

        assert_eq!(fs::read(&to).unwrap(), b"f");
        // Emptied ancestors are gone, root itself survives.
        assert!(!d.path().join("old").exists());
        assert!(d.path().exists());
    }

    #[test]
    fn ancestor_cleanup_stops_at_nonempty_dir() {
        let d = tempdir().unwrap();
        let from = d.path().join("keep/deep/f.txt");
        fs::create_dir_all(from.parent().unwrap()).unwrap();
        fs::write(&from, b"f").unwrap();
        fs::write(d.path().join("keep/other.txt"), b"o").unwrap();

        exec(d.path())
            .move_entry(&from, &d.path().join("f.txt"))
            .unwrap();
        assert!(!d.path().join("keep/deep").exists());
        assert!(d.path().join("keep/other.txt").exists());
    }

    #[test]
    fn delete_dir_requires_empty() {
        let d = tempdir().unwrap();
        let dir = d.path().join("full");
        fs::create_dir(&dir).unwrap();
        fs::write(dir.join("f"), b"f").unwrap();

        let op = Operation::DeleteDir {
            path: dir.clone(),
            rel: "full".into(),
        };
        let err = exec(d.path()).apply(&op).unwrap_err();
        assert_eq!(err.kind, io::ErrorKind::DirectoryNotEmpty);
        assert!(dir.exists());

        fs::remove_file(dir.join("f")).unwrap();
        exec(d.path()).apply(&op).unwrap();
        assert!(!dir.exists());
    }

    #[test]
    fn create_dir_is_idempotent() {
        let d = tempdir().unwrap();
        let op = Operation::CreateDir {
            path: d.path().join("a/b"),
            rel: "a/b".into(),
        };
        let ex = exec(d.path());
        ex.apply(&op).unwrap();
        ex.apply(&op).unwrap();
        assert!(d.path().join("a/b").is_dir());
    }

    #[test]
    fn temp_names_are_unique() {
        let d = tempdir().unwrap();
        let a = unique_temp_path(d.path());
        let b = unique_temp_path(d.path());
        assert_ne!(a, b);
    }
}
