//! Run configuration and pre-flight validation.

use std::fs;
use std::path::{Path, PathBuf};

use crate::errors::InputError;

/// Filter applied when the user supplies none: every directory and file.
pub const DEFAULT_FILTER: &str = "+ **/*/ **/*";

/// Files below this size never enter rename pairing.
pub const DEFAULT_RENAME_THRESHOLD: u64 = 10_000;

/// Everything one run needs. Collected up front so [`crate::sync`] takes a
/// single value whether it was built from the command line or by a caller.
#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub src_root: PathBuf,
    pub dst_root: PathBuf,
    /// Quarantine root; `None` leaves destination-only files in place.
    pub trash_root: Option<PathBuf>,
    pub filter: String,
    pub ignore_hidden: bool,
    pub follow_symlinks: bool,
    /// `None` disables rename detection entirely.
    pub rename_threshold: Option<u64>,
    pub content_verify: bool,
    pub case_insensitive: bool,
    pub dry_run: bool,
}

impl SyncOptions {
    pub fn new(src_root: impl Into<PathBuf>, dst_root: impl Into<PathBuf>) -> Self {
        Self {
            src_root: src_root.into(),
            dst_root: dst_root.into(),
            trash_root: None,
            filter: DEFAULT_FILTER.to_string(),
            ignore_hidden: false,
            follow_symlinks: false,
            rename_threshold: Some(DEFAULT_RENAME_THRESHOLD),
            content_verify: true,
            case_insensitive: cfg!(windows),
            dry_run: false,
        }
    }

    /// Reject invalid roots before anything is created or scanned.
    pub fn validate(&self) -> Result<(), InputError> {
        let src_meta = fs::metadata(&self.src_root)
            .map_err(|_| InputError::SourceMissing(self.src_root.clone()))?;
        if !src_meta.is_dir() {
            return Err(InputError::SourceNotADirectory(self.src_root.clone()));
        }

        if let Ok(dst_meta) = fs::metadata(&self.dst_root) {
            if !dst_meta.is_dir() {
                return Err(InputError::DestNotADirectory(self.dst_root.clone()));
            }
            // Same directory through links or casing would make the run
            // delete what it just copied.
            if let (Ok(s), Ok(d)) = (
                dunce::canonicalize(&self.src_root),
                dunce::canonicalize(&self.dst_root),
            ) {
                if s == d {
                    return Err(InputError::SameRoot(s));
                }
            }
        }

        if let Some(trash) = &self.trash_root {
            if let Ok(meta) = fs::metadata(trash) {
                if !meta.is_dir() {
                    return Err(InputError::TrashNotADirectory(trash.clone()));
                }
            }
        }
        Ok(())
    }
}

/// Quarantine moves use `rename`, so the trash must share the destination's
/// file system. Checked after both directories exist.
pub fn check_trash_device(dst_root: &Path, trash_root: &Path) -> Result<(), InputError> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::MetadataExt;
        let dst = fs::metadata(dst_root).map_err(|source| InputError::CreateRoot {
            path: dst_root.to_path_buf(),
            source,
        })?;
        let trash = fs::metadata(trash_root).map_err(|source| InputError::CreateRoot {
            path: trash_root.to_path_buf(),
            source,
        })?;
        if dst.dev() != trash.dev() {
            return Err(InputError::TrashCrossDevice(trash_root.to_path_buf()));
        }
    }
    #[cfg(not(unix))]
    let _ = (dst_root, trash_root);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_source_is_rejected() {
        let td = tempdir().unwrap();
        let opts = SyncOptions::new(td.path().join("absent"), td.path().join("dst"));
        assert!(matches!(
            opts.validate(),
            Err(InputError::SourceMissing(_))
        ));
    }

    #[test]
    fn file_source_is_rejected() {
        let td = tempdir().unwrap();
        let f = td.path().join("f");
        fs::write(&f, b"x").unwrap();
        let opts = SyncOptions::new(&f, td.path().join("dst"));
        assert!(matches!(
            opts.validate(),
            Err(InputError::SourceNotADirectory(_))
        ));
    }

    #[test]
    fn file_destination_is_rejected() {
        let td = tempdir().unwrap();
        let src = td.path().join("src");
        fs::create_dir(&src).unwrap();
        let dst = td.path().join("dst");
        fs::write(&dst, b"x").unwrap();
        let opts = SyncOptions::new(&src, &dst);
        assert!(matches!(
            opts.validate(),
            Err(InputError::DestNotADirectory(_))
        ));
    }

    #[test]
    fn identical_roots_are_rejected() {
        let td = tempdir().unwrap();
        let opts = SyncOptions::new(td.path(), td.path());
        assert!(matches!(opts.validate(), Err(InputError::SameRoot(_))));
    }

    #[cfg(unix)]
    #[test]
    fn symlinked_destination_to_source_is_rejected() {
        let td = tempdir().unwrap();
        let src = td.path().join("src");
        fs::create_dir(&src).unwrap();
        let link = td.path().join("alias");
        std::os::unix::fs::symlink(&src, &link).unwrap();
        let opts = SyncOptions::new(&src, &link);
        assert!(matches!(opts.validate(), Err(InputError::SameRoot(_))));
    }

    #[test]
    fn nonexistent_destination_is_fine() {
        let td = tempdir().unwrap();
        let src = td.path().join("src");
        fs::create_dir(&src).unwrap();
        let opts = SyncOptions::new(&src, td.path().join("new-dst"));
        opts.validate().unwrap();
    }

    #[test]
    fn trash_on_same_device_passes() {
        let td = tempdir().unwrap();
        let dst = td.path().join("dst");
        let trash = td.path().join("trash");
        fs::create_dir_all(&dst).unwrap();
        fs::create_dir_all(&trash).unwrap();
        check_trash_device(&dst, &trash).unwrap();
    }
}
