//! A second pass over a freshly synchronized pair plans nothing.

use assert_fs::prelude::*;
use filetime::{FileTime, set_file_mtime};

use psync::SyncOptions;

#[test]
fn second_run_is_a_no_op() {
    let temp = assert_fs::TempDir::new().unwrap();
    let src = temp.child("src");
    let dst = temp.child("dst");
    src.create_dir_all().unwrap();

    let a = src.child("a.txt");
    a.write_str("alpha").unwrap();
    set_file_mtime(a.path(), FileTime::from_unix_time(1_700_000_000, 0)).unwrap();
    let b = src.child("nested/b.txt");
    b.write_str("beta").unwrap();
    set_file_mtime(b.path(), FileTime::from_unix_time(1_700_000_100, 0)).unwrap();
    src.child("hollow").create_dir_all().unwrap();

    let opts = SyncOptions::new(src.path(), dst.path());

    let mut sink = |_: &str| {};
    let first = psync::sync(&opts, &mut sink).unwrap();
    assert!(first.is_clean());
    assert_eq!(first.created, 2);
    assert_eq!(first.dirs_created, 1);

    dst.child("a.txt").assert("alpha");
    dst.child("nested/b.txt").assert("beta");
    assert!(dst.child("hollow").path().is_dir());

    let mut lines: Vec<String> = Vec::new();
    let mut sink = |l: &str| lines.push(l.to_string());
    let second = psync::sync(&opts, &mut sink).unwrap();

    assert!(lines.is_empty(), "unexpected operations: {lines:?}");
    assert!(second.is_clean());
    assert_eq!(second.created + second.updated + second.renamed, 0);
    assert_eq!(second.byte_diff, 0);
}
