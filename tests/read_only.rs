//! Read-only archives refuse every mutation and never touch the file.

mod common;

use apkzip::format::ExtraField;
use apkzip::{Error, ZipExtension, ZipFile, ZipOptions};
use common::*;

fn read_only_zip() -> (tempfile::TempDir, std::path::PathBuf, Vec<u8>) {
    let (dir, path) = scratch_zip();
    create_zip(&path, &[("a", b"first"), ("b", b"second")]);
    let bytes = std::fs::read(&path).unwrap();
    (dir, path, bytes)
}

// ============================================================================
// Reading
// ============================================================================

#[test]
fn test_read_only_can_read() {
    let (_dir, path, _) = read_only_zip();
    let zip = ZipFile::open_read_only(&path, ZipOptions::default()).unwrap();
    assert!(zip.is_read_only());
    assert_eq!(zip.len(), 2);
    assert_eq!(zip.read("a").unwrap(), b"first");
    assert_eq!(zip.read("b").unwrap(), b"second");

    let mut buf = [0u8; 4];
    zip.direct_read(0, &mut buf).unwrap();
    assert_eq!(buf, [0x50, 0x4b, 0x03, 0x04]);
}

#[test]
fn test_read_only_missing_file() {
    let (_dir, path) = scratch_zip();
    let err = ZipFile::open_read_only(&path, ZipOptions::default()).unwrap_err();
    assert!(matches!(err, Error::Io(_)));
    assert!(!path.exists());
}

// ============================================================================
// Refused Mutations
// ============================================================================

struct Silent;

impl ZipExtension for Silent {}

#[test]
fn test_read_only_refuses_mutations() {
    let (dir, path, before) = read_only_zip();
    let other_path = dir.path().join("other.zip");
    create_zip(&other_path, &[("c", b"third")]);
    let other = ZipFile::open_read_only(&other_path, ZipOptions::default()).unwrap();
    let mut zip = ZipFile::open_read_only(&path, ZipOptions::default()).unwrap();

    let results = [
        zip.add("c", &mut &b"x"[..], false).err(),
        zip.delete("a").err(),
        zip.set_local_extra("a", ExtraField::default()).err(),
        zip.set_extra_directory_offset(10).err(),
        zip.set_eocd_comment(b"comment").err(),
        zip.direct_write(0, b"PK").err(),
        zip.sort_zip_contents().err(),
        zip.touch().err(),
        zip.realign().err(),
        zip.update().err(),
        zip.add_extension(Box::new(Silent)).err(),
        zip.merge_from(&other, |_| false).err(),
    ];
    for err in results {
        let err = err.expect("mutation must fail");
        assert!(matches!(err, Error::ReadOnly { .. }), "{err}");
        assert!(err.is_usage_error());
    }

    assert_eq!(zip.len(), 2);
    assert!(zip.get("c").is_none());
    assert!(!zip.is_dirty());
    zip.close().unwrap();
    other.close().unwrap();
    assert_eq!(std::fs::read(&path).unwrap(), before);
}

#[test]
fn test_read_only_add_all_recursively() {
    let (dir, path, before) = read_only_zip();
    let file = write_file(dir.path(), "extra.txt", b"extra");
    let mut zip = ZipFile::open_read_only(&path, ZipOptions::default()).unwrap();
    assert!(matches!(
        zip.add_all_recursively(&file, |_| true),
        Err(Error::ReadOnly { .. })
    ));
    drop(zip);
    assert_eq!(std::fs::read(&path).unwrap(), before);
}

#[test]
fn test_read_only_merge_source() {
    let (dir, path, before) = read_only_zip();
    let target = dir.path().join("target.zip");
    let source = ZipFile::open_read_only(&path, ZipOptions::default()).unwrap();

    let mut zip = ZipFile::open(&target, ZipOptions::default()).unwrap();
    zip.merge_from(&source, |_| false).unwrap();
    zip.close().unwrap();
    source.close().unwrap();

    assert_eq!(std::fs::read(&path).unwrap(), before);
    let zip = ZipFile::open(&target, ZipOptions::default()).unwrap();
    assert_eq!(zip.read("b").unwrap(), b"second");
}
