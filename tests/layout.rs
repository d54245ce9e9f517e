//! Entry ordering, alignment and gap covering.

mod common;

use apkzip::zip::AlignmentRule;
use apkzip::{ZipFile, ZipOptions};
use common::*;

fn names_by_offset(zip: &ZipFile) -> Vec<String> {
    let mut entries: Vec<(i64, String)> = zip.entries().map(|e| (e.offset(), e.name())).collect();
    entries.sort();
    entries.into_iter().map(|(_, name)| name).collect()
}

fn people_zip(path: &std::path::Path, options: ZipOptions) -> ZipFile {
    let mut zip = ZipFile::open(path, options).unwrap();
    zip.add("Mary.xml", &mut &[1u8, 2, 3][..], false).unwrap();
    zip.add("Andrew.txt", &mut &[4u8, 5][..], false).unwrap();
    zip.add("Beth.png", &mut &[6u8, 7, 8, 9][..], false).unwrap();
    zip.add("Peter.html", &mut &[10u8][..], false).unwrap();
    zip
}

// ============================================================================
// Sorting
// ============================================================================

#[test]
fn test_entries_keep_insertion_order() {
    let (_dir, path) = scratch_zip();
    let mut zip = people_zip(&path, ZipOptions::default());
    zip.update().unwrap();
    assert_eq!(
        names_by_offset(&zip),
        vec!["Mary.xml", "Andrew.txt", "Beth.png", "Peter.html"]
    );
}

#[test]
fn test_sort_zip_contents() {
    let (_dir, path) = scratch_zip();
    let zip = people_zip(&path, ZipOptions::default());
    zip.close().unwrap();

    let mut zip = ZipFile::open(&path, ZipOptions::default()).unwrap();
    zip.sort_zip_contents().unwrap();
    assert!(zip.entries().all(|e| e.offset() == -1));
    zip.close().unwrap();

    let zip = ZipFile::open(&path, ZipOptions::default()).unwrap();
    assert_eq!(
        names_by_offset(&zip),
        vec!["Andrew.txt", "Beth.png", "Mary.xml", "Peter.html"]
    );
    assert_eq!(zip.read("Mary.xml").unwrap(), vec![1, 2, 3]);
    assert_eq!(zip.read("Peter.html").unwrap(), vec![10]);
}

#[test]
fn test_auto_sort() {
    let (_dir, path) = scratch_zip();
    let zip = people_zip(&path, ZipOptions::new().with_auto_sort(true));
    zip.close().unwrap();

    let zip = ZipFile::open(&path, ZipOptions::default()).unwrap();
    assert_eq!(
        names_by_offset(&zip),
        vec!["Andrew.txt", "Beth.png", "Mary.xml", "Peter.html"]
    );
}

#[test]
fn test_sort_with_alignment_moves_aligned_entry_last() {
    let (_dir, path) = scratch_zip();
    let zip = people_zip(&path, ZipOptions::default());
    zip.close().unwrap();

    let options =
        ZipOptions::new().with_alignment_rule(AlignmentRule::constant_for_suffix(".xml", 1024));
    let mut zip = ZipFile::open(&path, options).unwrap();
    zip.sort_zip_contents().unwrap();
    zip.update().unwrap();
    assert_eq!(
        names_by_offset(&zip),
        vec!["Andrew.txt", "Beth.png", "Peter.html", "Mary.xml"]
    );
    assert_eq!(data_start_of(&zip, "Mary.xml") % 1024, 0);
    zip.close().unwrap();

    let zip = ZipFile::open(&path, logging_options()).unwrap();
    assert_eq!(data_start_of(&zip, "Mary.xml") % 1024, 0);
    assert_eq!(zip.read("Mary.xml").unwrap(), vec![1, 2, 3]);
    assert!(zip.get("Mary.xml").unwrap().verify_log().logs().is_empty());
}

// ============================================================================
// Alignment
// ============================================================================

#[test]
fn test_apk_options_align_stored_entries() {
    let (_dir, path) = scratch_zip();
    let options = ZipOptions::for_apk(
        ZipOptions::new().with_alignment_rule(AlignmentRule::constant_for_suffix(".so", 4096)),
    );
    let mut zip = ZipFile::open(&path, options).unwrap();
    zip.add("classes.dex", &mut &noise(333, 1)[..], false).unwrap();
    zip.add("lib/arm64/libfoo.so", &mut &noise(100, 2)[..], false).unwrap();
    zip.add("res/raw/a.bin", &mut &noise(7, 3)[..], false).unwrap();
    zip.add("text.txt", &mut &vec![b't'; 1000][..], true).unwrap();
    zip.add("res/", &mut std::io::empty(), false).unwrap();
    zip.close().unwrap();

    let zip = ZipFile::open(&path, ZipOptions::default()).unwrap();
    assert_eq!(data_start_of(&zip, "classes.dex") % 4, 0);
    assert_eq!(data_start_of(&zip, "res/raw/a.bin") % 4, 0);
    assert_eq!(data_start_of(&zip, "lib/arm64/libfoo.so") % 4096, 0);
    assert_eq!(zip.read("lib/arm64/libfoo.so").unwrap(), noise(100, 2));
    assert_eq!(zip.read("text.txt").unwrap(), vec![b't'; 1000]);
}

#[test]
fn test_realign_existing_archive() {
    let (_dir, path) = scratch_zip();
    create_zip(&path, &[("a", b"x"), ("lib.so", &noise(50, 9))]);

    let options =
        ZipOptions::new().with_alignment_rule(AlignmentRule::constant_for_suffix(".so", 4096));
    let mut zip = ZipFile::open(&path, options).unwrap();
    assert_ne!(data_start_of(&zip, "lib.so") % 4096, 0);
    assert!(zip.realign().unwrap());
    zip.update().unwrap();
    assert_eq!(data_start_of(&zip, "lib.so") % 4096, 0);
    assert!(!zip.realign().unwrap());
    zip.close().unwrap();

    let zip = ZipFile::open(&path, ZipOptions::default()).unwrap();
    assert_eq!(zip.read("lib.so").unwrap(), noise(50, 9));
    assert_eq!(offset_of(&zip, "a"), 0);
}

#[test]
fn test_alignment_ignores_compressed_entries() {
    let (_dir, path) = scratch_zip();
    let options =
        ZipOptions::new().with_alignment_rule(AlignmentRule::constant_for_suffix(".txt", 4096));
    let mut zip = ZipFile::open(&path, options).unwrap();
    zip.add("a", &mut &b"1"[..], false).unwrap();
    zip.add("b.txt", &mut &vec![b'b'; 2000][..], true).unwrap();
    zip.update().unwrap();

    let b = zip.get("b.txt").unwrap();
    assert_eq!(b.offset() as u64, LOCAL_HEADER_SIZE + 1 + 1);
    assert!(b.local_extra().is_empty());
}

// ============================================================================
// Covering Gaps
// ============================================================================

/// Three stored entries where "Large file" occupies exactly `large_size`
/// bytes, then "Large file" is deleted with gap covering enabled.
fn cover_gap(large_size: u64) -> (tempfile::TempDir, std::path::PathBuf, i64) {
    let (dir, path) = scratch_zip();
    let content = vec![7u8; (large_size - LOCAL_HEADER_SIZE - 10) as usize];
    create_zip(
        &path,
        &[("Small file", &[0, 1]), ("Large file", &content), ("Small file 2", &[0, 1])],
    );

    let options = ZipOptions::new().with_cover_empty_space_using_extra_field(true);
    let mut zip = ZipFile::open(&path, options).unwrap();
    let large_offset = offset_of(&zip, "Large file");
    assert_eq!(
        offset_of(&zip, "Small file 2"),
        large_offset + large_size as i64
    );
    zip.delete("Large file").unwrap();
    zip.close().unwrap();
    (dir, path, large_offset)
}

#[test]
fn test_cover_gap_with_extra_field() {
    let (_dir, path, large_offset) = cover_gap(0x7fff);

    let zip = ZipFile::open(&path, ZipOptions::default()).unwrap();
    let small = zip.get("Small file 2").unwrap();
    assert_eq!(small.offset(), large_offset);
    assert_eq!(small.local_extra().len(), 0x7fff);
    assert!(small.local_extra().without_alignment().is_empty());
    assert_eq!(small.read().unwrap(), vec![0, 1]);
}

#[test]
fn test_gap_too_large_to_cover_relocates_entry() {
    let (_dir, path, large_offset) = cover_gap(0x8000);

    let zip = ZipFile::open(&path, ZipOptions::default()).unwrap();
    let small = zip.get("Small file 2").unwrap();
    assert_eq!(small.offset(), large_offset);
    assert!(small.local_extra().is_empty());
    assert_eq!(small.read().unwrap(), vec![0, 1]);
    assert_eq!(
        zip.central_directory_offset(),
        large_offset as u64 + LOCAL_HEADER_SIZE + 12 + 2
    );
}

#[test]
fn test_gap_left_without_cover_option() {
    let (_dir, path) = scratch_zip();
    create_zip(&path, &[("a", &[1; 10]), ("b", &[2; 10]), ("c", &[3; 10])]);

    let mut zip = ZipFile::open(&path, ZipOptions::default()).unwrap();
    zip.delete("b").unwrap();
    zip.close().unwrap();

    let zip = ZipFile::open(&path, ZipOptions::default()).unwrap();
    assert_eq!(offset_of(&zip, "c"), 2 * (LOCAL_HEADER_SIZE as i64 + 11));
    assert!(zip.get("c").unwrap().local_extra().is_empty());
}
