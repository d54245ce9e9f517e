//! Shared test utilities for integration tests.
//!
//! Archives written by `ZipFile` never carry data descriptors or mismatched
//! headers, so tests that need such archives build them by hand with
//! [`build_zip`].
//!
//! Note: `#![allow(dead_code)]` is required because each integration test file
//! compiles as a separate crate and may only use a subset of these helpers.

#![allow(dead_code)]

use std::io::Write;
use std::path::{Path, PathBuf};

use apkzip::zip::VerifyLogFactory;
use apkzip::{ZipFile, ZipOptions};
use flate2::Compression;
use flate2::write::DeflateEncoder;

/// Size of a local header without name and extra.
pub const LOCAL_HEADER_SIZE: u64 = 30;

/// Size of a central directory record without name, extra and comment.
pub const CENTRAL_HEADER_SIZE: u64 = 46;

/// Size of an EOCD record without comment.
pub const EOCD_SIZE: u64 = 22;

/// DOS date of 1980-01-01.
const DOS_DATE_1980: u16 = (1 << 5) | 1;

/// One entry of a hand-built archive.
#[derive(Debug, Clone)]
pub struct TestEntry {
    pub name: String,
    pub data: Vec<u8>,
    pub deflate: bool,
    pub descriptor: bool,
    pub local_extra: Vec<u8>,
    pub cd_extra: Vec<u8>,
}

/// A stored entry without extras or data descriptor.
pub fn entry(name: &str, data: &[u8]) -> TestEntry {
    TestEntry {
        name: name.to_string(),
        data: data.to_vec(),
        deflate: false,
        descriptor: false,
        local_extra: Vec::new(),
        cd_extra: Vec::new(),
    }
}

impl TestEntry {
    pub fn deflated(mut self) -> Self {
        self.deflate = true;
        self
    }

    /// Moves CRC and sizes into a signed data descriptor.
    pub fn with_descriptor(mut self) -> Self {
        self.descriptor = true;
        self
    }

    pub fn with_local_extra(mut self, extra: &[u8]) -> Self {
        self.local_extra = extra.to_vec();
        self
    }

    pub fn with_extra(mut self, extra: &[u8]) -> Self {
        self.local_extra = extra.to_vec();
        self.cd_extra = extra.to_vec();
        self
    }
}

/// Raw deflate at the default level.
pub fn deflate(data: &[u8]) -> Vec<u8> {
    let mut encoder = DeflateEncoder::new(Vec::new(), Compression::new(6));
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

/// Serializes `entries` into a complete archive, entries first in order.
pub fn build_zip(entries: &[TestEntry]) -> Vec<u8> {
    let mut out = Vec::new();
    let mut directory = Vec::new();

    for e in entries {
        let offset = out.len() as u32;
        let stored = if e.deflate { deflate(&e.data) } else { e.data.clone() };
        let crc = crc32fast::hash(&e.data);
        let method: u16 = if e.deflate { 8 } else { 0 };
        let version: u16 = if e.deflate { 20 } else { 10 };
        let flags: u16 = if e.descriptor { 0x0008 } else { 0 };
        let (local_crc, local_csize, local_usize) = if e.descriptor {
            (0, 0, 0)
        } else {
            (crc, stored.len() as u32, e.data.len() as u32)
        };

        out.extend_from_slice(&0x04034b50u32.to_le_bytes());
        out.extend_from_slice(&version.to_le_bytes());
        out.extend_from_slice(&flags.to_le_bytes());
        out.extend_from_slice(&method.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(&DOS_DATE_1980.to_le_bytes());
        out.extend_from_slice(&local_crc.to_le_bytes());
        out.extend_from_slice(&local_csize.to_le_bytes());
        out.extend_from_slice(&local_usize.to_le_bytes());
        out.extend_from_slice(&(e.name.len() as u16).to_le_bytes());
        out.extend_from_slice(&(e.local_extra.len() as u16).to_le_bytes());
        out.extend_from_slice(e.name.as_bytes());
        out.extend_from_slice(&e.local_extra);
        out.extend_from_slice(&stored);
        if e.descriptor {
            out.extend_from_slice(&0x08074b50u32.to_le_bytes());
            out.extend_from_slice(&crc.to_le_bytes());
            out.extend_from_slice(&(stored.len() as u32).to_le_bytes());
            out.extend_from_slice(&(e.data.len() as u32).to_le_bytes());
        }

        directory.extend_from_slice(&0x02014b50u32.to_le_bytes());
        directory.extend_from_slice(&version.to_le_bytes());
        directory.extend_from_slice(&version.to_le_bytes());
        directory.extend_from_slice(&flags.to_le_bytes());
        directory.extend_from_slice(&method.to_le_bytes());
        directory.extend_from_slice(&0u16.to_le_bytes());
        directory.extend_from_slice(&DOS_DATE_1980.to_le_bytes());
        directory.extend_from_slice(&crc.to_le_bytes());
        directory.extend_from_slice(&(stored.len() as u32).to_le_bytes());
        directory.extend_from_slice(&(e.data.len() as u32).to_le_bytes());
        directory.extend_from_slice(&(e.name.len() as u16).to_le_bytes());
        directory.extend_from_slice(&(e.cd_extra.len() as u16).to_le_bytes());
        directory.extend_from_slice(&0u16.to_le_bytes());
        directory.extend_from_slice(&0u16.to_le_bytes());
        directory.extend_from_slice(&0u16.to_le_bytes());
        directory.extend_from_slice(&0u32.to_le_bytes());
        directory.extend_from_slice(&offset.to_le_bytes());
        directory.extend_from_slice(e.name.as_bytes());
        directory.extend_from_slice(&e.cd_extra);
    }

    let cd_offset = out.len() as u32;
    out.extend_from_slice(&directory);
    out.extend_from_slice(&0x06054b50u32.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes());
    out.extend_from_slice(&(entries.len() as u16).to_le_bytes());
    out.extend_from_slice(&(entries.len() as u16).to_le_bytes());
    out.extend_from_slice(&(directory.len() as u32).to_le_bytes());
    out.extend_from_slice(&cd_offset.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes());
    out
}

/// Writes `bytes` to `dir/name` and returns the path.
pub fn write_file(dir: &Path, name: &str, bytes: &[u8]) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, bytes).unwrap();
    path
}

/// A scratch directory and the path `a.zip` inside it.
pub fn scratch_zip() -> (tempfile::TempDir, PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("a.zip");
    (dir, path)
}

/// Options that keep every verify message.
pub fn logging_options() -> ZipOptions {
    ZipOptions::new().with_verify_log_factory(VerifyLogFactory::Unlimited)
}

/// Creates an archive at `path` holding `entries`, stored, and closes it.
pub fn create_zip(path: &Path, entries: &[(&str, &[u8])]) {
    let mut zip = ZipFile::open(path, ZipOptions::default()).unwrap();
    for (name, data) in entries {
        zip.add(name, &mut &data[..], false).unwrap();
    }
    zip.close().unwrap();
}

/// Local header offset of `name`.
pub fn offset_of(zip: &ZipFile, name: &str) -> i64 {
    zip.get(name).unwrap().offset()
}

/// Offset of the first byte of `name`'s data.
pub fn data_start_of(zip: &ZipFile, name: &str) -> u64 {
    let entry = zip.get(name).unwrap();
    entry.offset() as u64 + entry.local_header_size()
}

/// Overwrites `bytes` at `offset` in the file at `path`.
pub fn patch_file(path: &Path, offset: usize, bytes: &[u8]) {
    let mut contents = std::fs::read(path).unwrap();
    contents[offset..offset + bytes.len()].copy_from_slice(bytes);
    std::fs::write(path, contents).unwrap();
}

/// Deterministic pseudo-random bytes that do not deflate below their size.
pub fn noise(len: usize, seed: u64) -> Vec<u8> {
    use rand::{Rng, SeedableRng};
    let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
    (0..len).map(|_| rng.r#gen::<u8>()).collect()
}
