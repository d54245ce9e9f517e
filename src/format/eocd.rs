//! End of Central Directory group: EOCD, Zip64 EOCD (v1/v2) and Zip64 locator.
//!
//! The group sits at the very end of the archive, in file order:
//!
//! ```text
//! [Zip64 EOCD][gap][Zip64 locator][EOCD + comment]
//! ```
//!
//! The two Zip64 records are only present when the directory outgrows the
//! 16/32-bit fields of the plain EOCD, or when the directory contains Zip64
//! entries. [`EocdGroup::read`] decodes the group from the tail of a file and
//! [`EocdGroup::recompute`] derives it from a [`DirectorySummary`].

use std::io::{Read, Seek, SeekFrom};

use log::{debug, trace};

use super::reader::{
    read_bytes, read_u16_le, read_u32_le, read_u64_le, saturate_u16, saturate_u32, u16_at, u32_at,
    write_u16_le, write_u32_le, write_u64_le,
};
use crate::{Error, Result};

/// EOCD signature as u32.
pub const EOCD_SIGNATURE: u32 = 0x06054b50;

/// Zip64 EOCD signature as u32.
pub const ZIP64_EOCD_SIGNATURE: u32 = 0x06064b50;

/// Zip64 EOCD locator signature as u32.
pub const ZIP64_LOCATOR_SIGNATURE: u32 = 0x07064b50;

/// Size of an EOCD record without its comment.
pub const EOCD_SIZE: usize = 22;

/// Size of the Zip64 EOCD locator.
pub const ZIP64_LOCATOR_SIZE: usize = 20;

/// Size of a Zip64 EOCD v1 record without extensible data.
pub const ZIP64_EOCD_V1_SIZE: usize = 56;

/// Size of a Zip64 EOCD v2 record without hash or extensible data.
pub const ZIP64_EOCD_V2_SIZE: usize = 84;

/// Longest EOCD comment.
pub const MAX_COMMENT_LEN: usize = 0xFFFF;

/// Version made by written into Zip64 EOCD records.
pub const ZIP64_VERSION_MADE_BY: u16 = 0x18;

/// Version needed to extract for a Zip64 v1 record.
pub const ZIP64_V1_VERSION_NEEDED: u16 = 45;

/// Version needed to extract for a Zip64 v2 record.
pub const ZIP64_V2_VERSION_NEEDED: u16 = 62;

/// Bytes of the Zip64 record not counted by its own size field.
const ZIP64_SIZE_FIELD_EXCLUDES: usize = 12;

/// One `(header id, data)` field of the Zip64 extensible data sector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensibleField {
    /// The field's header id.
    pub header_id: u16,
    /// The field's payload.
    pub data: Vec<u8>,
}

impl ExtensibleField {
    /// Serialized size of the field, including its 6-byte header.
    pub fn size(&self) -> usize {
        6 + self.data.len()
    }
}

/// The extensible data sector trailing a Zip64 EOCD record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtensibleData {
    fields: Vec<ExtensibleField>,
}

impl ExtensibleData {
    /// Creates an extensible data sector from its fields.
    pub fn new(fields: Vec<ExtensibleField>) -> Self {
        Self { fields }
    }

    /// The fields, in file order.
    pub fn fields(&self) -> &[ExtensibleField] {
        &self.fields
    }

    /// Serialized size of all fields.
    pub fn size(&self) -> usize {
        self.fields.iter().map(ExtensibleField::size).sum()
    }

    fn parse(mut bytes: &[u8], offset: u64) -> Result<Self> {
        let mut fields = Vec::new();
        while !bytes.is_empty() {
            let header_id = read_u16_le(&mut bytes)
                .map_err(|_| Error::corrupt_header(offset, "truncated Zip64 extensible field"))?;
            let len = read_u32_le(&mut bytes)
                .map_err(|_| Error::corrupt_header(offset, "truncated Zip64 extensible field"))?;
            let data = read_bytes(&mut bytes, len as usize).map_err(|_| {
                Error::corrupt_header(
                    offset,
                    format!("Zip64 extensible field {header_id:#06x} claims {len} bytes"),
                )
            })?;
            trace!("Zip64 extensible field {header_id:#06x} with {len} bytes");
            fields.push(ExtensibleField { header_id, data });
        }
        Ok(Self { fields })
    }

    fn write_to(&self, out: &mut Vec<u8>) -> Result<()> {
        for field in &self.fields {
            write_u16_le(out, field.header_id)?;
            write_u32_le(out, field.data.len() as u32)?;
            out.extend_from_slice(&field.data);
        }
        Ok(())
    }
}

/// Directory storage fields of a Zip64 v2 record, kept as read.
///
/// The compressed and uncompressed sizes are not stored here: a rebuilt
/// record always describes the directory being written, and the directory
/// is written uncompressed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Zip64V2Fields {
    /// Compression method of the central directory.
    pub compression_method: u16,
    /// Encryption algorithm id.
    pub encryption_algorithm: u16,
    /// Encryption key length in bits.
    pub key_length: u16,
    /// Encryption flags.
    pub encryption_flags: u16,
    /// Hash algorithm id.
    pub hash_algorithm: u16,
    /// Hash of the central directory.
    pub hash_data: Vec<u8>,
}

impl Zip64V2Fields {
    fn write_to(&self, out: &mut Vec<u8>, directory_size: u64) {
        put_u16(out, self.compression_method);
        put_u64(out, directory_size);
        put_u64(out, directory_size);
        put_u16(out, self.encryption_algorithm);
        put_u16(out, self.key_length);
        put_u16(out, self.encryption_flags);
        put_u16(out, self.hash_algorithm);
        put_u16(out, self.hash_data.len() as u16);
        out.extend_from_slice(&self.hash_data);
    }
}

/// What the EOCD group needs to know about the central directory.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DirectorySummary {
    /// Offset of the central directory in the file.
    pub offset: u64,
    /// Size of the central directory in bytes.
    pub size: u64,
    /// Number of central directory records.
    pub records: u64,
    /// Whether any directory record carries a Zip64 extra field.
    pub contains_zip64_files: bool,
}

impl DirectorySummary {
    /// Returns `true` if the plain EOCD cannot represent this directory.
    pub fn requires_zip64(&self) -> bool {
        self.records >= u16::MAX as u64
            || self.size >= u32::MAX as u64
            || self.offset >= u32::MAX as u64
            || self.contains_zip64_files
    }
}

/// The EOCD group of an archive.
#[derive(Debug, Clone, Default)]
pub struct EocdGroup {
    record_start: u64,
    directory: DirectorySummary,
    comment: Vec<u8>,
    use_v2: bool,
    v2_fields: Zip64V2Fields,
    extensible: Option<ExtensibleData>,
    zip64_eocd: Option<Vec<u8>>,
    /// Bytes between the Zip64 EOCD and the locator, kept as read.
    gap: Vec<u8>,
    locator: Option<Vec<u8>>,
    eocd: Vec<u8>,
}

impl EocdGroup {
    /// Creates a group for an empty directory at offset 0.
    pub fn new() -> Self {
        let mut group = Self::default();
        group.rebuild();
        group
    }

    /// Reads the EOCD group from the end of `file`.
    ///
    /// Scans backward from the end for the EOCD signature, within the
    /// longest possible comment. Signature bytes that do not start a valid
    /// EOCD are skipped. If a Zip64 locator precedes the EOCD, the Zip64
    /// EOCD it points at is decoded too.
    ///
    /// # Errors
    ///
    /// Returns [`Error::EocdNotFound`] when no valid EOCD exists, and
    /// [`Error::CorruptHeader`] for damaged Zip64 records.
    pub fn read<R: Read + Seek>(file: &mut R, file_size: u64) -> Result<Self> {
        let max_tail = (EOCD_SIZE + MAX_COMMENT_LEN) as u64;
        let tail_len = file_size.min(max_tail);
        if tail_len < EOCD_SIZE as u64 {
            return Err(Error::EocdNotFound { searched: tail_len });
        }
        let tail_start = file_size - tail_len;
        let tail = read_at(file, tail_start, tail_len as usize)?;

        let mut found = None;
        for i in (0..=tail.len() - EOCD_SIZE).rev() {
            if u32_at(&tail, i) != Some(EOCD_SIGNATURE) {
                continue;
            }
            if is_valid_eocd(&tail[i..]) {
                found = Some(i);
                break;
            }
            trace!(
                "Rejected EOCD candidate at {:#x}",
                tail_start + i as u64
            );
        }
        let Some(i) = found else {
            return Err(Error::EocdNotFound { searched: tail_len });
        };

        let eocd_start = tail_start + i as u64;
        let mut cursor = &tail[i + 4..];
        let _disk = read_u16_le(&mut cursor)?;
        let _cd_disk = read_u16_le(&mut cursor)?;
        let _disk_records = read_u16_le(&mut cursor)?;
        let records = read_u16_le(&mut cursor)?;
        let size = read_u32_le(&mut cursor)?;
        let offset = read_u32_le(&mut cursor)?;
        let comment_len = read_u16_le(&mut cursor)? as usize;
        let comment = cursor[..comment_len].to_vec();
        let eocd = tail[i..i + EOCD_SIZE + comment_len].to_vec();

        let mut group = Self {
            record_start: eocd_start,
            directory: DirectorySummary {
                offset: offset as u64,
                size: size as u64,
                records: records as u64,
                contains_zip64_files: false,
            },
            comment,
            eocd,
            ..Self::default()
        };

        let saturated =
            records == u16::MAX || size == u32::MAX || offset == u32::MAX;
        let locator_start = eocd_start.checked_sub(ZIP64_LOCATOR_SIZE as u64);
        let locator = match locator_start {
            Some(at) => {
                let bytes = read_at(file, at, ZIP64_LOCATOR_SIZE)?;
                (u32_at(&bytes, 0) == Some(ZIP64_LOCATOR_SIGNATURE)).then_some((at, bytes))
            }
            None => None,
        };

        match locator {
            Some((locator_start, locator_bytes)) => {
                if let Err(e) = group.read_zip64(file, locator_start, locator_bytes) {
                    if saturated {
                        return Err(e);
                    }
                    // A plain EOCD whose preceding bytes happen to look like
                    // a locator.
                    debug!("Ignoring Zip64 locator candidate at {locator_start:#x}: {e}");
                }
            }
            None if saturated => {
                return Err(Error::corrupt_header(
                    eocd_start,
                    "EOCD uses Zip64 sentinels but no Zip64 locator precedes it",
                ));
            }
            None => {}
        }

        Ok(group)
    }

    fn read_zip64<R: Read + Seek>(
        &mut self,
        file: &mut R,
        locator_start: u64,
        locator_bytes: Vec<u8>,
    ) -> Result<()> {
        let mut cursor = &locator_bytes[4..];
        let _disk = read_u32_le(&mut cursor)?;
        let z64_offset = read_u64_le(&mut cursor)?;
        let _total_disks = read_u32_le(&mut cursor)?;

        if z64_offset
            .checked_add(ZIP64_SIZE_FIELD_EXCLUDES as u64)
            .is_none_or(|end| end > locator_start)
        {
            return Err(Error::corrupt_header(
                locator_start,
                format!("Zip64 EOCD offset {z64_offset:#x} is past the locator"),
            ));
        }

        let head = read_at(file, z64_offset, ZIP64_SIZE_FIELD_EXCLUDES)?;
        if u32_at(&head, 0) != Some(ZIP64_EOCD_SIGNATURE) {
            return Err(Error::corrupt_header(
                z64_offset,
                "Zip64 EOCD signature not found where the locator points",
            ));
        }
        let record_size = read_u64_le(&mut &head[4..])?;
        let z64_end = z64_offset
            .checked_add(ZIP64_SIZE_FIELD_EXCLUDES as u64)
            .and_then(|v| v.checked_add(record_size))
            .filter(|end| *end <= locator_start)
            .ok_or_else(|| {
                Error::corrupt_header(
                    z64_offset,
                    format!("Zip64 EOCD size {record_size} overruns the locator"),
                )
            })?;
        let total = (z64_end - z64_offset) as usize;
        if total < ZIP64_EOCD_V1_SIZE {
            return Err(Error::corrupt_header(
                z64_offset,
                format!("Zip64 EOCD of {total} bytes is too short"),
            ));
        }
        let z64 = read_at(file, z64_offset, total)?;

        let truncated = |_| Error::corrupt_header(z64_offset, "truncated Zip64 EOCD");
        let mut cursor = &z64[ZIP64_SIZE_FIELD_EXCLUDES..];
        let _made_by = read_u16_le(&mut cursor).map_err(truncated)?;
        let needed = read_u16_le(&mut cursor).map_err(truncated)?;
        let _disk = read_u32_le(&mut cursor).map_err(truncated)?;
        let _cd_disk = read_u32_le(&mut cursor).map_err(truncated)?;
        let _disk_records = read_u64_le(&mut cursor).map_err(truncated)?;
        let records = read_u64_le(&mut cursor).map_err(truncated)?;
        let size = read_u64_le(&mut cursor).map_err(truncated)?;
        let offset = read_u64_le(&mut cursor).map_err(truncated)?;

        let use_v2 = needed >= ZIP64_V2_VERSION_NEEDED;
        let mut v2_fields = Zip64V2Fields::default();
        if use_v2 {
            v2_fields.compression_method = read_u16_le(&mut cursor).map_err(truncated)?;
            let _compressed = read_u64_le(&mut cursor).map_err(truncated)?;
            let _uncompressed = read_u64_le(&mut cursor).map_err(truncated)?;
            v2_fields.encryption_algorithm = read_u16_le(&mut cursor).map_err(truncated)?;
            v2_fields.key_length = read_u16_le(&mut cursor).map_err(truncated)?;
            v2_fields.encryption_flags = read_u16_le(&mut cursor).map_err(truncated)?;
            v2_fields.hash_algorithm = read_u16_le(&mut cursor).map_err(truncated)?;
            let hash_len = read_u16_le(&mut cursor).map_err(truncated)?;
            v2_fields.hash_data = read_bytes(&mut cursor, hash_len as usize).map_err(truncated)?;
        }
        let extensible = ExtensibleData::parse(cursor, z64_offset)?;
        let gap = read_at(file, z64_end, (locator_start - z64_end) as usize)?;

        self.use_v2 = use_v2;
        self.v2_fields = v2_fields;
        self.extensible = Some(extensible);
        self.directory = DirectorySummary {
            offset,
            size,
            records,
            contains_zip64_files: false,
        };
        self.gap = gap;
        self.record_start = z64_offset;
        self.zip64_eocd = Some(z64);
        self.locator = Some(locator_bytes);
        Ok(())
    }

    /// Recomputes the group for `directory`, placing it right after the
    /// directory. The comment, v2 preference and extensible data are kept.
    pub fn recompute(&mut self, directory: DirectorySummary) {
        self.directory = directory;
        self.record_start = directory.offset + directory.size;
        self.gap.clear();
        self.rebuild();
    }

    fn rebuild(&mut self) {
        let dir = self.directory;
        let zip64 = dir.requires_zip64() || self.use_v2;

        let mut eocd = Vec::with_capacity(EOCD_SIZE + self.comment.len());
        put_u32(&mut eocd, EOCD_SIGNATURE);
        put_u16(&mut eocd, 0);
        put_u16(&mut eocd, 0);
        put_u16(&mut eocd, saturate_u16(dir.records));
        put_u16(&mut eocd, saturate_u16(dir.records));
        put_u32(&mut eocd, saturate_u32(dir.size));
        put_u32(&mut eocd, saturate_u32(dir.offset));
        put_u16(&mut eocd, self.comment.len() as u16);
        eocd.extend_from_slice(&self.comment);
        self.eocd = eocd;

        if !zip64 {
            self.zip64_eocd = None;
            self.locator = None;
            return;
        }

        let mut z64 = Vec::with_capacity(ZIP64_EOCD_V2_SIZE);
        put_u32(&mut z64, ZIP64_EOCD_SIGNATURE);
        put_u64(&mut z64, 0);
        put_u16(&mut z64, ZIP64_VERSION_MADE_BY);
        put_u16(
            &mut z64,
            if self.use_v2 {
                ZIP64_V2_VERSION_NEEDED
            } else {
                ZIP64_V1_VERSION_NEEDED
            },
        );
        put_u32(&mut z64, 0);
        put_u32(&mut z64, 0);
        put_u64(&mut z64, dir.records);
        put_u64(&mut z64, dir.records);
        put_u64(&mut z64, dir.size);
        put_u64(&mut z64, dir.offset);
        if self.use_v2 {
            self.v2_fields.write_to(&mut z64, dir.size);
        }
        if let Some(ext) = &self.extensible {
            // Writing into a Vec cannot fail.
            let _ = ext.write_to(&mut z64);
        }
        let record_size = (z64.len() - ZIP64_SIZE_FIELD_EXCLUDES) as u64;
        z64[4..12].copy_from_slice(&record_size.to_le_bytes());

        let mut locator = Vec::with_capacity(ZIP64_LOCATOR_SIZE);
        put_u32(&mut locator, ZIP64_LOCATOR_SIGNATURE);
        put_u32(&mut locator, 0);
        put_u64(&mut locator, self.record_start);
        put_u32(&mut locator, 0);

        self.zip64_eocd = Some(z64);
        self.locator = Some(locator);
    }

    /// Offset of the first byte of the group.
    pub fn record_start(&self) -> u64 {
        self.record_start
    }

    /// Total size of the group, including any gap before the locator.
    pub fn record_size(&self) -> u64 {
        (self.zip64_eocd.as_ref().map_or(0, Vec::len)
            + self.gap.len()
            + self.locator.as_ref().map_or(0, Vec::len)
            + self.eocd.len()) as u64
    }

    /// Offset of the central directory.
    pub fn directory_offset(&self) -> u64 {
        self.directory.offset
    }

    /// Size of the central directory.
    pub fn directory_size(&self) -> u64 {
        self.directory.size
    }

    /// Number of central directory records.
    pub fn total_records(&self) -> u64 {
        self.directory.records
    }

    /// The EOCD comment.
    pub fn comment(&self) -> &[u8] {
        &self.comment
    }

    /// Replaces the EOCD comment.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if the comment is longer than
    /// 65535 bytes or embeds bytes that would parse as a valid EOCD.
    pub fn set_comment(&mut self, comment: Vec<u8>) -> Result<()> {
        check_comment(&comment)?;
        self.comment = comment;
        self.rebuild();
        Ok(())
    }

    /// Whether the Zip64 record uses the v2 layout.
    pub fn uses_v2(&self) -> bool {
        self.use_v2
    }

    /// Selects the Zip64 v2 layout. A v2 group always carries Zip64 records.
    pub fn set_use_v2(&mut self, use_v2: bool) {
        self.use_v2 = use_v2;
        self.rebuild();
    }

    /// Directory storage fields of the v2 record.
    pub fn v2_fields(&self) -> &Zip64V2Fields {
        &self.v2_fields
    }

    /// Returns `true` if Zip64 records are present.
    pub fn is_zip64(&self) -> bool {
        self.zip64_eocd.is_some()
    }

    /// The Zip64 extensible data sector, when Zip64 records were read.
    pub fn extensible_data(&self) -> Option<&ExtensibleData> {
        self.extensible.as_ref()
    }

    /// Serialized plain EOCD, comment included.
    pub fn eocd_bytes(&self) -> &[u8] {
        &self.eocd
    }

    /// Serialized Zip64 EOCD record.
    pub fn zip64_eocd_bytes(&self) -> Option<&[u8]> {
        self.zip64_eocd.as_deref()
    }

    /// Serialized Zip64 locator.
    pub fn locator_bytes(&self) -> Option<&[u8]> {
        self.locator.as_deref()
    }

    /// The whole group, in file order.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.record_size() as usize);
        if let Some(z64) = &self.zip64_eocd {
            out.extend_from_slice(z64);
        }
        out.extend_from_slice(&self.gap);
        if let Some(locator) = &self.locator {
            out.extend_from_slice(locator);
        }
        out.extend_from_slice(&self.eocd);
        out
    }
}

/// Returns `true` if `bytes` starts with a valid EOCD.
///
/// Valid means the signature matches, both disk numbers are 0, the
/// this-disk and total record counts agree, and the comment fits in the
/// remaining bytes.
pub fn is_valid_eocd(bytes: &[u8]) -> bool {
    if bytes.len() < EOCD_SIZE || u32_at(bytes, 0) != Some(EOCD_SIGNATURE) {
        return false;
    }
    let field = |pos| u16_at(bytes, pos).unwrap_or(u16::MAX);
    let comment_len = field(20) as usize;
    field(4) == 0
        && field(6) == 0
        && field(8) == field(10)
        && EOCD_SIZE + comment_len <= bytes.len()
}

/// Rejects comments that are too long or would fool an EOCD scan.
pub fn check_comment(comment: &[u8]) -> Result<()> {
    if comment.len() > MAX_COMMENT_LEN {
        return Err(Error::invalid_argument(format!(
            "EOCD comment of {} bytes exceeds {MAX_COMMENT_LEN}",
            comment.len()
        )));
    }
    if comment.len() > EOCD_SIZE {
        for i in 0..comment.len() - EOCD_SIZE {
            if is_valid_eocd(&comment[i..]) {
                return Err(Error::invalid_argument(format!(
                    "EOCD comment contains a valid EOCD at position {i}"
                )));
            }
        }
    }
    Ok(())
}

fn read_at<R: Read + Seek>(file: &mut R, offset: u64, len: usize) -> Result<Vec<u8>> {
    file.seek(SeekFrom::Start(offset))?;
    Ok(read_bytes(file, len)?)
}

// Writes into a Vec never fail.
fn put_u16(out: &mut Vec<u8>, v: u16) {
    let _ = write_u16_le(out, v);
}

fn put_u32(out: &mut Vec<u8>, v: u32) {
    let _ = write_u32_le(out, v);
}

fn put_u64(out: &mut Vec<u8>, v: u64) {
    let _ = write_u64_le(out, v);
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::io;

    /// A virtual file that is all zeros up to `base`, then `data`.
    struct SparseFile {
        base: u64,
        data: Vec<u8>,
        pos: u64,
    }

    impl SparseFile {
        fn new(base: u64, data: Vec<u8>) -> Self {
            Self { base, data, pos: 0 }
        }

        fn size(&self) -> u64 {
            self.base + self.data.len() as u64
        }
    }

    impl Read for SparseFile {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let remaining = self.size().saturating_sub(self.pos);
            let n = (buf.len() as u64).min(remaining) as usize;
            for (k, b) in buf[..n].iter_mut().enumerate() {
                let at = self.pos + k as u64;
                *b = if at < self.base {
                    0
                } else {
                    self.data[(at - self.base) as usize]
                };
            }
            self.pos += n as u64;
            Ok(n)
        }
    }

    impl Seek for SparseFile {
        fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
            self.pos = match pos {
                SeekFrom::Start(p) => p,
                SeekFrom::End(d) => (self.size() as i64 + d) as u64,
                SeekFrom::Current(d) => (self.pos as i64 + d) as u64,
            };
            Ok(self.pos)
        }
    }

    fn read_group(base: u64, data: Vec<u8>) -> Result<EocdGroup> {
        let mut file = SparseFile::new(base, data);
        let size = file.size();
        EocdGroup::read(&mut file, size)
    }

    fn eocd(records: u16, size: u32, offset: u32, comment: &[u8]) -> Vec<u8> {
        let mut out = vec![0x50, 0x4b, 0x05, 0x06, 0, 0, 0, 0];
        out.extend_from_slice(&records.to_le_bytes());
        out.extend_from_slice(&records.to_le_bytes());
        out.extend_from_slice(&size.to_le_bytes());
        out.extend_from_slice(&offset.to_le_bytes());
        out.extend_from_slice(&(comment.len() as u16).to_le_bytes());
        out.extend_from_slice(comment);
        out
    }

    fn locator(z64_offset: u64) -> Vec<u8> {
        let mut out = vec![0x50, 0x4b, 0x06, 0x07, 0, 0, 0, 0];
        out.extend_from_slice(&z64_offset.to_le_bytes());
        out.extend_from_slice(&[0, 0, 0, 0]);
        out
    }

    fn zip64_v1(records: u64, size: u64, offset: u64, extensible: &[u8]) -> Vec<u8> {
        let mut out = vec![0x50, 0x4b, 0x06, 0x06];
        out.extend_from_slice(&(44 + extensible.len() as u64).to_le_bytes());
        out.extend_from_slice(&[0x14, 0x00, 45, 0x00, 0, 0, 0, 0, 0, 0, 0, 0]);
        out.extend_from_slice(&records.to_le_bytes());
        out.extend_from_slice(&records.to_le_bytes());
        out.extend_from_slice(&size.to_le_bytes());
        out.extend_from_slice(&offset.to_le_bytes());
        out.extend_from_slice(extensible);
        out
    }

    // =========================================================================
    // Reading
    // =========================================================================

    #[test]
    fn test_read_basic_eocd() {
        let group = read_group(0x24b64, eocd(0x20, 0x640, 0x24524, &[])).unwrap();
        assert_eq!(group.record_start(), 0x24b64);
        assert_eq!(group.record_size(), 22);
        assert_eq!(group.directory_offset(), 0x24524);
        assert_eq!(group.directory_size(), 0x640);
        assert_eq!(group.total_records(), 0x20);
        assert!(group.comment().is_empty());
        assert!(group.extensible_data().is_none());
        assert!(!group.is_zip64());
    }

    #[test]
    fn test_read_eocd_with_comment() {
        let comment = [0x01, 0x02, 0x04, 0x08, 0x10, 0x20, 0x40, 0x80];
        let group = read_group(0x48, eocd(1, 0x20, 0x28, &comment)).unwrap();
        assert_eq!(group.record_start(), 0x48);
        assert_eq!(group.record_size(), 30);
        assert_eq!(group.directory_offset(), 0x28);
        assert_eq!(group.comment(), &comment);
    }

    #[test]
    fn test_read_zip64_v1() {
        let mut data = zip64_v1(6, 0x320, 0x1000004e0, &[]);
        data.extend(locator(0x100000800));
        data.extend(eocd(6, 0x320, 0xFFFF_FFFF, &[]));
        let total = data.len() as u64;

        let group = read_group(0x100000800, data).unwrap();
        assert_eq!(group.record_start(), 0x100000800);
        assert_eq!(group.record_size(), total);
        assert_eq!(group.directory_offset(), 0x1000004e0);
        assert_eq!(group.directory_size(), 0x320);
        assert_eq!(group.total_records(), 6);
        assert!(!group.uses_v2());
        assert!(group.locator_bytes().is_some());
        assert_eq!(group.extensible_data().map(|e| e.fields().len()), Some(0));
    }

    #[test]
    fn test_read_zip64_v2_with_gap_before_locator() {
        let mut z64 = vec![0x50, 0x4b, 0x06, 0x06];
        z64.extend_from_slice(&72u64.to_le_bytes());
        z64.extend_from_slice(&[0x00, 0x00, 62, 0x00, 0, 0, 0, 0, 0, 0, 0, 0]);
        z64.extend_from_slice(&0x10800u64.to_le_bytes());
        z64.extend_from_slice(&0x10800u64.to_le_bytes());
        z64.extend_from_slice(&0x405000u64.to_le_bytes());
        z64.extend_from_slice(&0x140821a200u64.to_le_bytes());
        z64.extend_from_slice(&[0, 0]);
        z64.extend_from_slice(&0x405000u64.to_le_bytes());
        z64.extend_from_slice(&0x405000u64.to_le_bytes());
        z64.extend_from_slice(&[0; 10]);
        assert_eq!(z64.len(), ZIP64_EOCD_V2_SIZE);

        let mut data = z64;
        data.extend(vec![0u8; 87]);
        data.extend(locator(0x140821e250));
        data.extend(eocd(0xFFFF, 0x405000, 0xFFFF_FFFF, &[]));
        let total = data.len() as u64;

        let group = read_group(0x140821e250, data).unwrap();
        assert_eq!(group.record_start(), 0x140821e250);
        assert_eq!(group.record_size(), total);
        assert_eq!(group.directory_offset(), 0x140821a200);
        assert_eq!(group.directory_size(), 0x405000);
        assert_eq!(group.total_records(), 0x10800);
        assert!(group.uses_v2());
        assert_eq!(group.to_bytes().len() as u64, total);
    }

    #[test]
    fn test_read_zip64_extensible_fields() {
        let mut ext = vec![0x00, 0x02, 0x10, 0x00, 0x00, 0x00];
        ext.extend_from_slice(&[0u8; 16]);
        ext.extend_from_slice(&[0x00, 0x04, 0x04, 0x00, 0x00, 0x00, 0, 0, 0, 0]);

        let mut data = zip64_v1(6, 0x320, 0x1000004e0, &ext);
        data.extend(locator(0x100000800));
        data.extend(eocd(6, 0x320, 0xFFFF_FFFF, &[]));

        let group = read_group(0x100000800, data).unwrap();
        let fields = group.extensible_data().unwrap().fields();
        assert_eq!(fields.len(), 2);
        assert_eq!(fields[0].header_id, 0x200);
        assert_eq!(fields[0].size(), 22);
        assert_eq!(fields[1].header_id, 0x400);
        assert_eq!(fields[1].size(), 10);
    }

    #[test]
    fn test_read_fails_without_signature() {
        let mut data = eocd(6, 0x320, 0xFFFF_FFFF, &[]);
        data[1] = 0x4a;
        let err = read_group(0x4000000, data).unwrap_err();
        assert!(matches!(err, Error::EocdNotFound { .. }));
        assert!(err.to_string().contains("Could not find EOCD"));
    }

    #[test]
    fn test_read_fails_on_tiny_file() {
        assert!(matches!(
            read_group(0, vec![0x50, 0x4b, 0x05, 0x06]),
            Err(Error::EocdNotFound { .. })
        ));
    }

    #[test]
    fn test_read_skips_invalid_candidate_in_comment() {
        let mut comment = vec![0u8; 60];
        comment[10..14].copy_from_slice(&[0x50, 0x4b, 0x05, 0x06]);
        comment[14] = 1;
        let group = read_group(0x100, eocd(3, 0x90, 0x70, &comment)).unwrap();
        assert_eq!(group.record_start(), 0x100);
        assert_eq!(group.comment(), &comment[..]);
    }

    #[test]
    fn test_saturated_eocd_requires_locator() {
        let err = read_group(0x200, eocd(6, 0x320, 0xFFFF_FFFF, &[])).unwrap_err();
        assert!(err.is_corruption());
    }

    #[test]
    fn test_locator_lookalike_before_plain_eocd() {
        let mut data = locator(0x10);
        data.extend(eocd(1, 0x20, 0x28, &[]));
        let group = read_group(0x48, data).unwrap();
        assert!(!group.is_zip64());
        assert_eq!(group.record_start(), 0x48 + ZIP64_LOCATOR_SIZE as u64);
        assert_eq!(group.record_size(), 22);
        assert_eq!(group.directory_offset(), 0x28);
        assert_eq!(group.total_records(), 1);
    }

    #[test]
    fn test_locator_lookalike_with_huge_offset() {
        let mut data = locator(u64::MAX - 4);
        data.extend(eocd(1, 0x20, 0x28, &[]));
        let group = read_group(0x48, data).unwrap();
        assert!(!group.is_zip64());
        assert_eq!(group.directory_offset(), 0x28);
    }

    #[test]
    fn test_locator_lookalike_before_saturated_eocd() {
        let mut data = locator(0x10);
        data.extend(eocd(6, 0x320, 0xFFFF_FFFF, &[]));
        assert!(read_group(0x200, data).unwrap_err().is_corruption());
    }

    #[test]
    fn test_zip64_v2_fields_survive_rebuild() {
        let mut z64 = vec![0x50, 0x4b, 0x06, 0x06];
        z64.extend_from_slice(&76u64.to_le_bytes());
        z64.extend_from_slice(&[0x00, 0x00, 62, 0x00, 0, 0, 0, 0, 0, 0, 0, 0]);
        z64.extend_from_slice(&0x10800u64.to_le_bytes());
        z64.extend_from_slice(&0x10800u64.to_le_bytes());
        z64.extend_from_slice(&0x405000u64.to_le_bytes());
        z64.extend_from_slice(&0x140821a200u64.to_le_bytes());
        z64.extend_from_slice(&[0, 0]);
        z64.extend_from_slice(&0x405000u64.to_le_bytes());
        z64.extend_from_slice(&0x405000u64.to_le_bytes());
        z64.extend_from_slice(&[0x01, 0x66, 0x00, 0x01, 0x01, 0x00, 0x04, 0x80]);
        z64.extend_from_slice(&[4, 0, 0xde, 0xad, 0xbe, 0xef]);

        let mut data = z64;
        data.extend(locator(0x140861f200));
        data.extend(eocd(0xFFFF, 0x405000, 0xFFFF_FFFF, &[]));
        let mut group = read_group(0x140861f200, data).unwrap();

        let expected = Zip64V2Fields {
            compression_method: 0,
            encryption_algorithm: 0x6601,
            key_length: 256,
            encryption_flags: 1,
            hash_algorithm: 0x8004,
            hash_data: vec![0xde, 0xad, 0xbe, 0xef],
        };
        assert!(group.uses_v2());
        assert_eq!(group.v2_fields(), &expected);

        group.recompute(DirectorySummary {
            offset: 0x140821a200,
            size: 0x405100,
            records: 0x10801,
            contains_zip64_files: false,
        });
        let z64 = group.zip64_eocd_bytes().unwrap();
        assert_eq!(z64.len(), ZIP64_EOCD_V2_SIZE + 4);
        assert_eq!(&z64[58..66], &0x405100u64.to_le_bytes());

        let reread = read_group(group.record_start(), group.to_bytes()).unwrap();
        assert_eq!(reread.v2_fields(), &expected);
        assert_eq!(reread.total_records(), 0x10801);
    }

    // =========================================================================
    // Writing
    // =========================================================================

    fn computed(offset: u64, size: u64, records: u64, zip64_files: bool) -> EocdGroup {
        let mut group = EocdGroup::new();
        group.recompute(DirectorySummary {
            offset,
            size,
            records,
            contains_zip64_files: zip64_files,
        });
        group
    }

    #[test]
    fn test_write_empty_directory() {
        let group = computed(0x45, 0, 0, false);
        assert_eq!(group.eocd_bytes(), &eocd(0, 0, 0x45, &[])[..]);
        assert!(group.locator_bytes().is_none());
        assert!(group.zip64_eocd_bytes().is_none());
        assert_eq!(group.record_start(), 0x45);
        assert_eq!(group.record_size(), 22);
    }

    #[test]
    fn test_write_basic() {
        let group = computed(0x018a26b2, 0x162, 0x43, false);
        let expected = [
            0x50, 0x4b, 0x05, 0x06, 0x00, 0x00, 0x00, 0x00, 0x43, 0x00, 0x43, 0x00, 0x62, 0x01,
            0x00, 0x00, 0xb2, 0x26, 0x8a, 0x01, 0x00, 0x00,
        ];
        assert_eq!(group.eocd_bytes(), &expected);
        assert!(group.zip64_eocd_bytes().is_none());
        assert_eq!(group.record_start(), 0x018a26b2 + 0x162);
    }

    #[test]
    fn test_zip64_files_force_zip64_records() {
        let group = computed(0x018a26b2, 0x162, 0x43, true);
        assert_eq!(group.eocd_bytes(), &eocd(0x43, 0x162, 0x018a26b2, &[])[..]);
        assert_eq!(
            group.locator_bytes().unwrap(),
            &[
                0x50, 0x4b, 0x06, 0x07, 0x00, 0x00, 0x00, 0x00, 0x14, 0x28, 0x8a, 0x01, 0x00,
                0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00
            ]
        );
        let z64 = group.zip64_eocd_bytes().unwrap();
        assert_eq!(
            z64,
            &[
                0x50, 0x4b, 0x06, 0x06, 0x2c, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x18,
                0x00, 45, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x43, 0x00, 0x00,
                0x00, 0x00, 0x00, 0x00, 0x00, 0x43, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
                0x62, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0xb2, 0x26, 0x8a, 0x01, 0x00,
                0x00, 0x00, 0x00,
            ]
        );
        assert_eq!(group.record_start(), 0x018a26b2 + 0x162);
    }

    #[test]
    fn test_large_offset_saturates_only_offset() {
        let group = computed(0x0180a09c4d, 0x089341a2, 0xF389, false);
        let expected = [
            0x50, 0x4b, 0x05, 0x06, 0x00, 0x00, 0x00, 0x00, 0x89, 0xf3, 0x89, 0xf3, 0xa2, 0x41,
            0x93, 0x08, 0xff, 0xff, 0xff, 0xff, 0x00, 0x00,
        ];
        assert_eq!(group.eocd_bytes(), &expected);
        assert_eq!(
            group.locator_bytes().unwrap(),
            &[
                0x50, 0x4b, 0x06, 0x07, 0x00, 0x00, 0x00, 0x00, 0xef, 0xdd, 0x33, 0x89, 0x01,
                0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00
            ]
        );
        assert_eq!(group.record_size(), 22 + 20 + 56);
        assert_eq!(group.record_start(), 0x0180a09c4d + 0x089341a2);
    }

    #[test]
    fn test_many_records_saturate_counts() {
        let group = computed(0x453a297c, 0x089341a2, 0x37cd32, false);
        let expected = [
            0x50, 0x4b, 0x05, 0x06, 0x00, 0x00, 0x00, 0x00, 0xff, 0xff, 0xff, 0xff, 0xa2, 0x41,
            0x93, 0x08, 0x7c, 0x29, 0x3a, 0x45, 0x00, 0x00,
        ];
        assert_eq!(group.eocd_bytes(), &expected);
        let z64 = group.zip64_eocd_bytes().unwrap();
        assert_eq!(&z64[24..32], &0x37cd32u64.to_le_bytes());
        assert_eq!(&z64[48..56], &0x453a297cu64.to_le_bytes());
        assert_eq!(
            &group.locator_bytes().unwrap()[8..16],
            &0x4dcd6b1eu64.to_le_bytes()
        );
    }

    #[test]
    fn test_write_zip64_v2() {
        let mut group = EocdGroup::new();
        group.set_use_v2(true);
        group.recompute(DirectorySummary {
            offset: 0x453a297c,
            size: 0x089341a2,
            records: 0x37cd32,
            contains_zip64_files: false,
        });
        let z64 = group.zip64_eocd_bytes().unwrap();
        assert_eq!(z64.len(), ZIP64_EOCD_V2_SIZE);
        assert_eq!(&z64[4..12], &72u64.to_le_bytes());
        assert_eq!(&z64[12..16], &[0x18, 0x00, 62, 0x00]);
        assert_eq!(&z64[56..58], &[0, 0]);
        assert_eq!(&z64[58..66], &0x089341a2u64.to_le_bytes());
        assert_eq!(&z64[66..74], &0x089341a2u64.to_le_bytes());
        assert!(z64[74..].iter().all(|b| *b == 0));
    }

    // =========================================================================
    // Comments
    // =========================================================================

    #[test]
    fn test_comment_length_limit() {
        let mut group = EocdGroup::new();
        assert!(group.set_comment(vec![b'a'; MAX_COMMENT_LEN]).is_ok());
        assert!(matches!(
            group.set_comment(vec![b'a'; MAX_COMMENT_LEN + 1]),
            Err(Error::InvalidArgument(_))
        ));
        assert_eq!(group.comment().len(), MAX_COMMENT_LEN);
    }

    #[test]
    fn test_comment_with_valid_eocd_is_rejected() {
        let mut comment = vec![0u8; 100];
        comment[50..54].copy_from_slice(&[0x50, 0x4b, 0x05, 0x06]);
        assert!(check_comment(&comment).is_err());

        // Disk number 1 and mismatched counts make it an invalid EOCD.
        comment[54] = 1;
        comment[56] = 2;
        assert!(check_comment(&comment).is_ok());
    }

    #[test]
    fn test_comment_round_trips_through_read() {
        let mut group = EocdGroup::new();
        group.set_comment(b"hello".to_vec()).unwrap();
        group.recompute(DirectorySummary {
            offset: 10,
            size: 46,
            records: 1,
            contains_zip64_files: false,
        });
        let read = read_group(56, group.to_bytes()).unwrap();
        assert_eq!(read.comment(), b"hello");
        assert_eq!(read.record_start(), 56);
    }

    proptest! {
        #[test]
        fn test_thresholds_round_trip(
            records in prop_oneof![0u64..0xFFFF, 0xFFFFu64..0x1_0000_0000],
            size in prop_oneof![0u64..0xFFFF_FFFF, 0xFFFF_FFFFu64..0x10_0000_0000],
            offset in prop_oneof![0u64..0xFFFF_FFFF, 0xFFFF_FFFFu64..0x10_0000_0000],
        ) {
            let group = computed(offset, size, records, false);
            let expect_zip64 = records >= 0xFFFF || size >= 0xFFFF_FFFF || offset >= 0xFFFF_FFFF;
            prop_assert_eq!(group.is_zip64(), expect_zip64);

            let read = read_group(group.record_start(), group.to_bytes()).unwrap();
            prop_assert_eq!(read.total_records(), records);
            prop_assert_eq!(read.directory_size(), size);
            prop_assert_eq!(read.directory_offset(), offset);
            prop_assert_eq!(read.is_zip64(), expect_zip64);
            prop_assert_eq!(read.record_start(), offset + size);
        }
    }
}
