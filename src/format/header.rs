//! Local file headers, central directory headers and data descriptors.

use std::fmt;

use super::dostime::DosTime;
use super::extra::{read_zip64_values, ExtraField};
use super::reader::{read_bytes, read_u16_le, read_u32_le, saturate_u32, u32_at};
use crate::{Error, Result};

/// Local file header signature.
pub const LOCAL_HEADER_SIGNATURE: u32 = 0x04034b50;

/// Central directory header signature.
pub const CENTRAL_HEADER_SIGNATURE: u32 = 0x02014b50;

/// Optional data descriptor signature.
pub const DATA_DESCRIPTOR_SIGNATURE: u32 = 0x08074b50;

/// Fixed part of a local header.
pub const LOCAL_HEADER_SIZE: usize = 30;

/// Fixed part of a central directory header.
pub const CENTRAL_HEADER_SIZE: usize = 46;

/// General purpose flag bits.
pub mod flags {
    /// The entry is encrypted.
    pub const ENCRYPTED: u16 = 0x0001;
    /// CRC and sizes follow the data in a data descriptor.
    pub const DATA_DESCRIPTOR: u16 = 0x0008;
    /// The name and comment are UTF-8.
    pub const UTF8: u16 = 0x0800;
}

/// "Version needed to extract" values.
pub mod version {
    /// Stored entries and directories.
    pub const STORED: u16 = 10;
    /// Deflated entries.
    pub const DEFLATE: u16 = 20;
    /// Entries with Zip64 fields.
    pub const ZIP64: u16 = 45;
    /// Highest value accepted without a verify log message.
    pub const MAX_KNOWN: u16 = 63;
    /// Version made by written into every new central directory header.
    pub const MADE_BY: u16 = 0x0018;
}

/// Compression method of an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompressionMethod {
    /// Method 0.
    Stored,
    /// Method 8.
    Deflated,
    /// Any other method. Such entries can be copied but not decoded.
    Other(u16),
}

impl CompressionMethod {
    /// Decodes the header value.
    pub fn from_u16(value: u16) -> Self {
        match value {
            0 => CompressionMethod::Stored,
            8 => CompressionMethod::Deflated,
            other => CompressionMethod::Other(other),
        }
    }

    /// The header value.
    pub fn to_u16(self) -> u16 {
        match self {
            CompressionMethod::Stored => 0,
            CompressionMethod::Deflated => 8,
            CompressionMethod::Other(v) => v,
        }
    }

    /// Version needed to extract data compressed this way.
    pub fn version_needed(self) -> u16 {
        match self {
            CompressionMethod::Deflated => version::DEFLATE,
            _ => version::STORED,
        }
    }
}

impl fmt::Display for CompressionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompressionMethod::Stored => write!(f, "STORED"),
            CompressionMethod::Deflated => write!(f, "DEFLATED"),
            CompressionMethod::Other(v) => write!(f, "method {v}"),
        }
    }
}

/// How CRC and sizes follow an entry's data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DataDescriptorType {
    /// No data descriptor; the local header carries CRC and sizes.
    #[default]
    None,
    /// A 16-byte descriptor starting with its signature.
    WithSignature,
    /// A 12-byte descriptor without signature.
    WithoutSignature,
}

impl DataDescriptorType {
    /// Size of the descriptor in bytes.
    pub fn size(self) -> u64 {
        match self {
            DataDescriptorType::None => 0,
            DataDescriptorType::WithSignature => 16,
            DataDescriptorType::WithoutSignature => 12,
        }
    }
}

/// Values carried by a data descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataDescriptor {
    /// Descriptor layout.
    pub kind: DataDescriptorType,
    /// CRC-32 of the uncompressed data.
    pub crc32: u32,
    /// Compressed size.
    pub compressed_size: u32,
    /// Uncompressed size.
    pub uncompressed_size: u32,
}

impl DataDescriptor {
    /// Parses a descriptor from up to 16 bytes following the data.
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        let (kind, mut cursor) = if u32_at(bytes, 0) == Some(DATA_DESCRIPTOR_SIGNATURE) {
            (DataDescriptorType::WithSignature, bytes.get(4..)?)
        } else {
            (DataDescriptorType::WithoutSignature, bytes)
        };
        Some(Self {
            kind,
            crc32: read_u32_le(&mut cursor).ok()?,
            compressed_size: read_u32_le(&mut cursor).ok()?,
            uncompressed_size: read_u32_le(&mut cursor).ok()?,
        })
    }
}

/// Decodes an entry name, falling back to lossy UTF-8.
pub fn decode_name(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw).into_owned()
}

/// A central directory header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CentralDirectoryHeader {
    /// Version made by.
    pub version_made_by: u16,
    /// Version needed to extract.
    pub version_needed: u16,
    /// General purpose flags.
    pub flags: u16,
    /// Compression method.
    pub method: CompressionMethod,
    /// Last modification stamp.
    pub last_modified: DosTime,
    /// CRC-32 of the uncompressed data.
    pub crc32: u32,
    /// Size of the stored data.
    pub compressed_size: u64,
    /// Size of the uncompressed data.
    pub uncompressed_size: u64,
    /// Disk number start.
    pub disk_number_start: u16,
    /// Internal attributes.
    pub internal_attributes: u16,
    /// External attributes.
    pub external_attributes: u32,
    /// Offset of the local header.
    pub offset: u64,
    /// Entry name as stored.
    pub raw_name: Vec<u8>,
    /// Extra field of the central record.
    pub extra: ExtraField,
    /// Entry comment.
    pub comment: Vec<u8>,
}

impl CentralDirectoryHeader {
    /// Creates a header for a new entry.
    pub fn new(name: &str, last_modified: DosTime) -> Self {
        let mut flags = 0;
        if !name.is_ascii() {
            flags |= flags::UTF8;
        }
        Self {
            version_made_by: version::MADE_BY,
            version_needed: version::STORED,
            flags,
            method: CompressionMethod::Stored,
            last_modified,
            crc32: 0,
            compressed_size: 0,
            uncompressed_size: 0,
            disk_number_start: 0,
            internal_attributes: 0,
            external_attributes: 0,
            offset: 0,
            raw_name: name.as_bytes().to_vec(),
            extra: ExtraField::default(),
            comment: Vec::new(),
        }
    }

    /// The decoded name.
    pub fn name(&self) -> String {
        decode_name(&self.raw_name)
    }

    /// Returns `true` if a data descriptor follows the data.
    pub fn has_data_descriptor(&self) -> bool {
        self.flags & flags::DATA_DESCRIPTOR != 0
    }

    /// Returns `true` if any field needs a Zip64 extra.
    pub fn needs_zip64(&self) -> bool {
        self.compressed_size >= u32::MAX as u64
            || self.uncompressed_size >= u32::MAX as u64
            || self.offset >= u32::MAX as u64
    }

    /// Parses one header from the start of `bytes`.
    ///
    /// Returns the header and the number of bytes it occupies. `at` is the
    /// header's file offset, used in error messages.
    pub fn parse(bytes: &[u8], at: u64) -> Result<(Self, usize)> {
        let truncated = |_| Error::corrupt_header(at, "truncated central directory header");
        let mut cursor = bytes;
        let signature = read_u32_le(&mut cursor).map_err(truncated)?;
        if signature != CENTRAL_HEADER_SIGNATURE {
            return Err(Error::corrupt_header(
                at,
                format!("expected central directory signature, found {signature:#010x}"),
            ));
        }
        let version_made_by = read_u16_le(&mut cursor).map_err(truncated)?;
        let version_needed = read_u16_le(&mut cursor).map_err(truncated)?;
        let flags = read_u16_le(&mut cursor).map_err(truncated)?;
        let method = CompressionMethod::from_u16(read_u16_le(&mut cursor).map_err(truncated)?);
        let time = read_u16_le(&mut cursor).map_err(truncated)?;
        let date = read_u16_le(&mut cursor).map_err(truncated)?;
        let crc32 = read_u32_le(&mut cursor).map_err(truncated)?;
        let compressed = read_u32_le(&mut cursor).map_err(truncated)?;
        let uncompressed = read_u32_le(&mut cursor).map_err(truncated)?;
        let name_len = read_u16_le(&mut cursor).map_err(truncated)? as usize;
        let extra_len = read_u16_le(&mut cursor).map_err(truncated)? as usize;
        let comment_len = read_u16_le(&mut cursor).map_err(truncated)? as usize;
        let disk_number_start = read_u16_le(&mut cursor).map_err(truncated)?;
        let internal_attributes = read_u16_le(&mut cursor).map_err(truncated)?;
        let external_attributes = read_u32_le(&mut cursor).map_err(truncated)?;
        let offset = read_u32_le(&mut cursor).map_err(truncated)?;
        let raw_name = read_bytes(&mut cursor, name_len).map_err(truncated)?;
        let extra = ExtraField::new(read_bytes(&mut cursor, extra_len).map_err(truncated)?);
        let comment = read_bytes(&mut cursor, comment_len).map_err(truncated)?;

        let mut header = Self {
            version_made_by,
            version_needed,
            flags,
            method,
            last_modified: DosTime::new(time, date),
            crc32,
            compressed_size: compressed as u64,
            uncompressed_size: uncompressed as u64,
            disk_number_start,
            internal_attributes,
            external_attributes,
            offset: offset as u64,
            raw_name,
            extra,
            comment,
        };

        let saturated = [
            uncompressed == u32::MAX,
            compressed == u32::MAX,
            offset == u32::MAX,
        ];
        if saturated.iter().any(|s| *s) {
            if let Some(data) = header.extra.zip64_data() {
                let [u, c, o] = read_zip64_values(&data, saturated).map_err(|e| {
                    Error::corrupt_header(at, format!("entry '{}': {e}", header.name()))
                })?;
                header.uncompressed_size = u.unwrap_or(header.uncompressed_size);
                header.compressed_size = c.unwrap_or(header.compressed_size);
                header.offset = o.unwrap_or(header.offset);
            }
        }

        let consumed = CENTRAL_HEADER_SIZE + name_len + extra_len + comment_len;
        Ok((header, consumed))
    }

    /// The extra field as it will be written, with Zip64 values refreshed.
    pub fn serialized_extra(&self) -> ExtraField {
        let mut zip64 = Vec::new();
        if self.uncompressed_size >= u32::MAX as u64 {
            zip64.push(self.uncompressed_size);
        }
        if self.compressed_size >= u32::MAX as u64 {
            zip64.push(self.compressed_size);
        }
        if self.offset >= u32::MAX as u64 {
            zip64.push(self.offset);
        }
        self.extra.with_zip64(&zip64)
    }

    /// Serialized size of this header.
    pub fn size(&self) -> usize {
        CENTRAL_HEADER_SIZE + self.raw_name.len() + self.serialized_extra().len() + self.comment.len()
    }

    /// Serializes the header.
    pub fn write_to(&self, out: &mut Vec<u8>) {
        let extra = self.serialized_extra();
        let version_needed = if self.needs_zip64() {
            self.version_needed.max(version::ZIP64)
        } else {
            self.version_needed
        };
        out.extend_from_slice(&CENTRAL_HEADER_SIGNATURE.to_le_bytes());
        out.extend_from_slice(&self.version_made_by.to_le_bytes());
        out.extend_from_slice(&version_needed.to_le_bytes());
        out.extend_from_slice(&self.flags.to_le_bytes());
        out.extend_from_slice(&self.method.to_u16().to_le_bytes());
        out.extend_from_slice(&self.last_modified.time.to_le_bytes());
        out.extend_from_slice(&self.last_modified.date.to_le_bytes());
        out.extend_from_slice(&self.crc32.to_le_bytes());
        out.extend_from_slice(&saturate_u32(self.compressed_size).to_le_bytes());
        out.extend_from_slice(&saturate_u32(self.uncompressed_size).to_le_bytes());
        out.extend_from_slice(&(self.raw_name.len() as u16).to_le_bytes());
        out.extend_from_slice(&(extra.len() as u16).to_le_bytes());
        out.extend_from_slice(&(self.comment.len() as u16).to_le_bytes());
        out.extend_from_slice(&self.disk_number_start.to_le_bytes());
        out.extend_from_slice(&self.internal_attributes.to_le_bytes());
        out.extend_from_slice(&self.external_attributes.to_le_bytes());
        out.extend_from_slice(&saturate_u32(self.offset).to_le_bytes());
        out.extend_from_slice(&self.raw_name);
        out.extend_from_slice(extra.as_bytes());
        out.extend_from_slice(&self.comment);
    }
}

/// A local file header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalHeader {
    /// Version needed to extract.
    pub version_needed: u16,
    /// General purpose flags.
    pub flags: u16,
    /// Compression method.
    pub method: CompressionMethod,
    /// Last modification stamp.
    pub last_modified: DosTime,
    /// CRC-32, zero when a data descriptor carries it.
    pub crc32: u32,
    /// Compressed size field as stored.
    pub compressed_size: u32,
    /// Uncompressed size field as stored.
    pub uncompressed_size: u32,
    /// Entry name as stored.
    pub raw_name: Vec<u8>,
    /// Local extra field.
    pub extra: ExtraField,
}

impl LocalHeader {
    /// Builds the local header that mirrors `cd` with the given local extra.
    ///
    /// The result never announces a data descriptor.
    pub fn mirror(cd: &CentralDirectoryHeader, extra: ExtraField) -> Self {
        let mut zip64 = Vec::new();
        if cd.uncompressed_size >= u32::MAX as u64 || cd.compressed_size >= u32::MAX as u64 {
            zip64.push(cd.uncompressed_size);
            zip64.push(cd.compressed_size);
        }
        let extra = if zip64.is_empty() {
            extra.without_zip64()
        } else {
            extra.with_zip64(&zip64)
        };
        let version_needed = if zip64.is_empty() {
            cd.version_needed
        } else {
            cd.version_needed.max(version::ZIP64)
        };
        Self {
            version_needed,
            flags: cd.flags & !flags::DATA_DESCRIPTOR,
            method: cd.method,
            last_modified: cd.last_modified,
            crc32: cd.crc32,
            compressed_size: saturate_u32(cd.compressed_size),
            uncompressed_size: saturate_u32(cd.uncompressed_size),
            raw_name: cd.raw_name.clone(),
            extra,
        }
    }

    /// Parses the header at the start of `bytes`; `at` is its file offset.
    pub fn parse(bytes: &[u8], at: u64) -> Result<Self> {
        let truncated = |_| Error::corrupt_header(at, "truncated local header");
        let mut cursor = bytes;
        let signature = read_u32_le(&mut cursor).map_err(truncated)?;
        if signature != LOCAL_HEADER_SIGNATURE {
            return Err(Error::corrupt_header(
                at,
                format!("expected local header signature, found {signature:#010x}"),
            ));
        }
        let version_needed = read_u16_le(&mut cursor).map_err(truncated)?;
        let flags = read_u16_le(&mut cursor).map_err(truncated)?;
        let method = CompressionMethod::from_u16(read_u16_le(&mut cursor).map_err(truncated)?);
        let time = read_u16_le(&mut cursor).map_err(truncated)?;
        let date = read_u16_le(&mut cursor).map_err(truncated)?;
        let crc32 = read_u32_le(&mut cursor).map_err(truncated)?;
        let compressed_size = read_u32_le(&mut cursor).map_err(truncated)?;
        let uncompressed_size = read_u32_le(&mut cursor).map_err(truncated)?;
        let name_len = read_u16_le(&mut cursor).map_err(truncated)? as usize;
        let extra_len = read_u16_le(&mut cursor).map_err(truncated)? as usize;
        let raw_name = read_bytes(&mut cursor, name_len).map_err(truncated)?;
        let extra = ExtraField::new(read_bytes(&mut cursor, extra_len).map_err(truncated)?);
        Ok(Self {
            version_needed,
            flags,
            method,
            last_modified: DosTime::new(time, date),
            crc32,
            compressed_size,
            uncompressed_size,
            raw_name,
            extra,
        })
    }

    /// Serialized size of this header.
    pub fn size(&self) -> usize {
        LOCAL_HEADER_SIZE + self.raw_name.len() + self.extra.len()
    }

    /// Serializes the header.
    pub fn write_to(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&LOCAL_HEADER_SIGNATURE.to_le_bytes());
        out.extend_from_slice(&self.version_needed.to_le_bytes());
        out.extend_from_slice(&self.flags.to_le_bytes());
        out.extend_from_slice(&self.method.to_u16().to_le_bytes());
        out.extend_from_slice(&self.last_modified.time.to_le_bytes());
        out.extend_from_slice(&self.last_modified.date.to_le_bytes());
        out.extend_from_slice(&self.crc32.to_le_bytes());
        out.extend_from_slice(&self.compressed_size.to_le_bytes());
        out.extend_from_slice(&self.uncompressed_size.to_le_bytes());
        out.extend_from_slice(&(self.raw_name.len() as u16).to_le_bytes());
        out.extend_from_slice(&(self.extra.len() as u16).to_le_bytes());
        out.extend_from_slice(&self.raw_name);
        out.extend_from_slice(self.extra.as_bytes());
    }

    /// Serializes the header into a new buffer.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.size());
        self.write_to(&mut out);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> CentralDirectoryHeader {
        let mut cd = CentralDirectoryHeader::new("foo", DosTime::EPOCH);
        cd.method = CompressionMethod::Deflated;
        cd.version_needed = version::DEFLATE;
        cd.crc32 = 0xdeadbeef;
        cd.compressed_size = 10;
        cd.uncompressed_size = 20;
        cd.offset = 0x1234;
        cd
    }

    #[test]
    fn test_central_header_parse_write() {
        let cd = sample();
        let mut out = Vec::new();
        cd.write_to(&mut out);
        assert_eq!(out.len(), CENTRAL_HEADER_SIZE + 3);
        assert_eq!(cd.size(), out.len());

        let (parsed, consumed) = CentralDirectoryHeader::parse(&out, 0).unwrap();
        assert_eq!(consumed, out.len());
        assert_eq!(parsed, cd);
        assert_eq!(parsed.name(), "foo");
    }

    #[test]
    fn test_central_header_zip64_fields() {
        let mut cd = sample();
        cd.uncompressed_size = 0x1_2345_6789;
        cd.offset = 0x2_0000_0000;
        let mut out = Vec::new();
        cd.write_to(&mut out);

        // Saturated header fields, true values in the extra.
        assert_eq!(&out[24..28], &0xFFFF_FFFFu32.to_le_bytes());
        assert_eq!(&out[42..46], &0xFFFF_FFFFu32.to_le_bytes());
        assert_eq!(u16::from_le_bytes([out[6], out[7]]), version::ZIP64);

        let (parsed, _) = CentralDirectoryHeader::parse(&out, 0).unwrap();
        assert_eq!(parsed.uncompressed_size, 0x1_2345_6789);
        assert_eq!(parsed.compressed_size, 10);
        assert_eq!(parsed.offset, 0x2_0000_0000);
    }

    #[test]
    fn test_bad_signature() {
        let mut out = Vec::new();
        sample().write_to(&mut out);
        out[0] = 0;
        assert!(CentralDirectoryHeader::parse(&out, 7).unwrap_err().is_corruption());
        assert!(CentralDirectoryHeader::parse(&out[..20], 7).is_err());
    }

    #[test]
    fn test_utf8_flag_for_non_ascii_names() {
        assert_eq!(CentralDirectoryHeader::new("plain", DosTime::EPOCH).flags, 0);
        let cd = CentralDirectoryHeader::new("ünïcödé", DosTime::EPOCH);
        assert_ne!(cd.flags & flags::UTF8, 0);
        assert_eq!(cd.name(), "ünïcödé");
    }

    #[test]
    fn test_local_mirror_drops_data_descriptor() {
        let mut cd = sample();
        cd.flags |= flags::DATA_DESCRIPTOR;
        let local = LocalHeader::mirror(&cd, ExtraField::default());
        assert_eq!(local.flags & flags::DATA_DESCRIPTOR, 0);
        assert_eq!(local.crc32, cd.crc32);

        let bytes = local.to_bytes();
        assert_eq!(bytes.len(), LOCAL_HEADER_SIZE + 3);
        assert_eq!(LocalHeader::parse(&bytes, 0).unwrap(), local);
    }

    #[test]
    fn test_data_descriptor_parse() {
        let mut with_sig = DATA_DESCRIPTOR_SIGNATURE.to_le_bytes().to_vec();
        with_sig.extend_from_slice(&1u32.to_le_bytes());
        with_sig.extend_from_slice(&2u32.to_le_bytes());
        with_sig.extend_from_slice(&3u32.to_le_bytes());
        let dd = DataDescriptor::parse(&with_sig).unwrap();
        assert_eq!(dd.kind, DataDescriptorType::WithSignature);
        assert_eq!((dd.crc32, dd.compressed_size, dd.uncompressed_size), (1, 2, 3));

        let dd = DataDescriptor::parse(&with_sig[4..]).unwrap();
        assert_eq!(dd.kind, DataDescriptorType::WithoutSignature);
        assert_eq!(dd.kind.size(), 12);
        assert!(DataDescriptor::parse(&with_sig[..6]).is_none());
    }

    #[test]
    fn test_method_codes() {
        assert_eq!(CompressionMethod::from_u16(0), CompressionMethod::Stored);
        assert_eq!(CompressionMethod::from_u16(8).to_u16(), 8);
        assert_eq!(CompressionMethod::from_u16(12), CompressionMethod::Other(12));
        assert_eq!(CompressionMethod::Deflated.version_needed(), 20);
    }
}
