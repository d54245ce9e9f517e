//! Extra field segments.
//!
//! An extra field is a sequence of `(header id u16, data size u16, data)`
//! segments. Two segment kinds are interpreted here: the alignment segment
//! used to pad local headers, and the Zip64 extended information field.
//! Everything else is carried as opaque bytes.

use super::reader::{read_bytes, read_u16_le, read_u64_le};
use crate::{Error, Result};

/// Header id of the alignment padding segment.
pub const ALIGNMENT_HEADER_ID: u16 = 0xD935;

/// Header id of the Zip64 extended information segment.
pub const ZIP64_HEADER_ID: u16 = 0x0001;

/// Smallest alignment segment: header, data size and the alignment value.
pub const ALIGNMENT_MIN_SIZE: usize = 6;

/// Longest extra field a header can carry.
pub const MAX_EXTRA_LEN: usize = 0xFFFF;

/// Largest local extra field produced when covering gaps.
pub const MAX_COVER_EXTRA_LEN: usize = 0x7FFF;

/// One segment of an extra field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtraSegment {
    /// Alignment padding of `size` bytes in total.
    Alignment {
        /// Alignment the padding was computed for.
        alignment: u16,
        /// Total size of the segment including its 4-byte header.
        size: usize,
    },
    /// Any other segment, kept verbatim.
    Raw {
        /// Segment header id.
        header_id: u16,
        /// Segment payload.
        data: Vec<u8>,
    },
}

impl ExtraSegment {
    /// Serialized size of the segment.
    pub fn size(&self) -> usize {
        match self {
            ExtraSegment::Alignment { size, .. } => *size,
            ExtraSegment::Raw { data, .. } => 4 + data.len(),
        }
    }

    fn write_to(&self, out: &mut Vec<u8>) {
        match self {
            ExtraSegment::Alignment { alignment, size } => {
                out.extend_from_slice(&ALIGNMENT_HEADER_ID.to_le_bytes());
                out.extend_from_slice(&((size - 4) as u16).to_le_bytes());
                out.extend_from_slice(&alignment.to_le_bytes());
                out.resize(out.len() + size - ALIGNMENT_MIN_SIZE, 0);
            }
            ExtraSegment::Raw { header_id, data } => {
                out.extend_from_slice(&header_id.to_le_bytes());
                out.extend_from_slice(&(data.len() as u16).to_le_bytes());
                out.extend_from_slice(data);
            }
        }
    }
}

/// An extra field, stored as raw bytes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtraField {
    raw: Vec<u8>,
}

impl ExtraField {
    /// Wraps raw extra field bytes.
    pub fn new(raw: Vec<u8>) -> Self {
        Self { raw }
    }

    /// Builds an extra field from segments.
    pub fn from_segments(segments: &[ExtraSegment]) -> Self {
        let mut raw = Vec::with_capacity(segments.iter().map(ExtraSegment::size).sum());
        for segment in segments {
            segment.write_to(&mut raw);
        }
        Self { raw }
    }

    /// The raw bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.raw
    }

    /// Length in bytes.
    pub fn len(&self) -> usize {
        self.raw.len()
    }

    /// Returns `true` if the field is empty.
    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }

    /// Splits the field into segments.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidFormat`] if a segment runs past the end.
    pub fn segments(&self) -> Result<Vec<ExtraSegment>> {
        let mut cursor = &self.raw[..];
        let mut segments = Vec::new();
        while !cursor.is_empty() {
            let malformed = |_| Error::InvalidFormat("Malformed extra field".into());
            let header_id = read_u16_le(&mut cursor).map_err(malformed)?;
            let len = read_u16_le(&mut cursor).map_err(malformed)? as usize;
            let data = read_bytes(&mut cursor, len).map_err(malformed)?;
            if header_id == ALIGNMENT_HEADER_ID && len >= 2 {
                segments.push(ExtraSegment::Alignment {
                    alignment: u16::from_le_bytes([data[0], data[1]]),
                    size: 4 + len,
                });
            } else {
                segments.push(ExtraSegment::Raw { header_id, data });
            }
        }
        Ok(segments)
    }

    /// Total size of the alignment segments in this field.
    pub fn alignment_padding(&self) -> usize {
        self.segments()
            .map(|segs| {
                segs.iter()
                    .filter(|s| matches!(s, ExtraSegment::Alignment { .. }))
                    .map(ExtraSegment::size)
                    .sum()
            })
            .unwrap_or(0)
    }

    /// Returns the field with every segment rejected by `drop` removed.
    ///
    /// An unparseable field is returned unchanged.
    fn filtered(&self, drop: impl Fn(&ExtraSegment) -> bool) -> ExtraField {
        match self.segments() {
            Ok(segs) => {
                let kept: Vec<_> = segs.into_iter().filter(|s| !drop(s)).collect();
                ExtraField::from_segments(&kept)
            }
            Err(_) => self.clone(),
        }
    }

    /// The field without alignment segments.
    pub fn without_alignment(&self) -> ExtraField {
        self.filtered(|s| matches!(s, ExtraSegment::Alignment { .. }))
    }

    /// The field without any Zip64 extended information segment.
    pub fn without_zip64(&self) -> ExtraField {
        self.filtered(|s| matches!(s, ExtraSegment::Raw { header_id, .. } if *header_id == ZIP64_HEADER_ID))
    }

    /// The part of the field that must agree between local and central
    /// headers: everything except alignment and Zip64 segments.
    pub fn comparable(&self) -> ExtraField {
        self.without_alignment().without_zip64()
    }

    /// Replaces alignment padding with a single segment of `size` bytes.
    ///
    /// A `size` of 0 just strips the padding.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] for a `size` between 1 and 5, or
    /// if the result would exceed the extra field limit.
    pub fn with_alignment_padding(&self, size: usize, alignment: u16) -> Result<ExtraField> {
        if size != 0 && size < ALIGNMENT_MIN_SIZE {
            return Err(Error::invalid_argument(format!(
                "alignment segment of {size} bytes is below the {ALIGNMENT_MIN_SIZE} byte minimum"
            )));
        }
        let base = self.without_alignment();
        if base.len() + size > MAX_EXTRA_LEN {
            return Err(Error::invalid_argument(format!(
                "extra field of {} bytes exceeds {MAX_EXTRA_LEN}",
                base.len() + size
            )));
        }
        let mut raw = base.raw;
        if size > 0 {
            ExtraSegment::Alignment { alignment, size }.write_to(&mut raw);
        }
        Ok(ExtraField { raw })
    }

    /// Returns the payload of the Zip64 extended information segment.
    pub fn zip64_data(&self) -> Option<Vec<u8>> {
        self.segments().ok()?.into_iter().find_map(|s| match s {
            ExtraSegment::Raw { header_id, data } if header_id == ZIP64_HEADER_ID => Some(data),
            _ => None,
        })
    }

    /// Returns the field with its Zip64 segment replaced by `values`.
    ///
    /// An empty `values` removes the segment.
    pub fn with_zip64(&self, values: &[u64]) -> ExtraField {
        let mut raw = self.without_zip64().raw;
        if !values.is_empty() {
            let data: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
            ExtraSegment::Raw {
                header_id: ZIP64_HEADER_ID,
                data,
            }
            .write_to(&mut raw);
        }
        ExtraField { raw }
    }
}

/// Reads the Zip64 replacements for saturated 32-bit header fields.
///
/// `fields` holds the saturation flags for uncompressed size, compressed
/// size and local header offset, in that order. Returns the u64 values for
/// the flagged fields.
pub(crate) fn read_zip64_values(data: &[u8], fields: [bool; 3]) -> Result<[Option<u64>; 3]> {
    let mut cursor = data;
    let mut out = [None; 3];
    for (slot, wanted) in out.iter_mut().zip(fields) {
        if wanted {
            *slot = Some(read_u64_le(&mut cursor).map_err(|_| {
                Error::InvalidFormat("Zip64 extra field is too short".into())
            })?);
        }
    }
    Ok(out)
}
