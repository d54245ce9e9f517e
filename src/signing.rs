//! APK signing block editing.
//!
//! The signing block sits between the last entry and the central directory:
//!
//! ```text
//! [u64 size][u64 len][u32 id][value] ... [padding entry][u64 size]["APK Sig Block 42"]
//! ```
//!
//! `size` counts every byte after the first size field. A padding entry
//! with [`VERITY_PADDING_BLOCK_ID`] makes the whole block a multiple of
//! 4096 bytes.
//!
//! [`SigningBlockSplicer`] is a [`ZipExtension`] that keeps a set of
//! values in the block of an archive across updates.

use log::debug;

use crate::format::reader::u32_at;
use crate::zip::{ZipExtension, ZipFile};
use crate::{Error, Result};

/// Block ID of the APK Signature Scheme v2 signature.
pub const APK_SIGNATURE_SCHEME_V2_BLOCK_ID: u32 = 0x7109_871a;

/// Block ID of the padding entry.
pub const VERITY_PADDING_BLOCK_ID: u32 = 0x4272_6577;

/// Magic closing every signing block.
pub const APK_SIG_BLOCK_MAGIC: &[u8; 16] = b"APK Sig Block 42";

/// The serialized block is a multiple of this.
pub const PAGE_ALIGNMENT: u64 = 4096;

const SIZE_FIELD: u64 = 8;
const ID_FIELD: u64 = 4;
/// Trailing size field plus magic.
const TRAILER: u64 = SIZE_FIELD + 16;
/// Smallest block: both size fields and the magic.
const MIN_BLOCK: u64 = SIZE_FIELD + TRAILER;

fn u64_at(bytes: &[u8], pos: usize) -> Option<u64> {
    let raw = bytes.get(pos..pos + 8)?;
    let mut buf = [0u8; 8];
    buf.copy_from_slice(raw);
    Some(u64::from_le_bytes(buf))
}

/// The ID/value entries of a signing block.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SigningBlock {
    entries: Vec<(u32, Vec<u8>)>,
}

impl SigningBlock {
    /// A block with no entries.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a serialized block, padding entry included.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        Ok(Self {
            entries: parse_signing_block(bytes)?,
        })
    }

    /// Entries in block order.
    pub fn entries(&self) -> &[(u32, Vec<u8>)] {
        &self.entries
    }

    /// The value stored under `id`.
    pub fn get(&self, id: u32) -> Option<&[u8]> {
        self.entries
            .iter()
            .find(|(entry_id, _)| *entry_id == id)
            .map(|(_, value)| value.as_slice())
    }

    /// Stores `value` under `id`, in place if `id` is already present.
    pub fn insert(&mut self, id: u32, value: Vec<u8>) {
        match self.entries.iter_mut().find(|(entry_id, _)| *entry_id == id) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((id, value)),
        }
    }

    /// Removes the entry for `id`.
    pub fn remove(&mut self, id: u32) -> Option<Vec<u8>> {
        let index = self.entries.iter().position(|(entry_id, _)| *entry_id == id)?;
        Some(self.entries.remove(index).1)
    }

    /// Serializes the block with a freshly sized padding entry.
    ///
    /// Any padding entry already in the block is replaced.
    pub fn to_bytes(&self) -> Vec<u8> {
        let entries: Vec<&(u32, Vec<u8>)> = self
            .entries
            .iter()
            .filter(|(id, _)| *id != VERITY_PADDING_BLOCK_ID)
            .collect();

        let content: u64 = entries
            .iter()
            .map(|(_, value)| SIZE_FIELD + ID_FIELD + value.len() as u64)
            .sum();
        let unpadded = SIZE_FIELD + content + TRAILER;
        let mut padding = (PAGE_ALIGNMENT - unpadded % PAGE_ALIGNMENT) % PAGE_ALIGNMENT;
        if padding < SIZE_FIELD + ID_FIELD {
            padding += PAGE_ALIGNMENT;
        }
        let total = unpadded + padding;

        let mut out = Vec::with_capacity(total as usize);
        out.extend_from_slice(&(total - SIZE_FIELD).to_le_bytes());
        for (id, value) in entries {
            out.extend_from_slice(&(ID_FIELD + value.len() as u64).to_le_bytes());
            out.extend_from_slice(&id.to_le_bytes());
            out.extend_from_slice(value);
        }
        out.extend_from_slice(&(padding - SIZE_FIELD).to_le_bytes());
        out.extend_from_slice(&VERITY_PADDING_BLOCK_ID.to_le_bytes());
        out.resize(out.len() + (padding - SIZE_FIELD - ID_FIELD) as usize, 0);
        out.extend_from_slice(&(total - SIZE_FIELD).to_le_bytes());
        out.extend_from_slice(APK_SIG_BLOCK_MAGIC);
        out
    }
}

/// Splits a serialized block into its `(id, value)` entries.
///
/// # Errors
///
/// Returns [`Error::CorruptHeader`] if the size fields, the magic or an
/// entry length are inconsistent with `bytes`.
pub fn parse_signing_block(bytes: &[u8]) -> Result<Vec<(u32, Vec<u8>)>> {
    let len = bytes.len() as u64;
    if len < MIN_BLOCK {
        return Err(Error::corrupt_header(0, format!("signing block of {len} bytes is too short")));
    }
    let magic_at = (len - 16) as usize;
    if &bytes[magic_at..] != APK_SIG_BLOCK_MAGIC {
        return Err(Error::corrupt_header(magic_at as u64, "missing signing block magic"));
    }
    let leading = u64_at(bytes, 0).unwrap_or(0);
    let trailing_at = (len - TRAILER) as usize;
    let trailing = u64_at(bytes, trailing_at).unwrap_or(0);
    if leading != len - SIZE_FIELD || trailing != leading {
        return Err(Error::corrupt_header(
            0,
            format!(
                "signing block size fields {leading} and {trailing} do not match its length {len}"
            ),
        ));
    }

    let mut entries = Vec::new();
    let mut pos = SIZE_FIELD as usize;
    while pos < trailing_at {
        let room = (trailing_at - pos) as u64;
        let entry_len = u64_at(bytes, pos)
            .filter(|n| room >= SIZE_FIELD && *n >= ID_FIELD && *n <= room - SIZE_FIELD)
            .ok_or_else(|| Error::corrupt_header(pos as u64, "signing block entry overruns the block"))?;
        let id = u32_at(bytes, pos + SIZE_FIELD as usize)
            .ok_or_else(|| Error::corrupt_header(pos as u64, "truncated signing block entry"))?;
        let value_start = pos + (SIZE_FIELD + ID_FIELD) as usize;
        let value_end = pos + (SIZE_FIELD + entry_len) as usize;
        entries.push((id, bytes[value_start..value_end].to_vec()));
        pos = value_end;
    }
    Ok(entries)
}

/// Stores `value` under `block_id` in `existing`, or in a new block.
///
/// An empty `value` removes `block_id` instead. If there is nothing to
/// remove, the existing block is returned unchanged, or an empty vector
/// when there is no block at all.
pub fn add_to_signing_block(existing: Option<&[u8]>, value: &[u8], block_id: u32) -> Result<Vec<u8>> {
    if value.is_empty() {
        return match existing {
            Some(block) => remove_from_signing_block(block, block_id),
            None => Ok(Vec::new()),
        };
    }
    let mut block = match existing {
        Some(bytes) => SigningBlock::parse(bytes)?,
        None => SigningBlock::new(),
    };
    block.insert(block_id, value.to_vec());
    Ok(block.to_bytes())
}

/// Removes `block_id` from `existing`. A block without it is returned
/// unchanged.
pub fn remove_from_signing_block(existing: &[u8], block_id: u32) -> Result<Vec<u8>> {
    let mut block = SigningBlock::parse(existing)?;
    if block.remove(block_id).is_none() {
        return Ok(existing.to_vec());
    }
    Ok(block.to_bytes())
}

/// Reads the signing block ending where the central directory starts.
pub fn find_signing_block(zip: &ZipFile) -> Result<Option<Vec<u8>>> {
    let cd_offset = zip.central_directory_offset();
    if cd_offset < MIN_BLOCK {
        return Ok(None);
    }
    let mut trailer = [0u8; TRAILER as usize];
    zip.direct_read(cd_offset - TRAILER, &mut trailer)?;
    if &trailer[SIZE_FIELD as usize..] != APK_SIG_BLOCK_MAGIC {
        return Ok(None);
    }
    let size = u64_at(&trailer, 0).unwrap_or(0);
    let total = size.saturating_add(SIZE_FIELD);
    if total < MIN_BLOCK || total > cd_offset {
        return Err(Error::corrupt_header(
            cd_offset - TRAILER,
            format!("signing block of {total} bytes does not fit before the central directory"),
        ));
    }
    let mut block = vec![0u8; total as usize];
    zip.direct_read(cd_offset - total, &mut block)?;
    parse_signing_block(&block)?;
    Ok(Some(block))
}

/// Keeps values in an archive's signing block.
///
/// Before each update the splicer picks up the block already in the
/// archive, if any. Once entries are laid out it reserves room for the
/// block in front of the central directory and writes it there.
#[derive(Debug, Default)]
pub struct SigningBlockSplicer {
    values: Vec<(u32, Vec<u8>)>,
    existing: Option<Vec<u8>>,
    captured: bool,
}

impl SigningBlockSplicer {
    /// A splicer with nothing to add.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `value` under `block_id`.
    #[must_use]
    pub fn with_value(mut self, block_id: u32, value: Vec<u8>) -> Self {
        self.values.push((block_id, value));
        self
    }

    fn block(&self) -> Result<Vec<u8>> {
        let mut block = self.existing.clone();
        for (id, value) in &self.values {
            let next = add_to_signing_block(block.as_deref(), value, *id)?;
            block = if next.is_empty() { None } else { Some(next) };
        }
        Ok(block.unwrap_or_default())
    }
}

impl ZipExtension for SigningBlockSplicer {
    fn before_update(&mut self, zip: &mut ZipFile) -> Result<()> {
        if !self.captured {
            self.existing = find_signing_block(zip)?;
            self.captured = true;
        }
        Ok(())
    }

    fn entries_written(&mut self, zip: &mut ZipFile) -> Result<()> {
        let block = self.block()?;
        let len = block.len() as u64;
        if zip.extra_directory_offset() != len {
            // Lays the archive out again with room for the block.
            return zip.set_extra_directory_offset(len);
        }
        if !block.is_empty() {
            let start = zip.central_directory_offset() - len;
            zip.direct_write(start, &block)?;
            debug!("Wrote {len} byte signing block at {start:#x}");
        }
        Ok(())
    }
}
