//! Little-endian field helpers for ZIP record parsing and serialization.
//!
//! Readers take any `Read`, so a record can be decoded straight out of a
//! byte slice by passing `&mut &[u8]`; a short slice surfaces as
//! `UnexpectedEof`.

use std::io::{self, Read, Write};

/// Reads a little-endian u16.
pub fn read_u16_le<R: Read>(r: &mut R) -> io::Result<u16> {
    let mut buf = [0u8; 2];
    r.read_exact(&mut buf)?;
    Ok(u16::from_le_bytes(buf))
}

/// Reads a little-endian u32.
pub fn read_u32_le<R: Read>(r: &mut R) -> io::Result<u32> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

/// Reads a little-endian u64.
pub fn read_u64_le<R: Read>(r: &mut R) -> io::Result<u64> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

/// Reads exactly `count` bytes.
pub fn read_bytes<R: Read>(r: &mut R, count: usize) -> io::Result<Vec<u8>> {
    let mut buf = vec![0u8; count];
    r.read_exact(&mut buf)?;
    Ok(buf)
}

/// Writes a little-endian u16.
pub fn write_u16_le<W: Write>(w: &mut W, value: u16) -> io::Result<()> {
    w.write_all(&value.to_le_bytes())
}

/// Writes a little-endian u32.
pub fn write_u32_le<W: Write>(w: &mut W, value: u32) -> io::Result<()> {
    w.write_all(&value.to_le_bytes())
}

/// Writes a little-endian u64.
pub fn write_u64_le<W: Write>(w: &mut W, value: u64) -> io::Result<()> {
    w.write_all(&value.to_le_bytes())
}

/// Reads a little-endian u16 at `pos` without bounds errors.
///
/// Returns `None` if the slice is too short.
pub fn u16_at(bytes: &[u8], pos: usize) -> Option<u16> {
    let raw = bytes.get(pos..pos.checked_add(2)?)?;
    Some(u16::from_le_bytes([raw[0], raw[1]]))
}

/// Reads a little-endian u32 at `pos`, or `None` if the slice is too short.
pub fn u32_at(bytes: &[u8], pos: usize) -> Option<u32> {
    let raw = bytes.get(pos..pos.checked_add(4)?)?;
    Some(u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
}

/// Saturates `value` to a 16-bit field, using `0xFFFF` as the overflow sentinel.
pub fn saturate_u16(value: u64) -> u16 {
    u16::try_from(value).unwrap_or(u16::MAX)
}

/// Saturates `value` to a 32-bit field, using `0xFFFFFFFF` as the overflow sentinel.
pub fn saturate_u32(value: u64) -> u32 {
    u32::try_from(value).unwrap_or(u32::MAX)
}
