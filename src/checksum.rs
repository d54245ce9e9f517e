//! CRC-32 of entry content, computed while it is staged.
//!
//! ```rust
//! use apkzip::checksum::Crc32Reader;
//! use std::io::Read;
//!
//! let mut reader = Crc32Reader::new(&b"Hello, World!"[..]);
//! let mut staged = Vec::new();
//! reader.read_to_end(&mut staged).unwrap();
//! assert_eq!(reader.crc(), 0xEC4AC3D0);
//! assert_eq!(reader.bytes_read(), 13);
//! ```

use std::fmt;
use std::io::{self, Read};

/// Passes bytes through while checksumming and counting them.
pub struct Crc32Reader<R> {
    inner: R,
    hasher: crc32fast::Hasher,
    bytes_read: u64,
}

impl<R> fmt::Debug for Crc32Reader<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Crc32Reader")
            .field("crc", &self.crc())
            .field("bytes_read", &self.bytes_read)
            .finish_non_exhaustive()
    }
}

impl<R> Crc32Reader<R> {
    /// Wraps `inner`.
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            hasher: crc32fast::Hasher::new(),
            bytes_read: 0,
        }
    }

    /// CRC of the bytes read so far.
    pub fn crc(&self) -> u32 {
        self.hasher.clone().finalize()
    }

    /// Number of bytes read so far.
    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }
}

impl<R: Read> Read for Crc32Reader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.hasher.update(&buf[..n]);
        self.bytes_read += n as u64;
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_input() {
        let mut reader = Crc32Reader::new(io::empty());
        assert_eq!(io::copy(&mut reader, &mut io::sink()).unwrap(), 0);
        assert_eq!(reader.crc(), 0);
    }

    #[test]
    fn test_small_reads_match_one_shot() {
        let data = vec![0x5Au8; 20_017];
        let mut reader = Crc32Reader::new(&data[..]);
        let mut buf = [0u8; 7];
        while reader.read(&mut buf).unwrap() > 0 {}
        assert_eq!(reader.crc(), crc32fast::hash(&data));
        assert_eq!(reader.bytes_read(), data.len() as u64);
    }

    #[test]
    fn test_known_value() {
        let mut reader = Crc32Reader::new(&b"abc"[..]);
        io::copy(&mut reader, &mut io::sink()).unwrap();
        assert_eq!(reader.crc(), 0x352441C2);
    }
}
