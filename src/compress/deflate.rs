//! Raw deflate compression of staged blobs.

use std::io;
use std::sync::Arc;

use flate2::Compression;
use flate2::write::DeflateEncoder;

use super::{CompressionResult, Compressor};
use crate::format::CompressionMethod;
use crate::storage::{Blob, ByteStorage};
use crate::Result;

/// Deflates blobs and keeps the result only if it saves space.
#[derive(Debug, Clone, Copy)]
pub struct DeflateCompressor {
    level: u32,
}

impl Default for DeflateCompressor {
    fn default() -> Self {
        Self { level: 6 }
    }
}

impl DeflateCompressor {
    /// Creates a compressor with the given level (0-9).
    pub fn new(level: u32) -> Self {
        Self {
            level: level.min(9),
        }
    }

    /// Compression level.
    pub fn level(&self) -> u32 {
        self.level
    }
}

impl Compressor for DeflateCompressor {
    fn compress(&self, source: Blob, storage: &Arc<dyn ByteStorage>) -> Result<CompressionResult> {
        let builder = storage.builder()?;
        let mut encoder = DeflateEncoder::new(builder, Compression::new(self.level));
        io::copy(&mut source.open()?, &mut encoder)?;
        let deflated = encoder.finish()?.build()?;

        if deflated.size() < source.size() {
            log::trace!(
                "Deflated {} bytes to {}",
                source.size(),
                deflated.size()
            );
            Ok(CompressionResult {
                method: CompressionMethod::Deflated,
                raw: deflated,
            })
        } else {
            deflated.close()?;
            Ok(CompressionResult::stored(source))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{InMemoryStorage, blob_from_bytes};
    use flate2::read::DeflateDecoder;
    use rand::{Rng, SeedableRng};
    use std::io::Read;

    fn storage() -> Arc<dyn ByteStorage> {
        Arc::new(InMemoryStorage::new())
    }

    #[test]
    fn test_compressible_data_is_deflated() {
        let storage = storage();
        let data = b"abcabcabc".repeat(200);
        let source = blob_from_bytes(storage.as_ref(), &data).unwrap();
        let result = DeflateCompressor::default()
            .compress(source, &storage)
            .unwrap();
        assert_eq!(result.method, CompressionMethod::Deflated);

        let mut inflated = Vec::new();
        DeflateDecoder::new(result.raw.open().unwrap())
            .read_to_end(&mut inflated)
            .unwrap();
        assert_eq!(inflated, data);
    }

    #[test]
    fn test_random_data_is_stored() {
        let storage = storage();
        let mut rng = rand::rngs::StdRng::seed_from_u64(7);
        let data: Vec<u8> = (0..2048).map(|_| rng.r#gen()).collect();
        let source = blob_from_bytes(storage.as_ref(), &data).unwrap();
        let result = DeflateCompressor::new(9)
            .compress(Arc::clone(&source), &storage)
            .unwrap();
        assert_eq!(result.method, CompressionMethod::Stored);
        assert!(Arc::ptr_eq(&result.raw, &source));
        assert_eq!(storage.bytes_used(), 2048);
    }

    #[test]
    fn test_empty_is_stored() {
        let storage = storage();
        let source = blob_from_bytes(storage.as_ref(), &[]).unwrap();
        let result = DeflateCompressor::default()
            .compress(source, &storage)
            .unwrap();
        assert_eq!(result.method, CompressionMethod::Stored);
        assert_eq!(result.size(), 0);
    }
}
