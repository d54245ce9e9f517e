//! Staging storage for entry payloads.
//!
//! Content added to an archive is not written straight into the file: it
//! is first staged as a [`Blob`] in a [`ByteStorage`], compressed, and only
//! copied into the archive when the archive is updated. The storage variants
//! trade memory for disk:
//!
//! | Storage | Backing |
//! |---------|---------|
//! | [`InMemoryStorage`] | a heap buffer per blob |
//! | [`TempDirStorage`] | a file per blob in a [`TemporaryDirectory`] |
//! | [`OverflowStorage`] | memory first, least recently used blobs move to disk past a threshold |
//! | [`ChunkedStorage`] | splits large blobs into fixed-size pieces in another storage |
//! | [`DelegatingStorage`] / [`SingleUseStorage`] | forwards to another storage |
//!
//! Every storage reports the bytes held by its open blobs
//! ([`ByteStorage::bytes_used`]) and the high-water mark
//! ([`ByteStorage::max_bytes_used`]).
//!
//! # Example
//!
//! ```rust
//! use apkzip::storage::{ByteStorage, InMemoryStorage};
//!
//! let storage = InMemoryStorage::new();
//! let blob = storage.from_reader(&mut &b"hello"[..])?;
//! assert_eq!(blob.size(), 5);
//! assert_eq!(storage.bytes_used(), 5);
//! assert_eq!(blob.read_all()?, b"hello");
//!
//! blob.close()?;
//! assert_eq!(storage.bytes_used(), 0);
//! assert_eq!(storage.max_bytes_used(), 5);
//! # Ok::<(), apkzip::Error>(())
//! ```

use std::fmt;
use std::io::{Read, Write};
use std::sync::Arc;

use crate::Result;

pub mod chunked;
pub mod delegate;
pub mod factory;
pub mod limited;
pub mod lru;
pub mod memory;
pub mod overflow;
pub mod switchable;
pub mod temp;
pub mod temp_dir;
pub mod usage;

pub use chunked::ChunkedStorage;
pub use delegate::{DelegatingStorage, SingleUseStorage};
pub use factory::{StorageFactory, TemporaryDirectoryFactory};
pub use limited::LimitedReader;
pub use lru::PositionTracker;
pub use memory::{InMemoryStorage, MemoryBlob};
pub use overflow::OverflowStorage;
pub use switchable::{SwitchableReader, SwitchableSource};
pub use temp::{TemporaryDirectory, TemporaryFile};
pub use temp_dir::TempDirStorage;
pub use usage::{UsageGuard, UsageTracker};

/// A readable, closeable run of bytes.
pub trait ByteSource: Send + Sync + fmt::Debug {
    /// Number of bytes.
    fn size(&self) -> u64;

    /// Opens a new stream positioned at the first byte.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Closed`](crate::Error::Closed) after `close`.
    fn open(&self) -> Result<Box<dyn Read + Send>>;

    /// Releases the backing bytes and their accounting. Idempotent.
    fn close(&self) -> Result<()>;

    /// Reads the whole source into memory.
    fn read_all(&self) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(self.size() as usize);
        self.open()?.read_to_end(&mut out)?;
        Ok(out)
    }
}

/// Shared handle to staged bytes.
pub type Blob = Arc<dyn ByteSource>;

/// Collects written bytes into a new blob.
pub trait BlobBuilder: Write + Send {
    /// Seals the builder.
    fn build(self: Box<Self>) -> Result<Blob>;
}

/// A store that creates and accounts blobs.
pub trait ByteStorage: Send + Sync + fmt::Debug {
    /// Creates a blob holding everything `reader` yields.
    fn from_reader(&self, reader: &mut dyn Read) -> Result<Blob>;

    /// Creates a blob holding a copy of `source`.
    fn from_source(&self, source: &dyn ByteSource) -> Result<Blob> {
        let mut reader = source.open()?;
        self.from_reader(&mut reader)
    }

    /// Creates a builder; the blob exists once [`BlobBuilder::build`] runs.
    fn builder(&self) -> Result<Box<dyn BlobBuilder>>;

    /// Bytes held by blobs created here and not yet closed.
    fn bytes_used(&self) -> u64;

    /// Highest value [`bytes_used`](Self::bytes_used) has reached.
    fn max_bytes_used(&self) -> u64;

    /// Releases storage-wide resources such as temporary directories.
    fn close(&self) -> Result<()>;
}

/// Creates a blob from a byte slice.
pub fn blob_from_bytes(storage: &dyn ByteStorage, bytes: &[u8]) -> Result<Blob> {
    let mut reader = bytes;
    storage.from_reader(&mut reader)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    fn variants() -> Vec<(&'static str, Arc<dyn ByteStorage>)> {
        let temp = TemporaryDirectoryFactory::System;
        vec![
            ("memory", Arc::new(InMemoryStorage::new())),
            ("temp", Arc::new(TempDirStorage::new(&temp).unwrap())),
            ("overflow-0", Arc::new(OverflowStorage::new(0, &temp).unwrap())),
            ("overflow-10", Arc::new(OverflowStorage::new(10, &temp).unwrap())),
            ("overflow-1000", Arc::new(OverflowStorage::new(1000, &temp).unwrap())),
            (
                "chunked-10",
                Arc::new(ChunkedStorage::new(10, Arc::new(InMemoryStorage::new()))),
            ),
            (
                "chunked-1000",
                Arc::new(ChunkedStorage::new(1000, Arc::new(InMemoryStorage::new()))),
            ),
            (
                "chunked-10-overflow-10",
                Arc::new(ChunkedStorage::new(
                    10,
                    Arc::new(OverflowStorage::new(10, &temp).unwrap()),
                )),
            ),
            (
                "chunked-1000-overflow-10",
                Arc::new(ChunkedStorage::new(
                    1000,
                    Arc::new(OverflowStorage::new(10, &temp).unwrap()),
                )),
            ),
        ]
    }

    fn read_bytes(blob: &Blob) -> Vec<u8> {
        let mut out = Vec::new();
        blob.open().unwrap().read_to_end(&mut out).unwrap();
        out
    }

    #[test]
    fn test_create_from_reader() {
        for (name, storage) in variants() {
            let blob = storage.from_reader(&mut &[1u8, 2, 3][..]).unwrap();
            assert_eq!(blob.size(), 3, "{name}");
            assert_eq!(read_bytes(&blob), vec![1, 2, 3], "{name}");
            blob.close().unwrap();
            storage.close().unwrap();
        }
    }

    #[test]
    fn test_create_from_builder() {
        for (name, storage) in variants() {
            let mut builder = storage.builder().unwrap();
            builder.write_all(&[1]).unwrap();
            builder.write_all(&[2, 3]).unwrap();
            let blob = builder.build().unwrap();
            assert_eq!(blob.size(), 3, "{name}");
            assert_eq!(read_bytes(&blob), vec![1, 2, 3], "{name}");
            storage.close().unwrap();
        }
    }

    #[test]
    fn test_create_from_source() {
        let source_storage = InMemoryStorage::new();
        let source = blob_from_bytes(&source_storage, &[1, 2, 3]).unwrap();
        for (name, storage) in variants() {
            let blob = storage.from_source(source.as_ref()).unwrap();
            assert_eq!(read_bytes(&blob), vec![1, 2, 3], "{name}");
            storage.close().unwrap();
        }
    }

    #[test]
    fn test_tracks_current_and_max_usage() {
        for (name, storage) in variants() {
            assert_eq!(storage.bytes_used(), 0, "{name}");
            assert_eq!(storage.max_bytes_used(), 0, "{name}");

            let a = blob_from_bytes(storage.as_ref(), &[0; 10]).unwrap();
            assert_eq!(storage.bytes_used(), 10, "{name}");
            assert_eq!(storage.max_bytes_used(), 10, "{name}");

            let b = blob_from_bytes(storage.as_ref(), &[0; 15]).unwrap();
            assert_eq!(storage.bytes_used(), 25, "{name}");
            assert_eq!(storage.max_bytes_used(), 25, "{name}");

            a.close().unwrap();
            assert_eq!(storage.bytes_used(), 15, "{name}");
            assert_eq!(storage.max_bytes_used(), 25, "{name}");

            drop(b);
            assert_eq!(storage.bytes_used(), 0, "{name}");
            storage.close().unwrap();
        }
    }

    #[test]
    fn test_closed_blob_cannot_open() {
        for (name, storage) in variants() {
            let blob = blob_from_bytes(storage.as_ref(), &[7; 4]).unwrap();
            blob.close().unwrap();
            blob.close().unwrap();
            assert!(blob.open().is_err(), "{name}");
            storage.close().unwrap();
        }
    }
}
