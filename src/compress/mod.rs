//! Entry compression.
//!
//! The archive never decides by itself how content is compressed: it hands
//! every staged blob to a [`Compressor`] and stores whatever representation
//! comes back. [`DeflateCompressor`] keeps the deflated form only when it is
//! strictly smaller than the source. [`DeferredCompressor`] runs another
//! compressor on a worker so that adding many entries does not serialize on
//! compression.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use apkzip::compress::{Compressor, DeflateCompressor};
//! use apkzip::format::CompressionMethod;
//! use apkzip::storage::{blob_from_bytes, ByteStorage, InMemoryStorage};
//!
//! let storage: Arc<dyn ByteStorage> = Arc::new(InMemoryStorage::new());
//! let source = blob_from_bytes(storage.as_ref(), &[0u8; 4096])?;
//! let result = DeflateCompressor::default().compress(source, &storage)?;
//! assert_eq!(result.method, CompressionMethod::Deflated);
//! assert!(result.raw.size() < 4096);
//! # Ok::<(), apkzip::Error>(())
//! ```

use std::fmt;
use std::sync::Arc;

use crate::format::CompressionMethod;
use crate::storage::{Blob, ByteStorage};
use crate::Result;

mod deferred;
mod deflate;

pub use deferred::{CompressionTask, DeferredCompressor};
pub use deflate::DeflateCompressor;

/// The representation chosen for an entry's content.
#[derive(Debug, Clone)]
pub struct CompressionResult {
    /// How `raw` is encoded.
    pub method: CompressionMethod,
    /// The bytes written to the archive.
    pub raw: Blob,
}

impl CompressionResult {
    /// Keeps `source` uncompressed.
    pub fn stored(source: Blob) -> Self {
        Self {
            method: CompressionMethod::Stored,
            raw: source,
        }
    }

    /// Size of the stored representation.
    pub fn size(&self) -> u64 {
        self.raw.size()
    }
}

/// Chooses and produces the stored representation of a blob.
pub trait Compressor: Send + Sync + fmt::Debug {
    /// Compresses `source`, creating any new blob in `storage`.
    fn compress(&self, source: Blob, storage: &Arc<dyn ByteStorage>) -> Result<CompressionResult>;

    /// Starts compressing `source`.
    ///
    /// The default runs [`compress`](Self::compress) right away and returns
    /// a finished task.
    fn compress_deferred(&self, source: Blob, storage: &Arc<dyn ByteStorage>) -> CompressionTask {
        CompressionTask::finished(self.compress(source, storage))
    }
}
