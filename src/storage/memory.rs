//! Heap-backed staging storage.

use std::io::{Cursor, Read, Write};
use std::sync::{Arc, Mutex, Weak};

use super::usage::{UsageGuard, UsageTracker};
use super::{Blob, BlobBuilder, ByteSource, ByteStorage};
use crate::{Error, Result};

type LiveBlobs = Arc<Mutex<Vec<Weak<MemoryBlob>>>>;

/// Storage that keeps every blob in memory.
///
/// Closing the storage closes the blobs still open. It can keep creating
/// blobs afterwards.
#[derive(Debug, Default)]
pub struct InMemoryStorage {
    usage: Arc<UsageTracker>,
    live: LiveBlobs,
}

impl InMemoryStorage {
    /// Creates an empty storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wraps already collected bytes as a blob accounted in this storage.
    pub fn blob_from_vec(&self, data: Vec<u8>) -> Arc<MemoryBlob> {
        track(&self.live, MemoryBlob::new(data, &self.usage))
    }
}

fn track(live: &LiveBlobs, blob: MemoryBlob) -> Arc<MemoryBlob> {
    let blob = Arc::new(blob);
    let mut live = lock(live);
    live.retain(|weak| weak.strong_count() > 0);
    live.push(Arc::downgrade(&blob));
    blob
}

impl ByteStorage for InMemoryStorage {
    fn from_reader(&self, reader: &mut dyn Read) -> Result<Blob> {
        let mut data = Vec::new();
        reader.read_to_end(&mut data)?;
        Ok(self.blob_from_vec(data))
    }

    fn builder(&self) -> Result<Box<dyn BlobBuilder>> {
        Ok(Box::new(MemoryBlobBuilder {
            data: Vec::new(),
            usage: Arc::clone(&self.usage),
            live: Arc::clone(&self.live),
        }))
    }

    fn bytes_used(&self) -> u64 {
        self.usage.current()
    }

    fn max_bytes_used(&self) -> u64 {
        self.usage.peak()
    }

    fn close(&self) -> Result<()> {
        let live = std::mem::take(&mut *lock(&self.live));
        for blob in live.iter().filter_map(Weak::upgrade) {
            blob.close()?;
        }
        Ok(())
    }
}

#[derive(Debug)]
struct MemoryState {
    data: Arc<[u8]>,
    _guard: UsageGuard,
}

/// A blob whose bytes live on the heap.
#[derive(Debug)]
pub struct MemoryBlob {
    size: u64,
    state: Mutex<Option<MemoryState>>,
}

impl MemoryBlob {
    fn new(data: Vec<u8>, usage: &Arc<UsageTracker>) -> Self {
        let size = data.len() as u64;
        Self {
            size,
            state: Mutex::new(Some(MemoryState {
                data: data.into(),
                _guard: usage.reserve(size),
            })),
        }
    }

    /// Shared view of the bytes, or `None` once closed.
    pub fn bytes(&self) -> Option<Arc<[u8]>> {
        lock(&self.state).as_ref().map(|s| Arc::clone(&s.data))
    }
}

impl ByteSource for MemoryBlob {
    fn size(&self) -> u64 {
        self.size
    }

    fn open(&self) -> Result<Box<dyn Read + Send>> {
        let data = self.bytes().ok_or(Error::Closed { what: "blob" })?;
        Ok(Box::new(Cursor::new(data)))
    }

    fn close(&self) -> Result<()> {
        lock(&self.state).take();
        Ok(())
    }

    fn read_all(&self) -> Result<Vec<u8>> {
        let data = self.bytes().ok_or(Error::Closed { what: "blob" })?;
        Ok(data.to_vec())
    }
}

struct MemoryBlobBuilder {
    data: Vec<u8>,
    usage: Arc<UsageTracker>,
    live: LiveBlobs,
}

impl Write for MemoryBlobBuilder {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.data.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl BlobBuilder for MemoryBlobBuilder {
    fn build(self: Box<Self>) -> Result<Blob> {
        let MemoryBlobBuilder { data, usage, live } = *self;
        Ok(track(&live, MemoryBlob::new(data, &usage)))
    }
}

/// Locks a mutex, recovering the data of a poisoned lock.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
