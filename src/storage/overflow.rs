//! Memory-first storage that spills to disk.

use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use super::factory::TemporaryDirectoryFactory;
use super::lru::PositionTracker;
use super::memory::{InMemoryStorage, lock};
use super::switchable::SwitchableSource;
use super::temp_dir::TempDirStorage;
use super::{Blob, BlobBuilder, ByteSource, ByteStorage};
use crate::Result;

#[derive(Debug, Default)]
struct OverflowState {
    next_id: u64,
    /// Blobs still in memory, most recently used first.
    in_memory: PositionTracker<u64>,
    sources: HashMap<u64, Arc<SwitchableSource>>,
}

#[derive(Debug)]
struct OverflowInner {
    threshold: u64,
    memory: InMemoryStorage,
    disk: TempDirStorage,
    state: Mutex<OverflowState>,
    peak: AtomicU64,
}

impl OverflowInner {
    fn total(&self) -> u64 {
        self.memory.bytes_used() + self.disk.bytes_used()
    }

    fn note_peak(&self) {
        self.peak.fetch_max(self.total(), Ordering::SeqCst);
    }

    fn access(&self, id: u64) {
        let mut state = lock(&self.state);
        if state.in_memory.contains(&id) {
            // Tracked keys always accept an access.
            let _ = state.in_memory.access(id);
        }
    }

    fn forget(&self, id: u64) {
        let mut state = lock(&self.state);
        if state.in_memory.contains(&id) {
            let _ = state.in_memory.untrack(id);
        }
        state.sources.remove(&id);
    }

    /// Moves least recently used blobs to disk until memory fits the
    /// threshold.
    fn evict(&self) -> Result<()> {
        let mut state = lock(&self.state);
        while self.memory.bytes_used() > self.threshold {
            let Some(id) = state.in_memory.last() else {
                break;
            };
            state.in_memory.untrack(id)?;
            let Some(source) = state.sources.get(&id).cloned() else {
                continue;
            };
            let Some(current) = source.current() else {
                continue;
            };
            log::trace!(
                "Moving {} staged bytes to disk ({} in memory, threshold {})",
                current.size(),
                self.memory.bytes_used(),
                self.threshold
            );
            let on_disk = self.disk.from_source(current.as_ref())?;
            source.switch_to(on_disk)?;
        }
        Ok(())
    }

    fn register(self: &Arc<Self>, memory_blob: Blob) -> Result<Blob> {
        let source = Arc::new(SwitchableSource::new(memory_blob));
        let id = {
            let mut state = lock(&self.state);
            let id = state.next_id;
            state.next_id += 1;
            state.in_memory.track(id)?;
            state.sources.insert(id, Arc::clone(&source));
            id
        };
        self.note_peak();
        self.evict()?;
        self.note_peak();
        Ok(Arc::new(OverflowBlob {
            id,
            source,
            owner: Arc::downgrade(self),
        }))
    }
}

/// Storage that keeps blobs in memory up to a byte threshold and moves the
/// least recently used ones to a temporary directory beyond it.
///
/// Opening a stream on a blob counts as using it. A blob that has moved to
/// disk stays there.
#[derive(Debug)]
pub struct OverflowStorage {
    inner: Arc<OverflowInner>,
}

impl OverflowStorage {
    /// Creates a storage spilling past `threshold` bytes of memory into a
    /// directory from `temp`.
    pub fn new(threshold: u64, temp: &TemporaryDirectoryFactory) -> Result<Self> {
        Ok(Self {
            inner: Arc::new(OverflowInner {
                threshold,
                memory: InMemoryStorage::new(),
                disk: TempDirStorage::new(temp)?,
                state: Mutex::new(OverflowState::default()),
                peak: AtomicU64::new(0),
            }),
        })
    }

    /// Memory threshold in bytes.
    pub fn threshold(&self) -> u64 {
        self.inner.threshold
    }

    /// Bytes held in memory.
    pub fn memory_bytes_used(&self) -> u64 {
        self.inner.memory.bytes_used()
    }

    /// Highest number of bytes held in memory, measured before eviction.
    pub fn max_memory_bytes_used(&self) -> u64 {
        self.inner.memory.max_bytes_used()
    }

    /// Bytes held on disk.
    pub fn disk_bytes_used(&self) -> u64 {
        self.inner.disk.bytes_used()
    }

    /// Highest number of bytes held on disk.
    pub fn max_disk_bytes_used(&self) -> u64 {
        self.inner.disk.max_bytes_used()
    }

    /// Directory receiving spilled blobs.
    pub fn directory(&self) -> &Path {
        self.inner.disk.directory()
    }
}

impl ByteStorage for OverflowStorage {
    fn from_reader(&self, reader: &mut dyn Read) -> Result<Blob> {
        let blob = self.inner.memory.from_reader(reader)?;
        self.inner.register(blob)
    }

    fn builder(&self) -> Result<Box<dyn BlobBuilder>> {
        Ok(Box::new(OverflowBlobBuilder {
            inner: self.inner.memory.builder()?,
            owner: Arc::clone(&self.inner),
        }))
    }

    fn bytes_used(&self) -> u64 {
        self.inner.total()
    }

    fn max_bytes_used(&self) -> u64 {
        self.inner.peak.load(Ordering::SeqCst)
    }

    fn close(&self) -> Result<()> {
        self.inner.memory.close()?;
        self.inner.disk.close()
    }
}

#[derive(Debug)]
struct OverflowBlob {
    id: u64,
    source: Arc<SwitchableSource>,
    owner: Weak<OverflowInner>,
}

impl ByteSource for OverflowBlob {
    fn size(&self) -> u64 {
        self.source.size()
    }

    fn open(&self) -> Result<Box<dyn Read + Send>> {
        if let Some(owner) = self.owner.upgrade() {
            owner.access(self.id);
        }
        self.source.open()
    }

    fn close(&self) -> Result<()> {
        if let Some(owner) = self.owner.upgrade() {
            owner.forget(self.id);
        }
        self.source.close()
    }
}

impl Drop for OverflowBlob {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            log::warn!("Failed to release staged blob: {}", e);
        }
    }
}

struct OverflowBlobBuilder {
    inner: Box<dyn BlobBuilder>,
    owner: Arc<OverflowInner>,
}

impl Write for OverflowBlobBuilder {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl BlobBuilder for OverflowBlobBuilder {
    fn build(self: Box<Self>) -> Result<Blob> {
        let OverflowBlobBuilder { inner, owner } = *self;
        let blob = inner.build()?;
        owner.register(blob)
    }
}
