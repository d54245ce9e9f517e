//! Storages that forward to another storage.

use std::io::Read;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use super::{Blob, BlobBuilder, ByteSource, ByteStorage};
use crate::{Error, Result};

/// Forwards every call to an inner storage.
///
/// A borrowed delegate leaves the inner storage open when closed, so one
/// storage can be shared by several archives.
#[derive(Debug)]
pub struct DelegatingStorage {
    inner: Arc<dyn ByteStorage>,
    closes_inner: bool,
}

impl DelegatingStorage {
    /// Forwards everything, including `close`.
    pub fn new(inner: Arc<dyn ByteStorage>) -> Self {
        Self {
            inner,
            closes_inner: true,
        }
    }

    /// Forwards everything except `close`.
    pub fn borrowed(inner: Arc<dyn ByteStorage>) -> Self {
        Self {
            inner,
            closes_inner: false,
        }
    }

    /// The wrapped storage.
    pub fn inner(&self) -> &Arc<dyn ByteStorage> {
        &self.inner
    }
}

impl ByteStorage for DelegatingStorage {
    fn from_reader(&self, reader: &mut dyn Read) -> Result<Blob> {
        self.inner.from_reader(reader)
    }

    fn from_source(&self, source: &dyn ByteSource) -> Result<Blob> {
        self.inner.from_source(source)
    }

    fn builder(&self) -> Result<Box<dyn BlobBuilder>> {
        self.inner.builder()
    }

    fn bytes_used(&self) -> u64 {
        self.inner.bytes_used()
    }

    fn max_bytes_used(&self) -> u64 {
        self.inner.max_bytes_used()
    }

    fn close(&self) -> Result<()> {
        if self.closes_inner {
            self.inner.close()
        } else {
            Ok(())
        }
    }
}

/// A delegating storage that can be closed exactly once.
///
/// After `close`, creating blobs fails with [`Error::Closed`] and a second
/// `close` is rejected the same way. Usage figures stay readable.
#[derive(Debug)]
pub struct SingleUseStorage {
    inner: DelegatingStorage,
    closed: AtomicBool,
}

impl SingleUseStorage {
    /// Wraps `inner`.
    pub fn new(inner: DelegatingStorage) -> Self {
        Self {
            inner,
            closed: AtomicBool::new(false),
        }
    }

    fn check_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            Err(Error::Closed { what: "storage" })
        } else {
            Ok(())
        }
    }
}

impl ByteStorage for SingleUseStorage {
    fn from_reader(&self, reader: &mut dyn Read) -> Result<Blob> {
        self.check_open()?;
        self.inner.from_reader(reader)
    }

    fn from_source(&self, source: &dyn ByteSource) -> Result<Blob> {
        self.check_open()?;
        self.inner.from_source(source)
    }

    fn builder(&self) -> Result<Box<dyn BlobBuilder>> {
        self.check_open()?;
        self.inner.builder()
    }

    fn bytes_used(&self) -> u64 {
        self.inner.bytes_used()
    }

    fn max_bytes_used(&self) -> u64 {
        self.inner.max_bytes_used()
    }

    fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Err(Error::Closed { what: "storage" });
        }
        self.inner.close()
    }
}
