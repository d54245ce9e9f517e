//! Byte sources whose backing can change under open streams.
//!
//! [`OverflowStorage`](super::OverflowStorage) moves blobs from memory to
//! disk while readers may be halfway through them. A [`SwitchableSource`]
//! makes that invisible: every stream it hands out keeps its absolute offset
//! across a switch and continues reading from the new backing.

use std::io::{self, Read};
use std::sync::{Arc, Mutex, Weak};

use super::memory::lock;
use super::{Blob, ByteSource};
use crate::{Error, Result};

/// A reader whose underlying stream can be replaced mid-read.
pub struct SwitchableReader {
    inner: Option<Box<dyn Read + Send>>,
    offset: u64,
}

impl std::fmt::Debug for SwitchableReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SwitchableReader")
            .field("offset", &self.offset)
            .field("ended", &self.inner.is_none())
            .finish()
    }
}

impl SwitchableReader {
    /// Wraps `inner`, starting at offset zero.
    pub fn new(inner: Box<dyn Read + Send>) -> Self {
        Self {
            inner: Some(inner),
            offset: 0,
        }
    }

    /// Bytes read so far.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Replaces the underlying stream.
    ///
    /// `new` is advanced to the current offset before it is used; the old
    /// stream is dropped. A reader that has been ended stays ended.
    pub fn switch_to(&mut self, mut new: Box<dyn Read + Send>) -> io::Result<()> {
        if self.inner.is_none() {
            return Ok(());
        }
        let skipped = io::copy(&mut (&mut new).take(self.offset), &mut io::sink())?;
        if skipped < self.offset {
            log::warn!(
                "Switched stream ended at {} before offset {}",
                skipped,
                self.offset
            );
        }
        self.inner = Some(new);
        Ok(())
    }

    /// Drops the underlying stream; further reads report end of data.
    pub fn end(&mut self) {
        self.inner = None;
    }
}

impl Read for SwitchableReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let Some(inner) = self.inner.as_mut() else {
            return Ok(0);
        };
        let n = inner.read(buf)?;
        self.offset += n as u64;
        Ok(n)
    }
}

struct SharedReader(Arc<Mutex<SwitchableReader>>);

impl Read for SharedReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        lock(&self.0).read(buf)
    }
}

#[derive(Debug)]
struct SwitchState {
    source: Option<Blob>,
    size: u64,
    readers: Vec<Weak<Mutex<SwitchableReader>>>,
}

/// A byte source that can be re-pointed at another source with the same
/// content.
#[derive(Debug)]
pub struct SwitchableSource {
    state: Mutex<SwitchState>,
}

impl SwitchableSource {
    /// Creates a source backed by `source`.
    pub fn new(source: Blob) -> Self {
        Self {
            state: Mutex::new(SwitchState {
                size: source.size(),
                source: Some(source),
                readers: Vec::new(),
            }),
        }
    }

    /// The current backing, or `None` once closed.
    pub fn current(&self) -> Option<Blob> {
        lock(&self.state).source.clone()
    }

    /// Re-points the source and all open streams at `new`, then closes the
    /// old backing.
    ///
    /// Switching to the current backing does nothing. Switching a closed
    /// source closes `new` instead.
    pub fn switch_to(&self, new: Blob) -> Result<()> {
        let mut state = lock(&self.state);
        let Some(old) = state.source.clone() else {
            drop(state);
            return new.close();
        };
        if Arc::ptr_eq(&old, &new) {
            return Ok(());
        }

        state.readers.retain(|r| r.strong_count() > 0);
        for reader in state.readers.iter().filter_map(Weak::upgrade) {
            let stream = new.open()?;
            lock(&reader).switch_to(stream)?;
        }
        state.size = new.size();
        state.source = Some(new);
        drop(state);
        old.close()
    }
}

impl ByteSource for SwitchableSource {
    fn size(&self) -> u64 {
        lock(&self.state).size
    }

    fn open(&self) -> Result<Box<dyn Read + Send>> {
        let mut state = lock(&self.state);
        let source = state.source.as_ref().ok_or(Error::Closed { what: "blob" })?;
        let reader = Arc::new(Mutex::new(SwitchableReader::new(source.open()?)));
        state.readers.retain(|r| r.strong_count() > 0);
        state.readers.push(Arc::downgrade(&reader));
        Ok(Box::new(SharedReader(reader)))
    }

    fn close(&self) -> Result<()> {
        let mut state = lock(&self.state);
        let Some(source) = state.source.take() else {
            return Ok(());
        };
        for reader in state.readers.drain(..).filter_map(|r| r.upgrade()) {
            lock(&reader).end();
        }
        drop(state);
        source.close()
    }
}
