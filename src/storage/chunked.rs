//! Storage that splits blobs into fixed-size chunks.

use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex};

use super::memory::lock;
use super::{Blob, BlobBuilder, ByteSource, ByteStorage};
use crate::{Error, Result};

/// Storage that stores each blob as a sequence of chunks of at most
/// `chunk_size` bytes in a delegate storage.
///
/// Usage figures are the delegate's.
#[derive(Debug)]
pub struct ChunkedStorage {
    chunk_size: u64,
    delegate: Arc<dyn ByteStorage>,
}

impl ChunkedStorage {
    /// Creates a chunked view over `delegate`. A zero `chunk_size` is
    /// treated as one.
    pub fn new(chunk_size: u64, delegate: Arc<dyn ByteStorage>) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
            delegate,
        }
    }

    /// Maximum chunk size in bytes.
    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    /// The storage holding the chunks.
    pub fn delegate(&self) -> &Arc<dyn ByteStorage> {
        &self.delegate
    }
}

impl ByteStorage for ChunkedStorage {
    fn from_reader(&self, reader: &mut dyn Read) -> Result<Blob> {
        let mut chunks = Vec::new();
        loop {
            let mut limited = (&mut *reader).take(self.chunk_size);
            let chunk = self.delegate.from_reader(&mut limited)?;
            let size = chunk.size();
            if size == 0 {
                chunk.close()?;
                break;
            }
            chunks.push(chunk);
            if size < self.chunk_size {
                break;
            }
        }
        Ok(Arc::new(ChunkedBlob::new(chunks)))
    }

    fn builder(&self) -> Result<Box<dyn BlobBuilder>> {
        Ok(Box::new(ChunkedBlobBuilder {
            chunk_size: self.chunk_size,
            delegate: Arc::clone(&self.delegate),
            current: None,
            current_len: 0,
            chunks: Vec::new(),
        }))
    }

    fn bytes_used(&self) -> u64 {
        self.delegate.bytes_used()
    }

    fn max_bytes_used(&self) -> u64 {
        self.delegate.max_bytes_used()
    }

    fn close(&self) -> Result<()> {
        self.delegate.close()
    }
}

#[derive(Debug)]
struct ChunkedBlob {
    size: u64,
    chunks: Mutex<Option<Vec<Blob>>>,
}

impl ChunkedBlob {
    fn new(chunks: Vec<Blob>) -> Self {
        Self {
            size: chunks.iter().map(|c| c.size()).sum(),
            chunks: Mutex::new(Some(chunks)),
        }
    }
}

impl ByteSource for ChunkedBlob {
    fn size(&self) -> u64 {
        self.size
    }

    fn open(&self) -> Result<Box<dyn Read + Send>> {
        let chunks = lock(&self.chunks)
            .clone()
            .ok_or(Error::Closed { what: "blob" })?;
        Ok(Box::new(ChunkReader {
            chunks: chunks.into_iter(),
            current: None,
        }))
    }

    fn close(&self) -> Result<()> {
        let chunks = lock(&self.chunks).take();
        let mut first_error = None;
        for chunk in chunks.into_iter().flatten() {
            if let Err(e) = chunk.close() {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

impl Drop for ChunkedBlob {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            log::warn!("Failed to release chunked blob: {}", e);
        }
    }
}

/// Reads the chunks of a blob back to back, opening each one lazily.
struct ChunkReader {
    chunks: std::vec::IntoIter<Blob>,
    current: Option<Box<dyn Read + Send>>,
}

impl Read for ChunkReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        loop {
            if let Some(current) = self.current.as_mut() {
                let n = current.read(buf)?;
                if n > 0 {
                    return Ok(n);
                }
                self.current = None;
            }
            match self.chunks.next() {
                Some(chunk) => self.current = Some(chunk.open()?),
                None => return Ok(0),
            }
        }
    }
}

struct ChunkedBlobBuilder {
    chunk_size: u64,
    delegate: Arc<dyn ByteStorage>,
    current: Option<Box<dyn BlobBuilder>>,
    current_len: u64,
    chunks: Vec<Blob>,
}

impl ChunkedBlobBuilder {
    fn seal_current(&mut self) -> Result<()> {
        if let Some(builder) = self.current.take() {
            self.chunks.push(builder.build()?);
        }
        self.current_len = 0;
        Ok(())
    }
}

impl Write for ChunkedBlobBuilder {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        if self.current.is_none() {
            self.current = Some(self.delegate.builder()?);
        }
        let room = (self.chunk_size - self.current_len).min(buf.len() as u64) as usize;
        let n = match self.current.as_mut() {
            Some(builder) => builder.write(&buf[..room])?,
            None => 0,
        };
        self.current_len += n as u64;
        if self.current_len == self.chunk_size {
            self.seal_current()?;
        }
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.current.as_mut() {
            Some(builder) => builder.flush(),
            None => Ok(()),
        }
    }
}

impl BlobBuilder for ChunkedBlobBuilder {
    fn build(mut self: Box<Self>) -> Result<Blob> {
        self.seal_current()?;
        let chunks = std::mem::take(&mut self.chunks);
        Ok(Arc::new(ChunkedBlob::new(chunks)))
    }
}
