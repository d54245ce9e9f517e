//! Staging storage with one file per blob.

use std::fs::File;
use std::io::{self, BufWriter, Read, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};

use super::factory::TemporaryDirectoryFactory;
use super::memory::lock;
use super::temp::{TemporaryDirectory, TemporaryFile};
use super::usage::{UsageGuard, UsageTracker};
use super::{Blob, BlobBuilder, ByteSource, ByteStorage};
use crate::{Error, Result};

/// Storage that writes each blob to its own file in a temporary directory.
#[derive(Debug)]
pub struct TempDirStorage {
    directory: TemporaryDirectory,
    usage: Arc<UsageTracker>,
}

impl TempDirStorage {
    /// Creates a storage in a directory obtained from `factory`.
    pub fn new(factory: &TemporaryDirectoryFactory) -> Result<Self> {
        Ok(Self::with_directory(factory.make()?))
    }

    /// Creates a storage in `directory`, which is closed with the storage.
    pub fn with_directory(directory: TemporaryDirectory) -> Self {
        Self {
            directory,
            usage: UsageTracker::new(),
        }
    }

    /// The directory holding the blob files.
    pub fn directory(&self) -> &Path {
        self.directory.path()
    }

    fn new_file(&self) -> Result<(TemporaryFile, File)> {
        let path = self.directory.new_file()?;
        let temp = TemporaryFile::new(path);
        let file = File::create(temp.path()?)?;
        Ok((temp, file))
    }
}

impl ByteStorage for TempDirStorage {
    fn from_reader(&self, reader: &mut dyn Read) -> Result<Blob> {
        let (temp, file) = self.new_file()?;
        let mut writer = BufWriter::new(file);
        let size = io::copy(reader, &mut writer)?;
        writer.flush()?;
        Ok(Arc::new(FileBlob::new(temp, size, &self.usage)))
    }

    fn builder(&self) -> Result<Box<dyn BlobBuilder>> {
        let (temp, file) = self.new_file()?;
        Ok(Box::new(FileBlobBuilder {
            temp,
            writer: BufWriter::new(file),
            written: 0,
            usage: Arc::clone(&self.usage),
        }))
    }

    fn bytes_used(&self) -> u64 {
        self.usage.current()
    }

    fn max_bytes_used(&self) -> u64 {
        self.usage.peak()
    }

    fn close(&self) -> Result<()> {
        self.directory.close()
    }
}

#[derive(Debug)]
struct FileState {
    temp: TemporaryFile,
    _guard: UsageGuard,
}

/// A blob stored in a temporary file.
#[derive(Debug)]
pub struct FileBlob {
    size: u64,
    state: Mutex<Option<FileState>>,
}

impl FileBlob {
    fn new(temp: TemporaryFile, size: u64, usage: &Arc<UsageTracker>) -> Self {
        Self {
            size,
            state: Mutex::new(Some(FileState {
                temp,
                _guard: usage.reserve(size),
            })),
        }
    }
}

impl ByteSource for FileBlob {
    fn size(&self) -> u64 {
        self.size
    }

    fn open(&self) -> Result<Box<dyn Read + Send>> {
        let state = lock(&self.state);
        let state = state.as_ref().ok_or(Error::Closed { what: "blob" })?;
        Ok(Box::new(File::open(state.temp.path()?)?))
    }

    fn close(&self) -> Result<()> {
        let state = lock(&self.state).take();
        match state {
            Some(state) => state.temp.close(),
            None => Ok(()),
        }
    }
}

struct FileBlobBuilder {
    temp: TemporaryFile,
    writer: BufWriter<File>,
    written: u64,
    usage: Arc<UsageTracker>,
}

impl Write for FileBlobBuilder {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.writer.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

impl BlobBuilder for FileBlobBuilder {
    fn build(self: Box<Self>) -> Result<Blob> {
        let FileBlobBuilder {
            temp,
            mut writer,
            written,
            usage,
        } = *self;
        writer.flush()?;
        drop(writer);
        Ok(Arc::new(FileBlob::new(temp, written, &usage)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn files_in(dir: &Path) -> usize {
        fs::read_dir(dir).unwrap().count()
    }

    #[test]
    fn test_blob_file_deleted_on_close() {
        let storage = TempDirStorage::new(&TemporaryDirectoryFactory::System).unwrap();
        let blob = storage.from_reader(&mut &b"abc"[..]).unwrap();
        assert_eq!(files_in(storage.directory()), 1);
        blob.close().unwrap();
        assert_eq!(files_in(storage.directory()), 0);
        storage.close().unwrap();
    }

    #[test]
    fn test_close_deletes_directory() {
        let storage = TempDirStorage::new(&TemporaryDirectoryFactory::System).unwrap();
        let dir = storage.directory().to_path_buf();
        let _blob = storage.from_reader(&mut &b"abc"[..]).unwrap();
        storage.close().unwrap();
        assert!(!dir.exists());
    }

    #[test]
    fn test_fixed_directory_is_kept() {
        let outer = tempfile::tempdir().unwrap();
        let factory = TemporaryDirectoryFactory::Fixed(outer.path().to_path_buf());
        let storage = TempDirStorage::new(&factory).unwrap();
        let blob = storage.from_reader(&mut &b"xyz"[..]).unwrap();
        assert_eq!(blob.read_all().unwrap(), b"xyz");
        blob.close().unwrap();
        storage.close().unwrap();
        assert!(outer.path().is_dir());
        assert_eq!(files_in(outer.path()), 0);
    }
}
