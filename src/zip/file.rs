//! Positioned access to the archive file.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::storage::memory::lock;
use crate::{Error, READ_BUFFER_SIZE, Result};

#[derive(Debug, Default)]
struct Handle {
    file: Option<File>,
    writable: bool,
}

/// The archive file, opened lazily.
///
/// Reads open the file read-only. The first write reopens it read-write,
/// creating it if needed, unless the archive is read-only.
#[derive(Debug)]
pub(crate) struct ArchiveFile {
    path: PathBuf,
    read_only: bool,
    handle: Mutex<Handle>,
}

impl ArchiveFile {
    pub(crate) fn new(path: PathBuf, read_only: bool) -> Self {
        Self {
            path,
            read_only,
            handle: Mutex::new(Handle::default()),
        }
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    /// Runs `f` on the open file.
    pub(crate) fn with_file<T>(
        &self,
        write: bool,
        f: impl FnOnce(&mut File) -> Result<T>,
    ) -> Result<T> {
        if write && self.read_only {
            return Err(Error::ReadOnly {
                operation: "write to the archive file",
            });
        }
        let mut handle = lock(&self.handle);
        if handle.file.is_none() || (write && !handle.writable) {
            let file = if write {
                OpenOptions::new()
                    .read(true)
                    .write(true)
                    .create(true)
                    .truncate(false)
                    .open(&self.path)?
            } else {
                File::open(&self.path)?
            };
            handle.file = Some(file);
            handle.writable = write;
        }
        match handle.file.as_mut() {
            Some(file) => f(file),
            None => Err(Error::Closed {
                what: "archive file",
            }),
        }
    }

    pub(crate) fn len(&self) -> Result<u64> {
        self.with_file(false, |file| Ok(file.metadata()?.len()))
    }

    pub(crate) fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        self.with_file(false, |file| {
            file.seek(SeekFrom::Start(offset))?;
            file.read_exact(buf)?;
            Ok(())
        })
    }

    pub(crate) fn read_vec(&self, offset: u64, len: u64) -> Result<Vec<u8>> {
        let len = usize::try_from(len)
            .map_err(|_| Error::invalid_argument(format!("cannot buffer {len} bytes")))?;
        let mut buf = vec![0; len];
        self.read_at(offset, &mut buf)?;
        Ok(buf)
    }

    pub(crate) fn write_at(&self, offset: u64, bytes: &[u8]) -> Result<()> {
        self.with_file(true, |file| {
            file.seek(SeekFrom::Start(offset))?;
            file.write_all(bytes)?;
            Ok(())
        })
    }

    /// Copies `reader` to the file at `offset` and returns the byte count.
    pub(crate) fn copy_from(&self, offset: u64, reader: &mut dyn Read) -> Result<u64> {
        self.with_file(true, |file| {
            file.seek(SeekFrom::Start(offset))?;
            let mut buf = vec![0u8; READ_BUFFER_SIZE];
            let mut written = 0u64;
            loop {
                let n = reader.read(&mut buf)?;
                if n == 0 {
                    break;
                }
                file.write_all(&buf[..n])?;
                written += n as u64;
            }
            Ok(written)
        })
    }

    pub(crate) fn zero(&self, start: u64, end: u64) -> Result<()> {
        if start >= end {
            return Ok(());
        }
        self.with_file(true, |file| {
            file.seek(SeekFrom::Start(start))?;
            let zeros = vec![0u8; READ_BUFFER_SIZE];
            let mut remaining = end - start;
            while remaining > 0 {
                let n = remaining.min(zeros.len() as u64) as usize;
                file.write_all(&zeros[..n])?;
                remaining -= n as u64;
            }
            Ok(())
        })
    }

    pub(crate) fn set_len(&self, len: u64) -> Result<()> {
        self.with_file(true, |file| {
            file.set_len(len)?;
            Ok(())
        })
    }

    pub(crate) fn flush(&self) -> Result<()> {
        let mut guard = lock(&self.handle);
        let handle = &mut *guard;
        if let Some(file) = handle.file.as_mut() {
            if handle.writable {
                file.flush()?;
            }
        }
        Ok(())
    }

    /// Drops the handle. The next access reopens the file.
    pub(crate) fn release(&self) {
        lock(&self.handle).file = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_created_on_first_write() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("new.zip");
        let file = ArchiveFile::new(path.clone(), false);
        assert!(!path.exists());
        file.write_at(4, b"abc").unwrap();
        assert_eq!(file.len().unwrap(), 7);
        assert_eq!(file.read_vec(0, 7).unwrap(), vec![0, 0, 0, 0, b'a', b'b', b'c']);
    }

    #[test]
    fn test_zero_and_truncate() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f");
        std::fs::write(&path, vec![0xFFu8; 20_000]).unwrap();
        let file = ArchiveFile::new(path, false);
        file.zero(10, 19_000).unwrap();
        file.set_len(19_500).unwrap();
        let bytes = file.read_vec(0, 19_500).unwrap();
        assert!(bytes[..10].iter().all(|b| *b == 0xFF));
        assert!(bytes[10..19_000].iter().all(|b| *b == 0));
        assert!(bytes[19_000..].iter().all(|b| *b == 0xFF));
    }

    #[test]
    fn test_read_only_refuses_writes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f");
        std::fs::write(&path, b"data").unwrap();
        let file = ArchiveFile::new(path, true);
        assert!(matches!(file.write_at(0, b"x"), Err(Error::ReadOnly { .. })));
        assert_eq!(file.read_vec(0, 4).unwrap(), b"data");
    }
}
