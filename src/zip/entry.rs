//! Entries of an open archive.

use std::io::{Cursor, Read};
use std::sync::Arc;

use flate2::read::DeflateDecoder;

use super::file::ArchiveFile;
use super::verify::VerifyLog;
use crate::compress::{CompressionResult, CompressionTask};
use crate::format::header::{LOCAL_HEADER_SIZE, flags};
use crate::format::{CentralDirectoryHeader, CompressionMethod, DataDescriptorType, ExtraField, LocalHeader};
use crate::storage::Blob;
use crate::{Error, Result};

/// Whether an entry is a file or a directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryType {
    /// Regular content.
    File,
    /// A name ending in `/` with no content.
    Directory,
}

/// Content not yet written to the archive.
#[derive(Debug, Clone)]
pub(crate) struct Staged {
    /// Uncompressed content, absent for content copied raw.
    pub(crate) source: Option<Blob>,
    /// The stored representation.
    pub(crate) task: Arc<CompressionTask>,
    /// Whether the header already reflects the compression result.
    pub(crate) resolved: bool,
}

#[derive(Debug, Clone)]
pub(crate) enum EntrySource {
    /// Data lives in the archive at the header's offset.
    InFile,
    Staged(Staged),
}

/// An entry of a [`ZipFile`](super::ZipFile).
///
/// An entry is either placed, with its local header and data in the file,
/// or staged, with its content in storage until the next update.
#[derive(Debug, Clone)]
pub struct StoredEntry {
    pub(crate) cdh: CentralDirectoryHeader,
    pub(crate) local_extra: ExtraField,
    pub(crate) data_descriptor: DataDescriptorType,
    pub(crate) source: EntrySource,
    pub(crate) file: Arc<ArchiveFile>,
    pub(crate) verify_log: VerifyLog,
    pub(crate) deleted: bool,
}

impl StoredEntry {
    pub(crate) fn staged(
        cdh: CentralDirectoryHeader,
        local_extra: ExtraField,
        staged: Staged,
        file: Arc<ArchiveFile>,
        verify_log: VerifyLog,
    ) -> Self {
        Self {
            cdh,
            local_extra,
            data_descriptor: DataDescriptorType::None,
            source: EntrySource::Staged(staged),
            file,
            verify_log,
            deleted: false,
        }
    }

    /// The entry name.
    pub fn name(&self) -> String {
        self.cdh.name()
    }

    /// File or directory.
    pub fn entry_type(&self) -> EntryType {
        if self.cdh.raw_name.ends_with(b"/") {
            EntryType::Directory
        } else {
            EntryType::File
        }
    }

    /// The central directory record.
    ///
    /// For a staged entry whose compression is still running, the method
    /// and compressed size are only known after
    /// [`ZipFile::finish_all_background_tasks`](super::ZipFile::finish_all_background_tasks).
    pub fn central_directory_header(&self) -> &CentralDirectoryHeader {
        &self.cdh
    }

    /// The local header's extra field.
    pub fn local_extra(&self) -> &ExtraField {
        &self.local_extra
    }

    /// The data descriptor following the data, as read from the file.
    pub fn data_descriptor_type(&self) -> DataDescriptorType {
        self.data_descriptor
    }

    /// Integrity messages about this entry.
    pub fn verify_log(&self) -> &VerifyLog {
        &self.verify_log
    }

    /// Offset of the local header, or -1 while the entry is staged.
    pub fn offset(&self) -> i64 {
        match self.source {
            EntrySource::InFile => self.cdh.offset as i64,
            EntrySource::Staged(_) => -1,
        }
    }

    /// Returns `true` if the entry's bytes are in the archive file.
    pub fn is_placed(&self) -> bool {
        matches!(self.source, EntrySource::InFile)
    }

    /// Size of the local header.
    pub fn local_header_size(&self) -> u64 {
        (LOCAL_HEADER_SIZE + self.cdh.raw_name.len() + self.local_extra.len()) as u64
    }

    /// Bytes the entry occupies in the file: local header, data and data
    /// descriptor.
    pub fn in_file_size(&self) -> u64 {
        self.local_header_size() + self.cdh.compressed_size + self.data_descriptor.size()
    }

    /// Returns `true` once the entry was removed from its archive.
    pub fn is_deleted(&self) -> bool {
        self.deleted
    }

    pub(crate) fn is_stored(&self) -> bool {
        self.cdh.method == CompressionMethod::Stored
    }

    pub(crate) fn data_start(&self) -> u64 {
        self.cdh.offset + self.local_header_size()
    }

    pub(crate) fn end(&self) -> u64 {
        self.cdh.offset + self.in_file_size()
    }

    /// Copies the compression result into the header once it is known.
    pub(crate) fn resolve(&mut self) -> Result<()> {
        let EntrySource::Staged(staged) = &mut self.source else {
            return Ok(());
        };
        if staged.resolved {
            return Ok(());
        }
        let result = staged.task.wait()?;
        self.cdh.method = result.method;
        self.cdh.compressed_size = result.size();
        self.cdh.version_needed = result.method.version_needed();
        staged.resolved = true;
        Ok(())
    }

    /// The local header this entry is written with.
    pub(crate) fn local_header(&self) -> LocalHeader {
        LocalHeader::mirror(&self.cdh, self.local_extra.clone())
    }

    /// Marks the entry as written at `offset` and releases its staged blobs.
    pub(crate) fn mark_placed(&mut self, offset: u64) {
        self.cdh.offset = offset;
        self.cdh.flags &= !flags::DATA_DESCRIPTOR;
        self.data_descriptor = DataDescriptorType::None;
        let previous = std::mem::replace(&mut self.source, EntrySource::InFile);
        if let EntrySource::Staged(staged) = previous {
            close_staged(&staged);
        }
    }

    /// Turns a placed entry back into a staged one holding its raw bytes.
    pub(crate) fn unplace(&mut self, raw: Blob) {
        self.cdh.flags &= !flags::DATA_DESCRIPTOR;
        self.data_descriptor = DataDescriptorType::None;
        self.local_extra = self.local_extra.without_alignment();
        self.source = EntrySource::Staged(Staged {
            source: None,
            task: Arc::new(CompressionTask::finished(Ok(CompressionResult {
                method: self.cdh.method,
                raw,
            }))),
            resolved: true,
        });
    }

    /// Releases staged blobs, if any.
    pub(crate) fn close_blobs(&self) {
        if let EntrySource::Staged(staged) = &self.source {
            close_staged(staged);
        }
    }

    fn check_alive(&self) -> Result<()> {
        if self.deleted {
            return Err(Error::EntryDeleted { name: self.name() });
        }
        Ok(())
    }

    /// The stored bytes, compressed if the entry is compressed.
    pub fn raw_bytes(&self) -> Result<Vec<u8>> {
        self.check_alive()?;
        match &self.source {
            EntrySource::InFile => self.file.read_vec(self.data_start(), self.cdh.compressed_size),
            EntrySource::Staged(staged) => staged.task.wait()?.raw.read_all(),
        }
    }

    /// Opens a stream over the uncompressed content.
    ///
    /// # Errors
    ///
    /// Returns [`Error::EntryDeleted`] for a deleted entry and
    /// [`Error::UnsupportedMethod`] for methods other than store and deflate.
    pub fn open(&self) -> Result<Box<dyn Read + Send>> {
        self.check_alive()?;
        if let EntrySource::Staged(Staged {
            source: Some(source),
            ..
        }) = &self.source
        {
            return source.open();
        }
        let method = match &self.source {
            EntrySource::Staged(staged) => staged.task.wait()?.method,
            EntrySource::InFile => self.cdh.method,
        };
        let raw = self.raw_bytes()?;
        match method {
            CompressionMethod::Stored => Ok(Box::new(Cursor::new(raw))),
            CompressionMethod::Deflated => Ok(Box::new(DeflateDecoder::new(Cursor::new(raw)))),
            CompressionMethod::Other(method) => Err(Error::UnsupportedMethod {
                name: self.name(),
                method,
            }),
        }
    }

    /// Reads the uncompressed content.
    pub fn read(&self) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(self.cdh.uncompressed_size as usize);
        self.open()?.read_to_end(&mut out)?;
        Ok(out)
    }
}

fn close_staged(staged: &Staged) {
    if let Some(source) = &staged.source {
        if let Err(e) = source.close() {
            log::warn!("Failed to release staged content: {e}");
        }
    }
    if staged.task.is_finished() {
        if let Ok(result) = staged.task.wait() {
            if let Err(e) = result.raw.close() {
                log::warn!("Failed to release compressed content: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compress::{Compressor, DeflateCompressor};
    use crate::format::DosTime;
    use crate::storage::{ByteStorage, InMemoryStorage, blob_from_bytes};

    fn staged_entry(name: &str, data: &[u8], storage: &Arc<dyn ByteStorage>) -> StoredEntry {
        let source = blob_from_bytes(storage.as_ref(), data).unwrap();
        let task = DeflateCompressor::default().compress_deferred(Arc::clone(&source), storage);
        let mut cdh = CentralDirectoryHeader::new(name, DosTime::EPOCH);
        cdh.uncompressed_size = data.len() as u64;
        let file = Arc::new(ArchiveFile::new("unused.zip".into(), true));
        StoredEntry::staged(
            cdh,
            ExtraField::default(),
            Staged {
                source: Some(source),
                task: Arc::new(task),
                resolved: false,
            },
            file,
            VerifyLog::discarding(),
        )
    }

    #[test]
    fn test_staged_entry_reads_and_resolves() {
        let storage: Arc<dyn ByteStorage> = Arc::new(InMemoryStorage::new());
        let data = vec![7u8; 5000];
        let mut entry = staged_entry("a/b.bin", &data, &storage);
        assert_eq!(entry.offset(), -1);
        assert_eq!(entry.entry_type(), EntryType::File);
        assert_eq!(entry.read().unwrap(), data);

        entry.resolve().unwrap();
        assert_eq!(entry.cdh.method, CompressionMethod::Deflated);
        assert!(entry.cdh.compressed_size < 5000);
        assert_eq!(entry.raw_bytes().unwrap().len() as u64, entry.cdh.compressed_size);
    }

    #[test]
    fn test_deleted_entry_cannot_be_read() {
        let storage: Arc<dyn ByteStorage> = Arc::new(InMemoryStorage::new());
        let mut entry = staged_entry("dir/", &[], &storage);
        assert_eq!(entry.entry_type(), EntryType::Directory);
        entry.deleted = true;
        assert!(matches!(entry.read(), Err(Error::EntryDeleted { .. })));
    }

    #[test]
    fn test_close_blobs_releases_storage() {
        let storage: Arc<dyn ByteStorage> = Arc::new(InMemoryStorage::new());
        let mut entry = staged_entry("x", &[1u8; 300], &storage);
        entry.resolve().unwrap();
        assert!(storage.bytes_used() >= 300);
        entry.close_blobs();
        assert_eq!(storage.bytes_used(), 0);
    }
}
