//! In-place ZIP archive editing.
//!
//! [`ZipFile`] keeps an archive open as a mutable file. Entries are either
//! placed (their local header and data sit in the file) or staged (their
//! content waits in a [`ByteStorage`](crate::storage::ByteStorage) until the
//! next [`ZipFile::update`]). An update writes only what changed: placed
//! entries stay where they are, new entries fill free gaps when they fit,
//! and the central directory plus EOCD group are rewritten after the last
//! entry.
//!
//! # Example
//!
//! ```rust,no_run
//! use apkzip::{ZipFile, ZipOptions};
//!
//! let mut zip = ZipFile::open("app.apk", ZipOptions::default())?;
//! zip.add("assets/hello.txt", &mut &b"hello"[..], true)?;
//! zip.delete("assets/old.txt")?;
//! zip.update()?;
//! assert_eq!(zip.read("assets/hello.txt")?, b"hello");
//! zip.close()?;
//! # Ok::<(), apkzip::Error>(())
//! ```

mod alignment;
mod edit;
mod entry;
mod extension;
mod file;
mod options;
mod update;
mod verify;

use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;

use log::{debug, warn};

pub use alignment::{AlignmentRule, NO_ALIGNMENT};
pub use entry::{EntryType, StoredEntry};
pub use extension::ZipExtension;
pub use options::{APK_DEFAULT_ALIGNMENT, ZipOptions};
pub use verify::{VerifyLog, VerifyLogFactory};

use entry::EntrySource;
use file::ArchiveFile;

use crate::format::header::{LOCAL_HEADER_SIZE, version};
use crate::format::reader::u16_at;
use crate::format::{CentralDirectoryHeader, DataDescriptor, DataDescriptorType, EocdGroup, LocalHeader};
use crate::space::FileUseMap;
use crate::storage::ByteStorage;
use crate::{Error, Result};

/// What occupies a range of the archive file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Occupant {
    Entry(String),
    Directory,
    Eocd,
}

impl fmt::Display for Occupant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Occupant::Entry(name) => write!(f, "entry '{name}'"),
            Occupant::Directory => write!(f, "Central Directory"),
            Occupant::Eocd => write!(f, "EOCD"),
        }
    }
}

/// An open ZIP archive.
///
/// Dropping the archive closes it like [`close`](Self::close), logging
/// any error instead of returning it.
pub struct ZipFile {
    file: Arc<ArchiveFile>,
    read_only: bool,
    options: ZipOptions,
    storage: Arc<dyn ByteStorage>,
    entries: BTreeMap<String, StoredEntry>,
    /// Staged entries in placement order.
    pending: VecDeque<String>,
    map: FileUseMap<Occupant>,
    eocd: EocdGroup,
    directory: Vec<u8>,
    extra_directory_offset: u64,
    dirty: bool,
    verify_log: VerifyLog,
    extensions: Vec<Box<dyn ZipExtension>>,
    closed: bool,
}

impl fmt::Debug for ZipFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ZipFile")
            .field("path", &self.file.path())
            .field("read_only", &self.read_only)
            .field("entries", &self.entries.len())
            .field("pending", &self.pending.len())
            .field("dirty", &self.dirty)
            .field("extensions", &self.extensions.len())
            .finish()
    }
}

impl ZipFile {
    /// Opens `path` for reading and writing.
    ///
    /// A missing file starts out as an empty archive and is created by
    /// the first update.
    ///
    /// # Errors
    ///
    /// Fails with a corruption error (see [`Error::is_corruption`]) if the
    /// file exists but is empty or is not a valid archive.
    pub fn open(path: impl AsRef<Path>, options: ZipOptions) -> Result<Self> {
        Self::open_with_mode(path.as_ref(), options, false)
    }

    /// Opens an existing archive for reading only.
    ///
    /// Every mutating operation on the result fails with
    /// [`Error::ReadOnly`].
    pub fn open_read_only(path: impl AsRef<Path>, options: ZipOptions) -> Result<Self> {
        Self::open_with_mode(path.as_ref(), options, true)
    }

    fn open_with_mode(path: &Path, options: ZipOptions, read_only: bool) -> Result<Self> {
        let exists = match std::fs::metadata(path) {
            Ok(meta) if meta.len() == 0 => {
                return Err(Error::InvalidFormat(format!(
                    "'{}' is empty",
                    path.display()
                )));
            }
            Ok(_) => true,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound && !read_only => false,
            Err(e) => return Err(e.into()),
        };

        let storage = options.storage.create()?;
        let verify_log = options.verify_log_factory.create();
        let mut zip = Self {
            file: Arc::new(ArchiveFile::new(path.to_path_buf(), read_only)),
            read_only,
            options,
            storage,
            entries: BTreeMap::new(),
            pending: VecDeque::new(),
            map: FileUseMap::new(0),
            eocd: EocdGroup::new(),
            directory: Vec::new(),
            extra_directory_offset: 0,
            dirty: !exists,
            verify_log,
            extensions: Vec::new(),
            closed: false,
        };
        if exists {
            zip.read_archive()?;
        }
        debug!(
            "Opened {} ({} entries{})",
            path.display(),
            zip.entries.len(),
            if read_only { ", read-only" } else { "" }
        );
        Ok(zip)
    }

    fn read_archive(&mut self) -> Result<()> {
        let file_size = self.file.len()?;
        let eocd = self
            .file
            .with_file(false, |file| EocdGroup::read(file, file_size))?;

        let mut map = FileUseMap::new(file_size);
        let eocd_start = eocd.record_start();
        map.add(eocd_start, eocd_start + eocd.record_size(), Occupant::Eocd)?;

        let cd_offset = eocd.directory_offset();
        let cd_size = eocd.directory_size();
        let cd_end = cd_offset
            .checked_add(cd_size)
            .filter(|end| *end <= file_size)
            .ok_or_else(|| {
                Error::InvalidFormat(format!(
                    "Central directory at {cd_offset:#x} with {cd_size} bytes extends past the \
                     end of the file ({file_size} bytes)"
                ))
            })?;
        map.add(cd_offset, cd_end, Occupant::Directory)?;

        let directory = self.file.read_vec(cd_offset, cd_size)?;
        let mut entries = BTreeMap::new();
        let mut pos = 0usize;
        for _ in 0..eocd.total_records() {
            let rest = directory.get(pos..).unwrap_or(&[]);
            let (cdh, used) = CentralDirectoryHeader::parse(rest, cd_offset + pos as u64)?;
            pos += used;

            let name = cdh.name();
            let entry = self.read_entry(cdh, file_size)?;
            map.add(entry.cdh.offset, entry.end(), Occupant::Entry(name.clone()))?;
            if entries.insert(name.clone(), entry).is_some() {
                return Err(Error::InvalidFormat(format!(
                    "Entry '{name}' appears twice in the central directory"
                )));
            }
        }

        self.extra_directory_offset = match entries.values().map(StoredEntry::end).max() {
            Some(end) => cd_offset.saturating_sub(end),
            None => cd_offset,
        };
        self.entries = entries;
        self.map = map;
        self.eocd = eocd;
        self.directory = directory;
        Ok(())
    }

    fn read_entry(&self, cdh: CentralDirectoryHeader, file_size: u64) -> Result<StoredEntry> {
        let name = cdh.name();
        let beyond = |end: u64| Error::EntryBeyondEof {
            name: name.clone(),
            end,
            file_size,
        };

        let offset = cdh.offset;
        let fixed_end = offset.saturating_add(LOCAL_HEADER_SIZE as u64);
        if fixed_end > file_size {
            return Err(beyond(fixed_end));
        }
        let fixed = self.file.read_vec(offset, LOCAL_HEADER_SIZE as u64)?;
        let name_len = u16_at(&fixed, 26).unwrap_or(0) as u64;
        let extra_len = u16_at(&fixed, 28).unwrap_or(0) as u64;
        let header_end = fixed_end + name_len + extra_len;
        if header_end > file_size {
            return Err(beyond(header_end));
        }
        let local = LocalHeader::parse(&self.file.read_vec(offset, header_end - offset)?, offset)?;

        let data_end = header_end.saturating_add(cdh.compressed_size);
        if data_end > file_size {
            return Err(beyond(data_end));
        }
        let descriptor = if cdh.has_data_descriptor() {
            let available = (file_size - data_end).min(16);
            let tail = self.file.read_vec(data_end, available)?;
            match DataDescriptor::parse(&tail) {
                Some(descriptor) => Some(descriptor),
                None => return Err(beyond(data_end + DataDescriptorType::WithoutSignature.size())),
            }
        } else {
            None
        };

        let entry = StoredEntry {
            local_extra: local.extra.clone(),
            data_descriptor: descriptor.map_or(DataDescriptorType::None, |d| d.kind),
            source: EntrySource::InFile,
            file: Arc::clone(&self.file),
            verify_log: self.options.verify_log_factory.create(),
            deleted: false,
            cdh,
        };
        if !self.options.skip_validation {
            self.verify_entry(&entry, &local, descriptor);
        }
        Ok(entry)
    }

    fn verify_entry(&self, entry: &StoredEntry, local: &LocalHeader, descriptor: Option<DataDescriptor>) {
        let name = entry.name();
        let cdh = &entry.cdh;
        let log = &entry.verify_log;

        if local.extra.comparable() != cdh.extra.comparable() {
            let message = format!(
                "Central directory and local header extra fields for file '{name}' do not match"
            );
            log.log(message.clone());
            self.verify_log.log(message);
        }

        if cdh.version_needed > version::MAX_KNOWN {
            self.verify_log.log(format!(
                "Version needed to extract {} of file '{name}' in the central directory is \
                 above the highest known version {}",
                cdh.version_needed,
                version::MAX_KNOWN
            ));
        }
        if local.version_needed != cdh.version_needed {
            log.log(format!(
                "Version needed to extract of file '{name}' is {} in the local header but {} in \
                 the central directory",
                local.version_needed, cdh.version_needed
            ));
        }

        let (source, crc, compressed, uncompressed) = match descriptor {
            Some(d) => ("data descriptor", d.crc32, d.compressed_size, d.uncompressed_size),
            None => (
                "local header",
                local.crc32,
                local.compressed_size,
                local.uncompressed_size,
            ),
        };
        if crc != cdh.crc32 {
            log.log(format!(
                "CRC32 in the {source} of file '{name}' is {crc:#010x} but the central \
                 directory has {:#010x}",
                cdh.crc32
            ));
        }
        if compressed != u32::MAX && compressed as u64 != cdh.compressed_size {
            log.log(format!(
                "Compressed size in the {source} of file '{name}' is {compressed} but the \
                 central directory has {}",
                cdh.compressed_size
            ));
        }
        if uncompressed != u32::MAX && uncompressed as u64 != cdh.uncompressed_size {
            log.log(format!(
                "Uncompressed size in the {source} of file '{name}' is {uncompressed} but the \
                 central directory has {}",
                cdh.uncompressed_size
            ));
        }
    }

    pub(crate) fn check_writable(&self, operation: &'static str) -> Result<()> {
        if self.read_only {
            return Err(Error::ReadOnly { operation });
        }
        Ok(())
    }

    /// Runs `hook` on every extension.
    ///
    /// Extensions registered by a hook are kept but not notified this round.
    pub(crate) fn notify(
        &mut self,
        mut hook: impl FnMut(&mut dyn ZipExtension, &mut ZipFile) -> Result<()>,
    ) -> Result<()> {
        if self.extensions.is_empty() {
            return Ok(());
        }
        let mut extensions = std::mem::take(&mut self.extensions);
        let mut result = Ok(());
        for extension in extensions.iter_mut() {
            result = hook(extension.as_mut(), self);
            if result.is_err() {
                break;
            }
        }
        extensions.append(&mut self.extensions);
        self.extensions = extensions;
        result
    }

    /// Path of the archive file.
    pub fn file_path(&self) -> &Path {
        self.file.path()
    }

    /// Returns `true` if the archive was opened read-only.
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// The options the archive was opened with.
    pub fn options(&self) -> &ZipOptions {
        &self.options
    }

    /// The staging storage.
    pub fn storage(&self) -> &Arc<dyn ByteStorage> {
        &self.storage
    }

    /// Global integrity messages.
    pub fn verify_log(&self) -> &VerifyLog {
        &self.verify_log
    }

    /// All entries, ordered by name.
    pub fn entries(&self) -> impl Iterator<Item = &StoredEntry> + '_ {
        self.entries.values()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if the archive has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Looks up an entry.
    pub fn get(&self, name: &str) -> Option<&StoredEntry> {
        self.entries.get(name)
    }

    fn entry(&self, name: &str) -> Result<&StoredEntry> {
        self.entries.get(name).ok_or_else(|| Error::EntryNotFound {
            name: name.to_string(),
        })
    }

    /// Reads an entry's uncompressed content.
    pub fn read(&self, name: &str) -> Result<Vec<u8>> {
        self.entry(name)?.read()
    }

    /// Opens a stream over an entry's uncompressed content.
    pub fn open_entry(&self, name: &str) -> Result<Box<dyn Read + Send>> {
        self.entry(name)?.open()
    }

    /// Reads an entry's stored bytes, compressed if it is compressed.
    pub fn raw_bytes(&self, name: &str) -> Result<Vec<u8>> {
        self.entry(name)?.raw_bytes()
    }

    /// Offset of the central directory as last read or written.
    pub fn central_directory_offset(&self) -> u64 {
        self.eocd.directory_offset()
    }

    /// Size of the central directory as last read or written.
    pub fn central_directory_size(&self) -> u64 {
        self.eocd.directory_size()
    }

    /// The central directory bytes as last read or computed.
    pub fn central_directory_bytes(&self) -> &[u8] {
        &self.directory
    }

    /// Offset of the EOCD group.
    pub fn eocd_offset(&self) -> u64 {
        self.eocd.record_start()
    }

    /// Size of the EOCD group, Zip64 records included.
    pub fn eocd_size(&self) -> u64 {
        self.eocd.record_size()
    }

    /// The EOCD group bytes.
    pub fn eocd_bytes(&self) -> Vec<u8> {
        self.eocd.to_bytes()
    }

    /// The EOCD comment.
    pub fn eocd_comment(&self) -> &[u8] {
        self.eocd.comment()
    }

    /// Zero bytes kept between the last entry and the central directory.
    pub fn extra_directory_offset(&self) -> u64 {
        self.extra_directory_offset
    }

    /// Returns `true` if the next update has something to write.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }
}

impl Drop for ZipFile {
    fn drop(&mut self) {
        if let Err(e) = self.close_inner() {
            warn!("Failed to close {}: {e}", self.file.path().display());
        }
    }
}
