//! Mutating operations on an open archive.

use std::fs::{self, File};
use std::io::{self, Read};
use std::path::Path;
use std::sync::Arc;

use filetime::FileTime;
use log::{debug, trace};
use walkdir::WalkDir;

use super::entry::{EntrySource, Staged};
use super::{Occupant, StoredEntry, ZipExtension, ZipFile};
use crate::checksum::Crc32Reader;
use crate::compress::{CompressionResult, CompressionTask};
use crate::format::extra::MAX_EXTRA_LEN;
use crate::format::header::flags;
use crate::format::{CentralDirectoryHeader, DosTime, ExtraField};
use crate::{Error, Result};

/// MS-DOS directory attribute.
const DIRECTORY_ATTRIBUTE: u32 = 0x10;

impl ZipFile {
    /// Adds or replaces `name` with everything `reader` yields.
    ///
    /// With `may_compress` the content is deflated when that makes it
    /// strictly smaller. The entry is written on the next
    /// [`update`](Self::update). A name ending in `/` adds a directory and
    /// the reader must then be empty.
    pub fn add(&mut self, name: &str, reader: &mut dyn Read, may_compress: bool) -> Result<()> {
        self.check_writable("add an entry")?;
        let time = if self.options.no_timestamps {
            DosTime::EPOCH
        } else {
            DosTime::now()
        };
        self.add_with_time(name, reader, may_compress, time)
    }

    fn add_with_time(
        &mut self,
        name: &str,
        reader: &mut dyn Read,
        may_compress: bool,
        time: DosTime,
    ) -> Result<()> {
        if name.is_empty() {
            return Err(Error::invalid_argument("entry name is empty"));
        }
        let is_directory = name.ends_with('/');

        let mut counted = Crc32Reader::new(reader);
        let source = self.storage.from_reader(&mut counted)?;
        if is_directory && source.size() > 0 {
            source.close()?;
            return Err(Error::invalid_argument(format!(
                "directory entry '{name}' cannot have content"
            )));
        }

        let task = if may_compress && !is_directory {
            self.options
                .compressor
                .compress_deferred(Arc::clone(&source), &self.storage)
        } else {
            CompressionTask::finished(Ok(CompressionResult::stored(Arc::clone(&source))))
        };

        let mut cdh = CentralDirectoryHeader::new(name, time);
        cdh.crc32 = counted.crc();
        cdh.uncompressed_size = counted.bytes_read();
        if is_directory {
            cdh.external_attributes = DIRECTORY_ATTRIBUTE;
        }

        let task = Arc::new(task);
        let finished = task.is_finished();
        let mut entry = StoredEntry::staged(
            cdh,
            ExtraField::default(),
            Staged {
                source: Some(source),
                task,
                resolved: false,
            },
            Arc::clone(&self.file),
            self.options.verify_log_factory.create(),
        );
        if finished {
            entry.resolve()?;
        }
        self.insert_staged(entry)
    }

    /// Adds a staged entry, replacing any entry with the same name.
    fn insert_staged(&mut self, entry: StoredEntry) -> Result<()> {
        let name = entry.name();
        let already_pending = match self.entries.insert(name.clone(), entry) {
            Some(mut old) => {
                let was_staged = !old.is_placed();
                self.discard(&mut old);
                was_staged
            }
            None => false,
        };
        if !already_pending {
            self.pending.push_back(name.clone());
        }
        self.dirty = true;
        trace!("Staged '{name}'");
        self.notify(|ext, zip| ext.added(zip, &name))
    }

    /// Frees whatever a removed entry held.
    fn discard(&mut self, entry: &mut StoredEntry) {
        if entry.is_placed() {
            let offset = entry.cdh.offset;
            let owns_range = matches!(
                self.map.payload_at(offset),
                Some(Occupant::Entry(name)) if *name == entry.name()
            );
            if owns_range {
                self.map.free(offset);
            }
        } else if let Err(e) = entry.resolve() {
            debug!("Discarding '{}' with failed compression: {e}", entry.name());
        }
        entry.close_blobs();
        entry.deleted = true;
    }

    /// Removes `name` and returns it, marked deleted.
    pub fn delete(&mut self, name: &str) -> Result<StoredEntry> {
        self.check_writable("delete an entry")?;
        let mut entry = self.entries.remove(name).ok_or_else(|| Error::EntryNotFound {
            name: name.to_string(),
        })?;
        self.pending.retain(|pending| pending != name);
        self.discard(&mut entry);
        self.dirty = true;
        debug!("Deleted '{name}'");
        self.notify(|ext, zip| ext.removed(zip, name))?;
        Ok(entry)
    }

    /// Sets the extra field of both the local header and the central
    /// directory record of `name`. The entry is rewritten on the next
    /// update.
    pub fn set_local_extra(&mut self, name: &str, extra: ExtraField) -> Result<()> {
        self.check_writable("set an extra field")?;
        if extra.len() > MAX_EXTRA_LEN {
            return Err(Error::invalid_argument(format!(
                "extra field of {} bytes exceeds {MAX_EXTRA_LEN}",
                extra.len()
            )));
        }
        let placed = match self.entries.get(name) {
            Some(entry) => entry.is_placed(),
            None => {
                return Err(Error::EntryNotFound {
                    name: name.to_string(),
                });
            }
        };
        if placed {
            self.unplace(name)?;
            self.pending.push_back(name.to_string());
        }
        if let Some(entry) = self.entries.get_mut(name) {
            entry.local_extra = extra.clone();
            entry.cdh.extra = extra;
        }
        self.dirty = true;
        Ok(())
    }

    /// Copies the entries of `other` whose name `ignore` rejects.
    ///
    /// Stored bytes are copied without recompressing. Entries of this
    /// archive with the same names are replaced.
    pub fn merge_from(&mut self, other: &ZipFile, ignore: impl Fn(&str) -> bool) -> Result<()> {
        self.check_writable("merge entries")?;
        let mut merged = 0usize;
        for entry in other.entries.values() {
            let name = entry.name();
            if ignore(&name) {
                continue;
            }
            let (method, raw) = match &entry.source {
                EntrySource::InFile => (
                    entry.cdh.method,
                    self.stage_range(&other.file, entry.data_start(), entry.cdh.compressed_size)?,
                ),
                EntrySource::Staged(staged) => {
                    let result = staged.task.wait()?;
                    (result.method, self.storage.from_source(result.raw.as_ref())?)
                }
            };

            let mut cdh = entry.cdh.clone();
            if !entry.is_placed() {
                cdh.version_needed = method.version_needed();
            }
            cdh.method = method;
            cdh.compressed_size = raw.size();
            cdh.flags &= !flags::DATA_DESCRIPTOR;
            cdh.offset = 0;

            let copy = StoredEntry::staged(
                cdh,
                entry.local_extra.without_alignment(),
                Staged {
                    source: None,
                    task: Arc::new(CompressionTask::finished(Ok(CompressionResult { method, raw }))),
                    resolved: true,
                },
                Arc::clone(&self.file),
                self.options.verify_log_factory.create(),
            );
            self.insert_staged(copy)?;
            merged += 1;
        }
        debug!(
            "Merged {merged} entries from {}",
            other.file_path().display()
        );
        Ok(())
    }

    /// Adds a file, or every file and directory below a directory.
    ///
    /// A file becomes one entry named after it. Entries below a directory
    /// are named relative to it, with `/` separators and a `name/` entry
    /// for each subdirectory. `may_compress` decides per file.
    pub fn add_all_recursively(
        &mut self,
        path: impl AsRef<Path>,
        may_compress: impl Fn(&Path) -> bool,
    ) -> Result<()> {
        self.check_writable("add files")?;
        let root = path.as_ref();
        if fs::metadata(root)?.is_file() {
            let name = root
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .ok_or_else(|| {
                    Error::invalid_argument(format!("'{}' has no file name", root.display()))
                })?;
            return self.add_file(&name, root, may_compress(root));
        }

        for item in WalkDir::new(root).min_depth(1).sort_by_file_name() {
            let item = item.map_err(io::Error::from)?;
            let relative = item.path().strip_prefix(root).map_err(|_| {
                Error::invalid_argument(format!("'{}' escapes the walked directory", item.path().display()))
            })?;
            let mut name = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect::<Vec<_>>()
                .join("/");

            if item.file_type().is_dir() {
                name.push('/');
                let time = self.file_time(item.path())?;
                self.add_with_time(&name, &mut io::empty(), false, time)?;
            } else if item.file_type().is_file() {
                self.add_file(&name, item.path(), may_compress(item.path()))?;
            }
        }
        Ok(())
    }

    fn add_file(&mut self, name: &str, path: &Path, may_compress: bool) -> Result<()> {
        let time = self.file_time(path)?;
        let mut file = File::open(path)?;
        self.add_with_time(name, &mut file, may_compress, time)
    }

    fn file_time(&self, path: &Path) -> Result<DosTime> {
        if self.options.no_timestamps {
            return Ok(DosTime::EPOCH);
        }
        let meta = fs::metadata(path)?;
        Ok(DosTime::from_unix_secs(
            FileTime::from_last_modification_time(&meta).unix_seconds(),
        ))
    }

    /// Lays out every entry again in name order on the next update.
    ///
    /// All entries become staged, so their offsets read -1 until then.
    pub fn sort_zip_contents(&mut self) -> Result<()> {
        self.check_writable("sort entries")?;
        self.sort_entries()
    }

    /// Marks the archive changed so the next update rewrites it.
    pub fn touch(&mut self) -> Result<()> {
        self.check_writable("touch")?;
        self.dirty = true;
        Ok(())
    }

    /// Keeps `offset` zero bytes between the last entry and the central
    /// directory.
    pub fn set_extra_directory_offset(&mut self, offset: u64) -> Result<()> {
        self.check_writable("move the central directory")?;
        if offset != self.extra_directory_offset {
            self.extra_directory_offset = offset;
            self.dirty = true;
        }
        Ok(())
    }

    /// Replaces the EOCD comment.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] for comments over 65535 bytes or
    /// containing bytes that read as an EOCD record.
    pub fn set_eocd_comment(&mut self, comment: &[u8]) -> Result<()> {
        self.check_writable("set the EOCD comment")?;
        self.eocd.set_comment(comment.to_vec())?;
        self.dirty = true;
        Ok(())
    }

    /// Writes `bytes` at `offset`, bypassing the archive structure.
    pub fn direct_write(&mut self, offset: u64, bytes: &[u8]) -> Result<()> {
        self.check_writable("write directly")?;
        self.file.write_at(offset, bytes)
    }

    /// Fills `buf` from `offset`, bypassing the archive structure.
    pub fn direct_read(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        self.file.read_at(offset, buf)
    }

    /// Registers an extension. It sees every later event.
    pub fn add_extension(&mut self, extension: Box<dyn ZipExtension>) -> Result<()> {
        self.check_writable("register an extension")?;
        self.extensions.push(extension);
        Ok(())
    }
}
