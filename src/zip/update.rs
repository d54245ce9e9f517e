//! Layout and writing of pending changes.

use std::io::{Seek, SeekFrom};
use std::sync::Arc;

use filetime::FileTime;
use log::{debug, trace};

use super::entry::EntrySource;
use super::file::ArchiveFile;
use super::{EntryType, NO_ALIGNMENT, Occupant, StoredEntry, ZipFile};
use crate::format::extra::{ALIGNMENT_MIN_SIZE, MAX_COVER_EXTRA_LEN};
use crate::format::{DataDescriptorType, DirectorySummary};
use crate::space::PositionAlgorithm;
use crate::storage::{Blob, LimitedReader};
use crate::{Error, Result};

impl ZipFile {
    /// Writes every pending change to the file.
    ///
    /// New and relocated entries are placed first, then the central
    /// directory and EOCD group are written after the last entry. Nothing
    /// is written, and the modification time is left alone, if nothing
    /// changed since the last update.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::ReadOnly`] on a read-only archive, and with the
    /// first error returned by an extension hook.
    pub fn update(&mut self) -> Result<()> {
        self.check_writable("update")?;
        self.finish_all_background_tasks()?;
        self.notify(|ext, zip| ext.before_update(zip))?;
        if !self.dirty {
            return Ok(());
        }

        if self.options.auto_sort {
            self.sort_entries()?;
        }
        self.release_directory();

        loop {
            self.place_pending()?;
            if self.options.cover_empty_space_using_extra_field {
                self.cover_empty_space()?;
            }
            self.map.truncate();
            self.zero_gaps()?;
            self.compute_directory();

            self.dirty = false;
            self.notify(|ext, zip| ext.entries_written(zip))?;
            if !self.dirty {
                break;
            }
            // An extension changed the archive: lay it out again.
            self.finish_all_background_tasks()?;
        }

        self.write_directory()?;
        filetime::set_file_mtime(self.file.path(), FileTime::now())?;
        debug!(
            "Updated {}: {} entries, directory at {:#x}",
            self.file.path().display(),
            self.entries.len(),
            self.eocd.directory_offset()
        );
        self.notify(|ext, zip| ext.updated(zip))
    }

    /// Closes the archive, writing pending changes first.
    ///
    /// A read-only archive closes without writing.
    pub fn close(mut self) -> Result<()> {
        self.close_inner()
    }

    pub(crate) fn close_inner(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        let mut result = if self.read_only {
            Ok(())
        } else {
            self.update()
        };
        if result.is_ok() {
            result = self.notify(|ext, zip| ext.closed(zip));
        }
        self.closed = true;

        for entry in self.entries.values() {
            entry.close_blobs();
        }
        let storage = self.storage.close();
        self.file.release();
        result.and(storage)
    }

    /// Waits for every deferred compression and records its result.
    pub fn finish_all_background_tasks(&mut self) -> Result<()> {
        for entry in self.entries.values_mut() {
            entry.resolve()?;
        }
        Ok(())
    }

    /// Relocates placed uncompressed entries that violate the alignment
    /// rule. Returns `true` if any entry will move on the next update.
    pub fn realign(&mut self) -> Result<bool> {
        self.check_writable("realign")?;
        let rule = &self.options.alignment_rule;
        let misaligned: Vec<String> = self
            .entries
            .values()
            .filter(|e| e.is_placed() && e.is_stored() && e.entry_type() == EntryType::File)
            .filter(|e| {
                let alignment = rule.alignment(&e.name());
                alignment > NO_ALIGNMENT && e.data_start() % alignment != 0
            })
            .map(StoredEntry::name)
            .collect();

        for name in &misaligned {
            self.unplace(name)?;
            self.pending.push_back(name.clone());
        }
        if !misaligned.is_empty() {
            debug!("Realigning {} entries", misaligned.len());
            self.dirty = true;
        }
        Ok(!misaligned.is_empty())
    }

    /// Stages every entry again so that the next placement follows name
    /// order.
    pub(crate) fn sort_entries(&mut self) -> Result<()> {
        self.finish_all_background_tasks()?;
        let names: Vec<String> = self.entries.keys().cloned().collect();
        for name in &names {
            self.unplace(name)?;
        }
        self.pending = names.into();
        self.dirty = true;
        Ok(())
    }

    /// Copies a placed entry's stored bytes into storage and frees its
    /// range.
    pub(crate) fn unplace(&mut self, name: &str) -> Result<()> {
        let (offset, data_start, size) = match self.entries.get(name) {
            Some(entry) if entry.is_placed() => {
                (entry.cdh.offset, entry.data_start(), entry.cdh.compressed_size)
            }
            _ => return Ok(()),
        };
        let raw = self.stage_range(&self.file, data_start, size)?;
        self.map.free(offset);
        if let Some(entry) = self.entries.get_mut(name) {
            entry.unplace(raw);
        }
        trace!("Unplaced '{name}' from {offset:#x}");
        Ok(())
    }

    /// Copies `len` bytes of `source` at `start` into a new blob of this
    /// archive's storage.
    pub(crate) fn stage_range(&self, source: &ArchiveFile, start: u64, len: u64) -> Result<Blob> {
        let storage = Arc::clone(&self.storage);
        source.with_file(false, |file| {
            file.seek(SeekFrom::Start(start))?;
            let mut limited = LimitedReader::new(file, len);
            let blob = storage.from_reader(&mut limited)?;
            if limited.is_input_finished() || blob.size() != len {
                blob.close()?;
                return Err(Error::corrupt_header(
                    start,
                    format!("expected {len} bytes of entry data, found {}", blob.size()),
                ));
            }
            Ok(blob)
        })
    }

    /// Frees the ranges of the directory and EOCD so placement may reuse them.
    fn release_directory(&mut self) {
        for start in [self.eocd.directory_offset(), self.eocd.record_start()] {
            if matches!(
                self.map.payload_at(start),
                Some(Occupant::Directory | Occupant::Eocd)
            ) {
                self.map.free(start);
            }
        }
    }

    fn place_pending(&mut self) -> Result<()> {
        while let Some(name) = self.pending.pop_front() {
            if let Err(e) = self.place_entry(&name, PositionAlgorithm::BestFit) {
                self.pending.push_front(name);
                return Err(e);
            }
        }
        Ok(())
    }

    /// Writes a staged entry's local header and data into a free range.
    fn place_entry(&mut self, name: &str, algorithm: PositionAlgorithm) -> Result<()> {
        let Some(entry) = self.entries.get_mut(name) else {
            return Ok(());
        };
        entry.resolve()?;
        let raw = match &entry.source {
            EntrySource::Staged(staged) => staged.task.wait()?.raw,
            EntrySource::InFile => return Ok(()),
        };

        entry.local_extra = entry.local_extra.without_alignment();
        let header = entry.local_header();
        entry.local_extra = header.extra.clone();
        let header_bytes = header.to_bytes();
        let header_len = header_bytes.len() as u64;

        let alignment = if entry.is_stored() && entry.entry_type() == EntryType::File {
            self.options.alignment_rule.alignment(name)
        } else {
            NO_ALIGNMENT
        };
        let start = self.map.allocate(
            header_len + raw.size(),
            header_len,
            alignment,
            algorithm,
            Occupant::Entry(name.to_string()),
        )?;

        self.file.write_at(start, &header_bytes)?;
        let copied = self.file.copy_from(start + header_len, &mut raw.open()?)?;
        if copied != raw.size() {
            return Err(Error::corrupt_header(
                start,
                format!("staged data of '{name}' shrank from {} to {copied} bytes", raw.size()),
            ));
        }
        entry.mark_placed(start);
        debug!("Placed '{name}' at {start:#x} ({} bytes)", header_len + copied);
        Ok(())
    }

    /// Absorbs the gap before each entry into its local extra field, or
    /// moves the entry down when the gap cannot be absorbed.
    fn cover_empty_space(&mut self) -> Result<()> {
        let mut placed: Vec<(u64, String)> = self
            .entries
            .values()
            .filter(|e| e.is_placed())
            .map(|e| (e.cdh.offset, e.name()))
            .collect();
        placed.sort();

        for (_, name) in placed {
            let Some(entry) = self.entries.get(&name) else {
                continue;
            };
            let offset = entry.cdh.offset;
            let Some((gap_start, _)) = self.map.free_range_ending_at(offset) else {
                continue;
            };
            let padding = (offset - gap_start) as usize + entry.local_extra.alignment_padding();
            let base = entry.local_extra.without_alignment().len();
            let coverable = padding >= ALIGNMENT_MIN_SIZE
                && base + padding <= MAX_COVER_EXTRA_LEN
                && entry.data_descriptor == DataDescriptorType::None;

            if coverable {
                self.grow_into_gap(&name, gap_start, padding)?;
            } else {
                self.unplace(&name)?;
                self.place_entry(&name, PositionAlgorithm::FirstFit)?;
            }
        }
        Ok(())
    }

    /// Moves an entry's header back to `gap_start`, keeping its data in place.
    fn grow_into_gap(&mut self, name: &str, gap_start: u64, padding: usize) -> Result<()> {
        let alignment = self.options.alignment_rule.alignment(name);
        let Some(entry) = self.entries.get_mut(name) else {
            return Ok(());
        };
        let offset = entry.cdh.offset;
        let end = entry.end();
        let alignment = u16::try_from(alignment).unwrap_or(u16::MAX);
        entry.local_extra = entry.local_extra.with_alignment_padding(padding, alignment)?;
        entry.cdh.offset = gap_start;

        self.map.free(offset);
        self.map.add(gap_start, end, Occupant::Entry(name.to_string()))?;
        self.file.write_at(gap_start, &entry.local_header().to_bytes())?;
        trace!("Covered {} bytes before '{name}'", offset - gap_start);
        Ok(())
    }

    fn zero_gaps(&self) -> Result<()> {
        let gaps: Vec<(u64, u64)> = self.map.free_ranges().collect();
        for (start, end) in gaps {
            self.file.zero(start, end)?;
        }
        let end = self.map.size();
        self.file.zero(end, end + self.extra_directory_offset)
    }

    fn compute_directory(&mut self) {
        let mut placed: Vec<&StoredEntry> = self.entries.values().filter(|e| e.is_placed()).collect();
        placed.sort_by_key(|e| e.cdh.offset);

        let mut directory = Vec::new();
        let mut contains_zip64_files = false;
        for entry in &placed {
            entry.cdh.write_to(&mut directory);
            contains_zip64_files |= entry.cdh.needs_zip64();
        }
        self.eocd.recompute(DirectorySummary {
            offset: self.map.size() + self.extra_directory_offset,
            size: directory.len() as u64,
            records: placed.len() as u64,
            contains_zip64_files,
        });
        self.directory = directory;
    }

    fn write_directory(&mut self) -> Result<()> {
        let cd_offset = self.eocd.directory_offset();
        let cd_end = cd_offset + self.directory.len() as u64;
        let eocd_start = self.eocd.record_start();
        let eocd_end = eocd_start + self.eocd.record_size();

        self.file.write_at(cd_offset, &self.directory)?;
        self.file.write_at(eocd_start, &self.eocd.to_bytes())?;
        self.file.set_len(eocd_end)?;
        self.file.flush()?;

        self.map.add(cd_offset, cd_end, Occupant::Directory)?;
        self.map.add(eocd_start, eocd_end, Occupant::Eocd)?;
        Ok(())
    }
}
