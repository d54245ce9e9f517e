//! Byte-range bookkeeping for the archive file.
//!
//! [`FileUseMap`] models the archive as a gap-free sequence of ranges
//! covering `[0, size)`. Each range is either free or occupied by an opaque
//! payload (a stored entry, the central directory, the EOCD group). Free
//! ranges next to each other are always merged, so after any operation no
//! two consecutive ranges are both free.
//!
//! Allocation never fails: when no free range is large enough the map grows
//! past its current end.

use std::collections::BTreeMap;
use std::fmt;

use crate::{Error, Result};

/// How [`FileUseMap::locate_free`] picks among candidate free ranges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PositionAlgorithm {
    /// The smallest free range that fits (ties go to the lowest offset).
    #[default]
    BestFit,
    /// The free range with the lowest offset that fits.
    FirstFit,
}

#[derive(Debug)]
struct Range<T> {
    end: u64,
    payload: Option<T>,
}

/// Ordered, gap-free map of the ranges of a file.
#[derive(Debug)]
pub struct FileUseMap<T> {
    ranges: BTreeMap<u64, Range<T>>,
    size: u64,
}

/// Smallest offset `>= start` such that `offset + header` is a multiple of
/// `alignment`.
pub fn align_offset(start: u64, header: u64, alignment: u64) -> u64 {
    if alignment <= 1 {
        return start;
    }
    let data = start + header;
    let rem = data % alignment;
    if rem == 0 {
        start
    } else {
        start + (alignment - rem)
    }
}

impl<T: fmt::Display> FileUseMap<T> {
    /// Creates a map covering `[0, size)` with a single free range.
    pub fn new(size: u64) -> Self {
        let mut ranges = BTreeMap::new();
        if size > 0 {
            ranges.insert(
                0,
                Range {
                    end: size,
                    payload: None,
                },
            );
        }
        Self { ranges, size }
    }

    /// Total size covered by the map.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Marks `[start, end)` as occupied by `payload`.
    ///
    /// The map grows if `end` is past its current size. Degenerate ranges
    /// (`start == end`) are accepted and not stored.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Overlap`] naming both payloads if the range
    /// intersects an occupied range, and [`Error::InvalidArgument`] if
    /// `start > end`.
    pub fn add(&mut self, start: u64, end: u64, payload: T) -> Result<()> {
        if start > end {
            return Err(Error::invalid_argument(format!(
                "range start {start:#x} is after its end {end:#x}"
            )));
        }
        if start == end {
            return Ok(());
        }
        if end > self.size {
            self.extend(end);
        }

        if let Some((_, existing)) = self.first_occupied_in(start, end) {
            return Err(Error::Overlap {
                entry: payload.to_string(),
                start,
                end,
                existing: existing.to_string(),
            });
        }

        // No occupied range intersects, so a single free range covers it.
        let (free_start, free_end) = match self.ranges.range(..=start).next_back() {
            Some((s, r)) if r.payload.is_none() && r.end >= end => (*s, r.end),
            _ => {
                return Err(Error::invalid_argument(format!(
                    "range [{start:#x}, {end:#x}) is not inside a free range"
                )));
            }
        };

        self.ranges.remove(&free_start);
        if free_start < start {
            self.ranges.insert(
                free_start,
                Range {
                    end: start,
                    payload: None,
                },
            );
        }
        self.ranges.insert(
            start,
            Range {
                end,
                payload: Some(payload),
            },
        );
        if end < free_end {
            self.ranges.insert(
                end,
                Range {
                    end: free_end,
                    payload: None,
                },
            );
        }
        Ok(())
    }

    /// Frees the occupied range starting at `start` and returns its payload.
    ///
    /// Coalesces the freed range with free neighbours. Returns `None` if no
    /// occupied range starts at `start`.
    pub fn free(&mut self, start: u64) -> Option<T> {
        let range = self.ranges.get_mut(&start)?;
        let payload = range.payload.take()?;
        self.coalesce_around(start);
        Some(payload)
    }

    /// Finds where a block of `size` bytes can be placed.
    ///
    /// `header` is the number of bytes before the aligned point (the local
    /// header of an entry) and `alignment` the boundary the aligned point
    /// must sit on. A free range at the end of the map is a candidate even
    /// if it is too short, since the map can grow; such a candidate is only
    /// picked when nothing else fits. With no candidate the block goes past
    /// the current end.
    pub fn locate_free(
        &self,
        size: u64,
        header: u64,
        alignment: u64,
        algorithm: PositionAlgorithm,
    ) -> u64 {
        let mut best: Option<(u64, u64)> = None;

        for (&start, range) in &self.ranges {
            if range.payload.is_some() {
                continue;
            }
            let offset = align_offset(start, header, alignment);
            let fits_inside = offset + size <= range.end;
            let is_last = range.end == self.size;
            if !fits_inside && !is_last {
                continue;
            }

            match algorithm {
                PositionAlgorithm::FirstFit => return offset,
                PositionAlgorithm::BestFit => {
                    let key = if fits_inside {
                        range.end - start
                    } else {
                        u64::MAX
                    };
                    if best.is_none_or(|(k, _)| key < k) {
                        best = Some((key, offset));
                    }
                }
            }
        }

        match best {
            Some((_, offset)) => offset,
            None => align_offset(self.size, header, alignment),
        }
    }

    /// Locates a free block with [`locate_free`](Self::locate_free) and
    /// occupies it with `payload`. Returns the chosen start.
    pub fn allocate(
        &mut self,
        size: u64,
        header: u64,
        alignment: u64,
        algorithm: PositionAlgorithm,
        payload: T,
    ) -> Result<u64> {
        let start = self.locate_free(size, header, alignment, algorithm);
        self.add(start, start + size, payload)?;
        Ok(start)
    }

    /// Grows the map to `new_size`. Does nothing if it is already as large.
    pub fn extend(&mut self, new_size: u64) {
        if new_size <= self.size {
            return;
        }
        let old_size = self.size;
        self.size = new_size;
        match self.ranges.range_mut(..old_size).next_back() {
            Some((_, last)) if last.payload.is_none() => last.end = new_size,
            _ => {
                self.ranges.insert(
                    old_size,
                    Range {
                        end: new_size,
                        payload: None,
                    },
                );
            }
        }
    }

    /// Grows the occupied range at `start` to end at `new_end`, provided
    /// nothing occupied follows it.
    ///
    /// Returns `false` (changing nothing) if `start` is not occupied, if an
    /// occupied range follows, or if `new_end` would shrink it.
    pub fn extend_if_last(&mut self, start: u64, new_end: u64) -> bool {
        let old_end = match self.ranges.get(&start) {
            Some(r) if r.payload.is_some() => r.end,
            _ => return false,
        };
        if new_end < old_end {
            return false;
        }
        let trailing_occupied = self
            .ranges
            .range(old_end..)
            .any(|(_, r)| r.payload.is_some());
        if trailing_occupied {
            return false;
        }

        self.ranges.remove(&old_end);
        if new_end > self.size {
            self.size = new_end;
        }
        if let Some(r) = self.ranges.get_mut(&start) {
            r.end = new_end;
        }
        if new_end < self.size {
            self.ranges.insert(
                new_end,
                Range {
                    end: self.size,
                    payload: None,
                },
            );
        }
        true
    }

    /// Removes trailing free space, shrinking the map to the end of the last
    /// occupied range.
    pub fn truncate(&mut self) {
        if let Some((&start, last)) = self.ranges.iter().next_back() {
            if last.payload.is_none() {
                self.ranges.remove(&start);
                self.size = start;
            }
        }
    }

    /// Returns the payload of the occupied range starting at `start`.
    pub fn payload_at(&self, start: u64) -> Option<&T> {
        self.ranges.get(&start).and_then(|r| r.payload.as_ref())
    }

    /// Returns the end of the range starting at `start`.
    pub fn end_of(&self, start: u64) -> Option<u64> {
        self.ranges.get(&start).map(|r| r.end)
    }

    /// Iterates every range as `(start, end, payload)` in file order.
    pub fn iter(&self) -> impl Iterator<Item = (u64, u64, Option<&T>)> {
        self.ranges
            .iter()
            .map(|(&s, r)| (s, r.end, r.payload.as_ref()))
    }

    /// Iterates the free ranges as `(start, end)` in file order.
    pub fn free_ranges(&self) -> impl Iterator<Item = (u64, u64)> + '_ {
        self.ranges
            .iter()
            .filter(|(_, r)| r.payload.is_none())
            .map(|(&s, r)| (s, r.end))
    }

    /// Returns the free range that ends exactly at `end`, if any.
    pub fn free_range_ending_at(&self, end: u64) -> Option<(u64, u64)> {
        self.ranges
            .range(..end)
            .next_back()
            .filter(|(_, r)| r.payload.is_none() && r.end == end)
            .map(|(&s, r)| (s, r.end))
    }

    /// Total number of free bytes.
    pub fn free_bytes(&self) -> u64 {
        self.free_ranges().map(|(s, e)| e - s).sum()
    }

    fn first_occupied_in(&self, start: u64, end: u64) -> Option<(u64, &T)> {
        // A range starting before `start` may still reach into it.
        let before = self
            .ranges
            .range(..start)
            .next_back()
            .filter(|(_, r)| r.end > start);
        before
            .into_iter()
            .chain(self.ranges.range(start..end))
            .find_map(|(&s, r)| r.payload.as_ref().map(|p| (s, p)))
    }

    fn coalesce_around(&mut self, start: u64) {
        let mut merged_start = start;
        let mut merged_end = match self.ranges.get(&start) {
            Some(r) => r.end,
            None => return,
        };

        if let Some((&prev, r)) = self.ranges.range(..start).next_back() {
            if r.payload.is_none() {
                merged_start = prev;
            }
        }
        if let Some(next) = self.ranges.get(&merged_end) {
            if next.payload.is_none() {
                let next_end = next.end;
                self.ranges.remove(&merged_end);
                merged_end = next_end;
            }
        }

        self.ranges.remove(&start);
        self.ranges.insert(
            merged_start,
            Range {
                end: merged_end,
                payload: None,
            },
        );
    }
}
