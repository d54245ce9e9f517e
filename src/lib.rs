//! # apkzip
//!
//! In-place editing of ZIP archives and Android APKs.
//!
//! Opening an archive reads only its central directory. Entries can then
//! be added, replaced, deleted, merged from other archives or re-sorted,
//! and [`ZipFile::update`] writes just what changed: untouched entries
//! keep their bytes and offsets, new content fills freed gaps when it
//! fits, and the central directory and EOCD records are rewritten after
//! the last entry. Uncompressed entries can be aligned (APKs need 4-byte
//! alignment, native libraries page alignment), and the APK signing block
//! in front of the central directory can be edited.
//!
//! ## Quick Start
//!
//! ### Editing an Archive
//!
//! ```rust,no_run
//! use apkzip::{Result, ZipFile, ZipOptions};
//!
//! fn main() -> Result<()> {
//!     let mut zip = ZipFile::open("app.zip", ZipOptions::default())?;
//!
//!     for entry in zip.entries() {
//!         println!("{} at {}: {} bytes", entry.name(), entry.offset(), entry.in_file_size());
//!     }
//!
//!     zip.add("assets/config.json", &mut &b"{}"[..], true)?;
//!     zip.delete("assets/stale.bin")?;
//!     zip.close()
//! }
//! ```
//!
//! ### Packaging an APK
//!
//! ```rust,no_run
//! use apkzip::zip::AlignmentRule;
//! use apkzip::{Result, ZipFile, ZipOptions};
//!
//! fn main() -> Result<()> {
//!     let options = ZipOptions::for_apk(
//!         ZipOptions::new()
//!             .with_alignment_rule(AlignmentRule::constant_for_suffix(".so", 4096))
//!             .with_cover_empty_space_using_extra_field(true),
//!     );
//!     let mut apk = ZipFile::open("app.apk", options)?;
//!     apk.add_all_recursively("build/lib", |path| {
//!         path.extension().is_none_or(|ext| ext != "so")
//!     })?;
//!     apk.close()
//! }
//! ```
//!
//! ### Adding a Signing Block Value
//!
//! ```rust,no_run
//! use apkzip::signing::SigningBlockSplicer;
//! use apkzip::{Result, ZipFile, ZipOptions};
//!
//! fn main() -> Result<()> {
//!     let mut apk = ZipFile::open("app.apk", ZipOptions::default())?;
//!     apk.add_extension(Box::new(
//!         SigningBlockSplicer::new().with_value(0x504b_4453, b"dependency info".to_vec()),
//!     ))?;
//!     apk.touch()?;
//!     apk.close()
//! }
//! ```
//!
//! ## Staging Storage
//!
//! Content waits in a [`storage::ByteStorage`] between `add` and `update`.
//! [`storage::StorageFactory`] picks the backing: memory (the default),
//! files in a temporary directory, or memory that overflows to disk past a
//! threshold.
//!
//! ## Integrity Checks
//!
//! Damaged archives fail to open with an error for which
//! [`Error::is_corruption`] is true. Milder inconsistencies (a CRC that
//! disagrees with the data descriptor, a local header that disagrees with
//! its central record) are recorded in a [`zip::VerifyLog`] instead.
//!
//! ## Crate Features
//!
//! - `parallel` (default): deferred compression runs on rayon's pool.

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

/// Default buffer size for read operations (8 KiB).
pub(crate) const READ_BUFFER_SIZE: usize = 8192;

pub mod checksum;
pub mod compress;
pub mod error;
pub mod format;
pub mod signing;
pub mod space;
pub mod storage;
pub mod zip;

pub use error::{Error, Result};

// Re-export the archive API at crate root for convenience
pub use zip::{EntryType, StoredEntry, ZipExtension, ZipFile, ZipOptions};
