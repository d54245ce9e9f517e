//! Options for opening an archive.

use std::fmt;
use std::sync::Arc;

use super::alignment::AlignmentRule;
use super::verify::VerifyLogFactory;
use crate::compress::{Compressor, DeflateCompressor};
use crate::storage::StorageFactory;

/// Alignment of uncompressed entries in APKs.
pub const APK_DEFAULT_ALIGNMENT: u64 = 4;

/// Configuration of a [`ZipFile`](super::ZipFile).
///
/// # Example
///
/// ```rust
/// use apkzip::storage::StorageFactory;
/// use apkzip::zip::{AlignmentRule, ZipOptions};
///
/// let options = ZipOptions::new()
///     .with_storage(StorageFactory::bounded())
///     .with_alignment_rule(AlignmentRule::constant_for_suffix(".so", 4096))
///     .with_auto_sort(true);
/// assert!(options.auto_sort);
/// ```
#[derive(Clone)]
pub struct ZipOptions {
    /// Where staged content lives until it is written.
    pub storage: StorageFactory,
    /// Compressor for entries that may be compressed.
    pub compressor: Arc<dyn Compressor>,
    /// Alignment of uncompressed entries.
    pub alignment_rule: AlignmentRule,
    /// Creates the archive and entry verify logs.
    pub verify_log_factory: VerifyLogFactory,
    /// Sort entries by name on every update.
    pub auto_sort: bool,
    /// Absorb free gaps into the local extra field of the following entry
    /// instead of leaving zeroed bytes.
    pub cover_empty_space_using_extra_field: bool,
    /// Skip integrity checks on open.
    pub skip_validation: bool,
    /// Stamp new entries with 1980-01-01 00:00 instead of the current time.
    pub no_timestamps: bool,
}

impl Default for ZipOptions {
    fn default() -> Self {
        Self {
            storage: StorageFactory::default(),
            compressor: Arc::new(DeflateCompressor::default()),
            alignment_rule: AlignmentRule::default(),
            verify_log_factory: VerifyLogFactory::default(),
            auto_sort: false,
            cover_empty_space_using_extra_field: false,
            skip_validation: false,
            no_timestamps: false,
        }
    }
}

impl fmt::Debug for ZipOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ZipOptions")
            .field("storage", &self.storage)
            .field("compressor", &self.compressor)
            .field("alignment_rule", &self.alignment_rule)
            .field("verify_log_factory", &self.verify_log_factory)
            .field("auto_sort", &self.auto_sort)
            .field(
                "cover_empty_space_using_extra_field",
                &self.cover_empty_space_using_extra_field,
            )
            .field("skip_validation", &self.skip_validation)
            .field("no_timestamps", &self.no_timestamps)
            .finish()
    }
}

impl ZipOptions {
    /// Creates options with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Packaging options for APKs: `options` with its alignment rule
    /// falling back to 4-byte alignment.
    pub fn for_apk(options: ZipOptions) -> Self {
        let rule = AlignmentRule::compose(vec![
            options.alignment_rule.clone(),
            AlignmentRule::constant(APK_DEFAULT_ALIGNMENT),
        ]);
        options.with_alignment_rule(rule)
    }

    /// Sets the staging storage.
    #[must_use]
    pub fn with_storage(mut self, storage: StorageFactory) -> Self {
        self.storage = storage;
        self
    }

    /// Sets the compressor.
    #[must_use]
    pub fn with_compressor(mut self, compressor: Arc<dyn Compressor>) -> Self {
        self.compressor = compressor;
        self
    }

    /// Sets the alignment rule.
    #[must_use]
    pub fn with_alignment_rule(mut self, rule: AlignmentRule) -> Self {
        self.alignment_rule = rule;
        self
    }

    /// Sets the verify log factory.
    #[must_use]
    pub fn with_verify_log_factory(mut self, factory: VerifyLogFactory) -> Self {
        self.verify_log_factory = factory;
        self
    }

    /// Enables sorting on every update.
    #[must_use]
    pub fn with_auto_sort(mut self, auto_sort: bool) -> Self {
        self.auto_sort = auto_sort;
        self
    }

    /// Enables covering gaps with extra field padding.
    #[must_use]
    pub fn with_cover_empty_space_using_extra_field(mut self, cover: bool) -> Self {
        self.cover_empty_space_using_extra_field = cover;
        self
    }

    /// Disables integrity checks on open.
    #[must_use]
    pub fn with_skip_validation(mut self, skip: bool) -> Self {
        self.skip_validation = skip;
        self
    }

    /// Disables timestamps on new entries.
    #[must_use]
    pub fn with_no_timestamps(mut self, no_timestamps: bool) -> Self {
        self.no_timestamps = no_timestamps;
        self
    }
}
