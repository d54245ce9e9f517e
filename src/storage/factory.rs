//! Storage selection for an archive.

use std::path::PathBuf;
use std::sync::Arc;

use super::chunked::ChunkedStorage;
use super::delegate::{DelegatingStorage, SingleUseStorage};
use super::memory::InMemoryStorage;
use super::overflow::OverflowStorage;
use super::temp::TemporaryDirectory;
use super::temp_dir::TempDirStorage;
use super::ByteStorage;
use crate::Result;

/// Where disk-backed storages put their files.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum TemporaryDirectoryFactory {
    /// A fresh directory under the system temporary location, deleted on
    /// close.
    #[default]
    System,
    /// An existing directory owned by the caller.
    Fixed(PathBuf),
}

impl TemporaryDirectoryFactory {
    /// Creates the directory.
    pub fn make(&self) -> Result<TemporaryDirectory> {
        match self {
            TemporaryDirectoryFactory::System => TemporaryDirectory::new_system(),
            TemporaryDirectoryFactory::Fixed(path) => {
                std::fs::create_dir_all(path)?;
                Ok(TemporaryDirectory::fixed(path.clone()))
            }
        }
    }
}

/// Recipe for the staging storage an archive creates when opened.
#[derive(Debug, Clone, Default)]
pub enum StorageFactory {
    /// [`InMemoryStorage`].
    #[default]
    InMemory,
    /// [`TempDirStorage`].
    TemporaryDirectory(TemporaryDirectoryFactory),
    /// [`OverflowStorage`].
    OverflowToDisk {
        /// Memory threshold in bytes.
        threshold: u64,
        /// Location of spilled blobs.
        temp: TemporaryDirectoryFactory,
    },
    /// [`ChunkedStorage`] over another recipe.
    Chunked {
        /// Maximum chunk size.
        chunk_size: u64,
        /// Recipe for the chunk storage.
        inner: Box<StorageFactory>,
    },
    /// An existing storage shared by several archives. Closing an archive
    /// leaves it open.
    Shared(Arc<dyn ByteStorage>),
}

/// Memory threshold of [`StorageFactory::bounded`].
pub const DEFAULT_OVERFLOW_THRESHOLD: u64 = 64 * 1024 * 1024;

/// Chunk size of [`StorageFactory::bounded`].
pub const DEFAULT_CHUNK_SIZE: u64 = 1024 * 1024;

impl StorageFactory {
    /// Keeps up to 64 MiB in memory, split into 1 MiB chunks, and spills
    /// the rest to a system temporary directory.
    pub fn bounded() -> Self {
        StorageFactory::Chunked {
            chunk_size: DEFAULT_CHUNK_SIZE,
            inner: Box::new(StorageFactory::OverflowToDisk {
                threshold: DEFAULT_OVERFLOW_THRESHOLD,
                temp: TemporaryDirectoryFactory::System,
            }),
        }
    }

    /// Creates a storage that can be closed exactly once.
    pub fn create(&self) -> Result<Arc<dyn ByteStorage>> {
        let delegate = match self {
            StorageFactory::Shared(storage) => DelegatingStorage::borrowed(Arc::clone(storage)),
            other => DelegatingStorage::new(other.build()?),
        };
        Ok(Arc::new(SingleUseStorage::new(delegate)))
    }

    fn build(&self) -> Result<Arc<dyn ByteStorage>> {
        Ok(match self {
            StorageFactory::InMemory => Arc::new(InMemoryStorage::new()),
            StorageFactory::TemporaryDirectory(temp) => Arc::new(TempDirStorage::new(temp)?),
            StorageFactory::OverflowToDisk { threshold, temp } => {
                Arc::new(OverflowStorage::new(*threshold, temp)?)
            }
            StorageFactory::Chunked { chunk_size, inner } => {
                Arc::new(ChunkedStorage::new(*chunk_size, inner.build()?))
            }
            StorageFactory::Shared(storage) => Arc::clone(storage),
        })
    }
}
