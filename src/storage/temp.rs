//! Temporary files and directories with explicit close.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::memory::lock;
use crate::{Error, Result};

/// Removes `path` whether it is a file or a directory tree.
///
/// A path that no longer exists counts as removed.
pub(crate) fn remove_recursively(path: &Path) -> io::Result<()> {
    let result = match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(path),
        Ok(_) => fs::remove_file(path),
        Err(e) => Err(e),
    };
    match result {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

/// A path that is deleted when closed or dropped.
#[derive(Debug)]
pub struct TemporaryFile {
    path: PathBuf,
    open: Mutex<bool>,
}

impl TemporaryFile {
    /// Takes ownership of `path`. Nothing is created.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            open: Mutex::new(true),
        }
    }

    /// The owned path.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Closed`] once the file has been closed.
    pub fn path(&self) -> Result<&Path> {
        if *lock(&self.open) {
            Ok(&self.path)
        } else {
            Err(Error::Closed {
                what: "temporary file",
            })
        }
    }

    /// Whether `close` has run.
    pub fn is_closed(&self) -> bool {
        !*lock(&self.open)
    }

    /// Deletes the path and everything below it. Idempotent.
    pub fn close(&self) -> Result<()> {
        let mut open = lock(&self.open);
        if !*open {
            return Ok(());
        }
        *open = false;
        remove_recursively(&self.path)?;
        Ok(())
    }
}

impl Drop for TemporaryFile {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            log::warn!("Failed to delete {}: {}", self.path.display(), e);
        }
    }
}

#[derive(Debug)]
enum DirectoryKind {
    Owned(Mutex<Option<tempfile::TempDir>>),
    Fixed,
}

/// A directory in which staging files are created.
///
/// An owned directory is deleted with all its contents on close. A fixed
/// directory belongs to the caller and is left in place.
#[derive(Debug)]
pub struct TemporaryDirectory {
    path: PathBuf,
    kind: DirectoryKind,
}

impl TemporaryDirectory {
    /// Creates a fresh directory under the system temporary location.
    pub fn new_system() -> Result<Self> {
        let dir = tempfile::Builder::new().prefix("apkzip-").tempdir()?;
        log::debug!("Created temporary directory {}", dir.path().display());
        Ok(Self {
            path: dir.path().to_path_buf(),
            kind: DirectoryKind::Owned(Mutex::new(Some(dir))),
        })
    }

    /// Uses an existing directory without taking ownership of it.
    pub fn fixed(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            kind: DirectoryKind::Fixed,
        }
    }

    /// The directory path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether closing deletes the directory.
    pub fn is_owned(&self) -> bool {
        matches!(self.kind, DirectoryKind::Owned(_))
    }

    /// Creates a new empty file with a unique name in the directory.
    pub fn new_file(&self) -> Result<PathBuf> {
        if let DirectoryKind::Owned(dir) = &self.kind {
            if lock(dir).is_none() {
                return Err(Error::Closed {
                    what: "temporary directory",
                });
            }
        }
        let file = tempfile::Builder::new()
            .prefix("blob-")
            .tempfile_in(&self.path)?;
        let (_, path) = file.keep().map_err(|e| e.error)?;
        Ok(path)
    }

    /// Deletes an owned directory and its contents. Idempotent.
    pub fn close(&self) -> Result<()> {
        let DirectoryKind::Owned(dir) = &self.kind else {
            return Ok(());
        };
        let Some(dir) = lock(dir).take() else {
            return Ok(());
        };
        match dir.close() {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e.into()),
            _ => {
                log::debug!("Deleted temporary directory {}", self.path.display());
                Ok(())
            }
        }
    }
}
