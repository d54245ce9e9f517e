use super::ZipFile;
use crate::Result;

/// Observer of an archive's lifecycle.
///
/// Every hook receives the archive itself and may inspect or mutate it.
/// A hook that adds or removes entries from [`entries_written`] makes the
/// archive lay out its entries again before the directory is written.
/// The first error returned by a hook stops the notification and surfaces
/// from the operation that triggered it.
///
/// [`entries_written`]: ZipExtension::entries_written
pub trait ZipExtension: Send {
    /// Called at the start of [`ZipFile::update`], after pending
    /// compressions finished.
    fn before_update(&mut self, _zip: &mut ZipFile) -> Result<()> {
        Ok(())
    }

    /// Called once every entry has its final offset, with the central
    /// directory and EOCD computed but not yet written.
    fn entries_written(&mut self, _zip: &mut ZipFile) -> Result<()> {
        Ok(())
    }

    /// Called after [`ZipFile::update`] wrote the directory.
    fn updated(&mut self, _zip: &mut ZipFile) -> Result<()> {
        Ok(())
    }

    /// Called when the archive closes, after the final update.
    fn closed(&mut self, _zip: &mut ZipFile) -> Result<()> {
        Ok(())
    }

    /// Called after `name` was added or replaced.
    fn added(&mut self, _zip: &mut ZipFile, _name: &str) -> Result<()> {
        Ok(())
    }

    /// Called after `name` was deleted.
    fn removed(&mut self, _zip: &mut ZipFile, _name: &str) -> Result<()> {
        Ok(())
    }
}
