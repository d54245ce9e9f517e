//! ZIP record formats and low-level field helpers.
//!
//! This module holds the byte layouts of every record the crate reads and
//! writes: local headers, central directory headers, data descriptors,
//! extra fields, DOS stamps and the EOCD group.

pub mod dostime;
pub mod eocd;
pub mod extra;
pub mod header;
pub mod reader;

pub use dostime::DosTime;
pub use eocd::{DirectorySummary, EocdGroup, ExtensibleData, ExtensibleField, Zip64V2Fields};
pub use extra::{ExtraField, ExtraSegment};
pub use header::{
    CentralDirectoryHeader, CompressionMethod, DataDescriptor, DataDescriptorType, LocalHeader,
};
