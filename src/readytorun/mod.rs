//! ReadyToRun container parsing.
//!
//! This module holds the native side of the reader: the machine/OS classifier, the container
//! header and section directory, the two packed container formats (NativeArray,
//! NativeHashtable), the entrypoint and runtime-function decoders, import sections, and the
//! [`crate::readytorun::reader::ReadyToRunReader`] facade that stitches them to the managed
//! metadata.
//!
//! # Key Components
//!
//! - [`crate::readytorun::machine`] - target classification (OS-XOR decode of the COFF machine)
//! - [`crate::readytorun::header`] - `RTR` header and section directory
//! - [`crate::readytorun::narray`] / [`crate::readytorun::nhashtable`] - container formats
//! - [`crate::readytorun::method`] - method records and the runtime-function walker
//! - [`crate::readytorun::unwind`] - per-arch unwind records and GC info placement
//! - [`crate::readytorun::signature`] - type-signature rendering with module overrides
//! - [`crate::readytorun::imports`] - import sections and indirection-cell naming
//! - [`crate::readytorun::assemblies`] - the unified reference-assembly index
//! - [`crate::readytorun::reader`] - the top-level reader

pub mod assemblies;
pub mod header;
pub mod imports;
pub mod machine;
pub mod method;
pub mod narray;
pub mod nhashtable;
pub mod reader;
pub mod signature;
pub mod unwind;

use crate::Result;

/// Address translation and buffer access the section parsers need from the PE layer.
///
/// Implemented by [`crate::File`]; tests substitute flat buffers where RVAs equal offsets.
pub trait ImageView {
    /// The whole image buffer.
    fn data(&self) -> &[u8];

    /// Translates an RVA to a file offset.
    ///
    /// # Errors
    /// Returns an error if the RVA does not map into the image.
    fn rva_to_offset(&self, rva: u32) -> Result<usize>;
}

impl ImageView for crate::file::File {
    fn data(&self) -> &[u8] {
        crate::file::File::data(self)
    }

    fn rva_to_offset(&self, rva: u32) -> Result<usize> {
        crate::file::File::rva_to_offset(self, rva as usize)
    }
}
