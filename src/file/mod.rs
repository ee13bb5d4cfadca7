//! PE file abstraction for ReadyToRun images.
//!
//! This module provides the [`File`] type, a thin adapter over a parsed PE image that the
//! ReadyToRun reader uses to locate the R2R container and translate addresses. It abstracts over
//! different data sources (files, memory) and exposes the pieces of the PE format the reader
//! needs: section-based RVA translation, the CLR runtime header directory, the COFF machine
//! field, and the export table.
//!
//! # Key Components
//!
//! - [`crate::file::File`] - Main PE image abstraction
//! - [`crate::file::Backend`] - Trait for different data sources (disk files, memory buffers)
//! - [`crate::file::physical::Physical`] - Memory-mapped file backend for disk access
//! - [`crate::file::memory::Memory`] - In-memory buffer backend
//! - [`crate::file::parser::Parser`] - Cursor-based decoding of native format structures
//! - [`crate::file::io`] - Low-level endian-safe reads
//!
//! Unlike a plain managed-metadata loader, a ReadyToRun image is not required to carry a CLR
//! runtime header directory: composite images locate their container through the `RTR_HEADER`
//! export instead. Loading therefore only validates the PE structure itself; the ReadyToRun
//! classification happens in [`crate::ReadyToRunReader`].
//!
//! # Examples
//!
//! ```rust,no_run
//! use r2rscope::File;
//! use std::path::Path;
//!
//! let file = File::from_file(Path::new("app.r2r.dll"))?;
//! println!("Image base: 0x{:x}", file.imagebase());
//! println!("COFF machine: 0x{:x}", file.machine());
//!
//! if let Some((rva, size)) = file.clr_directory() {
//!     println!("CLR header at RVA 0x{:x}, {} bytes", rva, size);
//! }
//! # Ok::<(), r2rscope::Error>(())
//! ```

pub mod io;
pub mod parser;

mod memory;
mod physical;

use std::path::Path;

use crate::{
    Error::{Empty, GoblinErr, OutOfBounds},
    Result,
};
use goblin::pe::PE;
use memory::Memory;
use ouroboros::self_referencing;
use physical::Physical;

/// Backend trait for image data sources.
///
/// This trait abstracts over the source of PE data, allowing for both in-memory and on-disk
/// representations. All implementations must be thread-safe.
pub trait Backend: Send + Sync {
    /// Returns the entire data buffer.
    fn data(&self) -> &[u8];

    /// Returns the total length of the data buffer.
    fn len(&self) -> usize {
        self.data().len()
    }

    /// Returns a slice of the data at the given offset and length.
    ///
    /// ## Arguments
    ///
    /// * `offset` - The starting offset within the data.
    /// * `len` - The length of the slice in bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the requested range is out of bounds.
    fn data_slice(&self, offset: usize, len: usize) -> Result<&[u8]> {
        let Some(offset_end) = offset.checked_add(len) else {
            return Err(OutOfBounds);
        };

        let data = self.data();
        if offset_end > data.len() {
            return Err(OutOfBounds);
        }

        Ok(&data[offset..offset_end])
    }
}

#[self_referencing]
/// Represents a loaded PE image.
///
/// This struct wraps the parsed PE and provides methods for accessing the headers and address
/// spaces the ReadyToRun reader depends on. It supports loading from both files and memory
/// buffers; the underlying buffer is immutable for the lifetime of the reader and shared by all
/// section parsers.
///
/// # Examples
///
/// ```rust,no_run
/// use r2rscope::File;
/// use std::path::Path;
///
/// let file = File::from_file(Path::new("app.r2r.dll"))?;
/// let header_offset = file.rva_to_offset(0x2000)?;
/// let bytes = file.data_slice(header_offset, 8)?;
/// # Ok::<(), r2rscope::Error>(())
/// ```
pub struct File {
    /// The underlying data source (memory or file).
    data: Box<dyn Backend>,
    /// The parsed PE structure, referencing the data.
    #[borrows(data)]
    #[not_covariant]
    pe: PE<'this>,
}

impl File {
    /// Loads a PE image from the given path.
    ///
    /// The file is memory-mapped for efficient access.
    ///
    /// ## Arguments
    ///
    /// * `file` - Path to the PE file on disk.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, is empty, or is not a valid PE.
    pub fn from_file(file: &Path) -> Result<File> {
        let input = Physical::new(file)?;

        Self::load(input)
    }

    /// Loads a PE image from a memory buffer.
    ///
    /// ## Arguments
    ///
    /// * `data` - The bytes of the PE file.
    ///
    /// # Errors
    ///
    /// Returns an error if the buffer is empty or not a valid PE.
    pub fn from_mem(data: Vec<u8>) -> Result<File> {
        let input = Memory::new(data);

        Self::load(input)
    }

    /// Internal loader for any backend.
    fn load<T: Backend + 'static>(data: T) -> Result<File> {
        if data.len() == 0 {
            return Err(Empty);
        }

        let data = Box::new(data);

        File::try_new(data, |data| {
            match PE::parse(data.as_ref().data()) {
                Ok(pe) => {
                    // The optional header carries the data directories and the image base;
                    // nothing downstream can work without it.
                    if pe.header.optional_header.is_none() {
                        return Err(malformed_error!("File does not have an OptionalHeader"));
                    }

                    Ok(pe)
                }
                Err(error) => Err(GoblinErr(error)),
            }
        })
    }

    /// Returns the total size of the loaded image in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.with_data(|data| data.len())
    }

    /// Returns `true` if the image has a length of zero.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the image base address of the loaded PE image.
    ///
    /// The image base is the preferred virtual address where the PE image would be loaded in
    /// memory; ReadyToRun composite images report it alongside the decoded machine and OS.
    #[must_use]
    pub fn imagebase(&self) -> u64 {
        self.with_pe(|pe| pe.image_base as u64)
    }

    /// Returns the raw COFF machine field of the image.
    ///
    /// For ReadyToRun images built for non-Windows targets this value is the machine constant
    /// XORed with an OS tag; see [`crate::readytorun::machine`] for the decoding.
    #[must_use]
    pub fn machine(&self) -> u16 {
        self.with_pe(|pe| pe.header.coff_header.machine)
    }

    /// Returns the RVA and size of the CLR runtime header directory, if present.
    ///
    /// Single-assembly ReadyToRun images carry their managed metadata behind this directory;
    /// composite images omit it entirely.
    #[must_use]
    pub fn clr_directory(&self) -> Option<(usize, usize)> {
        self.with_pe(|pe| {
            let optional_header = pe.header.optional_header?;
            let clr_dir = optional_header.data_directories.get_clr_runtime_header()?;

            if clr_dir.virtual_address == 0 || clr_dir.size == 0 {
                return None;
            }

            Some((clr_dir.virtual_address as usize, clr_dir.size as usize))
        })
    }

    /// Looks up an entry in the PE export table by name and returns its RVA.
    ///
    /// Composite ReadyToRun images export their container header under the name `RTR_HEADER`.
    ///
    /// ## Arguments
    ///
    /// * `name` - The export name to look for.
    #[must_use]
    pub fn export_rva(&self, name: &str) -> Option<usize> {
        self.with_pe(|pe| {
            pe.exports
                .iter()
                .find(|export| export.name == Some(name))
                .map(|export| export.rva)
        })
    }

    /// Returns the raw data of the loaded image.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        self.with_data(|data| data.data())
    }

    /// Returns a slice of the image data at the given offset and length.
    ///
    /// ## Arguments
    ///
    /// * `offset` - The offset to start the slice from.
    /// * `len` - The length of the slice.
    ///
    /// # Errors
    ///
    /// Returns an error if the requested range is out of bounds.
    pub fn data_slice(&self, offset: usize, len: usize) -> Result<&[u8]> {
        self.with_data(|data| data.data_slice(offset, len))
    }

    /// Converts a relative virtual address (RVA) to a file offset.
    ///
    /// RVAs are addresses relative to the image base; all directory entries and ReadyToRun
    /// section records use them. The translation walks the PE section table.
    ///
    /// ## Arguments
    ///
    /// * `rva` - The RVA to convert.
    ///
    /// # Errors
    ///
    /// Returns an error if the RVA does not fall inside any section.
    pub fn rva_to_offset(&self, rva: usize) -> Result<usize> {
        self.with_pe(|pe| {
            let rva_u32 =
                u32::try_from(rva).map_err(|_| malformed_error!("RVA too large - {}", rva))?;

            for section in &pe.sections {
                let size = section.virtual_size.max(section.size_of_raw_data);
                let Some(section_max) = section.virtual_address.checked_add(size) else {
                    return Err(malformed_error!(
                        "Section malformed, causing integer overflow - {} + {}",
                        section.virtual_address,
                        size
                    ));
                };

                if section.virtual_address <= rva_u32 && rva_u32 < section_max {
                    return Ok((rva - section.virtual_address as usize)
                        + section.pointer_to_raw_data as usize);
                }
            }

            Err(malformed_error!(
                "RVA could not be converted to offset - {}",
                rva
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test::pe::PeBuilder;

    #[test]
    fn load_crafted() {
        let image = PeBuilder::new().machine(0x8664).build();
        let file = File::from_mem(image).unwrap();

        assert!(!file.is_empty());
        assert_eq!(file.machine(), 0x8664);
        assert_eq!(file.imagebase(), 0x0001_8000_0000);
        assert_eq!(&file.data()[0..2], b"MZ");

        // The single .text section maps RVA 0x1000 to file offset 0x400
        assert_eq!(file.rva_to_offset(0x1000).unwrap(), 0x400);
        assert_eq!(file.rva_to_offset(0x1010).unwrap(), 0x410);
        assert!(file.rva_to_offset(0x20_0000).is_err());
    }

    #[test]
    fn load_invalid() {
        assert!(matches!(File::from_mem(vec![]), Err(Empty)));

        let garbage = vec![0xCC_u8; 128];
        assert!(File::from_mem(garbage).is_err());
    }

    #[test]
    fn load_from_disk() {
        use std::io::Write;

        let image = PeBuilder::new().machine(0x8664).build();
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(&image).unwrap();
        tmp.flush().unwrap();

        let file = File::from_file(tmp.path()).unwrap();
        assert_eq!(file.machine(), 0x8664);
        assert_eq!(file.rva_to_offset(0x1000).unwrap(), 0x400);
    }
}
