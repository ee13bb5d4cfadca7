//! Import-section parsing and indirection-cell naming.
//!
//! The `ImportSections` directory describes the image's indirection cells: machine-word slots
//! the loader binds to methods, types, strings and helpers at load time. Each directory record
//! carries a parallel signature table whose blobs say what the cell binds to; rendering those
//! blobs into symbolic names is a collaborator concern behind [`NameFormatter`].

use bitflags::bitflags;
use rustc_hash::FxHashMap;
use strum::FromRepr;

use crate::{
    file::parser::Parser,
    readytorun::{
        machine::{Architecture, Machine},
        ImageView,
    },
    Result,
};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    /// Attribute flags of an import section (`CORCOMPILE_IMPORT_FLAGS_*`).
    pub struct ImportSectionFlags: u16 {
        /// Cells are bound eagerly at image load
        const EAGER = 0x0001;
        /// Cells contain code pointers
        const CODE = 0x0002;
        /// Cells contain addresses of runtime data structures
        const PCODE = 0x0004;
    }
}

/// Content tag of an import section (`CORCOMPILE_IMPORT_TYPE_*`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromRepr)]
#[repr(u8)]
#[allow(missing_docs)]
pub enum ImportKind {
    Unknown = 0,
    ExternalMethod = 1,
    StubDispatch = 2,
    StringHandle = 3,
    TypeHandle = 4,
    MethodHandle = 5,
    VirtualMethod = 6,
    PInvokeTarget = 7,
    IndirectPInvokeTarget = 8,
}

/// Renders import-cell signature blobs into symbolic names.
///
/// Rich fixup naming needs a full signature and helper-table decoder, which belongs to the
/// embedding tool; the reader ships [`RawNameFormatter`] as a minimal default and accepts any
/// implementation.
pub trait NameFormatter {
    /// Renders the signature blob at `signature_rva`.
    ///
    /// # Errors
    /// Returns an error if the signature location cannot be read.
    fn format_signature(&self, image: &dyn ImageView, signature_rva: u32) -> Result<String>;
}

/// Default formatter: renders the signature location and its leading fixup kind byte.
pub struct RawNameFormatter;

impl NameFormatter for RawNameFormatter {
    fn format_signature(&self, image: &dyn ImageView, signature_rva: u32) -> Result<String> {
        let offset = image.rva_to_offset(signature_rva)?;
        let mut parser = Parser::new(image.data());
        parser.seek(offset)?;
        let kind = parser.read_le::<u8>()?;

        Ok(format!("signature 0x{signature_rva:08x} (kind 0x{kind:02x})"))
    }
}

/// One indirection cell of an import section.
#[derive(Debug, Clone)]
pub struct ImportSectionEntry {
    /// Index of the cell within its section
    pub index: u32,
    /// Byte offset of the cell within its section
    pub offset: usize,
    /// Absolute RVA of the cell
    pub rva: u32,
    /// Raw cell value as stored in the image
    pub value: i64,
    /// RVA of the cell's signature blob
    pub signature_rva: u32,
    /// Rendered symbolic name of the signature
    pub name: String,
}

/// One record of the `ImportSections` directory.
#[derive(Debug)]
pub struct ImportSection {
    /// RVA of the cell array
    pub rva: u32,
    /// Size of the cell array in bytes
    pub size: u32,
    /// Attribute flags
    pub flags: ImportSectionFlags,
    /// Content tag
    pub kind: ImportKind,
    /// Size of one cell in bytes
    pub entry_size: u8,
    /// RVA of the parallel signature table, 0 if none
    pub signatures_rva: u32,
    /// RVA of auxiliary data (GC refmap), 0 if none
    pub aux_rva: u32,
    /// The section's cells
    pub entries: Vec<ImportSectionEntry>,
}

/// Directory record size: section (8) + flags (2) + type (1) + entry size (1) +
/// signatures (4) + auxiliary data (4)
const IMPORT_SECTION_RECORD_SIZE: usize = 20;

/// Parses the `ImportSections` directory and populates the image-wide cell-name map.
///
/// ## Arguments
///
/// * `image` - Address translation and buffer access.
/// * `section_offset` - File offset of the directory.
/// * `section_size` - Byte size of the directory.
/// * `machine` - The decoded target machine, used to derive a zero entry size.
/// * `formatter` - Signature naming collaborator.
/// * `cell_names` - Map from cell RVA to symbolic name, filled per entry.
///
/// # Errors
///
/// Returns an error if the directory or a cell array is truncated or unmappable.
pub fn parse_import_sections(
    image: &dyn ImageView,
    section_offset: usize,
    section_size: usize,
    machine: Machine,
    formatter: &dyn NameFormatter,
    cell_names: &mut FxHashMap<u32, String>,
) -> Result<Vec<ImportSection>> {
    if section_size % IMPORT_SECTION_RECORD_SIZE != 0 {
        return Err(malformed_error!(
            "ImportSections size {} is not a multiple of the record size",
            section_size
        ));
    }

    let data = image.data();
    let mut parser = Parser::new(data);
    parser.seek(section_offset)?;

    let mut sections = Vec::new();
    for _ in 0..section_size / IMPORT_SECTION_RECORD_SIZE {
        let rva = parser.read_le::<u32>()?;
        let size = parser.read_le::<u32>()?;
        let flags = ImportSectionFlags::from_bits_retain(parser.read_le::<u16>()?);
        let kind_raw = parser.read_le::<u8>()?;
        let mut entry_size = parser.read_le::<u8>()?;
        let signatures_rva = parser.read_le::<u32>()?;
        let aux_rva = parser.read_le::<u32>()?;

        let kind = ImportKind::from_repr(kind_raw).unwrap_or(ImportKind::Unknown);

        if entry_size == 0 {
            entry_size = match machine.architecture() {
                Architecture::X86 | Architecture::Arm32 => 4,
                Architecture::X64 | Architecture::Arm64 => 8,
            };
        }

        let entry_count = size / u32::from(entry_size);
        let cells_offset = if entry_count != 0 {
            image.rva_to_offset(rva)?
        } else {
            0
        };
        let signatures_offset = if signatures_rva != 0 && entry_count != 0 {
            Some(image.rva_to_offset(signatures_rva)?)
        } else {
            None
        };

        let mut entries = Vec::with_capacity(entry_count as usize);
        for index in 0..entry_count {
            let offset = index as usize * entry_size as usize;

            let mut cell_parser = Parser::new(data);
            cell_parser.seek(cells_offset + offset)?;
            let value = if entry_size == 8 {
                cell_parser.read_le::<i64>()?
            } else {
                i64::from(cell_parser.read_le::<u32>()?)
            };

            let (signature_rva, name) = match signatures_offset {
                Some(signatures_offset) => {
                    let mut sig_parser = Parser::new(data);
                    sig_parser.seek(signatures_offset + index as usize * 4)?;
                    let signature_rva = sig_parser.read_le::<u32>()?;
                    let name = formatter.format_signature(image, signature_rva)?;
                    (signature_rva, name)
                }
                None => (0, String::new()),
            };

            let cell_rva = rva + index * u32::from(entry_size);
            if !name.is_empty() {
                cell_names.insert(cell_rva, name.clone());
            }

            entries.push(ImportSectionEntry {
                index,
                offset,
                rva: cell_rva,
                value,
                signature_rva,
                name,
            });
        }

        sections.push(ImportSection {
            rva,
            size,
            flags,
            kind,
            entry_size,
            signatures_rva,
            aux_rva,
            entries,
        });
    }

    Ok(sections)
}
