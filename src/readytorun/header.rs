//! ReadyToRun header and section directory parsing.
//!
//! The container starts with a small fixed header (signature `'RTR\0'`, format version, flags)
//! followed by a directory mapping section types to `(RVA, size)` ranges. Composite images
//! additionally carry one core header (flags + directory, no signature) per bundled component
//! assembly inside the `ComponentAssemblies` section.

use bitflags::bitflags;
use rustc_hash::FxHashMap;
use strum::FromRepr;

use crate::{file::parser::Parser, Error::OutOfBounds, Result};

/// The MAGIC value indicating a ReadyToRun header ('RTR\0')
pub const READYTORUN_SIGNATURE: u32 = 0x0052_5452;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    /// Attribute flags from the ReadyToRun core header (`READYTORUN_FLAG_*`).
    pub struct ReadyToRunFlags: u32 {
        /// Set if the original IL image was platform neutral
        const PLATFORM_NEUTRAL_SOURCE = 0x0000_0001;
        /// The image obeys the version bubble; type loads need no validation
        const SKIP_TYPE_VALIDATION = 0x0000_0002;
        /// Not all methods of the image were compiled
        const PARTIAL = 0x0000_0004;
        /// PInvoke stubs compiled into the image are non-shareable
        const NONSHARED_PINVOKE_STUBS = 0x0000_0008;
        /// The image embeds the original MSIL
        const EMBEDDED_MSIL = 0x0000_0010;
        /// This is a component assembly of a composite image
        const COMPONENT = 0x0000_0020;
        /// The image was compiled in a multi-module version bubble
        const MULTIMODULE_VERSION_BUBBLE = 0x0000_0040;
        /// The image can carry code from assemblies outside the version bubble
        const UNRELATED_R2R_CODE = 0x0000_0080;
    }
}

/// Type tag of a ReadyToRun section (`ReadyToRunSectionType`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromRepr)]
#[repr(u32)]
#[allow(missing_docs)]
pub enum SectionType {
    CompilerIdentifier = 100,
    ImportSections = 101,
    RuntimeFunctions = 102,
    MethodDefEntryPoints = 103,
    ExceptionInfo = 104,
    DebugInfo = 105,
    DelayLoadMethodCallThunks = 106,
    AvailableTypes = 108,
    InstanceMethodEntryPoints = 109,
    InliningInfo = 110,
    ProfileDataInfo = 111,
    ManifestMetadata = 112,
    AttributePresence = 113,
    InliningInfo2 = 114,
    ComponentAssemblies = 115,
    OwnerCompositeExecutable = 116,
    PgoInstrumentationData = 117,
    ManifestAssemblyMvids = 118,
}

/// One section directory entry: an `(RVA, size)` range inside the image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Section {
    /// Relative virtual address of the section contents
    pub rva: u32,
    /// Size of the section contents in bytes
    pub size: u32,
}

/// Flags and section directory shared by the top-level header and per-component headers.
#[derive(Debug)]
pub struct ReadyToRunCoreHeader {
    /// Attribute flags of this (component) image
    pub flags: ReadyToRunFlags,
    /// Section directory; keys are unique
    sections: FxHashMap<SectionType, Section>,
}

impl ReadyToRunCoreHeader {
    /// Reads a core header (flags, section count, section records) at the parser's position.
    ///
    /// Unknown section types are skipped: the format grows new sections regularly and old
    /// readers are expected to ignore them. A duplicate known type is malformed.
    ///
    /// # Errors
    /// Returns an error if the directory is truncated or contains duplicate section types.
    pub fn read(parser: &mut Parser) -> Result<ReadyToRunCoreHeader> {
        let flags = ReadyToRunFlags::from_bits_retain(parser.read_le::<u32>()?);
        let section_count = parser.read_le::<u32>()?;

        let mut sections = FxHashMap::default();
        for _ in 0..section_count {
            let section_type = parser.read_le::<u32>()?;
            let rva = parser.read_le::<u32>()?;
            let size = parser.read_le::<u32>()?;

            let Some(section_type) = SectionType::from_repr(section_type) else {
                continue;
            };

            if sections
                .insert(section_type, Section { rva, size })
                .is_some()
            {
                return Err(malformed_error!(
                    "Duplicate section type in header - {:?}",
                    section_type
                ));
            }
        }

        Ok(ReadyToRunCoreHeader { flags, sections })
    }

    /// Looks up a section by type.
    #[must_use]
    pub fn section(&self, section_type: SectionType) -> Option<Section> {
        self.sections.get(&section_type).copied()
    }

    /// Number of recognized sections in the directory.
    #[must_use]
    pub fn section_count(&self) -> usize {
        self.sections.len()
    }

    /// Iterates over the recognized section types of this header.
    pub fn section_types(&self) -> impl Iterator<Item = SectionType> + '_ {
        self.sections.keys().copied()
    }
}

/// The top-level ReadyToRun header of an image.
#[derive(Debug)]
pub struct ReadyToRunHeader {
    /// Magic signature: 'RTR\0'
    pub signature: u32,
    /// Major format version
    pub major_version: u16,
    /// Minor format version
    pub minor_version: u16,
    /// Flags and section directory
    pub core: ReadyToRunCoreHeader,
}

impl ReadyToRunHeader {
    /// Create a `ReadyToRunHeader` object from a sequence of bytes
    ///
    /// # Arguments
    /// * `data` - The byte slice from which this object shall be created, starting at the
    ///   header signature
    ///
    /// # Errors
    /// Returns an error if the data is too short, the signature does not match, or the section
    /// directory is malformed.
    pub fn read(data: &[u8]) -> Result<ReadyToRunHeader> {
        if data.len() < 16 {
            return Err(OutOfBounds);
        }

        let mut parser = Parser::new(data);

        let signature = parser.read_le::<u32>()?;
        if signature != READYTORUN_SIGNATURE {
            return Err(malformed_error!(
                "READYTORUN_SIGNATURE does not match - 0x{:08x}",
                signature
            ));
        }

        let major_version = parser.read_le::<u16>()?;
        let minor_version = parser.read_le::<u16>()?;
        if major_version < 2 {
            return Err(malformed_error!(
                "Unsupported ReadyToRun major version - {}",
                major_version
            ));
        }

        let core = ReadyToRunCoreHeader::read(&mut parser)?;

        Ok(ReadyToRunHeader {
            signature,
            major_version,
            minor_version,
            core,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) fn crafted_header(sections: &[(u32, u32, u32)]) -> Vec<u8> {
        let mut data = Vec::new();
        data.extend_from_slice(&READYTORUN_SIGNATURE.to_le_bytes());
        data.extend_from_slice(&9u16.to_le_bytes());
        data.extend_from_slice(&2u16.to_le_bytes());
        data.extend_from_slice(&0u32.to_le_bytes()); // flags
        data.extend_from_slice(&(sections.len() as u32).to_le_bytes());
        for (section_type, rva, size) in sections {
            data.extend_from_slice(&section_type.to_le_bytes());
            data.extend_from_slice(&rva.to_le_bytes());
            data.extend_from_slice(&size.to_le_bytes());
        }
        data
    }

    #[test]
    fn crafted() {
        let data = crafted_header(&[
            (102, 0x4000, 0x54),
            (103, 0x5000, 0x30),
            (100, 0x6000, 0x10),
        ]);

        let header = ReadyToRunHeader::read(&data).unwrap();

        assert_eq!(header.signature, READYTORUN_SIGNATURE);
        assert_eq!(header.major_version, 9);
        assert_eq!(header.minor_version, 2);
        assert_eq!(header.core.section_count(), 3);
        assert_eq!(
            header.core.section(SectionType::RuntimeFunctions),
            Some(Section {
                rva: 0x4000,
                size: 0x54
            })
        );
        assert_eq!(
            header.core.section(SectionType::CompilerIdentifier),
            Some(Section {
                rva: 0x6000,
                size: 0x10
            })
        );
        assert_eq!(header.core.section(SectionType::DebugInfo), None);

        // Section types are unique
        let types: Vec<SectionType> = header.core.section_types().collect();
        let unique: std::collections::HashSet<SectionType> = types.iter().copied().collect();
        assert_eq!(unique.len(), types.len());
    }

    #[test]
    fn crafted_unknown_sections_skipped() {
        let data = crafted_header(&[(102, 0x4000, 0x54), (999, 0x7000, 0x10)]);
        let header = ReadyToRunHeader::read(&data).unwrap();

        assert_eq!(header.core.section_count(), 1);
    }

    #[test]
    fn crafted_invalid() {
        // Bad signature
        let mut data = crafted_header(&[(102, 0x4000, 0x54)]);
        data[0] = 0x00;
        assert!(ReadyToRunHeader::read(&data).is_err());

        // Duplicate section
        let data = crafted_header(&[(102, 0x4000, 0x54), (102, 0x5000, 0x54)]);
        assert!(ReadyToRunHeader::read(&data).is_err());

        // Truncated directory
        let mut data = crafted_header(&[(102, 0x4000, 0x54)]);
        data.truncate(data.len() - 4);
        assert!(ReadyToRunHeader::read(&data).is_err());

        // Unsupported major version
        let mut data = crafted_header(&[]);
        data[4] = 1;
        assert!(ReadyToRunHeader::read(&data).is_err());

        // Too short
        assert!(matches!(
            ReadyToRunHeader::read(&[0u8; 8]),
            Err(OutOfBounds)
        ));
    }
}
