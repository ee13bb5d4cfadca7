//! Architecture-specific unwind records and GC info placement.
//!
//! The runtime-function walker needs just enough of each architecture's unwind encoding to know
//! where the record ends, because the method's GC info begins immediately after it (except on
//! x86, where the GC info sits at the unwind offset itself). Full unwind semantics and GC info
//! decoding are collaborator concerns; the types here carry the raw header fields and the
//! computed record size, nothing more.

use crate::{
    file::parser::Parser,
    readytorun::machine::{Architecture, Machine},
    Result,
};

/// Amd64 `UNWIND_INFO` header, PE unwind format.
#[derive(Debug, Clone)]
pub struct Amd64UnwindInfo {
    /// Format version (3 bits)
    pub version: u8,
    /// `UNW_FLAG_*` bits
    pub flags: u8,
    /// Length of the function prolog in bytes
    pub size_of_prolog: u8,
    /// Number of 16-bit unwind code slots
    pub count_of_unwind_codes: u8,
    /// Frame pointer register, 0 if none
    pub frame_register: u8,
    /// Scaled frame pointer offset
    pub frame_offset: u8,
    /// Raw unwind code slots
    pub unwind_codes: Vec<u16>,
    size: usize,
}

impl Amd64UnwindInfo {
    fn read(parser: &mut Parser) -> Result<Amd64UnwindInfo> {
        let first = parser.read_le::<u8>()?;
        let size_of_prolog = parser.read_le::<u8>()?;
        let count_of_unwind_codes = parser.read_le::<u8>()?;
        let frame = parser.read_le::<u8>()?;

        let mut unwind_codes = Vec::with_capacity(count_of_unwind_codes as usize);
        for _ in 0..count_of_unwind_codes {
            unwind_codes.push(parser.read_le::<u16>()?);
        }

        // Codes are padded to a 4-byte boundary; ReadyToRun always appends the 4-byte
        // personality routine RVA after them
        let size = (4 + 2 * count_of_unwind_codes as usize + 3) / 4 * 4 + 4;

        Ok(Amd64UnwindInfo {
            version: first & 0x07,
            flags: first >> 3,
            size_of_prolog,
            count_of_unwind_codes,
            frame_register: frame & 0x0F,
            frame_offset: frame >> 4,
            unwind_codes,
            size,
        })
    }
}

/// Arm/Arm64 `.xdata` record header.
#[derive(Debug, Clone)]
pub struct XdataUnwindInfo {
    /// Length of the function in bytes
    pub function_length: u32,
    /// Format version (2 bits)
    pub version: u8,
    /// Exception data present (`X` bit)
    pub has_exception_data: bool,
    /// Single packed epilog (`E` bit)
    pub packed_epilog: bool,
    /// Number of epilog scopes
    pub epilog_count: u32,
    /// Number of 32-bit unwind code words
    pub code_words: u32,
    size: usize,
}

impl XdataUnwindInfo {
    fn read(parser: &mut Parser) -> Result<XdataUnwindInfo> {
        let header = parser.read_le::<u32>()?;

        let function_length = (header & 0x3FFFF) * 4;
        let version = ((header >> 18) & 0x3) as u8;
        let has_exception_data = (header >> 20) & 1 != 0;
        let packed_epilog = (header >> 21) & 1 != 0;
        let mut epilog_count = (header >> 22) & 0x1F;
        let mut code_words = (header >> 27) & 0x1F;

        let mut size = 4;
        if epilog_count == 0 && code_words == 0 {
            // Extension word carries the real counts
            let extension = parser.read_le::<u32>()?;
            epilog_count = extension & 0xFFFF;
            code_words = (extension >> 16) & 0xFF;
            size += 4;
        }

        if !packed_epilog {
            size += 4 * epilog_count as usize;
        }
        size += 4 * code_words as usize;
        if has_exception_data {
            size += 4;
        }

        Ok(XdataUnwindInfo {
            function_length,
            version,
            has_exception_data,
            packed_epilog,
            epilog_count,
            code_words,
            size,
        })
    }
}

/// Decoded unwind record of one runtime function, dispatched on the image's machine.
#[derive(Debug, Clone)]
pub enum UnwindInfo {
    /// x86 carries no unwind record; the offset marks where the GC info starts
    X86,
    /// Amd64 `UNWIND_INFO`
    Amd64(Amd64UnwindInfo),
    /// Arm (Thumb-2) `.xdata`
    Arm(XdataUnwindInfo),
    /// Arm64 `.xdata`
    Arm64(XdataUnwindInfo),
}

impl UnwindInfo {
    /// Reads the unwind record for `machine` at the given image offset.
    ///
    /// ## Arguments
    ///
    /// * `data` - The image buffer.
    /// * `offset` - Absolute offset of the unwind record.
    /// * `machine` - The decoded target machine.
    ///
    /// # Errors
    ///
    /// Returns an error if the record is truncated.
    pub fn read(data: &[u8], offset: usize, machine: Machine) -> Result<UnwindInfo> {
        let mut parser = Parser::new(data);
        parser.seek(offset)?;

        match machine.architecture() {
            Architecture::X86 => Ok(UnwindInfo::X86),
            Architecture::X64 => Ok(UnwindInfo::Amd64(Amd64UnwindInfo::read(&mut parser)?)),
            Architecture::Arm32 => Ok(UnwindInfo::Arm(XdataUnwindInfo::read(&mut parser)?)),
            Architecture::Arm64 => Ok(UnwindInfo::Arm64(XdataUnwindInfo::read(&mut parser)?)),
        }
    }

    /// Byte size of the record; the GC info of an entry fragment begins right after it
    /// (at the record itself on x86).
    #[must_use]
    pub fn size(&self) -> usize {
        match self {
            UnwindInfo::X86 => 0,
            UnwindInfo::Amd64(info) => info.size,
            UnwindInfo::Arm(info) | UnwindInfo::Arm64(info) => info.size,
        }
    }
}

/// Location of a method's GC info blob. Content decoding is a collaborator concern.
#[derive(Debug, Clone)]
pub struct GcInfo {
    /// Absolute image offset where the GC info begins
    pub offset: usize,
    /// The machine whose GC encoding applies. `ArmThumb2` reportedly shares the Amd64
    /// layout; see the format notes before relying on it
    pub machine: Machine,
    /// ReadyToRun major version selecting the GC info encoding revision
    pub format_version: u16,
}

impl GcInfo {
    /// Computes the GC info location for a method entry fragment.
    ///
    /// ## Arguments
    ///
    /// * `unwind_offset` - Absolute offset of the fragment's unwind record.
    /// * `unwind` - The decoded unwind record.
    /// * `machine` - The decoded target machine.
    /// * `format_version` - The ReadyToRun major version.
    #[must_use]
    pub fn locate(
        unwind_offset: usize,
        unwind: &UnwindInfo,
        machine: Machine,
        format_version: u16,
    ) -> GcInfo {
        let offset = match unwind {
            UnwindInfo::X86 => unwind_offset,
            _ => unwind_offset + unwind.size(),
        };

        GcInfo {
            offset,
            machine: Self::decoder_machine(machine),
            format_version,
        }
    }

    /// Maps a machine to the machine whose GC info decoder applies.
    #[must_use]
    pub fn decoder_machine(machine: Machine) -> Machine {
        match machine {
            Machine::ArmThumb2 => Machine::Amd64,
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn amd64_unwind() {
        // version 1, no flags, prolog 8, 2 code slots, frame rbp+0x3
        let data = [
            0x01, 0x08, 0x02, 0x35, 0x0A, 0x00, 0x0B, 0x00, 0xEE, 0xEE, 0xEE, 0xEE,
        ];
        let unwind = UnwindInfo::read(&data, 0, Machine::Amd64).unwrap();

        let UnwindInfo::Amd64(info) = &unwind else {
            panic!("wrong variant");
        };
        assert_eq!(info.version, 1);
        assert_eq!(info.flags, 0);
        assert_eq!(info.size_of_prolog, 8);
        assert_eq!(info.count_of_unwind_codes, 2);
        assert_eq!(info.frame_register, 5);
        assert_eq!(info.frame_offset, 3);
        assert_eq!(info.unwind_codes, vec![0x000A, 0x000B]);

        // 4 header + 4 codes + 4 personality
        assert_eq!(unwind.size(), 12);
    }

    #[test]
    fn amd64_unwind_code_padding() {
        // 1 code slot pads to a full word before the personality RVA
        let data = [0x01, 0x04, 0x01, 0x00, 0x0A, 0x00, 0xEE, 0xEE, 0xEE, 0xEE];
        let unwind = UnwindInfo::read(&data, 0, Machine::Amd64).unwrap();
        assert_eq!(unwind.size(), 12);
    }

    #[test]
    fn x86_unwind() {
        let data = [0xAA, 0xBB];
        let unwind = UnwindInfo::read(&data, 0, Machine::I386).unwrap();
        assert!(matches!(unwind, UnwindInfo::X86));
        assert_eq!(unwind.size(), 0);
    }

    #[test]
    fn arm64_unwind() {
        // function length 0x40 bytes (0x10 words), 1 epilog scope, 1 code word, no X/E
        let header: u32 = 0x10 | (1 << 22) | (1 << 27);
        let mut data = header.to_le_bytes().to_vec();
        data.extend_from_slice(&[0u8; 8]); // epilog scope + code word

        let unwind = UnwindInfo::read(&data, 0, Machine::Arm64).unwrap();
        let UnwindInfo::Arm64(info) = &unwind else {
            panic!("wrong variant");
        };
        assert_eq!(info.function_length, 0x40);
        assert_eq!(info.epilog_count, 1);
        assert_eq!(info.code_words, 1);
        assert!(!info.has_exception_data);
        assert_eq!(unwind.size(), 12);
    }

    #[test]
    fn arm64_unwind_extended() {
        // Zero counts in the header move them to an extension word
        let header: u32 = 0x10;
        let extension: u32 = 2 | (1 << 16); // 2 epilogs, 1 code word
        let mut data = header.to_le_bytes().to_vec();
        data.extend_from_slice(&extension.to_le_bytes());
        data.extend_from_slice(&[0u8; 12]);

        let unwind = UnwindInfo::read(&data, 0, Machine::Arm64).unwrap();
        // 4 header + 4 extension + 8 epilog scopes + 4 code words
        assert_eq!(unwind.size(), 20);
    }

    #[test]
    fn gcinfo_placement() {
        let data = [0x01, 0x04, 0x00, 0x00, 0xEE, 0xEE, 0xEE, 0xEE, 0x99];
        let unwind = UnwindInfo::read(&data, 0, Machine::Amd64).unwrap();
        assert_eq!(unwind.size(), 8);

        let gc = GcInfo::locate(0, &unwind, Machine::Amd64, 9);
        assert_eq!(gc.offset, 8);
        assert_eq!(gc.machine, Machine::Amd64);
        assert_eq!(gc.format_version, 9);

        let x86 = UnwindInfo::X86;
        let gc = GcInfo::locate(0x100, &x86, Machine::I386, 9);
        assert_eq!(gc.offset, 0x100);

        // Thumb-2 GC info uses the Amd64 decoder
        assert_eq!(GcInfo::decoder_machine(Machine::ArmThumb2), Machine::Amd64);
        assert_eq!(GcInfo::decoder_machine(Machine::Arm64), Machine::Arm64);
    }

    #[test]
    fn truncated() {
        let data = [0x01, 0x04];
        assert!(UnwindInfo::read(&data, 0, Machine::Amd64).is_err());
    }
}
