//! Target machine, operating system and architecture classification.
//!
//! ReadyToRun images for non-Windows targets mangle the COFF machine field by XORing it with a
//! per-OS tag, so that a Linux image is not loadable as a Windows one. Classification tries
//! every OS tag in a fixed order and keeps the first XOR that lands on a known machine
//! constant; an image where no tag matches is malformed.

use strum::{EnumIter, IntoEnumIterator};

use crate::Result;

/// Decoded COFF machine constant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum Machine {
    /// IMAGE_FILE_MACHINE_I386
    I386 = 0x014C,
    /// IMAGE_FILE_MACHINE_ARM
    Arm = 0x01C0,
    /// IMAGE_FILE_MACHINE_THUMB
    Thumb = 0x01C2,
    /// IMAGE_FILE_MACHINE_ARMNT
    ArmThumb2 = 0x01C4,
    /// IMAGE_FILE_MACHINE_AMD64
    Amd64 = 0x8664,
    /// IMAGE_FILE_MACHINE_ARM64
    Arm64 = 0xAA64,
}

impl Machine {
    /// Maps a raw COFF machine value to a known constant.
    #[must_use]
    pub fn from_coff(value: u16) -> Option<Machine> {
        match value {
            0x014C => Some(Machine::I386),
            0x01C0 => Some(Machine::Arm),
            0x01C2 => Some(Machine::Thumb),
            0x01C4 => Some(Machine::ArmThumb2),
            0x8664 => Some(Machine::Amd64),
            0xAA64 => Some(Machine::Arm64),
            _ => None,
        }
    }

    /// The architecture class this machine belongs to.
    #[must_use]
    pub fn architecture(self) -> Architecture {
        match self {
            Machine::I386 => Architecture::X86,
            Machine::Amd64 => Architecture::X64,
            Machine::Arm | Machine::Thumb | Machine::ArmThumb2 => Architecture::Arm32,
            Machine::Arm64 => Architecture::Arm64,
        }
    }
}

/// Target operating system, encoded as the XOR tag applied to the COFF machine field.
///
/// Declaration order is the classification order; the first tag producing a recognized
/// machine wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter)]
#[repr(u16)]
pub enum OperatingSystem {
    /// Windows images keep the plain machine value
    Windows = 0,
    /// Apple (macOS) tag
    Apple = 0x4644,
    /// FreeBSD tag
    FreeBsd = 0xADC4,
    /// Linux tag
    Linux = 0x7B79,
    /// NetBSD tag
    NetBsd = 0x1993,
}

/// Architecture class derived from the decoded machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Architecture {
    /// 32-bit x86
    X86,
    /// 64-bit x86
    X64,
    /// 32-bit Arm (Arm, Thumb, Thumb-2)
    Arm32,
    /// 64-bit Arm
    Arm64,
}

impl Architecture {
    /// Byte stride of one runtime-function record on this architecture.
    ///
    /// X64 records carry an explicit end RVA (start, end, unwind); all other architectures
    /// store only (start, unwind).
    #[must_use]
    pub fn runtime_function_stride(self) -> usize {
        match self {
            Architecture::X64 => 12,
            _ => 8,
        }
    }
}

/// Decodes the raw COFF machine field into its operating system and machine.
///
/// ## Arguments
///
/// * `coff_machine` - The machine value as stored in the COFF header.
///
/// # Errors
///
/// Returns [`crate::Error::Malformed`] when no OS tag produces a recognized machine.
pub fn classify(coff_machine: u16) -> Result<(OperatingSystem, Machine)> {
    for os in OperatingSystem::iter() {
        if let Some(machine) = Machine::from_coff(coff_machine ^ os as u16) {
            return Ok((os, machine));
        }
    }

    Err(malformed_error!("Invalid Machine - 0x{:04x}", coff_machine))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_windows() {
        let (os, machine) = classify(0x8664).unwrap();
        assert_eq!(os, OperatingSystem::Windows);
        assert_eq!(machine, Machine::Amd64);
        assert_eq!(machine.architecture(), Architecture::X64);
    }

    #[test]
    fn classify_linux_amd64() {
        // 0x8664 ^ 0x7B79
        let (os, machine) = classify(0xFD1D).unwrap();
        assert_eq!(os, OperatingSystem::Linux);
        assert_eq!(machine, Machine::Amd64);
        assert_eq!(machine.architecture(), Architecture::X64);
    }

    #[test]
    fn classify_all_pairs() {
        let machines = [
            Machine::I386,
            Machine::Arm,
            Machine::Thumb,
            Machine::ArmThumb2,
            Machine::Amd64,
            Machine::Arm64,
        ];

        for os in OperatingSystem::iter() {
            for machine in machines {
                let encoded = machine as u16 ^ os as u16;
                let (decoded_os, decoded_machine) = classify(encoded).unwrap();

                assert_eq!(decoded_os, os, "{os:?}/{machine:?}");
                assert_eq!(decoded_machine, machine, "{os:?}/{machine:?}");
            }
        }
    }

    #[test]
    fn classify_invalid() {
        assert!(classify(0x1234).is_err());
        assert!(classify(0x0000).is_err());
    }

    #[test]
    fn strides() {
        assert_eq!(Architecture::X64.runtime_function_stride(), 12);
        assert_eq!(Architecture::X86.runtime_function_stride(), 8);
        assert_eq!(Architecture::Arm32.runtime_function_stride(), 8);
        assert_eq!(Architecture::Arm64.runtime_function_stride(), 8);
    }
}
