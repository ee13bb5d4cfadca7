//! CLR 2.0 (Cor20) header parsing.
//!
//! This module defines the [`Cor20Header`] struct, which represents the main header for .NET
//! assemblies as found in the `IMAGE_DIRECTORY_ENTRY_COM_DESCRIPTOR` data directory of PE files.
//! For ReadyToRun images two fields matter beyond metadata location: the [`CorFlags::IL_LIBRARY`]
//! flag marking precompiled images, and the managed-native-header directory locating the
//! ReadyToRun container of single-assembly images.
//!
//! # Reference
//! - [ECMA-335 II.25.3.3](https://ecma-international.org/wp-content/uploads/ECMA-335_6th_edition_june_2012.pdf)

use bitflags::bitflags;

use crate::{file::parser::Parser, Error::OutOfBounds, Result};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    /// Runtime flags from the COR header (`COMIMAGE_FLAGS_*`).
    pub struct CorFlags: u32 {
        /// Image contains only IL code
        const ILONLY = 0x0000_0001;
        /// Image requires a 32-bit process
        const REQUIRES_32BIT = 0x0000_0002;
        /// Image is a precompiled (ReadyToRun) library; the managed-native header directory
        /// points at the container
        const IL_LIBRARY = 0x0000_0004;
        /// Image is strong-name signed
        const STRONGNAMESIGNED = 0x0000_0008;
        /// Image has a native entry point
        const NATIVE_ENTRYPOINT = 0x0000_0010;
        /// Runtime should track debug data
        const TRACKDEBUGDATA = 0x0001_0000;
        /// Image prefers a 32-bit process
        const PREFERS_32BIT = 0x0002_0000;
    }
}

/// The main header of the managed part of the image, located at the beginning of the
/// `IMAGE_DIRECTORY_ENTRY_COM_DESCRIPTOR` data directory.
///
/// This struct contains all fields defined by the ECMA-335 standard for the CLR 2.0 header.
/// The `managed_native_header_rva`/`size` pair is "always 0" per the standard but is where
/// crossgen2 places the ReadyToRun container directory of single-assembly images.
pub struct Cor20Header {
    /// Size of header in bytes
    pub cb: u32,
    /// The minimum version of runtime required to run this program
    pub major_runtime_version: u16,
    /// The minor portion of the version
    pub minor_runtime_version: u16,
    /// RVA of the `MetaData`
    pub meta_data_rva: u32,
    /// Size of the `MetaData`
    pub meta_data_size: u32,
    /// Flags describing this runtime image
    pub flags: CorFlags,
    /// Token for the `MethodDef` or File of the entry point for the image
    pub entry_point_token: u32,
    /// RVA of implementation specific resources
    pub resource_rva: u32,
    /// Size of implementation specific resources
    pub resource_size: u32,
    /// RVA of the hash data for this pe file used by the CLI loader for binding and versioning
    pub strong_name_signature_rva: u32,
    /// Size of the hash data
    pub strong_name_signature_size: u32,
    /// RVA of the ReadyToRun container for single-assembly precompiled images, 0 otherwise
    pub managed_native_header_rva: u32,
    /// Size of the ReadyToRun container directory
    pub managed_native_header_size: u32,
}

impl Cor20Header {
    /// Create a `Cor20Header` object from a sequence of bytes
    ///
    /// # Arguments
    /// * `data` - The byte slice from which this object shall be created
    ///
    /// # Errors
    /// Returns an error if the data is too short to contain a valid CLR header, or if any
    /// field validation fails per ECMA-335 II.25.3.3.
    pub fn read(data: &[u8]) -> Result<Cor20Header> {
        if data.len() < 72 {
            return Err(OutOfBounds);
        }

        let mut parser = Parser::new(data);

        let cb = parser.read_le::<u32>()?;
        if cb != 72 {
            return Err(malformed_error!(
                "Invalid CLR header size: expected 72, got {}",
                cb
            ));
        }

        let major_runtime_version = parser.read_le::<u16>()?;
        let minor_runtime_version = parser.read_le::<u16>()?;
        if major_runtime_version == 0 {
            return Err(malformed_error!(
                "Invalid major runtime version: {}",
                major_runtime_version
            ));
        }

        let meta_data_rva = parser.read_le::<u32>()?;
        if meta_data_rva == 0 {
            return Err(malformed_error!("Metadata RVA cannot be zero"));
        }

        let meta_data_size = parser.read_le::<u32>()?;
        if meta_data_size == 0 {
            return Err(malformed_error!("Metadata size cannot be zero"));
        }

        // Unknown bits are tolerated; crossgen2 has grown flags faster than the standard
        let flags = CorFlags::from_bits_retain(parser.read_le::<u32>()?);

        let entry_point_token = parser.read_le::<u32>()?;

        let resource_rva = parser.read_le::<u32>()?;
        let resource_size = parser.read_le::<u32>()?;

        let strong_name_signature_rva = parser.read_le::<u32>()?;
        let strong_name_signature_size = parser.read_le::<u32>()?;

        // code manager table, vtable fixups, export address table jumps - reserved, skipped
        for _ in 0..6 {
            let _ = parser.read_le::<u32>()?;
        }

        let managed_native_header_rva = parser.read_le::<u32>()?;
        let managed_native_header_size = parser.read_le::<u32>()?;
        if (managed_native_header_rva == 0) != (managed_native_header_size == 0) {
            return Err(malformed_error!("Managed native header values are invalid"));
        }

        Ok(Cor20Header {
            cb,
            major_runtime_version,
            minor_runtime_version,
            meta_data_rva,
            meta_data_size,
            flags,
            entry_point_token,
            resource_rva,
            resource_size,
            strong_name_signature_rva,
            strong_name_signature_size,
            managed_native_header_rva,
            managed_native_header_size,
        })
    }

    /// Returns the ReadyToRun container directory `(rva, size)`, if this image carries one.
    #[must_use]
    pub fn managed_native_header(&self) -> Option<(usize, usize)> {
        if self.managed_native_header_rva == 0 {
            return None;
        }

        Some((
            self.managed_native_header_rva as usize,
            self.managed_native_header_size as usize,
        ))
    }
}
