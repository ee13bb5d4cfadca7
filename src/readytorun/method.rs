//! Method entrypoint records and the runtime-function table walker.
//!
//! ReadyToRun precompiles each managed method into one or more contiguous native code
//! fragments. The entrypoint tables (`MethodDefEntryPoints` for plain methods,
//! `InstanceMethodEntryPoints` for generic instantiations) map a method to the id of its first
//! runtime function; the walker then collects the method's fragments from the fixed-stride
//! runtime-function table until it reaches another method's entrypoint.

use bitflags::bitflags;

use crate::{
    file::parser::Parser,
    metadata::token::Token,
    readytorun::{
        machine::{Architecture, Machine},
        unwind::{GcInfo, UnwindInfo},
        ImageView,
    },
    Result,
};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    /// Flag word of an instance-method entrypoint signature (`READYTORUN_METHOD_SIG_*`).
    pub struct MethodSigFlags: u32 {
        /// The entry is an unboxing stub
        const UNBOXING_STUB = 0x01;
        /// The entry is an instantiating stub
        const INSTANTIATING_STUB = 0x02;
        /// Method type arguments follow the handle
        const METHOD_INSTANTIATION = 0x04;
        /// The method is identified by slot number instead of token
        const SLOT_INSTEAD_OF_TOKEN = 0x08;
        /// The handle is a `MemberRef` token rather than a `MethodDef`
        const MEMBER_REF_TOKEN = 0x10;
        /// A constrained-type signature follows
        const CONSTRAINED = 0x20;
        /// An owning-type signature precedes the handle
        const OWNER_TYPE = 0x40;
        /// The signature updates the module context for subsequent reads
        const UPDATE_CONTEXT = 0x80;
    }
}

/// Identifies the metadata reader a method's handle resolves against.
///
/// Readers are owned by the [`crate::ReadyToRunReader`]; records refer to them by handle so the
/// shared image buffer stays the only borrowed state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetadataSource {
    /// The primary metadata of a single-assembly image
    Primary,
    /// The system module (`System.Private.CoreLib`), the fallback scope of composite images
    System,
    /// A component assembly of a composite image, by `ComponentAssemblies` order
    Component(u32),
    /// A resolver-loaded assembly, by unified reference-assembly index
    Reference(u32),
}

/// One runtime-function record: a native code range with unwind and (for the method's entry
/// fragment) GC info.
#[derive(Debug, Clone)]
pub struct RuntimeFunction {
    /// Index of this record in the runtime-function table
    pub id: u32,
    /// Start RVA of the code fragment
    pub start_rva: u32,
    /// End RVA of the fragment; only X64 records store one
    pub end_rva: Option<u32>,
    /// RVA of the fragment's unwind record
    pub unwind_rva: u32,
    /// Offset of this fragment's code relative to the method start
    pub code_offset: u32,
    /// The decoded unwind record
    pub unwind_info: UnwindInfo,
    /// GC info location; present on the method's entry fragment only
    pub gc_info: Option<GcInfo>,
}

/// A compiled method: its metadata handle, entrypoint, and native fragments.
///
/// Non-generic methods come from the `MethodDefEntryPoints` array; generic instantiations come
/// from the `InstanceMethodEntryPoints` hashtable and additionally carry their decoded
/// signature parts and the hashtable bucket they were found under.
#[derive(Debug)]
pub struct Method {
    /// `MethodDef` or `MemberRef` token of the method
    pub handle: Token,
    /// Id of the method's first runtime function
    pub entry_id: u32,
    /// Absolute image offset of the method's fixup blob, when the loader must bind imports
    pub fixup_offset: Option<usize>,
    /// The metadata reader the handle resolves against
    pub source: MetadataSource,
    /// Rendered owning-type signature of an instance method
    pub owning_type: Option<String>,
    /// Rendered method type arguments of an instance method
    pub type_args: Vec<String>,
    /// Rendered constrained-type signature of an instance method
    pub constrained_type: Option<String>,
    /// Hashtable bucket (low hash byte) of an instance method entry
    pub bucket: Option<u8>,
    /// The method's native fragments, in table order
    pub runtime_functions: Vec<RuntimeFunction>,
}

/// Decodes a method entrypoint blob at the parser's position.
///
/// The first unsigned carries the runtime-function id in its upper bits. Bit 0 signals a fixup
/// blob; with bit 1 also set, a second unsigned follows and the fixup blob lives that many
/// bytes *before* the resulting read position, otherwise the fixup blob starts right at the
/// read position.
///
/// Returns `(runtime_function_id, fixup_offset)`.
///
/// # Errors
///
/// Returns an error if the blob is truncated or the fixup delta points before the image start.
pub fn read_method_entrypoint(parser: &mut Parser) -> Result<(u32, Option<usize>)> {
    let id = parser.read_unsigned()?;

    if id & 0x01 != 0 {
        let fixup_offset = if id & 0x02 != 0 {
            let delta = parser.read_unsigned()?;
            parser.pos().checked_sub(delta as usize).ok_or_else(|| {
                malformed_error!("Fixup delta {} points before the image start", delta)
            })?
        } else {
            parser.pos()
        };

        Ok((id >> 2, Some(fixup_offset)))
    } else {
        Ok((id >> 1, None))
    }
}

/// Collects the contiguous runtime functions of one method.
///
/// Starting at the method's entry id, records are read at the table's fixed stride until the
/// next id either leaves the table or belongs to another method's entrypoint. The entry
/// fragment gets its GC info located; later fragments only carry unwind info.
///
/// ## Arguments
///
/// * `image` - Address translation and buffer access.
/// * `section_offset` - File offset of the `RuntimeFunctions` section.
/// * `total_functions` - Total record count of the table.
/// * `entry_id` - The method's entry runtime-function id.
/// * `is_entry_point` - Entrypoint bitmap over the whole table.
/// * `machine` - The decoded target machine.
/// * `format_version` - The ReadyToRun major version.
///
/// # Errors
///
/// Returns an error if a record or its unwind data is truncated or unmappable.
pub fn walk_runtime_functions(
    image: &dyn ImageView,
    section_offset: usize,
    total_functions: u32,
    entry_id: u32,
    is_entry_point: &[bool],
    machine: Machine,
    format_version: u16,
) -> Result<Vec<RuntimeFunction>> {
    let architecture = machine.architecture();
    let stride = architecture.runtime_function_stride();
    let data = image.data();

    let mut functions = Vec::new();
    let mut id = entry_id;

    loop {
        let mut parser = Parser::new(data);
        parser.seek(section_offset + id as usize * stride)?;

        let start_rva = parser.read_le::<u32>()?;
        let end_rva = if architecture == Architecture::X64 {
            Some(parser.read_le::<u32>()?)
        } else {
            None
        };
        let unwind_rva = parser.read_le::<u32>()?;

        let unwind_offset = image.rva_to_offset(unwind_rva)?;
        let unwind_info = UnwindInfo::read(data, unwind_offset, machine)?;
        let gc_info = (id == entry_id)
            .then(|| GcInfo::locate(unwind_offset, &unwind_info, machine, format_version));

        functions.push(RuntimeFunction {
            id,
            start_rva,
            end_rva,
            unwind_rva,
            code_offset: 0,
            unwind_info,
            gc_info,
        });

        id += 1;
        if id >= total_functions || is_entry_point.get(id as usize).copied().unwrap_or(false) {
            break;
        }
    }

    // Second pass: accumulate fragment sizes into per-fragment code offsets. Without an end
    // RVA the fragment runs up to the next record's start.
    let mut code_offset = 0u32;
    let next_starts: Vec<Option<u32>> = functions
        .iter()
        .skip(1)
        .map(|f| Some(f.start_rva))
        .chain(std::iter::once(None))
        .collect();

    for (function, next_start) in functions.iter_mut().zip(next_starts) {
        function.code_offset = code_offset;

        let size = match (function.end_rva, next_start) {
            (Some(end), _) => end.saturating_sub(function.start_rva),
            (None, Some(next)) => next.saturating_sub(function.start_rva),
            (None, None) => 0,
        };
        code_offset = code_offset.saturating_add(size);
    }

    Ok(functions)
}
