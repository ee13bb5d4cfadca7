//! The top-level ReadyToRun reader.
//!
//! [`ReadyToRunReader`] classifies the image (machine, OS, architecture, composite-or-not),
//! locates and parses the container header, and materializes the section products: method
//! entrypoints, runtime functions, import sections, available types, the compiler identifier
//! and the manifest reference index. Exception and debug info tables are built on first
//! access.
//!
//! # Examples
//!
//! ```rust,no_run
//! use r2rscope::ReadyToRunReader;
//! use std::path::Path;
//!
//! let reader = ReadyToRunReader::from_file(Path::new("app.r2r.dll"))?;
//! println!(
//!     "{:?}/{:?}, composite: {}, {} methods",
//!     reader.operating_system(),
//!     reader.machine(),
//!     reader.composite(),
//!     reader.methods().len()
//! );
//!
//! for method in reader.methods() {
//!     println!(
//!         "  {} -> runtime function {} ({} fragments)",
//!         method.handle,
//!         method.entry_id,
//!         method.runtime_functions.len()
//!     );
//! }
//! # Ok::<(), r2rscope::Error>(())
//! ```

use std::{
    path::{Path, PathBuf},
    sync::{Arc, OnceLock},
};

use rustc_hash::FxHashMap;

use crate::{
    file::{parser::Parser, File},
    metadata::{
        cor20header::{Cor20Header, CorFlags},
        reader::EcmaMetadata,
        resolver::{AssemblyResolver, NullResolver},
        token::Token,
    },
    readytorun::{
        assemblies::AssemblyIndex,
        header::{ReadyToRunCoreHeader, ReadyToRunHeader, SectionType},
        imports::{parse_import_sections, ImportSection, NameFormatter, RawNameFormatter},
        machine::{classify, Architecture, Machine, OperatingSystem},
        method::{
            read_method_entrypoint, walk_runtime_functions, Method, MetadataSource,
            MethodSigFlags,
        },
        narray::NativeArray,
        nhashtable::NativeHashtable,
        signature::read_type_signature,
    },
    Error::NotSupported,
    Result,
};

/// The PE export name under which composite images publish their container header.
pub const RTR_HEADER_EXPORT: &str = "RTR_HEADER";

/// Exception-handling info of one method: where its EH clause table lives.
#[derive(Debug, Clone)]
pub struct EHInfo {
    /// RVA of the clause table
    pub rva: u32,
    /// File offset of the clause table
    pub offset: usize,
    /// Number of 24-byte clauses, bounded by the next table's start
    pub clause_count: u32,
}

/// A parsed ReadyToRun image.
///
/// All section products are read-only after construction; see the module docs for the
/// materialization rules.
pub struct ReadyToRunReader {
    file: File,
    filename: PathBuf,
    machine: Machine,
    operating_system: OperatingSystem,
    architecture: Architecture,
    composite: bool,
    header: ReadyToRunHeader,
    component_headers: Vec<ReadyToRunCoreHeader>,
    assemblies: AssemblyIndex,
    runtime_function_count: u32,
    is_entry_point: Vec<bool>,
    methods: Vec<Method>,
    available_types: Vec<String>,
    compiler_identifier: String,
    import_sections: Vec<ImportSection>,
    import_cell_names: FxHashMap<u32, String>,
    debug_info: OnceLock<FxHashMap<u32, usize>>,
    eh_info: OnceLock<FxHashMap<u32, EHInfo>>,
}

impl ReadyToRunReader {
    /// Loads a ReadyToRun image from disk without cross-assembly resolution.
    ///
    /// ## Arguments
    ///
    /// * `path` - Path to the image.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, is not a PE, or carries no ReadyToRun
    /// container.
    pub fn from_file(path: &Path) -> Result<ReadyToRunReader> {
        Self::from_file_with_resolver(path, Box::new(NullResolver))
    }

    /// Loads a ReadyToRun image from disk with an assembly resolver for cross-assembly
    /// lookups.
    ///
    /// ## Arguments
    ///
    /// * `path` - Path to the image.
    /// * `resolver` - Locates reference assemblies and the system module.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, is not a PE, or carries no ReadyToRun
    /// container.
    pub fn from_file_with_resolver(
        path: &Path,
        resolver: Box<dyn AssemblyResolver>,
    ) -> Result<ReadyToRunReader> {
        let file = File::from_file(path)?;
        Self::from_pe(file, path.to_path_buf(), resolver, &RawNameFormatter)
    }

    /// Builds a reader over an already-loaded PE image.
    ///
    /// ## Arguments
    ///
    /// * `file` - The parsed PE image.
    /// * `filename` - Display name / resolver anchor for the image.
    /// * `resolver` - Locates reference assemblies and the system module.
    /// * `formatter` - Renders import-cell signatures into symbolic names.
    ///
    /// # Errors
    ///
    /// Returns an error if the image carries no ReadyToRun container or any section is
    /// malformed.
    pub fn from_pe(
        file: File,
        filename: PathBuf,
        resolver: Box<dyn AssemblyResolver>,
        formatter: &dyn NameFormatter,
    ) -> Result<ReadyToRunReader> {
        let (operating_system, machine) = classify(file.machine())?;
        let architecture = machine.architecture();

        // Locate the container: managed-native header of the COR directory, or the
        // RTR_HEADER export for composite images
        let cor20 = match file.clr_directory() {
            Some((rva, size)) => {
                let offset = file.rva_to_offset(rva)?;
                if size < 72 {
                    return Err(malformed_error!("CLR directory too small - {}", size));
                }
                Some(Cor20Header::read(file.data_slice(offset, 72)?)?)
            }
            None => None,
        };

        let (composite, header_rva) =
            match cor20.as_ref().and_then(Cor20Header::managed_native_header) {
                Some((rva, _)) => (false, rva),
                None => match file.export_rva(RTR_HEADER_EXPORT) {
                    Some(rva) => (true, rva),
                    None => {
                        return Err(malformed_error!("RTR_HEADER export not found"));
                    }
                },
            };

        if !composite {
            // A single-assembly precompiled image must advertise itself as one
            let cor20 = cor20.as_ref().ok_or(NotSupported)?;
            if !cor20.flags.contains(CorFlags::IL_LIBRARY) {
                return Err(NotSupported);
            }
        }

        let header_offset = file.rva_to_offset(header_rva)?;
        if header_offset >= file.len() {
            return Err(crate::Error::OutOfBounds);
        }
        let header = ReadyToRunHeader::read(&file.data()[header_offset..])?;

        let component_headers = if composite {
            Self::parse_component_headers(&file, &header)?
        } else {
            Vec::new()
        };

        // Metadata back-ends
        let primary = match (&cor20, composite) {
            (Some(cor20), false) => {
                let offset = file.rva_to_offset(cor20.meta_data_rva as usize)?;
                let blob = file
                    .data_slice(offset, cor20.meta_data_size as usize)?
                    .to_vec();
                Some(Arc::new(EcmaMetadata::read(blob)?))
            }
            _ => None,
        };

        let manifest = match header.core.section(SectionType::ManifestMetadata) {
            Some(section) => {
                let offset = file.rva_to_offset(section.rva as usize)?;
                let blob = file.data_slice(offset, section.size as usize)?.to_vec();
                Some(Arc::new(EcmaMetadata::read(blob)?))
            }
            None => None,
        };

        let assemblies = AssemblyIndex::new(filename.clone(), primary, manifest, resolver)?;

        // Runtime-function table dimensions drive the entrypoint bitmap
        let runtime_function_count = match header.core.section(SectionType::RuntimeFunctions) {
            Some(section) => {
                let stride = architecture.runtime_function_stride();
                if section.size as usize % stride != 0 {
                    return Err(malformed_error!(
                        "RuntimeFunctions size {} is not a multiple of the record stride {}",
                        section.size,
                        stride
                    ));
                }
                section.size / stride as u32
            }
            None => 0,
        };
        let mut is_entry_point = vec![false; runtime_function_count as usize];

        // Method entrypoints: the image's own, or per component for composite images
        let mut methods = Vec::new();
        if let Some(section) = header.core.section(SectionType::MethodDefEntryPoints) {
            methods.extend(Self::parse_methoddef_entrypoints(
                &file,
                file.rva_to_offset(section.rva as usize)?,
                MetadataSource::Primary,
                runtime_function_count,
                &mut is_entry_point,
            )?);
        }
        for (index, component) in component_headers.iter().enumerate() {
            if let Some(section) = component.section(SectionType::MethodDefEntryPoints) {
                methods.extend(Self::parse_methoddef_entrypoints(
                    &file,
                    file.rva_to_offset(section.rva as usize)?,
                    MetadataSource::Component(index as u32),
                    runtime_function_count,
                    &mut is_entry_point,
                )?);
            }
        }

        if let Some(section) = header.core.section(SectionType::InstanceMethodEntryPoints) {
            methods.extend(Self::parse_instance_entrypoints(
                &file,
                file.rva_to_offset(section.rva as usize)?,
                composite,
                &assemblies,
                runtime_function_count,
                &mut is_entry_point,
            )?);
        }

        // With the entrypoint bitmap complete, collect each method's fragments
        if let Some(section) = header.core.section(SectionType::RuntimeFunctions) {
            let section_offset = file.rva_to_offset(section.rva as usize)?;
            for method in &mut methods {
                method.runtime_functions = walk_runtime_functions(
                    &file,
                    section_offset,
                    runtime_function_count,
                    method.entry_id,
                    &is_entry_point,
                    machine,
                    header.major_version,
                )?;
            }
        }

        let available_types =
            Self::parse_available_types(&file, &header, &component_headers, composite, &assemblies);

        let compiler_identifier = match header.core.section(SectionType::CompilerIdentifier) {
            Some(section) => {
                let offset = file.rva_to_offset(section.rva as usize)?;
                let bytes = file.data_slice(offset, section.size as usize)?;
                match std::str::from_utf8(bytes) {
                    Ok(value) => value.trim_end_matches('\0').to_string(),
                    Err(_) => {
                        return Err(malformed_error!("Compiler identifier is not valid UTF-8"))
                    }
                }
            }
            None => String::new(),
        };

        let mut import_cell_names = FxHashMap::default();
        let import_sections = match header.core.section(SectionType::ImportSections) {
            Some(section) => parse_import_sections(
                &file,
                file.rva_to_offset(section.rva as usize)?,
                section.size as usize,
                machine,
                formatter,
                &mut import_cell_names,
            )?,
            None => Vec::new(),
        };

        Ok(ReadyToRunReader {
            file,
            filename,
            machine,
            operating_system,
            architecture,
            composite,
            header,
            component_headers,
            assemblies,
            runtime_function_count,
            is_entry_point,
            methods,
            available_types,
            compiler_identifier,
            import_sections,
            import_cell_names,
            debug_info: OnceLock::new(),
            eh_info: OnceLock::new(),
        })
    }

    fn parse_component_headers(
        file: &File,
        header: &ReadyToRunHeader,
    ) -> Result<Vec<ReadyToRunCoreHeader>> {
        let Some(section) = header.core.section(SectionType::ComponentAssemblies) else {
            return Ok(Vec::new());
        };

        let offset = file.rva_to_offset(section.rva as usize)?;
        let end = offset + section.size as usize;

        let mut parser = Parser::new(file.data());
        parser.seek(offset)?;

        let mut components = Vec::new();
        while parser.pos() < end {
            components.push(ReadyToRunCoreHeader::read(&mut parser)?);
        }

        Ok(components)
    }

    fn parse_methoddef_entrypoints(
        file: &File,
        section_offset: usize,
        source: MetadataSource,
        runtime_function_count: u32,
        is_entry_point: &mut [bool],
    ) -> Result<Vec<Method>> {
        let array = NativeArray::parse(file.data(), section_offset)?;

        let mut methods = Vec::new();
        for rid in 1..=array.count() {
            let Some(payload) = array.try_get_at(rid - 1)? else {
                continue;
            };

            let mut parser = Parser::new(file.data());
            parser.seek(payload)?;
            let (entry_id, fixup_offset) = read_method_entrypoint(&mut parser)?;

            if entry_id >= runtime_function_count {
                return Err(malformed_error!(
                    "Method {} entrypoint {} out of range ({} runtime functions)",
                    rid,
                    entry_id,
                    runtime_function_count
                ));
            }
            is_entry_point[entry_id as usize] = true;

            methods.push(Method {
                handle: Token::method_def(rid),
                entry_id,
                fixup_offset,
                source,
                owning_type: None,
                type_args: Vec::new(),
                constrained_type: None,
                bucket: None,
                runtime_functions: Vec::new(),
            });
        }

        Ok(methods)
    }

    fn parse_instance_entrypoints(
        file: &File,
        section_offset: usize,
        composite: bool,
        assemblies: &AssemblyIndex,
        runtime_function_count: u32,
        is_entry_point: &mut [bool],
    ) -> Result<Vec<Method>> {
        let table = NativeHashtable::parse(file.data(), section_offset)?;

        let mut methods = Vec::new();
        for entry in table.enumerate_all() {
            let (bucket, payload) = entry?;

            let mut parser = Parser::new(file.data());
            parser.seek(payload)?;

            let flags = MethodSigFlags::from_bits_retain(parser.read_unsigned()?);

            let mut source = if composite {
                MetadataSource::System
            } else {
                MetadataSource::Primary
            };

            let mut owning_type = None;
            if flags.contains(MethodSigFlags::OWNER_TYPE) {
                let (name, updated) = read_type_signature(&mut parser, source, assemblies)?;
                owning_type = Some(name);
                source = updated;
            }

            if flags.contains(MethodSigFlags::SLOT_INSTEAD_OF_TOKEN) {
                return Err(crate::Error::NotImplemented(
                    "slot-encoded instance method entries",
                ));
            }

            let rid = parser.read_unsigned()?;
            let handle = if flags.contains(MethodSigFlags::MEMBER_REF_TOKEN) {
                Token::member_ref(rid)
            } else {
                Token::method_def(rid)
            };

            let mut type_args = Vec::new();
            if flags.contains(MethodSigFlags::METHOD_INSTANTIATION) {
                let count = parser.read_unsigned()?;
                for _ in 0..count {
                    let (name, _) = read_type_signature(&mut parser, source, assemblies)?;
                    type_args.push(name);
                }
            }

            let mut constrained_type = None;
            if flags.contains(MethodSigFlags::CONSTRAINED) {
                let (name, _) = read_type_signature(&mut parser, source, assemblies)?;
                constrained_type = Some(name);
            }

            let (entry_id, fixup_offset) = read_method_entrypoint(&mut parser)?;

            // Unlike the MethodDef path, an out-of-range id drops the entry silently; some
            // format variants emit instance entries without a runtime function
            if entry_id >= runtime_function_count {
                continue;
            }
            is_entry_point[entry_id as usize] = true;

            methods.push(Method {
                handle,
                entry_id,
                fixup_offset,
                source,
                owning_type,
                type_args,
                constrained_type,
                bucket: Some(bucket),
                runtime_functions: Vec::new(),
            });
        }

        Ok(methods)
    }

    fn parse_available_types(
        file: &File,
        header: &ReadyToRunHeader,
        component_headers: &[ReadyToRunCoreHeader],
        composite: bool,
        assemblies: &AssemblyIndex,
    ) -> Vec<String> {
        let mut sections = Vec::new();
        if !composite {
            if let Some(section) = header.core.section(SectionType::AvailableTypes) {
                sections.push((section, MetadataSource::Primary));
            }
        }
        for (index, component) in component_headers.iter().enumerate() {
            if let Some(section) = component.section(SectionType::AvailableTypes) {
                sections.push((section, MetadataSource::Component(index as u32)));
            }
        }

        let mut names = Vec::new();
        for (section, source) in sections {
            // Per-entry failures are skipped: a well-formed table can still reference rows
            // this reader cannot resolve
            let _ = Self::collect_available_types(file, section.rva, source, assemblies, &mut names);
        }
        names
    }

    fn collect_available_types(
        file: &File,
        rva: u32,
        source: MetadataSource,
        assemblies: &AssemblyIndex,
        names: &mut Vec<String>,
    ) -> Result<()> {
        let offset = file.rva_to_offset(rva as usize)?;
        let table = NativeHashtable::parse(file.data(), offset)?;

        for entry in table.enumerate_all() {
            let (_, payload) = entry?;

            let mut parser = Parser::new(file.data());
            if parser.seek(payload).is_err() {
                continue;
            }
            let Ok(value) = parser.read_unsigned() else {
                continue;
            };

            let rid = value >> 1;
            let rendered = if value & 1 != 0 {
                assemblies
                    .metadata_for(source)
                    .and_then(|metadata| metadata.exported_type_name(rid))
                    .map(|name| format!("exported {name}"))
            } else {
                assemblies
                    .metadata_for(source)
                    .and_then(|metadata| metadata.type_def_name(rid))
            };

            if let Ok(name) = rendered {
                names.push(name);
            }
        }

        Ok(())
    }

    /// The decoded target machine.
    #[must_use]
    pub fn machine(&self) -> Machine {
        self.machine
    }

    /// The decoded target operating system.
    #[must_use]
    pub fn operating_system(&self) -> OperatingSystem {
        self.operating_system
    }

    /// The architecture class of the target machine.
    #[must_use]
    pub fn architecture(&self) -> Architecture {
        self.architecture
    }

    /// Whether this is a composite image bundling multiple component assemblies.
    #[must_use]
    pub fn composite(&self) -> bool {
        self.composite
    }

    /// The image's preferred load address.
    #[must_use]
    pub fn image_base(&self) -> u64 {
        self.file.imagebase()
    }

    /// The parsed ReadyToRun header.
    #[must_use]
    pub fn header(&self) -> &ReadyToRunHeader {
        &self.header
    }

    /// Per-component core headers of a composite image; empty otherwise.
    #[must_use]
    pub fn component_headers(&self) -> &[ReadyToRunCoreHeader] {
        &self.component_headers
    }

    /// All compiled methods in discovery order: `MethodDef` entrypoints first, then instance
    /// entrypoints.
    #[must_use]
    pub fn methods(&self) -> &[Method] {
        &self.methods
    }

    /// The instance (generic) methods, each carrying its hashtable bucket tag.
    pub fn instance_methods(&self) -> impl Iterator<Item = &Method> {
        self.methods.iter().filter(|method| method.bucket.is_some())
    }

    /// Total record count of the runtime-function table.
    #[must_use]
    pub fn runtime_function_count(&self) -> u32 {
        self.runtime_function_count
    }

    /// The entrypoint bitmap over the runtime-function table.
    #[must_use]
    pub fn entry_points(&self) -> &[bool] {
        &self.is_entry_point
    }

    /// Formatted names of the available types, `"exported "`-prefixed for `ExportedType`
    /// rows.
    #[must_use]
    pub fn available_types(&self) -> &[String] {
        &self.available_types
    }

    /// The compiler identifier string; empty when the section is absent.
    #[must_use]
    pub fn compiler_identifier(&self) -> &str {
        &self.compiler_identifier
    }

    /// The parsed import sections.
    #[must_use]
    pub fn import_sections(&self) -> &[ImportSection] {
        &self.import_sections
    }

    /// Map from indirection-cell RVA to its symbolic name.
    #[must_use]
    pub fn import_cell_names(&self) -> &FxHashMap<u32, String> {
        &self.import_cell_names
    }

    /// The primary metadata reader; `None` for composite images.
    #[must_use]
    pub fn metadata(&self) -> Option<&Arc<EcmaMetadata>> {
        self.assemblies.primary()
    }

    /// The manifest metadata reader, when the image carries one.
    #[must_use]
    pub fn manifest_metadata(&self) -> Option<&Arc<EcmaMetadata>> {
        self.assemblies.manifest()
    }

    /// Simple names of the manifest's extra assembly references, in table order.
    #[must_use]
    pub fn manifest_reference_assemblies(&self) -> &[String] {
        self.assemblies.manifest_references()
    }

    /// Opens (or returns the memoized) metadata behind a unified reference-assembly index.
    ///
    /// # Errors
    ///
    /// Returns an error for an invalid index or an unresolvable assembly.
    pub fn assembly_at(&self, ref_index: u32) -> Result<Arc<EcmaMetadata>> {
        self.assemblies.assembly_at(ref_index)
    }

    /// The path or display name this reader was constructed from.
    #[must_use]
    pub fn filename(&self) -> &Path {
        &self.filename
    }

    /// Map from runtime-function id to the image offset of its debug info, built on first
    /// access.
    ///
    /// # Errors
    ///
    /// Returns an error if the `DebugInfo` section is malformed. Failures are not cached.
    pub fn runtime_function_debug_info(&self) -> Result<&FxHashMap<u32, usize>> {
        if let Some(map) = self.debug_info.get() {
            return Ok(map);
        }

        let map = self.parse_debug_info()?;
        Ok(self.debug_info.get_or_init(|| map))
    }

    fn parse_debug_info(&self) -> Result<FxHashMap<u32, usize>> {
        let Some(section) = self.header.core.section(SectionType::DebugInfo) else {
            return Ok(FxHashMap::default());
        };

        let offset = self.file.rva_to_offset(section.rva as usize)?;
        let array = NativeArray::parse(self.file.data(), offset)?;

        let mut map = FxHashMap::default();
        for id in 0..array.count() {
            if let Some(payload) = array.try_get_at(id)? {
                map.insert(id, payload);
            }
        }
        Ok(map)
    }

    /// Map from method start RVA to its exception-handling info, built on first access.
    ///
    /// # Errors
    ///
    /// Returns an error if the `ExceptionInfo` section is malformed. Failures are not cached.
    pub fn runtime_function_eh_info(&self) -> Result<&FxHashMap<u32, EHInfo>> {
        if let Some(map) = self.eh_info.get() {
            return Ok(map);
        }

        let map = self.parse_eh_info()?;
        Ok(self.eh_info.get_or_init(|| map))
    }

    fn parse_eh_info(&self) -> Result<FxHashMap<u32, EHInfo>> {
        // One (method RVA, EH info RVA) lookup pair, and one EH clause record
        const PAIR_SIZE: u32 = 8;
        const CLAUSE_SIZE: u32 = 24;

        let Some(section) = self.header.core.section(SectionType::ExceptionInfo) else {
            return Ok(FxHashMap::default());
        };

        if section.size % PAIR_SIZE != 0 {
            return Err(malformed_error!(
                "ExceptionInfo size {} is not a multiple of the pair size",
                section.size
            ));
        }

        let offset = self.file.rva_to_offset(section.rva as usize)?;
        let mut parser = Parser::new(self.file.data());
        parser.seek(offset)?;

        let count = section.size / PAIR_SIZE;
        let mut pairs = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let method_rva = parser.read_le::<u32>()?;
            let eh_rva = parser.read_le::<u32>()?;
            pairs.push((method_rva, eh_rva));
        }

        // The final pair is a sentinel bounding the previous entry's clause table
        let mut map = FxHashMap::default();
        for window in pairs.windows(2) {
            let (method_rva, eh_rva) = window[0];
            let (_, next_eh_rva) = window[1];

            if next_eh_rva < eh_rva {
                return Err(malformed_error!(
                    "ExceptionInfo table is not monotonically increasing - {} then {}",
                    eh_rva,
                    next_eh_rva
                ));
            }

            map.insert(
                method_rva,
                EHInfo {
                    rva: eh_rva,
                    offset: self.file.rva_to_offset(eh_rva as usize)?,
                    clause_count: (next_eh_rva - eh_rva) / CLAUSE_SIZE,
                },
            );
        }

        Ok(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::readytorun::header::READYTORUN_SIGNATURE;
    use crate::test::{
        containers::{build_native_array, build_native_hashtable},
        encode_unsigned,
        metadata::MetadataBuilder,
        pe::{PeBuilder, SECTION_RVA},
    };

    /// Bump allocator for section content; returns the RVA of each appended blob.
    struct SectionImage {
        data: Vec<u8>,
    }

    impl SectionImage {
        fn new() -> SectionImage {
            SectionImage { data: Vec::new() }
        }

        fn append(&mut self, bytes: &[u8]) -> u32 {
            while self.data.len() % 4 != 0 {
                self.data.push(0);
            }
            let rva = SECTION_RVA + self.data.len() as u32;
            self.data.extend_from_slice(bytes);
            rva
        }
    }

    fn r2r_header_bytes(sections: &[(u32, u32, u32)]) -> Vec<u8> {
        let mut data = Vec::new();
        data.extend_from_slice(&READYTORUN_SIGNATURE.to_le_bytes());
        data.extend_from_slice(&9u16.to_le_bytes());
        data.extend_from_slice(&2u16.to_le_bytes());
        data.extend_from_slice(&0u32.to_le_bytes());
        data.extend_from_slice(&(sections.len() as u32).to_le_bytes());
        for (section_type, rva, size) in sections {
            data.extend_from_slice(&section_type.to_le_bytes());
            data.extend_from_slice(&rva.to_le_bytes());
            data.extend_from_slice(&size.to_le_bytes());
        }
        data
    }

    fn cor20_bytes(meta_rva: u32, meta_size: u32, flags: u32, mnh_rva: u32, mnh_size: u32) -> Vec<u8> {
        let mut data = Vec::new();
        data.extend_from_slice(&72u32.to_le_bytes());
        data.extend_from_slice(&2u16.to_le_bytes());
        data.extend_from_slice(&5u16.to_le_bytes());
        data.extend_from_slice(&meta_rva.to_le_bytes());
        data.extend_from_slice(&meta_size.to_le_bytes());
        data.extend_from_slice(&flags.to_le_bytes());
        data.resize(64, 0);
        data.extend_from_slice(&mnh_rva.to_le_bytes());
        data.extend_from_slice(&mnh_size.to_le_bytes());
        data
    }

    /// Amd64 unwind record: empty prolog, no codes, personality RVA.
    const UNWIND: [u8; 8] = [0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00];

    fn entrypoint_blob(id: u32) -> Vec<u8> {
        encode_unsigned(id << 1)
    }

    fn x64_runtime_functions(count: u32, unwind_rva: u32) -> Vec<u8> {
        let mut data = Vec::new();
        for id in 0..count {
            let start = 0x9000 + id * 0x100;
            data.extend_from_slice(&start.to_le_bytes());
            data.extend_from_slice(&(start + 0x80).to_le_bytes());
            data.extend_from_slice(&unwind_rva.to_le_bytes());
        }
        data
    }

    /// Scenario: single-assembly X64 image, three methods with entrypoints {0, 2, 5} over
    /// seven runtime functions.
    fn crafted_single_image(machine: u16) -> Vec<u8> {
        let mut section = SectionImage::new();

        let unwind_rva = section.append(&UNWIND);
        let rf = x64_runtime_functions(7, unwind_rva);
        let rf_rva = section.append(&rf);

        let (entrypoints, _) = build_native_array(
            &[
                Some(entrypoint_blob(0)),
                Some(entrypoint_blob(2)),
                Some(entrypoint_blob(5)),
            ],
            3,
        );
        let me_rva = section.append(&entrypoints);

        let compiler = b"Crossgen2 9.0.5\0";
        let ci_rva = section.append(compiler);

        let metadata = MetadataBuilder::new()
            .assembly("App")
            .method_def("Alpha")
            .method_def("Beta")
            .method_def("Gamma")
            .build();
        let md_rva = section.append(&metadata);
        let md_len = metadata.len() as u32;

        let header = r2r_header_bytes(&[
            (102, rf_rva, 7 * 12),
            (103, me_rva, entrypoints.len() as u32),
            (100, ci_rva, compiler.len() as u32),
        ]);
        let r2r_rva = section.append(&header);
        let r2r_len = header.len() as u32;

        let cor = cor20_bytes(md_rva, md_len, 0x05, r2r_rva, r2r_len);
        let cor_rva = section.append(&cor);

        PeBuilder::new()
            .machine(machine)
            .section_data(section.data)
            .clr_directory(cor_rva, 72)
            .build()
    }

    fn load(image: Vec<u8>) -> Result<ReadyToRunReader> {
        let file = File::from_mem(image)?;
        ReadyToRunReader::from_pe(
            file,
            PathBuf::from("crafted.dll"),
            Box::new(NullResolver),
            &RawNameFormatter,
        )
    }

    #[test]
    fn single_image_methods() {
        let reader = load(crafted_single_image(0x8664)).unwrap();

        assert!(!reader.composite());
        assert_eq!(reader.machine(), Machine::Amd64);
        assert_eq!(reader.operating_system(), OperatingSystem::Windows);
        assert_eq!(reader.architecture(), Architecture::X64);
        assert_eq!(reader.image_base(), 0x0001_8000_0000);
        assert_eq!(reader.compiler_identifier(), "Crossgen2 9.0.5");
        assert!(reader.metadata().is_some());
        assert!(reader.component_headers().is_empty());

        let methods = reader.methods();
        assert_eq!(methods.len(), 3);
        assert_eq!(reader.runtime_function_count(), 7);
        assert_eq!(
            reader.entry_points(),
            &[true, false, true, false, false, true, false]
        );

        // Method handles are MethodDef tokens in row order
        assert_eq!(methods[0].handle, Token::method_def(1));
        assert_eq!(methods[1].handle, Token::method_def(2));
        assert_eq!(methods[2].handle, Token::method_def(3));
        assert_eq!(methods[0].source, MetadataSource::Primary);

        // Each method owns a contiguous run of runtime functions up to the next entrypoint
        let ids: Vec<Vec<u32>> = methods
            .iter()
            .map(|m| m.runtime_functions.iter().map(|f| f.id).collect())
            .collect();
        assert_eq!(ids[0], vec![0, 1]);
        assert_eq!(ids[1], vec![2, 3, 4]);
        assert_eq!(ids[2], vec![5, 6]);

        // GC info only on entry fragments
        for method in methods {
            assert!(method.runtime_functions[0].gc_info.is_some());
            for fragment in &method.runtime_functions[1..] {
                assert!(fragment.gc_info.is_none());
            }
        }
    }

    #[test]
    fn single_image_invariants() {
        let reader = load(crafted_single_image(0x8664)).unwrap();

        // Every entry id is in range, and the bitmap is exactly the set of entry ids
        let mut expected = vec![false; reader.runtime_function_count() as usize];
        for method in reader.methods() {
            assert!(method.entry_id < reader.runtime_function_count());
            expected[method.entry_id as usize] = true;
        }
        assert_eq!(reader.entry_points(), expected.as_slice());

        // Section types are unique
        let types: Vec<SectionType> = reader.header().core.section_types().collect();
        let unique: std::collections::HashSet<SectionType> = types.iter().copied().collect();
        assert_eq!(unique.len(), types.len());
    }

    #[test]
    fn machine_xor_decode() {
        // 0x8664 ^ 0x7B79: an Amd64 Linux image
        let reader = load(crafted_single_image(0xFD1D)).unwrap();
        assert_eq!(reader.operating_system(), OperatingSystem::Linux);
        assert_eq!(reader.machine(), Machine::Amd64);
        assert_eq!(reader.architecture(), Architecture::X64);
    }

    #[test]
    fn invalid_machine() {
        let result = load(crafted_single_image(0x1234));
        assert!(
            matches!(result, Err(crate::Error::Malformed { ref message, .. }) if message.contains("Invalid Machine"))
        );
    }

    #[test]
    fn composite_image() {
        let mut section = SectionImage::new();

        // Two component core headers, flags COMPONENT, no sections
        let mut components = Vec::new();
        for _ in 0..2 {
            components.extend_from_slice(&0x20u32.to_le_bytes());
            components.extend_from_slice(&0u32.to_le_bytes());
        }
        let asm_rva = section.append(&components);

        let manifest = MetadataBuilder::new()
            .assembly_ref("CompA")
            .assembly_ref("CompB")
            .build();
        let mm_rva = section.append(&manifest);

        let header = r2r_header_bytes(&[
            (115, asm_rva, components.len() as u32),
            (112, mm_rva, manifest.len() as u32),
        ]);
        let r2r_rva = section.append(&header);

        let image = PeBuilder::new()
            .section_data(section.data)
            .export("RTR_HEADER", r2r_rva)
            .build();
        let reader = load(image).unwrap();

        assert!(reader.composite());
        assert_eq!(reader.component_headers().len(), 2);
        assert!(reader.metadata().is_none());
        assert!(reader.manifest_metadata().is_some());
        assert_eq!(reader.manifest_reference_assemblies(), &["CompA", "CompB"]);
        assert!(reader.methods().is_empty());
    }

    /// Scenario: one generic instantiation, owner type `List`1`, MethodDef 42, one type
    /// argument `System.Int32`.
    fn crafted_instance_image(payload: Vec<u8>) -> Vec<u8> {
        let mut section = SectionImage::new();

        let unwind_rva = section.append(&UNWIND);
        let rf = x64_runtime_functions(1, unwind_rva);
        let rf_rva = section.append(&rf);

        let table = build_native_hashtable(&[vec![(0xAB, payload)]]);
        let im_rva = section.append(&table);

        let metadata = MetadataBuilder::new()
            .assembly("App")
            .type_ref("System.Collections.Generic", "List`1")
            .build();
        let md_rva = section.append(&metadata);
        let md_len = metadata.len() as u32;

        let header = r2r_header_bytes(&[
            (102, rf_rva, 12),
            (109, im_rva, table.len() as u32),
        ]);
        let r2r_rva = section.append(&header);
        let r2r_len = header.len() as u32;

        let cor = cor20_bytes(md_rva, md_len, 0x05, r2r_rva, r2r_len);
        let cor_rva = section.append(&cor);

        PeBuilder::new()
            .section_data(section.data)
            .clr_directory(cor_rva, 72)
            .build()
    }

    #[test]
    fn instance_method_entry() {
        // flags OWNER_TYPE | METHOD_INSTANTIATION, owner = CLASS TypeRef#1, rid 42,
        // one type argument I4, entrypoint id 0
        let mut payload = encode_unsigned(0x44);
        payload.extend_from_slice(&[0x12, 0x05]); // CLASS, compressed TypeRef row 1
        payload.extend_from_slice(&encode_unsigned(42));
        payload.extend_from_slice(&encode_unsigned(1));
        payload.push(0x08); // ELEMENT_TYPE_I4
        payload.extend_from_slice(&entrypoint_blob(0));

        let reader = load(crafted_instance_image(payload)).unwrap();

        let instance: Vec<&Method> = reader.instance_methods().collect();
        assert_eq!(instance.len(), 1);
        let method = instance[0];

        assert_eq!(
            method.owning_type.as_deref(),
            Some("System.Collections.Generic.List`1")
        );
        assert_eq!(method.handle, Token::method_def(42));
        assert_eq!(method.type_args, vec!["System.Int32".to_string()]);
        assert_eq!(method.constrained_type, None);
        assert_eq!(method.bucket, Some(0xAB));
        assert_eq!(method.entry_id, 0);
        assert_eq!(method.runtime_functions.len(), 1);
        assert_eq!(reader.entry_points(), &[true]);
    }

    #[test]
    fn instance_method_out_of_range_is_dropped() {
        // Same entry shape, but the entrypoint id is far past the table; the entry must be
        // dropped without failing the load
        let mut payload = encode_unsigned(0x44);
        payload.extend_from_slice(&[0x12, 0x05]);
        payload.extend_from_slice(&encode_unsigned(42));
        payload.extend_from_slice(&encode_unsigned(1));
        payload.push(0x08);
        payload.extend_from_slice(&entrypoint_blob(1000));

        let reader = load(crafted_instance_image(payload)).unwrap();
        assert_eq!(reader.instance_methods().count(), 0);
        assert_eq!(reader.entry_points(), &[false]);
    }

    #[test]
    fn instance_method_slot_encoding_unsupported() {
        // flags SLOT_INSTEAD_OF_TOKEN
        let mut payload = encode_unsigned(0x08);
        payload.extend_from_slice(&encode_unsigned(1));
        payload.extend_from_slice(&entrypoint_blob(0));

        let result = load(crafted_instance_image(payload));
        assert!(matches!(result, Err(crate::Error::NotImplemented(_))));
    }

    #[test]
    fn not_a_readytorun_image() {
        // COR header with a managed-native header but no IL_LIBRARY flag
        let mut section = SectionImage::new();

        let metadata = MetadataBuilder::new().assembly("App").build();
        let md_rva = section.append(&metadata);
        let md_len = metadata.len() as u32;

        let header = r2r_header_bytes(&[]);
        let r2r_rva = section.append(&header);
        let r2r_len = header.len() as u32;

        let cor = cor20_bytes(md_rva, md_len, 0x01, r2r_rva, r2r_len);
        let cor_rva = section.append(&cor);

        let image = PeBuilder::new()
            .section_data(section.data)
            .clr_directory(cor_rva, 72)
            .build();
        assert!(matches!(load(image), Err(NotSupported)));
    }

    #[test]
    fn missing_rtr_header_export() {
        // No CLR directory and no export: nowhere to find the container
        let image = PeBuilder::new().section_data(vec![0u8; 64]).build();
        assert!(matches!(
            load(image),
            Err(crate::Error::Malformed { ref message, .. }) if message.contains("RTR_HEADER")
        ));
    }

    #[test]
    fn debug_and_eh_info() {
        let mut section = SectionImage::new();

        let unwind_rva = section.append(&UNWIND);
        let rf = x64_runtime_functions(2, unwind_rva);
        let rf_rva = section.append(&rf);

        let (entrypoints, _) = build_native_array(&[Some(entrypoint_blob(0))], 3);
        let me_rva = section.append(&entrypoints);

        // Debug info: a NativeArray indexed by runtime-function id, entry 1 absent
        let (debug, _) = build_native_array(&[Some(vec![0xD0]), None], 3);
        let di_rva = section.append(&debug);

        // Exception info: two methods plus the sentinel pair
        let eh_data = section.append(&[0u8; 96]);
        let mut eh = Vec::new();
        for (method_rva, eh_rva) in [
            (0x9000u32, eh_data),
            (0x9100, eh_data + 48),
            (0xFFFF_FFFF, eh_data + 96),
        ] {
            eh.extend_from_slice(&method_rva.to_le_bytes());
            eh.extend_from_slice(&eh_rva.to_le_bytes());
        }
        let eh_rva = section.append(&eh);

        let metadata = MetadataBuilder::new().assembly("App").build();
        let md_rva = section.append(&metadata);
        let md_len = metadata.len() as u32;

        let header = r2r_header_bytes(&[
            (102, rf_rva, 2 * 12),
            (103, me_rva, entrypoints.len() as u32),
            (105, di_rva, debug.len() as u32),
            (104, eh_rva, eh.len() as u32),
        ]);
        let r2r_rva = section.append(&header);
        let r2r_len = header.len() as u32;

        let cor = cor20_bytes(md_rva, md_len, 0x05, r2r_rva, r2r_len);
        let cor_rva = section.append(&cor);

        let image = PeBuilder::new()
            .section_data(section.data)
            .clr_directory(cor_rva, 72)
            .build();
        let reader = load(image).unwrap();

        let debug_info = reader.runtime_function_debug_info().unwrap();
        assert_eq!(debug_info.len(), 1);
        let offset = debug_info[&0];
        assert_eq!(reader.file.data()[offset], 0xD0);
        assert!(!debug_info.contains_key(&1));

        let eh_info = reader.runtime_function_eh_info().unwrap();
        assert_eq!(eh_info.len(), 2);
        assert_eq!(eh_info[&0x9000].rva, eh_data);
        assert_eq!(eh_info[&0x9000].clause_count, 2);
        assert_eq!(eh_info[&0x9100].clause_count, 2);

        // Second call returns the cached maps
        assert!(std::ptr::eq(
            reader.runtime_function_debug_info().unwrap(),
            debug_info
        ));
    }

    #[test]
    fn available_types() {
        let mut section = SectionImage::new();

        // Two entries: TypeDef row 1, ExportedType row 1
        let typedef_entry = encode_unsigned(1 << 1);
        let exported_entry = encode_unsigned(1 << 1 | 1);
        let table = build_native_hashtable(&[vec![
            (0x10, typedef_entry),
            (0x20, exported_entry),
        ]]);
        let at_rva = section.append(&table);

        let metadata = MetadataBuilder::new()
            .assembly("App")
            .type_def("My.Namespace", "Widget")
            .exported_type("Their.Namespace", "Facade")
            .build();
        let md_rva = section.append(&metadata);
        let md_len = metadata.len() as u32;

        let header = r2r_header_bytes(&[(108, at_rva, table.len() as u32)]);
        let r2r_rva = section.append(&header);
        let r2r_len = header.len() as u32;

        let cor = cor20_bytes(md_rva, md_len, 0x05, r2r_rva, r2r_len);
        let cor_rva = section.append(&cor);

        let image = PeBuilder::new()
            .section_data(section.data)
            .clr_directory(cor_rva, 72)
            .build();
        let reader = load(image).unwrap();

        assert_eq!(
            reader.available_types(),
            &[
                "My.Namespace.Widget".to_string(),
                "exported Their.Namespace.Facade".to_string()
            ]
        );
    }
}
