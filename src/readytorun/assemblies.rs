//! Unified reference-assembly index.
//!
//! ReadyToRun signatures address assemblies through one dense integer space that spans two
//! disjoint back-ends: the `AssemblyRef` rows of the primary metadata (composite images have
//! none) and the manifest metadata's extra rows appended by compilation. Index 0 is invalid,
//! index 1 is the image itself, indices 2..=A are primary rows by row id, and everything above
//! maps to `manifest_references[index - A - 2]`.
//!
//! The arithmetic lives in exactly one place - [`AssemblyIndex::assembly_at`] - and every
//! consumer (signature decoding, component lookups, the reader's public API) goes through it.
//! Opened assemblies are memoized per index; the resolver is never asked twice for the same
//! reference.

use std::{
    path::PathBuf,
    sync::{Arc, RwLock},
};

use rustc_hash::FxHashMap;

use crate::{
    metadata::{reader::EcmaMetadata, resolver::AssemblyResolver, token::Token},
    readytorun::{
        method::MetadataSource,
        signature::MetadataScope,
    },
    Error::MissingReferenceAssembly,
    Result,
};

/// The simple name of the system module used as the composite fallback scope.
pub const SYSTEM_MODULE: &str = "System.Private.CoreLib";

/// Metadata back-ends and the resolver cache of one image.
pub struct AssemblyIndex {
    filename: PathBuf,
    primary: Option<Arc<EcmaMetadata>>,
    manifest: Option<Arc<EcmaMetadata>>,
    manifest_references: Vec<String>,
    resolver: Box<dyn AssemblyResolver>,
    references: RwLock<FxHashMap<u32, Arc<EcmaMetadata>>>,
    system: RwLock<Option<Arc<EcmaMetadata>>>,
}

impl AssemblyIndex {
    /// Builds the index over the image's metadata back-ends.
    ///
    /// ## Arguments
    ///
    /// * `filename` - Path of the image, handed to the resolver as probing anchor.
    /// * `primary` - The primary metadata; `None` for composite images.
    /// * `manifest` - The manifest metadata blob, when the image carries one.
    /// * `resolver` - The external assembly-location capability.
    ///
    /// # Errors
    ///
    /// Returns an error if the manifest's `AssemblyRef` rows cannot be enumerated.
    pub fn new(
        filename: PathBuf,
        primary: Option<Arc<EcmaMetadata>>,
        manifest: Option<Arc<EcmaMetadata>>,
        resolver: Box<dyn AssemblyResolver>,
    ) -> Result<AssemblyIndex> {
        let mut manifest_references = Vec::new();
        if let Some(manifest) = &manifest {
            for rid in 1..=manifest.assembly_ref_count() {
                manifest_references.push(manifest.assembly_ref_name(rid)?);
            }
        }

        Ok(AssemblyIndex {
            filename,
            primary,
            manifest,
            manifest_references,
            resolver,
            references: RwLock::new(FxHashMap::default()),
            system: RwLock::new(None),
        })
    }

    /// The primary metadata reader, absent for composite images.
    #[must_use]
    pub fn primary(&self) -> Option<&Arc<EcmaMetadata>> {
        self.primary.as_ref()
    }

    /// The manifest metadata reader, when present.
    #[must_use]
    pub fn manifest(&self) -> Option<&Arc<EcmaMetadata>> {
        self.manifest.as_ref()
    }

    /// Simple names of the manifest's extra assembly references, in table order.
    #[must_use]
    pub fn manifest_references(&self) -> &[String] {
        &self.manifest_references
    }

    /// `AssemblyRef` row count of the primary metadata; 0 for composite images.
    #[must_use]
    pub fn primary_ref_count(&self) -> u32 {
        self.primary
            .as_ref()
            .map_or(0, |primary| primary.assembly_ref_count())
    }

    /// Simple name behind a unified reference index, without opening the assembly.
    ///
    /// # Errors
    ///
    /// Returns an error for index 0 or an index outside both back-ends.
    pub fn reference_name(&self, ref_index: u32) -> Result<String> {
        let primary_count = self.primary_ref_count();

        if ref_index == 0 {
            return Err(malformed_error!("Assembly reference index 0 is invalid"));
        }
        if ref_index == 1 {
            return match &self.primary {
                Some(primary) => Ok(primary
                    .assembly_name()?
                    .unwrap_or_else(|| self.filename.display().to_string())),
                None => Err(malformed_error!(
                    "Assembly reference index 1 does not exist in a composite image"
                )),
            };
        }
        if ref_index <= primary_count {
            let primary = self.primary.as_ref().ok_or_else(|| {
                malformed_error!("Assembly reference {} without primary metadata", ref_index)
            })?;
            return primary.assembly_ref_name(ref_index);
        }

        let manifest_index = (ref_index - primary_count)
            .checked_sub(2)
            .ok_or_else(|| malformed_error!("Assembly reference index {} is reserved", ref_index))?;
        self.manifest_references
            .get(manifest_index as usize)
            .cloned()
            .ok_or_else(|| {
                malformed_error!("Assembly reference index {} out of range", ref_index)
            })
    }

    /// Opens (or returns the memoized) metadata behind a unified reference index.
    ///
    /// ## Arguments
    ///
    /// * `ref_index` - The 1-based unified reference index.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::MissingReferenceAssembly`] when the resolver cannot locate the
    /// assembly, or [`crate::Error::Malformed`] for an invalid index.
    pub fn assembly_at(&self, ref_index: u32) -> Result<Arc<EcmaMetadata>> {
        if ref_index == 1 {
            return self
                .primary
                .clone()
                .ok_or_else(|| malformed_error!("Composite image has no self metadata"));
        }

        if let Some(cached) = self
            .references
            .read()
            .map_err(|_| crate::Error::Error("reference cache poisoned".to_string()))?
            .get(&ref_index)
        {
            return Ok(cached.clone());
        }

        let primary_count = self.primary_ref_count();
        let metadata = if ref_index != 0 && ref_index <= primary_count {
            let primary = self.primary.as_ref().ok_or_else(|| {
                malformed_error!("Assembly reference {} without primary metadata", ref_index)
            })?;
            self.resolver
                .find_assembly_ref(primary, ref_index, &self.filename)
        } else {
            let name = self.reference_name(ref_index)?;
            self.resolver.find_assembly(&name, &self.filename)
        };

        let metadata = Arc::new(metadata.ok_or_else(|| {
            MissingReferenceAssembly(
                self.reference_name(ref_index)
                    .unwrap_or_else(|_| format!("reference {ref_index}")),
            )
        })?);

        self.references
            .write()
            .map_err(|_| crate::Error::Error("reference cache poisoned".to_string()))?
            .insert(ref_index, metadata.clone());
        Ok(metadata)
    }

    /// Opens (or returns the memoized) system module metadata.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::MissingReferenceAssembly`] when the resolver cannot locate
    /// `System.Private.CoreLib`.
    pub fn system_module(&self) -> Result<Arc<EcmaMetadata>> {
        if let Some(cached) = self
            .system
            .read()
            .map_err(|_| crate::Error::Error("system cache poisoned".to_string()))?
            .as_ref()
        {
            return Ok(cached.clone());
        }

        let metadata = self
            .resolver
            .find_assembly(SYSTEM_MODULE, &self.filename)
            .map(Arc::new)
            .ok_or_else(|| MissingReferenceAssembly(SYSTEM_MODULE.to_string()))?;

        *self
            .system
            .write()
            .map_err(|_| crate::Error::Error("system cache poisoned".to_string()))? =
            Some(metadata.clone());
        Ok(metadata)
    }

    /// Resolves a [`MetadataSource`] handle to its metadata reader.
    ///
    /// # Errors
    ///
    /// Returns an error when the handle's backing assembly cannot be opened.
    pub fn metadata_for(&self, source: MetadataSource) -> Result<Arc<EcmaMetadata>> {
        match source {
            MetadataSource::Primary => self
                .primary
                .clone()
                .ok_or_else(|| malformed_error!("Image has no primary metadata")),
            MetadataSource::System => self.system_module(),
            MetadataSource::Component(index) => {
                self.assembly_at(self.primary_ref_count() + 2 + index)
            }
            MetadataSource::Reference(index) => self.assembly_at(index),
        }
    }

    /// Renders a type token against the metadata of the given source.
    ///
    /// # Errors
    ///
    /// Returns an error for unsupported token kinds or unresolvable rows.
    pub fn token_name(&self, source: MetadataSource, token: Token) -> Result<String> {
        let metadata = self.metadata_for(source)?;

        match token.table() {
            0x01 => metadata.type_ref_name(token.row()),
            0x02 => metadata.type_def_name(token.row()),
            0x1B => Err(crate::Error::NotImplemented(
                "TypeSpec rendering in type signatures",
            )),
            _ => Err(malformed_error!(
                "Unexpected token kind in type signature - {}",
                token
            )),
        }
    }
}

impl MetadataScope for AssemblyIndex {
    fn type_name(&self, source: MetadataSource, token: Token) -> Result<String> {
        self.token_name(source, token)
    }

    fn scope_for_reference(&self, ref_index: u32) -> Result<MetadataSource> {
        // Open eagerly so a bad override fails at decode time, and the open is cached
        self.assembly_at(ref_index)?;
        Ok(MetadataSource::Reference(ref_index))
    }
}
