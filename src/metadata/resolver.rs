//! Assembly resolution seam.
//!
//! Instance-method signatures in composite images can reference types owned by other
//! assemblies; decoding their names requires opening those assemblies' metadata. How sibling
//! assemblies are located (probing directories, reference paths, bundles) is a policy decision
//! that belongs to the embedding tool, so the reader only defines the capability as a trait.
//! Results are memoized by the reader, one lookup per reference-assembly index.

use std::path::Path;

use crate::metadata::reader::EcmaMetadata;

/// Locates the metadata of reference assemblies on behalf of the reader.
///
/// Implementations return `None` when an assembly cannot be found; the reader converts a miss
/// on a *demanded* reference into [`crate::Error::MissingReferenceAssembly`].
pub trait AssemblyResolver: Send + Sync {
    /// Locates an assembly by simple name, e.g. `System.Private.CoreLib`.
    ///
    /// ## Arguments
    ///
    /// * `simple_name` - The assembly simple name, without extension or version.
    /// * `referrer` - Path of the image requesting the lookup, usable as a probing anchor.
    fn find_assembly(&self, simple_name: &str, referrer: &Path) -> Option<EcmaMetadata>;

    /// Locates the assembly behind an `AssemblyRef` row of a referrer's metadata.
    ///
    /// The default implementation resolves the row to its simple name and delegates to
    /// [`AssemblyResolver::find_assembly`].
    ///
    /// ## Arguments
    ///
    /// * `referrer` - The metadata whose `AssemblyRef` table contains the row.
    /// * `assembly_ref_rid` - The 1-based `AssemblyRef` row id.
    /// * `referrer_path` - Path of the image requesting the lookup.
    fn find_assembly_ref(
        &self,
        referrer: &EcmaMetadata,
        assembly_ref_rid: u32,
        referrer_path: &Path,
    ) -> Option<EcmaMetadata> {
        let simple_name = referrer.assembly_ref_name(assembly_ref_rid).ok()?;
        self.find_assembly(&simple_name, referrer_path)
    }
}

/// A resolver that never finds anything.
///
/// Used when no resolver is supplied; every demanded cross-assembly lookup then surfaces as
/// [`crate::Error::MissingReferenceAssembly`].
pub struct NullResolver;

impl AssemblyResolver for NullResolver {
    fn find_assembly(&self, _simple_name: &str, _referrer: &Path) -> Option<EcmaMetadata> {
        None
    }
}
