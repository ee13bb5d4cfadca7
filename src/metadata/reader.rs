//! Compact ECMA-335 metadata reader.
//!
//! [`EcmaMetadata`] is the metadata back-end of the ReadyToRun cross-references. It owns a copy
//! of one metadata blob (the primary metadata of a single-assembly image, the embedded manifest
//! metadata of a composite image, or a resolver-loaded reference assembly) and answers the
//! queries the ReadyToRun reader needs: `AssemblyRef` row counts and simple names, and the
//! rendered names of `TypeDef`/`TypeRef`/`ExportedType`/`MethodDef`/`MemberRef` rows.
//!
//! Full row models, blob and GUID heap decoding are deliberately not provided; this reader
//! exists to resolve handles into names, nothing more.

use ouroboros::self_referencing;

use crate::{
    metadata::{
        root::Root,
        streams::Strings,
        tables::{TableId, TablesStream},
    },
    Error::Empty,
    Result,
};

#[self_referencing]
/// A parsed metadata blob with its tables stream and string heap.
///
/// Construction parses the metadata root, locates the `#~` (or uncompressed `#-`) tables stream
/// and the `#Strings` heap, and computes the table layout once. All accessors afterwards are
/// cheap reads against the owned buffer.
///
/// # Examples
///
/// ```rust,no_run
/// use r2rscope::metadata::reader::EcmaMetadata;
///
/// let blob: Vec<u8> = std::fs::read("manifest.bin")?;
/// let metadata = EcmaMetadata::read(blob)?;
/// for rid in 1..=metadata.assembly_ref_count() {
///     println!("AssemblyRef {}: {}", rid, metadata.assembly_ref_name(rid)?);
/// }
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub struct EcmaMetadata {
    /// The raw metadata blob, starting at the 'BSJB' root signature.
    data: Vec<u8>,
    /// The parsed metadata root.
    root: Root,
    /// The parsed tables stream, referencing the data.
    #[borrows(data)]
    #[covariant]
    tables: TablesStream<'this>,
    /// The string heap, referencing the data.
    #[borrows(data)]
    #[covariant]
    strings: Strings<'this>,
}

impl EcmaMetadata {
    /// Parses a metadata blob.
    ///
    /// ## Arguments
    ///
    /// * `data` - The metadata bytes, beginning at the root signature.
    ///
    /// # Errors
    ///
    /// Returns an error if the root is malformed or the `#~`/`#Strings` streams are missing.
    pub fn read(data: Vec<u8>) -> Result<EcmaMetadata> {
        if data.is_empty() {
            return Err(Empty);
        }

        let root = Root::read(&data)?;

        let (tables_offset, tables_size) = root
            .stream("#~")
            .or_else(|| root.stream("#-"))
            .ok_or_else(|| malformed_error!("Metadata has no tables stream"))?;
        let (strings_offset, strings_size) = root
            .stream("#Strings")
            .ok_or_else(|| malformed_error!("Metadata has no #Strings heap"))?;

        EcmaMetadata::try_new(
            data,
            root,
            |data| TablesStream::from(&data[tables_offset..tables_offset + tables_size]),
            |data| Strings::from(&data[strings_offset..strings_offset + strings_size]),
        )
    }

    /// The metadata version string from the root header.
    #[must_use]
    pub fn version(&self) -> &str {
        &self.borrow_root().version
    }

    /// Number of rows in the `AssemblyRef` table.
    #[must_use]
    pub fn assembly_ref_count(&self) -> u32 {
        self.borrow_tables().row_count(TableId::AssemblyRef)
    }

    /// Number of rows in the `MethodDef` table.
    #[must_use]
    pub fn method_def_count(&self) -> u32 {
        self.borrow_tables().row_count(TableId::MethodDef)
    }

    /// Simple name of this assembly from the `Assembly` table, if the blob defines one.
    ///
    /// Manifest metadata blobs carry no `Assembly` row; those return `None`.
    ///
    /// # Errors
    ///
    /// Returns an error if the name cell or heap entry is malformed.
    pub fn assembly_name(&self) -> Result<Option<String>> {
        let tables = self.borrow_tables();
        if tables.row_count(TableId::Assembly) == 0 {
            return Ok(None);
        }

        let name = tables.cell(TableId::Assembly, 1, 7)?;
        Ok(Some(
            self.borrow_strings().get(name as usize)?.to_string(),
        ))
    }

    /// Simple name of the `AssemblyRef` row with the given 1-based id.
    ///
    /// # Errors
    ///
    /// Returns an error if the row id is out of range or the heap entry is malformed.
    pub fn assembly_ref_name(&self, rid: u32) -> Result<String> {
        let name = self.borrow_tables().cell(TableId::AssemblyRef, rid, 6)?;
        Ok(self.borrow_strings().get(name as usize)?.to_string())
    }

    /// Rendered `Namespace.Name` of the `TypeDef` row with the given 1-based id.
    ///
    /// # Errors
    ///
    /// Returns an error if the row id is out of range or the heap entries are malformed.
    pub fn type_def_name(&self, rid: u32) -> Result<String> {
        let tables = self.borrow_tables();
        let name = tables.cell(TableId::TypeDef, rid, 1)?;
        let namespace = tables.cell(TableId::TypeDef, rid, 2)?;

        self.render_namespaced(namespace, name)
    }

    /// Rendered `Namespace.Name` of the `TypeRef` row with the given 1-based id.
    ///
    /// # Errors
    ///
    /// Returns an error if the row id is out of range or the heap entries are malformed.
    pub fn type_ref_name(&self, rid: u32) -> Result<String> {
        let tables = self.borrow_tables();
        let name = tables.cell(TableId::TypeRef, rid, 1)?;
        let namespace = tables.cell(TableId::TypeRef, rid, 2)?;

        self.render_namespaced(namespace, name)
    }

    /// Rendered `Namespace.Name` of the `ExportedType` row with the given 1-based id.
    ///
    /// # Errors
    ///
    /// Returns an error if the row id is out of range or the heap entries are malformed.
    pub fn exported_type_name(&self, rid: u32) -> Result<String> {
        let tables = self.borrow_tables();
        let name = tables.cell(TableId::ExportedType, rid, 2)?;
        let namespace = tables.cell(TableId::ExportedType, rid, 3)?;

        self.render_namespaced(namespace, name)
    }

    /// Name of the `MethodDef` row with the given 1-based id.
    ///
    /// # Errors
    ///
    /// Returns an error if the row id is out of range or the heap entry is malformed.
    pub fn method_def_name(&self, rid: u32) -> Result<String> {
        let name = self.borrow_tables().cell(TableId::MethodDef, rid, 3)?;
        Ok(self.borrow_strings().get(name as usize)?.to_string())
    }

    /// Name of the `MemberRef` row with the given 1-based id.
    ///
    /// # Errors
    ///
    /// Returns an error if the row id is out of range or the heap entry is malformed.
    pub fn member_ref_name(&self, rid: u32) -> Result<String> {
        let name = self.borrow_tables().cell(TableId::MemberRef, rid, 1)?;
        Ok(self.borrow_strings().get(name as usize)?.to_string())
    }

    fn render_namespaced(&self, namespace: u32, name: u32) -> Result<String> {
        let strings = self.borrow_strings();
        let name = strings.get(name as usize)?;

        if namespace == 0 {
            return Ok(name.to_string());
        }

        let namespace = strings.get(namespace as usize)?;
        if namespace.is_empty() {
            Ok(name.to_string())
        } else {
            Ok(format!("{namespace}.{name}"))
        }
    }
}
