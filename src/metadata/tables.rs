//! Compact `#~` tables stream reader.
//!
//! The ReadyToRun cross-references need row counts and a handful of name columns from the
//! managed metadata tables: `AssemblyRef` rows for the unified reference-assembly index,
//! `TypeDef`/`TypeRef`/`ExportedType` names for signature and available-type rendering, and
//! `MethodDef`/`MemberRef` names for entrypoint display. This module decodes the tables stream
//! header and computes every table's row size from a static column schema, which is enough to
//! address any cell without materializing row models.
//!
//! # Reference
//! - [ECMA-335 II.24.2.6](https://ecma-international.org/wp-content/uploads/ECMA-335_6th_edition_june_2012.pdf)

use strum::{EnumIter, FromRepr, IntoEnumIterator};

use crate::{
    file::io::{read_le_at, read_le_at_dyn},
    Error::OutOfBounds,
    Result,
};

/// Identifier of a metadata table, ECMA-335 II.22.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, FromRepr)]
#[repr(u8)]
#[allow(missing_docs)]
pub enum TableId {
    Module = 0x00,
    TypeRef = 0x01,
    TypeDef = 0x02,
    FieldPtr = 0x03,
    Field = 0x04,
    MethodPtr = 0x05,
    MethodDef = 0x06,
    ParamPtr = 0x07,
    Param = 0x08,
    InterfaceImpl = 0x09,
    MemberRef = 0x0A,
    Constant = 0x0B,
    CustomAttribute = 0x0C,
    FieldMarshal = 0x0D,
    DeclSecurity = 0x0E,
    ClassLayout = 0x0F,
    FieldLayout = 0x10,
    StandAloneSig = 0x11,
    EventMap = 0x12,
    EventPtr = 0x13,
    Event = 0x14,
    PropertyMap = 0x15,
    PropertyPtr = 0x16,
    Property = 0x17,
    MethodSemantics = 0x18,
    MethodImpl = 0x19,
    ModuleRef = 0x1A,
    TypeSpec = 0x1B,
    ImplMap = 0x1C,
    FieldRva = 0x1D,
    EncLog = 0x1E,
    EncMap = 0x1F,
    Assembly = 0x20,
    AssemblyProcessor = 0x21,
    AssemblyOs = 0x22,
    AssemblyRef = 0x23,
    AssemblyRefProcessor = 0x24,
    AssemblyRefOs = 0x25,
    File = 0x26,
    ExportedType = 0x27,
    ManifestResource = 0x28,
    NestedClass = 0x29,
    GenericParam = 0x2A,
    MethodSpec = 0x2B,
    GenericParamConstraint = 0x2C,
}

const TABLE_SLOTS: usize = TableId::GenericParamConstraint as usize + 1;

/// A coded index family, ECMA-335 II.24.2.6. The tag bits select one of the member tables,
/// the remaining bits carry the row id; the encoded width depends on the largest member table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)]
enum CodedKind {
    TypeDefOrRef,
    HasConstant,
    HasCustomAttribute,
    HasFieldMarshal,
    HasDeclSecurity,
    MemberRefParent,
    HasSemantics,
    MethodDefOrRef,
    MemberForwarded,
    Implementation,
    CustomAttributeType,
    ResolutionScope,
    TypeOrMethodDef,
}

impl CodedKind {
    fn tag_bits(self) -> u32 {
        match self {
            CodedKind::HasFieldMarshal
            | CodedKind::HasSemantics
            | CodedKind::MethodDefOrRef
            | CodedKind::MemberForwarded
            | CodedKind::TypeOrMethodDef => 1,
            CodedKind::TypeDefOrRef
            | CodedKind::HasConstant
            | CodedKind::HasDeclSecurity
            | CodedKind::Implementation
            | CodedKind::ResolutionScope => 2,
            CodedKind::MemberRefParent | CodedKind::CustomAttributeType => 3,
            CodedKind::HasCustomAttribute => 5,
        }
    }

    fn tables(self) -> &'static [TableId] {
        match self {
            CodedKind::TypeDefOrRef => &[TableId::TypeDef, TableId::TypeRef, TableId::TypeSpec],
            CodedKind::HasConstant => &[TableId::Field, TableId::Param, TableId::Property],
            CodedKind::HasCustomAttribute => &[
                TableId::MethodDef,
                TableId::Field,
                TableId::TypeRef,
                TableId::TypeDef,
                TableId::Param,
                TableId::InterfaceImpl,
                TableId::MemberRef,
                TableId::Module,
                TableId::DeclSecurity,
                TableId::Property,
                TableId::Event,
                TableId::StandAloneSig,
                TableId::ModuleRef,
                TableId::TypeSpec,
                TableId::Assembly,
                TableId::AssemblyRef,
                TableId::File,
                TableId::ExportedType,
                TableId::ManifestResource,
                TableId::GenericParam,
                TableId::GenericParamConstraint,
                TableId::MethodSpec,
            ],
            CodedKind::HasFieldMarshal => &[TableId::Field, TableId::Param],
            CodedKind::HasDeclSecurity => {
                &[TableId::TypeDef, TableId::MethodDef, TableId::Assembly]
            }
            CodedKind::MemberRefParent => &[
                TableId::TypeDef,
                TableId::TypeRef,
                TableId::ModuleRef,
                TableId::MethodDef,
                TableId::TypeSpec,
            ],
            CodedKind::HasSemantics => &[TableId::Event, TableId::Property],
            CodedKind::MethodDefOrRef => &[TableId::MethodDef, TableId::MemberRef],
            CodedKind::MemberForwarded => &[TableId::Field, TableId::MethodDef],
            CodedKind::Implementation => {
                &[TableId::File, TableId::AssemblyRef, TableId::ExportedType]
            }
            CodedKind::CustomAttributeType => &[TableId::MethodDef, TableId::MemberRef],
            CodedKind::ResolutionScope => &[
                TableId::Module,
                TableId::ModuleRef,
                TableId::AssemblyRef,
                TableId::TypeRef,
            ],
            CodedKind::TypeOrMethodDef => &[TableId::TypeDef, TableId::MethodDef],
        }
    }
}

/// One column of a table row.
#[derive(Debug, Clone, Copy)]
enum Col {
    /// Fixed 2-byte value
    B2,
    /// Fixed 4-byte value
    B4,
    /// Index into the `#Strings` heap
    Str,
    /// Index into the `#GUID` heap
    Guid,
    /// Index into the `#Blob` heap
    Blob,
    /// Index into another table
    Idx(TableId),
    /// Coded index over a table family
    Coded(CodedKind),
}

/// Column layout per table, ECMA-335 II.22.2 - II.22.39.
fn schema(table: TableId) -> &'static [Col] {
    match table {
        TableId::Module => &[Col::B2, Col::Str, Col::Guid, Col::Guid, Col::Guid],
        TableId::TypeRef => &[Col::Coded(CodedKind::ResolutionScope), Col::Str, Col::Str],
        TableId::TypeDef => &[
            Col::B4,
            Col::Str,
            Col::Str,
            Col::Coded(CodedKind::TypeDefOrRef),
            Col::Idx(TableId::Field),
            Col::Idx(TableId::MethodDef),
        ],
        TableId::FieldPtr => &[Col::Idx(TableId::Field)],
        TableId::Field => &[Col::B2, Col::Str, Col::Blob],
        TableId::MethodPtr => &[Col::Idx(TableId::MethodDef)],
        TableId::MethodDef => &[
            Col::B4,
            Col::B2,
            Col::B2,
            Col::Str,
            Col::Blob,
            Col::Idx(TableId::Param),
        ],
        TableId::ParamPtr => &[Col::Idx(TableId::Param)],
        TableId::Param => &[Col::B2, Col::B2, Col::Str],
        TableId::InterfaceImpl => &[
            Col::Idx(TableId::TypeDef),
            Col::Coded(CodedKind::TypeDefOrRef),
        ],
        TableId::MemberRef => &[Col::Coded(CodedKind::MemberRefParent), Col::Str, Col::Blob],
        TableId::Constant => &[Col::B2, Col::Coded(CodedKind::HasConstant), Col::Blob],
        TableId::CustomAttribute => &[
            Col::Coded(CodedKind::HasCustomAttribute),
            Col::Coded(CodedKind::CustomAttributeType),
            Col::Blob,
        ],
        TableId::FieldMarshal => &[Col::Coded(CodedKind::HasFieldMarshal), Col::Blob],
        TableId::DeclSecurity => &[Col::B2, Col::Coded(CodedKind::HasDeclSecurity), Col::Blob],
        TableId::ClassLayout => &[Col::B2, Col::B4, Col::Idx(TableId::TypeDef)],
        TableId::FieldLayout => &[Col::B4, Col::Idx(TableId::Field)],
        TableId::StandAloneSig => &[Col::Blob],
        TableId::EventMap => &[Col::Idx(TableId::TypeDef), Col::Idx(TableId::Event)],
        TableId::EventPtr => &[Col::Idx(TableId::Event)],
        TableId::Event => &[Col::B2, Col::Str, Col::Coded(CodedKind::TypeDefOrRef)],
        TableId::PropertyMap => &[Col::Idx(TableId::TypeDef), Col::Idx(TableId::Property)],
        TableId::PropertyPtr => &[Col::Idx(TableId::Property)],
        TableId::Property => &[Col::B2, Col::Str, Col::Blob],
        TableId::MethodSemantics => &[
            Col::B2,
            Col::Idx(TableId::MethodDef),
            Col::Coded(CodedKind::HasSemantics),
        ],
        TableId::MethodImpl => &[
            Col::Idx(TableId::TypeDef),
            Col::Coded(CodedKind::MethodDefOrRef),
            Col::Coded(CodedKind::MethodDefOrRef),
        ],
        TableId::ModuleRef => &[Col::Str],
        TableId::TypeSpec => &[Col::Blob],
        TableId::ImplMap => &[
            Col::B2,
            Col::Coded(CodedKind::MemberForwarded),
            Col::Str,
            Col::Idx(TableId::ModuleRef),
        ],
        TableId::FieldRva => &[Col::B4, Col::Idx(TableId::Field)],
        TableId::EncLog => &[Col::B4, Col::B4],
        TableId::EncMap => &[Col::B4],
        TableId::Assembly => &[
            Col::B4,
            Col::B2,
            Col::B2,
            Col::B2,
            Col::B2,
            Col::B4,
            Col::Blob,
            Col::Str,
            Col::Str,
        ],
        TableId::AssemblyProcessor => &[Col::B4],
        TableId::AssemblyOs => &[Col::B4, Col::B4, Col::B4],
        TableId::AssemblyRef => &[
            Col::B2,
            Col::B2,
            Col::B2,
            Col::B2,
            Col::B4,
            Col::Blob,
            Col::Str,
            Col::Str,
            Col::Blob,
        ],
        TableId::AssemblyRefProcessor => &[Col::B4, Col::Idx(TableId::AssemblyRef)],
        TableId::AssemblyRefOs => &[Col::B4, Col::B4, Col::B4, Col::Idx(TableId::AssemblyRef)],
        TableId::File => &[Col::B4, Col::Str, Col::Blob],
        TableId::ExportedType => &[
            Col::B4,
            Col::B4,
            Col::Str,
            Col::Str,
            Col::Coded(CodedKind::Implementation),
        ],
        TableId::ManifestResource => &[
            Col::B4,
            Col::B4,
            Col::Str,
            Col::Coded(CodedKind::Implementation),
        ],
        TableId::NestedClass => &[Col::Idx(TableId::TypeDef), Col::Idx(TableId::TypeDef)],
        TableId::GenericParam => &[
            Col::B2,
            Col::B2,
            Col::Coded(CodedKind::TypeOrMethodDef),
            Col::Str,
        ],
        TableId::MethodSpec => &[Col::Coded(CodedKind::MethodDefOrRef), Col::Blob],
        TableId::GenericParamConstraint => &[
            Col::Idx(TableId::GenericParam),
            Col::Coded(CodedKind::TypeDefOrRef),
        ],
    }
}

/// A parsed `#~` tables stream.
///
/// Holds the row counts of every present table and the computed byte layout, and provides
/// bounds-checked access to individual cells. Column indices follow the schemas of ECMA-335
/// II.22 in declaration order.
pub struct TablesStream<'a> {
    data: &'a [u8],
    heap_sizes: u8,
    valid: u64,
    row_counts: [u32; TABLE_SLOTS],
    row_sizes: [u32; TABLE_SLOTS],
    offsets: [usize; TABLE_SLOTS],
}

impl<'a> TablesStream<'a> {
    /// Create a `TablesStream` object from the bytes of a `#~` stream
    ///
    /// # Arguments
    /// * 'data' - The byte slice from which this object shall be created
    ///
    /// # Errors
    /// Returns an error if the data is too short, declares unknown tables, or the declared
    /// rows do not fit the stream
    pub fn from(data: &'a [u8]) -> Result<TablesStream<'a>> {
        if data.len() < 24 {
            return Err(OutOfBounds);
        }

        let mut offset = 4; // reserved u32
        let _major = read_le_at::<u8>(data, &mut offset)?;
        let _minor = read_le_at::<u8>(data, &mut offset)?;
        let heap_sizes = read_le_at::<u8>(data, &mut offset)?;
        let _reserved = read_le_at::<u8>(data, &mut offset)?;
        let valid = read_le_at::<u64>(data, &mut offset)?;
        let _sorted = read_le_at::<u64>(data, &mut offset)?;

        if valid >> TABLE_SLOTS != 0 {
            return Err(malformed_error!(
                "Tables stream declares unknown tables - 0x{:x}",
                valid
            ));
        }

        let mut row_counts = [0u32; TABLE_SLOTS];
        for slot in 0..TABLE_SLOTS {
            if valid & (1 << slot) != 0 {
                row_counts[slot] = read_le_at::<u32>(data, &mut offset)?;
            }
        }

        let mut stream = TablesStream {
            data,
            heap_sizes,
            valid,
            row_counts,
            row_sizes: [0u32; TABLE_SLOTS],
            offsets: [0usize; TABLE_SLOTS],
        };

        for table in TableId::iter() {
            let row_size: u32 = schema(table)
                .iter()
                .map(|col| stream.col_width(*col))
                .sum();
            stream.row_sizes[table as usize] = row_size;
        }

        for table in TableId::iter() {
            let slot = table as usize;
            if valid & (1 << slot) == 0 {
                continue;
            }

            stream.offsets[slot] = offset;
            let table_size = (stream.row_sizes[slot] as usize)
                .checked_mul(row_counts[slot] as usize)
                .ok_or_else(|| malformed_error!("Table size overflow - {:?}", table))?;

            offset = offset
                .checked_add(table_size)
                .ok_or_else(|| malformed_error!("Table offset overflow - {:?}", table))?;
            if offset > data.len() {
                return Err(OutOfBounds);
            }
        }

        Ok(stream)
    }

    /// Byte width of one column given the decoded heap and table dimensions
    fn col_width(&self, col: Col) -> u32 {
        match col {
            Col::B2 => 2,
            Col::B4 => 4,
            Col::Str => {
                if self.heap_sizes & 0x01 != 0 {
                    4
                } else {
                    2
                }
            }
            Col::Guid => {
                if self.heap_sizes & 0x02 != 0 {
                    4
                } else {
                    2
                }
            }
            Col::Blob => {
                if self.heap_sizes & 0x04 != 0 {
                    4
                } else {
                    2
                }
            }
            Col::Idx(table) => {
                if self.row_counts[table as usize] > 0xFFFF {
                    4
                } else {
                    2
                }
            }
            Col::Coded(kind) => {
                let max_rows = kind
                    .tables()
                    .iter()
                    .map(|table| self.row_counts[*table as usize])
                    .max()
                    .unwrap_or(0);

                if max_rows >= 1 << (16 - kind.tag_bits()) {
                    4
                } else {
                    2
                }
            }
        }
    }

    /// Returns true if the given table is present in this stream
    #[must_use]
    pub fn has_table(&self, table: TableId) -> bool {
        self.valid & (1 << (table as usize)) != 0
    }

    /// Row count of the given table (0 when absent)
    #[must_use]
    pub fn row_count(&self, table: TableId) -> u32 {
        self.row_counts[table as usize]
    }

    /// Read one cell of a table row as an (up to 32-bit) unsigned value.
    ///
    /// ## Arguments
    /// * 'table' - The table to read from
    /// * 'rid'   - The 1-based row id
    /// * 'col'   - The 0-based column index in schema declaration order
    ///
    /// # Errors
    /// Returns an error if the row id or column index is out of range
    pub fn cell(&self, table: TableId, rid: u32, col: usize) -> Result<u32> {
        let slot = table as usize;
        if rid == 0 || rid > self.row_counts[slot] {
            return Err(malformed_error!(
                "Row {} out of range for table {:?} ({} rows)",
                rid,
                table,
                self.row_counts[slot]
            ));
        }

        let columns = schema(table);
        if col >= columns.len() {
            return Err(malformed_error!(
                "Column {} out of range for table {:?}",
                col,
                table
            ));
        }

        let mut offset = self.offsets[slot] + (rid as usize - 1) * self.row_sizes[slot] as usize;
        for prior in &columns[..col] {
            offset += self.col_width(*prior) as usize;
        }

        read_le_at_dyn(self.data, &mut offset, self.col_width(columns[col]) == 4)
    }
}
