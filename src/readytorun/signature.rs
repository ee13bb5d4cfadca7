//! Type-signature rendering for instance-method entrypoints.
//!
//! Instance-method entries describe their owning type, type arguments and constraint as type
//! signatures: ECMA-335 element-type streams extended with two zapsig opcodes - the canonical
//! type marker and a module override that re-scopes token resolution to another assembly's
//! metadata. The decoder renders these into display strings; resolving tokens and reference
//! indices to actual metadata is delegated through [`MetadataScope`] so the decoder stays
//! independent of how the reader stores its metadata back-ends.

use crate::{
    file::parser::Parser, metadata::token::Token, readytorun::method::MetadataSource, Result,
};

/// Nested type constructors deeper than this are treated as malformed.
const MAX_TYPE_DEPTH: usize = 64;

// CorElementType constants used in ReadyToRun type signatures
const ELEMENT_TYPE_VOID: u8 = 0x01;
const ELEMENT_TYPE_BOOLEAN: u8 = 0x02;
const ELEMENT_TYPE_CHAR: u8 = 0x03;
const ELEMENT_TYPE_I1: u8 = 0x04;
const ELEMENT_TYPE_U1: u8 = 0x05;
const ELEMENT_TYPE_I2: u8 = 0x06;
const ELEMENT_TYPE_U2: u8 = 0x07;
const ELEMENT_TYPE_I4: u8 = 0x08;
const ELEMENT_TYPE_U4: u8 = 0x09;
const ELEMENT_TYPE_I8: u8 = 0x0A;
const ELEMENT_TYPE_U8: u8 = 0x0B;
const ELEMENT_TYPE_R4: u8 = 0x0C;
const ELEMENT_TYPE_R8: u8 = 0x0D;
const ELEMENT_TYPE_STRING: u8 = 0x0E;
const ELEMENT_TYPE_PTR: u8 = 0x0F;
const ELEMENT_TYPE_BYREF: u8 = 0x10;
const ELEMENT_TYPE_VALUETYPE: u8 = 0x11;
const ELEMENT_TYPE_CLASS: u8 = 0x12;
const ELEMENT_TYPE_VAR: u8 = 0x13;
const ELEMENT_TYPE_ARRAY: u8 = 0x14;
const ELEMENT_TYPE_GENERICINST: u8 = 0x15;
const ELEMENT_TYPE_TYPEDBYREF: u8 = 0x16;
const ELEMENT_TYPE_I: u8 = 0x18;
const ELEMENT_TYPE_U: u8 = 0x19;
const ELEMENT_TYPE_OBJECT: u8 = 0x1C;
const ELEMENT_TYPE_SZARRAY: u8 = 0x1D;
const ELEMENT_TYPE_MVAR: u8 = 0x1E;

/// Canonical type placeholder (zapsig extension)
pub const ELEMENT_TYPE_CANON_ZAPSIG: u8 = 0x3E;
/// Module override (zapsig extension): a 1-based assembly-reference index follows
pub const ELEMENT_TYPE_MODULE_ZAPSIG: u8 = 0x3F;

/// Metadata access the signature decoder needs from its owner.
pub trait MetadataScope {
    /// Renders a `TypeDef`/`TypeRef` token of the given metadata scope into a display name.
    ///
    /// # Errors
    /// Returns an error if the token cannot be resolved in that scope.
    fn type_name(&self, source: MetadataSource, token: Token) -> Result<String>;

    /// Maps a 1-based assembly-reference index to the metadata scope it designates.
    ///
    /// # Errors
    /// Returns [`crate::Error::MissingReferenceAssembly`] when the reference cannot be opened.
    fn scope_for_reference(&self, ref_index: u32) -> Result<MetadataSource>;
}

/// Reads one type signature at the parser's position and renders it.
///
/// A leading module override re-scopes the *remainder of the enclosing entry*, so the possibly
/// updated scope is returned alongside the rendered name; overrides nested inside composite
/// types stay local to the type they prefix.
///
/// ## Arguments
///
/// * `parser` - Positioned at the signature's first element byte.
/// * `source` - The active metadata scope.
/// * `scope` - Metadata access for token and reference resolution.
///
/// # Errors
///
/// Returns an error for truncated data, unknown element types, or unresolvable references.
pub fn read_type_signature(
    parser: &mut Parser,
    source: MetadataSource,
    scope: &dyn MetadataScope,
) -> Result<(String, MetadataSource)> {
    let mut active = source;
    while parser.peek_byte()? == ELEMENT_TYPE_MODULE_ZAPSIG {
        parser.read_le::<u8>()?;
        let ref_index = parser.read_unsigned()?;
        active = scope.scope_for_reference(ref_index)?;
    }

    let name = parse_type(parser, active, scope, 0)?;
    Ok((name, active))
}

fn parse_type(
    parser: &mut Parser,
    source: MetadataSource,
    scope: &dyn MetadataScope,
    depth: usize,
) -> Result<String> {
    if depth > MAX_TYPE_DEPTH {
        return Err(malformed_error!(
            "Type signature nesting exceeds {}",
            MAX_TYPE_DEPTH
        ));
    }

    let element = parser.read_le::<u8>()?;
    match element {
        ELEMENT_TYPE_VOID => Ok("System.Void".to_string()),
        ELEMENT_TYPE_BOOLEAN => Ok("System.Boolean".to_string()),
        ELEMENT_TYPE_CHAR => Ok("System.Char".to_string()),
        ELEMENT_TYPE_I1 => Ok("System.SByte".to_string()),
        ELEMENT_TYPE_U1 => Ok("System.Byte".to_string()),
        ELEMENT_TYPE_I2 => Ok("System.Int16".to_string()),
        ELEMENT_TYPE_U2 => Ok("System.UInt16".to_string()),
        ELEMENT_TYPE_I4 => Ok("System.Int32".to_string()),
        ELEMENT_TYPE_U4 => Ok("System.UInt32".to_string()),
        ELEMENT_TYPE_I8 => Ok("System.Int64".to_string()),
        ELEMENT_TYPE_U8 => Ok("System.UInt64".to_string()),
        ELEMENT_TYPE_R4 => Ok("System.Single".to_string()),
        ELEMENT_TYPE_R8 => Ok("System.Double".to_string()),
        ELEMENT_TYPE_STRING => Ok("System.String".to_string()),
        ELEMENT_TYPE_TYPEDBYREF => Ok("System.TypedReference".to_string()),
        ELEMENT_TYPE_I => Ok("System.IntPtr".to_string()),
        ELEMENT_TYPE_U => Ok("System.UIntPtr".to_string()),
        ELEMENT_TYPE_OBJECT => Ok("System.Object".to_string()),
        ELEMENT_TYPE_CANON_ZAPSIG => Ok("__Canon".to_string()),

        ELEMENT_TYPE_VALUETYPE | ELEMENT_TYPE_CLASS => {
            let token = parser.read_compressed_token()?;
            scope.type_name(source, token)
        }

        ELEMENT_TYPE_PTR => Ok(format!(
            "{}*",
            parse_type(parser, source, scope, depth + 1)?
        )),
        ELEMENT_TYPE_BYREF => Ok(format!(
            "{}&",
            parse_type(parser, source, scope, depth + 1)?
        )),
        ELEMENT_TYPE_SZARRAY => Ok(format!(
            "{}[]",
            parse_type(parser, source, scope, depth + 1)?
        )),

        ELEMENT_TYPE_ARRAY => {
            let inner = parse_type(parser, source, scope, depth + 1)?;
            let rank = parser.read_compressed_uint()?;
            if rank == 0 {
                return Err(malformed_error!("Array signature with rank 0"));
            }

            let num_sizes = parser.read_compressed_uint()?;
            for _ in 0..num_sizes {
                parser.read_compressed_uint()?;
            }
            let num_lo_bounds = parser.read_compressed_uint()?;
            for _ in 0..num_lo_bounds {
                parser.read_compressed_uint()?;
            }

            Ok(format!("{}[{}]", inner, ",".repeat(rank as usize - 1)))
        }

        ELEMENT_TYPE_GENERICINST => {
            let kind = parser.peek_byte()?;
            if kind != ELEMENT_TYPE_CLASS && kind != ELEMENT_TYPE_VALUETYPE {
                return Err(malformed_error!(
                    "Generic instantiation over element type 0x{:02x}",
                    kind
                ));
            }
            let base = parse_type(parser, source, scope, depth + 1)?;

            let arg_count = parser.read_compressed_uint()?;
            let mut args = Vec::with_capacity(arg_count as usize);
            for _ in 0..arg_count {
                args.push(parse_type(parser, source, scope, depth + 1)?);
            }

            Ok(format!("{}<{}>", base, args.join(", ")))
        }

        ELEMENT_TYPE_VAR => {
            let index = parser.read_compressed_uint()?;
            Ok(format!("!{index}"))
        }
        ELEMENT_TYPE_MVAR => {
            let index = parser.read_compressed_uint()?;
            Ok(format!("!!{index}"))
        }

        ELEMENT_TYPE_MODULE_ZAPSIG => {
            // Override nested inside a composite type: scoped to this type only
            let ref_index = parser.read_unsigned()?;
            let overridden = scope.scope_for_reference(ref_index)?;
            parse_type(parser, overridden, scope, depth + 1)
        }

        _ => Err(malformed_error!(
            "Unknown element type in signature - 0x{:02x}",
            element
        )),
    }
}
