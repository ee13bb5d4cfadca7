//! Compact ECMA-335 metadata support for ReadyToRun cross-references.
//!
//! A ReadyToRun image stitches its native structures to managed metadata in three places: the
//! COR header locates the primary metadata, composite images embed a manifest metadata blob
//! with extra `AssemblyRef` rows, and instance-method signatures reference types and methods by
//! token. This module carries exactly the metadata machinery those cross-references need:
//!
//! - [`crate::metadata::cor20header::Cor20Header`] - the CLR 2.0 header with the
//!   managed-native-header directory and the `IL_LIBRARY` flag
//! - [`crate::metadata::root::Root`] - the metadata root and stream directory
//! - [`crate::metadata::streams`] - the `#Strings` heap
//! - [`crate::metadata::tables`] - the `#~` tables stream with schema-driven cell access
//! - [`crate::metadata::reader::EcmaMetadata`] - the facade resolving handles into names
//! - [`crate::metadata::resolver::AssemblyResolver`] - the external assembly-location seam
//! - [`crate::metadata::token::Token`] - table-tagged row references
//!
//! This is not a general ECMA-335 implementation; blob signatures, GUID heaps and the long
//! tail of row models are out of scope.

pub mod cor20header;
pub mod reader;
pub mod resolver;
pub mod root;
pub mod streams;
pub mod tables;
pub mod token;
