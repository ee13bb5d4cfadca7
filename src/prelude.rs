//! # r2rscope Prelude
//!
//! This module provides a convenient prelude for the most commonly used types and traits from
//! the r2rscope library. Import this module to get quick access to the essential types for
//! ReadyToRun image analysis.

// ================================================================================================
// Core Types and Error Handling
// ================================================================================================

/// The main error type for all r2rscope operations
pub use crate::Error;

/// The result type used throughout r2rscope
pub use crate::Result;

// ================================================================================================
// Main Entry Points
// ================================================================================================

/// Main entry point for ReadyToRun image analysis
pub use crate::ReadyToRunReader;

/// Low-level file parsing utilities
pub use crate::{File, Parser};

// ================================================================================================
// ReadyToRun Container
// ================================================================================================

/// Container header, section directory and flags
pub use crate::readytorun::header::{
    ReadyToRunCoreHeader, ReadyToRunFlags, ReadyToRunHeader, Section, SectionType,
};

/// Image classification
pub use crate::readytorun::machine::{Architecture, Machine, OperatingSystem};

/// Method records and entrypoint decoding
pub use crate::readytorun::method::{Method, MetadataSource, MethodSigFlags, RuntimeFunction};

/// Unwind records and GC info placement
pub use crate::readytorun::unwind::{GcInfo, UnwindInfo};

/// Import sections and cell naming
pub use crate::readytorun::imports::{
    ImportKind, ImportSection, ImportSectionEntry, ImportSectionFlags, NameFormatter,
    RawNameFormatter,
};

/// Packed container formats
pub use crate::readytorun::narray::NativeArray;
pub use crate::readytorun::nhashtable::NativeHashtable;

/// Exception-handling info records
pub use crate::readytorun::reader::EHInfo;

// ================================================================================================
// Metadata System
// ================================================================================================

/// Metadata token type for referencing table entries
pub use crate::metadata::token::Token;

/// Compact metadata reader
pub use crate::metadata::reader::EcmaMetadata;

/// Assembly resolution seam
pub use crate::metadata::resolver::{AssemblyResolver, NullResolver};
