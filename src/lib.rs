// Copyright 2025-2026 Johann Kempter
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![doc(html_no_source)]
#![deny(missing_docs)]
#![allow(dead_code)]
// - 'file/physical.rs' uses mmap to map a file into memory

//! # r2rscope
//!
//! A cross-platform framework for parsing and analyzing ReadyToRun (R2R) images - the
//! ahead-of-time compiled native code containers that crossgen2 embeds in (or wraps around)
//! managed .NET executables. Built in pure Rust, `r2rscope` decodes the container without
//! requiring Windows or the .NET runtime.
//!
//! # Architecture
//!
//! The library is organized into layers that mirror the format:
//!
//! - **File Layer**: Memory-mapped PE access, RVA translation, and the byte-level parsing
//!   primitives (fixed-width reads, the native format varint)
//! - **Metadata Layer**: A compact ECMA-335 reader covering exactly the tables the ReadyToRun
//!   cross-references need (assembly references, type and method names)
//! - **ReadyToRun Layer**: The container header and section directory, the packed container
//!   formats (NativeArray, NativeHashtable), method entrypoints, the runtime-function table,
//!   import sections, and the composite-image assembly index
//!
//! ## Key Components
//!
//! - [`crate::ReadyToRunReader`] - Main entry point for image analysis
//! - [`crate::File`] - PE image abstraction with pluggable backends
//! - [`crate::Parser`] - Low-level decoding of native format structures
//! - [`crate::metadata`] - Compact managed-metadata access
//! - [`crate::readytorun`] - Container parsing internals
//! - [`crate::prelude`] - Convenient re-exports of commonly used types
//! - [`crate::Error`] and [`crate::Result`] - Comprehensive error handling
//!
//! # Features
//!
//! - **Image classification** - Machine, operating system (OS-XOR decode) and architecture
//! - **Single and composite images** - Per-component headers and the manifest assembly index
//! - **Method entrypoints** - Plain and generic-instantiation entrypoint tables, fixup blobs
//! - **Runtime functions** - Per-method native fragments with unwind and GC info locations
//! - **Import sections** - Indirection cells with symbolic naming
//! - **Memory safe** - Bounds-checked parsing of untrusted images, no panics on malformed
//!   input
//!
//! # Usage Examples
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use r2rscope::prelude::*;
//! use std::path::Path;
//!
//! let reader = ReadyToRunReader::from_file(Path::new("app.r2r.dll"))?;
//! println!("compiler: {}", reader.compiler_identifier());
//! println!("methods:  {}", reader.methods().len());
//! # Ok::<(), r2rscope::Error>(())
//! ```
//!
//! ## Inspecting methods
//!
//! ```rust,no_run
//! use r2rscope::ReadyToRunReader;
//! use std::path::Path;
//!
//! let reader = ReadyToRunReader::from_file(Path::new("app.r2r.dll"))?;
//! for method in reader.methods() {
//!     let fragments = &method.runtime_functions;
//!     println!(
//!         "{} at runtime function {}, {} fragment(s)",
//!         method.handle,
//!         method.entry_id,
//!         fragments.len()
//!     );
//! }
//! # Ok::<(), r2rscope::Error>(())
//! ```
//!
//! # Thread Safety
//!
//! The reader is constructed single-threaded; once built it is safe for concurrent read-only
//! access. The on-demand tables (debug info, exception info) must not be first-touched from
//! multiple threads concurrently.

#[macro_use]
pub(crate) mod error;

#[cfg(test)]
pub(crate) mod test;

/// PE file abstraction and byte-level parsing primitives.
///
/// Provides [`File`] (the PE adapter the reader is built on), the [`file::Backend`] trait with
/// memory-mapped and in-memory implementations, and the [`Parser`] cursor used by every
/// ReadyToRun structure decoder.
pub mod file;

/// Compact ECMA-335 metadata support.
///
/// The subset of managed-metadata parsing the ReadyToRun cross-references need: the COR
/// header, the metadata root and stream directory, the `#Strings` heap, a schema-driven `#~`
/// tables reader, and the [`metadata::reader::EcmaMetadata`] facade that resolves handles
/// into names. The [`metadata::resolver::AssemblyResolver`] trait is the seam through which
/// embedding tools supply sibling assemblies.
pub mod metadata;

/// ReadyToRun container parsing.
///
/// Everything on the native side of the format: image classification, the container header
/// and section directory, the NativeArray/NativeHashtable container formats, method
/// entrypoints and runtime functions, unwind/GC info placement, import sections, and the
/// unified reference-assembly index of composite images.
pub mod readytorun;

/// Convenient re-exports of the most commonly used types.
///
/// ```rust,no_run
/// use r2rscope::prelude::*;
/// use std::path::Path;
///
/// let reader = ReadyToRunReader::from_file(Path::new("app.r2r.dll"))?;
/// println!("{} methods", reader.methods().len());
/// # Ok::<(), r2rscope::Error>(())
/// ```
pub mod prelude;

/// The result type used throughout r2rscope.
pub type Result<T> = std::result::Result<T, Error>;

/// `r2rscope` Error type.
///
/// The main error type for all operations in this crate. Provides detailed error information
/// for PE parsing, container decoding and cross-assembly resolution.
///
/// # Usage Examples
///
/// ```rust,no_run
/// use r2rscope::{Error, ReadyToRunReader};
///
/// match ReadyToRunReader::from_file(std::path::Path::new("app.r2r.dll")) {
///     Ok(reader) => println!("Loaded successfully"),
///     Err(Error::NotSupported) => println!("Not a ReadyToRun image"),
///     Err(Error::Malformed { message, .. }) => println!("Malformed: {}", message),
///     Err(e) => println!("Error: {}", e),
/// }
/// ```
pub use error::Error;

/// Main entry point for ReadyToRun image analysis.
///
/// Classifies the image, parses the container header and materializes the section products.
/// See [`readytorun::reader`] for the full API.
pub use readytorun::reader::ReadyToRunReader;

/// Loaded PE image with pluggable data sources.
pub use file::File;

/// Cursor-based binary parser for native format structures.
pub use file::parser::Parser;
