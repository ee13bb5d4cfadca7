//! Metadata stream access for the compact ECMA-335 reader.
//!
//! A metadata root carries a directory of named streams; the ReadyToRun reader needs two of
//! them: `#Strings` (identifier heap) and `#~` (the tables stream, parsed by
//! [`crate::metadata::tables`]). The other heaps (`#Blob`, `#GUID`, `#US`) are located but not
//! decoded - nothing in the ReadyToRun cross-references requires their content.

mod streamheader;
mod strings;

pub use streamheader::StreamHeader;
pub use strings::Strings;
