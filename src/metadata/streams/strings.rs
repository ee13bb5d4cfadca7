//! String Heap (`#Strings`) for .NET Metadata
//!
//! Provides access to the ECMA-335 `#Strings` heap, which stores identifier strings in UTF-8
//! encoding. The ReadyToRun reader resolves assembly, type and method names through this heap.
//!
//! # Reference
//! - [ECMA-335 II.24.2.3](https://ecma-international.org/wp-content/uploads/ECMA-335_6th_edition_june_2012.pdf)

use std::ffi::CStr;

use crate::{Error::OutOfBounds, Result};

/// '#Strings' holds the identifiers referenced from metadata tables: assembly simple names, type
/// namespaces and names, method names.
///
/// The `Strings` object provides helper methods to access the data within this heap and parse it
/// properly according to the standard.
///
/// # Examples
///
/// ```rust
/// use r2rscope::metadata::streams::Strings;
/// let data = &[0u8, b'H', b'e', b'l', b'l', b'o', 0u8];
/// let strings = Strings::from(data).unwrap();
/// let s = strings.get(1).unwrap();
/// assert_eq!(s, "Hello");
/// ```
pub struct Strings<'a> {
    data: &'a [u8],
}

impl<'a> Strings<'a> {
    /// Create a `Strings` object from a sequence of bytes
    ///
    /// # Arguments
    /// * 'data'    - The byte slice from which this object shall be created
    ///
    /// # Errors
    /// Returns an error if the string heap data is empty or does not begin with the mandatory
    /// empty string
    pub fn from(data: &[u8]) -> Result<Strings> {
        if data.is_empty() || data[0] != 0 {
            return Err(malformed_error!("Provided #String heap is empty"));
        }

        Ok(Strings { data })
    }

    /// Get a view into the string contained at the provided location.
    ///
    /// ## Arguments
    /// * 'index' - The offset within the heap to be accessed (comes from metadata tables)
    ///
    /// # Errors
    /// Returns an error if the index is out of bounds or the string data is invalid UTF-8
    pub fn get(&self, index: usize) -> Result<&'a str> {
        if index > self.data.len() {
            return Err(OutOfBounds);
        }

        match CStr::from_bytes_until_nul(&self.data[index..]) {
            Ok(result) => match result.to_str() {
                Ok(result) => Ok(result),
                Err(_) => Err(malformed_error!("Invalid string at index - {}", index)),
            },
            Err(_) => Err(malformed_error!("Invalid string at index - {}", index)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crafted() {
        #[rustfmt::skip]
        let data: &[u8] = &[
            0x00,
            b'S', b'y', b's', b't', b'e', b'm', 0x00,
            b'L', b'i', b's', b't', b'`', b'1', 0x00,
            b'S', b'y', b's', b't', b'e', b'm', b'.', b'P', b'r', b'i', b'v', b'a', b't', b'e',
            b'.', b'C', b'o', b'r', b'e', b'L', b'i', b'b', 0x00,
        ];

        let str_view = Strings::from(data).unwrap();

        assert_eq!(str_view.get(0).unwrap(), "");
        assert_eq!(str_view.get(1).unwrap(), "System");
        assert_eq!(str_view.get(8).unwrap(), "List`1");
        assert_eq!(str_view.get(15).unwrap(), "System.Private.CoreLib");

        // Mid-string access yields the tail, as in the standard
        assert_eq!(str_view.get(2).unwrap(), "ystem");
    }

    #[test]
    fn crafted_invalid() {
        assert!(Strings::from(&[]).is_err());
        assert!(Strings::from(&[b'A', 0x00]).is_err());

        let data: &[u8] = &[0x00, b'A', b'B'];
        let str_view = Strings::from(data).unwrap();
        // No terminator before end of heap
        assert!(str_view.get(1).is_err());
    }
}
