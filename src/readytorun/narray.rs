//! NativeArray - the packed, randomly indexable array of the ReadyToRun native format.
//!
//! A NativeArray maps a dense index space (method row ids, runtime-function ids) to
//! variable-length payloads. The header varint carries the element count and the bit width of
//! the entry table; each entry is a byte offset into the payload blob that follows the table,
//! with the all-ones pattern marking an absent element.
//!
//! The decoder is deliberately reusable: every section that stores per-index blobs
//! (`MethodDefEntryPoints`, `DebugInfo`) goes through this type instead of open-coding the
//! layout.

use crate::{file::parser::Parser, Result};

/// A parsed NativeArray view over the image buffer.
///
/// Lookup is O(1) and allocation-free: the entry table is bit-addressed in place and the
/// returned payload offsets are absolute image offsets.
///
/// # Examples
///
/// ```rust
/// use r2rscope::readytorun::narray::NativeArray;
///
/// // count = 2, entry width 8 bits: header varint (2 << 3 | 3) encoded as one byte
/// let data = [0x26, 0x00, 0xFF, 0x42];
/// let array = NativeArray::parse(&data, 0)?;
/// assert_eq!(array.count(), 2);
/// assert_eq!(array.try_get_at(0)?, Some(3)); // payload offset of entry 0
/// assert_eq!(array.try_get_at(1)?, None);    // all-ones entry is absent
/// # Ok::<(), r2rscope::Error>(())
/// ```
pub struct NativeArray<'a> {
    data: &'a [u8],
    count: u32,
    width_log2: u32,
    entries_offset: usize,
    blob_offset: usize,
}

impl<'a> NativeArray<'a> {
    /// Parses a NativeArray header at the given image offset.
    ///
    /// ## Arguments
    ///
    /// * `data` - The image buffer.
    /// * `offset` - Absolute offset of the array header.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] if the header declares an invalid entry width or
    /// the entry table does not fit the buffer.
    pub fn parse(data: &'a [u8], offset: usize) -> Result<NativeArray<'a>> {
        let mut parser = Parser::new(data);
        parser.seek(offset)?;

        let header = parser.read_unsigned()?;
        let count = header >> 3;
        let width_log2 = header & 0x7;
        if width_log2 == 0 || width_log2 > 5 {
            return Err(malformed_error!(
                "Invalid NativeArray entry width code - {}",
                width_log2
            ));
        }

        let entries_offset = parser.pos();
        let entry_bits = (count as usize)
            .checked_mul(1 << width_log2)
            .ok_or_else(|| malformed_error!("NativeArray entry table overflow - {}", count))?;
        let blob_offset = entries_offset + (entry_bits + 7) / 8;
        if blob_offset > data.len() {
            return Err(malformed_error!(
                "NativeArray entry table out of bounds - {} entries at {}",
                count,
                entries_offset
            ));
        }

        Ok(NativeArray {
            data,
            count,
            width_log2,
            entries_offset,
            blob_offset,
        })
    }

    /// Element count of the array.
    #[must_use]
    pub fn count(&self) -> u32 {
        self.count
    }

    /// Looks up the element at `index`.
    ///
    /// Returns `None` for an absent element or an out-of-range index; otherwise the absolute
    /// image offset at which the element's payload begins.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] if a present entry points outside the buffer.
    pub fn try_get_at(&self, index: u32) -> Result<Option<usize>> {
        if index >= self.count {
            return Ok(None);
        }

        let width = 1usize << self.width_log2;
        let bit_pos = index as usize * width;
        let byte_pos = self.entries_offset + bit_pos / 8;
        let shift = bit_pos % 8;

        let needed = (shift + width + 7) / 8;
        let mut raw = 0u64;
        for (i, byte) in self.data[byte_pos..byte_pos + needed].iter().enumerate() {
            raw |= u64::from(*byte) << (8 * i);
        }

        let mask = if width == 32 {
            u64::from(u32::MAX)
        } else {
            (1u64 << width) - 1
        };
        let entry = (raw >> shift) & mask;

        if entry == mask {
            return Ok(None);
        }

        let payload = self.blob_offset + entry as usize;
        if payload >= self.data.len() {
            return Err(malformed_error!(
                "NativeArray entry {} points outside the image - {}",
                index,
                payload
            ));
        }

        Ok(Some(payload))
    }
}
