//! Low-level byte order and safe reading utilities for PE and ReadyToRun parsing.
//!
//! This module provides the [`ImageIO`] trait for safe, endian-aware reading of primitive types
//! from byte slices. It is used throughout the file, metadata and readytorun modules to ensure
//! correct parsing of binary data structures; everything in the format is little-endian.

use crate::{Error::OutOfBounds, Result};

/// Trait for implementing type specific safe readers
///
/// This trait abstracts over reading primitive types from byte slices in a safe and endian-aware
/// way. It is implemented for the integer types that appear in PE, metadata and ReadyToRun
/// structures.
pub trait ImageIO: Sized {
    #[allow(missing_docs)]
    type Bytes: Sized + for<'a> TryFrom<&'a [u8]>;

    /// Read T from a byte buffer in little-endian
    fn from_le_bytes(bytes: Self::Bytes) -> Self;
}

macro_rules! impl_image_io {
    ($($ty:ty => $len:literal),+ $(,)?) => {
        $(
            impl ImageIO for $ty {
                type Bytes = [u8; $len];

                fn from_le_bytes(bytes: Self::Bytes) -> Self {
                    <$ty>::from_le_bytes(bytes)
                }
            }
        )+
    };
}

impl_image_io! {
    u8 => 1,
    u16 => 2,
    u32 => 4,
    i32 => 4,
    u64 => 8,
    i64 => 8,
}

/// Generic method to safely read T in little-endian from a data stream. Currently T can be u8,
/// u16, u32, i32, u64 and i64
///
/// ## Arguments
/// * 'data' - The data buffer / stream to read from
pub fn read_le<T: ImageIO>(data: &[u8]) -> Result<T> {
    let mut offset = 0_usize;
    read_le_at(data, &mut offset)
}

/// Generic method to safely read T from an offset and in little-endian from a data stream.
/// Currently T can be u8, u16, u32, i32, u64 and i64
///
/// ## Arguments
/// * 'data'    - The data buffer / stream to read from
/// * 'offset'  - An offset to read from, will be advanced by the amount of bytes read
pub fn read_le_at<T: ImageIO>(data: &[u8], offset: &mut usize) -> Result<T> {
    let type_len = std::mem::size_of::<T>();
    if (type_len + *offset) > data.len() {
        return Err(OutOfBounds);
    }

    let Ok(read) = data[*offset..*offset + type_len].try_into() else {
        return Err(OutOfBounds);
    };

    *offset += type_len;

    Ok(T::from_le_bytes(read))
}

/// Safely read 4 or 2 bytes from an offset and in little-endian from a data stream.
///
/// Metadata table columns are 2 or 4 bytes wide depending on the row counts of the tables they
/// index; this helper reads either width into a `u32`.
///
/// ## Arguments
/// * 'data'        - The data buffer / stream to read from
/// * 'offset'      - An offset to read from, will be advanced by the amount of bytes read
/// * `is_large`    - Indicates if 2 or 4 bytes should be read
pub fn read_le_at_dyn(data: &[u8], offset: &mut usize, is_large: bool) -> Result<u32> {
    let res = if is_large {
        read_le_at::<u32>(data, offset)?
    } else {
        u32::from(read_le_at::<u16>(data, offset)?)
    };

    Ok(res)
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_BUFFER: [u8; 8] = [0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08];

    #[test]
    fn read_le_fixed_widths() {
        assert_eq!(read_le::<u8>(&TEST_BUFFER).unwrap(), 0x01);
        assert_eq!(read_le::<u16>(&TEST_BUFFER).unwrap(), 0x0201);
        assert_eq!(read_le::<u32>(&TEST_BUFFER).unwrap(), 0x0403_0201);
        assert_eq!(read_le::<i32>(&TEST_BUFFER).unwrap(), 0x0403_0201);
        assert_eq!(read_le::<u64>(&TEST_BUFFER).unwrap(), 0x0807_0605_0403_0201);
        assert_eq!(read_le::<i64>(&TEST_BUFFER).unwrap(), 0x0807_0605_0403_0201);
    }

    #[test]
    fn read_le_advances_offset() {
        let mut offset = 2_usize;
        let result = read_le_at::<u16>(&TEST_BUFFER, &mut offset).unwrap();
        assert_eq!(result, 0x0403);
        assert_eq!(offset, 4);

        let result = read_le_at::<u32>(&TEST_BUFFER, &mut offset).unwrap();
        assert_eq!(result, 0x0807_0605);
        assert_eq!(offset, 8);
    }

    #[test]
    fn read_le_dyn() {
        let mut offset = 0;

        let res_1 = read_le_at_dyn(&TEST_BUFFER, &mut offset, true).unwrap();
        assert_eq!(res_1, 0x4030201);

        offset = 0;
        let res_2 = read_le_at_dyn(&TEST_BUFFER, &mut offset, false).unwrap();
        assert_eq!(res_2, 0x201);
    }

    #[test]
    fn errors() {
        let buffer = [0xFF, 0xFF, 0xFF, 0xFF];

        assert!(matches!(read_le::<u64>(&buffer), Err(OutOfBounds)));

        let mut offset = 3_usize;
        assert!(matches!(
            read_le_at::<u16>(&buffer, &mut offset),
            Err(OutOfBounds)
        ));
        assert_eq!(offset, 3);
    }
}
