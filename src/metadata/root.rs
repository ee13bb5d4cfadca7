//! Metadata root header and stream directory.
//!
//! This module defines the [`Root`] struct, which represents the root metadata header and stream
//! directory as specified by ECMA-335. The ReadyToRun reader parses two such roots: the primary
//! metadata of a single-assembly image, and the manifest metadata blob that composite images
//! embed for their extra assembly references.
//!
//! # References
//!
//! - [ECMA-335 II.24.2.1: Metadata root](https://ecma-international.org/wp-content/uploads/ECMA-335_6th_edition_june_2012.pdf)

use crate::{
    file::io::{read_le, read_le_at},
    metadata::streams::StreamHeader,
    Error::OutOfBounds,
    Result,
};

/// The MAGIC value indicating the metadata root ('BSJB')
pub const METADATA_MAGIC: u32 = 0x424A_5342;

/// The header of the present metadata, providing the version string and the stream directory
/// required to locate the `#Strings` heap and the `#~` tables stream.
///
/// # Example
///
/// ```rust
/// use r2rscope::metadata::root::Root;
/// let root = Root::read(&[
///     0x42, 0x53, 0x4A, 0x42, // signature
///     0x01, 0x00, 0x01, 0x00, // major, minor
///     0x00, 0x00, 0x00, 0x00, // reserved
///     0x04, 0x00, 0x00, 0x00, // version length
///     b'v', b'8', b'.', 0x00, // version string
///     0x00, 0x00,             // flags
///     0x01, 0x00,             // stream count
///     0x20, 0x00, 0x00, 0x00, // stream offset
///     0x04, 0x00, 0x00, 0x00, // stream size
///     0x23, 0x7E, 0x00, 0x00, // "#~"
/// ])?;
/// assert_eq!(root.version, "v8.");
/// assert_eq!(root.stream("#~"), Some((0x20, 4)));
/// # Ok::<(), r2rscope::Error>(())
/// ```
pub struct Root {
    /// Magic signature for physical metadata: 0x424A5342
    pub signature: u32,
    /// `MajorVersion`
    pub major_version: u16,
    /// `MinorVersion`
    pub minor_version: u16,
    /// 'VersionString' with trailing padding removed
    pub version: String,
    /// Reserved, always 0
    pub flags: u16,
    /// Streams
    pub stream_headers: Vec<StreamHeader>,
}

impl Root {
    /// Reads a [`Root`] metadata header from a byte slice.
    ///
    /// # Arguments
    /// * `data` - The byte slice from which this object shall be read, starting at the root
    ///   signature
    ///
    /// # Errors
    /// Returns an error if the data is too short, the signature is invalid, or the stream
    /// directory is malformed.
    pub fn read(data: &[u8]) -> Result<Root> {
        if data.len() < 20 {
            return Err(OutOfBounds);
        }

        let signature = read_le::<u32>(data)?;
        if signature != METADATA_MAGIC {
            return Err(malformed_error!(
                "METADATA_MAGIC does not match - {}",
                signature
            ));
        }

        let version_length = read_le::<u32>(&data[12..])? as usize;
        let Some(version_end) = version_length.checked_add(16) else {
            return Err(malformed_error!(
                "Version string length causing integer overflow - {}",
                version_length
            ));
        };
        if version_end > data.len() || version_length > 255 {
            return Err(OutOfBounds);
        }

        let version_bytes = &data[16..version_end];
        let version = match std::str::from_utf8(version_bytes) {
            Ok(value) => value.trim_end_matches('\0').to_string(),
            Err(_) => return Err(malformed_error!("Version string is not valid UTF-8")),
        };

        let mut offset = version_end;
        let flags = read_le_at::<u16>(data, &mut offset)?;
        let stream_count = read_le_at::<u16>(data, &mut offset)?;
        if stream_count == 0 || stream_count > 6 {
            return Err(malformed_error!("Invalid stream count - {}", stream_count));
        }

        let mut streams = Vec::with_capacity(stream_count as usize);
        for _ in 0..stream_count {
            if offset > data.len() {
                return Err(OutOfBounds);
            }

            let stream = StreamHeader::from(&data[offset..])?;
            match u32::checked_add(stream.offset, stream.size) {
                Some(range) => {
                    if range as usize > data.len() {
                        return Err(OutOfBounds);
                    }
                }
                None => {
                    return Err(malformed_error!(
                        "Stream offset and size cause integer overflow - {} + {}",
                        stream.offset,
                        stream.size
                    ))
                }
            }

            if streams
                .iter()
                .any(|seen: &StreamHeader| seen.name == stream.name)
            {
                return Err(malformed_error!(
                    "Duplicate stream name found: '{}'",
                    stream.name
                ));
            }

            offset += stream.byte_len();
            streams.push(stream);
        }

        Ok(Root {
            signature,
            major_version: read_le::<u16>(&data[4..])?,
            minor_version: read_le::<u16>(&data[6..])?,
            version,
            flags,
            stream_headers: streams,
        })
    }

    /// Returns the `(offset, size)` of the stream with the given name, relative to the root.
    #[must_use]
    pub fn stream(&self, name: &str) -> Option<(usize, usize)> {
        self.stream_headers
            .iter()
            .find(|header| header.name == name)
            .map(|header| (header.offset as usize, header.size as usize))
    }
}
