//! NativeHashtable - the bucketed lookup container of the ReadyToRun native format.
//!
//! Entries are spread over a power-of-two number of buckets; each bucket is a byte stream of
//! `(payload offset, low hash byte)` pairs with a zero terminator. The table supports full
//! enumeration (the instance-method entrypoint walk) and per-bucket candidate lookup by full
//! hash, where candidates are filtered on the stored low byte before the caller decodes the
//! payload.

use crate::{file::parser::Parser, Result};

/// A parsed NativeHashtable view over the image buffer.
///
/// # Examples
///
/// ```rust,no_run
/// use r2rscope::readytorun::nhashtable::NativeHashtable;
///
/// # let image: Vec<u8> = vec![];
/// let table = NativeHashtable::parse(&image, 0x4000)?;
/// for entry in table.enumerate_all() {
///     let (low_hash, payload_offset) = entry?;
///     println!("entry {:02x} at {:#x}", low_hash, payload_offset);
/// }
/// # Ok::<(), r2rscope::Error>(())
/// ```
pub struct NativeHashtable<'a> {
    data: &'a [u8],
    base_offset: usize,
    bucket_count: u32,
    buckets_offset: usize,
}

impl<'a> NativeHashtable<'a> {
    /// Parses a NativeHashtable header at the given image offset.
    ///
    /// ## Arguments
    ///
    /// * `data` - The image buffer.
    /// * `offset` - Absolute offset of the table header.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] if the bucket count is not a power of two or the
    /// bucket offset table does not fit the buffer.
    pub fn parse(data: &'a [u8], offset: usize) -> Result<NativeHashtable<'a>> {
        let mut parser = Parser::new(data);
        parser.seek(offset)?;

        let bucket_count = parser.read_unsigned()?;
        if bucket_count == 0 || !bucket_count.is_power_of_two() {
            return Err(malformed_error!(
                "Invalid NativeHashtable bucket count - {}",
                bucket_count
            ));
        }

        let buckets_offset = parser.pos();
        let table_end = buckets_offset
            .checked_add(bucket_count as usize * 4)
            .ok_or_else(|| malformed_error!("NativeHashtable bucket table overflow"))?;
        if table_end > data.len() {
            return Err(malformed_error!(
                "NativeHashtable bucket table out of bounds - {} buckets at {}",
                bucket_count,
                buckets_offset
            ));
        }

        Ok(NativeHashtable {
            data,
            base_offset: offset,
            bucket_count,
            buckets_offset,
        })
    }

    /// Number of buckets in the table.
    #[must_use]
    pub fn bucket_count(&self) -> u32 {
        self.bucket_count
    }

    /// Visits every entry of every bucket; ordering follows bucket layout.
    #[must_use]
    pub fn enumerate_all(&self) -> Entries<'a> {
        Entries {
            data: self.data,
            base_offset: self.base_offset,
            buckets_offset: self.buckets_offset,
            bucket: 0,
            bucket_end: self.bucket_count,
            stream_offset: None,
            low_hash_filter: None,
            failed: false,
        }
    }

    /// Yields the candidate entries for `full_hash`: the matching bucket's entries whose
    /// stored low byte equals `full_hash & 0xFF`.
    ///
    /// ## Arguments
    ///
    /// * `full_hash` - The full hash code of the key being probed.
    #[must_use]
    pub fn lookup(&self, full_hash: u32) -> Entries<'a> {
        let bucket = (full_hash >> 8) & (self.bucket_count - 1);

        Entries {
            data: self.data,
            base_offset: self.base_offset,
            buckets_offset: self.buckets_offset,
            bucket,
            bucket_end: bucket + 1,
            stream_offset: None,
            low_hash_filter: Some((full_hash & 0xFF) as u8),
            failed: false,
        }
    }
}

/// Iterator over hashtable entries, yielding `(low_hash, payload_offset)` pairs.
///
/// Payload offsets are absolute image offsets. Decoding errors surface as `Err` items and end
/// the iteration.
pub struct Entries<'a> {
    data: &'a [u8],
    base_offset: usize,
    buckets_offset: usize,
    bucket: u32,
    bucket_end: u32,
    stream_offset: Option<usize>,
    low_hash_filter: Option<u8>,
    failed: bool,
}

impl<'a> Entries<'a> {
    fn next_entry(&mut self) -> Result<Option<(u8, usize)>> {
        loop {
            let stream_offset = match self.stream_offset {
                Some(offset) => offset,
                None => {
                    if self.bucket >= self.bucket_end {
                        return Ok(None);
                    }

                    let mut parser = Parser::new(self.data);
                    parser.seek(self.buckets_offset + self.bucket as usize * 4)?;
                    let relative = parser.read_le::<u32>()? as usize;
                    self.base_offset + relative
                }
            };

            let mut parser = Parser::new(self.data);
            parser.seek(stream_offset)?;

            let tag = parser.read_unsigned()?;
            if tag == 0 {
                // End of this bucket
                self.stream_offset = None;
                self.bucket += 1;
                continue;
            }

            let low_hash = parser.read_le::<u8>()?;
            self.stream_offset = Some(parser.pos());

            let payload = self.base_offset + (tag as usize - 1);
            if payload >= self.data.len() {
                return Err(malformed_error!(
                    "NativeHashtable entry points outside the image - {}",
                    payload
                ));
            }

            if let Some(filter) = self.low_hash_filter {
                if filter != low_hash {
                    continue;
                }
            }

            return Ok(Some((low_hash, payload)));
        }
    }
}

impl<'a> Iterator for Entries<'a> {
    type Item = Result<(u8, usize)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }

        match self.next_entry() {
            Ok(Some(entry)) => Some(Ok(entry)),
            Ok(None) => None,
            Err(error) => {
                self.failed = true;
                Some(Err(error))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test::containers::build_native_hashtable;

    #[test]
    fn crafted_enumerate() {
        // Two buckets, three entries
        let buckets = vec![
            vec![(0x11u8, b"one".to_vec()), (0x22, b"two".to_vec())],
            vec![(0x33, b"three".to_vec())],
        ];
        let data = build_native_hashtable(&buckets);

        let table = NativeHashtable::parse(&data, 0).unwrap();
        assert_eq!(table.bucket_count(), 2);

        let entries: Vec<(u8, usize)> = table
            .enumerate_all()
            .collect::<Result<Vec<_>>>()
            .unwrap();
        assert_eq!(entries.len(), 3);

        assert_eq!(entries[0].0, 0x11);
        assert_eq!(&data[entries[0].1..entries[0].1 + 3], b"one");
        assert_eq!(entries[1].0, 0x22);
        assert_eq!(&data[entries[1].1..entries[1].1 + 3], b"two");
        assert_eq!(entries[2].0, 0x33);
        assert_eq!(&data[entries[2].1..entries[2].1 + 5], b"three");
    }

    #[test]
    fn crafted_lookup() {
        let buckets = vec![
            vec![(0x11u8, b"a".to_vec()), (0x44, b"b".to_vec())],
            vec![(0x11, b"c".to_vec())],
        ];
        let data = build_native_hashtable(&buckets);
        let table = NativeHashtable::parse(&data, 0).unwrap();

        // full hash 0x0011: low byte 0x11, bucket bits (0x0011 >> 8) & 1 = 0
        let hits: Vec<(u8, usize)> = table
            .lookup(0x0011)
            .collect::<Result<Vec<_>>>()
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(&data[hits[0].1..hits[0].1 + 1], b"a");

        // Same low byte, other bucket
        let hits: Vec<(u8, usize)> = table
            .lookup(0x0111)
            .collect::<Result<Vec<_>>>()
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(&data[hits[0].1..hits[0].1 + 1], b"c");

        // Low byte with no match in its bucket
        let hits: Vec<(u8, usize)> = table
            .lookup(0x0055)
            .collect::<Result<Vec<_>>>()
            .unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn crafted_empty_buckets() {
        let buckets = vec![vec![], vec![(0x01u8, b"x".to_vec())], vec![], vec![]];
        let data = build_native_hashtable(&buckets);
        let table = NativeHashtable::parse(&data, 0).unwrap();

        let entries: Vec<(u8, usize)> = table
            .enumerate_all()
            .collect::<Result<Vec<_>>>()
            .unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].0, 0x01);
    }

    #[test]
    fn crafted_invalid() {
        // Bucket count not a power of two: varint 3
        let data = [3u8 << 1, 0, 0, 0, 0];
        assert!(NativeHashtable::parse(&data, 0).is_err());

        // Bucket count 0
        let data = [0u8];
        assert!(NativeHashtable::parse(&data, 0).is_err());

        // Offset table truncated
        let data = [2u8 << 1, 0x00, 0x00];
        assert!(NativeHashtable::parse(&data, 0).is_err());

        // Entry payload outside the image
        let buckets = vec![vec![(0x11u8, b"y".to_vec())]];
        let mut data = build_native_hashtable(&buckets);
        // Rewrite the entry's payload offset varint to a huge value: find it right after
        // the 4-byte bucket table
        let stream = 1 + 4;
        data[stream] = 0xFE; // varint 0x7F -> payload at base + 0x7E, beyond the buffer
        let table = NativeHashtable::parse(&data, 0).unwrap();
        let result: Result<Vec<(u8, usize)>> = table.enumerate_all().collect();
        assert!(result.is_err());
    }
}
