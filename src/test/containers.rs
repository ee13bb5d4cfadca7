//! Builders for the two native container formats.

use super::encode_unsigned;

/// Builds a NativeArray with the given elements (`None` = absent) and entry width code.
///
/// Returns the serialized bytes and, per element, the absolute payload offset it was placed
/// at (`None` for absent elements).
pub(crate) fn build_native_array(
    elements: &[Option<Vec<u8>>],
    width_log2: u8,
) -> (Vec<u8>, Vec<Option<usize>>) {
    let width = 1usize << width_log2;
    let sentinel: u64 = if width == 32 {
        u64::from(u32::MAX)
    } else {
        (1u64 << width) - 1
    };

    // Assign blob offsets first
    let mut blob = Vec::new();
    let mut entries = Vec::with_capacity(elements.len());
    for element in elements {
        match element {
            Some(payload) => {
                entries.push(blob.len() as u64);
                blob.extend_from_slice(payload);
            }
            None => entries.push(sentinel),
        }
    }

    let mut data = encode_unsigned((elements.len() as u32) << 3 | u32::from(width_log2));

    // Pack the entry table LSB-first
    let entry_bits = elements.len() * width;
    let mut table = vec![0u8; (entry_bits + 7) / 8];
    for (index, entry) in entries.iter().enumerate() {
        assert!(*entry <= sentinel, "payload offset exceeds entry width");
        let bit_pos = index * width;
        for bit in 0..width {
            if entry & (1 << bit) != 0 {
                table[(bit_pos + bit) / 8] |= 1 << ((bit_pos + bit) % 8);
            }
        }
    }
    data.extend_from_slice(&table);

    let blob_base = data.len();
    data.extend_from_slice(&blob);

    let offsets = elements
        .iter()
        .zip(entries)
        .map(|(element, entry)| element.as_ref().map(|_| blob_base + entry as usize))
        .collect();

    (data, offsets)
}

/// Builds a NativeHashtable from per-bucket entry lists of `(low_hash, payload)` pairs.
///
/// The bucket count is `buckets.len()` and must be a power of two.
pub(crate) fn build_native_hashtable(buckets: &[Vec<(u8, Vec<u8>)>]) -> Vec<u8> {
    assert!(buckets.len().is_power_of_two());

    let header = encode_unsigned(buckets.len() as u32);
    let table_offset = header.len();
    let streams_offset = table_offset + buckets.len() * 4;

    // Lay out payloads after the bucket streams; stream sizes depend on the varint widths of
    // the payload offsets, so place payloads generously far and patch nothing: compute stream
    // bytes first with worst-case 5-byte varints replaced by exact two-pass sizing.
    let mut payloads = Vec::new();
    let payload_offsets: Vec<Vec<usize>>;

    // First pass: tentative stream size with payload offsets unknown; iterate until stable.
    let mut payload_base = streams_offset;
    loop {
        let mut streams_len = 0;
        let mut offsets: Vec<Vec<usize>> = Vec::with_capacity(buckets.len());
        let mut payload_cursor = 0usize;

        for bucket in buckets {
            let mut bucket_offsets = Vec::with_capacity(bucket.len());
            for (_, payload) in bucket {
                let absolute = payload_base + payload_cursor;
                bucket_offsets.push(absolute);
                streams_len += encode_unsigned(absolute as u32 + 1).len() + 1;
                payload_cursor += payload.len();
            }
            streams_len += 1; // terminator
            offsets.push(bucket_offsets);
        }

        let required_base = streams_offset + streams_len;
        if required_base == payload_base {
            payload_offsets = offsets;
            break;
        }
        payload_base = required_base;
    }

    // Second pass: serialize
    let mut bucket_table = Vec::with_capacity(buckets.len() * 4);
    let mut streams = Vec::new();
    for (bucket, offsets) in buckets.iter().zip(&payload_offsets) {
        let stream_start = streams_offset + streams.len();
        bucket_table.extend_from_slice(&(stream_start as u32).to_le_bytes());

        for ((low_hash, payload), absolute) in bucket.iter().zip(offsets) {
            streams.extend_from_slice(&encode_unsigned(*absolute as u32 + 1));
            streams.push(*low_hash);
            payloads.extend_from_slice(payload);
        }
        streams.push(0x00); // terminator
    }

    let mut data = header;
    data.extend_from_slice(&bucket_table);
    data.extend_from_slice(&streams);
    data.extend_from_slice(&payloads);
    data
}
