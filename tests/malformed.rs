//! Error-path coverage over the public API: inputs that are not ReadyToRun images must be
//! rejected with the right error kinds, never panics.

use std::io::Write;

use r2rscope::{Error, File, Parser, ReadyToRunReader};

#[test]
fn empty_input() {
    assert!(matches!(File::from_mem(vec![]), Err(Error::Empty)));
}

#[test]
fn garbage_input() {
    // Not a PE at all
    let result = File::from_mem(vec![0xCC; 4096]);
    assert!(result.is_err());

    // Valid DOS magic but nothing behind it
    let mut data = vec![0u8; 128];
    data[0] = b'M';
    data[1] = b'Z';
    assert!(File::from_mem(data).is_err());
}

#[test]
fn garbage_file_on_disk() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(&[0xCC; 512]).unwrap();
    file.flush().unwrap();

    assert!(ReadyToRunReader::from_file(file.path()).is_err());
}

#[test]
fn missing_file() {
    let result = ReadyToRunReader::from_file(std::path::Path::new("/nonexistent/image.dll"));
    assert!(result.is_err());
}

#[test]
fn truncated_varints() {
    // Every multi-byte prefix with no continuation bytes must error out cleanly
    for first in [0x01u8, 0x03, 0x07, 0x0F] {
        let data = [first];
        let mut parser = Parser::new(&data);
        assert!(parser.read_unsigned().is_err(), "prefix 0x{first:02x}");
    }
}

#[test]
fn varint_widths() {
    let cases: [(&[u8], u32); 5] = [
        (&[0x2A], 21),
        (&[0x01, 0x02], 0x80),
        (&[0x03, 0x00, 0x02], 0x4000),
        (&[0x07, 0x00, 0x00, 0x02], 0x20_0000),
        (&[0x0F, 0x00, 0x00, 0x00, 0x10], 0x1000_0000),
    ];

    for (bytes, expected) in cases {
        let mut parser = Parser::new(bytes);
        assert_eq!(parser.read_unsigned().unwrap(), expected);
        assert!(!parser.has_more_data());
    }
}
