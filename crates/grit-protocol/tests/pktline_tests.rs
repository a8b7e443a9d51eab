//! Frame codec behavior at the integration surface.

use std::io::Cursor;

use grit_protocol::pktline::{
    PktLine, PktLineReader, PktLineWriter, MAX_DATA_LEN, MAX_FRAME_LEN,
};
use grit_protocol::ProtocolError;

#[test]
fn format_parse_identity() {
    let payloads: Vec<Vec<u8>> = vec![
        b"".to_vec(),
        b"want 95d09f2b10159347eece71399a7e2e907ea3df4f\n".to_vec(),
        vec![0u8; 1000],
        vec![0xffu8; MAX_DATA_LEN],
    ];

    let mut bytes = Vec::new();
    {
        let mut writer = PktLineWriter::new(&mut bytes);
        for payload in &payloads {
            writer.write_data(payload).unwrap();
        }
        writer.write_flush().unwrap();
    }

    let mut reader = PktLineReader::new(Cursor::new(bytes));
    for payload in &payloads {
        assert_eq!(reader.read_frame().unwrap(), PktLine::Data(payload.clone()));
    }
    assert_eq!(reader.read_frame().unwrap(), PktLine::Flush);
}

#[test]
fn sentinels_have_no_payload() {
    let mut reader = PktLineReader::new(Cursor::new(b"0000000100020004".to_vec()));
    assert_eq!(reader.read_frame().unwrap(), PktLine::Flush);
    assert_eq!(reader.read_frame().unwrap(), PktLine::Delimiter);
    assert_eq!(reader.read_frame().unwrap(), PktLine::ResponseEnd);
    // 0004 is a legal zero-payload data frame, not a sentinel.
    assert_eq!(reader.read_frame().unwrap(), PktLine::Data(Vec::new()));
}

#[test]
fn length_below_four_and_not_sentinel_fails() {
    let mut reader = PktLineReader::new(Cursor::new(b"0003".to_vec()));
    assert!(matches!(
        reader.read_frame().unwrap_err(),
        ProtocolError::InvalidPktLine(_)
    ));
}

#[test]
fn frame_at_the_cap_is_accepted() {
    let mut bytes = Vec::new();
    PktLineWriter::new(&mut bytes)
        .write_data(&vec![7u8; MAX_DATA_LEN])
        .unwrap();
    assert_eq!(bytes.len(), MAX_FRAME_LEN);

    let mut reader = PktLineReader::new(Cursor::new(bytes));
    match reader.read_frame().unwrap() {
        PktLine::Data(payload) => assert_eq!(payload.len(), MAX_DATA_LEN),
        other => panic!("expected data, got {other:?}"),
    }
}

#[test]
fn frame_beyond_the_cap_is_rejected_both_ways() {
    // Writing: one byte too many.
    let mut sink = Vec::new();
    assert!(PktLineWriter::new(&mut sink)
        .write_data(&vec![0u8; MAX_DATA_LEN + 1])
        .is_err());

    // Reading: a declared length over the cap (0xffff > 65520).
    let mut bytes = b"ffff".to_vec();
    bytes.extend_from_slice(&vec![0u8; 0xffff - 4]);
    let mut reader = PktLineReader::new(Cursor::new(bytes));
    assert!(matches!(
        reader.read_frame().unwrap_err(),
        ProtocolError::InvalidPktLine(_)
    ));
}

#[test]
fn truncation_inside_header_and_payload() {
    let mut reader = PktLineReader::new(Cursor::new(b"00".to_vec()));
    assert!(reader.read_frame().is_err());

    let mut reader = PktLineReader::new(Cursor::new(b"0010only-8-bytes".to_vec()));
    assert!(reader.read_frame().is_err());
}

#[test]
fn non_hex_header_is_fatal() {
    for bad in [&b"00x0"[..], b"    ", b"+123", b"abcg"] {
        let mut bytes = bad.to_vec();
        bytes.extend_from_slice(&[0u8; 64]);
        let mut reader = PktLineReader::new(Cursor::new(bytes));
        assert!(reader.read_frame().is_err(), "{bad:?}");
    }
}

#[test]
fn interleaved_sections_parse_in_order() {
    let mut bytes = Vec::new();
    {
        let mut writer = PktLineWriter::new(&mut bytes);
        writer.write_text("section one").unwrap();
        writer.write_flush().unwrap();
        writer.write_text("section two, line one").unwrap();
        writer.write_text("section two, line two").unwrap();
        writer.write_flush().unwrap();
    }

    let mut reader = PktLineReader::new(Cursor::new(bytes));
    assert_eq!(reader.read_section().unwrap().len(), 1);
    assert_eq!(reader.read_section().unwrap().len(), 2);
}
