//! Framed handshake messages.
//!
//! A message is a kind tag followed by a sorted tag/offset table and the
//! concatenated values. All parsing here faces adversarial input: the tag
//! table must be strictly ascending and duplicate-free, offsets may only
//! grow, and the total value size is bounded before anything is allocated.

use crate::tag::Tag;
use std::collections::BTreeMap;
use std::io::{self, Read};
use thiserror::Error;

/// Map from tag to value. `BTreeMap` keeps the canonical wire order.
pub type TagMap = BTreeMap<Tag, Vec<u8>>;

/// Upper bound on the number of tag/value pairs in one message.
pub const MAX_ENTRIES: u16 = 128;

/// Upper bound on the concatenated value bytes of one message.
pub const MAX_VALUE_BYTES: usize = 1 << 20;

#[derive(Debug, Error)]
pub enum MessageError {
    /// The stream ended cleanly at a message boundary.
    #[error("handshake stream ended")]
    EndOfStream,
    /// The stream ended in the middle of a message.
    #[error("handshake message truncated")]
    Truncated,
    #[error("handshake message declares too many entries")]
    TooManyEntries,
    #[error("handshake message tags out of order")]
    TagsOutOfOrder,
    #[error("handshake message repeats tag {0}")]
    DuplicateTag(Tag),
    #[error("handshake message value offsets decrease")]
    OffsetsDecreasing,
    #[error("handshake message values exceed the size bound")]
    ValuesTooLong,
    #[error("trailing bytes after handshake message")]
    TrailingBytes,
    #[error("io error on handshake stream: {0}")]
    Io(#[from] io::Error),
}

impl MessageError {
    /// True when the underlying stream finished cleanly between messages.
    pub fn is_end_of_stream(&self) -> bool {
        matches!(self, MessageError::EndOfStream)
    }
}

/// One framed handshake message: a kind tag plus its tag map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeMessage {
    pub tag: Tag,
    pub data: TagMap,
}

impl HandshakeMessage {
    pub fn new(tag: Tag, data: TagMap) -> Self {
        Self { tag, data }
    }

    /// Encode in canonical form: entries sorted ascending, offsets cumulative.
    pub fn serialize(&self) -> Vec<u8> {
        debug_assert!(self.data.len() <= MAX_ENTRIES as usize);
        let values_len: usize = self.data.values().map(Vec::len).sum();
        let mut out = Vec::with_capacity(8 + self.data.len() * 8 + values_len);
        out.extend_from_slice(&self.tag.to_bytes());
        out.extend_from_slice(&(self.data.len() as u16).to_le_bytes());
        out.extend_from_slice(&[0u8; 2]);
        let mut end_offset = 0u32;
        for (tag, value) in &self.data {
            end_offset += value.len() as u32;
            out.extend_from_slice(&tag.to_bytes());
            out.extend_from_slice(&end_offset.to_le_bytes());
        }
        for value in self.data.values() {
            out.extend_from_slice(value);
        }
        out
    }

    /// Decode a message that occupies the whole slice.
    pub fn parse(bytes: &[u8]) -> Result<Self, MessageError> {
        let mut reader = bytes;
        let (_, message) = read_handshake_message(&mut reader)?;
        if !reader.is_empty() {
            return Err(MessageError::TrailingBytes);
        }
        Ok(message)
    }
}

/// Read one framed handshake message from a byte stream.
///
/// Returns the exact raw bytes of the message alongside the decoded form;
/// the handshake signs and derives keys over the bytes the client actually
/// sent, not a re-serialization.
pub fn read_handshake_message(
    r: &mut impl Read,
) -> Result<(Vec<u8>, HandshakeMessage), MessageError> {
    let mut head = [0u8; 4];
    let mut filled = 0;
    while filled < head.len() {
        let n = r.read(&mut head[filled..])?;
        if n == 0 {
            return Err(if filled == 0 {
                MessageError::EndOfStream
            } else {
                MessageError::Truncated
            });
        }
        filled += n;
    }
    let tag = Tag::new(head);
    let mut raw = head.to_vec();

    let mut meta = [0u8; 4];
    fill(r, &mut meta)?;
    raw.extend_from_slice(&meta);
    let num_entries = u16::from_le_bytes([meta[0], meta[1]]);
    if num_entries > MAX_ENTRIES {
        return Err(MessageError::TooManyEntries);
    }

    let mut table = vec![0u8; num_entries as usize * 8];
    fill(r, &mut table)?;
    raw.extend_from_slice(&table);

    let mut entries = Vec::with_capacity(num_entries as usize);
    let mut previous: Option<Tag> = None;
    let mut last_end = 0u32;
    for chunk in table.chunks_exact(8) {
        let entry_tag = Tag::new([chunk[0], chunk[1], chunk[2], chunk[3]]);
        let end = u32::from_le_bytes([chunk[4], chunk[5], chunk[6], chunk[7]]);
        match previous {
            Some(prev) if entry_tag == prev => return Err(MessageError::DuplicateTag(entry_tag)),
            Some(prev) if entry_tag < prev => return Err(MessageError::TagsOutOfOrder),
            _ => {}
        }
        if end < last_end {
            return Err(MessageError::OffsetsDecreasing);
        }
        entries.push((entry_tag, last_end as usize, end as usize));
        previous = Some(entry_tag);
        last_end = end;
    }

    let total = last_end as usize;
    if total > MAX_VALUE_BYTES {
        return Err(MessageError::ValuesTooLong);
    }
    let mut values = vec![0u8; total];
    fill(r, &mut values)?;
    raw.extend_from_slice(&values);

    let mut data = TagMap::new();
    for (entry_tag, start, end) in entries {
        data.insert(entry_tag, values[start..end].to_vec());
    }
    Ok((raw, HandshakeMessage { tag, data }))
}

fn fill(r: &mut impl Read, buf: &mut [u8]) -> Result<(), MessageError> {
    r.read_exact(buf).map_err(|err| match err.kind() {
        io::ErrorKind::UnexpectedEof => MessageError::Truncated,
        _ => MessageError::Io(err),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn sample_map() -> TagMap {
        let mut map = TagMap::new();
        map.insert(Tag::SNI, b"example.org".to_vec());
        map.insert(Tag::STK, b"token".to_vec());
        map.insert(Tag::PUBS, Vec::new());
        map
    }

    #[test]
    fn round_trips_a_message() {
        let message = HandshakeMessage::new(Tag::CHLO, sample_map());
        let encoded = message.serialize();
        assert_eq!(&encoded[0..4], b"CHLO");
        let decoded = HandshakeMessage::parse(&encoded).expect("parse");
        assert_eq!(decoded, message);
    }

    #[test]
    fn round_trips_an_empty_map() {
        let message = HandshakeMessage::new(Tag::REJ, TagMap::new());
        let decoded = HandshakeMessage::parse(&message.serialize()).expect("parse");
        assert!(decoded.data.is_empty());
    }

    #[test]
    fn preserves_empty_values() {
        let message = HandshakeMessage::new(Tag::CHLO, sample_map());
        let decoded = HandshakeMessage::parse(&message.serialize()).expect("parse");
        assert_eq!(decoded.data.get(&Tag::PUBS), Some(&Vec::new()));
    }

    fn raw_message(tag: &[u8; 4], entries: &[([u8; 4], u32)], values: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(tag);
        out.extend_from_slice(&(entries.len() as u16).to_le_bytes());
        out.extend_from_slice(&[0u8; 2]);
        for (entry_tag, end) in entries {
            out.extend_from_slice(entry_tag);
            out.extend_from_slice(&end.to_le_bytes());
        }
        out.extend_from_slice(values);
        out
    }

    #[test]
    fn rejects_out_of_order_tags() {
        let encoded = raw_message(b"CHLO", &[(*b"SNI\0", 1), (*b"PAD\0", 2)], b"ab");
        assert!(matches!(
            HandshakeMessage::parse(&encoded),
            Err(MessageError::TagsOutOfOrder)
        ));
    }

    #[test]
    fn rejects_duplicate_tags() {
        let encoded = raw_message(b"CHLO", &[(*b"SNI\0", 1), (*b"SNI\0", 2)], b"ab");
        assert!(matches!(
            HandshakeMessage::parse(&encoded),
            Err(MessageError::DuplicateTag(tag)) if tag == Tag::SNI
        ));
    }

    #[test]
    fn rejects_decreasing_offsets() {
        let encoded = raw_message(b"CHLO", &[(*b"PAD\0", 2), (*b"SNI\0", 1)], b"ab");
        assert!(matches!(
            HandshakeMessage::parse(&encoded),
            Err(MessageError::OffsetsDecreasing)
        ));
    }

    #[test]
    fn rejects_too_many_entries() {
        let mut encoded = Vec::new();
        encoded.extend_from_slice(b"CHLO");
        encoded.extend_from_slice(&(MAX_ENTRIES + 1).to_le_bytes());
        encoded.extend_from_slice(&[0u8; 2]);
        assert!(matches!(
            HandshakeMessage::parse(&encoded),
            Err(MessageError::TooManyEntries)
        ));
    }

    #[test]
    fn rejects_values_past_the_size_bound() {
        let oversized = (MAX_VALUE_BYTES + 1) as u32;
        let encoded = raw_message(b"CHLO", &[(*b"PAD\0", oversized)], b"");
        assert!(matches!(
            HandshakeMessage::parse(&encoded),
            Err(MessageError::ValuesTooLong)
        ));
    }

    #[test]
    fn reports_truncated_values() {
        let encoded = raw_message(b"CHLO", &[(*b"PAD\0", 4)], b"ab");
        assert!(matches!(
            HandshakeMessage::parse(&encoded),
            Err(MessageError::Truncated)
        ));
    }

    #[test]
    fn reports_clean_end_of_stream() {
        let mut empty: &[u8] = &[];
        let err = read_handshake_message(&mut empty).unwrap_err();
        assert!(err.is_end_of_stream());
    }

    #[test]
    fn mid_header_eof_is_truncation() {
        let mut short: &[u8] = b"CH";
        assert!(matches!(
            read_handshake_message(&mut short),
            Err(MessageError::Truncated)
        ));
    }

    #[test]
    fn rejects_trailing_bytes() {
        let mut encoded = HandshakeMessage::new(Tag::REJ, TagMap::new()).serialize();
        encoded.push(0);
        assert!(matches!(
            HandshakeMessage::parse(&encoded),
            Err(MessageError::TrailingBytes)
        ));
    }

    #[test]
    fn reads_consecutive_messages_from_one_stream() {
        let first = HandshakeMessage::new(Tag::CHLO, sample_map());
        let second = HandshakeMessage::new(Tag::REJ, TagMap::new());
        let mut stream = first.serialize();
        stream.extend_from_slice(&second.serialize());
        let mut reader: &[u8] = &stream;

        let (raw, decoded) = read_handshake_message(&mut reader).expect("first");
        assert_eq!(raw, first.serialize());
        assert_eq!(decoded, first);
        let (_, decoded) = read_handshake_message(&mut reader).expect("second");
        assert_eq!(decoded, second);
        assert!(read_handshake_message(&mut reader)
            .unwrap_err()
            .is_end_of_stream());
    }

    proptest! {
        #[test]
        fn serialize_parse_round_trip(
            kind in any::<u32>(),
            entries in prop::collection::btree_map(
                any::<u32>().prop_map(Tag),
                prop::collection::vec(any::<u8>(), 0..64),
                0..16,
            ),
        ) {
            let message = HandshakeMessage::new(Tag(kind), entries);
            let encoded = message.serialize();
            let decoded = HandshakeMessage::parse(&encoded).expect("parse");
            prop_assert_eq!(&decoded, &message);
            // The canonical encoding is a fixed point.
            prop_assert_eq!(decoded.serialize(), encoded);
        }
    }
}
