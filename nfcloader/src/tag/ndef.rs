//! NDEF message framing for the `N/P` MIME record.
//!
//! Packets travel inside a single MIME record of type `N/P`, wrapped in an
//! NDEF message TLV in the tag's Type 2 memory.
//!
//! ```text
//! +------+-------------+--------+----------+-------------+------+---------+
//! | 0x03 | NDEF LENGTH | HEADER | TYPE LEN | PAYLOAD LEN | TYPE | PAYLOAD |
//! +------+-------------+--------+----------+-------------+------+---------+
//! |  1   |   1 or 3    |   1    |    1     |   1 or 4    |  3   |    n    |
//! +------+-------------+--------+----------+-------------+------+---------+
//! ```
//!
//! The message is written with a zero NDEF length first and the real length
//! last, so the tag never exposes a partially written message.

use {
    byteorder::{BigEndian, WriteBytesExt},
    log::trace,
};

/// MIME type of the download records.
pub const MIME_TYPE: &[u8] = b"N/P";

/// NDEF message TLV tag.
pub const TLV_NDEF_MESSAGE: u8 = 0x03;

/// Record header: MB | ME | SR, TNF = media type.
pub const SHORT_RECORD_HEADER: u8 = 0xD2;

/// Record header: MB | ME, TNF = media type.
pub const LONG_RECORD_HEADER: u8 = 0xC2;

/// Bytes read back from the tag when looking for a response.
pub const READ_WINDOW: usize = 32;

/// Type 2 tag page size.
pub const PAGE_SIZE: usize = 4;

/// An NDEF message ready to be written page by page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedMessage {
    /// Message bytes with a zero NDEF length, padded to whole pages.
    pub body: Vec<u8>,
    /// First page carrying the real NDEF length, written last.
    pub first_page: [u8; PAGE_SIZE],
}

impl EncodedMessage {
    /// Number of pages in the body.
    pub fn page_count(&self) -> usize {
        self.body
            .len()
            / PAGE_SIZE
    }
}

/// Wrap `payload` in an NDEF message holding one `N/P` MIME record.
#[allow(clippy::cast_possible_truncation)]
#[allow(clippy::unwrap_used)] // Writing to Vec<u8> cannot fail
pub fn encode_message(payload: &[u8]) -> EncodedMessage {
    let long_record = payload.len() > 0xFF;

    // Header, type length, payload length, type, payload
    let mut ndef_length = 1 + 1 + MIME_TYPE.len() + 1 + payload.len();
    if long_record {
        ndef_length += 3;
    }
    let long_tlv = ndef_length > 0xFE;

    let mut body = Vec::with_capacity(ndef_length + 4 + PAGE_SIZE);
    body.push(TLV_NDEF_MESSAGE);
    body.push(0x00);
    if long_tlv {
        body.extend_from_slice(&[0x00, 0x00]);
    }

    if long_record {
        body.push(LONG_RECORD_HEADER);
        body.push(MIME_TYPE.len() as u8);
        body.write_u32::<BigEndian>(payload.len() as u32)
            .unwrap();
    } else {
        body.push(SHORT_RECORD_HEADER);
        body.push(MIME_TYPE.len() as u8);
        body.push(payload.len() as u8);
    }
    body.extend_from_slice(MIME_TYPE);
    body.extend_from_slice(payload);

    let first_page = if long_tlv {
        let len = (ndef_length as u16).to_be_bytes();
        [TLV_NDEF_MESSAGE, 0xFF, len[0], len[1]]
    } else {
        [TLV_NDEF_MESSAGE, ndef_length as u8, body[2], body[3]]
    };

    let padded = body
        .len()
        .next_multiple_of(PAGE_SIZE);
    body.resize(padded, 0x00);

    trace!(
        "NDEF message: {} bytes payload, {} pages",
        payload.len(),
        padded / PAGE_SIZE
    );

    EncodedMessage { body, first_page }
}

/// Extract the payload of a short MIME record from the start of tag memory.
///
/// Only records that fit the [`READ_WINDOW`] are recognised; anything else
/// is treated as "no packet".
pub fn decode_message(data: &[u8]) -> Option<Vec<u8>> {
    if data.len() < 5 {
        return None;
    }

    let type_len = usize::from(data[3]);
    let payload_len = usize::from(data[4]);

    if data[0] != TLV_NDEF_MESSAGE
        || data[1] >= 30
        || data[2] != SHORT_RECORD_HEADER
        || type_len + payload_len >= 27
    {
        return None;
    }

    let start = 5 + type_len;
    data.get(start..start + payload_len)
        .map(<[u8]>::to_vec)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_short_message() {
        let msg = encode_message(&[0x48, 0x00, 0x01, 0x00, 0xAA]);

        assert_eq!(
            msg.body,
            vec![
                0x03, 0x00, 0xD2, 0x03, // TLV, placeholder length, header, type length
                0x05, b'N', b'/', b'P', // payload length, type
                0x48, 0x00, 0x01, 0x00, // payload
                0xAA, 0x00, 0x00, 0x00, // payload, padding
            ]
        );
        // 1 + 1 + 3 + 1 + 5
        assert_eq!(msg.first_page, [0x03, 11, 0xD2, 0x03]);
        assert_eq!(msg.page_count(), 4);
    }

    #[test]
    fn test_encode_empty_payload() {
        let msg = encode_message(&[]);
        assert_eq!(
            msg.body,
            vec![0x03, 0x00, 0xD2, 0x03, 0x00, b'N', b'/', b'P']
        );
        assert_eq!(msg.first_page, [0x03, 6, 0xD2, 0x03]);
    }

    #[test]
    fn test_encode_short_record_long_tlv() {
        // 249 + 6 = 255 > 0xFE, but the record itself is still short
        let payload = vec![0x5A; 249];
        let msg = encode_message(&payload);

        assert_eq!(&msg.body[..7], &[0x03, 0x00, 0x00, 0x00, 0xD2, 0x03, 249]);
        assert_eq!(msg.first_page, [0x03, 0xFF, 0x00, 0xFF]);
        assert_eq!(msg.body.len() % PAGE_SIZE, 0);
    }

    #[test]
    fn test_encode_long_record() {
        // Largest final packet: 486 data bytes + header + CRC
        let payload = vec![0x11; 492];
        let msg = encode_message(&payload);

        let ndef_length: u16 = 1 + 1 + 3 + 1 + 492 + 3;
        assert_eq!(
            &msg.body[..10],
            &[0x03, 0x00, 0x00, 0x00, 0xC2, 0x03, 0x00, 0x00, 0x01, 0xEC]
        );
        assert_eq!(&msg.body[10..13], MIME_TYPE);
        assert_eq!(&msg.body[13..13 + 492], payload.as_slice());
        assert_eq!(
            msg.first_page,
            [0x03, 0xFF, (ndef_length >> 8) as u8, ndef_length as u8]
        );
        // Still fits the tag's shared memory
        assert!(msg.body.len() <= 512);
    }

    #[test]
    fn test_decode_message() {
        let mut data = vec![0x03, 12, 0xD2, 0x03, 0x06, b'N', b'/', b'P'];
        data.extend_from_slice(&[0x48, 0x01, 0x02, 0x00, 0x00, 0x00]);
        data.resize(READ_WINDOW, 0x00);

        assert_eq!(
            decode_message(&data),
            Some(vec![0x48, 0x01, 0x02, 0x00, 0x00, 0x00])
        );
    }

    #[test]
    fn test_decode_rejects_foreign_content() {
        let mut data = vec![0x03, 12, 0xD2, 0x03, 0x06, b'N', b'/', b'P'];
        data.resize(READ_WINDOW, 0x00);

        let mut not_ndef = data.clone();
        not_ndef[0] = 0x00;
        assert_eq!(decode_message(&not_ndef), None);

        let mut too_long = data.clone();
        too_long[1] = 30;
        assert_eq!(decode_message(&too_long), None);

        let mut long_record = data.clone();
        long_record[2] = LONG_RECORD_HEADER;
        assert_eq!(decode_message(&long_record), None);

        let mut oversized = data.clone();
        oversized[4] = 24;
        assert_eq!(decode_message(&oversized), None);

        assert_eq!(decode_message(&data[..4]), None);
    }

    #[test]
    fn test_encoded_short_message_decodes() {
        let payload = [0x49, 0x01, 0x01, 0x00, 0x00, 0x00];
        let msg = encode_message(&payload);

        let mut memory = msg.body.clone();
        memory[..PAGE_SIZE].copy_from_slice(&msg.first_page);
        memory.resize(READ_WINDOW, 0x00);

        assert_eq!(decode_message(&memory), Some(payload.to_vec()));
    }
}
