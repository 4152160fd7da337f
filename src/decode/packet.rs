//! MySQL wire packet framing
//!
//! Each packet is a 3-byte little-endian payload length, a 1-byte sequence
//! number and the payload. For client requests the first payload byte is
//! the command.

use bytes::{Bytes, BytesMut};

pub const HEADER_LEN: usize = 4;

/// Text statement request
pub const COM_QUERY: u8 = 3;

/// First payload byte of an error packet
pub const ERR_MARKER: u8 = 0xFF;

/// First payload byte of an EOF packet
pub const EOF_MARKER: u8 = 0xFE;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MysqlPacket {
    pub sequence: u8,
    pub command: u8,
    /// Payload after the command byte
    pub body: Bytes,
}

/// Strip one complete packet off the front of `buf`.
///
/// Returns `None` and leaves `buf` untouched when fewer than five bytes are
/// buffered, the declared length is zero, or the packet is not complete yet.
pub fn carve_packet(buf: &mut BytesMut) -> Option<MysqlPacket> {
    if buf.len() < HEADER_LEN + 1 {
        return None;
    }
    let size = u32::from_le_bytes([buf[0], buf[1], buf[2], 0]) as usize;
    if size == 0 || buf.len() < size + HEADER_LEN {
        return None;
    }

    let mut packet = buf.split_to(size + HEADER_LEN);
    let sequence = packet[3];
    let command = packet[4];
    let body = packet.split_off(HEADER_LEN + 1).freeze();
    Some(MysqlPacket {
        sequence,
        command,
        body,
    })
}

/// Frame `payload` as one packet; used by tests and replay tooling
pub fn encode_packet(sequence: u8, payload: &[u8]) -> Vec<u8> {
    let len = payload.len() as u32;
    let mut out = Vec::with_capacity(HEADER_LEN + payload.len());
    out.extend_from_slice(&len.to_le_bytes()[..3]);
    out.push(sequence);
    out.extend_from_slice(payload);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query_packet(sql: &str) -> Vec<u8> {
        let mut payload = vec![COM_QUERY];
        payload.extend_from_slice(sql.as_bytes());
        encode_packet(0, &payload)
    }

    #[test]
    fn test_carves_first_of_two_packets() {
        let first = query_packet("SELECT 1");
        let second = query_packet("SELECT 2");
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&first);
        buf.extend_from_slice(&second);

        let packet = carve_packet(&mut buf).unwrap();
        assert_eq!(packet.command, COM_QUERY);
        assert_eq!(&packet.body[..], b"SELECT 1");
        assert_eq!(&buf[..], &second[..]);
    }

    #[test]
    fn test_short_buffer_is_incomplete_and_untouched() {
        let mut buf = BytesMut::from(&[1u8, 0, 0, 0][..]);
        assert!(carve_packet(&mut buf).is_none());
        assert_eq!(&buf[..], &[1, 0, 0, 0]);
    }

    #[test]
    fn test_declared_length_beyond_buffer_is_incomplete() {
        let full = query_packet("SELECT * FROM big");
        let mut buf = BytesMut::from(&full[..full.len() - 3]);
        let before = buf.clone();
        assert!(carve_packet(&mut buf).is_none());
        assert_eq!(buf, before);
    }

    #[test]
    fn test_zero_length_is_incomplete() {
        let mut buf = BytesMut::from(&[0u8, 0, 0, 0, 3][..]);
        assert!(carve_packet(&mut buf).is_none());
        assert_eq!(buf.len(), 5);
    }

    #[test]
    fn test_exact_packet_empties_buffer() {
        let mut buf = BytesMut::from(&query_packet("SELECT 1")[..]);
        let packet = carve_packet(&mut buf).unwrap();
        assert_eq!(packet.sequence, 0);
        assert!(buf.is_empty());
    }
}
