//! The 6-byte mini-header framing used on every channel once the link
//! handshake has negotiated `MINI_HEADER` (spec.md §4.1): a little-endian
//! `u16` message type followed by a little-endian `u32` payload size.

use binrw::{BinRead, BinWrite};

/// On-wire message header: `type: u16, size: u32`, both little-endian.
#[derive(Debug, Clone, Copy, BinRead, BinWrite)]
#[brw(little)]
pub struct MiniHeader {
    pub msg_type: u16,
    pub size: u32,
}

/// Byte length of [`MiniHeader`] on the wire.
pub const HEADER_SIZE: usize = 6;

impl MiniHeader {
    pub fn new(msg_type: u16, size: u32) -> Self {
        Self { msg_type, size }
    }

    pub fn to_bytes(self) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        out[0..2].copy_from_slice(&self.msg_type.to_le_bytes());
        out[2..6].copy_from_slice(&self.size.to_le_bytes());
        out
    }

    pub fn from_bytes(bytes: &[u8; HEADER_SIZE]) -> Self {
        Self {
            msg_type: u16::from_le_bytes([bytes[0], bytes[1]]),
            size: u32::from_le_bytes([bytes[2], bytes[3], bytes[4], bytes[5]]),
        }
    }
}

/// Builds a single outbound packet: a [`MiniHeader`] followed by its
/// payload, ready for a single `write_all` call (spec.md §4.1: "A
/// client-emitted packet is prefixed by this header and sent by a single
/// `send`-family call").
pub fn build_packet(msg_type: u16, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_SIZE + payload.len());
    out.extend_from_slice(&MiniHeader::new(msg_type, payload.len() as u32).to_bytes());
    out.extend_from_slice(payload);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_bytes() {
        let header = MiniHeader::new(7, 1234);
        let bytes = header.to_bytes();
        let back = MiniHeader::from_bytes(&bytes);
        assert_eq!(back.msg_type, 7);
        assert_eq!(back.size, 1234);
    }

    #[test]
    fn build_packet_prefixes_header() {
        let packet = build_packet(3, &[1, 2, 3, 4]);
        assert_eq!(packet.len(), HEADER_SIZE + 4);
        assert_eq!(&packet[0..2], &3u16.to_le_bytes());
        assert_eq!(&packet[2..6], &4u32.to_le_bytes());
        assert_eq!(&packet[6..], &[1, 2, 3, 4]);
    }
}
