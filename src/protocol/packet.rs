use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::constant::MAX_PAYLOAD_LEN;

/// MySQL packet header (zero-copy)
///
/// Layout matches MySQL wire protocol:
/// - length: 3 bytes (little-endian, payload length)
/// - sequence_id: 1 byte
#[repr(C, packed)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromBytes, KnownLayout, Immutable, IntoBytes)]
pub struct PacketHeader {
    pub length: [u8; 3],
    pub sequence_id: u8,
}

impl PacketHeader {
    pub fn encode(length: usize, sequence_id: u8) -> Self {
        let len = u32::to_le_bytes(length as u32);
        Self {
            length: [len[0], len[1], len[2]],
            sequence_id,
        }
    }

    pub fn length(&self) -> usize {
        u32::from_le_bytes([self.length[0], self.length[1], self.length[2], 0]) as usize
    }

    /// A full-size frame is always followed by at least one more frame.
    pub fn has_continuation(&self) -> bool {
        self.length() == MAX_PAYLOAD_LEN
    }
}

/// Compressed frame header (zero-copy)
///
/// - compressed_length: 3 bytes, length of the bytes following this header
/// - sequence_id: 1 byte, counted independently of the inner frames
/// - uncompressed_length: 3 bytes, 0 when the body is stored uncompressed
#[repr(C, packed)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromBytes, KnownLayout, Immutable, IntoBytes)]
pub struct CompressedPacketHeader {
    pub compressed_length: [u8; 3],
    pub sequence_id: u8,
    pub uncompressed_length: [u8; 3],
}

impl CompressedPacketHeader {
    pub fn encode(compressed_length: usize, sequence_id: u8, uncompressed_length: usize) -> Self {
        let c = u32::to_le_bytes(compressed_length as u32);
        let u = u32::to_le_bytes(uncompressed_length as u32);
        Self {
            compressed_length: [c[0], c[1], c[2]],
            sequence_id,
            uncompressed_length: [u[0], u[1], u[2]],
        }
    }

    pub fn compressed_length(&self) -> usize {
        let c = self.compressed_length;
        u32::from_le_bytes([c[0], c[1], c[2], 0]) as usize
    }

    pub fn uncompressed_length(&self) -> usize {
        let u = self.uncompressed_length;
        u32::from_le_bytes([u[0], u[1], u[2], 0]) as usize
    }
}

/// Frame lengths a logical payload of `payload_len` bytes is split into.
///
/// Full frames of `MAX_PAYLOAD_LEN` are followed by the remainder; when the
/// payload is an exact multiple of `MAX_PAYLOAD_LEN` (including 0) the last
/// frame is empty.
pub fn frame_lengths(payload_len: usize) -> impl Iterator<Item = usize> {
    let full = payload_len / MAX_PAYLOAD_LEN;
    let tail = payload_len - full * MAX_PAYLOAD_LEN;
    std::iter::repeat_n(MAX_PAYLOAD_LEN, full).chain(std::iter::once(tail))
}
