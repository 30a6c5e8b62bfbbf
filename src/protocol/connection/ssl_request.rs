use zerocopy::byteorder::little_endian::U32 as U32LE;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::buffer::{PayloadBuffer, StringKind};
use crate::constant::CapabilityFlags;

/// Sent in place of the handshake response to ask for a TLS upgrade.
#[repr(C, packed)]
#[derive(Debug, Clone, Copy, FromBytes, KnownLayout, Immutable, IntoBytes)]
pub struct SslRequest {
    client_flag: U32LE,
    max_packet_size: U32LE,
    character_set: u8,
    filler: [u8; 23],
}

impl SslRequest {
    pub fn new(capability_flags: CapabilityFlags, max_packet_size: u32, collation: u8) -> Self {
        Self {
            client_flag: U32LE::new(capability_flags.bits()),
            max_packet_size: U32LE::new(max_packet_size),
            character_set: collation,
            filler: [0; 23],
        }
    }
}

pub fn write_ssl_request(
    out: &mut PayloadBuffer,
    capability_flags: CapabilityFlags,
    max_packet_size: u32,
    collation: u8,
) {
    let request = SslRequest::new(capability_flags, max_packet_size, collation);
    out.write_bytes(StringKind::Eof, request.as_bytes());
}
