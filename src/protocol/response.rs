use crate::constant::{CapabilityFlags, MAX_PAYLOAD_LEN, ServerStatusFlags};
use crate::error::{FramingError, Result};
use crate::protocol::primitive::*;
use crate::protocol::sql_state::sql_state_for_code;
use zerocopy::byteorder::little_endian::U16 as U16LE;
use zerocopy::{FromBytes, Immutable, KnownLayout};

pub const OK_HEADER: u8 = 0x00;
pub const ERR_HEADER: u8 = 0xFF;
pub const EOF_HEADER: u8 = 0xFE;
pub const LOCAL_INFILE_HEADER: u8 = 0xFB;

/// OK packet payload (unparsed)
#[derive(Debug, Clone, Copy)]
pub struct OkPayloadBytes<'a>(pub &'a [u8]);

/// ERR packet payload (unparsed)
#[derive(Debug, Clone, Copy)]
pub struct ErrPayloadBytes<'a>(pub &'a [u8]);

/// Whether a packet is an ERR packet
#[inline]
pub fn is_err_packet(payload: &[u8]) -> bool {
    payload.first() == Some(&ERR_HEADER)
}

/// Whether a packet read where a row may appear is the result-set terminator.
///
/// A row whose first value is length-encoded with the `0xFE` prefix is at least
/// 16 MiB long, so a shorter `0xFE` packet is always a terminator. Legacy EOF
/// packets are at most 9 bytes.
pub fn is_row_terminator(payload: &[u8], capabilities: CapabilityFlags) -> bool {
    if payload.first() != Some(&EOF_HEADER) {
        return false;
    }
    if capabilities.contains(CapabilityFlags::CLIENT_DEPRECATE_EOF) {
        payload.len() < MAX_PAYLOAD_LEN
    } else {
        payload.len() < 9
    }
}

/// OK packet response
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OkPayload {
    pub affected_rows: u64,
    pub last_insert_id: u64,
    pub status_flags: ServerStatusFlags,
    pub warnings: u16,
    pub info: String,
}

impl TryFrom<OkPayloadBytes<'_>> for OkPayload {
    type Error = crate::error::Error;

    fn try_from(bytes: OkPayloadBytes<'_>) -> Result<Self> {
        let (header, data) = read_int_1(bytes.0)?;
        if header != OK_HEADER && header != EOF_HEADER {
            return Err(FramingError::Malformed("OK packet must start with 0x00 or 0xFE").into());
        }

        let (affected_rows, rest) = read_int_lenenc(data)?;
        let (last_insert_id, rest) = read_int_lenenc(rest)?;
        // Pre-4.1 servers may stop after the ids
        if rest.is_empty() {
            return Ok(OkPayload {
                affected_rows,
                last_insert_id,
                ..Default::default()
            });
        }
        let (status_flags, rest) = read_int_2(rest)?;
        let (warnings, rest) = read_int_2(rest)?;

        Ok(OkPayload {
            affected_rows,
            last_insert_id,
            status_flags: ServerStatusFlags::from_bits_retain(status_flags),
            warnings,
            info: String::from_utf8_lossy(rest).into_owned(),
        })
    }
}

impl OkPayload {
    /// Decode a packet that ends a result set or a command.
    ///
    /// Without `CLIENT_DEPRECATE_EOF` a `0xFE` packet uses the legacy EOF layout.
    pub fn parse_terminator(payload: &[u8], capabilities: CapabilityFlags) -> Result<Self> {
        if payload.first() == Some(&EOF_HEADER)
            && !capabilities.contains(CapabilityFlags::CLIENT_DEPRECATE_EOF)
        {
            let eof = read_eof_packet(payload)?;
            return Ok(OkPayload {
                status_flags: eof.status_flags(),
                warnings: eof.warnings.get(),
                ..Default::default()
            });
        }
        OkPayload::try_from(OkPayloadBytes(payload))
    }

    pub fn more_results_exist(&self) -> bool {
        self.status_flags
            .contains(ServerStatusFlags::SERVER_MORE_RESULTS_EXISTS)
    }
}

/// ERR packet response
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("ERROR {} ({}): {}", self.error_code, self.sql_state, self.message)]
pub struct ErrPayload {
    pub error_code: u16,
    pub sql_state: String,
    pub message: String,
}

impl TryFrom<ErrPayloadBytes<'_>> for ErrPayload {
    type Error = crate::error::Error;

    fn try_from(bytes: ErrPayloadBytes<'_>) -> Result<Self> {
        let (header, data) = read_int_1(bytes.0)?;
        if header != ERR_HEADER {
            return Err(FramingError::Malformed("ERR packet must start with 0xFF").into());
        }

        let (error_code, rest) = read_int_2(data)?;

        // Check for SQL state marker '#'
        let (sql_state, rest) = match rest.split_first() {
            Some((b'#', after)) => {
                let (state_bytes, rest) = read_string_fix(after, 5)?;
                (String::from_utf8_lossy(state_bytes).into_owned(), rest)
            }
            _ => (sql_state_for_code(error_code).to_string(), rest),
        };

        Ok(ErrPayload {
            error_code,
            sql_state,
            message: String::from_utf8_lossy(rest).into_owned(),
        })
    }
}

/// EOF packet response (zero-copy)
///
/// Layout after header byte 0xFE:
/// - warnings: 2 bytes (little-endian)
/// - status_flags: 2 bytes (little-endian)
#[repr(C, packed)]
#[derive(Debug, Clone, Copy, FromBytes, KnownLayout, Immutable)]
pub struct EofPacket {
    pub warnings: U16LE,
    pub status_flags: U16LE,
}

impl EofPacket {
    pub fn status_flags(&self) -> ServerStatusFlags {
        ServerStatusFlags::from_bits_retain(self.status_flags.get())
    }
}

/// Read EOF packet (header byte 0xFE, length < 9) - zero-copy
pub fn read_eof_packet(payload: &[u8]) -> Result<&EofPacket> {
    let (header, data) = read_int_1(payload)?;
    if header != EOF_HEADER {
        return Err(FramingError::Malformed("EOF packet must start with 0xFE").into());
    }
    let (eof, _rest) = EofPacket::ref_from_prefix(data).map_err(|_| {
        FramingError::UnexpectedEof {
            wanted: 4,
            available: data.len(),
        }
    })?;
    Ok(eof)
}
