use crate::error::{FramingError, Result};
use zerocopy::FromBytes;
use zerocopy::byteorder::little_endian::{U16 as U16LE, U32 as U32LE, U64 as U64LE};

/// Leading byte of a length-encoded integer that stands for SQL NULL.
pub const LENENC_NULL: u8 = 0xFB;

#[inline]
fn eof(wanted: usize, available: usize) -> FramingError {
    FramingError::UnexpectedEof { wanted, available }
}

#[inline]
fn split(data: &[u8], len: usize) -> Result<(&[u8], &[u8])> {
    if data.len() < len {
        return Err(eof(len, data.len()).into());
    }
    Ok(data.split_at(len))
}

/// Read 1-byte integer
pub fn read_int_1(data: &[u8]) -> Result<(u8, &[u8])> {
    match data.split_first() {
        Some((first, rest)) => Ok((*first, rest)),
        None => Err(eof(1, 0).into()),
    }
}

/// Read 2-byte little-endian integer
pub fn read_int_2(data: &[u8]) -> Result<(u16, &[u8])> {
    let (bytes, rest) = split(data, 2)?;
    let value = U16LE::read_from_bytes(bytes)
        .map_err(|_| eof(2, bytes.len()))?
        .get();
    Ok((value, rest))
}

/// Read 3-byte little-endian integer
pub fn read_int_3(data: &[u8]) -> Result<(u32, &[u8])> {
    let (bytes, rest) = split(data, 3)?;
    Ok((u32::from_le_bytes([bytes[0], bytes[1], bytes[2], 0]), rest))
}

/// Read 4-byte little-endian integer
pub fn read_int_4(data: &[u8]) -> Result<(u32, &[u8])> {
    let (bytes, rest) = split(data, 4)?;
    let value = U32LE::read_from_bytes(bytes)
        .map_err(|_| eof(4, bytes.len()))?
        .get();
    Ok((value, rest))
}

/// Read 6-byte little-endian integer
pub fn read_int_6(data: &[u8]) -> Result<(u64, &[u8])> {
    let (b, rest) = split(data, 6)?;
    Ok((u64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], 0, 0]), rest))
}

/// Read 8-byte little-endian integer
pub fn read_int_8(data: &[u8]) -> Result<(u64, &[u8])> {
    let (bytes, rest) = split(data, 8)?;
    let value = U64LE::read_from_bytes(bytes)
        .map_err(|_| eof(8, bytes.len()))?
        .get();
    Ok((value, rest))
}

/// Read a length-encoded integer that may be the NULL sentinel (`0xFB`).
pub fn read_int_lenenc_nullable(data: &[u8]) -> Result<(Option<u64>, &[u8])> {
    let (first, rest) = read_int_1(data)?;
    match first {
        LENENC_NULL => Ok((None, rest)),
        0xFC => {
            let (val, rest) = read_int_2(rest)?;
            Ok((Some(u64::from(val)), rest))
        }
        0xFD => {
            let (val, rest) = read_int_3(rest)?;
            Ok((Some(u64::from(val)), rest))
        }
        0xFE => {
            let (val, rest) = read_int_8(rest)?;
            Ok((Some(val), rest))
        }
        0xFF => Err(FramingError::BadLengthEncodedInt(first).into()),
        val => Ok((Some(u64::from(val)), rest)),
    }
}

/// Read a length-encoded integer; the NULL sentinel is a framing error here.
pub fn read_int_lenenc(data: &[u8]) -> Result<(u64, &[u8])> {
    match read_int_lenenc_nullable(data)? {
        (Some(val), rest) => Ok((val, rest)),
        (None, _) => Err(FramingError::UnexpectedNull.into()),
    }
}

/// Read fixed-length string
pub fn read_string_fix(data: &[u8], len: usize) -> Result<(&[u8], &[u8])> {
    split(data, len)
}

/// Read null-terminated string; the terminator is consumed but not returned.
pub fn read_string_null(data: &[u8]) -> Result<(&[u8], &[u8])> {
    match data.iter().position(|&b| b == 0) {
        Some(i) => Ok((&data[..i], &data[i + 1..])),
        None => Err(FramingError::Malformed("missing NUL terminator").into()),
    }
}

/// Read length-encoded string
pub fn read_string_lenenc(data: &[u8]) -> Result<(&[u8], &[u8])> {
    let (len, rest) = read_int_lenenc(data)?;
    if len == 0 {
        return Ok((&[], rest));
    }
    read_string_fix(rest, len as usize)
}

/// Read length-encoded string, `None` for the NULL sentinel
pub fn read_string_lenenc_nullable(data: &[u8]) -> Result<(Option<&[u8]>, &[u8])> {
    match read_int_lenenc_nullable(data)? {
        (None, rest) => Ok((None, rest)),
        (Some(0), rest) => Ok((Some(&[]), rest)),
        (Some(len), rest) => {
            let (bytes, rest) = read_string_fix(rest, len as usize)?;
            Ok((Some(bytes), rest))
        }
    }
}

/// Encoded size of a length-encoded integer
pub fn lenenc_int_len(value: u64) -> usize {
    if value < 251 {
        1
    } else if value < (1 << 16) {
        3
    } else if value < (1 << 24) {
        4
    } else {
        9
    }
}

/// Write 1-byte integer
pub fn write_int_1(out: &mut Vec<u8>, value: u8) {
    out.push(value);
}

/// Write 2-byte little-endian integer
pub fn write_int_2(out: &mut Vec<u8>, value: u16) {
    out.extend_from_slice(&value.to_le_bytes());
}

/// Write 3-byte little-endian integer
pub fn write_int_3(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_le_bytes()[..3]);
}

/// Write 4-byte little-endian integer
pub fn write_int_4(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_le_bytes());
}

/// Write 6-byte little-endian integer
pub fn write_int_6(out: &mut Vec<u8>, value: u64) {
    out.extend_from_slice(&value.to_le_bytes()[..6]);
}

/// Write 8-byte little-endian integer
pub fn write_int_8(out: &mut Vec<u8>, value: u64) {
    out.extend_from_slice(&value.to_le_bytes());
}

/// Write length-encoded integer
pub fn write_int_lenenc(out: &mut Vec<u8>, value: u64) {
    if value < 251 {
        out.push(value as u8);
    } else if value < (1 << 16) {
        out.push(0xfc);
        write_int_2(out, value as u16);
    } else if value < (1 << 24) {
        out.push(0xfd);
        write_int_3(out, value as u32);
    } else {
        out.push(0xfe);
        write_int_8(out, value);
    }
}

/// Write null-terminated string
pub fn write_string_null(out: &mut Vec<u8>, s: &str) {
    out.extend_from_slice(s.as_bytes());
    out.push(0);
}

/// Write length-encoded bytes
pub fn write_bytes_lenenc(out: &mut Vec<u8>, data: &[u8]) {
    write_int_lenenc(out, data.len() as u64);
    out.extend_from_slice(data);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn lenenc_round_trip_at_boundaries() {
        for value in [
            0u64,
            250,
            251,
            65535,
            65536,
            16777215,
            16777216,
            (1u64 << 63) - 1,
        ] {
            let mut out = Vec::new();
            write_int_lenenc(&mut out, value);
            assert_eq!(out.len(), lenenc_int_len(value));
            let (decoded, rest) = read_int_lenenc(&out).unwrap();
            assert_eq!(decoded, value);
            assert!(rest.is_empty());
        }
    }

    #[test]
    fn lenenc_300_encoding() {
        let mut out = Vec::new();
        write_int_lenenc(&mut out, 300);
        assert_eq!(out, [0xFC, 0x2C, 0x01]);
    }

    #[test]
    fn lenenc_null_sentinel() {
        let (value, rest) = read_int_lenenc_nullable(&[0xFB, 0x01]).unwrap();
        assert_eq!(value, None);
        assert_eq!(rest, &[0x01]);
        assert!(matches!(
            read_int_lenenc(&[0xFB]),
            Err(Error::Framing(FramingError::UnexpectedNull))
        ));
    }

    #[test]
    fn lenenc_rejects_0xff() {
        assert!(matches!(
            read_int_lenenc(&[0xFF]),
            Err(Error::Framing(FramingError::BadLengthEncodedInt(0xFF)))
        ));
    }

    #[test]
    fn truncated_reads_are_framing_errors() {
        assert!(matches!(
            read_int_4(&[1, 2]),
            Err(Error::Framing(FramingError::UnexpectedEof {
                wanted: 4,
                available: 2
            }))
        ));
        assert!(read_string_lenenc(&[5, b'a', b'b']).is_err());
        assert!(read_string_null(b"abc").is_err());
    }

    #[test]
    fn strings() {
        let (s, rest) = read_string_null(b"abc\0def").unwrap();
        assert_eq!(s, b"abc");
        assert_eq!(rest, b"def");

        let (s, rest) = read_string_lenenc_nullable(&[0x00, 0xFB]).unwrap();
        assert_eq!(s, Some(&b""[..]));
        let (s, _) = read_string_lenenc_nullable(rest).unwrap();
        assert_eq!(s, None);
    }

    #[test]
    fn six_byte_integers() {
        let mut out = Vec::new();
        write_int_6(&mut out, 0x0000_1234_5678_9ABC);
        assert_eq!(out.len(), 6);
        assert_eq!(read_int_6(&out).unwrap().0, 0x0000_1234_5678_9ABC);
    }
}
