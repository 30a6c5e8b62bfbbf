use std::borrow::Cow;

use crate::charset::Encoding;
use crate::error::{FramingError, Result};
use crate::protocol::primitive::*;

/// Integer widths understood by [`PayloadBuffer`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntWidth {
    Int1,
    Int2,
    Int3,
    Int4,
    Int6,
    Int8,
    LenEnc,
}

impl IntWidth {
    fn fixed_len(self) -> Option<usize> {
        match self {
            IntWidth::Int1 => Some(1),
            IntWidth::Int2 => Some(2),
            IntWidth::Int3 => Some(3),
            IntWidth::Int4 => Some(4),
            IntWidth::Int6 => Some(6),
            IntWidth::Int8 => Some(8),
            IntWidth::LenEnc => None,
        }
    }
}

/// How a byte string is delimited on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StringKind {
    /// Length supplied by the caller
    Fixed(usize),
    /// NUL-terminated
    Term,
    /// Length-encoded-integer prefix
    LenEnc,
    /// Rest of the payload
    Eof,
}

/// Growable payload with a read/write cursor.
///
/// `len()` is the write-length: everything before it is payload. The cursor
/// never passes the write-length, and writes at the cursor extend the
/// write-length as needed.
#[derive(Debug, Clone, Default)]
pub struct PayloadBuffer {
    data: Vec<u8>,
    position: usize,
}

impl PayloadBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: Vec::with_capacity(capacity),
            position: 0,
        }
    }

    /// Wrap an already-filled payload; the cursor starts at 0.
    pub fn from_vec(data: Vec<u8>) -> Self {
        Self { data, position: 0 }
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.data
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Mutable access to the backing vector, used by the channel to fill a payload.
    pub(crate) fn vec_mut(&mut self) -> &mut Vec<u8> {
        &mut self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.data.capacity()
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn set_position(&mut self, position: usize) -> Result<()> {
        if position > self.data.len() {
            return Err(FramingError::UnexpectedEof {
                wanted: position,
                available: self.data.len(),
            }
            .into());
        }
        self.position = position;
        Ok(())
    }

    pub fn remaining(&self) -> &[u8] {
        &self.data[self.position..]
    }

    pub fn has_remaining(&self) -> bool {
        self.position < self.data.len()
    }

    /// Empty the payload, keeping its allocation.
    pub fn clear(&mut self) {
        self.data.clear();
        self.position = 0;
    }

    /// Make room for `required` total bytes, growing by at least a quarter.
    pub fn ensure_capacity(&mut self, required: usize) {
        let capacity = self.data.capacity();
        if required <= capacity {
            return;
        }
        let grown = capacity.saturating_add(capacity >> 2);
        let target = grown.max(required);
        self.data.reserve_exact(target - self.data.len());
    }

    /// Drop an oversized allocation back down to `baseline` bytes.
    pub fn shrink_if_larger_than(&mut self, threshold: usize, baseline: usize) {
        if self.data.capacity() > threshold {
            self.data.clear();
            self.data.shrink_to(baseline);
            self.position = 0;
        }
    }

    fn put(&mut self, bytes: &[u8]) {
        let end = self.position + bytes.len();
        self.ensure_capacity(end);
        if end > self.data.len() {
            self.data.resize(end, 0);
        }
        self.data[self.position..end].copy_from_slice(bytes);
        self.position = end;
    }

    pub fn write_int(&mut self, width: IntWidth, value: u64) {
        match width.fixed_len() {
            Some(n) => self.put(&value.to_le_bytes()[..n]),
            None => {
                let mut tmp = Vec::with_capacity(9);
                write_int_lenenc(&mut tmp, value);
                self.put(&tmp);
            }
        }
    }

    /// Write the NULL sentinel of a length-encoded integer.
    pub fn write_null(&mut self) {
        self.put(&[LENENC_NULL]);
    }

    pub fn write_bytes(&mut self, kind: StringKind, data: &[u8]) {
        match kind {
            StringKind::Fixed(n) => {
                let n = n.min(data.len());
                self.put(&data[..n]);
            }
            StringKind::Term => {
                self.put(data);
                self.put(&[0]);
            }
            StringKind::LenEnc => {
                self.write_int(IntWidth::LenEnc, data.len() as u64);
                self.put(data);
            }
            StringKind::Eof => self.put(data),
        }
    }

    fn advance(&mut self, rest_len: usize) {
        self.position = self.data.len() - rest_len;
    }

    pub fn read_int(&mut self, width: IntWidth) -> Result<u64> {
        let data = self.remaining();
        let (value, rest) = match width {
            IntWidth::Int1 => read_int_1(data).map(|(v, r)| (u64::from(v), r))?,
            IntWidth::Int2 => read_int_2(data).map(|(v, r)| (u64::from(v), r))?,
            IntWidth::Int3 => read_int_3(data).map(|(v, r)| (u64::from(v), r))?,
            IntWidth::Int4 => read_int_4(data).map(|(v, r)| (u64::from(v), r))?,
            IntWidth::Int6 => read_int_6(data)?,
            IntWidth::Int8 => read_int_8(data)?,
            IntWidth::LenEnc => read_int_lenenc(data)?,
        };
        let rest_len = rest.len();
        self.advance(rest_len);
        Ok(value)
    }

    /// Length-encoded integer that may be the NULL sentinel.
    pub fn read_lenenc_nullable(&mut self) -> Result<Option<u64>> {
        let (value, rest) = read_int_lenenc_nullable(self.remaining())?;
        let rest_len = rest.len();
        self.advance(rest_len);
        Ok(value)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.read_int(IntWidth::Int1)? as u8)
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        Ok(self.read_int(IntWidth::Int2)? as u16)
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        Ok(self.read_int(IntWidth::Int4)? as u32)
    }

    /// Read a byte string. A NULL length-encoded string reads as `None`.
    pub fn read_bytes(&mut self, kind: StringKind) -> Result<Option<&[u8]>> {
        let start = self.position;
        let (range, end) = {
            let data = self.remaining();
            match kind {
                StringKind::Fixed(n) => {
                    let (bytes, rest) = read_string_fix(data, n)?;
                    (Some(bytes.len()), data.len() - rest.len())
                }
                StringKind::Term => {
                    let (bytes, rest) = read_string_null(data)?;
                    (Some(bytes.len()), data.len() - rest.len())
                }
                StringKind::LenEnc => {
                    let (bytes, rest) = read_string_lenenc_nullable(data)?;
                    (bytes.map(<[u8]>::len), data.len() - rest.len())
                }
                StringKind::Eof => (Some(data.len()), data.len()),
            }
        };
        self.position = start + end;
        Ok(range.map(|len| {
            let value_start = match kind {
                StringKind::LenEnc => start + end - len,
                _ => start,
            };
            &self.data[value_start..value_start + len]
        }))
    }

    pub fn skip_bytes(&mut self, kind: StringKind) -> Result<()> {
        self.read_bytes(kind).map(|_| ())
    }

    /// Read a byte string and decode it with `encoding`.
    pub fn read_string(&mut self, kind: StringKind, encoding: Encoding) -> Result<Option<String>> {
        Ok(self
            .read_bytes(kind)?
            .map(|bytes| match encoding.decode(bytes) {
                Cow::Borrowed(s) => s.to_owned(),
                Cow::Owned(s) => s,
            }))
    }
}
