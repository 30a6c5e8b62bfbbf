//! Compressed protocol envelope.
//!
//! Once `CLIENT_COMPRESS` is negotiated every byte on the wire travels inside
//! compressed frames: a 7-byte header (compressed length, sequence,
//! uncompressed length) followed by either a zlib stream or, when the
//! uncompressed length is 0, the raw bytes. The ordinary 4-byte framed packets
//! are carried inside, so the codec sits between the packet channel and the
//! transport.

use std::io::{Read, Write};

use flate2::{Compress, Compression, Decompress, FlushCompress, FlushDecompress, Status};
use zerocopy::{FromBytes, FromZeros, IntoBytes};

use crate::constant::{COMPRESSED_HEADER_LEN, MAX_PAYLOAD_LEN};
use crate::error::{FramingError, Result};
use crate::protocol::packet::CompressedPacketHeader;

/// Capacity kept by a buffer that grew past the retain threshold.
const RETAINED_CAPACITY: usize = 16 * 1024;

/// Upper bound of a zlib stream for `len` input bytes.
fn compress_bound(len: usize) -> usize {
    len + (len >> 12) + (len >> 14) + (len >> 25) + 13
}

#[derive(Debug)]
pub struct CompressionCodec {
    threshold: usize,
    /// Buffers grown past this are shrunk once their contents are consumed
    retain_threshold: usize,
    sequence_id: u8,
    deflater: Option<Compress>,
    inflater: Option<Decompress>,
    /// Compressed bytes on their way in or out
    scratch: Vec<u8>,
    /// Outgoing uncompressed bytes waiting for `flush`
    pending: Vec<u8>,
    /// Incoming bytes already unwrapped but not yet consumed
    inflated: Vec<u8>,
    inflated_pos: usize,
}

impl CompressionCodec {
    /// `threshold`: payloads shorter than this are stored without compression.
    pub fn new(threshold: usize) -> Self {
        Self {
            threshold,
            retain_threshold: 1024 * 1024,
            sequence_id: 0,
            deflater: None,
            inflater: None,
            scratch: Vec::new(),
            pending: Vec::new(),
            inflated: Vec::new(),
            inflated_pos: 0,
        }
    }

    pub fn with_retain_threshold(mut self, retain_threshold: usize) -> Self {
        self.retain_threshold = retain_threshold;
        self
    }

    pub fn reset_sequence(&mut self) {
        self.sequence_id = 0;
    }

    pub fn sequence_id(&self) -> u8 {
        self.sequence_id
    }

    /// Release the zlib state and scratch buffers.
    pub fn stop(&mut self) {
        self.deflater = None;
        self.inflater = None;
        self.scratch = Vec::new();
        self.pending = Vec::new();
        self.inflated = Vec::new();
        self.inflated_pos = 0;
    }

    /// Wrap one chunk (at most `MAX_PAYLOAD_LEN` bytes) into a compressed frame appended to `out`.
    pub fn encode_frame(&mut self, chunk: &[u8], out: &mut Vec<u8>) -> Result<()> {
        debug_assert!(chunk.len() <= MAX_PAYLOAD_LEN);
        let sequence_id = self.sequence_id;
        self.sequence_id = self.sequence_id.wrapping_add(1);

        if chunk.len() >= self.threshold && self.deflate(chunk)? {
            let header = CompressedPacketHeader::encode(self.scratch.len(), sequence_id, chunk.len());
            out.extend_from_slice(header.as_bytes());
            out.extend_from_slice(&self.scratch);
        } else {
            let header = CompressedPacketHeader::encode(chunk.len(), sequence_id, 0);
            out.extend_from_slice(header.as_bytes());
            out.extend_from_slice(chunk);
        }
        Ok(())
    }

    /// Compress `input` into `scratch`. Returns false when compression does not pay off.
    fn deflate(&mut self, input: &[u8]) -> Result<bool> {
        let deflater = self
            .deflater
            .get_or_insert_with(|| Compress::new(Compression::default(), true));
        deflater.reset();

        self.scratch.clear();
        self.scratch.reserve(compress_bound(input.len()));
        let status = deflater
            .compress_vec(input, &mut self.scratch, FlushCompress::Finish)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;

        Ok(status == Status::StreamEnd && self.scratch.len() < input.len())
    }

    /// Queue outgoing bytes; nothing reaches the transport before `flush`.
    pub fn write(&mut self, bytes: &[u8]) {
        self.pending.extend_from_slice(bytes);
    }

    /// Wrap everything queued since the last flush and write it out.
    pub fn flush<W: Write + ?Sized>(&mut self, writer: &mut W) -> Result<()> {
        let pending = std::mem::take(&mut self.pending);
        let mut out = Vec::with_capacity(pending.len().min(MAX_PAYLOAD_LEN) + COMPRESSED_HEADER_LEN);
        for chunk in pending.chunks(MAX_PAYLOAD_LEN) {
            out.clear();
            self.encode_frame(chunk, &mut out)?;
            writer.write_all(&out)?;
        }
        writer.flush()?;
        self.pending = pending;
        self.pending.clear();
        shrink_oversized(&mut self.pending, self.retain_threshold);
        shrink_oversized(&mut self.scratch, self.retain_threshold);
        Ok(())
    }

    /// Fill `buf` with unwrapped bytes, reading more compressed frames as needed.
    pub fn read_exact<R: Read + ?Sized>(&mut self, reader: &mut R, buf: &mut [u8]) -> Result<()> {
        let mut filled = 0;
        while filled < buf.len() {
            if self.inflated_pos == self.inflated.len() {
                self.read_frame(reader)?;
                continue;
            }
            let available = &self.inflated[self.inflated_pos..];
            let n = available.len().min(buf.len() - filled);
            buf[filled..filled + n].copy_from_slice(&available[..n]);
            self.inflated_pos += n;
            filled += n;
        }
        if self.inflated_pos == self.inflated.len() {
            self.inflated.clear();
            self.inflated_pos = 0;
            shrink_oversized(&mut self.inflated, self.retain_threshold);
            shrink_oversized(&mut self.scratch, self.retain_threshold);
        }
        Ok(())
    }

    fn read_frame<R: Read + ?Sized>(&mut self, reader: &mut R) -> Result<()> {
        let mut header = CompressedPacketHeader::new_zeroed();
        reader.read_exact(header.as_mut_bytes())?;
        self.check_sequence(header.sequence_id)?;

        let compressed_length = header.compressed_length();
        self.scratch.clear();
        self.scratch.resize(compressed_length, 0);
        reader.read_exact(&mut self.scratch)?;

        self.inflated.clear();
        self.inflated_pos = 0;
        self.decode_body(header.uncompressed_length())
    }

    fn check_sequence(&mut self, actual: u8) -> Result<()> {
        if actual != self.sequence_id {
            return Err(FramingError::SequenceMismatch {
                expected: self.sequence_id,
                actual,
            }
            .into());
        }
        self.sequence_id = self.sequence_id.wrapping_add(1);
        Ok(())
    }

    /// Turn the frame body held in `scratch` into plain bytes in `inflated`.
    fn decode_body(&mut self, uncompressed_length: usize) -> Result<()> {
        if uncompressed_length == 0 {
            std::mem::swap(&mut self.scratch, &mut self.inflated);
            return Ok(());
        }

        let inflater = self.inflater.get_or_insert_with(|| Decompress::new(true));
        inflater.reset(true);
        // One spare byte so a stream longer than declared shows up as a mismatch
        self.inflated.reserve(uncompressed_length + 1);
        let status = inflater
            .decompress_vec(&self.scratch, &mut self.inflated, FlushDecompress::Finish)
            .map_err(|_| FramingError::Malformed("corrupt compressed frame"))?;

        if status != Status::StreamEnd && self.inflated.len() <= uncompressed_length {
            return Err(FramingError::Malformed("truncated compressed frame").into());
        }
        if status == Status::StreamEnd && inflater.total_in() != self.scratch.len() as u64 {
            return Err(FramingError::Malformed("trailing bytes after compressed stream").into());
        }
        if self.inflated.len() != uncompressed_length {
            return Err(FramingError::CompressedLengthMismatch {
                declared: uncompressed_length,
                actual: self.inflated.len(),
            }
            .into());
        }
        Ok(())
    }

    /// Unwrap one complete compressed frame (header included).
    pub fn decode_frame(&mut self, frame: &[u8]) -> Result<Vec<u8>> {
        let (header, body) = CompressedPacketHeader::read_from_prefix(frame).map_err(|_| {
            FramingError::UnexpectedEof {
                wanted: COMPRESSED_HEADER_LEN,
                available: frame.len(),
            }
        })?;
        if body.len() != header.compressed_length() {
            return Err(FramingError::UnexpectedEof {
                wanted: header.compressed_length(),
                available: body.len(),
            }
            .into());
        }
        self.check_sequence(header.sequence_id)?;
        self.scratch.clear();
        self.scratch.extend_from_slice(body);
        self.inflated.clear();
        self.inflated_pos = 0;
        self.decode_body(header.uncompressed_length())?;
        shrink_oversized(&mut self.scratch, self.retain_threshold);
        Ok(std::mem::take(&mut self.inflated))
    }
}

/// Drop a consumed buffer's allocation back to `RETAINED_CAPACITY` once it outgrew the threshold.
fn shrink_oversized(buf: &mut Vec<u8>, retain_threshold: usize) {
    if buf.capacity() > retain_threshold {
        tracing::trace!(capacity = buf.capacity(), "shrinking compression buffer");
        buf.clear();
        buf.shrink_to(RETAINED_CAPACITY);
    }
}
