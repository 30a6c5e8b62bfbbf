//! Logical packets over a byte stream.

pub mod compress;
pub mod instrument;
mod transport;

use std::io::{BufReader, Read, Write};
use std::time::Duration;

use zerocopy::{FromZeros, IntoBytes};

use crate::buffer::PayloadBuffer;
use crate::error::{Error, FramingError, Result};
use crate::protocol::packet::{PacketHeader, frame_lengths};

pub use compress::CompressionCodec;
pub use instrument::{InstrumentationSettings, InstrumentationStack};
pub use transport::Transport;
#[cfg(feature = "tls")]
pub use transport::upgrade_to_tls;

/// Reads and writes logical packets, splitting and reassembling frames.
///
/// Sequence numbers are checked on every inbound frame: the first frame after
/// [`reset_sequence`](Self::reset_sequence) must be 0 and every following
/// frame must be exactly one more, wrapping at 256. With compression on the
/// envelope carries the authoritative sequence, so inner frames only adopt it.
pub struct PacketChannel {
    stream: BufReader<Box<dyn Transport>>,
    codec: Option<CompressionCodec>,
    sequence_id: u8,
    max_packet_size: usize,
    instrumentation: InstrumentationStack,
    frame: Vec<u8>,
}

impl std::fmt::Debug for PacketChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PacketChannel")
            .field("codec", &self.codec)
            .field("sequence_id", &self.sequence_id)
            .field("max_packet_size", &self.max_packet_size)
            .field("instrumentation", &self.instrumentation)
            .finish_non_exhaustive()
    }
}

impl PacketChannel {
    pub fn new(stream: Box<dyn Transport>, max_packet_size: usize) -> Self {
        Self {
            stream: BufReader::new(stream),
            codec: None,
            sequence_id: 0,
            max_packet_size,
            instrumentation: InstrumentationStack::new(),
            frame: Vec::new(),
        }
    }

    /// Start a new command cycle.
    pub fn reset_sequence(&mut self) {
        self.sequence_id = 0;
        if let Some(codec) = &mut self.codec {
            codec.reset_sequence();
        }
    }

    /// Sequence number of the next frame, in either direction.
    pub fn sequence_id(&self) -> u8 {
        self.sequence_id
    }

    /// Continue a command cycle started on another channel (after a TLS upgrade).
    pub(crate) fn set_sequence_id(&mut self, sequence_id: u8) {
        self.sequence_id = sequence_id;
    }

    pub fn max_packet_size(&self) -> usize {
        self.max_packet_size
    }

    pub fn is_compressed(&self) -> bool {
        self.codec.is_some()
    }

    /// Wrap all further traffic in the compressed envelope.
    ///
    /// Codec buffers that grow past `retain_threshold` are shrunk after use.
    pub fn enable_compression(&mut self, threshold: usize, retain_threshold: usize) {
        self.codec = Some(CompressionCodec::new(threshold).with_retain_threshold(retain_threshold));
    }

    pub fn instrumentation(&self) -> &InstrumentationStack {
        &self.instrumentation
    }

    /// Swap the active taps. Sequence and compression state are untouched.
    pub fn reconfigure(&mut self, settings: &InstrumentationSettings) {
        self.instrumentation.rebuild(settings);
    }

    pub fn set_read_timeout(&mut self, timeout: Option<Duration>) -> Result<()> {
        self.stream.get_mut().set_read_timeout(timeout)?;
        Ok(())
    }

    pub fn read_timeout(&self) -> Result<Option<Duration>> {
        Ok(self.stream.get_ref().read_timeout()?)
    }

    /// Give up the transport, e.g. to wrap it in TLS. Compression state is dropped.
    pub fn into_transport(mut self) -> Box<dyn Transport> {
        self.stop();
        let stream = std::mem::replace(&mut self.stream, BufReader::new(Box::new(Closed)));
        stream.into_inner()
    }

    /// Release compression state; the channel must not be used afterwards.
    pub fn stop(&mut self) {
        if let Some(mut codec) = self.codec.take() {
            codec.stop();
        }
    }

    fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        match &mut self.codec {
            Some(codec) => codec.read_exact(&mut self.stream, buf),
            None => {
                self.stream.read_exact(buf)?;
                Ok(())
            }
        }
    }

    fn violation(&self, err: FramingError) -> Error {
        match self.instrumentation.debug_dump() {
            Some(dump) => tracing::error!(%err, "protocol violation, recent packets:\n{dump}"),
            None => tracing::error!(%err, "protocol violation"),
        }
        err.into()
    }

    /// Read the next frame header and check its sequence number.
    pub fn read_header(&mut self) -> Result<PacketHeader> {
        let mut header = PacketHeader::new_zeroed();
        self.read_exact(header.as_mut_bytes())?;
        self.instrumentation.on_header(&header);

        if self.codec.is_none() && header.sequence_id != self.sequence_id {
            return Err(self.violation(FramingError::SequenceMismatch {
                expected: self.sequence_id,
                actual: header.sequence_id,
            }));
        }
        self.sequence_id = header.sequence_id.wrapping_add(1);
        Ok(header)
    }

    /// Read the payload announced by `header`, following continuation frames.
    ///
    /// The frame length is checked against `max_packet_size` before any payload
    /// byte is read.
    pub fn read_payload(&mut self, header: PacketHeader, out: &mut PayloadBuffer) -> Result<()> {
        out.clear();
        let mut header = header;
        loop {
            let start = out.len();
            let total = start + header.length();
            if total > self.max_packet_size {
                return Err(self.violation(FramingError::PacketTooLarge {
                    length: total,
                    max: self.max_packet_size,
                }));
            }
            let data = out.vec_mut();
            data.resize(total, 0);
            self.read_exact(&mut out.vec_mut()[start..])?;

            if !header.has_continuation() {
                break;
            }
            header = self.read_header()?;
        }
        self.instrumentation
            .on_payload(header.sequence_id, out.as_slice());
        Ok(())
    }

    /// Read one complete logical packet into `out`.
    #[tracing::instrument(skip_all)]
    pub fn read_packet(&mut self, out: &mut PayloadBuffer) -> Result<()> {
        let header = self.read_header()?;
        self.read_payload(header, out)
    }

    /// Send one logical packet, split into as many frames as needed.
    #[tracing::instrument(skip_all)]
    pub fn send(&mut self, payload: &[u8]) -> Result<()> {
        let first_sequence_id = self.sequence_id;
        let mut frame = std::mem::take(&mut self.frame);
        let mut offset = 0;
        let mut result = Ok(());

        for len in frame_lengths(payload.len()) {
            frame.clear();
            frame.extend_from_slice(PacketHeader::encode(len, self.sequence_id).as_bytes());
            frame.extend_from_slice(&payload[offset..offset + len]);
            offset += len;
            self.sequence_id = self.sequence_id.wrapping_add(1);

            result = self.write_wire(&frame);
            if result.is_err() {
                break;
            }
        }
        frame.clear();
        self.frame = frame;
        result?;

        self.flush_wire()?;
        self.instrumentation.on_send(first_sequence_id, payload);
        Ok(())
    }

    fn write_wire(&mut self, bytes: &[u8]) -> Result<()> {
        match &mut self.codec {
            Some(codec) => codec.write(bytes),
            None => self.stream.get_mut().write_all(bytes)?,
        }
        Ok(())
    }

    fn flush_wire(&mut self) -> Result<()> {
        match &mut self.codec {
            Some(codec) => codec.flush(self.stream.get_mut()),
            None => {
                self.stream.get_mut().flush()?;
                Ok(())
            }
        }
    }
}

impl Drop for PacketChannel {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Placeholder left behind by [`PacketChannel::into_transport`].
struct Closed;

impl Read for Closed {
    fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
        Ok(0)
    }
}

impl Write for Closed {
    fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
        Err(std::io::ErrorKind::NotConnected.into())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl Transport for Closed {
    fn set_read_timeout(&mut self, _timeout: Option<Duration>) -> std::io::Result<()> {
        Ok(())
    }

    fn read_timeout(&self) -> std::io::Result<Option<Duration>> {
        Ok(None)
    }
}
