//! Observers stacked over the packet channel.
//!
//! Every tap sees the same header/payload/send events and never alters the
//! bytes. The stack is a plain ordered list so it can be peeled one layer at a
//! time or cleared, and rebuilt when the connection's settings change. The
//! channel keeps its sequence counters and compression state outside the
//! stack, so reconfiguration never touches them.

use std::any::Any;
use std::collections::VecDeque;
use std::fmt::Write as _;
use std::time::Instant;

use crate::protocol::packet::PacketHeader;

/// Which instrumentation a tap provides
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TapKind {
    Timing,
    Tracing,
    DebugCapture,
}

/// Common interface of all taps.
pub trait PacketTap: Send + std::fmt::Debug {
    fn kind(&self) -> TapKind;

    fn on_header(&mut self, _header: &PacketHeader) {}

    /// A complete logical packet was read.
    fn on_payload(&mut self, _sequence_id: u8, _payload: &[u8]) {}

    /// A complete logical packet is being sent; `sequence_id` is its first frame's.
    fn on_send(&mut self, _sequence_id: u8, _payload: &[u8]) {}

    fn as_any(&self) -> &dyn Any;
}

/// Records when the last packet went out and came in.
#[derive(Debug, Default)]
pub struct TimingTap {
    last_sent: Option<Instant>,
    last_received: Option<Instant>,
}

impl TimingTap {
    pub fn last_sent(&self) -> Option<Instant> {
        self.last_sent
    }

    pub fn last_received(&self) -> Option<Instant> {
        self.last_received
    }
}

impl PacketTap for TimingTap {
    fn kind(&self) -> TapKind {
        TapKind::Timing
    }

    fn on_header(&mut self, _header: &PacketHeader) {
        self.last_received = Some(Instant::now());
    }

    fn on_send(&mut self, _sequence_id: u8, _payload: &[u8]) {
        self.last_sent = Some(Instant::now());
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Logs every packet through `tracing` at debug level.
#[derive(Debug)]
pub struct TracingTap {
    max_dump_len: usize,
}

impl TracingTap {
    pub fn new(max_dump_len: usize) -> Self {
        Self { max_dump_len }
    }
}

impl PacketTap for TracingTap {
    fn kind(&self) -> TapKind {
        TapKind::Tracing
    }

    fn on_header(&mut self, header: &PacketHeader) {
        tracing::debug!(
            target: "mysql_wire::protocol",
            length = header.length(),
            sequence_id = header.sequence_id,
            "<- frame"
        );
    }

    fn on_payload(&mut self, sequence_id: u8, payload: &[u8]) {
        tracing::debug!(
            target: "mysql_wire::protocol",
            sequence_id,
            len = payload.len(),
            "<- {}",
            hex_dump(payload, self.max_dump_len)
        );
    }

    fn on_send(&mut self, sequence_id: u8, payload: &[u8]) {
        tracing::debug!(
            target: "mysql_wire::protocol",
            sequence_id,
            len = payload.len(),
            "-> {}",
            hex_dump(payload, self.max_dump_len)
        );
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Keeps the last `capacity` packets as hex dumps for postmortem logging.
#[derive(Debug)]
pub struct DebugCaptureTap {
    ring: VecDeque<String>,
    capacity: usize,
    max_dump_len: usize,
}

impl DebugCaptureTap {
    pub fn new(capacity: usize, max_dump_len: usize) -> Self {
        Self {
            ring: VecDeque::with_capacity(capacity),
            capacity,
            max_dump_len,
        }
    }

    fn record(&mut self, entry: String) {
        if self.capacity == 0 {
            return;
        }
        if self.ring.len() == self.capacity {
            self.ring.pop_front();
        }
        self.ring.push_back(entry);
    }

    /// Captured packets, oldest first, one per line.
    pub fn dump(&self) -> String {
        let mut out = String::new();
        for entry in &self.ring {
            out.push_str(entry);
            out.push('\n');
        }
        out
    }

    pub fn len(&self) -> usize {
        self.ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }
}

impl PacketTap for DebugCaptureTap {
    fn kind(&self) -> TapKind {
        TapKind::DebugCapture
    }

    fn on_payload(&mut self, sequence_id: u8, payload: &[u8]) {
        let entry = format!(
            "<- seq={} len={} {}",
            sequence_id,
            payload.len(),
            hex_dump(payload, self.max_dump_len)
        );
        self.record(entry);
    }

    fn on_send(&mut self, sequence_id: u8, payload: &[u8]) {
        let entry = format!(
            "-> seq={} len={} {}",
            sequence_id,
            payload.len(),
            hex_dump(payload, self.max_dump_len)
        );
        self.record(entry);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Space-separated hex of at most `limit` bytes, with a marker when truncated.
pub fn hex_dump(bytes: &[u8], limit: usize) -> String {
    let shown = &bytes[..bytes.len().min(limit)];
    let mut out = String::with_capacity(shown.len() * 3 + 8);
    for (i, b) in shown.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        let _ = write!(out, "{b:02x}");
    }
    if bytes.len() > limit {
        let _ = write!(out, " ... (+{} bytes)", bytes.len() - limit);
    }
    out
}

/// Which taps should be active
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InstrumentationSettings {
    pub trace_protocol: bool,
    pub track_timing: bool,
    /// Number of packets kept by the debug capture; 0 disables it
    pub debug_buffer_size: usize,
    pub max_dump_len: usize,
}

impl InstrumentationSettings {
    fn wants(&self, kind: TapKind) -> bool {
        match kind {
            TapKind::Timing => self.track_timing,
            TapKind::Tracing => self.trace_protocol,
            TapKind::DebugCapture => self.debug_buffer_size > 0,
        }
    }
}

/// Ordered taps, innermost first.
#[derive(Debug, Default)]
pub struct InstrumentationStack {
    layers: Vec<Box<dyn PacketTap>>,
}

impl InstrumentationStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_settings(settings: &InstrumentationSettings) -> Self {
        let mut stack = Self::new();
        stack.rebuild(settings);
        stack
    }

    pub fn push(&mut self, tap: Box<dyn PacketTap>) {
        self.layers.push(tap);
    }

    /// Remove the outermost tap.
    pub fn unwrap_one(&mut self) -> Option<Box<dyn PacketTap>> {
        self.layers.pop()
    }

    /// Remove every tap, leaving the bare channel.
    pub fn unwrap_to_base(&mut self) -> Vec<Box<dyn PacketTap>> {
        std::mem::take(&mut self.layers)
    }

    /// Match the stack to `settings`. Taps that stay enabled keep their state.
    pub fn rebuild(&mut self, settings: &InstrumentationSettings) {
        let mut kept = self.unwrap_to_base();
        kept.retain(|tap| settings.wants(tap.kind()));

        for kind in [TapKind::Timing, TapKind::DebugCapture, TapKind::Tracing] {
            if !settings.wants(kind) {
                continue;
            }
            if let Some(pos) = kept.iter().position(|tap| tap.kind() == kind) {
                self.layers.push(kept.remove(pos));
                continue;
            }
            let tap: Box<dyn PacketTap> = match kind {
                TapKind::Timing => Box::new(TimingTap::default()),
                TapKind::DebugCapture => Box::new(DebugCaptureTap::new(
                    settings.debug_buffer_size,
                    settings.max_dump_len,
                )),
                TapKind::Tracing => Box::new(TracingTap::new(settings.max_dump_len)),
            };
            self.layers.push(tap);
        }
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    pub fn kinds(&self) -> Vec<TapKind> {
        self.layers.iter().map(|tap| tap.kind()).collect()
    }

    fn find<T: 'static>(&self) -> Option<&T> {
        self.layers
            .iter()
            .find_map(|tap| tap.as_any().downcast_ref::<T>())
    }

    pub fn timing(&self) -> Option<&TimingTap> {
        self.find::<TimingTap>()
    }

    /// Recently captured packets, when debug capture is on.
    pub fn debug_dump(&self) -> Option<String> {
        self.find::<DebugCaptureTap>().map(DebugCaptureTap::dump)
    }

    #[inline]
    pub fn on_header(&mut self, header: &PacketHeader) {
        for tap in &mut self.layers {
            tap.on_header(header);
        }
    }

    #[inline]
    pub fn on_payload(&mut self, sequence_id: u8, payload: &[u8]) {
        for tap in &mut self.layers {
            tap.on_payload(sequence_id, payload);
        }
    }

    #[inline]
    pub fn on_send(&mut self, sequence_id: u8, payload: &[u8]) {
        for tap in &mut self.layers {
            tap.on_send(sequence_id, payload);
        }
    }
}
