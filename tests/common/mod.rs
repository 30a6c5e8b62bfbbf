//! Scripted server for driving `Conn` without a database.
//!
//! A [`Script`] holds the exact bytes the server sends; [`connect`] plays them
//! back through a [`ScriptedTransport`] and records what the client writes.

#![allow(dead_code)]

use std::io::{Cursor, Read, Write};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use flate2::Compression;
use flate2::write::ZlibEncoder;
use mysql_wire::channel::Transport;
use mysql_wire::constant::{CapabilityFlags, ColumnFlags, ColumnType};
use mysql_wire::{Conn, Opts};

pub const AUTOCOMMIT: u16 = 0x0002;
pub const MORE_RESULTS: u16 = 0x0008;
pub const CURSOR_EXISTS: u16 = 0x0040;
pub const LAST_ROW_SENT: u16 = 0x0080;

pub const SERVER_VERSION: &str = "8.0.36";
pub const CONNECTION_ID: u32 = 7;

/// What the client did to the transport
#[derive(Debug, Default)]
pub struct Recorded {
    pub written: Vec<u8>,
    /// Every read timeout the client set, in order
    pub timeouts: Vec<Option<Duration>>,
}

pub struct ScriptedTransport {
    input: Cursor<Vec<u8>>,
    recorded: Arc<Mutex<Recorded>>,
    timeout: Option<Duration>,
}

impl ScriptedTransport {
    pub fn new(input: Vec<u8>) -> (Self, Arc<Mutex<Recorded>>) {
        let recorded = Arc::new(Mutex::new(Recorded::default()));
        let transport = Self {
            input: Cursor::new(input),
            recorded: Arc::clone(&recorded),
            timeout: None,
        };
        (transport, recorded)
    }
}

impl Read for ScriptedTransport {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.input.read(buf)
    }
}

impl Write for ScriptedTransport {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.recorded.lock().unwrap().written.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl Transport for ScriptedTransport {
    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> std::io::Result<()> {
        self.timeout = timeout;
        self.recorded.lock().unwrap().timeouts.push(timeout);
        Ok(())
    }

    fn read_timeout(&self) -> std::io::Result<Option<Duration>> {
        Ok(self.timeout)
    }
}

/// Capabilities of a current server
pub fn server_capabilities() -> CapabilityFlags {
    CapabilityFlags::CLIENT_LONG_PASSWORD
        | CapabilityFlags::CLIENT_LONG_FLAG
        | CapabilityFlags::CLIENT_CONNECT_WITH_DB
        | CapabilityFlags::CLIENT_COMPRESS
        | CapabilityFlags::CLIENT_LOCAL_FILES
        | CapabilityFlags::CLIENT_PROTOCOL_41
        | CapabilityFlags::CLIENT_TRANSACTIONS
        | CapabilityFlags::CLIENT_SECURE_CONNECTION
        | CapabilityFlags::CLIENT_MULTI_STATEMENTS
        | CapabilityFlags::CLIENT_MULTI_RESULTS
        | CapabilityFlags::CLIENT_PS_MULTI_RESULTS
        | CapabilityFlags::CLIENT_PLUGIN_AUTH
        | CapabilityFlags::CLIENT_PLUGIN_AUTH_LENENC_CLIENT_DATA
        | CapabilityFlags::CLIENT_DEPRECATE_EOF
}

fn lenenc_str(out: &mut Vec<u8>, s: &[u8]) {
    assert!(s.len() < 251);
    out.push(s.len() as u8);
    out.extend_from_slice(s);
}

pub fn frame(out: &mut Vec<u8>, sequence_id: u8, payload: &[u8]) {
    out.extend_from_slice(&(payload.len() as u32).to_le_bytes()[..3]);
    out.push(sequence_id);
    out.extend_from_slice(payload);
}

pub fn greeting_payload(capabilities: CapabilityFlags) -> Vec<u8> {
    let bits = capabilities.bits();
    let mut out = vec![10];
    out.extend_from_slice(SERVER_VERSION.as_bytes());
    out.push(0);
    out.extend_from_slice(&CONNECTION_ID.to_le_bytes());
    out.extend_from_slice(b"abcdefgh");
    out.push(0);
    out.extend_from_slice(&(bits as u16).to_le_bytes());
    out.push(45);
    out.extend_from_slice(&AUTOCOMMIT.to_le_bytes());
    out.extend_from_slice(&((bits >> 16) as u16).to_le_bytes());
    out.push(21);
    out.extend_from_slice(&[0; 10]);
    out.extend_from_slice(b"ijklmnopqrst");
    out.push(0);
    out.extend_from_slice(b"mysql_native_password\0");
    out
}

pub fn ok_payload(affected_rows: u8, last_insert_id: u8, status: u16) -> Vec<u8> {
    let mut out = vec![0x00, affected_rows, last_insert_id];
    out.extend_from_slice(&status.to_le_bytes());
    out.extend_from_slice(&[0, 0]);
    out
}

pub fn column_payload(name: &str, column_type: ColumnType) -> Vec<u8> {
    let (collation, length, flags): (u16, u32, ColumnFlags) = match column_type {
        ColumnType::MYSQL_TYPE_VAR_STRING | ColumnType::MYSQL_TYPE_STRING => {
            (45, 1020, ColumnFlags::empty())
        }
        _ => (63, 20, ColumnFlags::NOT_NULL_FLAG),
    };
    let mut out = Vec::new();
    for s in ["def", "test", "t", "t", name, name] {
        lenenc_str(&mut out, s.as_bytes());
    }
    out.push(0x0c);
    out.extend_from_slice(&collation.to_le_bytes());
    out.extend_from_slice(&length.to_le_bytes());
    out.push(column_type as u8);
    out.extend_from_slice(&flags.bits().to_le_bytes());
    out.push(0);
    out.extend_from_slice(&[0, 0]);
    out
}

/// Bytes the server sends, in order, with sequence numbers filled in.
#[derive(Debug, Default)]
pub struct Script {
    bytes: Vec<u8>,
    sequence_id: u8,
    deprecate_eof: bool,
}

impl Script {
    /// Greeting plus the OK that ends authentication.
    pub fn handshake(capabilities: CapabilityFlags) -> Self {
        let mut script = Self {
            deprecate_eof: capabilities.contains(CapabilityFlags::CLIENT_DEPRECATE_EOF),
            ..Default::default()
        };
        script.packet(&greeting_payload(capabilities));
        script.skip(1);
        script.ok(0, 0, AUTOCOMMIT);
        script
    }

    /// Commands sent after the handshake, without the handshake itself.
    pub fn commands(deprecate_eof: bool) -> Self {
        Self {
            deprecate_eof,
            ..Default::default()
        }
    }

    /// Start the answer to a new command.
    pub fn reply(&mut self) -> &mut Self {
        self.sequence_id = 1;
        self
    }

    /// Account for packets the client sends in the middle of a cycle.
    pub fn skip(&mut self, packets: u8) -> &mut Self {
        self.sequence_id = self.sequence_id.wrapping_add(packets);
        self
    }

    pub fn packet(&mut self, payload: &[u8]) -> &mut Self {
        frame(&mut self.bytes, self.sequence_id, payload);
        self.sequence_id = self.sequence_id.wrapping_add(1);
        self
    }

    pub fn raw(&mut self, bytes: &[u8]) -> &mut Self {
        self.bytes.extend_from_slice(bytes);
        self
    }

    pub fn ok(&mut self, affected_rows: u8, last_insert_id: u8, status: u16) -> &mut Self {
        self.packet(&ok_payload(affected_rows, last_insert_id, status))
    }

    pub fn err(&mut self, code: u16, sql_state: &str, message: &str) -> &mut Self {
        let mut out = vec![0xFF];
        out.extend_from_slice(&code.to_le_bytes());
        out.push(b'#');
        out.extend_from_slice(sql_state.as_bytes());
        out.extend_from_slice(message.as_bytes());
        self.packet(&out)
    }

    /// Column count, definitions and, for legacy servers, the EOF after them.
    pub fn columns(&mut self, columns: &[(&str, ColumnType)]) -> &mut Self {
        self.packet(&[columns.len() as u8]);
        self.definitions(columns);
        self
    }

    pub fn definitions(&mut self, columns: &[(&str, ColumnType)]) -> &mut Self {
        for (name, column_type) in columns {
            self.packet(&column_payload(name, *column_type));
        }
        if !self.deprecate_eof {
            self.eof(AUTOCOMMIT);
        }
        self
    }

    pub fn eof(&mut self, status: u16) -> &mut Self {
        let mut out = vec![0xFE, 0, 0];
        out.extend_from_slice(&status.to_le_bytes());
        self.packet(&out)
    }

    /// Packet that ends the rows of a result
    pub fn done(&mut self, status: u16) -> &mut Self {
        if self.deprecate_eof {
            let mut out = ok_payload(0, 0, status);
            out[0] = 0xFE;
            self.packet(&out)
        } else {
            self.eof(status)
        }
    }

    pub fn text_row(&mut self, values: &[Option<&str>]) -> &mut Self {
        let mut out = Vec::new();
        for value in values {
            match value {
                Some(v) => lenenc_str(&mut out, v.as_bytes()),
                None => out.push(0xFB),
            }
        }
        self.packet(&out)
    }

    /// Binary row of BIGINT values
    pub fn binary_row(&mut self, values: &[Option<i64>]) -> &mut Self {
        let mut bitmap = vec![0u8; (values.len() + 2).div_ceil(8)];
        let mut data = Vec::new();
        for (idx, value) in values.iter().enumerate() {
            match value {
                Some(v) => data.extend_from_slice(&v.to_le_bytes()),
                None => bitmap[(idx + 2) / 8] |= 1 << ((idx + 2) % 8),
            }
        }
        let mut out = vec![0x00];
        out.extend_from_slice(&bitmap);
        out.extend_from_slice(&data);
        self.packet(&out)
    }

    pub fn prepare_ok(&mut self, statement_id: u32, columns: u16, params: u16) -> &mut Self {
        let mut out = vec![0x00];
        out.extend_from_slice(&statement_id.to_le_bytes());
        out.extend_from_slice(&columns.to_le_bytes());
        out.extend_from_slice(&params.to_le_bytes());
        out.push(0);
        out.extend_from_slice(&0u16.to_le_bytes());
        self.packet(&out)
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }
}

/// Wrap plain frames in one compressed envelope, stored or deflated.
pub fn envelope(sequence_id: u8, inner: &[u8], deflate: bool) -> Vec<u8> {
    let (body, uncompressed_length) = if deflate {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(inner).unwrap();
        (encoder.finish().unwrap(), inner.len())
    } else {
        (inner.to_vec(), 0)
    };
    let mut out = Vec::new();
    out.extend_from_slice(&(body.len() as u32).to_le_bytes()[..3]);
    out.push(sequence_id);
    out.extend_from_slice(&(uncompressed_length as u32).to_le_bytes()[..3]);
    out.extend_from_slice(&body);
    out
}

/// Split plain client output into `(sequence_id, payload)` packets.
pub fn client_packets(written: &[u8]) -> Vec<(u8, Vec<u8>)> {
    let mut packets = Vec::new();
    let mut rest = written;
    while rest.len() >= 4 {
        let len = usize::from(rest[0]) | usize::from(rest[1]) << 8 | usize::from(rest[2]) << 16;
        packets.push((rest[3], rest[4..4 + len].to_vec()));
        rest = &rest[4 + len..];
    }
    assert!(rest.is_empty(), "trailing bytes in client output");
    packets
}

pub fn opts() -> Opts {
    Opts {
        user: "root".to_string(),
        ..Default::default()
    }
}

pub fn connect(script: &Script, opts: Opts) -> (Conn, Arc<Mutex<Recorded>>) {
    let (transport, recorded) = ScriptedTransport::new(script.bytes().to_vec());
    let conn = Conn::connect_with_transport(Box::new(transport), opts).unwrap();
    (conn, recorded)
}

/// Client packets written after the handshake response
pub fn commands_sent(recorded: &Mutex<Recorded>) -> Vec<(u8, Vec<u8>)> {
    let mut packets = client_packets(&recorded.lock().unwrap().written);
    packets.remove(0);
    packets
}
