use std::sync::Arc;

use crate::buffer::{IntWidth, PayloadBuffer, StringKind};
use crate::constant::{
    CAPABILITIES_ALWAYS_ENABLED, CAPABILITIES_CONFIGURABLE, CapabilityFlags, ServerStatusFlags,
};
use crate::error::{Error, FramingError, Result};
use crate::protocol::connection::auth::{AuthPlugin, find_plugin};
use crate::protocol::connection::ssl_request::write_ssl_request;
use crate::protocol::response::{
    ERR_HEADER, ErrPayload, ErrPayloadBytes, OkPayload, OkPayloadBytes,
};

/// Protocol version 10 greeting sent by the server right after connect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitialHandshake {
    pub protocol_version: u8,
    pub server_version: String,
    pub connection_id: u32,
    /// Both seed fragments joined (normally 20 bytes)
    pub auth_plugin_data: Vec<u8>,
    pub capability_flags: CapabilityFlags,
    pub collation: u8,
    pub status_flags: ServerStatusFlags,
    pub auth_plugin_name: String,
}

/// Parse the server greeting.
///
/// An ERR packet in its place means the server refused the connection (too
/// many connections, host blocked, ...).
pub fn read_initial_handshake(payload: &[u8]) -> Result<InitialHandshake> {
    if payload.first() == Some(&ERR_HEADER) {
        let err = ErrPayload::try_from(ErrPayloadBytes(payload))?;
        return Err(Error::ConnectionRejected(err));
    }

    let mut buf = PayloadBuffer::from_vec(payload.to_vec());
    let protocol_version = buf.read_u8()?;
    let server_version = buf
        .read_string(StringKind::Term, crate::charset::Encoding::Utf8)?
        .unwrap_or_default();
    let connection_id = buf.read_u32()?;
    let mut auth_plugin_data = buf
        .read_bytes(StringKind::Fixed(8))?
        .map(<[u8]>::to_vec)
        .unwrap_or_default();
    buf.skip_bytes(StringKind::Fixed(1))?;

    let mut handshake = InitialHandshake {
        protocol_version,
        server_version,
        connection_id,
        auth_plugin_data: Vec::new(),
        capability_flags: CapabilityFlags::empty(),
        collation: 0,
        status_flags: ServerStatusFlags::empty(),
        auth_plugin_name: String::new(),
    };

    // Ancient servers stop after the first seed fragment
    if !buf.has_remaining() {
        handshake.auth_plugin_data = auth_plugin_data;
        return Ok(handshake);
    }

    let lower = buf.read_u16()? as u32;
    handshake.collation = buf.read_u8()?;
    handshake.status_flags = ServerStatusFlags::from_bits_retain(buf.read_u16()?);
    let upper = buf.read_u16()? as u32;
    let capability_flags = CapabilityFlags::from_bits_retain((upper << 16) | lower);
    handshake.capability_flags = capability_flags;

    let auth_data_len = if capability_flags.contains(CapabilityFlags::CLIENT_PLUGIN_AUTH) {
        buf.read_u8()? as usize
    } else {
        buf.skip_bytes(StringKind::Fixed(1))?;
        0
    };
    buf.skip_bytes(StringKind::Fixed(10))?;

    if capability_flags.contains(CapabilityFlags::CLIENT_SECURE_CONNECTION) {
        let wanted = auth_data_len.saturating_sub(8).max(13);
        let available = buf.remaining().len();
        let part2 = buf
            .read_bytes(StringKind::Fixed(wanted.min(available)))?
            .unwrap_or_default();
        let part2 = part2.strip_suffix(&[0]).unwrap_or(part2);
        auth_plugin_data.extend_from_slice(part2);
    }
    handshake.auth_plugin_data = auth_plugin_data;

    if capability_flags.contains(CapabilityFlags::CLIENT_PLUGIN_AUTH) && buf.has_remaining() {
        // Some servers omit the terminating NUL
        let name = if buf.remaining().contains(&0) {
            buf.read_bytes(StringKind::Term)?
        } else {
            buf.read_bytes(StringKind::Eof)?
        };
        handshake.auth_plugin_name = String::from_utf8_lossy(name.unwrap_or_default()).into_owned();
    }

    Ok(handshake)
}

/// Handshake response packet sent by client (HandshakeResponse41)
#[derive(Debug, Clone)]
pub struct HandshakeResponse41<'a> {
    pub capability_flags: CapabilityFlags,
    pub max_packet_size: u32,
    pub collation: u8,
    pub username: &'a str,
    pub auth_response: &'a [u8],
    pub database: Option<&'a str>,
    pub auth_plugin_name: Option<&'a str>,
}

pub fn write_handshake_response(out: &mut PayloadBuffer, response: &HandshakeResponse41<'_>) {
    out.write_int(IntWidth::Int4, u64::from(response.capability_flags.bits()));
    out.write_int(IntWidth::Int4, u64::from(response.max_packet_size));
    out.write_int(IntWidth::Int1, u64::from(response.collation));
    out.write_bytes(StringKind::Fixed(23), &[0u8; 23]);
    out.write_bytes(StringKind::Term, response.username.as_bytes());

    if response
        .capability_flags
        .contains(CapabilityFlags::CLIENT_PLUGIN_AUTH_LENENC_CLIENT_DATA)
    {
        out.write_bytes(StringKind::LenEnc, response.auth_response);
    } else {
        out.write_int(IntWidth::Int1, response.auth_response.len() as u64);
        out.write_bytes(StringKind::Eof, response.auth_response);
    }

    if let Some(db) = response.database
        && response
            .capability_flags
            .contains(CapabilityFlags::CLIENT_CONNECT_WITH_DB)
    {
        out.write_bytes(StringKind::Term, db.as_bytes());
    }

    if let Some(plugin) = response.auth_plugin_name
        && response
            .capability_flags
            .contains(CapabilityFlags::CLIENT_PLUGIN_AUTH)
    {
        out.write_bytes(StringKind::Term, plugin.as_bytes());
    }
}

/// Auth switch request from server
#[derive(Debug, Clone)]
pub struct AuthSwitchRequest<'a> {
    pub plugin_name: &'a [u8],
    pub plugin_data: &'a [u8],
}

/// Read auth switch request (0xFE, plugin name, seed)
pub fn read_auth_switch_request(payload: &[u8]) -> Result<AuthSwitchRequest<'_>> {
    use crate::protocol::primitive::{read_int_1, read_string_null};

    let (header, data) = read_int_1(payload)?;
    if header != 0xFE {
        return Err(FramingError::Malformed("auth switch request must start with 0xFE").into());
    }
    let (plugin_name, plugin_data) = read_string_null(data)?;
    Ok(AuthSwitchRequest {
        plugin_name,
        plugin_data,
    })
}

/// Connection settings the handshake needs
#[derive(Clone)]
pub struct HandshakeConfig {
    pub username: String,
    pub password: String,
    pub database: Option<String>,
    /// Requested configurable capabilities; other bits are ignored
    pub capabilities: CapabilityFlags,
    pub tls: bool,
    pub compress: bool,
    pub local_infile: bool,
    pub max_packet_size: u32,
    pub collation: u8,
    /// Consulted by name before the built-in plugins
    pub auth_plugins: Vec<Arc<dyn AuthPlugin>>,
}

impl std::fmt::Debug for HandshakeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandshakeConfig")
            .field("username", &self.username)
            .field("database", &self.database)
            .field("capabilities", &self.capabilities)
            .field("tls", &self.tls)
            .field("compress", &self.compress)
            .field("local_infile", &self.local_infile)
            .field("auth_plugins", &self.auth_plugins)
            .finish_non_exhaustive()
    }
}

impl HandshakeConfig {
    /// Capabilities the client asks for before looking at the server's.
    pub fn client_capabilities(&self) -> CapabilityFlags {
        let mut caps =
            CAPABILITIES_ALWAYS_ENABLED | (self.capabilities & CAPABILITIES_CONFIGURABLE);
        caps.set(
            CapabilityFlags::CLIENT_CONNECT_WITH_DB,
            self.database.is_some(),
        );
        caps.set(CapabilityFlags::CLIENT_SSL, self.tls);
        caps.set(CapabilityFlags::CLIENT_COMPRESS, self.compress);
        caps.set(CapabilityFlags::CLIENT_LOCAL_FILES, self.local_infile);
        caps
    }

    /// Intersect the client's wishes with what the server offers.
    pub fn negotiate(&self, server: CapabilityFlags) -> Result<CapabilityFlags> {
        if !server.contains(CapabilityFlags::CLIENT_PROTOCOL_41) {
            return Err(Error::BadConfigError(
                "server does not support protocol 4.1".to_string(),
            ));
        }
        let negotiated = self.client_capabilities() & server;
        if self.tls && !negotiated.contains(CapabilityFlags::CLIENT_SSL) {
            return Err(Error::BadConfigError(
                "TLS requested but the server does not support it".to_string(),
            ));
        }
        Ok(negotiated)
    }

    fn auth_response(&self, plugin_name: &str, seed: &[u8]) -> Result<Vec<u8>> {
        if let Some(plugin) = self.auth_plugins.iter().find(|p| p.name() == plugin_name) {
            return Ok(plugin.scramble(&self.password, seed));
        }
        let plugin = find_plugin(plugin_name)
            .ok_or_else(|| Error::UnsupportedAuthPlugin(plugin_name.to_string()))?;
        Ok(plugin.scramble(&self.password, seed))
    }

    fn response_packet(
        &self,
        capability_flags: CapabilityFlags,
        plugin_name: &str,
        seed: &[u8],
    ) -> Result<Vec<u8>> {
        let auth_response = self.auth_response(plugin_name, seed)?;
        let mut out = PayloadBuffer::new();
        write_handshake_response(
            &mut out,
            &HandshakeResponse41 {
                capability_flags,
                max_packet_size: self.max_packet_size,
                collation: self.collation,
                username: &self.username,
                auth_response: &auth_response,
                database: self.database.as_deref(),
                auth_plugin_name: Some(plugin_name),
            },
        );
        Ok(out.into_vec())
    }
}

/// Result of driving the handshake state machine
#[derive(Debug)]
pub enum HandshakeResult {
    /// Greeting parsed; send `handshake_response` and feed the reply back in
    InitialHandshake {
        handshake_response: Vec<u8>,
        initial_handshake: InitialHandshake,
    },
    /// Send `ssl_request`, upgrade the transport, then call `drive_after_tls`
    SslRequest {
        ssl_request: Vec<u8>,
        initial_handshake: InitialHandshake,
    },
    /// Send this packet, then read the next one
    Write(Vec<u8>),
    /// Read the next packet without sending anything
    Read,
    /// Authentication succeeded
    Connected {
        capability_flags: CapabilityFlags,
        ok: OkPayload,
    },
}

/// Connection-phase state machine.
///
/// Pure packet parsing and generation; the caller moves the bytes.
#[derive(Debug)]
pub enum Handshake {
    Start {
        config: HandshakeConfig,
    },
    WaitingTlsUpgrade {
        config: HandshakeConfig,
        plugin_name: String,
        seed: Vec<u8>,
        capability_flags: CapabilityFlags,
    },
    WaitingAuthResult {
        config: HandshakeConfig,
        plugin_name: String,
        capability_flags: CapabilityFlags,
        tls_active: bool,
    },
    Connected,
}

impl Handshake {
    pub fn new(config: HandshakeConfig) -> Self {
        Self::Start { config }
    }

    /// Feed the next packet from the server.
    pub fn drive(&mut self, payload: &[u8]) -> Result<HandshakeResult> {
        match std::mem::replace(self, Self::Connected) {
            Self::Start { config } => {
                let handshake = read_initial_handshake(payload)?;
                let capability_flags = config.negotiate(handshake.capability_flags)?;
                let plugin_name = if handshake.auth_plugin_name.is_empty() {
                    "mysql_native_password".to_string()
                } else {
                    handshake.auth_plugin_name.clone()
                };

                if capability_flags.contains(CapabilityFlags::CLIENT_SSL) {
                    let mut ssl_request = PayloadBuffer::new();
                    write_ssl_request(
                        &mut ssl_request,
                        capability_flags,
                        config.max_packet_size,
                        config.collation,
                    );
                    *self = Self::WaitingTlsUpgrade {
                        config,
                        plugin_name,
                        seed: handshake.auth_plugin_data.clone(),
                        capability_flags,
                    };
                    return Ok(HandshakeResult::SslRequest {
                        ssl_request: ssl_request.into_vec(),
                        initial_handshake: handshake,
                    });
                }

                let handshake_response = config.response_packet(
                    capability_flags,
                    &plugin_name,
                    &handshake.auth_plugin_data,
                )?;
                *self = Self::WaitingAuthResult {
                    config,
                    plugin_name,
                    capability_flags,
                    tls_active: false,
                };
                Ok(HandshakeResult::InitialHandshake {
                    handshake_response,
                    initial_handshake: handshake,
                })
            }

            Self::WaitingAuthResult {
                config,
                plugin_name,
                capability_flags,
                tls_active,
            } => {
                let Some(&header) = payload.first() else {
                    return Err(FramingError::Malformed("empty packet during authentication").into());
                };
                match header {
                    0x00 => {
                        let ok = OkPayload::try_from(OkPayloadBytes(payload))?;
                        Ok(HandshakeResult::Connected {
                            capability_flags,
                            ok,
                        })
                    }
                    0xFF => Err(ErrPayload::try_from(ErrPayloadBytes(payload))?.into()),
                    0xFE => {
                        let switch = read_auth_switch_request(payload)?;
                        let plugin_name = String::from_utf8_lossy(switch.plugin_name).into_owned();
                        tracing::debug!(plugin = %plugin_name, "authentication method switch");
                        let response = config.auth_response(&plugin_name, switch.plugin_data)?;
                        *self = Self::WaitingAuthResult {
                            config,
                            plugin_name,
                            capability_flags,
                            tls_active,
                        };
                        Ok(HandshakeResult::Write(response))
                    }
                    // AuthMoreData
                    0x01 if plugin_name == "caching_sha2_password" => {
                        let result = match payload.get(1) {
                            // Fast auth succeeded; an OK packet follows
                            Some(0x03) => HandshakeResult::Read,
                            Some(0x04) if tls_active => {
                                let mut clear = config.password.clone().into_bytes();
                                clear.push(0);
                                HandshakeResult::Write(clear)
                            }
                            Some(0x04) => {
                                return Err(Error::UnsupportedAuthPlugin(
                                    "caching_sha2_password full authentication requires TLS"
                                        .to_string(),
                                ));
                            }
                            _ => {
                                return Err(FramingError::Malformed(
                                    "unexpected caching_sha2_password auth data",
                                )
                                .into());
                            }
                        };
                        *self = Self::WaitingAuthResult {
                            config,
                            plugin_name,
                            capability_flags,
                            tls_active,
                        };
                        Ok(result)
                    }
                    _ => Err(FramingError::Malformed("unexpected packet during authentication").into()),
                }
            }

            state @ (Self::WaitingTlsUpgrade { .. } | Self::Connected) => {
                *self = state;
                Err(Error::LibraryBug(crate::error::eyre!(
                    "handshake driven in state {:?}",
                    self
                )))
            }
        }
    }

    /// Continue once the transport has been upgraded to TLS.
    pub fn drive_after_tls(&mut self) -> Result<HandshakeResult> {
        match std::mem::replace(self, Self::Connected) {
            Self::WaitingTlsUpgrade {
                config,
                plugin_name,
                seed,
                capability_flags,
            } => {
                let packet = config.response_packet(capability_flags, &plugin_name, &seed)?;
                *self = Self::WaitingAuthResult {
                    config,
                    plugin_name,
                    capability_flags,
                    tls_active: true,
                };
                Ok(HandshakeResult::Write(packet))
            }
            other => {
                *self = other;
                Err(Error::LibraryBug(crate::error::eyre!(
                    "drive_after_tls called without a pending TLS upgrade"
                )))
            }
        }
    }
}

#[cfg(test)]
#[path = "handshake_test.rs"]
mod handshake_test;
