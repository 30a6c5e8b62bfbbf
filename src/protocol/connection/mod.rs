pub mod auth;
mod handshake;
mod ssl_request;

pub use auth::{AuthPlugin, CachingSha2Password, NativePassword, find_plugin};
pub use handshake::{
    AuthSwitchRequest, Handshake, HandshakeConfig, HandshakeResponse41, HandshakeResult,
    InitialHandshake, read_auth_switch_request, read_initial_handshake, write_handshake_response,
};
pub use ssl_request::{SslRequest, write_ssl_request};
