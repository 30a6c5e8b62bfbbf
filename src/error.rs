use thiserror::Error;

pub use color_eyre::eyre::eyre;

use crate::protocol::response::ErrPayload;

/// Byte-level protocol violations.
///
/// The stream cannot be resynchronized after any of these, so they always
/// tear down the connection.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FramingError {
    #[error("packet sequence out of order: expected {expected}, got {actual}")]
    SequenceMismatch { expected: u8, actual: u8 },

    #[error("packet of {length} bytes exceeds max_packet_size {max}")]
    PacketTooLarge { length: usize, max: usize },

    #[error("read past the end of the payload ({wanted} bytes wanted, {available} available)")]
    UnexpectedEof { wanted: usize, available: usize },

    #[error("malformed length-encoded integer (leading byte 0x{0:02X})")]
    BadLengthEncodedInt(u8),

    #[error("unexpected NULL where a value is required")]
    UnexpectedNull,

    #[error("compressed frame inflated to {actual} bytes, header declared {declared}")]
    CompressedLengthMismatch { declared: usize, actual: usize },

    #[error("malformed packet: {0}")]
    Malformed(&'static str),
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Framing error: {0}")]
    Framing(#[from] FramingError),

    #[error("Decode error: {0}")]
    Decode(String),

    /// The server answered the connection attempt with an ERR packet instead of a handshake
    #[error("Connection rejected: {0}")]
    ConnectionRejected(ErrPayload),

    #[error("Server Error: {0}")]
    ServerError(#[from] ErrPayload),

    #[error("LOCAL INFILE error: {0}")]
    LocalInfile(String),

    #[error("Bad config error: {0}")]
    BadConfigError(String),

    #[error("Bad usage error: {0}")]
    BadUsageError(String),

    #[error("Unsupported authentication plugin: {0}")]
    UnsupportedAuthPlugin(String),

    #[error("Connection is broken by an earlier fatal error")]
    ConnectionBroken,

    #[error("Library bug: {0}")]
    LibraryBug(color_eyre::Report),
}

impl Error {
    /// Whether the connection must be discarded after this error.
    ///
    /// Server errors, local-file errors and usage errors leave the protocol in a
    /// known state; everything else does not.
    pub fn is_fatal(&self) -> bool {
        match self {
            Error::ServerError(_)
            | Error::LocalInfile(_)
            | Error::BadConfigError(_)
            | Error::BadUsageError(_) => false,
            Error::IoError(_)
            | Error::Framing(_)
            | Error::Decode(_)
            | Error::ConnectionRejected(_)
            | Error::UnsupportedAuthPlugin(_)
            | Error::ConnectionBroken
            | Error::LibraryBug(_) => true,
        }
    }

    pub(crate) fn decode(msg: impl Into<String>) -> Self {
        Error::Decode(msg.into())
    }
}

impl From<std::convert::Infallible> for Error {
    fn from(err: std::convert::Infallible) -> Self {
        match err {}
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Outcome of a command the server processed: either the value or the ERR packet it sent.
///
/// Server errors are ordinary results; only transport, framing and decode
/// failures travel in the outer [`Result`].
pub type ServerResult<T> = std::result::Result<T, ErrPayload>;
