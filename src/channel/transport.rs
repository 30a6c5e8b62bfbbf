use std::io::{Read, Write};
use std::net::TcpStream;
use std::os::unix::net::UnixStream;
use std::time::Duration;

use auto_impl::auto_impl;

/// Blocking byte stream with a settable read deadline.
#[auto_impl(&mut, Box)]
pub trait Transport: Read + Write + Send {
    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> std::io::Result<()>;
    fn read_timeout(&self) -> std::io::Result<Option<Duration>>;
}

impl Transport for TcpStream {
    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> std::io::Result<()> {
        TcpStream::set_read_timeout(self, timeout)
    }

    fn read_timeout(&self) -> std::io::Result<Option<Duration>> {
        TcpStream::read_timeout(self)
    }
}

impl Transport for UnixStream {
    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> std::io::Result<()> {
        UnixStream::set_read_timeout(self, timeout)
    }

    fn read_timeout(&self) -> std::io::Result<Option<Duration>> {
        UnixStream::read_timeout(self)
    }
}

#[cfg(feature = "tls")]
impl Transport for native_tls::TlsStream<Box<dyn Transport>> {
    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> std::io::Result<()> {
        self.get_mut().set_read_timeout(timeout)
    }

    fn read_timeout(&self) -> std::io::Result<Option<Duration>> {
        self.get_ref().read_timeout()
    }
}

/// Run the TLS handshake over `stream` and return the encrypted transport.
#[cfg(feature = "tls")]
pub fn upgrade_to_tls(
    stream: Box<dyn Transport>,
    host: &str,
    accept_invalid_certs: bool,
) -> crate::error::Result<Box<dyn Transport>> {
    let connector = native_tls::TlsConnector::builder()
        .danger_accept_invalid_certs(accept_invalid_certs)
        .danger_accept_invalid_hostnames(accept_invalid_certs)
        .build()
        .map_err(std::io::Error::other)?;
    let tls = connector.connect(host, stream).map_err(|e| match e {
        native_tls::HandshakeError::Failure(e) => std::io::Error::other(e),
        native_tls::HandshakeError::WouldBlock(_) => std::io::Error::new(
            std::io::ErrorKind::WouldBlock,
            "TLS handshake interrupted on a non-blocking stream",
        ),
    })?;
    Ok(Box::new(tls))
}
