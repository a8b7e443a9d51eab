//! The anonymous git:// TCP transport (daemon port 9418).
//!
//! After connecting, the client sends one framed greeting naming the
//! service, the repository path, and the host:
//! `git-upload-pack /path\0host=example.com\0`. Everything after that is
//! the ordinary smart protocol on the raw socket.

use std::io::{Read, Write};
use std::net::TcpStream;

use crate::{GitUrl, Service, Transport, TransportError};

pub struct TcpTransport {
    stream: TcpStream,
}

impl Transport for TcpTransport {
    fn reader(&mut self) -> &mut dyn Read {
        &mut self.stream
    }

    fn writer(&mut self) -> &mut dyn Write {
        &mut self.stream
    }

    fn close(self: Box<Self>) -> Result<(), TransportError> {
        self.stream.shutdown(std::net::Shutdown::Both).ok();
        Ok(())
    }
}

/// The daemon greeting, framed with the protocol's 4-hex-digit length
/// prefix.
pub fn greeting(service: Service, path: &str, host: &str, port: Option<u16>) -> Vec<u8> {
    let host_field = match port {
        Some(p) => format!("host={host}:{p}"),
        None => format!("host={host}"),
    };
    let payload = format!("{} {path}\0{host_field}\0", service.name());
    let mut frame = format!("{:04x}", payload.len() + 4).into_bytes();
    frame.extend_from_slice(payload.as_bytes());
    frame
}

pub fn connect(url: &GitUrl, service: Service) -> Result<Box<dyn Transport>, TransportError> {
    let host = url
        .host
        .as_deref()
        .ok_or_else(|| TransportError::InvalidUrl("git URL needs a host".into()))?;
    let port = url.effective_port();

    tracing::debug!(target: "grit::transport", host, port, "connecting git-tcp");

    let mut stream = TcpStream::connect((host, port))
        .map_err(|e| TransportError::ConnectionFailed(format!("{host}:{port}: {e}")))?;
    stream.write_all(&greeting(service, &url.path, host, url.port))?;
    stream.flush()?;

    Ok(Box::new(TcpTransport { stream }))
}
