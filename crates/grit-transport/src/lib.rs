//! Physical transports for the git smart protocol.
//!
//! A [`Transport`] is a bidirectional byte stream to a remote service
//! process. Stateful transports (ssh, git-tcp, local subprocess) hold one
//! full-duplex channel for the whole session; the stateless smart-HTTP
//! transport buffers each request and trades it for a response on
//! [`Transport::finish_request`]. Protocol logic lives above, in
//! `grit-protocol`.

pub mod auth;
pub mod cancel;
pub mod credential;
pub mod http;
pub mod local;
pub mod registry;
pub mod ssh;
pub mod tcp;
pub mod url;

use std::io::{Read, Write};

pub use auth::Auth;
pub use cancel::CancelToken;
pub use registry::TransportRegistry;
pub use url::{GitUrl, Scheme};

/// Errors produced at the transport layer.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("unsupported URL scheme: {0}")]
    UnsupportedScheme(String),

    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("remote repository not found")]
    RepositoryNotFound,

    #[error("authentication required")]
    AuthenticationRequired,

    #[error("authorization failed")]
    AuthorizationFailed,

    #[error("authentication method not usable for this transport: {0}")]
    InvalidAuthMethod(&'static str),

    #[error("HTTP status {status}: {message}")]
    Http { status: u16, message: String },

    #[error("{command} exited with code {code}")]
    ProcessFailed { command: String, code: i32 },

    #[error("operation cancelled")]
    Cancelled,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// The two smart services.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Service {
    /// `git-upload-pack`, the fetch side.
    UploadPack,
    /// `git-receive-pack`, the push side.
    ReceivePack,
}

impl Service {
    pub fn name(self) -> &'static str {
        match self {
            Self::UploadPack => "git-upload-pack",
            Self::ReceivePack => "git-receive-pack",
        }
    }
}

impl std::fmt::Display for Service {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A connected byte channel to a remote git service.
///
/// One channel per session; [`close`](Transport::close) runs on every exit
/// path (the session owns the box and drops it on error or cancellation,
/// which releases the underlying process or socket).
pub trait Transport: Send {
    /// The remote's output.
    fn reader(&mut self) -> &mut dyn Read;

    /// Our input to the remote.
    fn writer(&mut self) -> &mut dyn Write;

    /// Boundary of one request/response exchange.
    ///
    /// Stateless transports send everything buffered since the last call
    /// and make the response readable; full-duplex transports just flush.
    fn finish_request(&mut self) -> Result<(), TransportError> {
        self.writer().flush()?;
        Ok(())
    }

    /// Whether each exchange is an independent round trip (smart HTTP).
    fn is_stateless(&self) -> bool {
        false
    }

    /// Tear the channel down, reaping any subprocess.
    fn close(self: Box<Self>) -> Result<(), TransportError>;
}
