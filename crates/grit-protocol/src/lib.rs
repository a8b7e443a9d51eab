//! The git smart protocol, client and server side.
//!
//! Layering, leaves first: [`pktline`] framing, the typed [`capability`]
//! vocabulary, the [`advert`] first-response codec, [`sideband`]
//! multiplexing, then the sessions: [`fetch`] (upload-pack client),
//! [`push`] (send-pack client), and [`receive`] (receive-pack server), all
//! reachable through the single-use [`session::Session`] facade.

pub mod advert;
pub mod capability;
pub mod fetch;
pub mod pktline;
pub mod push;
pub mod receive;
pub mod session;
pub mod sideband;

use grit_transport::TransportError;

/// The agent string both sides send.
pub const AGENT: &str = "grit/0.1";

/// Errors produced during protocol exchanges.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("remote repository is empty")]
    EmptyRemoteRepository,

    #[error("already up to date")]
    NoChange,

    #[error("malformed pkt-line: {0}")]
    InvalidPktLine(String),

    #[error("unexpected response from remote: {0}")]
    InvalidResponse(String),

    #[error("remote sent no packfile")]
    EmptyPackfile,

    #[error("capability {0:?} cannot be sent: not in the recognized vocabulary")]
    UnsupportedCapability(String),

    #[error("object-format mismatch: ours is {ours}, remote wants {theirs}")]
    ObjectFormatMismatch { ours: String, theirs: String },

    #[error("remote does not support the {0} capability")]
    CapabilityNotNegotiated(&'static str),

    #[error("remote error: {0}")]
    Remote(String),

    #[error("session already connected")]
    AlreadyConnected,

    #[error("session is {actual}, operation needs {needed}")]
    InvalidState {
        needed: &'static str,
        actual: &'static str,
    },

    #[error("unexpected remote condition ({status}): {reason}")]
    Unexpected { status: String, reason: String },

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Pack(#[from] grit_pack::PackError),

    #[error(transparent)]
    Ref(#[from] grit_ref::RefError),

    #[error(transparent)]
    Odb(#[from] grit_odb::OdbError),

    #[error(transparent)]
    Object(#[from] grit_object::ObjectError),

    #[error(transparent)]
    Hash(#[from] grit_hash::HashError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
