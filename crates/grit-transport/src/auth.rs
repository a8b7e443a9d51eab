//! Authentication methods, one tagged variant per mechanism.

use std::path::PathBuf;

/// How a transport authenticates to the remote.
///
/// Which variants a transport honors is its own business: ssh accepts the
/// key and agent forms, HTTP the password and callback forms, git-tcp and
/// local none. A transport handed a method it cannot use fails with
/// `InvalidAuthMethod` instead of silently connecting anonymously.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Auth {
    /// Anonymous, or whatever ambient identity the channel carries.
    #[default]
    None,
    /// Username + password (or token), for HTTP basic auth.
    Password { username: String, password: String },
    /// A specific private key file for ssh.
    Key {
        user: Option<String>,
        key_path: PathBuf,
    },
    /// Whatever identities the running ssh-agent offers.
    Agent { user: Option<String> },
    /// Resolved at connect time through the user's configured credential
    /// helpers (`git credential fill`, see [`crate::credential`]); the
    /// outcome is fed back with `approve`/`reject`.
    Callback { username: Option<String> },
}

impl Auth {
    /// The username this method carries, if any.
    pub fn user(&self) -> Option<&str> {
        match self {
            Self::None => None,
            Self::Password { username, .. } => Some(username),
            Self::Key { user, .. } | Self::Agent { user } => user.as_deref(),
            Self::Callback { username } => username.as_deref(),
        }
    }
}
