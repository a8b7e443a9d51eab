//! Git remote URLs.
//!
//! Accepted forms:
//! - `ssh://[user@]host[:port]/path` and the scp-like `[user@]host:path`
//! - `git://host[:port]/path`
//! - `http[s]://[user@]host[:port]/path`
//! - `file:///path` and bare local paths

use crate::TransportError;

/// URL scheme, deciding which transport adapter connects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scheme {
    Git,
    Ssh,
    Http,
    Https,
    File,
    /// A bare path with no scheme prefix.
    Local,
}

impl std::fmt::Display for Scheme {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Git => "git",
            Self::Ssh => "ssh",
            Self::Http => "http",
            Self::Https => "https",
            Self::File => "file",
            Self::Local => "local",
        })
    }
}

/// A parsed remote endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitUrl {
    pub scheme: Scheme,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub user: Option<String>,
    pub path: String,
}

impl GitUrl {
    pub fn parse(input: &str) -> Result<Self, TransportError> {
        let input = input.trim();
        if input.is_empty() {
            return Err(TransportError::InvalidUrl("empty URL".into()));
        }

        for (prefix, scheme) in [
            ("git://", Scheme::Git),
            ("ssh://", Scheme::Ssh),
            ("http://", Scheme::Http),
            ("https://", Scheme::Https),
        ] {
            if let Some(rest) = input.strip_prefix(prefix) {
                return parse_authority(scheme, rest);
            }
        }

        if let Some(rest) = input.strip_prefix("file://") {
            return Ok(Self {
                scheme: Scheme::File,
                host: None,
                port: None,
                user: None,
                path: rest.to_string(),
            });
        }

        // Bare paths before the scp-like form so `./x:y` stays a path.
        if input.starts_with('/') || input.starts_with('.') || input.starts_with('~') {
            return Ok(Self {
                scheme: Scheme::Local,
                host: None,
                port: None,
                user: None,
                path: input.to_string(),
            });
        }

        // scp-like: [user@]host:path
        if let Some(colon) = input.find(':') {
            let (head, path) = (&input[..colon], &input[colon + 1..]);
            let (user, host) = match head.split_once('@') {
                Some((user, host)) => (Some(user.to_string()), host),
                None => (None, head),
            };
            if host.is_empty() {
                return Err(TransportError::InvalidUrl(format!(
                    "no host in {input:?}"
                )));
            }
            return Ok(Self {
                scheme: Scheme::Ssh,
                host: Some(host.to_string()),
                port: None,
                user,
                path: path.to_string(),
            });
        }

        Err(TransportError::InvalidUrl(format!(
            "unrecognized URL: {input:?}"
        )))
    }

    /// The port in effect, defaulted per scheme.
    pub fn effective_port(&self) -> u16 {
        self.port.unwrap_or(match self.scheme {
            Scheme::Git => 9418,
            Scheme::Ssh => 22,
            Scheme::Http => 80,
            Scheme::Https => 443,
            Scheme::File | Scheme::Local => 0,
        })
    }
}

fn parse_authority(scheme: Scheme, rest: &str) -> Result<GitUrl, TransportError> {
    let (authority, path) = match rest.find('/') {
        Some(slash) => (&rest[..slash], &rest[slash..]),
        None => (rest, "/"),
    };

    let (user, host_port) = match authority.split_once('@') {
        Some((user, hp)) => (Some(user.to_string()), hp),
        None => (None, authority),
    };

    let (host, port) = if let Some(stripped) = host_port.strip_prefix('[') {
        // IPv6 literal
        let end = stripped
            .find(']')
            .ok_or_else(|| TransportError::InvalidUrl("unterminated IPv6 literal".into()))?;
        let host = &stripped[..end];
        let port = match stripped[end + 1..].strip_prefix(':') {
            Some(p) => Some(parse_port(p)?),
            None => None,
        };
        (host.to_string(), port)
    } else {
        match host_port.rsplit_once(':') {
            Some((host, port)) => (host.to_string(), Some(parse_port(port)?)),
            None => (host_port.to_string(), None),
        }
    };

    if host.is_empty() {
        return Err(TransportError::InvalidUrl("empty host".into()));
    }

    Ok(GitUrl {
        scheme,
        host: Some(host),
        port,
        user,
        path: path.to_string(),
    })
}

fn parse_port(p: &str) -> Result<u16, TransportError> {
    p.parse()
        .map_err(|_| TransportError::InvalidUrl(format!("bad port {p:?}")))
}

impl std::fmt::Display for GitUrl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.scheme {
            Scheme::Local => f.write_str(&self.path),
            Scheme::File => write!(f, "file://{}", self.path),
            Scheme::Ssh if self.port.is_none() && !self.path.starts_with('/') => {
                // scp-like form round-trips as written
                if let Some(ref user) = self.user {
                    write!(f, "{user}@")?;
                }
                write!(f, "{}:{}", self.host.as_deref().unwrap_or(""), self.path)
            }
            _ => {
                write!(f, "{}://", self.scheme)?;
                if let Some(ref user) = self.user {
                    write!(f, "{user}@")?;
                }
                if let Some(ref host) = self.host {
                    f.write_str(host)?;
                }
                if let Some(port) = self.port {
                    write!(f, ":{port}")?;
                }
                f.write_str(&self.path)
            }
        }
    }
}
