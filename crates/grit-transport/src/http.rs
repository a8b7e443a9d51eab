//! Smart HTTP transport.
//!
//! Discovery is a GET of `/info/refs?service=<name>`; every later exchange
//! is an independent POST to `/<name>` whose body is whatever the session
//! wrote since the previous [`finish_request`]. The blocking HTTP work is
//! shelled out to `curl`, which keeps TLS and proxy handling outside this
//! crate.
//!
//! [`finish_request`]: crate::Transport::finish_request

use std::io::{Cursor, Read, Write};
use std::process::{Command, Stdio};

use crate::{credential, Auth, GitUrl, Service, Transport, TransportError};

pub struct HttpTransport {
    base_url: String,
    service: Service,
    auth: Auth,
    write_buf: Vec<u8>,
    read_buf: Cursor<Vec<u8>>,
}

impl HttpTransport {
    fn post_exchange(&mut self) -> Result<(), TransportError> {
        let url = format!("{}/{}", self.base_url, self.service.name());
        let body = std::mem::take(&mut self.write_buf);
        tracing::debug!(
            target: "grit::transport",
            url = %url,
            bytes = body.len(),
            "smart-http round trip"
        );
        let response = request(
            &url,
            &self.auth,
            Some((
                &format!("application/x-{}-request", self.service.name()),
                &format!("application/x-{}-result", self.service.name()),
                &body,
            )),
        )?;
        self.read_buf = Cursor::new(response);
        Ok(())
    }
}

impl Transport for HttpTransport {
    fn reader(&mut self) -> &mut dyn Read {
        &mut self.read_buf
    }

    fn writer(&mut self) -> &mut dyn Write {
        &mut self.write_buf
    }

    fn finish_request(&mut self) -> Result<(), TransportError> {
        self.post_exchange()
    }

    fn is_stateless(&self) -> bool {
        true
    }

    fn close(self: Box<Self>) -> Result<(), TransportError> {
        Ok(())
    }
}

/// Connect and perform service discovery; the response (starting with the
/// `# service=` announcement) is readable immediately.
///
/// `Auth::Callback` is resolved here, once per connection: the credential
/// helpers fill in a username/password pair, and the discovery outcome is
/// reported back so caching helpers can keep or drop it.
pub fn connect(
    url: &GitUrl,
    service: Service,
    auth: &Auth,
) -> Result<Box<dyn Transport>, TransportError> {
    match auth {
        Auth::None | Auth::Password { .. } | Auth::Callback { .. } => {}
        Auth::Key { .. } | Auth::Agent { .. } => {
            return Err(TransportError::InvalidAuthMethod("ssh keys over http"));
        }
    }

    let base_url = format!(
        "{}://{}{}{}",
        url.scheme,
        url.host.as_deref().unwrap_or(""),
        url.port.map(|p| format!(":{p}")).unwrap_or_default(),
        url.path.trim_end_matches('/'),
    );

    let (auth, filled) = match auth {
        Auth::Callback { username } => {
            let helper_request = credential::CredentialRequest {
                protocol: url.scheme.to_string(),
                host: url.host.clone().unwrap_or_default(),
                path: Some(url.path.trim_start_matches('/').to_string()),
                username: username.clone(),
            };
            let helper_response = credential::fill(&helper_request)?;
            (
                Auth::Password {
                    username: helper_response.username.clone(),
                    password: helper_response.password.clone(),
                },
                Some((helper_request, helper_response)),
            )
        }
        other => (other.clone(), None),
    };

    let discovery = format!("{base_url}/info/refs?service={}", service.name());
    let result = request(&discovery, &auth, None);
    if let Some((ref helper_request, ref helper_response)) = filled {
        match &result {
            Ok(_) => credential::approve(helper_request, helper_response),
            Err(TransportError::AuthenticationRequired) => {
                credential::reject(helper_request, helper_response)
            }
            Err(_) => {}
        }
    }
    let response = result?;

    Ok(Box::new(HttpTransport {
        base_url,
        service,
        auth,
        write_buf: Vec::new(),
        read_buf: Cursor::new(response),
    }))
}

/// One blocking HTTP exchange through curl. `body` of `None` is a GET.
fn request(
    url: &str,
    auth: &Auth,
    body: Option<(&str, &str, &[u8])>,
) -> Result<Vec<u8>, TransportError> {
    let mut cmd = Command::new("curl");
    cmd.args(["--silent", "--location", "--include"]);

    if let Auth::Password { username, password } = auth {
        cmd.arg("--user").arg(format!("{username}:{password}"));
    }

    if let Some((content_type, accept, _)) = body {
        cmd.args(["--request", "POST", "--data-binary", "@-"])
            .arg("--header")
            .arg(format!("Content-Type: {content_type}"))
            .arg("--header")
            .arg(format!("Accept: {accept}"));
        cmd.stdin(Stdio::piped());
    } else {
        cmd.stdin(Stdio::null());
    }

    let mut child = cmd
        .arg(url)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| TransportError::ConnectionFailed(format!("cannot spawn curl: {e}")))?;

    if let Some((_, _, payload)) = body {
        child
            .stdin
            .as_mut()
            .expect("stdin piped")
            .write_all(payload)?;
        drop(child.stdin.take());
    }

    let output = child.wait_with_output()?;
    if !output.status.success() {
        return Err(TransportError::ConnectionFailed(format!(
            "curl exited with {}: {}",
            output.status.code().unwrap_or(-1),
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }

    let (status, payload) = split_response(&output.stdout)?;
    match status {
        200..=299 => Ok(payload),
        401 => Err(TransportError::AuthenticationRequired),
        403 => Err(TransportError::AuthorizationFailed),
        404 | 410 => Err(TransportError::RepositoryNotFound),
        status => Err(TransportError::Http {
            status,
            message: format!("unexpected response from {url}"),
        }),
    }
}

/// Peel curl's `--include` output down to `(final status, body)`.
///
/// Redirect hops each contribute a header block; the status of the last
/// block wins.
fn split_response(raw: &[u8]) -> Result<(u16, Vec<u8>), TransportError> {
    let mut rest = raw;
    let mut status = None;

    while rest.starts_with(b"HTTP/") {
        let line_end = rest
            .windows(2)
            .position(|w| w == b"\r\n")
            .ok_or_else(|| TransportError::ConnectionFailed("truncated HTTP headers".into()))?;
        let line = &rest[..line_end];
        status = std::str::from_utf8(line)
            .ok()
            .and_then(|l| l.split_whitespace().nth(1))
            .and_then(|code| code.parse::<u16>().ok());

        let block_end = rest
            .windows(4)
            .position(|w| w == b"\r\n\r\n")
            .ok_or_else(|| TransportError::ConnectionFailed("truncated HTTP headers".into()))?;
        rest = &rest[block_end + 4..];
    }

    match status {
        Some(code) => Ok((code, rest.to_vec())),
        None => Err(TransportError::ConnectionFailed(
            "no HTTP status line in response".into(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_single_block() {
        let raw = b"HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\n\r\nbody bytes";
        let (status, body) = split_response(raw).unwrap();
        assert_eq!(status, 200);
        assert_eq!(body, b"body bytes");
    }

    #[test]
    fn split_redirect_chain_keeps_last_status() {
        let raw = b"HTTP/1.1 301 Moved\r\nLocation: x\r\n\r\nHTTP/1.1 404 Not Found\r\n\r\ngone";
        let (status, body) = split_response(raw).unwrap();
        assert_eq!(status, 404);
        assert_eq!(body, b"gone");
    }

    #[test]
    fn split_rejects_headerless_garbage() {
        assert!(split_response(b"no headers here").is_err());
    }

    #[test]
    fn binary_body_preserved() {
        let mut raw = b"HTTP/1.1 200 OK\r\n\r\n".to_vec();
        raw.extend_from_slice(&[0, 1, 2, 0xff, 0xfe]);
        let (_, body) = split_response(&raw).unwrap();
        assert_eq!(body, [0, 1, 2, 0xff, 0xfe]);
    }
}
