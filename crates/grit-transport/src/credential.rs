//! The credential-helper callback.
//!
//! `Auth::Callback` defers to whatever helpers the user configured, through
//! the `git credential` subprocess protocol: `fill` asks for a credential,
//! `approve` reports that it worked, `reject` that it did not (so helpers
//! can drop a stale cache entry).

use std::io::Write;
use std::process::{Command, Stdio};

use crate::TransportError;

/// What the helper is asked about.
#[derive(Debug, Clone)]
pub struct CredentialRequest {
    pub protocol: String,
    pub host: String,
    pub path: Option<String>,
    pub username: Option<String>,
}

/// What the helper answered.
#[derive(Debug, Clone)]
pub struct CredentialResponse {
    pub username: String,
    pub password: String,
}

impl CredentialRequest {
    /// The key=value block the helper protocol speaks, blank-line
    /// terminated.
    fn to_wire(&self, response: Option<&CredentialResponse>) -> String {
        let mut out = format!("protocol={}\nhost={}\n", self.protocol, self.host);
        if let Some(ref path) = self.path {
            out.push_str(&format!("path={path}\n"));
        }
        match response {
            Some(resp) => {
                out.push_str(&format!(
                    "username={}\npassword={}\n",
                    resp.username, resp.password
                ));
            }
            None => {
                if let Some(ref username) = self.username {
                    out.push_str(&format!("username={username}\n"));
                }
            }
        }
        out.push('\n');
        out
    }
}

/// Ask the configured helpers for a credential.
pub fn fill(request: &CredentialRequest) -> Result<CredentialResponse, TransportError> {
    let output = run_helper("fill", &request.to_wire(None), true)?;
    parse_fill_output(&output).ok_or(TransportError::AuthenticationRequired)
}

/// Report a credential that worked. Helper failures are ignored; the
/// exchange already succeeded.
pub fn approve(request: &CredentialRequest, response: &CredentialResponse) {
    let _ = run_helper("approve", &request.to_wire(Some(response)), false);
}

/// Report a credential the remote refused, so caching helpers forget it.
pub fn reject(request: &CredentialRequest, response: &CredentialResponse) {
    let _ = run_helper("reject", &request.to_wire(Some(response)), false);
}

fn run_helper(action: &str, input: &str, capture: bool) -> Result<Vec<u8>, TransportError> {
    let mut child = Command::new("git")
        .args(["credential", action])
        .stdin(Stdio::piped())
        .stdout(if capture { Stdio::piped() } else { Stdio::null() })
        .stderr(Stdio::null())
        .spawn()
        .map_err(|e| {
            TransportError::ConnectionFailed(format!("cannot spawn git credential {action}: {e}"))
        })?;

    child
        .stdin
        .as_mut()
        .expect("stdin piped")
        .write_all(input.as_bytes())?;
    drop(child.stdin.take());

    let output = child.wait_with_output()?;
    if !output.status.success() {
        return Err(TransportError::AuthenticationRequired);
    }
    Ok(output.stdout)
}

fn parse_fill_output(output: &[u8]) -> Option<CredentialResponse> {
    let text = String::from_utf8_lossy(output);
    let mut username = None;
    let mut password = None;
    for line in text.lines() {
        if let Some(value) = line.strip_prefix("username=") {
            username = Some(value.to_string());
        } else if let Some(value) = line.strip_prefix("password=") {
            password = Some(value.to_string());
        }
    }
    Some(CredentialResponse {
        username: username?,
        password: password?,
    })
}
