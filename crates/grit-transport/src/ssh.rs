//! SSH transport: an external `ssh` process running the remote service.

use std::io::{Read, Write};
use std::process::{Child, Command, Stdio};

use crate::{Auth, GitUrl, Service, Transport, TransportError};

pub struct SshTransport {
    child: Child,
}

impl Transport for SshTransport {
    fn reader(&mut self) -> &mut dyn Read {
        self.child.stdout.as_mut().expect("stdout piped")
    }

    fn writer(&mut self) -> &mut dyn Write {
        self.child.stdin.as_mut().expect("stdin piped")
    }

    fn close(mut self: Box<Self>) -> Result<(), TransportError> {
        // EOF on stdin tells the remote service we are done.
        drop(self.child.stdin.take());
        let status = self.child.wait()?;
        // ssh exits 255 on its own failures; the remote closing early after
        // a finished exchange is normal.
        if status.code() == Some(255) {
            return Err(TransportError::ProcessFailed {
                command: "ssh".into(),
                code: 255,
            });
        }
        Ok(())
    }
}

/// Spawn `ssh [user@]host <service> '<path>'`.
pub fn connect(
    url: &GitUrl,
    service: Service,
    auth: &Auth,
) -> Result<Box<dyn Transport>, TransportError> {
    let host = url
        .host
        .as_deref()
        .ok_or_else(|| TransportError::InvalidUrl("ssh URL needs a host".into()))?;

    let mut cmd = Command::new("ssh");
    match auth {
        Auth::None | Auth::Agent { .. } => {}
        Auth::Key { key_path, .. } => {
            cmd.arg("-i").arg(key_path);
        }
        // ssh will not take a password on the command line, and the
        // credential-helper protocol only yields passwords.
        Auth::Password { .. } => {
            return Err(TransportError::InvalidAuthMethod("password over ssh"));
        }
        Auth::Callback { .. } => {
            return Err(TransportError::InvalidAuthMethod("credential helper over ssh"));
        }
    }
    if let Some(port) = url.port {
        cmd.arg("-p").arg(port.to_string());
    }

    let user = auth.user().or(url.user.as_deref());
    match user {
        Some(user) => cmd.arg(format!("{user}@{host}")),
        None => cmd.arg(host),
    };

    // The whole remote command travels as one argument; the path is
    // single-quoted the way git quotes it.
    cmd.arg(format!("{} '{}'", service.name(), url.path));

    tracing::debug!(target: "grit::transport", host, service = service.name(), "spawning ssh");

    let child = cmd
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| TransportError::ConnectionFailed(format!("cannot spawn ssh: {e}")))?;

    Ok(Box::new(SshTransport { child }))
}
