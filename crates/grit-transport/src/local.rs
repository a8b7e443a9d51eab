//! Local transport: the service binary run directly against a path.

use std::io::{Read, Write};
use std::process::{Child, Command, Stdio};

use crate::{GitUrl, Service, Transport, TransportError};

pub struct LocalTransport {
    service: Service,
    child: Child,
}

impl Transport for LocalTransport {
    fn reader(&mut self) -> &mut dyn Read {
        self.child.stdout.as_mut().expect("stdout piped")
    }

    fn writer(&mut self) -> &mut dyn Write {
        self.child.stdin.as_mut().expect("stdin piped")
    }

    fn close(mut self: Box<Self>) -> Result<(), TransportError> {
        drop(self.child.stdin.take());
        let status = self.child.wait()?;
        match status.code() {
            Some(0) => Ok(()),
            code => Err(TransportError::ProcessFailed {
                command: self.service.name().into(),
                code: code.unwrap_or(-1),
            }),
        }
    }
}

/// Spawn `git-upload-pack <path>` (or receive-pack) for file:// and bare
/// path remotes.
pub fn connect(url: &GitUrl, service: Service) -> Result<Box<dyn Transport>, TransportError> {
    let child = Command::new(service.name())
        .arg(&url.path)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| {
            TransportError::ConnectionFailed(format!("cannot spawn {}: {e}", service.name()))
        })?;

    Ok(Box::new(LocalTransport { service, child }))
}
