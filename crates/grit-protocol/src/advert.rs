//! The reference advertisement: the server's first message.
//!
//! ```text
//! <hash> <refname>\0<capabilities>\n
//! <hash> <refname>\n
//! <peeled-hash> <tagname>^{}\n
//! 0000
//! ```
//!
//! A repository with nothing to advertise sends one dummy line,
//! `<zero-id> capabilities^{}\0<caps>`, so the capability section still
//! travels. Smart HTTP prefixes the whole thing with a `# service=<name>`
//! frame and a flush.

use bstr::{BStr, BString, ByteSlice};
use grit_hash::{HashAlgorithm, ObjectId};
use grit_transport::Service;

use crate::capability::{CapabilityKey, CapabilitySet};
use crate::pktline::{trim_line, PktLine, PktLineReader, PktLineWriter};
use crate::ProtocolError;

/// One advertised reference, with the peeled target when the server sent a
/// `^{}` companion line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdvertisedRef {
    pub oid: ObjectId,
    pub name: BString,
    pub peeled: Option<ObjectId>,
}

/// Parsed first response.
#[derive(Debug, Clone, Default)]
pub struct Advertisement {
    pub refs: Vec<AdvertisedRef>,
    pub capabilities: CapabilitySet,
}

impl Advertisement {
    /// No real references (either nothing at all or only the
    /// `capabilities^{}` dummy).
    pub fn is_empty(&self) -> bool {
        self.refs.is_empty()
    }

    /// Value of a ref by exact name.
    pub fn find(&self, name: &[u8]) -> Option<ObjectId> {
        self.refs
            .iter()
            .find(|r| r.name == name)
            .map(|r| r.oid)
    }

    /// Where HEAD points, per the `symref=HEAD:...` capability.
    pub fn head_target(&self) -> Option<&BStr> {
        self.capabilities
            .values(CapabilityKey::Symref)
            .filter_map(|v| {
                let (from, to) = v.split_once_str(":")?;
                (from == b"HEAD").then(|| to.as_bstr())
            })
            .next()
    }

    /// Parse an advertisement from the stream, consuming its flush.
    pub fn parse<R: std::io::Read>(
        reader: &mut PktLineReader<R>,
    ) -> Result<Self, ProtocolError> {
        let mut advert = Self::default();
        let mut first = true;

        loop {
            let payload = match reader.read_frame()? {
                PktLine::Data(payload) => payload,
                PktLine::Flush => break,
                other => {
                    return Err(ProtocolError::InvalidResponse(format!(
                        "unexpected {other:?} inside an advertisement"
                    )))
                }
            };
            let line = trim_line(&payload);

            if let Some(rest) = line.strip_prefix(b"ERR ") {
                return Err(ProtocolError::Remote(
                    String::from_utf8_lossy(rest).into_owned(),
                ));
            }

            let (ref_part, caps_part) = match line.find_byte(0) {
                Some(nul) => (&line[..nul], Some(&line[nul + 1..])),
                None => (line, None),
            };
            if first {
                advert.capabilities =
                    CapabilitySet::parse(caps_part.unwrap_or_default().as_bstr());
                first = false;
            } else if caps_part.is_some() {
                return Err(ProtocolError::InvalidResponse(
                    "capability section repeated after the first line".into(),
                ));
            }

            let (oid, name) = split_ref_line(ref_part)?;
            if name == b"capabilities^{}" {
                // Dummy line of an empty advertisement; no real ref.
                continue;
            }
            if let Some(base) = name.strip_suffix(b"^{}") {
                let last = advert.refs.last_mut().ok_or_else(|| {
                    ProtocolError::InvalidResponse("peeled line without a tag".into())
                })?;
                if last.name != base {
                    return Err(ProtocolError::InvalidResponse(format!(
                        "peeled line for {:?} follows {:?}",
                        name.as_bstr(),
                        last.name
                    )));
                }
                last.peeled = Some(oid);
            } else {
                advert.refs.push(AdvertisedRef {
                    oid,
                    name: BString::from(name),
                    peeled: None,
                });
            }
        }

        Ok(advert)
    }

    /// Encode, terminating with a flush. `algo` decides the width of the
    /// zero id on the empty-repository dummy line.
    pub fn encode<W: std::io::Write>(
        &self,
        writer: &mut PktLineWriter<W>,
        algo: HashAlgorithm,
    ) -> Result<(), ProtocolError> {
        let caps = self.capabilities.render();

        if self.refs.is_empty() {
            let line = format!("{} capabilities^{{}}\0{}\n", algo.zero(), caps);
            writer.write_data(line.as_bytes())?;
        } else {
            for (i, advertised) in self.refs.iter().enumerate() {
                let mut line = Vec::new();
                line.extend_from_slice(advertised.oid.to_hex().as_bytes());
                line.push(b' ');
                line.extend_from_slice(&advertised.name);
                if i == 0 {
                    line.push(0);
                    line.extend_from_slice(&caps);
                }
                line.push(b'\n');
                writer.write_data(&line)?;

                if let Some(peeled) = advertised.peeled {
                    let mut line = Vec::new();
                    line.extend_from_slice(peeled.to_hex().as_bytes());
                    line.push(b' ');
                    line.extend_from_slice(&advertised.name);
                    line.extend_from_slice(b"^{}\n");
                    writer.write_data(&line)?;
                }
            }
        }
        writer.write_flush()?;
        Ok(())
    }
}

fn split_ref_line(line: &[u8]) -> Result<(ObjectId, &[u8]), ProtocolError> {
    let space = line.find_byte(b' ').ok_or_else(|| {
        ProtocolError::InvalidResponse(format!(
            "ref line without a space: {:?}",
            line.as_bstr()
        ))
    })?;
    let hex = std::str::from_utf8(&line[..space])
        .map_err(|_| ProtocolError::InvalidResponse("non-ASCII object id".into()))?;
    let oid = ObjectId::from_hex(hex).map_err(|e| {
        ProtocolError::InvalidResponse(format!("bad object id in advertisement: {e}"))
    })?;
    Ok((oid, &line[space + 1..]))
}

/// Consume and validate the smart-HTTP `# service=<name>` announcement
/// that precedes the advertisement proper.
pub fn consume_service_announcement<R: std::io::Read>(
    reader: &mut PktLineReader<R>,
    service: Service,
) -> Result<(), ProtocolError> {
    let line = reader.read_data()?.ok_or_else(|| {
        ProtocolError::InvalidResponse("missing service announcement".into())
    })?;
    let line = trim_line(&line);
    let expected = format!("# service={}", service.name());
    if line != expected.as_bytes() {
        return Err(ProtocolError::InvalidResponse(format!(
            "expected {expected:?}, got {:?}",
            line.as_bstr()
        )));
    }
    // The announcement section ends with its own flush.
    match reader.read_frame()? {
        PktLine::Flush => Ok(()),
        other => Err(ProtocolError::InvalidResponse(format!(
            "service announcement not flush-terminated: {other:?}"
        ))),
    }
}

/// Emit the smart-HTTP announcement (server side).
pub fn write_service_announcement<W: std::io::Write>(
    writer: &mut PktLineWriter<W>,
    service: Service,
) -> Result<(), ProtocolError> {
    writer.write_text(&format!("# service={}", service.name()))?;
    writer.write_flush()?;
    Ok(())
}
