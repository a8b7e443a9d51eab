//! The send-pack client session: ref commands, pack upload, status report.

use std::io::Write;

use grit_hash::{HashAlgorithm, ObjectId};
use grit_odb::{ObjectStore, StoreSource};
use grit_ref::RefName;
use grit_transport::{CancelToken, Transport};

use crate::advert::Advertisement;
use crate::capability::{self, CapabilityKey, SidebandMode};
use crate::pktline::{trim_line, PktLineReader, PktLineWriter};
use crate::sideband::SidebandReader;
use crate::ProtocolError;

/// One ref update command: `<old> <new> <name>`.
///
/// A zero `old` creates, a zero `new` deletes, otherwise it updates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefCommand {
    pub old: ObjectId,
    pub new: ObjectId,
    pub name: RefName,
}

impl RefCommand {
    pub fn create(name: RefName, new: ObjectId) -> Self {
        Self {
            old: new.algorithm().zero(),
            new,
            name,
        }
    }

    pub fn delete(name: RefName, old: ObjectId) -> Self {
        Self {
            old,
            new: old.algorithm().zero(),
            name,
        }
    }

    pub fn update(name: RefName, old: ObjectId, new: ObjectId) -> Self {
        Self { old, new, name }
    }

    pub fn is_delete(&self) -> bool {
        self.new.is_zero()
    }

    pub fn is_create(&self) -> bool {
        self.old.is_zero() && !self.new.is_zero()
    }
}

/// What to push.
pub struct PushRequest {
    pub commands: Vec<RefCommand>,
    /// All-or-nothing application on the server.
    pub atomic: bool,
    /// Sink for the server's band-2 progress text.
    pub progress: Option<Box<dyn Write + Send>>,
}

/// Per-command outcome in the server's report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandStatus {
    Ok,
    Rejected(String),
}

/// Structured `report-status` response.
#[derive(Debug, Default)]
pub struct PushReport {
    pub unpack_ok: bool,
    pub unpack_error: Option<String>,
    pub commands: Vec<(String, CommandStatus)>,
}

impl PushReport {
    /// Every command applied and the pack unpacked.
    pub fn all_ok(&self) -> bool {
        self.unpack_ok && self.commands.iter().all(|(_, s)| *s == CommandStatus::Ok)
    }
}

/// Drive a push over a connected transport whose advertisement was already
/// read.
pub(crate) fn run_push(
    transport: &mut dyn Transport,
    advert: &Advertisement,
    mut request: PushRequest,
    store: &dyn ObjectStore,
    cancel: &CancelToken,
    algo: HashAlgorithm,
) -> Result<PushReport, ProtocolError> {
    if request.commands.is_empty() {
        return Ok(PushReport {
            unpack_ok: true,
            ..PushReport::default()
        });
    }

    let theirs = advert.capabilities.object_format_name();
    if theirs != algo.name().as_bytes() {
        return Err(ProtocolError::ObjectFormatMismatch {
            ours: algo.name().into(),
            theirs: theirs.to_string(),
        });
    }

    if request.commands.iter().any(RefCommand::is_delete)
        && !advert.capabilities.has(CapabilityKey::DeleteRefs)
    {
        return Err(ProtocolError::CapabilityNotNegotiated("delete-refs"));
    }

    let ours = capability::negotiate_push(&advert.capabilities, request.atomic)?;
    let sideband = capability::select_sideband(&ours);
    let expects_report = ours.has(CapabilityKey::ReportStatus);
    let allow_ofs = ours.has(CapabilityKey::OfsDelta);
    let caps_line = ours.render();

    cancel.check()?;
    {
        let mut writer = PktLineWriter::new(transport.writer());
        for (i, command) in request.commands.iter().enumerate() {
            if i == 0 {
                let mut line =
                    format!("{} {} {}", command.old, command.new, command.name).into_bytes();
                line.push(0);
                line.extend_from_slice(&caps_line);
                line.push(b'\n');
                writer.write_data(&line)?;
            } else {
                writer.write_text(&format!(
                    "{} {} {}",
                    command.old, command.new, command.name
                ))?;
            }
        }
        writer.write_flush()?;
    }

    // Pack of everything reachable from the new tips but not from what the
    // remote already has (its advertised refs plus the old values).
    let wants: Vec<ObjectId> = request
        .commands
        .iter()
        .filter(|c| !c.new.is_zero())
        .map(|c| c.new)
        .collect();
    if !wants.is_empty() {
        let mut haves: Vec<ObjectId> = advert.refs.iter().map(|r| r.oid).collect();
        haves.extend(
            request
                .commands
                .iter()
                .filter(|c| !c.old.is_zero())
                .map(|c| c.old),
        );

        cancel.check()?;
        let source = StoreSource(store);
        let summary = grit_pack::encode::pack_objects(
            &source,
            &wants,
            &haves,
            transport.writer(),
            algo,
            allow_ofs,
        )?;
        tracing::debug!(
            target: "grit::session",
            objects = summary.count,
            bytes = summary.bytes_written,
            "push pack written"
        );
    }
    transport.finish_request()?;

    if !expects_report {
        // Without report-status the server stays silent; assume success.
        return Ok(PushReport {
            unpack_ok: true,
            unpack_error: None,
            commands: request
                .commands
                .iter()
                .map(|c| (c.name.as_str().to_string(), CommandStatus::Ok))
                .collect(),
        });
    }

    cancel.check()?;
    let report_lines = match sideband {
        SidebandMode::None => {
            let mut reader = PktLineReader::new(transport.reader());
            reader.read_section()?
        }
        SidebandMode::Band | SidebandMode::Band64k => {
            let frames = PktLineReader::new(transport.reader());
            let demux = SidebandReader::new(frames);
            let data = match request.progress.as_deref_mut() {
                Some(sink) => demux.with_progress(sink).read_all_data()?,
                None => {
                    let mut demux = demux;
                    demux.read_all_data()?
                }
            };
            let mut inner = PktLineReader::new(std::io::Cursor::new(data));
            inner.read_section()?
        }
    };

    parse_report(&report_lines)
}

fn parse_report(lines: &[Vec<u8>]) -> Result<PushReport, ProtocolError> {
    let mut report = PushReport::default();
    let mut saw_unpack = false;

    for payload in lines {
        let line = trim_line(payload);
        if let Some(status) = line.strip_prefix(b"unpack ") {
            saw_unpack = true;
            if status == b"ok" {
                report.unpack_ok = true;
            } else {
                report.unpack_ok = false;
                report.unpack_error = Some(String::from_utf8_lossy(status).into_owned());
            }
        } else if let Some(name) = line.strip_prefix(b"ok ") {
            report.commands.push((
                String::from_utf8_lossy(name).into_owned(),
                CommandStatus::Ok,
            ));
        } else if let Some(rest) = line.strip_prefix(b"ng ") {
            let rest = String::from_utf8_lossy(rest);
            let (name, reason) = rest
                .split_once(' ')
                .unwrap_or((rest.as_ref(), "rejected"));
            report.commands.push((
                name.to_string(),
                CommandStatus::Rejected(reason.to_string()),
            ));
        } else {
            return Err(ProtocolError::InvalidResponse(format!(
                "unexpected status line: {:?}",
                String::from_utf8_lossy(line)
            )));
        }
    }

    if !saw_unpack {
        return Err(ProtocolError::InvalidResponse(
            "status report without an unpack line".into(),
        ));
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn oid(n: u8) -> ObjectId {
        let mut d = [0u8; 20];
        d[0] = n;
        ObjectId::from_bytes(&d, HashAlgorithm::Sha1).unwrap()
    }

    #[test]
    fn command_classification() {
        let name = RefName::new("refs/heads/x").unwrap();
        let create = RefCommand::create(name.clone(), oid(1));
        assert!(create.is_create());
        assert!(!create.is_delete());

        let delete = RefCommand::delete(name.clone(), oid(1));
        assert!(delete.is_delete());
        assert!(!delete.is_create());

        let update = RefCommand::update(name, oid(1), oid(2));
        assert!(!update.is_create());
        assert!(!update.is_delete());
    }

    fn lines(raw: &[&str]) -> Vec<Vec<u8>> {
        raw.iter().map(|l| format!("{l}\n").into_bytes()).collect()
    }

    #[test]
    fn parse_all_ok_report() {
        let report = parse_report(&lines(&[
            "unpack ok",
            "ok refs/heads/main",
            "ok refs/tags/v1",
        ]))
        .unwrap();
        assert!(report.all_ok());
        assert_eq!(report.commands.len(), 2);
    }

    #[test]
    fn parse_mixed_report() {
        let report = parse_report(&lines(&[
            "unpack ok",
            "ok refs/heads/main",
            "ng refs/heads/locked non-fast-forward",
        ]))
        .unwrap();
        assert!(!report.all_ok());
        assert_eq!(
            report.commands[1],
            (
                "refs/heads/locked".to_string(),
                CommandStatus::Rejected("non-fast-forward".to_string())
            )
        );
    }

    #[test]
    fn parse_unpack_failure() {
        let report = parse_report(&lines(&["unpack index-pack abnormal exit"])).unwrap();
        assert!(!report.unpack_ok);
        assert!(report
            .unpack_error
            .as_deref()
            .unwrap()
            .contains("index-pack"));
    }

    #[test]
    fn report_without_unpack_line_rejected() {
        assert!(parse_report(&lines(&["ok refs/heads/main"])).is_err());
        assert!(parse_report(&lines(&["something else"])).is_err());
    }
}
