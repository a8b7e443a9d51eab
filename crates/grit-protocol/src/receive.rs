//! The receive-pack server session.
//!
//! Validation order for a push, in sequence: (1) every command's old value
//! is checked against the reference's current value, (2) the pack is
//! ingested through the store's quarantine, (3) new values must be
//! resolvable and non-forced branch updates fast-forward, (4) application,
//! atomic when the client negotiated `atomic`, per-command otherwise.

use std::collections::HashSet;
use std::io::{Read, Write};

use bstr::{BString, ByteSlice};
use grit_hash::{HashAlgorithm, ObjectId};
use grit_object::{Commit, ObjectType};
use grit_odb::ObjectStore;
use grit_ref::{Reference, ReferenceStore, RefName};
use grit_transport::Service;

use crate::advert::{Advertisement, AdvertisedRef};
use crate::capability::{select_sideband, CapabilityKey, CapabilitySet, SidebandMode};
use crate::pktline::{trim_line, PktLine, PktLineReader, PktLineWriter};
use crate::push::CommandStatus;
use crate::sideband::SidebandWriter;
use crate::{ProtocolError, AGENT};

/// Server side of a push exchange.
pub struct ReceivePack<'a> {
    objects: &'a dyn ObjectStore,
    refs: &'a dyn ReferenceStore,
    algo: HashAlgorithm,
    /// Refuse branch updates that are not fast-forward.
    deny_non_fast_forward: bool,
}

/// What the exchange did.
#[derive(Debug, Default)]
pub struct ReceiveSummary {
    pub unpack_ok: bool,
    pub commands: Vec<(String, CommandStatus)>,
    /// Objects admitted by the quarantine commit.
    pub objects_admitted: usize,
}

impl ReceiveSummary {
    pub fn all_ok(&self) -> bool {
        self.unpack_ok && self.commands.iter().all(|(_, s)| *s == CommandStatus::Ok)
    }
}

struct ParsedCommand {
    old: ObjectId,
    new: ObjectId,
    name: RefName,
    status: Option<CommandStatus>,
}

impl ParsedCommand {
    fn reject(&mut self, reason: &str) {
        if self.status.is_none() {
            self.status = Some(CommandStatus::Rejected(reason.into()));
        }
    }

    fn pending(&self) -> bool {
        self.status.is_none()
    }
}

impl<'a> ReceivePack<'a> {
    pub fn new(objects: &'a dyn ObjectStore, refs: &'a dyn ReferenceStore) -> Self {
        Self {
            objects,
            refs,
            algo: HashAlgorithm::Sha1,
            deny_non_fast_forward: true,
        }
    }

    pub fn with_algorithm(mut self, algo: HashAlgorithm) -> Self {
        self.algo = algo;
        self
    }

    pub fn allow_non_fast_forward(mut self) -> Self {
        self.deny_non_fast_forward = false;
        self
    }

    fn capabilities(&self) -> CapabilitySet {
        let mut caps = CapabilitySet::new();
        caps.add(CapabilityKey::ReportStatus)
            .add(CapabilityKey::DeleteRefs)
            .add(CapabilityKey::Atomic)
            .add(CapabilityKey::OfsDelta)
            .add(CapabilityKey::SideBand64k)
            .add_value(CapabilityKey::ObjectFormat, self.algo.name())
            .add_value(CapabilityKey::Agent, AGENT);
        caps
    }

    /// Write the reference advertisement. An empty repository advertises
    /// only the capability dummy line, a valid state for receive-pack,
    /// ready for its first push.
    pub fn advertise<W: Write>(&self, out: &mut W) -> Result<(), ProtocolError> {
        let mut refs = Vec::new();
        for reference in self.refs.iter()? {
            if let Reference::Direct { name, target } = reference {
                refs.push(AdvertisedRef {
                    oid: target,
                    name: BString::from(name.as_str()),
                    peeled: None,
                });
            }
        }
        let advert = Advertisement {
            refs,
            capabilities: self.capabilities(),
        };
        let mut writer = PktLineWriter::new(out);
        advert.encode(&mut writer, self.algo)?;
        writer.flush()?;
        Ok(())
    }

    /// As [`advertise`](Self::advertise), prefixed with the smart-HTTP
    /// service announcement.
    pub fn advertise_http<W: Write>(&self, out: &mut W) -> Result<(), ProtocolError> {
        let mut writer = PktLineWriter::new(&mut *out);
        crate::advert::write_service_announcement(&mut writer, Service::ReceivePack)?;
        self.advertise(out)
    }

    /// Run one push exchange: read commands and pack from `input`, apply,
    /// and write the status report to `output` when negotiated.
    pub fn run<R: Read, W: Write>(
        &self,
        input: R,
        output: &mut W,
    ) -> Result<ReceiveSummary, ProtocolError> {
        let mut reader = PktLineReader::new(input);

        let (mut commands, client_caps) = read_commands(&mut reader)?;
        if commands.is_empty() {
            // Client hung up after the advertisement.
            return Ok(ReceiveSummary {
                unpack_ok: true,
                ..ReceiveSummary::default()
            });
        }

        let atomic = client_caps.has(CapabilityKey::Atomic);
        let wants_report = client_caps.has(CapabilityKey::ReportStatus);
        let sideband = select_sideband(&client_caps);

        // (1) Current-value check, before anything is unpacked.
        for command in &mut commands {
            let current = match self.refs.get(&command.name)? {
                Some(Reference::Direct { target, .. }) => Some(target),
                Some(Reference::Symbolic { .. }) => {
                    command.reject("refusing to update symbolic ref");
                    continue;
                }
                None => None,
            };
            let expected = (!command.old.is_zero()).then_some(command.old);
            if current != expected {
                command.reject("reference already exists");
            }
        }

        // (2) Pack ingestion. The pack is present whenever any command
        // carries a non-zero new value; it is consumed even if every
        // command was already rejected, to keep the channel in sync.
        let expect_pack = commands.iter().any(|c| !c.new.is_zero());
        let mut unpack_error: Option<String> = None;
        let mut objects_admitted = 0;
        if expect_pack {
            let mut pack_bytes = Vec::new();
            reader.get_mut().read_to_end(&mut pack_bytes)?;
            match self.ingest(&pack_bytes) {
                Ok(count) => objects_admitted = count,
                Err(e) => unpack_error = Some(e.to_string()),
            }
        }
        if let Some(ref reason) = unpack_error {
            for command in &mut commands {
                command.reject(&format!("unpacker error: {reason}"));
            }
        }

        // (3) Connectivity and fast-forward checks.
        for command in &mut commands {
            if !command.pending() || command.new.is_zero() {
                continue;
            }
            if !self.objects.contains(&command.new) {
                command.reject("missing necessary objects");
                continue;
            }
            let is_update = !command.old.is_zero();
            if is_update
                && self.deny_non_fast_forward
                && command.name.is_branch()
                && !self.is_ancestor(&command.old, &command.new)?
            {
                command.reject("non-fast-forward");
            }
        }

        // (4) Application.
        if atomic && commands.iter().any(|c| !c.pending()) {
            // One failure poisons the whole batch; commands that were fine
            // report the batch abort.
            for command in &mut commands {
                command.reject("atomic transaction failed");
            }
        } else {
            for command in &mut commands {
                if !command.pending() {
                    continue;
                }
                let expected = (!command.old.is_zero()).then_some(&command.old);
                let new = (!command.new.is_zero()).then_some(&command.new);
                if self.refs.compare_and_set(&command.name, expected, new)? {
                    command.status = Some(CommandStatus::Ok);
                } else {
                    // Lost a race between check and apply.
                    command.reject("reference already exists");
                }
            }
        }

        let summary = ReceiveSummary {
            unpack_ok: unpack_error.is_none(),
            commands: commands
                .iter()
                .map(|c| {
                    (
                        c.name.as_str().to_string(),
                        c.status.clone().unwrap_or(CommandStatus::Ok),
                    )
                })
                .collect(),
            objects_admitted,
        };

        if wants_report {
            self.write_report(output, &summary, unpack_error.as_deref(), sideband)?;
        }
        Ok(summary)
    }

    fn ingest(&self, pack_bytes: &[u8]) -> Result<usize, ProtocolError> {
        if pack_bytes.is_empty() {
            return Err(ProtocolError::EmptyPackfile);
        }
        let parser = grit_pack::parse::PackParser::new(pack_bytes, self.algo)?
            .with_resolver(Box::new(|oid| self.objects.read(oid).ok().flatten()));
        let mut ingest = self.objects.begin_pack()?;
        for item in parser {
            let decoded = item?;
            ingest.add(decoded.obj_type, &decoded.data)?;
        }
        Ok(ingest.commit()?)
    }

    /// Is `old` an ancestor of `new` in the commit graph?
    fn is_ancestor(&self, old: &ObjectId, new: &ObjectId) -> Result<bool, ProtocolError> {
        if old == new {
            return Ok(true);
        }
        let mut visited: HashSet<ObjectId> = HashSet::new();
        let mut frontier = vec![*new];
        while let Some(oid) = frontier.pop() {
            if !visited.insert(oid) {
                continue;
            }
            let Some((obj_type, data)) = self.objects.read(&oid)? else {
                continue;
            };
            if obj_type != ObjectType::Commit {
                continue;
            }
            let commit = Commit::parse(&data)?;
            for parent in commit.parents {
                if parent == *old {
                    return Ok(true);
                }
                frontier.push(parent);
            }
        }
        Ok(false)
    }

    fn write_report<W: Write>(
        &self,
        output: &mut W,
        summary: &ReceiveSummary,
        unpack_error: Option<&str>,
        sideband: SidebandMode,
    ) -> Result<(), ProtocolError> {
        let mut body = Vec::new();
        {
            let mut writer = PktLineWriter::new(&mut body);
            match unpack_error {
                None => writer.write_text("unpack ok")?,
                Some(reason) => writer.write_text(&format!("unpack {reason}"))?,
            }
            for (name, status) in &summary.commands {
                match status {
                    CommandStatus::Ok => writer.write_text(&format!("ok {name}"))?,
                    CommandStatus::Rejected(reason) => {
                        writer.write_text(&format!("ng {name} {reason}"))?
                    }
                }
            }
            writer.write_flush()?;
        }

        match sideband {
            SidebandMode::None => output.write_all(&body)?,
            mode => {
                let mut frames = PktLineWriter::new(&mut *output);
                let mut mux = SidebandWriter::new(&mut frames, mode);
                mux.write_data(&body)?;
                mux.finish()?;
            }
        }
        output.flush()?;
        Ok(())
    }
}

/// Read the command section; the first line's NUL section carries the
/// client's capability choice.
fn read_commands<R: Read>(
    reader: &mut PktLineReader<R>,
) -> Result<(Vec<ParsedCommand>, CapabilitySet), ProtocolError> {
    let mut commands = Vec::new();
    let mut caps = CapabilitySet::new();
    let mut first = true;

    loop {
        let payload = match reader.read_frame() {
            Ok(PktLine::Data(payload)) => payload,
            Ok(PktLine::Flush) => break,
            Ok(other) => {
                return Err(ProtocolError::InvalidResponse(format!(
                    "unexpected {other:?} in command section"
                )))
            }
            // An immediate EOF (no frames at all) is a client that went
            // away after the advertisement.
            Err(ProtocolError::InvalidPktLine(_)) if first && commands.is_empty() => break,
            Err(e) => return Err(e),
        };
        let line = trim_line(&payload);

        let (command_part, caps_part) = match line.find_byte(0) {
            Some(nul) => (&line[..nul], Some(&line[nul + 1..])),
            None => (line, None),
        };
        if first {
            caps = CapabilitySet::parse(caps_part.unwrap_or_default().as_bstr())
                .filter_unsupported();
            first = false;
        }

        commands.push(parse_command(command_part)?);
    }
    Ok((commands, caps))
}

fn parse_command(line: &[u8]) -> Result<ParsedCommand, ProtocolError> {
    let text = std::str::from_utf8(line)
        .map_err(|_| ProtocolError::InvalidResponse("non-UTF-8 command line".into()))?;
    let mut fields = text.splitn(3, ' ');
    let (old, new, name) = match (fields.next(), fields.next(), fields.next()) {
        (Some(old), Some(new), Some(name)) => (old, new, name),
        _ => {
            return Err(ProtocolError::InvalidResponse(format!(
                "malformed command line: {text:?}"
            )))
        }
    };

    let old = ObjectId::from_hex(old)
        .map_err(|e| ProtocolError::InvalidResponse(format!("bad old id: {e}")))?;
    let new = ObjectId::from_hex(new)
        .map_err(|e| ProtocolError::InvalidResponse(format!("bad new id: {e}")))?;
    let name = RefName::new(name)?;

    Ok(ParsedCommand {
        old,
        new,
        name,
        status: None,
    })
}
