//! The upload-pack client session: want/have negotiation and pack receipt.
//!
//! Single-ack negotiation: haves go out in batches of [`HAVE_BATCH`], each
//! batch flush-terminated; the first `ACK` stops the search and `done` is
//! sent. Stateless channels resend the full request (wants plus every have
//! sent so far) on each round trip, since the server keeps no state
//! between them.

use std::collections::VecDeque;
use std::io::{Read, Write};

use grit_hash::{HashAlgorithm, ObjectId};
use grit_odb::ObjectStore;
use grit_transport::{CancelToken, Transport};

use crate::advert::Advertisement;
use crate::capability::{self, CapabilityKey, SidebandMode};
use crate::pktline::{trim_line, PktLineReader, PktLineWriter};
use crate::sideband::SidebandReader;
use crate::ProtocolError;

/// Haves per negotiation round.
pub const HAVE_BATCH: usize = 32;

/// Bound of the queue between the pack decoder and ingestion.
const DECODE_QUEUE: usize = 16;

/// What to fetch and how.
pub struct FetchRequest {
    pub wants: Vec<ObjectId>,
    pub haves: Vec<ObjectId>,
    /// Depth-limited fetch: history is cut `depth` commits below the tips.
    pub depth: Option<u32>,
    /// The client's current shallow boundary, advertised to the server.
    pub shallows: Vec<ObjectId>,
    /// Sink for the server's band-2 progress text.
    pub progress: Option<Box<dyn Write + Send>>,
}

impl Default for FetchRequest {
    fn default() -> Self {
        Self {
            wants: Vec::new(),
            haves: Vec::new(),
            depth: None,
            shallows: Vec::new(),
            progress: None,
        }
    }
}

impl FetchRequest {
    pub fn wants(wants: impl IntoIterator<Item = ObjectId>) -> Self {
        Self {
            wants: wants.into_iter().collect(),
            ..Self::default()
        }
    }
}

/// What a fetch accomplished.
#[derive(Debug, Default)]
pub struct FetchOutcome {
    /// Objects admitted to the store.
    pub objects: usize,
    /// Trailer digest of the received pack.
    pub pack_checksum: Option<ObjectId>,
    /// The common ancestor the server acknowledged, if any.
    pub common: Option<ObjectId>,
    /// New shallow boundary commits announced by the server.
    pub shallow: Vec<ObjectId>,
    /// Commits the server un-shallowed.
    pub unshallow: Vec<ObjectId>,
}

struct Negotiated {
    common: Option<ObjectId>,
    shallow: Vec<ObjectId>,
    unshallow: Vec<ObjectId>,
}

/// Drive a fetch over a connected transport whose advertisement was
/// already read.
pub(crate) fn run_fetch(
    transport: &mut dyn Transport,
    advert: &Advertisement,
    mut request: FetchRequest,
    store: &dyn ObjectStore,
    cancel: &CancelToken,
    algo: HashAlgorithm,
) -> Result<FetchOutcome, ProtocolError> {
    if request.wants.is_empty() {
        // Nothing wanted: terminate the exchange politely.
        if !transport.is_stateless() {
            let mut writer = PktLineWriter::new(transport.writer());
            writer.write_flush()?;
            writer.flush()?;
        }
        return Ok(FetchOutcome::default());
    }

    if advert.is_empty() {
        return Err(ProtocolError::EmptyRemoteRepository);
    }

    let theirs = advert.capabilities.object_format_name();
    if theirs != algo.name().as_bytes() {
        return Err(ProtocolError::ObjectFormatMismatch {
            ours: algo.name().into(),
            theirs: theirs.to_string(),
        });
    }

    if request.wants.iter().all(|w| store.contains(w)) {
        return Err(ProtocolError::NoChange);
    }

    if request.depth.is_some() && !advert.capabilities.has(CapabilityKey::Shallow) {
        return Err(ProtocolError::CapabilityNotNegotiated("shallow"));
    }

    let ours = capability::negotiate_fetch(&advert.capabilities, request.progress.is_some());
    let sideband = capability::select_sideband(&ours);
    let caps_line = ours.render();

    tracing::debug!(
        target: "grit::session",
        wants = request.wants.len(),
        haves = request.haves.len(),
        depth = ?request.depth,
        stateless = transport.is_stateless(),
        "starting fetch negotiation"
    );

    let negotiated = if transport.is_stateless() {
        negotiate_stateless(transport, &request, &caps_line, cancel)?
    } else {
        negotiate_stateful(transport, &request, &caps_line, cancel)?
    };

    let pack_bytes = receive_pack_bytes(transport, sideband, request.progress.as_deref_mut())?;
    if pack_bytes.is_empty() {
        return Err(ProtocolError::EmptyPackfile);
    }

    let (objects, pack_checksum) = ingest_pack(&pack_bytes, store, cancel, algo)?;
    Ok(FetchOutcome {
        objects,
        pack_checksum: Some(pack_checksum),
        common: negotiated.common,
        shallow: negotiated.shallow,
        unshallow: negotiated.unshallow,
    })
}

/// The want block: want lines (capabilities on the first), the client's
/// shallow set, the deepen request, then a flush.
fn write_want_block(
    writer: &mut PktLineWriter<&mut dyn Write>,
    request: &FetchRequest,
    caps_line: &[u8],
) -> Result<(), ProtocolError> {
    for (i, want) in request.wants.iter().enumerate() {
        if i == 0 && !caps_line.is_empty() {
            let mut line = format!("want {want} ").into_bytes();
            line.extend_from_slice(caps_line);
            line.push(b'\n');
            writer.write_data(&line)?;
        } else {
            writer.write_text(&format!("want {want}"))?;
        }
    }
    for shallow in &request.shallows {
        writer.write_text(&format!("shallow {shallow}"))?;
    }
    if let Some(depth) = request.depth {
        writer.write_text(&format!("deepen {depth}"))?;
    }
    writer.write_flush()?;
    Ok(())
}

/// Parse the shallow/unshallow section the server sends (flush-terminated)
/// when a deepen request was made.
fn read_shallow_section<R: Read>(
    reader: &mut PktLineReader<R>,
    negotiated: &mut Negotiated,
) -> Result<(), ProtocolError> {
    negotiated.shallow.clear();
    negotiated.unshallow.clear();
    while let Some(payload) = reader.read_data()? {
        let line = trim_line(&payload);
        if let Some(hex) = strip_prefix_str(line, "shallow ") {
            negotiated.shallow.push(parse_oid(hex)?);
        } else if let Some(hex) = strip_prefix_str(line, "unshallow ") {
            negotiated.unshallow.push(parse_oid(hex)?);
        } else {
            return Err(ProtocolError::InvalidResponse(format!(
                "unexpected line in shallow section: {:?}",
                String::from_utf8_lossy(line)
            )));
        }
    }
    Ok(())
}

enum AckLine {
    Ack(ObjectId),
    Nak,
}

fn read_ack_line<R: Read>(reader: &mut PktLineReader<R>) -> Result<AckLine, ProtocolError> {
    let payload = reader.read_data()?.ok_or_else(|| {
        ProtocolError::InvalidResponse("flush where ACK/NAK was expected".into())
    })?;
    let line = trim_line(&payload);
    if line == b"NAK" {
        return Ok(AckLine::Nak);
    }
    if let Some(rest) = strip_prefix_str(line, "ACK ") {
        // "ACK <oid>[ continue|common|ready]": the trailing word only
        // appears in multi-ack modes we filtered out, but tolerate it.
        let hex = rest.split(|&b| b == b' ').next().unwrap_or_default();
        return Ok(AckLine::Ack(parse_oid(hex)?));
    }
    Err(ProtocolError::InvalidResponse(format!(
        "expected ACK or NAK, got {:?}",
        String::from_utf8_lossy(line)
    )))
}

fn negotiate_stateful(
    transport: &mut dyn Transport,
    request: &FetchRequest,
    caps_line: &[u8],
    cancel: &CancelToken,
) -> Result<Negotiated, ProtocolError> {
    let mut negotiated = Negotiated {
        common: None,
        shallow: Vec::new(),
        unshallow: Vec::new(),
    };

    {
        let mut writer = PktLineWriter::new(transport.writer());
        write_want_block(&mut writer, request, caps_line)?;
        writer.flush()?;
    }

    if request.depth.is_some() {
        let mut reader = PktLineReader::new(transport.reader());
        read_shallow_section(&mut reader, &mut negotiated)?;
    }

    for batch in request.haves.chunks(HAVE_BATCH) {
        cancel.check()?;
        {
            let mut writer = PktLineWriter::new(transport.writer());
            for have in batch {
                writer.write_text(&format!("have {have}"))?;
            }
            writer.write_flush()?;
            writer.flush()?;
        }
        let mut reader = PktLineReader::new(transport.reader());
        if let AckLine::Ack(oid) = read_ack_line(&mut reader)? {
            negotiated.common = Some(oid);
            break;
        }
    }

    cancel.check()?;
    {
        let mut writer = PktLineWriter::new(transport.writer());
        writer.write_text("done")?;
        writer.flush()?;
    }

    // One closing ACK/NAK after done, then the pack follows.
    let mut reader = PktLineReader::new(transport.reader());
    if let AckLine::Ack(oid) = read_ack_line(&mut reader)? {
        negotiated.common.get_or_insert(oid);
    }
    Ok(negotiated)
}

fn negotiate_stateless(
    transport: &mut dyn Transport,
    request: &FetchRequest,
    caps_line: &[u8],
    cancel: &CancelToken,
) -> Result<Negotiated, ProtocolError> {
    let mut negotiated = Negotiated {
        common: None,
        shallow: Vec::new(),
        unshallow: Vec::new(),
    };
    let mut sent: Vec<ObjectId> = Vec::new();
    let mut queue: VecDeque<&[ObjectId]> = request.haves.chunks(HAVE_BATCH).collect();

    // Probing rounds: wants + everything sent so far + one more batch.
    while let Some(batch) = queue.pop_front() {
        if negotiated.common.is_some() {
            break;
        }
        cancel.check()?;
        {
            let mut writer = PktLineWriter::new(transport.writer());
            write_want_block(&mut writer, request, caps_line)?;
            for have in sent.iter().chain(batch) {
                writer.write_text(&format!("have {have}"))?;
            }
            writer.write_flush()?;
        }
        transport.finish_request()?;
        sent.extend_from_slice(batch);

        let mut reader = PktLineReader::new(transport.reader());
        if request.depth.is_some() {
            read_shallow_section(&mut reader, &mut negotiated)?;
        }
        if let AckLine::Ack(oid) = read_ack_line(&mut reader)? {
            negotiated.common = Some(oid);
        }
    }

    // Closing round: the whole request again, ending in done. The pack
    // arrives in this response.
    cancel.check()?;
    {
        let mut writer = PktLineWriter::new(transport.writer());
        write_want_block(&mut writer, request, caps_line)?;
        for have in &sent {
            writer.write_text(&format!("have {have}"))?;
        }
        writer.write_text("done")?;
    }
    transport.finish_request()?;

    let mut reader = PktLineReader::new(transport.reader());
    if request.depth.is_some() {
        read_shallow_section(&mut reader, &mut negotiated)?;
    }
    if let AckLine::Ack(oid) = read_ack_line(&mut reader)? {
        negotiated.common.get_or_insert(oid);
    }
    Ok(negotiated)
}

/// Pull the raw pack bytes off the wire, demultiplexing sideband frames
/// when that was negotiated.
fn receive_pack_bytes(
    transport: &mut dyn Transport,
    mode: SidebandMode,
    progress: Option<&mut (dyn Write + Send + 'static)>,
) -> Result<Vec<u8>, ProtocolError> {
    let reader = transport.reader();
    match mode {
        SidebandMode::None => {
            let mut bytes = Vec::new();
            reader.read_to_end(&mut bytes)?;
            Ok(bytes)
        }
        SidebandMode::Band | SidebandMode::Band64k => {
            let frames = PktLineReader::new(reader);
            let demux = SidebandReader::new(frames);
            match progress {
                Some(sink) => demux.with_progress(sink).read_all_data(),
                None => {
                    let mut demux = demux;
                    demux.read_all_data()
                }
            }
        }
    }
}

/// Decode the pack and admit its objects through the store's quarantine.
///
/// Decoding runs on a worker thread feeding a bounded queue, so object N
/// is being staged while N+1 is still being inflated. REF_DELTA bases
/// missing from the pack are resolved from the store (thin packs). The
/// quarantine commits only after the last object decoded cleanly.
fn ingest_pack(
    pack_bytes: &[u8],
    store: &dyn ObjectStore,
    cancel: &CancelToken,
    algo: HashAlgorithm,
) -> Result<(usize, ObjectId), ProtocolError> {
    let parser = grit_pack::parse::PackParser::new(pack_bytes, algo)?
        .with_resolver(Box::new(|oid| store.read(oid).ok().flatten()));
    let checksum = parser.checksum();
    let declared = parser.object_count();

    let committed = std::thread::scope(|scope| -> Result<usize, ProtocolError> {
        let (tx, rx) = crossbeam::channel::bounded(DECODE_QUEUE);
        scope.spawn(move || {
            for item in parser {
                // A dropped receiver means ingestion already failed.
                if tx.send(item).is_err() {
                    break;
                }
            }
        });

        let mut ingest = store.begin_pack()?;
        for item in rx {
            cancel.check()?;
            let decoded = item?;
            ingest.add(decoded.obj_type, &decoded.data)?;
        }
        Ok(ingest.commit()?)
    })?;

    tracing::debug!(
        target: "grit::session",
        declared,
        committed,
        checksum = %checksum,
        "pack admitted"
    );
    Ok((committed, checksum))
}

fn parse_oid(hex: &[u8]) -> Result<ObjectId, ProtocolError> {
    let text = std::str::from_utf8(hex)
        .map_err(|_| ProtocolError::InvalidResponse("non-ASCII object id".into()))?;
    ObjectId::from_hex(text)
        .map_err(|e| ProtocolError::InvalidResponse(format!("bad object id: {e}")))
}

fn strip_prefix_str<'a>(line: &'a [u8], prefix: &str) -> Option<&'a [u8]> {
    line.strip_prefix(prefix.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_request_is_inert() {
        let request = FetchRequest::default();
        assert!(request.wants.is_empty());
        assert!(request.haves.is_empty());
        assert!(request.depth.is_none());
    }

    #[test]
    fn ack_line_parsing() {
        let mut bytes = Vec::new();
        {
            let mut w = PktLineWriter::new(&mut bytes);
            w.write_text("ACK 95d09f2b10159347eece71399a7e2e907ea3df4f")
                .unwrap();
            w.write_text("NAK").unwrap();
            w.write_text("ACK 95d09f2b10159347eece71399a7e2e907ea3df4f continue")
                .unwrap();
            w.write_text("BOGUS").unwrap();
        }
        let mut reader = PktLineReader::new(std::io::Cursor::new(bytes));
        assert!(matches!(read_ack_line(&mut reader).unwrap(), AckLine::Ack(_)));
        assert!(matches!(read_ack_line(&mut reader).unwrap(), AckLine::Nak));
        assert!(matches!(read_ack_line(&mut reader).unwrap(), AckLine::Ack(_)));
        assert!(read_ack_line(&mut reader).is_err());
    }

    #[test]
    fn want_block_layout() {
        let a = ObjectId::from_hex("aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa").unwrap();
        let b = ObjectId::from_hex("bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb").unwrap();
        let request = FetchRequest {
            wants: vec![a, b],
            depth: Some(1),
            ..FetchRequest::default()
        };

        let mut bytes: Vec<u8> = Vec::new();
        {
            let sink: &mut dyn Write = &mut bytes;
            let mut writer = PktLineWriter::new(sink);
            write_want_block(&mut writer, &request, b"ofs-delta agent=grit/0.1").unwrap();
        }
        let text = String::from_utf8_lossy(&bytes).into_owned();
        assert!(text.contains(&format!("want {a} ofs-delta agent=grit/0.1\n")));
        assert!(text.contains(&format!("want {b}\n")));
        assert!(text.contains("deepen 1\n"));
        assert!(text.ends_with("0000"));
    }

    #[test]
    fn shallow_section_parsing() {
        let a = "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
        let b = "bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb";
        let mut bytes = Vec::new();
        {
            let mut w = PktLineWriter::new(&mut bytes);
            w.write_text(&format!("shallow {a}")).unwrap();
            w.write_text(&format!("unshallow {b}")).unwrap();
            w.write_flush().unwrap();
        }
        let mut negotiated = Negotiated {
            common: None,
            shallow: Vec::new(),
            unshallow: Vec::new(),
        };
        let mut reader = PktLineReader::new(std::io::Cursor::new(bytes));
        read_shallow_section(&mut reader, &mut negotiated).unwrap();
        assert_eq!(negotiated.shallow.len(), 1);
        assert_eq!(negotiated.unshallow.len(), 1);
        assert_eq!(negotiated.shallow[0].to_hex(), a);
    }
}
