//! The capability vocabulary.
//!
//! Capabilities ride in the NUL section of the first advertisement line
//! (or the client's first want/command line) as space-separated `key` or
//! `key=value` tokens. The vocabulary is closed: receiving an unknown key
//! drops it silently, attempting to send one is an error. `symref` and
//! `agent` may appear more than once.

use bstr::{BStr, BString, ByteSlice};

use crate::{ProtocolError, AGENT};

/// Every key this implementation recognizes on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CapabilityKey {
    MultiAck,
    MultiAckDetailed,
    NoProgress,
    SideBand,
    SideBand64k,
    OfsDelta,
    Shallow,
    Deepen,
    ReportStatus,
    DeleteRefs,
    Atomic,
    Symref,
    Agent,
    ObjectFormat,
}

impl CapabilityKey {
    pub fn wire_name(self) -> &'static str {
        match self {
            Self::MultiAck => "multi_ack",
            Self::MultiAckDetailed => "multi_ack_detailed",
            Self::NoProgress => "no-progress",
            Self::SideBand => "side-band",
            Self::SideBand64k => "side-band-64k",
            Self::OfsDelta => "ofs-delta",
            Self::Shallow => "shallow",
            Self::Deepen => "deepen",
            Self::ReportStatus => "report-status",
            Self::DeleteRefs => "delete-refs",
            Self::Atomic => "atomic",
            Self::Symref => "symref",
            Self::Agent => "agent",
            Self::ObjectFormat => "object-format",
        }
    }

    pub fn from_wire(name: &[u8]) -> Option<Self> {
        Some(match name {
            b"multi_ack" => Self::MultiAck,
            b"multi_ack_detailed" => Self::MultiAckDetailed,
            b"no-progress" => Self::NoProgress,
            b"side-band" => Self::SideBand,
            b"side-band-64k" => Self::SideBand64k,
            b"ofs-delta" => Self::OfsDelta,
            b"shallow" => Self::Shallow,
            b"deepen" => Self::Deepen,
            b"report-status" => Self::ReportStatus,
            b"delete-refs" => Self::DeleteRefs,
            b"atomic" => Self::Atomic,
            b"symref" => Self::Symref,
            b"agent" => Self::Agent,
            b"object-format" => Self::ObjectFormat,
            _ => return None,
        })
    }

    /// Whether this implementation can act on the key. The multi-ack
    /// negotiation styles are recognized but filtered: the core speaks
    /// single-ack only.
    pub fn supported(self) -> bool {
        !matches!(self, Self::MultiAck | Self::MultiAckDetailed)
    }
}

/// An ordered list of `(key, optional value)` pairs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapabilitySet {
    entries: Vec<(CapabilityKey, Option<BString>)>,
}

impl CapabilitySet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse the NUL section of an advertisement or first client line.
    /// Unknown keys are dropped (and traced), never propagated.
    pub fn parse(raw: &BStr) -> Self {
        let mut set = Self::new();
        for token in raw.split(|&b| b == b' ').filter(|t| !t.is_empty()) {
            let (name, value) = match token.find_byte(b'=') {
                Some(eq) => (&token[..eq], Some(BString::from(&token[eq + 1..]))),
                None => (&token[..], None),
            };
            match CapabilityKey::from_wire(name) {
                Some(key) => set.entries.push((key, value)),
                None => {
                    tracing::debug!(
                        target: "grit::session",
                        key = %name.as_bstr(),
                        "dropping unrecognized capability"
                    );
                }
            }
        }
        set
    }

    pub fn add(&mut self, key: CapabilityKey) -> &mut Self {
        self.entries.push((key, None));
        self
    }

    pub fn add_value(&mut self, key: CapabilityKey, value: impl Into<BString>) -> &mut Self {
        self.entries.push((key, Some(value.into())));
        self
    }

    pub fn has(&self, key: CapabilityKey) -> bool {
        self.entries.iter().any(|(k, _)| *k == key)
    }

    /// First value for a key.
    pub fn value(&self, key: CapabilityKey) -> Option<&BStr> {
        self.entries
            .iter()
            .find(|(k, _)| *k == key)
            .and_then(|(_, v)| v.as_deref().map(|b| b.as_bstr()))
    }

    /// Every value for a key that may repeat (`symref`, `agent`).
    pub fn values(&self, key: CapabilityKey) -> impl Iterator<Item = &BStr> {
        self.entries
            .iter()
            .filter(move |(k, _)| *k == key)
            .filter_map(|(_, v)| v.as_deref().map(|b| b.as_bstr()))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The subset this implementation can act on: always a subset of the
    /// peer's set intersected with the supported vocabulary.
    pub fn filter_unsupported(&self) -> Self {
        Self {
            entries: self
                .entries
                .iter()
                .filter(|(k, _)| k.supported())
                .cloned()
                .collect(),
        }
    }

    /// Render as the space-separated wire form.
    pub fn render(&self) -> BString {
        let mut out: Vec<u8> = Vec::new();
        for (i, (key, value)) in self.entries.iter().enumerate() {
            if i > 0 {
                out.push(b' ');
            }
            out.extend_from_slice(key.wire_name().as_bytes());
            if let Some(v) = value {
                out.push(b'=');
                out.extend_from_slice(v);
            }
        }
        BString::from(out)
    }

    /// The `object-format` in effect: an explicit value, or sha1 when the
    /// peer stays silent.
    pub fn object_format_name(&self) -> &BStr {
        self.value(CapabilityKey::ObjectFormat)
            .unwrap_or_else(|| BStr::new("sha1"))
    }
}

/// Sideband flavor negotiated for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SidebandMode {
    None,
    /// `side-band`: 1000-byte frames.
    Band,
    /// `side-band-64k`: full-size frames.
    Band64k,
}

impl SidebandMode {
    /// Data bytes per frame, after the band byte.
    pub fn data_limit(self) -> usize {
        match self {
            // Callers must not ask for a limit without sideband.
            Self::None => crate::pktline::MAX_DATA_LEN,
            Self::Band => 995,
            Self::Band64k => crate::pktline::MAX_DATA_LEN - 1,
        }
    }
}

/// Prefer 64k frames, fall back, or go without.
pub fn select_sideband(peer: &CapabilitySet) -> SidebandMode {
    if peer.has(CapabilityKey::SideBand64k) {
        SidebandMode::Band64k
    } else if peer.has(CapabilityKey::SideBand) {
        SidebandMode::Band
    } else {
        SidebandMode::None
    }
}

/// Client capability choice for a fetch, given the server's advertisement.
pub fn negotiate_fetch(server: &CapabilitySet, want_progress: bool) -> CapabilitySet {
    let mut ours = CapabilitySet::new();
    if server.has(CapabilityKey::SideBand64k) {
        ours.add(CapabilityKey::SideBand64k);
    } else if server.has(CapabilityKey::SideBand) {
        ours.add(CapabilityKey::SideBand);
    }
    if server.has(CapabilityKey::OfsDelta) {
        ours.add(CapabilityKey::OfsDelta);
    }
    if !want_progress {
        ours.add(CapabilityKey::NoProgress);
    }
    // multi_ack / multi_ack_detailed deliberately not requested: the
    // negotiation below is single-ack.
    ours.add_value(CapabilityKey::Agent, AGENT);
    ours
}

/// Client capability choice for a push.
///
/// `atomic` cannot be ignored safely: asking for it against a server that
/// does not offer it is fatal rather than silently non-atomic.
pub fn negotiate_push(
    server: &CapabilitySet,
    atomic: bool,
) -> Result<CapabilitySet, ProtocolError> {
    let mut ours = CapabilitySet::new();
    if server.has(CapabilityKey::ReportStatus) {
        ours.add(CapabilityKey::ReportStatus);
    }
    if server.has(CapabilityKey::SideBand64k) {
        ours.add(CapabilityKey::SideBand64k);
    }
    if server.has(CapabilityKey::OfsDelta) {
        ours.add(CapabilityKey::OfsDelta);
    }
    if atomic {
        if !server.has(CapabilityKey::Atomic) {
            return Err(ProtocolError::CapabilityNotNegotiated("atomic"));
        }
        ours.add(CapabilityKey::Atomic);
    }
    ours.add_value(CapabilityKey::Agent, AGENT);
    Ok(ours)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(s: &str) -> CapabilitySet {
        CapabilitySet::parse(BStr::new(s))
    }

    #[test]
    fn parse_flags_and_values() {
        let caps = parse(
            "multi_ack side-band-64k ofs-delta symref=HEAD:refs/heads/main agent=git/2.39.0",
        );
        assert!(caps.has(CapabilityKey::MultiAck));
        assert!(caps.has(CapabilityKey::SideBand64k));
        assert!(caps.has(CapabilityKey::OfsDelta));
        assert_eq!(
            caps.value(CapabilityKey::Symref).unwrap(),
            "HEAD:refs/heads/main"
        );
        assert_eq!(caps.value(CapabilityKey::Agent).unwrap(), "git/2.39.0");
    }

    #[test]
    fn unknown_keys_dropped_silently() {
        let caps = parse("ofs-delta allow-tip-sha1-in-want quux=1");
        assert!(caps.has(CapabilityKey::OfsDelta));
        assert_eq!(caps.entries.len(), 1);
    }

    #[test]
    fn repeated_symref_values() {
        let caps = parse("symref=HEAD:refs/heads/main symref=refs/x:refs/y");
        let all: Vec<_> = caps.values(CapabilityKey::Symref).collect();
        assert_eq!(all.len(), 2);
    }

    #[test]
    fn filter_is_subset_of_supported() {
        let caps = parse("multi_ack multi_ack_detailed side-band ofs-delta");
        let filtered = caps.filter_unsupported();
        assert!(!filtered.has(CapabilityKey::MultiAck));
        assert!(!filtered.has(CapabilityKey::MultiAckDetailed));
        assert!(filtered.has(CapabilityKey::SideBand));
        assert!(filtered.has(CapabilityKey::OfsDelta));
    }

    #[test]
    fn render_roundtrip() {
        let mut caps = CapabilitySet::new();
        caps.add(CapabilityKey::SideBand64k)
            .add(CapabilityKey::OfsDelta)
            .add_value(CapabilityKey::Agent, "grit/0.1");
        let rendered = caps.render();
        assert_eq!(rendered, "side-band-64k ofs-delta agent=grit/0.1");
        assert_eq!(CapabilitySet::parse(rendered.as_bstr()), caps);
    }

    #[test]
    fn sideband_selection_prefers_64k() {
        assert_eq!(
            select_sideband(&parse("side-band side-band-64k")),
            SidebandMode::Band64k
        );
        assert_eq!(select_sideband(&parse("side-band")), SidebandMode::Band);
        assert_eq!(select_sideband(&parse("ofs-delta")), SidebandMode::None);
    }

    #[test]
    fn fetch_negotiation_skips_multi_ack() {
        let server = parse("multi_ack_detailed side-band-64k ofs-delta shallow");
        let ours = negotiate_fetch(&server, true);
        assert!(ours.has(CapabilityKey::SideBand64k));
        assert!(ours.has(CapabilityKey::OfsDelta));
        assert!(!ours.has(CapabilityKey::MultiAck));
        assert!(!ours.has(CapabilityKey::MultiAckDetailed));
        assert!(ours.value(CapabilityKey::Agent).is_some());
    }

    #[test]
    fn no_progress_requested_when_progress_off() {
        let server = parse("side-band-64k");
        assert!(negotiate_fetch(&server, false).has(CapabilityKey::NoProgress));
        assert!(!negotiate_fetch(&server, true).has(CapabilityKey::NoProgress));
    }

    #[test]
    fn atomic_without_server_support_is_fatal() {
        let server = parse("report-status");
        assert!(matches!(
            negotiate_push(&server, true).unwrap_err(),
            ProtocolError::CapabilityNotNegotiated("atomic")
        ));
        let ours = negotiate_push(&server, false).unwrap();
        assert!(ours.has(CapabilityKey::ReportStatus));
    }

    #[test]
    fn object_format_defaults_to_sha1() {
        assert_eq!(parse("ofs-delta").object_format_name(), "sha1");
        assert_eq!(parse("object-format=sha256").object_format_name(), "sha256");
    }
}
