//! Shared test plumbing: a scripted transport and a tiny fixture history.

use std::collections::VecDeque;
use std::io::{Cursor, Read, Write};
use std::sync::{Arc, Mutex};

use bstr::BString;
use grit_hash::{HashAlgorithm, ObjectId};
use grit_object::{Blob, Commit, EntryMode, Object, Signature, Tree, TreeEntry};
use grit_odb::{MemoryObjectStore, ObjectStore};
use grit_transport::{Transport, TransportError};

/// Replays scripted responses and records everything the client writes.
///
/// Stateful mode replays one concatenated response stream; stateless mode
/// hands out one scripted response per round trip and logs each request
/// body separately.
pub struct ScriptedTransport {
    stateless: bool,
    responses: VecDeque<Vec<u8>>,
    current: Cursor<Vec<u8>>,
    outgoing: Vec<u8>,
    requests: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl ScriptedTransport {
    /// One full-duplex stream, read as the session pleases.
    pub fn stateful(response: Vec<u8>) -> Self {
        Self {
            stateless: false,
            responses: VecDeque::new(),
            current: Cursor::new(response),
            outgoing: Vec::new(),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// The first element is the discovery response (readable immediately),
    /// the rest are handed out per `finish_request`.
    pub fn stateless(mut responses: VecDeque<Vec<u8>>) -> Self {
        let first = responses.pop_front().expect("discovery response");
        Self {
            stateless: true,
            responses,
            current: Cursor::new(first),
            outgoing: Vec::new(),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Handle on the per-round-trip request bodies, usable after the
    /// transport moved into a session.
    pub fn request_log(&self) -> Arc<Mutex<Vec<Vec<u8>>>> {
        Arc::clone(&self.requests)
    }
}

impl Transport for ScriptedTransport {
    fn reader(&mut self) -> &mut dyn Read {
        &mut self.current
    }

    fn writer(&mut self) -> &mut dyn Write {
        &mut self.outgoing
    }

    fn finish_request(&mut self) -> Result<(), TransportError> {
        self.requests
            .lock()
            .expect("lock poisoned")
            .push(std::mem::take(&mut self.outgoing));
        if self.stateless {
            let next = self.responses.pop_front().unwrap_or_default();
            self.current = Cursor::new(next);
        }
        Ok(())
    }

    fn is_stateless(&self) -> bool {
        self.stateless
    }

    fn close(self: Box<Self>) -> Result<(), TransportError> {
        Ok(())
    }
}

/// Occurrences of `needle` in `haystack`.
pub fn count_occurrences(haystack: &[u8], needle: &[u8]) -> usize {
    haystack
        .windows(needle.len())
        .filter(|w| *w == needle)
        .count()
}

/// A store pre-loaded with a three-revision history; returns the store and
/// the commit ids, oldest first.
pub fn fixture_history() -> (MemoryObjectStore, Vec<ObjectId>) {
    let store = MemoryObjectStore::new();
    let mut commits = Vec::new();
    let mut parent: Option<ObjectId> = None;

    for rev in 0..3 {
        let readme = put(
            &store,
            Object::Blob(Blob::from_bytes(format!(
                "fixture readme, revision {rev}: stable paragraph for delta reuse"
            ))),
        );
        let code = put(
            &store,
            Object::Blob(Blob::from_bytes(format!("print('rev {rev}')\n"))),
        );
        let tree = put(
            &store,
            Object::Tree(Tree {
                entries: vec![file("README", readme), file("run.py", code)],
            }),
        );
        let commit = put(
            &store,
            Object::Commit(Commit {
                tree,
                parents: parent.into_iter().collect(),
                author: signature(),
                committer: signature(),
                encoding: None,
                gpgsig: None,
                extra_headers: Vec::new(),
                message: BString::from(format!("revision {rev}\n")),
            }),
        );
        parent = Some(commit);
        commits.push(commit);
    }
    (store, commits)
}

/// Number of objects reachable from `tip` but not from `haves`.
pub fn closure_size(store: &MemoryObjectStore, tip: ObjectId, haves: &[ObjectId]) -> usize {
    grit_pack::encode::plan_pack(&grit_odb::StoreSource(store), &[tip], haves)
        .unwrap()
        .len()
}

/// Encode a pack for `wants` minus `haves` out of `store`.
pub fn build_pack(store: &MemoryObjectStore, wants: &[ObjectId], haves: &[ObjectId]) -> Vec<u8> {
    let mut bytes = Vec::new();
    grit_pack::encode::pack_objects(
        &grit_odb::StoreSource(store),
        wants,
        haves,
        &mut bytes,
        HashAlgorithm::Sha1,
        true,
    )
    .unwrap();
    bytes
}

fn put(store: &MemoryObjectStore, obj: Object) -> ObjectId {
    store
        .write(obj.object_type(), &obj.to_content())
        .expect("fixture write")
}

fn file(name: &str, oid: ObjectId) -> TreeEntry {
    TreeEntry {
        mode: EntryMode::File,
        name: BString::from(name),
        oid,
    }
}

fn signature() -> Signature {
    Signature {
        name: BString::from("Fix Ture"),
        email: BString::from("fix@example.com"),
        seconds: 1_700_000_000,
        tz_minutes: 0,
    }
}
