//! The single-use session facade.
//!
//! One [`Session`] covers exactly one protocol exchange:
//!
//! ```text
//! Idle → Advertised → (fetch | push | list_refs)* → Done → Closed
//!      └───────────────────── error ─────────────────────→ Closed
//! ```
//!
//! The channel is released on every exit path: success, error, and
//! cancellation all funnel through [`close`](Session::close) or the drop
//! of the boxed transport.

use grit_hash::HashAlgorithm;
use grit_odb::ObjectStore;
use grit_ref::{Reference, RefName};
use grit_transport::{
    Auth, CancelToken, GitUrl, Service, Transport, TransportRegistry,
};

use crate::advert::{self, Advertisement};
use crate::fetch::{run_fetch, FetchOutcome, FetchRequest};
use crate::push::{run_push, PushReport, PushRequest};
use crate::ProtocolError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    Advertised,
    Done,
    Closed,
}

impl State {
    fn name(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Advertised => "advertised",
            Self::Done => "done",
            Self::Closed => "closed",
        }
    }
}

/// How the session reaches its peer: an already-open channel, or a
/// registry plus endpoint to connect through at handshake time.
enum Channel {
    Pending {
        registry: TransportRegistry,
        url: GitUrl,
        auth: Auth,
    },
    Open(Box<dyn Transport>),
    Gone,
}

/// One protocol exchange with one remote.
pub struct Session {
    channel: Channel,
    state: State,
    service: Option<Service>,
    advert: Option<Advertisement>,
    algo: HashAlgorithm,
    cancel: CancelToken,
}

impl Session {
    /// A session that will connect through `registry` when
    /// [`handshake`](Self::handshake) names the service.
    pub fn new(registry: TransportRegistry, url: GitUrl, auth: Auth) -> Self {
        Self {
            channel: Channel::Pending {
                registry,
                url,
                auth,
            },
            state: State::Idle,
            service: None,
            advert: None,
            algo: HashAlgorithm::Sha1,
            cancel: CancelToken::new(),
        }
    }

    /// A session over an already-connected channel (tests, custom
    /// transports).
    pub fn over(transport: Box<dyn Transport>) -> Self {
        Self {
            channel: Channel::Open(transport),
            state: State::Idle,
            service: None,
            advert: None,
            algo: HashAlgorithm::Sha1,
            cancel: CancelToken::new(),
        }
    }

    pub fn with_algorithm(mut self, algo: HashAlgorithm) -> Self {
        self.algo = algo;
        self
    }

    /// A handle that cancels this session from another thread.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    fn expect_state(&self, needed: State) -> Result<(), ProtocolError> {
        if self.state == needed {
            Ok(())
        } else {
            Err(ProtocolError::InvalidState {
                needed: needed.name(),
                actual: self.state.name(),
            })
        }
    }

    fn transport(&mut self) -> &mut dyn Transport {
        match &mut self.channel {
            Channel::Open(t) => t.as_mut(),
            _ => unreachable!("state machine guarantees an open channel"),
        }
    }

    fn fail(&mut self) {
        // Dropping the box severs the channel on the error path.
        self.channel = Channel::Gone;
        self.state = State::Closed;
    }

    /// Connect (if not already), read and cache the advertisement.
    ///
    /// Calling this twice is [`ProtocolError::AlreadyConnected`]; a
    /// session is good for one exchange.
    pub fn handshake(&mut self, service: Service) -> Result<&Advertisement, ProtocolError> {
        if self.state != State::Idle {
            return Err(ProtocolError::AlreadyConnected);
        }
        self.cancel.check()?;

        if let Channel::Pending {
            registry,
            url,
            auth,
        } = &self.channel
        {
            let transport = registry.connect(url, service, auth)?;
            self.channel = Channel::Open(transport);
        }

        let result = (|| {
            let stateless = self.transport().is_stateless();
            let mut reader = crate::pktline::PktLineReader::new(self.transport().reader());
            if stateless {
                advert::consume_service_announcement(&mut reader, service)?;
            }
            Advertisement::parse(&mut reader)
        })();

        match result {
            Ok(advertisement) => {
                tracing::debug!(
                    target: "grit::session",
                    service = service.name(),
                    refs = advertisement.refs.len(),
                    "handshake complete"
                );
                self.advert = Some(advertisement);
                self.service = Some(service);
                self.state = State::Advertised;
                Ok(self.advert.as_ref().expect("just set"))
            }
            Err(e) => {
                self.fail();
                Err(e)
            }
        }
    }

    /// The cached advertisement.
    pub fn advertisement(&self) -> Option<&Advertisement> {
        self.advert.as_ref()
    }

    /// The advertised references as [`Reference`] values.
    ///
    /// An empty upload-pack advertisement means the remote repository has
    /// no commits yet, surfaced as [`ProtocolError::EmptyRemoteRepository`]
    /// (the same emptiness is a normal state for receive-pack).
    pub fn list_refs(&self) -> Result<Vec<Reference>, ProtocolError> {
        self.expect_state(State::Advertised)?;
        let advert = self.advert.as_ref().expect("advertised state");
        if advert.is_empty() && self.service == Some(Service::UploadPack) {
            return Err(ProtocolError::EmptyRemoteRepository);
        }

        let mut refs = Vec::new();
        for advertised in &advert.refs {
            let name = RefName::new(advertised.name.clone())?;
            refs.push(Reference::Direct {
                name,
                target: advertised.oid,
            });
        }
        Ok(refs)
    }

    /// Run the fetch exchange and admit the received objects to `store`.
    pub fn fetch(
        &mut self,
        request: FetchRequest,
        store: &dyn ObjectStore,
    ) -> Result<FetchOutcome, ProtocolError> {
        self.expect_state(State::Advertised)?;
        if self.service != Some(Service::UploadPack) {
            return Err(ProtocolError::InvalidState {
                needed: "upload-pack service",
                actual: "receive-pack service",
            });
        }

        let advert = self.advert.take().expect("advertised state");
        let algo = self.algo;
        let cancel = self.cancel.clone();
        let result = run_fetch(self.transport(), &advert, request, store, &cancel, algo);
        self.advert = Some(advert);

        match result {
            Ok(outcome) => {
                self.state = State::Done;
                Ok(outcome)
            }
            Err(e) => {
                self.fail();
                Err(e)
            }
        }
    }

    /// Run the push exchange, reading outgoing objects from `store`.
    pub fn push(
        &mut self,
        request: PushRequest,
        store: &dyn ObjectStore,
    ) -> Result<PushReport, ProtocolError> {
        self.expect_state(State::Advertised)?;
        if self.service != Some(Service::ReceivePack) {
            return Err(ProtocolError::InvalidState {
                needed: "receive-pack service",
                actual: "upload-pack service",
            });
        }

        let advert = self.advert.take().expect("advertised state");
        let algo = self.algo;
        let cancel = self.cancel.clone();
        let result = run_push(self.transport(), &advert, request, store, &cancel, algo);
        self.advert = Some(advert);

        match result {
            Ok(report) => {
                self.state = State::Done;
                Ok(report)
            }
            Err(e) => {
                self.fail();
                Err(e)
            }
        }
    }

    /// Release the channel. Idempotent; runs implicitly on drop.
    pub fn close(&mut self) -> Result<(), ProtocolError> {
        let channel = std::mem::replace(&mut self.channel, Channel::Gone);
        self.state = State::Closed;
        if let Channel::Open(transport) = channel {
            transport.close()?;
        }
        Ok(())
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
