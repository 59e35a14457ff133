// Copyright (c) 2024 xmpp-rs contributors
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use core::time::Duration;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncReadExt, AsyncWriteExt, BufStream, DuplexStream};
use tokio::sync::watch;

use super::*;
use crate::connect::BoxedIo;
use crate::error::{AuthError, ProtocolError};
use crate::observer::DefaultIqHandler;
use crate::parsers::{message::Message, sasl::SaslCondition};
use crate::xmlstream::Direction;

const HEADER: &str = "<?xml version='1.0'?><stream:stream xmlns='jabber:client' xmlns:stream='http://etherx.jabber.org/streams' id='s1' from='example.com' version='1.0'>";
const FEATURES_TLS: &str = "<stream:features><starttls xmlns='urn:ietf:params:xml:ns:xmpp-tls'/><mechanisms xmlns='urn:ietf:params:xml:ns:xmpp-sasl'><mechanism>PLAIN</mechanism></mechanisms></stream:features>";
const FEATURES_SASL: &str = "<stream:features><mechanisms xmlns='urn:ietf:params:xml:ns:xmpp-sasl'><mechanism>PLAIN</mechanism></mechanisms></stream:features>";
const FEATURES_BIND: &str = "<stream:features><bind xmlns='urn:ietf:params:xml:ns:xmpp-bind'/><session xmlns='urn:ietf:params:xml:ns:xmpp-session'/></stream:features>";
const PROCEED: &str = "<proceed xmlns='urn:ietf:params:xml:ns:xmpp-tls'/>";
const SUCCESS: &str = "<success xmlns='urn:ietf:params:xml:ns:xmpp-sasl'/>";
const BIND_RESULT: &str = "<iq type='result' id='resource-bind'><bind xmlns='urn:ietf:params:xml:ns:xmpp-bind'><jid>juliet@example.com/balcony</jid></bind></iq>";
const SESSION_RESULT: &str = "<iq type='result' id='session-establishment'/>";
/// base64 of `\0juliet\0r0m30`
const PLAIN_INITIAL: &str = "AGp1bGlldAByMG0zMA==";

/// Hands out one end of an in-memory pipe; "TLS" leaves the bytes as they
/// are.
#[derive(Debug, Clone)]
struct DuplexConnector {
    io: Arc<Mutex<Option<DuplexStream>>>,
    tls_upgrades: Arc<AtomicUsize>,
}

impl DuplexConnector {
    fn new() -> (Self, Peer) {
        let (client, server) = tokio::io::duplex(65536);
        let connector = DuplexConnector {
            io: Arc::new(Mutex::new(Some(client))),
            tls_upgrades: Arc::new(AtomicUsize::new(0)),
        };
        let peer = Peer {
            io: server,
            buf: String::new(),
        };
        (connector, peer)
    }

    fn tls_upgrades(&self) -> usize {
        self.tls_upgrades.load(Ordering::SeqCst)
    }
}

impl ServerConnector for DuplexConnector {
    async fn connect(&self, _jid: &Jid) -> Result<BoxedIo, Error> {
        let io = self.io.lock().unwrap().take().ok_or(Error::Disconnected)?;
        Ok(Box::new(BufStream::new(io)))
    }

    async fn starttls(&self, io: BoxedIo, domain: &str) -> Result<BoxedIo, Error> {
        assert_eq!(domain, "example.com");
        self.tls_upgrades.fetch_add(1, Ordering::SeqCst);
        Ok(io)
    }
}

/// The scripted server side of a [`DuplexConnector`].
struct Peer {
    io: DuplexStream,
    buf: String,
}

impl Peer {
    /// Read until `needle` was received, and forget everything up to it.
    async fn expect(&mut self, needle: &str) {
        let mut chunk = [0u8; 4096];
        loop {
            if let Some(pos) = self.buf.find(needle) {
                self.buf.replace_range(..pos + needle.len(), "");
                return;
            }
            let n = self.io.read(&mut chunk).await.expect("peer read");
            assert!(n > 0, "eof while waiting for {:?}, got {:?}", needle, self.buf);
            self.buf.push_str(&String::from_utf8_lossy(&chunk[..n]));
        }
    }

    /// Everything the client writes until it hangs up.
    async fn rest(&mut self) -> String {
        let mut rest = Vec::new();
        self.io.read_to_end(&mut rest).await.expect("peer read");
        let mut buf = core::mem::take(&mut self.buf);
        buf.push_str(&String::from_utf8_lossy(&rest));
        buf
    }

    async fn send(&mut self, data: &str) {
        self.io.write_all(data.as_bytes()).await.expect("peer write");
    }

    async fn expect_header(&mut self) {
        self.expect("<stream:stream").await;
        self.expect(">").await;
    }

    async fn open(&mut self, features: &str) {
        self.expect_header().await;
        self.send(HEADER).await;
        self.send(features).await;
    }

    async fn authenticate(&mut self) {
        self.expect(PLAIN_INITIAL).await;
        self.expect("</auth>").await;
        self.send(SUCCESS).await;
    }

    async fn bind_and_session(&mut self) {
        self.open(FEATURES_BIND).await;
        self.expect("resource-bind").await;
        self.expect("<resource>balcony</resource>").await;
        self.expect("</iq>").await;
        self.send(BIND_RESULT).await;
        self.expect("session-establishment").await;
        self.expect("</iq>").await;
        self.send(SESSION_RESULT).await;
    }

    async fn negotiate_with_tls(&mut self) {
        self.open(FEATURES_TLS).await;
        self.expect("<starttls").await;
        self.send(PROCEED).await;
        self.open(FEATURES_SASL).await;
        self.authenticate().await;
        self.bind_and_session().await;
    }
}

/// Where the server hangs up during negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Cut {
    AfterFirstFeatures,
    AfterProceed,
    AfterSuccess,
    AwaitingBindResult,
    AwaitingSessionResult,
}

impl Peer {
    /// Play the server until `cut`, consume the client's last write and
    /// close the server's sending half.
    async fn negotiate_until(&mut self, cut: Cut) {
        self.open(FEATURES_TLS).await;
        self.expect("<starttls").await;
        self.expect("/>").await;
        if cut != Cut::AfterFirstFeatures {
            self.send(PROCEED).await;
            self.expect_header().await;
        }
        if cut > Cut::AfterProceed {
            self.send(HEADER).await;
            self.send(FEATURES_SASL).await;
            self.authenticate().await;
            self.expect_header().await;
        }
        if cut > Cut::AfterSuccess {
            self.send(HEADER).await;
            self.send(FEATURES_BIND).await;
            self.expect("resource-bind").await;
            self.expect("</iq>").await;
        }
        if cut > Cut::AwaitingBindResult {
            self.send(BIND_RESULT).await;
            self.expect("session-establishment").await;
            self.expect("</iq>").await;
        }
        self.io.shutdown().await.unwrap();
    }
}

fn config() -> ClientConfig {
    ClientConfig::new(
        Jid::new("juliet@example.com/balcony").unwrap(),
        String::from("r0m30"),
    )
}

fn record_failures(builder: &mut ClientBuilder<DuplexConnector>) -> Arc<Mutex<Vec<String>>> {
    let failures = Arc::new(Mutex::new(Vec::new()));
    let sink = failures.clone();
    builder
        .observers()
        .on_connection_failed(move |e| sink.lock().unwrap().push(e.to_string()));
    failures
}

#[tokio::test]
async fn test_negotiation_opens_three_streams() {
    let _ = env_logger::builder().is_test(true).try_init();
    let (connector, mut peer) = DuplexConnector::new();
    let config = config();
    let sasl = CredentialsNegotiator::new("juliet", "r0m30");
    let (state_tx, state) = watch::channel(NegotiationState::Disconnected);
    let negotiator = Negotiator::new(&config, &connector, &sasl, &state_tx, None);

    let (negotiated, ()) = tokio::join!(negotiator.run(), peer.negotiate_with_tls());
    let negotiated = negotiated.unwrap();
    assert_eq!(negotiated.transport.generation(), 3);
    assert_eq!(negotiated.jid, Jid::new("juliet@example.com/balcony").unwrap());
    assert_eq!(connector.tls_upgrades(), 1);
    assert_eq!(*state.borrow(), NegotiationState::SessionEstablishing);
}

#[tokio::test]
async fn test_declined_starttls_continues_in_plaintext() {
    let (connector, mut peer) = DuplexConnector::new();
    let config = config();
    let sasl = CredentialsNegotiator::new("juliet", "r0m30");
    let (state_tx, _state) = watch::channel(NegotiationState::Disconnected);
    let negotiator = Negotiator::new(&config, &connector, &sasl, &state_tx, None);

    let script = async {
        peer.open(FEATURES_TLS).await;
        peer.expect("<starttls").await;
        peer.send("<failure xmlns='urn:ietf:params:xml:ns:xmpp-tls'/>")
            .await;
        peer.authenticate().await;
        peer.bind_and_session().await;
    };
    let (negotiated, ()) = tokio::join!(negotiator.run(), script);
    let negotiated = negotiated.unwrap();
    assert_eq!(negotiated.transport.generation(), 2);
    assert_eq!(connector.tls_upgrades(), 0);
}

#[tokio::test]
async fn test_disabled_starttls_is_not_requested() {
    let (connector, mut peer) = DuplexConnector::new();
    let mut config = config();
    config.starttls = StartTlsPolicy::Disabled;
    let sasl = CredentialsNegotiator::new("juliet", "r0m30");
    let (state_tx, _state) = watch::channel(NegotiationState::Disconnected);
    let negotiator = Negotiator::new(&config, &connector, &sasl, &state_tx, None);

    let script = async {
        peer.open(FEATURES_TLS).await;
        peer.authenticate().await;
        peer.bind_and_session().await;
    };
    let (negotiated, ()) = tokio::join!(negotiator.run(), script);
    assert_eq!(negotiated.unwrap().transport.generation(), 2);
    assert!(!peer.buf.contains("starttls"));
}

#[tokio::test]
async fn test_required_starttls_not_offered() {
    let (connector, mut peer) = DuplexConnector::new();
    let mut config = config();
    config.starttls = StartTlsPolicy::Required;
    let sasl = CredentialsNegotiator::new("juliet", "r0m30");
    let (state_tx, _state) = watch::channel(NegotiationState::Disconnected);
    let negotiator = Negotiator::new(&config, &connector, &sasl, &state_tx, None);

    let (result, ()) = tokio::join!(negotiator.run(), peer.open(FEATURES_SASL));
    assert!(matches!(
        result,
        Err(Error::Protocol(ProtocolError::NoTls))
    ));
    assert!(!peer.rest().await.contains("<auth"));
}

#[tokio::test]
async fn test_sasl_challenge_round() {
    let (connector, mut peer) = DuplexConnector::new();
    let config = config();
    let sasl = CredentialsNegotiator::new("juliet", "r0m30");
    let (state_tx, _state) = watch::channel(NegotiationState::Disconnected);
    let negotiator = Negotiator::new(&config, &connector, &sasl, &state_tx, None);

    let script = async {
        peer.open(FEATURES_SASL).await;
        peer.expect("</auth>").await;
        peer.send("<challenge xmlns='urn:ietf:params:xml:ns:xmpp-sasl'>=</challenge>")
            .await;
        peer.expect("<response").await;
        peer.expect("</response>").await;
        peer.send(SUCCESS).await;
        peer.bind_and_session().await;
    };
    let (negotiated, ()) = tokio::join!(negotiator.run(), script);
    assert!(negotiated.is_ok());
}

#[tokio::test]
async fn test_sasl_failure() {
    let (connector, mut peer) = DuplexConnector::new();
    let config = config();
    let sasl = CredentialsNegotiator::new("juliet", "r0m30");
    let (state_tx, _state) = watch::channel(NegotiationState::Disconnected);
    let negotiator = Negotiator::new(&config, &connector, &sasl, &state_tx, None);

    let script = async {
        peer.open(FEATURES_SASL).await;
        peer.expect("</auth>").await;
        peer.send("<failure xmlns='urn:ietf:params:xml:ns:xmpp-sasl'><not-authorized/></failure>")
            .await;
    };
    let (result, ()) = tokio::join!(negotiator.run(), script);
    assert!(matches!(
        result,
        Err(Error::Auth(AuthError::Fail(SaslCondition::NotAuthorized)))
    ));
}

#[tokio::test]
async fn test_no_common_mechanism() {
    let (connector, mut peer) = DuplexConnector::new();
    let config = config();
    let sasl = CredentialsNegotiator::new("juliet", "r0m30");
    let (state_tx, _state) = watch::channel(NegotiationState::Disconnected);
    let negotiator = Negotiator::new(&config, &connector, &sasl, &state_tx, None);

    let features = "<stream:features><mechanisms xmlns='urn:ietf:params:xml:ns:xmpp-sasl'><mechanism>EXTERNAL</mechanism></mechanisms></stream:features>";
    let (result, ()) = tokio::join!(negotiator.run(), peer.open(features));
    assert!(matches!(result, Err(Error::Auth(AuthError::NoMechanism))));
}

#[tokio::test]
async fn test_features_expected() {
    let (connector, mut peer) = DuplexConnector::new();
    let config = config();
    let sasl = CredentialsNegotiator::new("juliet", "r0m30");
    let (state_tx, _state) = watch::channel(NegotiationState::Disconnected);
    let negotiator = Negotiator::new(&config, &connector, &sasl, &state_tx, None);

    let script = peer.open("<message from='example.com'><body>early</body></message>");
    let (result, ()) = tokio::join!(negotiator.run(), script);
    assert!(matches!(result, Err(Error::FeaturesNotReceived)));
}

#[tokio::test]
async fn test_stream_error_aborts_negotiation() {
    for (error, expected) in [
        (
            "<stream:error><host-unknown xmlns='urn:ietf:params:xml:ns:xmpp-streams'/></stream:error>",
            "host-unknown",
        ),
        ("<stream:error/>", "undefined-condition"),
        (
            "<stream:error><out-of-coffee xmlns='urn:ietf:params:xml:ns:xmpp-streams'/></stream:error>",
            "undefined-condition",
        ),
        (
            "<stream:error><text xmlns='urn:ietf:params:xml:ns:xmpp-streams'>bye</text></stream:error>",
            "undefined-condition (\"bye\")",
        ),
    ] {
        let (connector, mut peer) = DuplexConnector::new();
        let config = config();
        let sasl = CredentialsNegotiator::new("juliet", "r0m30");
        let (state_tx, _state) = watch::channel(NegotiationState::Disconnected);
        let negotiator = Negotiator::new(&config, &connector, &sasl, &state_tx, None);

        let (result, ()) = tokio::join!(negotiator.run(), peer.open(error));
        match result {
            Err(Error::StreamNegotiationAborted(error)) => {
                assert_eq!(error.to_string(), expected);
            }
            other => panic!("{}: unexpected result: {:?}", error, other.map(|n| n.jid)),
        }
    }
}

#[tokio::test]
async fn test_negotiation_timeout() {
    let (connector, mut peer) = DuplexConnector::new();
    let mut config = config();
    config.negotiation_timeout = Some(Duration::from_millis(50));
    let sasl = CredentialsNegotiator::new("juliet", "r0m30");
    let (state_tx, _state) = watch::channel(NegotiationState::Disconnected);
    let negotiator = Negotiator::new(&config, &connector, &sasl, &state_tx, None);

    let (result, ()) = tokio::join!(negotiator.run(), peer.expect_header());
    match result {
        Err(Error::TransportClosed(e)) => assert_eq!(e.kind(), io::ErrorKind::TimedOut),
        other => panic!("unexpected result: {:?}", other.map(|n| n.jid)),
    }
}

#[tokio::test]
async fn test_client_session() {
    let _ = env_logger::builder().is_test(true).try_init();
    let (connector, mut peer) = DuplexConnector::new();
    let mut builder = ClientBuilder::new_with_connector(config(), connector).initial_presence(true);
    let failures = record_failures(&mut builder);

    let signed_in = Arc::new(Mutex::new(None));
    let sink = signed_in.clone();
    builder
        .observers()
        .on_signed_in(move |jid| *sink.lock().unwrap() = Some(jid.clone()));

    let presences = Arc::new(AtomicUsize::new(0));
    let counter = presences.clone();
    builder.observers().on_presence(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    let elements = Arc::new(Mutex::new((0usize, 0usize)));
    let sink = elements.clone();
    builder.observers().on_element(move |direction, _| {
        let mut counts = sink.lock().unwrap();
        match direction {
            Direction::Inbound => counts.0 += 1,
            Direction::Outbound => counts.1 += 1,
        }
    });

    let sender = builder.sender();
    builder.observers().on_message(move |message| {
        if message.body.as_deref() == Some("ping") {
            if let Some(from) = message.from.clone() {
                sender
                    .send_stanza(Message::chat(from).with_body("pong"))
                    .unwrap();
            }
        }
    });
    builder.observers().iq_handler(DefaultIqHandler);

    // Queued before the session exists, written once it does.
    builder
        .sender()
        .send_stanza(Message::chat(Jid::new("romeo@example.net").unwrap()).with_body("early"))
        .unwrap();

    let client = builder.spawn();
    let (state, ()) = tokio::join!(client.wait_until_settled(), async {
        peer.negotiate_with_tls().await;
        peer.expect("<presence").await;
    });
    assert_eq!(state, NegotiationState::Established);
    let bound = Jid::new("juliet@example.com/balcony").unwrap();
    assert_eq!(client.bound_jid(), Some(bound.clone()));
    assert_eq!(*signed_in.lock().unwrap(), Some(bound));

    peer.expect("early").await;

    peer.send("<message from='romeo@example.net/orchard' type='chat'><body>ping</body></message>")
        .await;
    peer.expect("pong").await;

    peer.send("<iq type='get' id='v1' from='example.com'><query xmlns='jabber:iq:version'/></iq>")
        .await;
    peer.expect("service-unavailable").await;

    peer.send("<presence from='romeo@example.net/orchard'/>").await;
    peer.send("<iq type='get' id='v2' from='example.com'><ping xmlns='urn:xmpp:ping'/></iq>")
        .await;
    peer.expect("v2").await;
    assert_eq!(presences.load(Ordering::SeqCst), 1);

    client.close();
    peer.expect("</stream:stream>").await;
    assert_eq!(client.join().await, NegotiationState::Disconnected);
    assert!(failures.lock().unwrap().is_empty());

    let (inbound, outbound) = *elements.lock().unwrap();
    assert!(inbound >= 9);
    assert!(outbound >= 7);
}

#[tokio::test]
async fn test_bind_without_jid_fails_once() {
    let (connector, mut peer) = DuplexConnector::new();
    let mut builder = ClientBuilder::new_with_connector(config(), connector);
    let failures = record_failures(&mut builder);
    let client = builder.spawn();

    let script = async {
        peer.open(FEATURES_TLS).await;
        peer.expect("<starttls").await;
        peer.send(PROCEED).await;
        peer.open(FEATURES_SASL).await;
        peer.authenticate().await;
        peer.open(FEATURES_BIND).await;
        peer.expect("resource-bind").await;
        peer.expect("</iq>").await;
        peer.send("<iq type='result' id='resource-bind'><bind xmlns='urn:ietf:params:xml:ns:xmpp-bind'/></iq>")
            .await;
    };
    let (state, ()) = tokio::join!(client.wait_until_settled(), script);
    assert_eq!(state, NegotiationState::Failed);
    assert_eq!(client.bound_jid(), None);
    assert_eq!(*failures.lock().unwrap(), vec![String::from("bind failed")]);
    assert!(!peer.rest().await.contains("session-establishment"));
}

#[tokio::test]
async fn test_peer_hangs_up_mid_negotiation() {
    for cut in [
        Cut::AfterFirstFeatures,
        Cut::AfterProceed,
        Cut::AfterSuccess,
        Cut::AwaitingBindResult,
        Cut::AwaitingSessionResult,
    ] {
        let (connector, mut peer) = DuplexConnector::new();
        let mut builder =
            ClientBuilder::new_with_connector(config(), connector).initial_presence(true);
        let failures = record_failures(&mut builder);
        let client = builder.spawn();

        let (state, ()) = tokio::join!(client.wait_until_settled(), peer.negotiate_until(cut));
        assert_eq!(state, NegotiationState::Failed, "{:?}", cut);

        let failures = failures.lock().unwrap().clone();
        assert_eq!(failures.len(), 1, "{:?}: {:?}", cut, failures);
        assert!(failures[0].starts_with("transport closed"), "{:?}: {:?}", cut, failures);

        // No element, footer or presence after the client's last request.
        let rest = peer.rest().await;
        assert_eq!(rest.trim(), "", "{:?}", cut);
        assert_eq!(client.bound_jid(), None, "{:?}", cut);
        assert_eq!(client.join().await, NegotiationState::Failed, "{:?}", cut);
    }
}

#[tokio::test]
async fn test_stream_error_after_establishment() {
    for (error, expected) in [
        (
            "<stream:error><conflict xmlns='urn:ietf:params:xml:ns:xmpp-streams'/></stream:error>",
            "received stream error: conflict",
        ),
        (
            "<stream:error/>",
            "received stream error: undefined-condition",
        ),
    ] {
        let (connector, mut peer) = DuplexConnector::new();
        let mut builder = ClientBuilder::new_with_connector(config(), connector);
        let failures = record_failures(&mut builder);
        let client = builder.spawn();

        let (state, ()) = tokio::join!(client.wait_until_settled(), peer.negotiate_with_tls());
        assert_eq!(state, NegotiationState::Established);

        peer.send(error).await;
        assert_eq!(client.join().await, NegotiationState::Failed);
        assert_eq!(*failures.lock().unwrap(), vec![String::from(expected)]);
    }
}

#[tokio::test]
async fn test_initial_presence_follows_signed_in() {
    let (connector, mut peer) = DuplexConnector::new();
    let mut builder = ClientBuilder::new_with_connector(config(), connector).initial_presence(true);
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    builder
        .observers()
        .on_signed_in(move |jid| sink.lock().unwrap().push(format!("signed in as {}", jid)));
    let sink = events.clone();
    builder.observers().on_element(move |direction, elem| {
        if direction == Direction::Outbound {
            sink.lock().unwrap().push(format!("sent <{}/>", elem.name()));
        }
    });
    let client = builder.spawn();

    let (state, ()) = tokio::join!(client.wait_until_settled(), async {
        peer.negotiate_with_tls().await;
        peer.expect("<presence").await;
    });
    assert_eq!(state, NegotiationState::Established);

    let events = events.lock().unwrap().clone();
    let tail = &events[events.len() - 3..];
    assert_eq!(
        tail,
        [
            "sent <iq/>",
            "signed in as juliet@example.com/balcony",
            "sent <presence/>",
        ],
        "{:?}",
        events
    );
    client.close();
    assert_eq!(client.join().await, NegotiationState::Disconnected);
}

#[tokio::test]
async fn test_close_during_negotiation() {
    let (connector, mut peer) = DuplexConnector::new();
    let mut builder = ClientBuilder::new_with_connector(config(), connector);
    let failures = record_failures(&mut builder);
    let client = builder.spawn();

    peer.expect_header().await;
    client.close();
    assert_eq!(client.join().await, NegotiationState::Disconnected);
    assert!(failures.lock().unwrap().is_empty());
}

#[cfg(feature = "starttls")]
#[test]
fn test_malformed_identifier() {
    assert!(matches!(
        ClientBuilder::new("juliet@", "r0m30"),
        Err(Error::MalformedIdentifier(_))
    ));
}
