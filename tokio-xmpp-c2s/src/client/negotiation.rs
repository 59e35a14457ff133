// Copyright (c) 2024 xmpp-rs contributors
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Turn a fresh byte stream into an authenticated, bound session.

use core::fmt;
use std::io;

use minidom::Element;
use tokio::sync::watch;

use crate::client::config::{ClientConfig, StartTlsPolicy};
use crate::client::sasl::SaslNegotiator;
use crate::connect::{BoxedIo, ServerConnector};
use crate::error::{AuthError, Error, ProtocolError};
use crate::jid::Jid;
use crate::ns;
use crate::parsers::{
    bind::{BindQuery, BindResponse, Session},
    iq::{Iq, IqType},
    sasl::{Auth, Challenge, Failure, Response, Success},
    starttls,
    stream::{StreamError, StreamFeatures},
    FromElementError,
};
use crate::xmlstream::{ElementTap, ElementTransport};

pub(crate) const BIND_REQ_ID: &str = "resource-bind";
pub(crate) const SESSION_REQ_ID: &str = "session-establishment";

/// Progress of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationState {
    /// No stream open yet, or closed on request.
    Disconnected,
    /// First stream header sent.
    StreamOpened,
    /// STARTTLS requested.
    TlsNegotiating,
    /// SASL exchange in progress.
    Authenticating,
    /// Stream reopened after authentication.
    ReAuthenticatedStreamOpened,
    /// Resource binding requested.
    Binding,
    /// Session establishment requested.
    SessionEstablishing,
    /// Stanzas are being exchanged.
    Established,
    /// The connection is dead.
    Failed,
}

impl NegotiationState {
    /// Whether negotiation is over, successfully or not.
    pub fn is_settled(&self) -> bool {
        matches!(self, NegotiationState::Established | NegotiationState::Failed)
    }
}

impl fmt::Display for NegotiationState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            NegotiationState::Disconnected => "disconnected",
            NegotiationState::StreamOpened => "stream opened",
            NegotiationState::TlsNegotiating => "negotiating TLS",
            NegotiationState::Authenticating => "authenticating",
            NegotiationState::ReAuthenticatedStreamOpened => "stream reopened",
            NegotiationState::Binding => "binding",
            NegotiationState::SessionEstablishing => "establishing session",
            NegotiationState::Established => "established",
            NegotiationState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// A negotiated connection, ready for stanzas.
#[derive(Debug)]
pub struct Negotiated {
    /// The transport, opened three times if TLS was used.
    pub transport: ElementTransport<BoxedIo>,

    /// The full address assigned by the server.
    pub jid: Jid,
}

/// Drives one connection attempt from TCP connect to an established
/// session.
///
/// Every step waits for the answer to the previous one. Any error ends
/// the attempt; the transport is dropped without further I/O.
pub struct Negotiator<'a, C: ServerConnector> {
    config: &'a ClientConfig,
    connector: &'a C,
    sasl: &'a dyn SaslNegotiator,
    state: &'a watch::Sender<NegotiationState>,
    tap: Option<ElementTap>,
}

impl<'a, C: ServerConnector> Negotiator<'a, C> {
    /// Prepare a negotiation publishing its progress to `state`.
    pub fn new(
        config: &'a ClientConfig,
        connector: &'a C,
        sasl: &'a dyn SaslNegotiator,
        state: &'a watch::Sender<NegotiationState>,
        tap: Option<ElementTap>,
    ) -> Self {
        Negotiator {
            config,
            connector,
            sasl,
            state,
            tap,
        }
    }

    fn enter(&self, state: NegotiationState) {
        log::debug!("Negotiation state: {}", state);
        self.state.send_replace(state);
    }

    /// Connect and negotiate.
    ///
    /// On success the state is left at
    /// [`SessionEstablishing`][`NegotiationState::SessionEstablishing`]
    /// and nothing has been sent after the session request. The caller
    /// announces the session, publishes
    /// [`Established`][`NegotiationState::Established`] and only then
    /// sends the initial presence.
    pub async fn run(self) -> Result<Negotiated, Error> {
        let domain = self.config.jid.domain().to_owned();
        let io = self.connector.connect(&self.config.jid).await?;
        let mut transport = ElementTransport::open(io, &domain, self.tap.clone()).await?;
        self.enter(NegotiationState::StreamOpened);
        let features = self.read_features(&mut transport).await?;

        let (mut transport, features) = self.starttls(transport, features).await?;

        self.enter(NegotiationState::Authenticating);
        self.authenticate(&mut transport, &features).await?;

        let mut transport = transport.restart().await?;
        self.enter(NegotiationState::ReAuthenticatedStreamOpened);
        let features = self.read_features(&mut transport).await?;

        self.enter(NegotiationState::Binding);
        let jid = self.bind(&mut transport, &features).await?;

        self.enter(NegotiationState::SessionEstablishing);
        self.establish_session(&mut transport).await?;
        Ok(Negotiated { transport, jid })
    }

    /// Read one element. Any `error` in the streams namespace aborts the
    /// negotiation, whether or not its condition is known.
    async fn read(&self, transport: &mut ElementTransport<BoxedIo>) -> Result<Element, Error> {
        let elem = match self.config.negotiation_timeout {
            Some(duration) => tokio::time::timeout(duration, transport.read_next())
                .await
                .map_err(|_| {
                    Error::TransportClosed(io::Error::new(
                        io::ErrorKind::TimedOut,
                        "no answer from the server during negotiation",
                    ))
                })??,
            None => transport.read_next().await?,
        };
        if elem.is("error", ns::STREAM) {
            let error = StreamError::read(&elem);
            log::warn!("Server aborted negotiation: {}", error);
            return Err(Error::StreamNegotiationAborted(error));
        }
        Ok(elem)
    }

    async fn read_features(
        &self,
        transport: &mut ElementTransport<BoxedIo>,
    ) -> Result<StreamFeatures, Error> {
        match StreamFeatures::try_from(self.read(transport).await?) {
            Ok(features) => Ok(features),
            Err(FromElementError::Mismatch(elem)) => {
                log::warn!("Expected stream features, got <{}/>", elem.name());
                Err(Error::FeaturesNotReceived)
            }
            Err(FromElementError::Invalid(e)) => Err(ProtocolError::Parsers(e).into()),
        }
    }

    async fn starttls(
        &self,
        mut transport: ElementTransport<BoxedIo>,
        features: StreamFeatures,
    ) -> Result<(ElementTransport<BoxedIo>, StreamFeatures), Error> {
        let offered = features.can_starttls() && self.connector.can_starttls();
        match self.config.starttls {
            StartTlsPolicy::Disabled => {
                if features.requires_starttls() {
                    log::warn!("Server requires STARTTLS, but it is disabled");
                }
                return Ok((transport, features));
            }
            StartTlsPolicy::IfAdvertised if !offered => {
                log::debug!("STARTTLS not available, continuing without TLS");
                return Ok((transport, features));
            }
            StartTlsPolicy::Required if !offered => {
                log::warn!("STARTTLS required, but not available");
                return Err(ProtocolError::NoTls.into());
            }
            StartTlsPolicy::IfAdvertised | StartTlsPolicy::Required => (),
        }

        self.enter(NegotiationState::TlsNegotiating);
        transport.write_next(&starttls::Request.into()).await?;
        let answer = self.read(&mut transport).await?;
        match starttls::Response::try_from(answer) {
            Ok(starttls::Response::Proceed) => (),
            Ok(starttls::Response::Failure) | Err(FromElementError::Mismatch(_)) => {
                if self.config.starttls == StartTlsPolicy::Required {
                    log::warn!("Server declined STARTTLS");
                    return Err(ProtocolError::NoTls.into());
                }
                log::debug!("Server declined STARTTLS, continuing without TLS");
                return Ok((transport, features));
            }
            Err(FromElementError::Invalid(e)) => return Err(ProtocolError::Parsers(e).into()),
        }

        let domain = transport.domain().to_owned();
        let mut transport = transport
            .reset_with(|io| self.connector.starttls(io, &domain))
            .await?;
        log::debug!("TLS established with {}", domain);
        let features = self.read_features(&mut transport).await?;
        Ok((transport, features))
    }

    async fn authenticate(
        &self,
        transport: &mut ElementTransport<BoxedIo>,
        features: &StreamFeatures,
    ) -> Result<(), Error> {
        let mut mechanism = self.sasl.select(&features.sasl_mechanisms)?;
        let auth = Auth {
            mechanism: mechanism.name().to_owned(),
            data: mechanism.initial(),
        };
        transport.write_next(&auth.into()).await?;

        loop {
            let elem = self.read(transport).await?;
            if elem.is("challenge", ns::SASL) {
                let challenge = Challenge::try_from(elem)?;
                let data = mechanism
                    .response(&challenge.data)
                    .map_err(AuthError::Sasl)?;
                transport.write_next(&Response { data }.into()).await?;
            } else if elem.is("success", ns::SASL) {
                let success = Success::try_from(elem)?;
                mechanism.success(&success.data).map_err(AuthError::Sasl)?;
                log::debug!("Authenticated with {}", mechanism.name());
                return Ok(());
            } else if elem.is("failure", ns::SASL) {
                let failure = Failure::try_from(elem)?;
                log::warn!(
                    "Authentication failed: {:?} {}",
                    failure.condition,
                    failure.text.as_deref().unwrap_or("")
                );
                return Err(AuthError::Fail(failure.condition).into());
            } else {
                log::debug!("Ignoring <{}/> during authentication", elem.name());
            }
        }
    }

    async fn bind(
        &self,
        transport: &mut ElementTransport<BoxedIo>,
        features: &StreamFeatures,
    ) -> Result<Jid, Error> {
        if !features.can_bind() {
            log::debug!("Server did not advertise resource binding, trying anyway");
        }
        let resource = self.config.jid.resource().map(String::from);
        let iq = Iq::from_set(BIND_REQ_ID, BindQuery::new(resource));
        transport.write_next(&iq.into()).await?;

        let iq = self.read_response(transport, BIND_REQ_ID).await?;
        match iq.payload {
            IqType::Result(Some(payload)) => match BindResponse::try_from(payload) {
                Ok(response) => Ok(Jid::from(response)),
                Err(e) => {
                    log::warn!("Invalid bind response: {}", e);
                    Err(Error::BindFailed)
                }
            },
            IqType::Error(error) => {
                log::warn!("Bind rejected: {:?}", error.condition);
                Err(Error::BindFailed)
            }
            _ => {
                log::warn!("Bind response carries no address");
                Err(Error::BindFailed)
            }
        }
    }

    async fn establish_session(
        &self,
        transport: &mut ElementTransport<BoxedIo>,
    ) -> Result<(), Error> {
        let iq = Iq::from_set(SESSION_REQ_ID, Session);
        transport.write_next(&iq.into()).await?;
        let iq = self.read_response(transport, SESSION_REQ_ID).await?;
        if let IqType::Error(error) = iq.payload {
            log::warn!(
                "Session establishment answered with {:?}, continuing",
                error.condition
            );
        }
        Ok(())
    }

    /// Skip elements until the IQ answering `id`.
    async fn read_response(
        &self,
        transport: &mut ElementTransport<BoxedIo>,
        id: &str,
    ) -> Result<Iq, Error> {
        loop {
            let elem = self.read(transport).await?;
            if !elem.is("iq", ns::JABBER_CLIENT) {
                log::debug!("Ignoring <{}/> while waiting for {}", elem.name(), id);
                continue;
            }
            let iq = Iq::try_from(elem)?;
            if iq.id == id && !iq.is_request() {
                return Ok(iq);
            }
            log::debug!("Ignoring iq {} while waiting for {}", iq.id, id);
        }
    }
}
