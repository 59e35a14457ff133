// Copyright (c) 2019 Emmanuel Gil Peyrot <linkmauve@linkmauve.fr>
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use core::time::Duration;
use std::sync::Arc;

use minidom::Element;
use tokio::sync::{mpsc, watch, Notify};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::WatchStream;

use crate::{
    connect::{BoxedIo, ServerConnector},
    error::Error,
    jid::Jid,
    observer::Observers,
    parsers::presence::Presence,
    xmlstream::ElementTransport,
};

#[cfg(any(feature = "starttls", feature = "insecure-tcp"))]
use crate::connect::DnsConfig;
#[cfg(feature = "starttls")]
use crate::connect::StartTlsServerConnector;
#[cfg(feature = "insecure-tcp")]
use crate::connect::TcpServerConnector;

mod config;
mod dispatch;
mod negotiation;
mod sasl;
#[cfg(test)]
mod tests;

pub use config::{ClientConfig, StartTlsPolicy};
pub use dispatch::StanzaSender;
pub use negotiation::{NegotiationState, Negotiated, Negotiator};
pub use sasl::{CredentialsNegotiator, SaslNegotiator};

/// Collects configuration and observers for a [`Client`].
///
/// Nothing happens on the network until [`spawn`][`Self::spawn`].
pub struct ClientBuilder<C: ServerConnector> {
    config: ClientConfig,
    connector: C,
    sasl: Option<Box<dyn SaslNegotiator>>,
    observers: Observers,
    sender: StanzaSender,
    outgoing: mpsc::UnboundedReceiver<Element>,
}

#[cfg(feature = "starttls")]
impl ClientBuilder<StartTlsServerConnector> {
    /// Prepare a client using StartTLS, locating the server through the
    /// `_xmpp-client._tcp` SRV records of the JID's domain.
    pub fn new<P: Into<String>>(jid: &str, password: P) -> Result<Self, Error> {
        let jid = Jid::new(jid)?;
        let dns_config = DnsConfig::srv(jid.domain(), "_xmpp-client._tcp", 5222);
        Ok(Self::new_with_connector(
            ClientConfig::new(jid, password.into()),
            StartTlsServerConnector::from(dns_config),
        ))
    }
}

#[cfg(feature = "insecure-tcp")]
impl ClientBuilder<TcpServerConnector> {
    /// Prepare a client with plaintext insecure connection and specific
    /// DNS config
    pub fn new_plaintext<P: Into<String>>(
        jid: &str,
        password: P,
        dns_config: DnsConfig,
    ) -> Result<Self, Error> {
        let jid = Jid::new(jid)?;
        Ok(Self::new_with_connector(
            ClientConfig::new(jid, password.into()),
            TcpServerConnector::from(dns_config),
        ))
    }
}

impl<C: ServerConnector> ClientBuilder<C> {
    /// Prepare a client connecting through `connector`.
    pub fn new_with_connector(config: ClientConfig, connector: C) -> Self {
        let (sender, outgoing) = StanzaSender::new();
        ClientBuilder {
            config,
            connector,
            sasl: None,
            observers: Observers::default(),
            sender,
            outgoing,
        }
    }

    /// Set the STARTTLS policy.
    pub fn starttls(mut self, policy: StartTlsPolicy) -> Self {
        self.config.starttls = policy;
        self
    }

    /// Send `<presence/>` once the session is established.
    pub fn initial_presence(mut self, enabled: bool) -> Self {
        self.config.initial_presence = enabled;
        self
    }

    /// Give up if the server does not answer within `timeout` during
    /// negotiation.
    pub fn negotiation_timeout(mut self, timeout: Duration) -> Self {
        self.config.negotiation_timeout = Some(timeout);
        self
    }

    /// Replace the default username and password authentication.
    pub fn sasl<S: SaslNegotiator + 'static>(mut self, sasl: S) -> Self {
        self.sasl = Some(Box::new(sasl));
        self
    }

    /// Callbacks to register before the connection starts.
    pub fn observers(&mut self) -> &mut Observers {
        &mut self.observers
    }

    /// A handle to queue stanzas, usable from within observers.
    pub fn sender(&self) -> StanzaSender {
        self.sender.clone()
    }

    /// Start connecting on the current tokio runtime.
    pub fn spawn(self) -> Client {
        let ClientBuilder {
            config,
            connector,
            sasl,
            mut observers,
            sender,
            mut outgoing,
        } = self;
        let sasl = sasl.unwrap_or_else(|| {
            Box::new(CredentialsNegotiator::new(
                config.jid.user(),
                &config.password,
            ))
        });
        let (state_tx, state) = watch::channel(NegotiationState::Disconnected);
        let (jid_tx, bound_jid) = watch::channel(None);
        let close = Arc::new(Notify::new());
        let task_close = close.clone();

        let task = tokio::spawn(async move {
            let tap = observers.take_tap();
            let negotiator = Negotiator::new(&config, &connector, &*sasl, &state_tx, tap);
            let result = tokio::select! {
                negotiated = negotiator.run() => match negotiated {
                    Ok(Negotiated { mut transport, jid }) => {
                        log::info!("Session established as {}", jid);
                        jid_tx.send_replace(Some(jid.clone()));
                        observers.signed_in(&jid);
                        state_tx.send_replace(NegotiationState::Established);
                        match announce(&mut transport, config.initial_presence).await {
                            Ok(()) => {
                                dispatch::run(transport, &observers, &mut outgoing, &task_close)
                                    .await
                            }
                            Err(e) => Err(e),
                        }
                    }
                    Err(e) => Err(e),
                },
                _ = task_close.notified() => {
                    log::debug!("Connection closed during negotiation");
                    Ok(())
                }
            };
            match result {
                Ok(()) => {
                    state_tx.send_replace(NegotiationState::Disconnected);
                }
                Err(e) => {
                    log::warn!("Connection failed: {}", e);
                    observers.connection_failed(&e);
                    state_tx.send_replace(NegotiationState::Failed);
                }
            }
        });

        Client {
            sender,
            state,
            bound_jid,
            close,
            task,
        }
    }
}

/// Send `<presence/>` if enabled, once observers know the session.
async fn announce(transport: &mut ElementTransport<BoxedIo>, enabled: bool) -> Result<(), Error> {
    if enabled {
        transport.write_next(&Presence::available().into()).await?;
    }
    Ok(())
}

/// A running client connection.
///
/// The connection lives in a spawned task; this handle queues stanzas,
/// reports progress and ends the connection. There is no automatic
/// reconnection: once [`Failed`][`NegotiationState::Failed`], build a new
/// client.
#[derive(Debug)]
pub struct Client {
    sender: StanzaSender,
    state: watch::Receiver<NegotiationState>,
    bound_jid: watch::Receiver<Option<Jid>>,
    close: Arc<Notify>,
    task: JoinHandle<()>,
}

impl Client {
    /// Current negotiation state.
    pub fn state(&self) -> NegotiationState {
        *self.state.borrow()
    }

    /// Every state the connection goes through, starting with the current
    /// one.
    pub fn state_changes(&self) -> WatchStream<NegotiationState> {
        WatchStream::new(self.state.clone())
    }

    /// Wait until the session is established or the connection failed.
    ///
    /// Returns the current state if the connection task ended otherwise.
    pub async fn wait_until_settled(&self) -> NegotiationState {
        let mut state = self.state.clone();
        let settled = state.wait_for(NegotiationState::is_settled).await.map(|s| *s);
        settled.unwrap_or_else(|_| *self.state.borrow())
    }

    /// Get the client's bound JID (the one reported by the XMPP
    /// server).
    pub fn bound_jid(&self) -> Option<Jid> {
        self.bound_jid.borrow().clone()
    }

    /// A handle to queue stanzas.
    pub fn sender(&self) -> StanzaSender {
        self.sender.clone()
    }

    /// Queue a stanza, see [`StanzaSender::send_stanza`].
    pub fn send_stanza<S: Into<crate::Stanza>>(&self, stanza: S) -> Result<Option<String>, Error> {
        self.sender.send_stanza(stanza)
    }

    /// Close the connection.
    ///
    /// Once established, the stream footer is sent first. Closing does not
    /// count as a failure.
    pub fn close(&self) {
        self.close.notify_one();
    }

    /// Wait for the connection task to end, returning the final state.
    pub async fn join(self) -> NegotiationState {
        if let Err(e) = self.task.await {
            log::error!("Client task ended abnormally: {}", e);
        }
        let state = *self.state.borrow();
        state
    }
}
