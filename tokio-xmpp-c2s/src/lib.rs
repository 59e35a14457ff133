//! Client-side [XMPP](https://xmpp.org/) stream negotiation with asynchronous I/O using [tokio](https://tokio.rs/).
//!
//! A [`Client`] turns a byte stream into an authenticated, bound session:
//! it opens the XML stream, negotiates StartTLS, authenticates with SASL,
//! reopens the stream, binds a resource and establishes a session. Then it
//! dispatches incoming stanzas to the [observers][`observer::Observers`]
//! registered on its [`ClientBuilder`].
//!
//! # Getting started
//!
//! ```no_run
//! # async fn run() -> Result<(), tokio_xmpp_c2s::Error> {
//! use tokio_xmpp_c2s::{ClientBuilder, NegotiationState};
//!
//! let mut builder = ClientBuilder::new("juliet@example.com/balcony", "r0m30")?;
//! builder.observers().on_message(|message| {
//!     println!("{:?}", message.body);
//! });
//! let client = builder.initial_presence(true).spawn();
//! if client.wait_until_settled().await == NegotiationState::Established {
//!     println!("bound as {:?}", client.bound_jid());
//! }
//! client.close();
//! client.join().await;
//! # Ok(())
//! # }
//! ```
//!
//! # Features
//!
//! Supported transports:
//! - [x] Plaintext TCP (IPv4/IPv6)
//! - [x] StartTLS TCP (IPv4/IPv6 with [happy eyeballs](https://en.wikipedia.org/wiki/Happy_Eyeballs) support)
//! - [x] Custom connectors via the [`connect::ServerConnector`] trait
//!
//! There is no automatic reconnection: a failed client is replaced by a new
//! one.

#![deny(unsafe_code, missing_docs, bare_trait_objects)]
#![cfg_attr(docsrs, feature(doc_auto_cfg))]

#[cfg(all(
    not(xmpprs_doc_build),
    not(doc),
    feature = "tls-native",
    feature = "tls-rust"
))]
compile_error!("Both tls-native and tls-rust features can't be enabled at the same time.");

#[cfg(all(
    feature = "starttls",
    not(feature = "tls-native"),
    not(feature = "tls-rust")
))]
compile_error!(
    "when starttls feature enabled one of tls-native and tls-rust features must be enabled."
);

mod event;
pub use event::Stanza;
pub mod connect;
pub mod ns;
pub mod observer;
pub mod parsers;
pub mod xmlstream;

mod client;
pub use client::{
    Client, ClientBuilder, ClientConfig, CredentialsNegotiator, NegotiationState, Negotiated,
    Negotiator, SaslNegotiator, StanzaSender, StartTlsPolicy,
};

/// Detailed error types
pub mod error;

#[doc(inline)]
/// Generic tokio_xmpp Error
pub use crate::error::Error;

// Re-exports
pub use jid;
pub use minidom;
