//! `ServerConnector` provides byte streams for XMPP clients

use core::future::Future;

use tokio::io::{AsyncBufRead, AsyncWrite};

use crate::jid::Jid;
use crate::Error;

#[cfg(feature = "starttls")]
pub mod starttls;
#[cfg(feature = "starttls")]
pub use starttls::StartTlsServerConnector;

#[cfg(feature = "insecure-tcp")]
pub mod tcp;
#[cfg(feature = "insecure-tcp")]
pub use tcp::TcpServerConnector;

mod dns;
pub use dns::DnsConfig;

/// trait returned boxed by ServerConnector
pub trait AsyncReadAndWrite: AsyncBufRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncBufRead + AsyncWrite + Unpin + Send> AsyncReadAndWrite for T {}

/// A byte stream of any kind, plain or encrypted.
///
/// The element transport moves this value from plaintext to TLS without
/// changing its type.
pub type BoxedIo = Box<dyn AsyncReadAndWrite>;

/// Trait that must be extended by the implementation of ServerConnector
pub trait ServerConnectorError: core::error::Error + Sync + Send {}

/// Trait called to connect to an XMPP server
pub trait ServerConnector: Clone + core::fmt::Debug + Send + Sync + Unpin + 'static {
    /// Open a byte stream to the server responsible for `jid`.
    ///
    /// No XML is exchanged yet.
    fn connect(&self, jid: &Jid) -> impl Future<Output = Result<BoxedIo, Error>> + Send;

    /// Wrap an established byte stream in TLS, verifying the server
    /// against `domain`.
    ///
    /// This is called after the server answered `<proceed/>`.
    fn starttls(
        &self,
        io: BoxedIo,
        domain: &str,
    ) -> impl Future<Output = Result<BoxedIo, Error>> + Send;

    /// Whether [`starttls`][`Self::starttls`] is able to encrypt at all.
    fn can_starttls(&self) -> bool {
        true
    }
}
