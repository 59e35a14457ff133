//! TCP connections which the server upgrades to TLS in place, after
//! answering `<proceed/>`.
//!
//! The TLS backend is picked at build time with either the `tls-native` or
//! the `tls-rust` feature.

use core::fmt;

use tokio::io::BufStream;

use crate::{
    connect::{BoxedIo, DnsConfig, ServerConnector, ServerConnectorError},
    jid::Jid,
    Error,
};

#[cfg(feature = "tls-native")]
use native_tls::Error as TlsError;
#[cfg(all(feature = "tls-rust", not(feature = "tls-native")))]
use tokio_rustls::rustls::Error as TlsError;

/// Connects over TCP and encrypts the same socket on request.
#[derive(Debug, Clone)]
pub struct StartTlsServerConnector {
    dns: DnsConfig,
}

impl StartTlsServerConnector {
    /// Where this connector finds the server.
    pub fn dns(&self) -> &DnsConfig {
        &self.dns
    }
}

impl From<DnsConfig> for StartTlsServerConnector {
    fn from(dns: DnsConfig) -> StartTlsServerConnector {
        StartTlsServerConnector { dns }
    }
}

impl ServerConnector for StartTlsServerConnector {
    async fn connect(&self, jid: &Jid) -> Result<BoxedIo, Error> {
        log::debug!("Connecting to {} for {}", self.dns, jid);
        Ok(Box::new(BufStream::new(self.dns.resolve().await?)))
    }

    async fn starttls(&self, io: BoxedIo, domain: &str) -> Result<BoxedIo, Error> {
        log::debug!("TLS handshake with {}", domain);
        let tls = handshake(io, domain).await?;
        Ok(Box::new(BufStream::new(tls)))
    }
}

#[cfg(feature = "tls-native")]
async fn handshake(
    io: BoxedIo,
    domain: &str,
) -> Result<tokio_native_tls::TlsStream<BoxedIo>, Error> {
    let connector = native_tls::TlsConnector::new().map_err(StartTlsError::Tls)?;
    let tls = tokio_native_tls::TlsConnector::from(connector)
        .connect(domain, io)
        .await
        .map_err(StartTlsError::Tls)?;
    Ok(tls)
}

#[cfg(all(feature = "tls-rust", not(feature = "tls-native")))]
async fn handshake(
    io: BoxedIo,
    domain: &str,
) -> Result<tokio_rustls::client::TlsStream<BoxedIo>, Error> {
    use std::sync::Arc;
    use tokio_rustls::rustls::{pki_types::ServerName, ClientConfig, RootCertStore};

    // Validated before any certificates are loaded.
    let name = ServerName::try_from(domain.to_owned())
        .map_err(|_| StartTlsError::InvalidDomain(domain.to_owned()))?;

    let mut roots = RootCertStore::empty();
    #[cfg(feature = "webpki-roots")]
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    #[cfg(feature = "rustls-native-certs")]
    {
        let (added, ignored) =
            roots.add_parsable_certificates(rustls_native_certs::load_native_certs()?);
        log::trace!("Loaded {} system certificates, ignored {}", added, ignored);
    }

    let config = ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    let tls = tokio_rustls::TlsConnector::from(Arc::new(config))
        .connect(name, io)
        .await?;
    Ok(tls)
}

/// Failure to encrypt a connection.
#[derive(Debug)]
pub enum StartTlsError {
    /// The TLS library refused the handshake or its setup.
    Tls(TlsError),

    /// The domain is not usable as a TLS server name.
    InvalidDomain(String),
}

impl ServerConnectorError for StartTlsError {}

impl std::error::Error for StartTlsError {}

impl fmt::Display for StartTlsError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            StartTlsError::Tls(e) => write!(f, "TLS error: {}", e),
            StartTlsError::InvalidDomain(domain) => {
                write!(f, "invalid TLS server name: {:?}", domain)
            }
        }
    }
}

impl From<TlsError> for StartTlsError {
    fn from(e: TlsError) -> Self {
        StartTlsError::Tls(e)
    }
}
