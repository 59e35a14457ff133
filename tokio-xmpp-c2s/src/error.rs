#[cfg(feature = "dns")]
use hickory_resolver::{
    error::ResolveError as DnsResolveError, proto::error::ProtoError as DnsProtoError,
};
use sasl::client::MechanismError as SaslMechanismError;
use std::error::Error as StdError;
use std::fmt;
use std::io::Error as IoError;
use std::net::AddrParseError;

use crate::{
    connect::ServerConnectorError,
    jid,
    parsers::{
        sasl::SaslCondition, stream::StreamError, FromElementError,
    },
    xmlstream::ReadError,
};

/// Top-level error type
#[derive(Debug)]
pub enum Error {
    /// The configured address is not a valid Jabber-Id
    MalformedIdentifier(jid::Error),
    /// The byte stream or the XML stream on top of it failed: I/O error,
    /// unexpected EOF, XML error, stream footer or timeout
    TransportClosed(IoError),
    /// The peer sent something else where stream features were expected
    FeaturesNotReceived,
    /// Resource binding did not yield a Jabber-Id
    BindFailed,
    /// The peer sent a stream error during negotiation
    StreamNegotiationAborted(StreamError),
    /// The peer sent a stream error once the session was established
    ReceivedStreamError(StreamError),
    /// Protocol-level error
    Protocol(ProtocolError),
    /// Authentication error
    Auth(AuthError),
    /// Connection closed
    Disconnected,
    /// Error specific to ServerConnector impl
    Connection(Box<dyn ServerConnectorError>),
    /// DNS protocol error
    #[cfg(feature = "dns")]
    Dns(DnsProtoError),
    /// DNS resolution error
    #[cfg(feature = "dns")]
    Resolve(DnsResolveError),
    /// DNS label conversion error, no details available from module
    /// `idna`
    #[cfg(feature = "dns")]
    Idna,
    /// Invalid IP/Port address
    Addr(AddrParseError),
}

impl fmt::Display for Error {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::MalformedIdentifier(e) => write!(fmt, "malformed identifier: {}", e),
            Error::TransportClosed(e) => write!(fmt, "transport closed: {}", e),
            Error::FeaturesNotReceived => write!(fmt, "stream features not received"),
            Error::BindFailed => write!(fmt, "bind failed"),
            Error::StreamNegotiationAborted(e) => {
                write!(fmt, "stream negotiation aborted: {}", e)
            }
            Error::ReceivedStreamError(e) => write!(fmt, "received stream error: {}", e),
            Error::Connection(e) => write!(fmt, "connection error: {}", e),
            Error::Protocol(e) => write!(fmt, "protocol error: {}", e),
            Error::Auth(e) => write!(fmt, "authentication error: {}", e),
            Error::Disconnected => write!(fmt, "disconnected"),
            #[cfg(feature = "dns")]
            Error::Dns(e) => write!(fmt, "{:?}", e),
            #[cfg(feature = "dns")]
            Error::Resolve(e) => write!(fmt, "{:?}", e),
            #[cfg(feature = "dns")]
            Error::Idna => write!(fmt, "IDNA error"),
            Error::Addr(e) => write!(fmt, "Wrong network address: {e}"),
        }
    }
}

impl StdError for Error {}

impl From<IoError> for Error {
    fn from(e: IoError) -> Self {
        Error::TransportClosed(e)
    }
}

impl From<ReadError> for Error {
    fn from(e: ReadError) -> Self {
        Error::TransportClosed(e.into())
    }
}

impl<T: ServerConnectorError + 'static> From<T> for Error {
    fn from(e: T) -> Self {
        Error::Connection(Box::new(e))
    }
}

impl From<jid::Error> for Error {
    fn from(e: jid::Error) -> Self {
        Error::MalformedIdentifier(e)
    }
}

impl From<ProtocolError> for Error {
    fn from(e: ProtocolError) -> Self {
        Error::Protocol(e)
    }
}

impl From<AuthError> for Error {
    fn from(e: AuthError) -> Self {
        Error::Auth(e)
    }
}

impl From<FromElementError> for Error {
    fn from(e: FromElementError) -> Self {
        ProtocolError::from(e).into()
    }
}

#[cfg(feature = "dns")]
impl From<idna::Errors> for Error {
    fn from(_e: idna::Errors) -> Self {
        Error::Idna
    }
}

#[cfg(feature = "dns")]
impl From<DnsResolveError> for Error {
    fn from(e: DnsResolveError) -> Error {
        Error::Resolve(e)
    }
}

#[cfg(feature = "dns")]
impl From<DnsProtoError> for Error {
    fn from(e: DnsProtoError) -> Error {
        Error::Dns(e)
    }
}

impl From<AddrParseError> for Error {
    fn from(e: AddrParseError) -> Error {
        Error::Addr(e)
    }
}

/// XMPP protocol-level error
#[derive(Debug)]
pub enum ProtocolError {
    /// Error with expected stanza schema
    Parsers(xso::error::Error),
    /// No TLS available
    NoTls,
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ProtocolError::Parsers(e) => write!(fmt, "error with expected stanza schema: {}", e),
            ProtocolError::NoTls => write!(fmt, "no TLS available"),
        }
    }
}

impl StdError for ProtocolError {}

impl From<xso::error::Error> for ProtocolError {
    fn from(e: xso::error::Error) -> Self {
        ProtocolError::Parsers(e)
    }
}

impl From<FromElementError> for ProtocolError {
    fn from(e: FromElementError) -> Self {
        match e {
            FromElementError::Mismatch(_) => {
                ProtocolError::Parsers(xso::error::Error::TypeMismatch)
            }
            FromElementError::Invalid(e) => ProtocolError::Parsers(e),
        }
    }
}

/// Authentication error
#[derive(Debug)]
pub enum AuthError {
    /// No matching SASL mechanism available
    NoMechanism,
    /// Local SASL implementation error
    Sasl(SaslMechanismError),
    /// Failure from server
    Fail(SaslCondition),
}

impl StdError for AuthError {}

impl fmt::Display for AuthError {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match self {
            AuthError::NoMechanism => write!(fmt, "no matching SASL mechanism available"),
            AuthError::Sasl(s) => write!(fmt, "local SASL implementation error: {}", s),
            AuthError::Fail(c) => write!(fmt, "failure from the server: {}", c),
        }
    }
}

impl From<SaslMechanismError> for AuthError {
    fn from(e: SaslMechanismError) -> Self {
        AuthError::Sasl(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parsers::stream::StreamCondition;
    use std::io;

    #[test]
    fn bind_failed_message() {
        assert_eq!(Error::BindFailed.to_string(), "bind failed");
    }

    #[test]
    fn read_errors_close_the_transport() {
        let e: Error = ReadError::StreamFooterReceived.into();
        match e {
            Error::TransportClosed(e) => assert_eq!(e.kind(), io::ErrorKind::UnexpectedEof),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn stream_error_display() {
        let e = Error::StreamNegotiationAborted(StreamError::new(
            StreamCondition::NotWellFormed,
        ));
        assert!(e.to_string().starts_with("stream negotiation aborted: "));
        assert!(e.to_string().contains("not-well-formed"));
    }

    #[test]
    fn mismatch_becomes_protocol_error() {
        let elem = minidom::Element::builder("foo", "urn:example").build();
        let e: Error = FromElementError::Mismatch(elem).into();
        assert!(matches!(
            e,
            Error::Protocol(ProtocolError::Parsers(xso::error::Error::TypeMismatch))
        ));
    }
}
