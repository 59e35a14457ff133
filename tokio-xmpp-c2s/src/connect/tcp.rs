//! `tcp::TcpServerConnector` provides a `ServerConnector` for plaintext connections

use tokio::io::BufStream;

use crate::{
    connect::{BoxedIo, DnsConfig, ServerConnector},
    error::ProtocolError,
    jid::Jid,
    Error,
};

/// Connect via insecure plaintext TCP to an XMPP server
/// This should only be used over localhost or otherwise when you know what you are doing
#[derive(Debug, Clone)]
pub struct TcpServerConnector(pub DnsConfig);

impl From<DnsConfig> for TcpServerConnector {
    fn from(dns_config: DnsConfig) -> TcpServerConnector {
        Self(dns_config)
    }
}

impl ServerConnector for TcpServerConnector {
    async fn connect(&self, jid: &Jid) -> Result<BoxedIo, Error> {
        log::debug!("Connecting to {} for {} without TLS", self.0, jid);
        let stream = BufStream::new(self.0.resolve().await?);
        Ok(Box::new(stream))
    }

    async fn starttls(&self, _io: BoxedIo, _domain: &str) -> Result<BoxedIo, Error> {
        Err(ProtocolError::NoTls.into())
    }

    fn can_starttls(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn connects_to_address() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 5];
            socket.read_exact(&mut buf).await.unwrap();
            buf
        });

        let connector = TcpServerConnector::from(DnsConfig::addr(&addr.to_string()));
        assert!(!connector.can_starttls());
        let jid = Jid::new("user@localhost").unwrap();
        let mut io = connector.connect(&jid).await.unwrap();
        io.write_all(b"hello").await.unwrap();
        io.flush().await.unwrap();
        assert_eq!(&server.await.unwrap(), b"hello");

        match connector.starttls(io, "localhost").await {
            Err(Error::Protocol(ProtocolError::NoTls)) => (),
            other => panic!("unexpected result: {:?}", other.map(|_| ())),
        }
    }
}
