//! Finding the server: SRV lookup, host name resolution and connecting to
//! the first address which answers.

#[cfg(feature = "dns")]
use std::net::IpAddr;
use std::net::SocketAddr;

#[cfg(feature = "dns")]
use futures::{future::select_ok, FutureExt};
#[cfg(feature = "dns")]
use hickory_resolver::{
    config::LookupIpStrategy, name_server::TokioConnectionProvider, IntoName, TokioAsyncResolver,
};
use tokio::net::TcpStream;

use crate::Error;

/// Where a connector opens its TCP connection.
#[derive(Clone, Debug)]
pub enum DnsConfig {
    /// Look up `srv` records for `host`, falling back to `host` itself.
    #[cfg(feature = "dns")]
    UseSrv {
        /// Domain to look up.
        host: String,
        /// Service label, e.g. `_xmpp-client._tcp`.
        srv: String,
        /// Port used with `host` when there are no SRV records.
        fallback_port: u16,
    },

    /// Resolve `host` and connect to `port`.
    #[cfg(feature = "dns")]
    NoSrv {
        /// Host name or IP address.
        host: String,
        /// Port.
        port: u16,
    },

    /// Connect to a literal `ip:port`, without any DNS.
    Addr {
        /// Socket address.
        addr: String,
    },
}

impl std::fmt::Display for DnsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            #[cfg(feature = "dns")]
            DnsConfig::UseSrv { host, srv, .. } => write!(f, "{}.{}", srv, host),
            #[cfg(feature = "dns")]
            DnsConfig::NoSrv { host, port } => write!(f, "{}:{}", host, port),
            DnsConfig::Addr { addr } => f.write_str(addr),
        }
    }
}

impl DnsConfig {
    /// SRV lookup of `srv` under `host`.
    #[cfg(feature = "dns")]
    pub fn srv(host: &str, srv: &str, fallback_port: u16) -> Self {
        DnsConfig::UseSrv {
            host: host.to_owned(),
            srv: srv.to_owned(),
            fallback_port,
        }
    }

    /// `_xmpp-client._tcp` lookup under `host`, port 5222 as fallback.
    #[cfg(feature = "dns")]
    pub fn srv_default_client(host: &str) -> Self {
        DnsConfig::srv(host, "_xmpp-client._tcp", 5222)
    }

    /// Plain host and port.
    #[cfg(feature = "dns")]
    pub fn no_srv(host: &str, port: u16) -> Self {
        DnsConfig::NoSrv {
            host: host.to_owned(),
            port,
        }
    }

    /// Literal socket address.
    pub fn addr(addr: &str) -> Self {
        DnsConfig::Addr {
            addr: addr.to_owned(),
        }
    }

    /// Open a TCP connection to the configured server.
    pub async fn resolve(&self) -> Result<TcpStream, Error> {
        match self {
            #[cfg(feature = "dns")]
            DnsConfig::UseSrv {
                host,
                srv,
                fallback_port,
            } => {
                let domain = idna::domain_to_ascii(host)?;
                if let Some(ip) = literal_ip(&domain) {
                    return Ok(TcpStream::connect(SocketAddr::new(ip, *fallback_port)).await?);
                }
                let resolver = Resolver::from_system_conf()?;
                resolver.connect_srv(&domain, srv, *fallback_port).await
            }
            #[cfg(feature = "dns")]
            DnsConfig::NoSrv { host, port } => {
                let domain = idna::domain_to_ascii(host)?;
                if let Some(ip) = literal_ip(&domain) {
                    return Ok(TcpStream::connect(SocketAddr::new(ip, *port)).await?);
                }
                let resolver = Resolver::from_system_conf()?;
                resolver.connect_host(&domain, *port).await
            }
            DnsConfig::Addr { addr } => {
                let addr: SocketAddr = addr.parse()?;
                Ok(TcpStream::connect(addr).await?)
            }
        }
    }
}

#[cfg(feature = "dns")]
fn literal_ip(host: &str) -> Option<IpAddr> {
    host.parse().ok()
}

/// One candidate from an SRV lookup.
#[cfg(feature = "dns")]
#[derive(Debug, Clone, PartialEq, Eq)]
struct SrvTarget {
    priority: u16,
    weight: u16,
    host: String,
    port: u16,
}

/// Lowest priority first, heaviest weight first among equal priorities.
/// Equal records keep the resolver's order.
#[cfg(feature = "dns")]
fn sort_targets(targets: &mut [SrvTarget]) {
    targets.sort_by(|a, b| {
        a.priority
            .cmp(&b.priority)
            .then_with(|| b.weight.cmp(&a.weight))
    });
}

/// The system resolver, asking for both A and AAAA records.
#[cfg(feature = "dns")]
struct Resolver(TokioAsyncResolver);

#[cfg(feature = "dns")]
impl Resolver {
    fn from_system_conf() -> Result<Resolver, Error> {
        let (config, mut options) = hickory_resolver::system_conf::read_system_conf()?;
        options.ip_strategy = LookupIpStrategy::Ipv4AndIpv6;
        Ok(Resolver(TokioAsyncResolver::new(
            config,
            options,
            TokioConnectionProvider::default(),
        )))
    }

    /// `domain` is already in ASCII form.
    async fn connect_srv(
        &self,
        domain: &str,
        srv: &str,
        fallback_port: u16,
    ) -> Result<TcpStream, Error> {
        let name = format!("{}.{}.", srv, domain).into_name()?;
        let lookup = match self.0.srv_lookup(name.clone()).await {
            Ok(lookup) => lookup,
            Err(e) => {
                log::debug!(
                    "No SRV records for {} ({}), using {}:{}",
                    name,
                    e,
                    domain,
                    fallback_port
                );
                return self.connect_host(domain, fallback_port).await;
            }
        };

        let mut targets: Vec<SrvTarget> = lookup
            .iter()
            .map(|record| SrvTarget {
                priority: record.priority(),
                weight: record.weight(),
                host: record.target().to_ascii(),
                port: record.port(),
            })
            .collect();
        sort_targets(&mut targets);
        for target in &targets {
            log::debug!(
                "Trying {}:{} from {} (priority {}, weight {})",
                target.host,
                target.port,
                name,
                target.priority,
                target.weight
            );
            match self.connect_host(&target.host, target.port).await {
                Ok(stream) => return Ok(stream),
                Err(e) => log::debug!("{}:{} failed: {}", target.host, target.port, e),
            }
        }
        Err(Error::Disconnected)
    }

    /// Connect to every address of `host` at once and keep the first
    /// connection to succeed (happy eyeballs).
    async fn connect_host(&self, host: &str, port: u16) -> Result<TcpStream, Error> {
        let domain = idna::domain_to_ascii(host)?;
        if let Some(ip) = literal_ip(&domain) {
            return Ok(TcpStream::connect(SocketAddr::new(ip, port)).await?);
        }

        let ips = self.0.lookup_ip(domain).await?;
        let attempts: Vec<_> = ips
            .into_iter()
            .map(|ip| TcpStream::connect(SocketAddr::new(ip, port)).boxed())
            .collect();
        if attempts.is_empty() {
            return Err(Error::Disconnected);
        }
        match select_ok(attempts).await {
            Ok((stream, _)) => Ok(stream),
            Err(e) => {
                log::debug!("No address of {}:{} answered: {}", host, port, e);
                Err(Error::Disconnected)
            }
        }
    }
}
