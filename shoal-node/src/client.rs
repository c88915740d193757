//! Registry client: register, heartbeat and query over one-shot UDP datagrams.

use std::net::SocketAddr;
use std::time::Duration;

use shoal_core::{parse_peer_list, DiscoveryEncodeError, DiscoveryMessage, PeerAddr};
use tokio::net::UdpSocket;

const RECV_BUF_SIZE: usize = 64 * 1024;
pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("cannot resolve registry address {0:?}")]
    Resolve(String),
    #[error(transparent)]
    Encode(#[from] DiscoveryEncodeError),
    #[error("registry i/o: {0}")]
    Io(#[from] std::io::Error),
    #[error("no reply from registry within {0:?}")]
    Timeout(Duration),
}

#[derive(Debug, Clone)]
pub struct RegistryClient {
    registry: SocketAddr,
    query_timeout: Duration,
}

impl RegistryClient {
    pub fn new(registry: SocketAddr) -> Self {
        Self {
            registry,
            query_timeout: DEFAULT_QUERY_TIMEOUT,
        }
    }

    pub fn with_query_timeout(mut self, timeout: Duration) -> Self {
        self.query_timeout = timeout;
        self
    }

    /// Resolve `host` or `host:port`; a bare host gets `default_port`.
    pub async fn resolve(registry: &str, default_port: u16) -> Result<Self, ClientError> {
        if let Ok(ip) = registry.parse::<std::net::IpAddr>() {
            return Ok(Self::new(SocketAddr::new(ip, default_port)));
        }
        let target = if has_port(registry) {
            registry.to_string()
        } else {
            format!("{registry}:{default_port}")
        };
        let addr = tokio::net::lookup_host(&target)
            .await
            .map_err(|_| ClientError::Resolve(registry.to_string()))?
            .next()
            .ok_or_else(|| ClientError::Resolve(registry.to_string()))?;
        Ok(Self::new(addr))
    }

    pub fn registry_addr(&self) -> SocketAddr {
        self.registry
    }

    pub async fn register(&self, item: &str, address: &str, port: u16) -> Result<(), ClientError> {
        self.send(&DiscoveryMessage::Register {
            item: item.to_string(),
            address: address.to_string(),
            port,
        })
        .await
    }

    pub async fn heartbeat(&self, item: &str, address: &str, port: u16) -> Result<(), ClientError> {
        self.send(&DiscoveryMessage::Update {
            item: item.to_string(),
            address: address.to_string(),
            port,
        })
        .await
    }

    /// Sources currently advertising `item`. Empty when the registry knows none.
    pub async fn query(&self, item: &str) -> Result<Vec<PeerAddr>, ClientError> {
        let frame = DiscoveryMessage::Query {
            item: item.to_string(),
        }
        .encode()?;
        let socket = self.socket().await?;
        socket.send_to(&frame, self.registry).await?;
        let mut buf = vec![0u8; RECV_BUF_SIZE];
        let (n, from) = tokio::time::timeout(self.query_timeout, socket.recv_from(&mut buf))
            .await
            .map_err(|_| ClientError::Timeout(self.query_timeout))??;
        tracing::debug!(%from, %item, bytes = n, "registry reply");
        Ok(parse_peer_list(&buf[..n]))
    }

    async fn send(&self, msg: &DiscoveryMessage) -> Result<(), ClientError> {
        let frame = msg.encode()?;
        let socket = self.socket().await?;
        socket.send_to(&frame, self.registry).await?;
        Ok(())
    }

    async fn socket(&self) -> std::io::Result<UdpSocket> {
        let bind: SocketAddr = if self.registry.is_ipv4() {
            ([0, 0, 0, 0], 0).into()
        } else {
            (std::net::Ipv6Addr::UNSPECIFIED, 0).into()
        };
        UdpSocket::bind(bind).await
    }
}

fn has_port(s: &str) -> bool {
    match s.rsplit_once(':') {
        Some((host, _)) => !host.contains(':') || (host.starts_with('[') && host.ends_with(']')),
        None => false,
    }
}
