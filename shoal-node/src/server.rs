//! Fragment server: hold one file's fragments, serve them over TCP, advertise to the registry.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use shoal_core::transfer::{encode_count, reply_for, TransferReply, CODE_SIZE};
use shoal_core::{FragmentSet, TransferRequest};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use crate::client::RegistryClient;
use crate::transfer::MAX_FRAGMENT_LEN;

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("failed to read {path}: {source}")]
    ReadFile {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to listen on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },
    #[error("fragment size {size} exceeds the {max} byte limit fetchers accept")]
    FragmentSize { size: usize, max: u64 },
}

/// Where to listen and what to tell the registry.
#[derive(Debug, Clone)]
pub struct SeedOptions {
    pub bind: SocketAddr,
    /// Address peers should dial.
    pub address: String,
    /// Port peers should dial; 0 means the port actually bound.
    pub port: u16,
    pub fragment_size: usize,
    pub heartbeat_interval: Duration,
}

/// The (item, address, port) triple sent in REGISTER and UPDATE.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advertisement {
    pub item: String,
    pub address: String,
    pub port: u16,
}

pub struct FragmentServer {
    listener: TcpListener,
    fragments: Arc<FragmentSet>,
    advertisement: Advertisement,
    registry: RegistryClient,
    heartbeat_interval: Duration,
}

impl FragmentServer {
    /// Read and split `path`, then bind. Nothing is sent to the registry until `run`.
    pub async fn open(
        path: &Path,
        item: &str,
        opts: &SeedOptions,
        registry: RegistryClient,
    ) -> Result<Self, ServerError> {
        if opts.fragment_size as u64 > MAX_FRAGMENT_LEN {
            return Err(ServerError::FragmentSize {
                size: opts.fragment_size,
                max: MAX_FRAGMENT_LEN,
            });
        }
        let data = tokio::fs::read(path)
            .await
            .map_err(|source| ServerError::ReadFile {
                path: path.to_path_buf(),
                source,
            })?;
        let fragments = FragmentSet::split(data, opts.fragment_size);
        tracing::info!(
            path = %path.display(),
            bytes = fragments.total_len(),
            fragments = fragments.len(),
            "file split into fragments"
        );
        let listener = TcpListener::bind(opts.bind)
            .await
            .map_err(|source| ServerError::Bind {
                addr: opts.bind,
                source,
            })?;
        let port = match opts.port {
            0 => listener
                .local_addr()
                .map_err(|source| ServerError::Bind {
                    addr: opts.bind,
                    source,
                })?
                .port(),
            p => p,
        };
        Ok(Self {
            listener,
            fragments: Arc::new(fragments),
            advertisement: Advertisement {
                item: item.to_string(),
                address: opts.address.clone(),
                port,
            },
            registry,
            heartbeat_interval: opts.heartbeat_interval,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn fragment_count(&self) -> usize {
        self.fragments.len()
    }

    pub fn advertisement(&self) -> &Advertisement {
        &self.advertisement
    }

    /// Register once, start the heartbeat ticker, then accept forever.
    pub async fn run(self) {
        let ad = self.advertisement.clone();
        match self.registry.register(&ad.item, &ad.address, ad.port).await {
            Ok(()) => tracing::info!(item = %ad.item, registry = %self.registry.registry_addr(), "registered with registry"),
            Err(e) => tracing::warn!(item = %ad.item, error = %e, "failed to register with registry"),
        }

        let heartbeat = tokio::spawn(heartbeat_loop(
            self.registry.clone(),
            ad.clone(),
            self.heartbeat_interval,
        ));

        match self.listener.local_addr() {
            Ok(addr) => tracing::info!(%addr, item = %ad.item, "fragment server listening"),
            Err(e) => tracing::warn!(error = %e, "fragment server has no local address"),
        }
        accept_loop(self.listener, self.fragments).await;
        heartbeat.abort();
    }
}

async fn heartbeat_loop(registry: RegistryClient, ad: Advertisement, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        match registry.heartbeat(&ad.item, &ad.address, ad.port).await {
            Ok(()) => tracing::debug!(item = %ad.item, "sent heartbeat to registry"),
            Err(e) => tracing::warn!(item = %ad.item, error = %e, "failed to send heartbeat"),
        }
    }
}

async fn accept_loop(listener: TcpListener, fragments: Arc<FragmentSet>) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                tracing::debug!(%peer, "client connected");
                let fragments = fragments.clone();
                tokio::spawn(async move {
                    if let Err(e) = serve_connection(stream, &fragments).await {
                        tracing::warn!(%peer, error = %e, "error handling client request");
                    }
                });
            }
            Err(e) => {
                tracing::warn!(error = %e, "accept failed");
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        }
    }
}

/// Answer exactly one request on `stream`, then close it.
pub async fn serve_connection(
    mut stream: TcpStream,
    fragments: &FragmentSet,
) -> std::io::Result<()> {
    let mut code = [0u8; CODE_SIZE];
    stream.read_exact(&mut code).await?;
    let request = TransferRequest::decode(code);
    match reply_for(request, fragments.len()) {
        TransferReply::Count(count) => {
            stream.write_all(&encode_count(count)).await?;
            tracing::debug!(count, "sent fragment count");
        }
        TransferReply::Fragment(index) => {
            if let Some(bytes) = fragments.get(index) {
                stream.write_all(bytes).await?;
                tracing::debug!(index, bytes = bytes.len(), "sent fragment");
            }
        }
        TransferReply::Empty => {
            tracing::warn!(code = request.code(), fragments = fragments.len(), "invalid fragment request; closing");
        }
    }
    stream.flush().await?;
    stream.shutdown().await
}
