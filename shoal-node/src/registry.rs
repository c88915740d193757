//! Registry: UDP receive loop over the peer table, plus a periodic sweep of stale sources.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use shoal_core::{encode_peer_list, DiscoveryMessage, PeerTable};
use tokio::net::UdpSocket;
use tokio::sync::Mutex;

/// Large enough for any discovery datagram.
const RECV_BUF_SIZE: usize = 64 * 1024;

/// Pause after a failed receive, doubling per consecutive failure up to the cap.
const RECV_RETRY_BASE: Duration = Duration::from_millis(10);
const RECV_RETRY_MAX: Duration = Duration::from_secs(1);

/// Peer table shared by the receive loop and the sweep ticker.
pub type SharedPeerTable = Arc<Mutex<PeerTable>>;

pub struct Registry {
    socket: UdpSocket,
    table: SharedPeerTable,
    sweep_interval: Duration,
}

impl Registry {
    pub async fn bind(
        addr: SocketAddr,
        peer_timeout: Duration,
        sweep_interval: Duration,
    ) -> std::io::Result<Self> {
        let socket = UdpSocket::bind(addr).await?;
        Ok(Self {
            socket,
            table: Arc::new(Mutex::new(PeerTable::with_timeout(peer_timeout))),
            sweep_interval,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn table(&self) -> SharedPeerTable {
        self.table.clone()
    }

    /// Run the sweep ticker and the receive loop. Only returns if the sweep task dies.
    pub async fn run(self) -> std::io::Result<()> {
        let addr = self.socket.local_addr()?;
        let timeout = self.table.lock().await.timeout();
        tracing::info!(%addr, ?timeout, "registry listening");

        let sweep_table = self.table.clone();
        let interval = self.sweep_interval;
        let sweep_task = tokio::spawn(async move { sweep_loop(sweep_table, interval).await });

        let recv_task = recv_loop(self.socket, self.table);
        tokio::select! {
            _ = recv_task => {}
            res = sweep_task => {
                if let Err(e) = res {
                    tracing::error!(error = %e, "sweep task stopped");
                }
            }
        }
        Ok(())
    }
}

async fn recv_loop(socket: UdpSocket, table: SharedPeerTable) {
    let mut buf = vec![0u8; RECV_BUF_SIZE];
    let mut failures = 0u32;
    loop {
        let (n, from) = match socket.recv_from(&mut buf).await {
            Ok(r) => {
                failures = 0;
                r
            }
            Err(e) => {
                let delay = recv_backoff(failures);
                failures = failures.saturating_add(1);
                tracing::warn!(error = %e, ?delay, "registry recv failed");
                tokio::time::sleep(delay).await;
                continue;
            }
        };
        let Some(reply) = handle_datagram(&table, &buf[..n], from, Instant::now()).await else {
            continue;
        };
        if let Err(e) = socket.send_to(&reply, from).await {
            tracing::warn!(%from, error = %e, "failed to send query response");
        }
    }
}

fn recv_backoff(failures: u32) -> Duration {
    RECV_RETRY_BASE
        .saturating_mul(1u32 << failures.min(16))
        .min(RECV_RETRY_MAX)
}

/// Apply one datagram to the table. Returns the reply to send back, if any.
/// Malformed datagrams are logged and dropped.
pub async fn handle_datagram(
    table: &Mutex<PeerTable>,
    bytes: &[u8],
    from: SocketAddr,
    now: Instant,
) -> Option<Vec<u8>> {
    let msg = match DiscoveryMessage::parse(bytes) {
        Ok(m) => m,
        Err(e) => {
            tracing::warn!(%from, error = %e, "dropping malformed discovery message");
            return None;
        }
    };
    tracing::debug!(%from, %msg, "discovery message");
    match msg {
        DiscoveryMessage::Register {
            item,
            address,
            port,
        } => {
            table.lock().await.register(&item, &address, port, now);
            tracing::info!(%item, peer = %format_args!("{address}:{port}"), "source registered");
            None
        }
        DiscoveryMessage::Update {
            item,
            address,
            port,
        } => {
            let known = table.lock().await.heartbeat(&item, &address, port, now);
            if !known {
                tracing::debug!(%item, peer = %format_args!("{address}:{port}"), "heartbeat from unknown source ignored");
            }
            None
        }
        DiscoveryMessage::Query { item } => {
            let peers = table.lock().await.query(&item);
            tracing::info!(%item, %from, sources = peers.len(), "query answered");
            Some(encode_peer_list(&peers))
        }
    }
}

async fn sweep_loop(table: SharedPeerTable, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        let evicted = table.lock().await.sweep(Instant::now());
        for record in evicted {
            tracing::info!(item = %record.item, peer = %record.endpoint(), "removed stale source");
        }
    }
}
