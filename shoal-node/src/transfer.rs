//! Transfer calls: one TCP connection per request, answer read until the server closes.

use shoal_core::transfer::{decode_count, CODE_SIZE};
use shoal_core::{FetchOutcome, PeerAddr, TransferRequest};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

/// Refuse fragment payloads larger than this.
pub const MAX_FRAGMENT_LEN: u64 = 64 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("connect to {peer}: {source}")]
    Connect {
        peer: String,
        source: std::io::Error,
    },
    #[error("transfer with {peer}: {source}")]
    Io {
        peer: String,
        source: std::io::Error,
    },
    #[error("{peer} reported {count} fragments")]
    BadCount { peer: String, count: i32 },
}

async fn open(peer: &PeerAddr) -> Result<TcpStream, TransferError> {
    TcpStream::connect((peer.address.as_str(), peer.port))
        .await
        .map_err(|source| TransferError::Connect {
            peer: peer.to_string(),
            source,
        })
}

/// Send one request code and half-close the write side.
async fn send_request(
    stream: &mut TcpStream,
    peer: &PeerAddr,
    request: TransferRequest,
) -> Result<(), TransferError> {
    let io = |source| TransferError::Io {
        peer: peer.to_string(),
        source,
    };
    stream.write_all(&request.encode()).await.map_err(io)?;
    stream.flush().await.map_err(io)?;
    stream.shutdown().await.map_err(io)?;
    Ok(())
}

/// Ask `peer` how many fragments it holds. Non-positive counts are errors.
pub async fn request_fragment_count(peer: &PeerAddr) -> Result<u32, TransferError> {
    let mut stream = open(peer).await?;
    send_request(&mut stream, peer, TransferRequest::FragmentCount).await?;
    let mut buf = [0u8; CODE_SIZE];
    stream
        .read_exact(&mut buf)
        .await
        .map_err(|source| TransferError::Io {
            peer: peer.to_string(),
            source,
        })?;
    let count = decode_count(buf);
    if count <= 0 {
        return Err(TransferError::BadCount {
            peer: peer.to_string(),
            count,
        });
    }
    Ok(count as u32)
}

/// Fetch fragment `index` from `peer`. Any failure, including an empty reply, is `Failed`.
pub async fn fetch_fragment(peer: &PeerAddr, index: u32) -> FetchOutcome {
    match try_fetch_fragment(peer, index).await {
        Ok(bytes) if bytes.is_empty() => FetchOutcome::Failed(format!("{peer} sent no data")),
        Ok(bytes) => FetchOutcome::Fetched(bytes),
        Err(e) => FetchOutcome::Failed(e.to_string()),
    }
}

async fn try_fetch_fragment(peer: &PeerAddr, index: u32) -> Result<Vec<u8>, TransferError> {
    let mut stream = open(peer).await?;
    send_request(&mut stream, peer, TransferRequest::Fragment(index)).await?;
    let mut payload = Vec::new();
    (&mut stream)
        .take(MAX_FRAGMENT_LEN + 1)
        .read_to_end(&mut payload)
        .await
        .map_err(|source| TransferError::Io {
            peer: peer.to_string(),
            source,
        })?;
    if payload.len() as u64 > MAX_FRAGMENT_LEN {
        return Err(TransferError::Io {
            peer: peer.to_string(),
            source: std::io::Error::new(std::io::ErrorKind::InvalidData, "fragment too large"),
        });
    }
    Ok(payload)
}
