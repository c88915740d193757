//! Fetch orchestrator: discover sources, fetch every fragment in parallel, assemble, then seed.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use shoal_core::scheduler::assign_fragments;
use shoal_core::{FetchSession, PeerAddr, SessionError, Slot};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::Instrument;

use crate::client::RegistryClient;
use crate::server::{FragmentServer, SeedOptions, ServerError};
use crate::transfer::{fetch_fragment, request_fragment_count, TransferError};

/// Default upper bound on waiting for the whole batch.
pub const DEFAULT_BATCH_TIMEOUT: Duration = Duration::from_secs(60 * 60);

/// Optional observer of download progress.
pub trait ProgressObserver: Send + Sync {
    fn on_progress(&self, percent: u8, status: &str);
}

impl<F> ProgressObserver for F
where
    F: Fn(u8, &str) + Send + Sync,
{
    fn on_progress(&self, percent: u8, status: &str) {
        self(percent, status)
    }
}

pub struct NoProgress;

impl ProgressObserver for NoProgress {
    fn on_progress(&self, _percent: u8, _status: &str) {}
}

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("no sources available for {item}")]
    NoSources { item: String },
    #[error("could not learn fragment count from {peer}: {source}")]
    FragmentCount {
        peer: String,
        source: TransferError,
    },
    #[error("download of {item} incomplete: {source}")]
    Incomplete { item: String, source: SessionError },
    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error(transparent)]
    Serve(#[from] ServerError),
}

#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub item: String,
    pub destination: PathBuf,
}

impl FetchRequest {
    /// Download `item` to a file of the same name.
    pub fn new(item: impl Into<String>) -> Self {
        let item = item.into();
        let destination = PathBuf::from(&item);
        Self { item, destination }
    }

    pub fn with_destination(mut self, destination: impl Into<PathBuf>) -> Self {
        self.destination = destination.into();
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchReport {
    pub destination: PathBuf,
    pub bytes: usize,
    pub fragments: usize,
    pub sources: usize,
}

pub struct FetchOrchestrator {
    registry: RegistryClient,
    batch_timeout: Duration,
    observer: Arc<dyn ProgressObserver>,
}

impl FetchOrchestrator {
    pub fn new(registry: RegistryClient) -> Self {
        Self {
            registry,
            batch_timeout: DEFAULT_BATCH_TIMEOUT,
            observer: Arc::new(NoProgress),
        }
    }

    pub fn with_batch_timeout(mut self, timeout: Duration) -> Self {
        self.batch_timeout = timeout;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn ProgressObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn registry(&self) -> &RegistryClient {
        &self.registry
    }

    /// Query the registry for sources, then download. Writes nothing unless every fragment arrived.
    pub async fn fetch(&self, request: &FetchRequest) -> Result<FetchReport, FetchError> {
        let sources = match self.registry.query(&request.item).await {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(item = %request.item, error = %e, "registry query failed");
                Vec::new()
            }
        };
        self.fetch_from(request, sources).await
    }

    /// Download from an already discovered source list.
    pub async fn fetch_from(
        &self,
        request: &FetchRequest,
        sources: Vec<PeerAddr>,
    ) -> Result<FetchReport, FetchError> {
        let item = request.item.as_str();
        let Some(first) = sources.first().cloned() else {
            self.observer.on_progress(0, "no sources available");
            return Err(FetchError::NoSources {
                item: item.to_string(),
            });
        };
        tracing::info!(%item, sources = sources.len(), "sources discovered");
        self.observer
            .on_progress(0, &format!("found {} sources", sources.len()));

        let count = request_fragment_count(&first)
            .await
            .map_err(|source| FetchError::FragmentCount {
                peer: first.to_string(),
                source,
            })?;
        tracing::info!(%item, peer = %first, fragments = count, "fragment count learned");
        self.observer
            .on_progress(0, &format!("{count} fragments to download"));

        let mut session = FetchSession::new(item, sources, count as usize);
        let span = tracing::info_span!("fetch", %item, session = %session.session_id_string());
        self.fetch_all(&mut session).instrument(span).await;

        let bytes = session.assemble().map_err(|source| {
            tracing::error!(%item, missing = ?session.missing(), "download incomplete");
            self.observer
                .on_progress(session.progress_percent(), "download incomplete");
            FetchError::Incomplete {
                item: item.to_string(),
                source,
            }
        })?;

        tokio::fs::write(&request.destination, &bytes)
            .await
            .map_err(|source| FetchError::Write {
                path: request.destination.clone(),
                source,
            })?;
        tracing::info!(
            %item,
            path = %request.destination.display(),
            bytes = bytes.len(),
            "file downloaded"
        );
        self.observer.on_progress(100, "file downloaded");
        Ok(FetchReport {
            destination: request.destination.clone(),
            bytes: bytes.len(),
            fragments: session.fragment_count(),
            sources: session.sources().len(),
        })
    }

    /// One task per fragment, at most `sources.len()` running at once, bounded overall by the
    /// batch timeout. Tasks still running at the deadline are dropped; their slots stay pending.
    async fn fetch_all(&self, session: &mut FetchSession) {
        let sources = session.sources().to_vec();
        let permits = Arc::new(Semaphore::new(sources.len()));
        let mut tasks = JoinSet::new();
        for (index, peer) in assign_fragments(session.fragment_count(), &sources) {
            let peer = peer.clone();
            let permits = permits.clone();
            tasks.spawn(async move {
                let _permit = permits.acquire_owned().await.ok();
                let outcome = fetch_fragment(&peer, index as u32).await;
                (index, peer, outcome)
            });
        }

        let observer = self.observer.clone();
        let collect = async {
            while let Some(joined) = tasks.join_next().await {
                let (index, peer, outcome) = match joined {
                    Ok(r) => r,
                    Err(e) => {
                        tracing::warn!(error = %e, "fragment task failed");
                        continue;
                    }
                };
                let received = match session.record(index, outcome) {
                    Ok(Slot::Received(bytes)) => Some(bytes.len()),
                    Ok(_) => None,
                    Err(e) => {
                        tracing::warn!(error = %e, "dropping fragment result");
                        continue;
                    }
                };
                let status = match received {
                    Some(len) => {
                        tracing::debug!(index, %peer, bytes = len, "fragment received");
                        format!("fragment {index} received from {peer}")
                    }
                    None => {
                        tracing::warn!(index, %peer, "fragment fetch failed");
                        format!("fragment {index} failed from {peer}")
                    }
                };
                observer.on_progress(session.progress_percent(), &status);
            }
        };
        let finished = tokio::time::timeout(self.batch_timeout, collect).await.is_ok();
        if !finished {
            tracing::warn!(
                timeout = ?self.batch_timeout,
                pending = session.fragment_count() - session.received_count(),
                "batch deadline reached"
            );
        }
        tasks.abort_all();
    }
}

/// Download, then keep serving the file: the downloader becomes a source. Only returns on error.
pub async fn run_download(
    orchestrator: &FetchOrchestrator,
    request: &FetchRequest,
    seed: &SeedOptions,
) -> Result<(), FetchError> {
    let report = orchestrator.fetch(request).await?;
    seed_file(&report.destination, &request.item, seed, orchestrator.registry().clone())
        .await
}

/// Open a fragment server for `path` and run it forever.
pub async fn seed_file(
    path: &Path,
    item: &str,
    seed: &SeedOptions,
    registry: RegistryClient,
) -> Result<(), FetchError> {
    let server = FragmentServer::open(path, item, seed, registry).await?;
    server.run().await;
    Ok(())
}
