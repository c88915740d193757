//! Fetch session: one slot per fragment index, all-or-nothing reassembly.

use crate::discovery::PeerAddr;

/// State of one fragment slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Slot {
    Pending,
    Failed,
    Received(Vec<u8>),
}

/// Result of one per-connection fragment fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    Fetched(Vec<u8>),
    Failed(String),
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("fragment index {index} out of range ({count} fragments)")]
    IndexOutOfRange { index: usize, count: usize },
    #[error("{} of {count} fragments missing", missing.len())]
    Incomplete { missing: Vec<usize>, count: usize },
}

/// Per-download state. Each slot is written once by the task that owns its index.
pub struct FetchSession {
    pub session_id: [u8; 16],
    pub item: String,
    sources: Vec<PeerAddr>,
    slots: Vec<Slot>,
}

impl FetchSession {
    pub fn new(item: impl Into<String>, sources: Vec<PeerAddr>, fragment_count: usize) -> Self {
        Self {
            session_id: uuid::Uuid::new_v4().into_bytes(),
            item: item.into(),
            sources,
            slots: vec![Slot::Pending; fragment_count],
        }
    }

    pub fn session_id_string(&self) -> String {
        uuid::Uuid::from_bytes(self.session_id).simple().to_string()
    }

    pub fn sources(&self) -> &[PeerAddr] {
        &self.sources
    }

    pub fn fragment_count(&self) -> usize {
        self.slots.len()
    }

    /// Source assigned to `index` (round-robin).
    pub fn source_for(&self, index: usize) -> Option<&PeerAddr> {
        crate::scheduler::source_for(index, &self.sources)
    }

    pub fn slot(&self, index: usize) -> Option<&Slot> {
        self.slots.get(index)
    }

    /// Record a fetch result. A zero-length payload counts as a failure.
    pub fn record(&mut self, index: usize, outcome: FetchOutcome) -> Result<&Slot, SessionError> {
        let count = self.slots.len();
        let slot = self
            .slots
            .get_mut(index)
            .ok_or(SessionError::IndexOutOfRange { index, count })?;
        *slot = match outcome {
            FetchOutcome::Fetched(bytes) if !bytes.is_empty() => Slot::Received(bytes),
            FetchOutcome::Fetched(_) | FetchOutcome::Failed(_) => Slot::Failed,
        };
        Ok(&*slot)
    }

    /// True once no slot is pending.
    pub fn is_complete(&self) -> bool {
        !self.slots.iter().any(|s| matches!(s, Slot::Pending))
    }

    /// Indices that are pending or failed.
    pub fn missing(&self) -> Vec<usize> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, s)| !matches!(s, Slot::Received(_)))
            .map(|(i, _)| i)
            .collect()
    }

    pub fn received_count(&self) -> usize {
        self.slots
            .iter()
            .filter(|s| matches!(s, Slot::Received(_)))
            .count()
    }

    pub fn progress_percent(&self) -> u8 {
        if self.slots.is_empty() {
            return 100;
        }
        ((self.received_count() * 100) / self.slots.len()) as u8
    }

    /// Concatenate fragments in index order. Fails without partial output if any slot is missing.
    pub fn assemble(&self) -> Result<Vec<u8>, SessionError> {
        let missing = self.missing();
        if !missing.is_empty() {
            return Err(SessionError::Incomplete {
                missing,
                count: self.slots.len(),
            });
        }
        let total: usize = self
            .slots
            .iter()
            .map(|s| match s {
                Slot::Received(b) => b.len(),
                _ => 0,
            })
            .sum();
        let mut out = Vec::with_capacity(total);
        for slot in &self.slots {
            if let Slot::Received(bytes) = slot {
                out.extend_from_slice(bytes);
            }
        }
        Ok(out)
    }
}
