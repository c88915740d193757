//! Peer table: which (address, port) advertises which item, and when it was last heard from.
//! Host-driven: callers pass the current instant; no timers here.

use std::collections::HashMap;
use std::fmt;
use std::time::{Duration, Instant};

/// Source considered stale if no registration or heartbeat for this long.
pub const DEFAULT_PEER_TIMEOUT: Duration = Duration::from_secs(60);
/// How often the host should call `sweep`.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// Table key. At most one record per pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PeerKey {
    pub address: String,
    pub port: u16,
}

impl fmt::Display for PeerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.address, self.port)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerRecord {
    pub address: String,
    pub port: u16,
    pub item: String,
    pub last_seen: Instant,
    seq: u64,
}

impl PeerRecord {
    /// `address:port`, the form returned by queries.
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }
}

pub struct PeerTable {
    records: HashMap<PeerKey, PeerRecord>,
    timeout: Duration,
    next_seq: u64,
}

impl PeerTable {
    pub fn new() -> Self {
        Self::with_timeout(DEFAULT_PEER_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            records: HashMap::new(),
            timeout,
            next_seq: 0,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Insert or overwrite the record for (address, port), even if it advertised another item.
    pub fn register(&mut self, item: &str, address: &str, port: u16, now: Instant) {
        let seq = self.next_seq;
        self.next_seq += 1;
        let key = PeerKey {
            address: address.to_string(),
            port,
        };
        self.records.insert(
            key,
            PeerRecord {
                address: address.to_string(),
                port,
                item: item.to_string(),
                last_seen: now,
                seq,
            },
        );
    }

    /// Refresh last-seen for an existing record. Returns false (and does nothing) when absent.
    /// The item field is not consulted; the record is keyed by (address, port) only.
    pub fn heartbeat(&mut self, _item: &str, address: &str, port: u16, now: Instant) -> bool {
        let key = PeerKey {
            address: address.to_string(),
            port,
        };
        match self.records.get_mut(&key) {
            Some(record) => {
                record.last_seen = now;
                true
            }
            None => false,
        }
    }

    /// Every current `address:port` advertising `item`, in insertion order.
    pub fn query(&self, item: &str) -> Vec<String> {
        let mut matching: Vec<&PeerRecord> =
            self.records.values().filter(|r| r.item == item).collect();
        matching.sort_by_key(|r| r.seq);
        matching.iter().map(|r| r.endpoint()).collect()
    }

    /// Remove records whose age exceeds the timeout. Returns the evicted records.
    pub fn sweep(&mut self, now: Instant) -> Vec<PeerRecord> {
        let timeout = self.timeout;
        let stale: Vec<PeerKey> = self
            .records
            .iter()
            .filter(|(_, r)| now.saturating_duration_since(r.last_seen) > timeout)
            .map(|(k, _)| k.clone())
            .collect();
        let mut evicted: Vec<PeerRecord> = stale
            .iter()
            .filter_map(|k| self.records.remove(k))
            .collect();
        evicted.sort_by_key(|r| r.seq);
        evicted
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl Default for PeerTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_returns_registered_peer() {
        let mut table = PeerTable::new();
        let now = Instant::now();
        table.register("movie.mkv", "10.0.0.1", 6000, now);
        assert_eq!(table.query("movie.mkv"), vec!["10.0.0.1:6000".to_string()]);
    }

    #[test]
    fn query_unknown_item_is_empty() {
        let mut table = PeerTable::new();
        table.register("a", "10.0.0.1", 6000, Instant::now());
        assert!(table.query("b").is_empty());
    }

    #[test]
    fn query_keeps_insertion_order() {
        let mut table = PeerTable::new();
        let now = Instant::now();
        table.register("f", "10.0.0.3", 1, now);
        table.register("f", "10.0.0.1", 2, now);
        table.register("g", "10.0.0.9", 3, now);
        table.register("f", "10.0.0.2", 3, now);
        assert_eq!(
            table.query("f"),
            vec!["10.0.0.3:1", "10.0.0.1:2", "10.0.0.2:3"]
        );
    }

    #[test]
    fn stale_peer_is_swept() {
        let mut table = PeerTable::with_timeout(Duration::from_secs(60));
        let t0 = Instant::now();
        table.register("f", "10.0.0.1", 6000, t0);

        assert!(table.sweep(t0 + Duration::from_secs(60)).is_empty());
        assert_eq!(table.query("f").len(), 1);

        let evicted = table.sweep(t0 + Duration::from_secs(61));
        assert_eq!(evicted.len(), 1);
        assert_eq!(evicted[0].endpoint(), "10.0.0.1:6000");
        assert!(table.query("f").is_empty());
        assert!(table.is_empty());
    }

    #[test]
    fn heartbeat_keeps_peer_alive() {
        let mut table = PeerTable::with_timeout(Duration::from_secs(10));
        let t0 = Instant::now();
        table.register("f", "10.0.0.1", 6000, t0);
        for s in [5u64, 10, 15, 20] {
            assert!(table.heartbeat("f", "10.0.0.1", 6000, t0 + Duration::from_secs(s)));
            table.sweep(t0 + Duration::from_secs(s + 1));
        }
        assert_eq!(table.query("f").len(), 1);
        table.sweep(t0 + Duration::from_secs(31));
        assert!(table.query("f").is_empty());
    }

    #[test]
    fn heartbeat_without_record_is_noop() {
        let mut table = PeerTable::new();
        assert!(!table.heartbeat("f", "10.0.0.1", 6000, Instant::now()));
        assert!(table.is_empty());
        assert!(table.query("f").is_empty());
    }

    #[test]
    fn reregister_replaces_item() {
        let mut table = PeerTable::new();
        let now = Instant::now();
        table.register("old", "10.0.0.1", 6000, now);
        table.register("new", "10.0.0.1", 6000, now);
        assert_eq!(table.len(), 1);
        assert!(table.query("old").is_empty());
        assert_eq!(table.query("new"), vec!["10.0.0.1:6000"]);
    }

    #[test]
    fn same_address_different_port_are_distinct() {
        let mut table = PeerTable::new();
        let now = Instant::now();
        table.register("f", "10.0.0.1", 6000, now);
        table.register("f", "10.0.0.1", 6001, now);
        assert_eq!(table.query("f").len(), 2);
    }
}
