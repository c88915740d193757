//! Load config from file and environment, and set up tracing.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use crate::transfer::MAX_FRAGMENT_LEN;

/// Node configuration. File: ~/.config/shoal/config.toml or /etc/shoal/config.toml.
/// Env overrides: SHOAL_REGISTRY_PORT, SHOAL_PEER_TIMEOUT_SECS, SHOAL_HEARTBEAT_SECS,
/// SHOAL_FETCH_TIMEOUT_SECS, SHOAL_FRAGMENT_SIZE, SHOAL_LOG.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Registry UDP port (default 5000).
    #[serde(default = "default_registry_port")]
    pub registry_port: u16,
    /// Evict a source after this long without a heartbeat (default 60).
    #[serde(default = "default_peer_timeout_secs")]
    pub peer_timeout_secs: u64,
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,
    /// Maximum fragment size in bytes (default 512 KiB, at most 64 MiB).
    #[serde(default = "default_fragment_size")]
    pub fragment_size: usize,
    /// Upper bound on waiting for a whole batch of fragments (default one hour).
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
    #[serde(default = "default_query_timeout_secs")]
    pub query_timeout_secs: u64,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_registry_port() -> u16 {
    shoal_core::REGISTRY_PORT
}
fn default_peer_timeout_secs() -> u64 {
    shoal_core::DEFAULT_PEER_TIMEOUT.as_secs()
}
fn default_sweep_interval_secs() -> u64 {
    shoal_core::DEFAULT_SWEEP_INTERVAL.as_secs()
}
fn default_heartbeat_interval_secs() -> u64 {
    30
}
fn default_fragment_size() -> usize {
    shoal_core::DEFAULT_FRAGMENT_SIZE
}
fn default_fetch_timeout_secs() -> u64 {
    60 * 60
}
fn default_query_timeout_secs() -> u64 {
    5
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            registry_port: default_registry_port(),
            peer_timeout_secs: default_peer_timeout_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
            fragment_size: default_fragment_size(),
            fetch_timeout_secs: default_fetch_timeout_secs(),
            query_timeout_secs: default_query_timeout_secs(),
            log_level: default_log_level(),
        }
    }
}

impl Config {
    pub fn peer_timeout(&self) -> Duration {
        Duration::from_secs(self.peer_timeout_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs.max(1))
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.query_timeout_secs.max(1))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("{path}: fragment_size {size} exceeds {max} bytes")]
    FragmentSize { path: PathBuf, size: usize, max: u64 },
}

/// Load config: merge default, then config file (if present), then env vars.
/// A present but broken config file is logged and ignored.
pub fn load() -> Config {
    let mut c = match load_file() {
        Ok(Some(c)) => c,
        Ok(None) => Config::default(),
        Err(e) => {
            eprintln!("shoal: {e}; using defaults");
            Config::default()
        }
    };
    apply_env(&mut c, |key| std::env::var(key).ok());
    c
}

fn apply_env(c: &mut Config, var: impl Fn(&str) -> Option<String>) {
    if let Some(p) = var("SHOAL_REGISTRY_PORT").and_then(|s| s.parse::<u16>().ok()) {
        c.registry_port = p;
    }
    if let Some(s) = var("SHOAL_PEER_TIMEOUT_SECS").and_then(|s| s.parse::<u64>().ok()) {
        c.peer_timeout_secs = s;
    }
    if let Some(s) = var("SHOAL_HEARTBEAT_SECS").and_then(|s| s.parse::<u64>().ok()) {
        c.heartbeat_interval_secs = s;
    }
    if let Some(s) = var("SHOAL_FETCH_TIMEOUT_SECS").and_then(|s| s.parse::<u64>().ok()) {
        c.fetch_timeout_secs = s;
    }
    if let Some(n) = var("SHOAL_FRAGMENT_SIZE").and_then(|s| s.parse::<usize>().ok()) {
        if fragment_size_fits(n) {
            c.fragment_size = n;
        } else {
            eprintln!("shoal: SHOAL_FRAGMENT_SIZE {n} exceeds {MAX_FRAGMENT_LEN} bytes; ignored");
        }
    }
    if let Some(level) = var("SHOAL_LOG") {
        c.log_level = level;
    }
}

fn fragment_size_fits(size: usize) -> bool {
    size as u64 <= MAX_FRAGMENT_LEN
}

fn config_paths() -> Vec<PathBuf> {
    let home = std::env::var_os("HOME").map(PathBuf::from);
    let mut out = Vec::new();
    if let Some(h) = home {
        out.push(h.join(".config/shoal/config.toml"));
    }
    out.push(PathBuf::from("/etc/shoal/config.toml"));
    out
}

fn load_file() -> Result<Option<Config>, ConfigError> {
    match config_paths().into_iter().find(|p| p.exists()) {
        Some(p) => load_from(&p).map(Some),
        None => Ok(None),
    }
}

pub fn load_from(path: &Path) -> Result<Config, ConfigError> {
    let s = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let c = toml::from_str::<Config>(&s).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    if !fragment_size_fits(c.fragment_size) {
        return Err(ConfigError::FragmentSize {
            path: path.to_path_buf(),
            size: c.fragment_size,
            max: MAX_FRAGMENT_LEN,
        });
    }
    Ok(c)
}

/// Install the global subscriber. Priority: RUST_LOG, then the configured level, then info.
pub fn init_tracing(config: &Config) {
    let env_filter = std::env::var("RUST_LOG")
        .ok()
        .unwrap_or_else(|| config.log_level.clone());

    let filter = EnvFilter::try_new(env_filter).unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_thread_names(false)
        .compact()
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_match_protocol_constants() {
        let c = Config::default();
        assert_eq!(c.registry_port, 5000);
        assert_eq!(c.peer_timeout(), Duration::from_secs(60));
        assert_eq!(c.fragment_size, 512 * 1024);
        assert_eq!(c.fetch_timeout(), Duration::from_secs(3600));
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "registry_port = 6000\nheartbeat_interval_secs = 5\n").unwrap();
        let c = load_from(&path).unwrap();
        assert_eq!(c.registry_port, 6000);
        assert_eq!(c.heartbeat_interval(), Duration::from_secs(5));
        assert_eq!(c.peer_timeout_secs, 60);
    }

    #[test]
    fn unknown_field_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "proxy_port = 3128\n").unwrap();
        assert!(matches!(load_from(&path), Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn oversized_fragment_size_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, format!("fragment_size = {}\n", MAX_FRAGMENT_LEN + 1)).unwrap();
        assert!(matches!(load_from(&path), Err(ConfigError::FragmentSize { .. })));

        std::fs::write(&path, format!("fragment_size = {}\n", MAX_FRAGMENT_LEN)).unwrap();
        assert_eq!(load_from(&path).unwrap().fragment_size as u64, MAX_FRAGMENT_LEN);

        let mut c = Config::default();
        let too_big = (MAX_FRAGMENT_LEN + 1).to_string();
        apply_env(&mut c, |k| (k == "SHOAL_FRAGMENT_SIZE").then(|| too_big.clone()));
        assert_eq!(c.fragment_size, shoal_core::DEFAULT_FRAGMENT_SIZE);
    }

    #[test]
    fn env_overrides_file() {
        let vars: HashMap<&str, &str> = [
            ("SHOAL_REGISTRY_PORT", "7000"),
            ("SHOAL_FRAGMENT_SIZE", "1024"),
            ("SHOAL_PEER_TIMEOUT_SECS", "nope"),
            ("SHOAL_LOG", "debug"),
        ]
        .into_iter()
        .collect();
        let mut c = Config::default();
        apply_env(&mut c, |k| vars.get(k).map(|v| v.to_string()));
        assert_eq!(c.registry_port, 7000);
        assert_eq!(c.fragment_size, 1024);
        assert_eq!(c.peer_timeout_secs, 60);
        assert_eq!(c.log_level, "debug");
    }
}
