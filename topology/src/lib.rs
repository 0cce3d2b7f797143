mod namespace;
mod snapshot;
mod cache;
mod scheduler;
mod source;
mod persist;

pub use namespace::{Couple, NamespaceState};
pub use snapshot::{CoupleRecord, NamespaceRecord, NamespaceSettings, Topology, TopologySnapshot};
pub use cache::TopologyCache;
pub use scheduler::RefreshScheduler;
pub use source::{HttpTopologySource, StaticTopologySource, TopologySource};
pub use persist::{load_snapshot, store_snapshot};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Endpoint of the coordination service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Remote {
    pub host: String,
    pub port: u16,
}

impl Remote {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for Remote {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for Remote {
    type Err = TopologyError;

    fn from_str(s: &str) -> Result<Self> {
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| TopologyError::InvalidRemote(s.to_string()))?;
        if host.is_empty() {
            return Err(TopologyError::InvalidRemote(s.to_string()));
        }
        let port = port
            .parse::<u16>()
            .map_err(|e| TopologyError::InvalidRemote(format!("{}: {}", s, e)))?;
        Ok(Self::new(host, port))
    }
}

#[derive(Debug, Clone)]
pub struct RefreshConfig {
    pub refresh_interval: Duration,
    pub fetch_timeout: Duration,
    pub warning_time: Duration,
    pub cache_path: Option<PathBuf>,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            refresh_interval: Duration::from_secs(60),
            fetch_timeout: Duration::from_secs(4),
            warning_time: Duration::from_secs(300),
            cache_path: None,
        }
    }
}

pub type Result<T> = std::result::Result<T, TopologyError>;

#[derive(Debug, thiserror::Error)]
pub enum TopologyError {
    #[error("Namespace not found: {0}")]
    NamespaceNotFound(String),

    #[error("Couple not found in namespace {0}")]
    CoupleNotFound(String),

    #[error("No couple with {requested} bytes of free space in namespace {namespace}")]
    NotEnoughSpace { namespace: String, requested: u64 },

    #[error("Invalid snapshot: {0}")]
    InvalidSnapshot(String),

    #[error("Invalid remote: {0}")]
    InvalidRemote(String),

    #[error("Fetch failed: {0}")]
    Fetch(String),

    #[error("Cache file error: {0}")]
    CacheFile(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<bincode::Error> for TopologyError {
    fn from(err: bincode::Error) -> Self {
        TopologyError::CacheFile(err.to_string())
    }
}

impl From<reqwest::Error> for TopologyError {
    fn from(err: reqwest::Error) -> Self {
        TopologyError::Fetch(err.to_string())
    }
}
