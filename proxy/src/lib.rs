mod result;
mod handle;
mod engine;

pub use result::{OperationResult, WriteResultSet};
pub use handle::AsyncHandle;
pub use engine::StorageProxy;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use storage::GroupSet;

/// How many successful group writes a caller should consider a good write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SuccessCopies {
    #[default]
    Any,
    Quorum,
    All,
}

impl SuccessCopies {
    pub fn required(&self, targeted: usize) -> usize {
        match self {
            SuccessCopies::Any => targeted.min(1),
            SuccessCopies::Quorum => targeted / 2 + 1,
            SuccessCopies::All => targeted,
        }
    }
}

impl FromStr for SuccessCopies {
    type Err = ProxyError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "any" => Ok(SuccessCopies::Any),
            "quorum" => Ok(SuccessCopies::Quorum),
            "all" => Ok(SuccessCopies::All),
            other => Err(ProxyError::InvalidRequest(format!(
                "unknown success copies policy: {}",
                other
            ))),
        }
    }
}

impl fmt::Display for SuccessCopies {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SuccessCopies::Any => "any",
            SuccessCopies::Quorum => "quorum",
            SuccessCopies::All => "all",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Targets of calls that name no groups of their own.
    pub groups: GroupSet,
    /// Bound on each group-level sub-operation; zero disables it.
    pub wait_timeout: Duration,
    pub worker_threads: usize,
    /// Cap on the number of groups a write targets; zero means all of them.
    pub replication_count: usize,
    pub success_copies: SuccessCopies,
}

impl ProxyConfig {
    pub fn new(groups: GroupSet) -> Self {
        Self {
            groups,
            wait_timeout: Duration::from_secs(5),
            worker_threads: 4,
            replication_count: 0,
            success_copies: SuccessCopies::Any,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct WriteOptions {
    pub groups: Option<GroupSet>,
    pub replication_count: Option<usize>,
}

impl WriteOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn groups(mut self, groups: GroupSet) -> Self {
        self.groups = Some(groups);
        self
    }

    pub fn replication_count(mut self, count: usize) -> Self {
        self.replication_count = Some(count);
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct ReadOptions {
    pub groups: Option<GroupSet>,
    /// Parse the embed section stored in front of a timestamped payload.
    /// Off (the default) returns the stored object verbatim.
    pub embedded: bool,
}

impl ReadOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn groups(mut self, groups: GroupSet) -> Self {
        self.groups = Some(groups);
        self
    }

    pub fn embedded(mut self, embedded: bool) -> Self {
        self.embedded = embedded;
        self
    }
}

pub type Result<T> = std::result::Result<T, ProxyError>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProxyError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Key not found: {0}")]
    KeyNotFound(String),

    #[error("Namespace not found: {0}")]
    NamespaceNotFound(String),

    #[error("Placement failed: {0}")]
    Placement(String),

    #[error("Operation aborted: {0}")]
    Aborted(String),

    #[error("Runtime error: {0}")]
    Runtime(String),
}

impl From<topology::TopologyError> for ProxyError {
    fn from(err: topology::TopologyError) -> Self {
        match err {
            topology::TopologyError::NamespaceNotFound(name) => ProxyError::NamespaceNotFound(name),
            other => ProxyError::Placement(other.to_string()),
        }
    }
}
