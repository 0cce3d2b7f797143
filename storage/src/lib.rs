mod timestamp;
mod container;
mod group;
mod backend;
mod memory;

pub use timestamp::Timestamp;
pub use container::{DataContainer, EMBED_TIMESTAMP};
pub use group::{GroupId, GroupSet};
pub use backend::GroupBackend;
pub use memory::{MemoryBackend, OperationCounts};

use serde::{Deserialize, Serialize};
use std::fmt;

/// Name of a stored object. Opaque to the proxy; only emptiness is checked.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Key(String);

impl Key {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Key {
    fn from(name: &str) -> Self {
        Self(name.to_string())
    }
}

impl From<String> for Key {
    fn from(name: String) -> Self {
        Self(name)
    }
}

impl From<&String> for Key {
    fn from(name: &String) -> Self {
        Self(name.clone())
    }
}

pub type Result<T> = std::result::Result<T, StorageError>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StorageError {
    #[error("Invalid group id: {0}")]
    InvalidGroup(GroupId),

    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(String),

    #[error("Malformed container: {0}")]
    Malformed(String),
}

/// Failure of one primitive operation against one storage group.
///
/// These never abort a fan-out; the proxy records them per group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum GroupError {
    #[error("Key not found")]
    NotFound,

    #[error("Group unavailable: {0}")]
    Unavailable(String),

    #[error("Timed out after {0}ms")]
    Timeout(u64),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Malformed data: {0}")]
    Malformed(String),
}

impl From<StorageError> for GroupError {
    fn from(err: StorageError) -> Self {
        GroupError::Malformed(err.to_string())
    }
}
