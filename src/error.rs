use thiserror::Error;

#[derive(Error, Debug)]
pub enum GroupProxyError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Config parse error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("Proxy error: {0}")]
    Proxy(#[from] proxy::ProxyError),

    #[error("Topology error: {0}")]
    Topology(#[from] topology::TopologyError),
}

pub type Result<T> = std::result::Result<T, GroupProxyError>;
