use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::snapshot::TopologySnapshot;
use crate::{Remote, Result, TopologyError};

/// Where refresh cycles get the full namespace topology from.
#[async_trait::async_trait]
pub trait TopologySource: Send + Sync + 'static {
    async fn fetch(&self) -> Result<TopologySnapshot>;
}

/// Serves a fixed snapshot. Useful for offline runs and tests.
pub struct StaticTopologySource {
    snapshot: TopologySnapshot,
}

impl StaticTopologySource {
    pub fn new(snapshot: TopologySnapshot) -> Self {
        Self { snapshot }
    }
}

#[async_trait::async_trait]
impl TopologySource for StaticTopologySource {
    async fn fetch(&self) -> Result<TopologySnapshot> {
        Ok(self.snapshot.clone())
    }
}

/// Fetches `GET http://<remote>/topology` as JSON.
///
/// Sticks to the last remote that answered and walks the list round-robin
/// when it stops answering.
pub struct HttpTopologySource {
    remotes: Vec<Remote>,
    client: reqwest::Client,
    current: AtomicUsize,
}

impl HttpTopologySource {
    pub fn new(remotes: Vec<Remote>, timeout: Duration) -> Result<Self> {
        if remotes.is_empty() {
            return Err(TopologyError::InvalidRemote("no remotes configured".to_string()));
        }

        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            remotes,
            client,
            current: AtomicUsize::new(0),
        })
    }

    pub fn remotes(&self) -> &[Remote] {
        &self.remotes
    }

    async fn fetch_from(&self, remote: &Remote) -> Result<TopologySnapshot> {
        let url = format!("http://{}/topology", remote);
        let response = self.client.get(&url).send().await?.error_for_status()?;
        Ok(response.json::<TopologySnapshot>().await?)
    }
}

#[async_trait::async_trait]
impl TopologySource for HttpTopologySource {
    async fn fetch(&self) -> Result<TopologySnapshot> {
        let size = self.remotes.len();
        let start = self.current.load(Ordering::Relaxed) % size;
        let mut last_error = None;

        for offset in 0..size {
            let index = (start + offset) % size;
            let remote = &self.remotes[index];

            tracing::debug!("Fetching topology from {}", remote);
            match self.fetch_from(remote).await {
                Ok(snapshot) => {
                    if index != start {
                        tracing::info!("Switched topology remote to {}", remote);
                    }
                    self.current.store(index, Ordering::Relaxed);
                    return Ok(snapshot);
                }
                Err(e) => {
                    tracing::warn!("Topology fetch from {} failed: {}", remote, e);
                    last_error = Some(e);
                }
            }
        }

        Err(TopologyError::Fetch(format!(
            "no remote answered: {}",
            last_error.map(|e| e.to_string()).unwrap_or_default()
        )))
    }
}
