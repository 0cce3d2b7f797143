use crate::config::Config;
use crate::error::Result;
use parking_lot::Mutex;
use proxy::{ProxyConfig, StorageProxy};
use std::sync::Arc;
use std::time::Duration;
use storage::GroupBackend;
use tokio::task::JoinHandle;
use topology::{HttpTopologySource, RefreshConfig, RefreshScheduler, TopologyCache, TopologySource};
use tracing::{error, info};

/// A storage proxy together with the topology cache that feeds it.
///
/// The refresh loop runs on the proxy's worker pool once `start` is called.
pub struct Node {
    config: Config,
    proxy: StorageProxy,
    cache: Arc<TopologyCache>,
    scheduler: Arc<RefreshScheduler>,
    refresh_task: Mutex<Option<JoinHandle<()>>>,
}

impl Node {
    /// Fetches topology from the configured remotes over HTTP.
    pub fn new(config: Config, backend: Arc<dyn GroupBackend>) -> Result<Self> {
        config.validate()?;
        let source = HttpTopologySource::new(
            config.remotes()?,
            Duration::from_millis(config.fetch_timeout),
        )?;
        Self::with_source(config, backend, Arc::new(source))
    }

    pub fn with_source(
        config: Config,
        backend: Arc<dyn GroupBackend>,
        source: Arc<dyn TopologySource>,
    ) -> Result<Self> {
        info!("Initializing node with groups {:?}", config.groups);

        let cache = Arc::new(TopologyCache::new());
        let scheduler = Arc::new(RefreshScheduler::new(
            cache.clone(),
            source,
            RefreshConfig::from(&config),
        ));

        let mut proxy = StorageProxy::new(ProxyConfig::try_from(&config)?, backend)?;
        if let Some(namespace) = &config.namespace {
            info!("Writes without groups are placed in namespace {}", namespace);
            proxy = proxy.with_topology(cache.clone(), namespace.clone());
        }

        Ok(Self {
            config,
            proxy,
            cache,
            scheduler,
            refresh_task: Mutex::new(None),
        })
    }

    /// Starts the topology refresh loop. Calling it again while running is a
    /// no-op; after `shutdown` it starts a new loop.
    pub fn start(&self) {
        let mut task = self.refresh_task.lock();
        if task.is_some() {
            return;
        }

        info!("Starting node services");
        let scheduler = self.scheduler.clone();
        let run = scheduler.current_run();
        *task = Some(self.proxy.handle().spawn(async move {
            if let Err(e) = scheduler.run(run).await {
                error!("Topology refresh loop stopped: {}", e);
            }
        }));
    }

    /// Blocks until the topology cache holds a snapshot or `timeout` passes.
    pub fn wait_until_valid(&self, timeout: Duration) -> bool {
        self.cache.wait_until_valid(timeout)
    }

    pub fn proxy(&self) -> &StorageProxy {
        &self.proxy
    }

    pub fn topology(&self) -> &Arc<TopologyCache> {
        &self.cache
    }

    pub fn scheduler(&self) -> &Arc<RefreshScheduler> {
        &self.scheduler
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn shutdown(&self) {
        if self.refresh_task.lock().take().is_some() {
            info!("Stopping node services");
            self.scheduler.stop();
        }
    }
}

impl Drop for Node {
    fn drop(&mut self) {
        self.shutdown();
    }
}
