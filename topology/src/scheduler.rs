use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{watch, Notify};

use crate::cache::TopologyCache;
use crate::persist;
use crate::snapshot::Topology;
use crate::source::TopologySource;
use crate::{RefreshConfig, Result};

type UpdateCallback = Box<dyn Fn(bool) + Send + Sync>;

/// Periodically pulls the topology and publishes it into a `TopologyCache`.
///
/// A failed cycle keeps the previous snapshot and retries after the same
/// interval. `force_update` cuts the current wait short. `stop` ends the
/// running loop; a later `start` runs a fresh one.
pub struct RefreshScheduler {
    cache: Arc<TopologyCache>,
    source: Arc<dyn TopologySource>,
    config: RefreshConfig,
    trigger: Notify,
    /// Bumped by `stop`; a loop runs while the value it started with is current.
    stop: watch::Sender<u64>,
    on_update: Mutex<Option<UpdateCallback>>,
    completed_cycles: AtomicU64,
    failed_cycles: AtomicU64,
}

impl RefreshScheduler {
    pub fn new(
        cache: Arc<TopologyCache>,
        source: Arc<dyn TopologySource>,
        config: RefreshConfig,
    ) -> Self {
        let (stop, _) = watch::channel(0);

        Self {
            cache,
            source,
            config,
            trigger: Notify::new(),
            stop,
            on_update: Mutex::new(None),
            completed_cycles: AtomicU64::new(0),
            failed_cycles: AtomicU64::new(0),
        }
    }

    pub fn cache(&self) -> &Arc<TopologyCache> {
        &self.cache
    }

    /// Runs until `stop` is called.
    pub async fn start(&self) -> Result<()> {
        self.run(self.current_run()).await
    }

    /// The run a `stop` issued from now on would end. Take it before
    /// spawning `run` so an early `stop` is not missed.
    pub fn current_run(&self) -> u64 {
        *self.stop.borrow()
    }

    /// Refresh loop for `run`; returns at once if that run was already stopped.
    pub async fn run(&self, run: u64) -> Result<()> {
        tracing::info!(
            "Starting topology refresh, update period is {:?}",
            self.config.refresh_interval
        );

        let mut stop = self.stop.subscribe();
        self.restore().await;

        loop {
            if *stop.borrow_and_update() != run {
                break;
            }

            let succeeded = self.refresh_once().await.is_ok();
            self.notify_update(succeeded);

            tokio::select! {
                _ = tokio::time::sleep(self.config.refresh_interval) => {}
                _ = self.trigger.notified() => {
                    tracing::debug!("Topology refresh forced");
                }
                _ = stop.changed() => {}
            }
        }

        tracing::info!("Topology refresh stopped");
        Ok(())
    }

    /// One fetch-and-publish cycle.
    pub async fn refresh_once(&self) -> Result<()> {
        let started = Instant::now();

        let fetched = self.source.fetch().await;
        let outcome = fetched.and_then(|snapshot| {
            let topology = Topology::build(&snapshot)?;
            Ok((snapshot, topology))
        });

        match outcome {
            Ok((snapshot, topology)) => {
                let namespaces = topology.len();
                self.cache.publish(topology);
                self.completed_cycles.fetch_add(1, Ordering::Relaxed);

                if let Some(path) = &self.config.cache_path {
                    if let Err(e) = persist::store_snapshot(path, &snapshot).await {
                        tracing::warn!("Failed to store topology cache at {:?}: {}", path, e);
                    }
                }

                tracing::info!(
                    "Topology refreshed: {} namespaces in {} ms",
                    namespaces,
                    started.elapsed().as_millis()
                );
                Ok(())
            }
            Err(e) => {
                self.failed_cycles.fetch_add(1, Ordering::Relaxed);
                tracing::error!("Topology refresh failed: {}", e);
                self.warn_if_stale();
                Err(e)
            }
        }
    }

    pub fn force_update(&self) {
        self.trigger.notify_one();
    }

    pub fn stop(&self) {
        self.stop.send_modify(|run| *run = run.wrapping_add(1));
    }

    /// Called after every cycle with whether it succeeded.
    pub fn set_update_callback(&self, callback: impl Fn(bool) + Send + Sync + 'static) {
        *self.on_update.lock() = Some(Box::new(callback));
    }

    pub fn completed_cycles(&self) -> u64 {
        self.completed_cycles.load(Ordering::Relaxed)
    }

    pub fn failed_cycles(&self) -> u64 {
        self.failed_cycles.load(Ordering::Relaxed)
    }

    async fn restore(&self) {
        let path = match &self.config.cache_path {
            Some(path) => path,
            None => return,
        };

        match persist::load_snapshot(path).await {
            Ok(Some(snapshot)) => match Topology::build(&snapshot) {
                Ok(topology) => {
                    tracing::info!(
                        "Restored {} namespaces from {:?}",
                        topology.len(),
                        path
                    );
                    self.cache.publish(topology);
                }
                Err(e) => tracing::warn!("Ignoring cached topology at {:?}: {}", path, e),
            },
            Ok(None) => tracing::debug!("No topology cache at {:?}", path),
            Err(e) => tracing::warn!("Cannot read topology cache at {:?}: {}", path, e),
        }
    }

    fn warn_if_stale(&self) {
        if let Some(age) = self.cache.age() {
            if age > self.config.warning_time {
                tracing::warn!(
                    "Topology cache is stale: last successful refresh {}s ago",
                    age.as_secs()
                );
            }
        }
    }

    fn notify_update(&self, succeeded: bool) {
        if let Some(callback) = self.on_update.lock().as_ref() {
            callback(succeeded);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::{CoupleRecord, NamespaceRecord, NamespaceSettings, TopologySnapshot};
    use crate::TopologyError;
    use std::sync::atomic::AtomicBool;
    use std::time::Duration;

    /// Serves `snapshot` unless `failing` is set.
    struct FlakySource {
        snapshot: TopologySnapshot,
        failing: AtomicBool,
        calls: AtomicU64,
    }

    #[async_trait::async_trait]
    impl TopologySource for FlakySource {
        async fn fetch(&self) -> Result<TopologySnapshot> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.failing.load(Ordering::SeqCst) {
                return Err(TopologyError::Fetch("coordination service down".to_string()));
            }
            Ok(self.snapshot.clone())
        }
    }

    fn flaky(failing: bool) -> Arc<FlakySource> {
        Arc::new(FlakySource {
            snapshot: TopologySnapshot {
                namespaces: vec![NamespaceRecord {
                    name: "default".to_string(),
                    settings: NamespaceSettings::default(),
                    couples: vec![CoupleRecord {
                        id: "5:6".to_string(),
                        groups: vec![5, 6],
                        weight: 1,
                        free_space: 1,
                    }],
                }],
                ..Default::default()
            },
            failing: AtomicBool::new(failing),
            calls: AtomicU64::new(0),
        })
    }

    fn config() -> RefreshConfig {
        RefreshConfig {
            refresh_interval: Duration::from_millis(20),
            ..RefreshConfig::default()
        }
    }

    #[tokio::test]
    async fn failed_first_refresh_leaves_cache_invalid() {
        let cache = Arc::new(TopologyCache::new());
        let scheduler = RefreshScheduler::new(cache.clone(), flaky(true), config());

        assert!(scheduler.refresh_once().await.is_err());
        assert!(!cache.is_valid());
        assert_eq!(scheduler.failed_cycles(), 1);
    }

    #[tokio::test]
    async fn failed_refresh_keeps_previous_snapshot() {
        let cache = Arc::new(TopologyCache::new());
        let source = flaky(false);
        let scheduler = RefreshScheduler::new(cache.clone(), source.clone(), config());

        scheduler.refresh_once().await.unwrap();
        source.failing.store(true, Ordering::SeqCst);
        assert!(scheduler.refresh_once().await.is_err());

        assert!(cache.is_valid());
        assert_eq!(cache.find_namespace_state(5).unwrap().name(), "default");
    }

    #[tokio::test]
    async fn loop_retries_until_source_recovers() {
        let cache = Arc::new(TopologyCache::new());
        let source = flaky(true);
        let scheduler = Arc::new(RefreshScheduler::new(cache.clone(), source.clone(), config()));

        let outcomes = Arc::new(Mutex::new(Vec::new()));
        {
            let outcomes = outcomes.clone();
            scheduler.set_update_callback(move |ok| outcomes.lock().push(ok));
        }

        let task = {
            let scheduler = scheduler.clone();
            tokio::spawn(async move { scheduler.start().await })
        };

        tokio::time::sleep(Duration::from_millis(70)).await;
        assert!(!cache.is_valid());

        source.failing.store(false, Ordering::SeqCst);
        scheduler.force_update();
        tokio::time::timeout(Duration::from_secs(5), async {
            while !cache.is_valid() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        scheduler.stop();
        task.await.unwrap().unwrap();

        let outcomes = outcomes.lock();
        assert_eq!(outcomes.first(), Some(&false));
        assert!(outcomes.contains(&true));
        assert!(source.calls.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn cache_file_is_written_and_restored() {
        let dir = tempfile::tempdir().unwrap();
        let config = RefreshConfig {
            cache_path: Some(dir.path().join("topology.cache")),
            ..config()
        };

        let first = RefreshScheduler::new(Arc::new(TopologyCache::new()), flaky(false), config.clone());
        first.refresh_once().await.unwrap();

        let cache = Arc::new(TopologyCache::new());
        let second = Arc::new(RefreshScheduler::new(cache.clone(), flaky(true), config));
        let run = second.current_run();
        second.stop();
        second.run(run).await.unwrap();

        assert!(cache.is_valid());
        assert_eq!(cache.find_namespace_state(6).unwrap().name(), "default");
    }

    #[tokio::test]
    async fn start_after_stop_runs_again() {
        let cache = Arc::new(TopologyCache::new());
        let scheduler = Arc::new(RefreshScheduler::new(cache.clone(), flaky(false), config()));

        for round in 1..=2u64 {
            let task = {
                let scheduler = scheduler.clone();
                tokio::spawn(async move { scheduler.start().await })
            };

            tokio::time::timeout(Duration::from_secs(5), async {
                while scheduler.completed_cycles() < round * 2 {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
            })
            .await
            .unwrap();

            scheduler.stop();
            tokio::time::timeout(Duration::from_secs(5), task)
                .await
                .unwrap()
                .unwrap()
                .unwrap();
        }

        assert!(cache.is_valid());
    }
}
