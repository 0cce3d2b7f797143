use futures::future::join_all;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use storage::{DataContainer, GroupBackend, GroupError, GroupId, GroupSet, Key};
use tokio::runtime::{Builder, Handle, Runtime};
use topology::TopologyCache;
use uuid::Uuid;

use crate::handle::AsyncHandle;
use crate::result::{OperationResult, WriteResultSet};
use crate::{ProxyConfig, ProxyError, ReadOptions, Result, SuccessCopies, WriteOptions};

/// Namespace whose couples decide where writes without explicit groups land.
struct Placement {
    cache: Arc<TopologyCache>,
    namespace: String,
}

impl Placement {
    fn pick(&self, size: u64, fallback: &GroupSet) -> Result<GroupSet> {
        if !self.cache.is_valid() {
            tracing::warn!(
                "Topology not loaded yet, writing to configured groups {}",
                fallback
            );
            return Ok(fallback.clone());
        }

        let state = self.cache.get_namespace_state(&self.namespace)?;
        let couple = state.pick_couple(size)?;
        tracing::debug!(
            "Placed {} bytes on couple {} of namespace {}",
            size,
            couple.id,
            self.namespace
        );
        Ok(couple.groups.clone())
    }
}

/// Replicating front end over a set of storage groups.
///
/// Every operation fans out one sub-operation per target group onto the
/// proxy's worker pool and joins them in group order. The blocking methods
/// are the async ones followed by `AsyncHandle::get`.
pub struct StorageProxy {
    config: ProxyConfig,
    backend: Arc<dyn GroupBackend>,
    placement: Option<Placement>,
    handle: Handle,
    runtime: Option<Runtime>,
}

impl StorageProxy {
    /// Starts a dedicated worker pool of `config.worker_threads` threads.
    pub fn new(config: ProxyConfig, backend: Arc<dyn GroupBackend>) -> Result<Self> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(config.worker_threads.max(1))
            .thread_name("proxy-worker")
            .enable_all()
            .build()
            .map_err(|e| ProxyError::Runtime(e.to_string()))?;
        let handle = runtime.handle().clone();

        tracing::info!(
            "Storage proxy started with {} workers, default groups {}",
            config.worker_threads.max(1),
            config.groups
        );

        Ok(Self {
            config,
            backend,
            placement: None,
            handle,
            runtime: Some(runtime),
        })
    }

    /// Runs sub-operations on an existing runtime instead of owning one.
    pub fn with_handle(config: ProxyConfig, backend: Arc<dyn GroupBackend>, handle: Handle) -> Self {
        Self {
            config,
            backend,
            placement: None,
            handle,
            runtime: None,
        }
    }

    /// Place writes without explicit groups on a couple of `namespace`.
    pub fn with_topology(mut self, cache: Arc<TopologyCache>, namespace: impl Into<String>) -> Self {
        self.placement = Some(Placement {
            cache,
            namespace: namespace.into(),
        });
        self
    }

    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }

    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    pub fn write(
        &self,
        key: impl Into<Key>,
        data: impl Into<DataContainer>,
        options: WriteOptions,
    ) -> Result<WriteResultSet> {
        self.write_async(key, data, options).get()
    }

    /// Writes `data` to every target group.
    ///
    /// Per-group failures are entries of the result set; only a malformed
    /// request fails the handle. A container without a timestamp is stored
    /// as its bare payload.
    pub fn write_async(
        &self,
        key: impl Into<Key>,
        data: impl Into<DataContainer>,
        options: WriteOptions,
    ) -> AsyncHandle<WriteResultSet> {
        let key = key.into();
        let data = data.into();
        let size = data.payload().len() as u64;
        let groups = match check_key(&key).and_then(|_| self.write_targets(size, &options)) {
            Ok(groups) => groups,
            Err(e) => return AsyncHandle::ready(Err(e)),
        };

        let request_id = Uuid::new_v4();
        let packed = data.pack();
        let backend = self.backend.clone();
        let timeout = self.config.wait_timeout;
        let policy = self.config.success_copies;

        tracing::debug!(
            "[{}] write {} ({} bytes) to groups {}",
            request_id,
            key,
            packed.len(),
            groups
        );

        AsyncHandle::spawn(&self.handle, async move {
            let outcomes = fan_out(&groups, timeout, |group| {
                let backend = backend.clone();
                let key = key.clone();
                let packed = packed.clone();
                async move { backend.write(group, &key, packed).await }
            })
            .await;

            Ok(write_results(request_id, &key, &groups, outcomes, policy))
        })
    }

    pub fn bulk_write<K, D>(
        &self,
        entries: impl IntoIterator<Item = (K, D)>,
        options: WriteOptions,
    ) -> Result<BTreeMap<Key, WriteResultSet>>
    where
        K: Into<Key>,
        D: Into<DataContainer>,
    {
        self.bulk_write_async(entries, options).get()
    }

    /// Writes several keys to the same target groups in one request.
    ///
    /// Targets are resolved once for the whole batch. An empty key rejects
    /// the batch before anything is written; a repeated key keeps its last
    /// value.
    pub fn bulk_write_async<K, D>(
        &self,
        entries: impl IntoIterator<Item = (K, D)>,
        options: WriteOptions,
    ) -> AsyncHandle<BTreeMap<Key, WriteResultSet>>
    where
        K: Into<Key>,
        D: Into<DataContainer>,
    {
        let mut batch = BTreeMap::new();
        for (key, data) in entries {
            let key = key.into();
            if let Err(e) = check_key(&key) {
                return AsyncHandle::ready(Err(e));
            }
            let data: DataContainer = data.into();
            batch.insert(key, data.pack());
        }
        if batch.is_empty() {
            return AsyncHandle::ready(Ok(BTreeMap::new()));
        }

        let size = batch.values().map(|packed| packed.len() as u64).sum();
        let groups = match self.write_targets(size, &options) {
            Ok(groups) => groups,
            Err(e) => return AsyncHandle::ready(Err(e)),
        };

        let request_id = Uuid::new_v4();
        let backend = self.backend.clone();
        let timeout = self.config.wait_timeout;
        let policy = self.config.success_copies;

        tracing::debug!(
            "[{}] bulk write of {} keys to groups {}",
            request_id,
            batch.len(),
            groups
        );

        AsyncHandle::spawn(&self.handle, async move {
            let writes = batch.into_iter().map(|(key, packed)| {
                let backend = backend.clone();
                let groups = groups.clone();
                async move {
                    let outcomes = fan_out(&groups, timeout, |group| {
                        let backend = backend.clone();
                        let key = key.clone();
                        let packed = packed.clone();
                        async move { backend.write(group, &key, packed).await }
                    })
                    .await;
                    let results = write_results(request_id, &key, &groups, outcomes, policy);
                    (key, results)
                }
            });

            Ok(join_all(writes).await.into_iter().collect())
        })
    }

    pub fn read(&self, key: impl Into<Key>, options: ReadOptions) -> Result<DataContainer> {
        self.read_first_async(key, options).get()
    }

    /// Tries the target groups one at a time and returns the first copy found.
    ///
    /// Without explicit groups the first configured group is tried first and
    /// the rest in random order.
    pub fn read_first_async(&self, key: impl Into<Key>, options: ReadOptions) -> AsyncHandle<DataContainer> {
        let key = key.into();
        let groups = match check_key(&key).and_then(|_| self.read_targets(&options)) {
            Ok(groups) => groups,
            Err(e) => return AsyncHandle::ready(Err(e)),
        };

        let request_id = Uuid::new_v4();
        let backend = self.backend.clone();
        let timeout = self.config.wait_timeout;
        let embedded = options.embedded;

        tracing::debug!("[{}] read {} from first of {}", request_id, key, groups);

        AsyncHandle::spawn(&self.handle, async move {
            first_copy(request_id, &*backend, &groups, &key, embedded, timeout)
                .await
                .ok_or_else(|| ProxyError::KeyNotFound(format!("{} in groups {}", key, groups)))
        })
    }

    pub fn bulk_read<K: Into<Key>>(
        &self,
        keys: impl IntoIterator<Item = K>,
        options: ReadOptions,
    ) -> Result<BTreeMap<Key, DataContainer>> {
        self.bulk_read_async(keys, options).get()
    }

    /// Reads several keys, each from the first target group holding it.
    ///
    /// Keys found nowhere are absent from the returned map.
    pub fn bulk_read_async<K: Into<Key>>(
        &self,
        keys: impl IntoIterator<Item = K>,
        options: ReadOptions,
    ) -> AsyncHandle<BTreeMap<Key, DataContainer>> {
        let mut batch = Vec::new();
        for key in keys {
            let key = key.into();
            if let Err(e) = check_key(&key) {
                return AsyncHandle::ready(Err(e));
            }
            batch.push(key);
        }
        if batch.is_empty() {
            return AsyncHandle::ready(Ok(BTreeMap::new()));
        }

        let groups = match self.read_targets(&options) {
            Ok(groups) => groups,
            Err(e) => return AsyncHandle::ready(Err(e)),
        };

        let request_id = Uuid::new_v4();
        let backend = self.backend.clone();
        let timeout = self.config.wait_timeout;
        let embedded = options.embedded;

        tracing::debug!(
            "[{}] bulk read of {} keys from groups {}",
            request_id,
            batch.len(),
            groups
        );

        AsyncHandle::spawn(&self.handle, async move {
            let reads = batch.into_iter().map(|key| {
                let backend = backend.clone();
                let groups = groups.clone();
                tokio::spawn(async move {
                    let found = first_copy(request_id, &*backend, &groups, &key, embedded, timeout).await;
                    found.map(|container| (key, container))
                })
            });

            let mut containers = BTreeMap::new();
            for joined in join_all(reads).await {
                match joined {
                    Ok(Some((key, container))) => {
                        containers.insert(key, container);
                    }
                    Ok(None) => {}
                    Err(e) => tracing::warn!("[{}] bulk read task aborted: {}", request_id, e),
                }
            }
            Ok(containers)
        })
    }

    /// Reads every target group concurrently.
    ///
    /// Groups that fail to answer are left out of the returned sequence.
    pub fn read_async(&self, key: impl Into<Key>, options: ReadOptions) -> AsyncHandle<Vec<DataContainer>> {
        let key = key.into();
        let groups = match check_key(&key).and_then(|_| self.read_targets(&options)) {
            Ok(groups) => groups,
            Err(e) => return AsyncHandle::ready(Err(e)),
        };

        let request_id = Uuid::new_v4();
        let backend = self.backend.clone();
        let timeout = self.config.wait_timeout;
        let embedded = options.embedded;

        tracing::debug!("[{}] read {} from groups {}", request_id, key, groups);

        AsyncHandle::spawn(&self.handle, async move {
            let outcomes = fan_out(&groups, timeout, |group| {
                let backend = backend.clone();
                let key = key.clone();
                async move { read_one(&*backend, group, &key, embedded).await }
            })
            .await;

            let mut containers = Vec::with_capacity(groups.len());
            for (group, outcome) in groups.iter().zip(outcomes) {
                match outcome {
                    Ok(container) => containers.push(container),
                    Err(GroupError::NotFound) => {
                        tracing::debug!("[{}] {} not in group {}", request_id, key, group);
                    }
                    Err(e) => {
                        tracing::warn!(
                            "[{}] read of {} from group {} failed: {}",
                            request_id,
                            key,
                            group,
                            e
                        );
                    }
                }
            }
            Ok(containers)
        })
    }

    pub fn remove(&self, key: impl Into<Key>, groups: Option<GroupSet>) -> Result<()> {
        self.remove_async(key, groups).get()
    }

    /// Removes the key from every target group. A group that never held the
    /// key counts as removed; other failures are logged.
    pub fn remove_async(&self, key: impl Into<Key>, groups: Option<GroupSet>) -> AsyncHandle<()> {
        let key = key.into();
        let groups = groups.unwrap_or_else(|| self.config.groups.clone());
        if let Err(e) = check_key(&key).and_then(|_| check_groups(&groups)) {
            return AsyncHandle::ready(Err(e));
        }

        let request_id = Uuid::new_v4();
        let backend = self.backend.clone();
        let timeout = self.config.wait_timeout;

        tracing::debug!("[{}] remove {} from groups {}", request_id, key, groups);

        AsyncHandle::spawn(&self.handle, async move {
            let outcomes = fan_out(&groups, timeout, |group| {
                let backend = backend.clone();
                let key = key.clone();
                async move { backend.remove(group, &key).await }
            })
            .await;

            for (group, outcome) in groups.iter().zip(outcomes) {
                match outcome {
                    Ok(()) | Err(GroupError::NotFound) => {}
                    Err(e) => tracing::warn!(
                        "[{}] remove of {} from group {} failed: {}",
                        request_id,
                        key,
                        group,
                        e
                    ),
                }
            }
            Ok(())
        })
    }

    fn write_targets(&self, size: u64, options: &WriteOptions) -> Result<GroupSet> {
        let groups = match (&options.groups, &self.placement) {
            (Some(groups), _) => groups.clone(),
            (None, Some(placement)) => placement.pick(size, &self.config.groups)?,
            (None, None) => self.config.groups.clone(),
        };
        let count = options.replication_count.unwrap_or(self.config.replication_count);
        let groups = groups.truncated(count);

        check_groups(&groups)?;
        Ok(groups)
    }

    fn read_targets(&self, options: &ReadOptions) -> Result<GroupSet> {
        let groups = match &options.groups {
            Some(groups) => groups.clone(),
            None => self.config.groups.with_shuffled_tail(),
        };

        check_groups(&groups)?;
        Ok(groups)
    }
}

impl Drop for StorageProxy {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

fn check_key(key: &Key) -> Result<()> {
    if key.is_empty() {
        return Err(ProxyError::InvalidRequest("key is empty".to_string()));
    }
    Ok(())
}

fn check_groups(groups: &GroupSet) -> Result<()> {
    if groups.is_empty() {
        return Err(ProxyError::InvalidRequest("no target groups".to_string()));
    }
    Ok(())
}

/// Walks `groups` in order and returns the first copy of `key`.
async fn first_copy(
    request_id: Uuid,
    backend: &dyn GroupBackend,
    groups: &GroupSet,
    key: &Key,
    embedded: bool,
    timeout: Duration,
) -> Option<DataContainer> {
    for group in groups.iter() {
        match bounded(timeout, read_one(backend, group, key, embedded)).await {
            Ok(container) => {
                tracing::debug!("[{}] read {} served by group {}", request_id, key, group);
                return Some(container);
            }
            Err(GroupError::NotFound) => {
                tracing::debug!("[{}] {} not in group {}", request_id, key, group);
            }
            Err(e) => {
                tracing::warn!(
                    "[{}] read of {} from group {} failed: {}",
                    request_id,
                    key,
                    group,
                    e
                );
            }
        }
    }
    None
}

fn write_results(
    request_id: Uuid,
    key: &Key,
    groups: &GroupSet,
    outcomes: Vec<std::result::Result<(), GroupError>>,
    policy: SuccessCopies,
) -> WriteResultSet {
    let results = groups
        .iter()
        .zip(outcomes)
        .map(|(group, outcome)| {
            if let Err(e) = &outcome {
                tracing::warn!(
                    "[{}] write of {} to group {} failed: {}",
                    request_id,
                    key,
                    group,
                    e
                );
            }
            OperationResult::new(group, outcome)
        })
        .collect();
    let results = WriteResultSet::new(results);

    if !results.satisfies(policy) {
        tracing::warn!(
            "[{}] write of {} reached {} of {} groups, below the {} policy",
            request_id,
            key,
            results.success_count(),
            results.len(),
            policy
        );
    }
    results
}

async fn read_one(
    backend: &dyn GroupBackend,
    group: GroupId,
    key: &Key,
    embedded: bool,
) -> std::result::Result<DataContainer, GroupError> {
    let raw = backend.read(group, key).await?;
    Ok(DataContainer::unpack(raw, embedded)?)
}

async fn bounded<T>(
    timeout: Duration,
    work: impl Future<Output = std::result::Result<T, GroupError>>,
) -> std::result::Result<T, GroupError> {
    if timeout.is_zero() {
        return work.await;
    }
    tokio::time::timeout(timeout, work)
        .await
        .unwrap_or_else(|_| Err(GroupError::Timeout(timeout.as_millis() as u64)))
}

/// One task per group; outcomes come back in `groups` order.
async fn fan_out<T, F, Fut>(
    groups: &GroupSet,
    timeout: Duration,
    op: F,
) -> Vec<std::result::Result<T, GroupError>>
where
    F: Fn(GroupId) -> Fut,
    Fut: Future<Output = std::result::Result<T, GroupError>> + Send + 'static,
    T: Send + 'static,
{
    let tasks = groups
        .iter()
        .map(|group| tokio::spawn(bounded(timeout, op(group))));

    join_all(tasks)
        .await
        .into_iter()
        .map(|joined| match joined {
            Ok(outcome) => outcome,
            Err(e) => Err(GroupError::Unavailable(format!("sub-operation aborted: {}", e))),
        })
        .collect()
}
