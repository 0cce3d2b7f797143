//! In-process storage groups.
//!
//! Every registered group keeps its own key map. Groups can be failed and
//! restored at runtime, and every primitive call is counted, which is what the
//! selftest command and the proxy tests rely on.

use bytes::Bytes;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use crate::{GroupBackend, GroupError, GroupId, Key};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OperationCounts {
    pub writes: u64,
    pub reads: u64,
    pub removes: u64,
}

#[derive(Default)]
struct Counters {
    writes: AtomicU64,
    reads: AtomicU64,
    removes: AtomicU64,
}

pub struct MemoryBackend {
    groups: Arc<RwLock<HashMap<GroupId, HashMap<Key, Bytes>>>>,
    failed: Arc<RwLock<HashSet<GroupId>>>,
    delays: Arc<RwLock<HashMap<GroupId, Duration>>>,
    counters: Counters,
}

impl MemoryBackend {
    pub fn new(groups: impl IntoIterator<Item = GroupId>) -> Self {
        let groups = groups.into_iter().map(|g| (g, HashMap::new())).collect();

        Self {
            groups: Arc::new(RwLock::new(groups)),
            failed: Arc::new(RwLock::new(HashSet::new())),
            delays: Arc::new(RwLock::new(HashMap::new())),
            counters: Counters::default(),
        }
    }

    /// Every subsequent operation on `group` fails with `Unavailable`.
    pub async fn fail_group(&self, group: GroupId) {
        tracing::info!("Memory backend: marking group {} as failed", group);
        self.failed.write().await.insert(group);
    }

    pub async fn restore_group(&self, group: GroupId) {
        tracing::info!("Memory backend: restoring group {}", group);
        self.failed.write().await.remove(&group);
    }

    /// Delay every operation against `group`.
    pub async fn set_delay(&self, group: GroupId, delay: Duration) {
        self.delays.write().await.insert(group, delay);
    }

    pub async fn contains(&self, group: GroupId, key: &Key) -> bool {
        let groups = self.groups.read().await;
        groups
            .get(&group)
            .map(|objects| objects.contains_key(key))
            .unwrap_or(false)
    }

    pub async fn object_count(&self, group: GroupId) -> usize {
        let groups = self.groups.read().await;
        groups.get(&group).map(|objects| objects.len()).unwrap_or(0)
    }

    pub fn operation_counts(&self) -> OperationCounts {
        OperationCounts {
            writes: self.counters.writes.load(Ordering::SeqCst),
            reads: self.counters.reads.load(Ordering::SeqCst),
            removes: self.counters.removes.load(Ordering::SeqCst),
        }
    }

    async fn check_group(&self, group: GroupId) -> Result<(), GroupError> {
        let delay = self.delays.read().await.get(&group).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if self.failed.read().await.contains(&group) {
            return Err(GroupError::Unavailable(format!("group {} is down", group)));
        }

        if !self.groups.read().await.contains_key(&group) {
            return Err(GroupError::Unavailable(format!("unknown group {}", group)));
        }

        Ok(())
    }
}

#[async_trait::async_trait]
impl GroupBackend for MemoryBackend {
    async fn write(&self, group: GroupId, key: &Key, data: Bytes) -> Result<(), GroupError> {
        self.counters.writes.fetch_add(1, Ordering::SeqCst);
        self.check_group(group).await?;

        let mut groups = self.groups.write().await;
        let objects = groups
            .get_mut(&group)
            .ok_or_else(|| GroupError::Unavailable(format!("unknown group {}", group)))?;

        tracing::trace!("Memory backend: wrote {} ({} bytes) to group {}", key, data.len(), group);
        objects.insert(key.clone(), data);
        Ok(())
    }

    async fn read(&self, group: GroupId, key: &Key) -> Result<Bytes, GroupError> {
        self.counters.reads.fetch_add(1, Ordering::SeqCst);
        self.check_group(group).await?;

        let groups = self.groups.read().await;
        groups
            .get(&group)
            .and_then(|objects| objects.get(key))
            .cloned()
            .ok_or(GroupError::NotFound)
    }

    async fn remove(&self, group: GroupId, key: &Key) -> Result<(), GroupError> {
        self.counters.removes.fetch_add(1, Ordering::SeqCst);
        self.check_group(group).await?;

        let mut groups = self.groups.write().await;
        match groups.get_mut(&group).and_then(|objects| objects.remove(key)) {
            Some(_) => Ok(()),
            None => Err(GroupError::NotFound),
        }
    }
}
