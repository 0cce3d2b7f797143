use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use storage::GroupId;

use crate::namespace::NamespaceState;
use crate::snapshot::Topology;
use crate::{Result, TopologyError};

/// Most recently published topology plus a validity flag.
///
/// One writer (the refresh scheduler) swaps whole snapshots in; readers load
/// the current `Arc` without taking a lock. Once valid the cache stays valid:
/// failed refreshes leave the previous snapshot in place.
pub struct TopologyCache {
    current: ArcSwap<Topology>,
    valid: AtomicBool,
    ready: Mutex<bool>,
    ready_signal: Condvar,
}

impl TopologyCache {
    pub fn new() -> Self {
        Self {
            current: ArcSwap::from_pointee(Topology::empty()),
            valid: AtomicBool::new(false),
            ready: Mutex::new(false),
            ready_signal: Condvar::new(),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.valid.load(Ordering::Acquire)
    }

    /// Namespace owning `group`, from the latest published snapshot.
    pub fn find_namespace_state(&self, group: GroupId) -> Result<NamespaceState> {
        self.current
            .load()
            .find_by_group(group)
            .cloned()
            .ok_or_else(|| TopologyError::NamespaceNotFound(format!("group {}", group)))
    }

    pub fn get_namespace_state(&self, name: &str) -> Result<NamespaceState> {
        self.current
            .load()
            .get(name)
            .cloned()
            .ok_or_else(|| TopologyError::NamespaceNotFound(name.to_string()))
    }

    pub fn namespaces(&self) -> Vec<String> {
        self.current.load().names()
    }

    pub fn bad_groups(&self) -> Vec<Vec<GroupId>> {
        self.current.load().bad_groups().to_vec()
    }

    /// Groups holding cached copies of `key`; empty when it has none.
    pub fn get_cache_groups(&self, key: &str) -> Vec<GroupId> {
        self.current
            .load()
            .cache_groups(key)
            .map(|groups| groups.iter().collect())
            .unwrap_or_default()
    }

    pub fn snapshot(&self) -> Arc<Topology> {
        self.current.load_full()
    }

    /// Time of the last successful publication, `None` while invalid.
    pub fn last_update(&self) -> Option<DateTime<Utc>> {
        if self.is_valid() {
            Some(self.current.load().fetched_at())
        } else {
            None
        }
    }

    pub fn age(&self) -> Option<Duration> {
        self.last_update()
            .map(|at| (Utc::now() - at).to_std().unwrap_or(Duration::ZERO))
    }

    /// Replace the published snapshot and mark the cache valid.
    pub fn publish(&self, topology: Topology) {
        let namespaces = topology.len();
        self.current.store(Arc::new(topology));

        let mut ready = self.ready.lock();
        if !*ready {
            tracing::info!("Topology cache became valid with {} namespaces", namespaces);
        }
        *ready = true;
        self.valid.store(true, Ordering::Release);
        self.ready_signal.notify_all();
    }

    /// Block until the cache is valid or `timeout` passes. Returns validity.
    pub fn wait_until_valid(&self, timeout: Duration) -> bool {
        if self.is_valid() {
            return true;
        }

        let mut ready = self.ready.lock();
        if !*ready {
            self.ready_signal
                .wait_while_for(&mut ready, |ready| !*ready, timeout);
        }
        *ready
    }
}

impl Default for TopologyCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::{CoupleRecord, NamespaceRecord, NamespaceSettings, TopologySnapshot};
    use std::thread;

    fn topology(name: &str, groups: &[GroupId]) -> Topology {
        Topology::build(&TopologySnapshot {
            namespaces: vec![NamespaceRecord {
                name: name.to_string(),
                settings: NamespaceSettings::default(),
                couples: vec![CoupleRecord {
                    id: "c".to_string(),
                    groups: groups.to_vec(),
                    weight: 1,
                    free_space: 1,
                }],
            }],
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn empty_cache_is_invalid_and_finds_nothing() {
        let cache = TopologyCache::new();

        assert!(!cache.is_valid());
        assert!(cache.last_update().is_none());
        assert!(matches!(
            cache.find_namespace_state(5),
            Err(TopologyError::NamespaceNotFound(_))
        ));
    }

    #[test]
    fn publish_makes_cache_valid() {
        let cache = TopologyCache::new();
        cache.publish(topology("default", &[5, 6]));

        assert!(cache.is_valid());
        assert_eq!(cache.find_namespace_state(5).unwrap().name(), "default");
        assert!(matches!(
            cache.find_namespace_state(0),
            Err(TopologyError::NamespaceNotFound(_))
        ));
        assert_eq!(cache.get_namespace_state("default").unwrap().name(), "default");
        assert!(cache.last_update().is_some());
    }

    #[test]
    fn held_state_survives_republication() {
        let cache = TopologyCache::new();
        cache.publish(topology("old", &[1]));
        let held = cache.find_namespace_state(1).unwrap();

        cache.publish(topology("new", &[1]));

        assert_eq!(held.name(), "old");
        assert_eq!(cache.find_namespace_state(1).unwrap().name(), "new");
    }

    #[test]
    fn bad_and_cache_groups_follow_the_published_snapshot() {
        let cache = TopologyCache::new();
        assert!(cache.bad_groups().is_empty());
        assert!(cache.get_cache_groups("hot").is_empty());

        let mut snapshot = TopologySnapshot::default();
        snapshot.bad_groups = vec![vec![3, 4]];
        snapshot.cache_groups.insert("hot".to_string(), vec![7, 8]);
        cache.publish(Topology::build(&snapshot).unwrap());

        assert_eq!(cache.bad_groups(), vec![vec![3, 4]]);
        assert_eq!(cache.get_cache_groups("hot"), vec![7, 8]);
        assert!(cache.get_cache_groups("cold").is_empty());
    }

    #[test]
    fn wait_until_valid_times_out_then_wakes() {
        let cache = Arc::new(TopologyCache::new());
        assert!(!cache.wait_until_valid(Duration::from_millis(20)));

        let writer = {
            let cache = cache.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(50));
                cache.publish(topology("default", &[5]));
            })
        };

        assert!(cache.wait_until_valid(Duration::from_secs(5)));
        writer.join().unwrap();
    }
}
