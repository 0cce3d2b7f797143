use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use storage::{GroupId, GroupSet};

use crate::namespace::NamespaceState;
use crate::{Result, TopologyError};

/// Full topology as returned by the coordination service.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TopologySnapshot {
    pub namespaces: Vec<NamespaceRecord>,
    /// Group lists the coordination service reports as broken.
    #[serde(default)]
    pub bad_groups: Vec<Vec<GroupId>>,
    /// Hot keys and the extra groups holding cached copies of them.
    #[serde(default)]
    pub cache_groups: BTreeMap<String, Vec<GroupId>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamespaceRecord {
    pub name: String,
    #[serde(default)]
    pub settings: NamespaceSettings,
    pub couples: Vec<CoupleRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamespaceSettings {
    /// Number of groups in every couple of the namespace; 0 when unspecified.
    #[serde(default)]
    pub groups_count: usize,
    #[serde(default = "default_success_copies")]
    pub success_copies_num: String,
}

fn default_success_copies() -> String {
    "any".to_string()
}

impl Default for NamespaceSettings {
    fn default() -> Self {
        Self {
            groups_count: 0,
            success_copies_num: default_success_copies(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoupleRecord {
    pub id: String,
    pub groups: Vec<GroupId>,
    #[serde(default)]
    pub weight: u64,
    #[serde(default)]
    pub free_space: u64,
}

/// Immutable, fully validated view of one snapshot.
///
/// Built off to the side and published whole, so readers never see a
/// partially applied refresh.
#[derive(Debug, Clone)]
pub struct Topology {
    namespaces: HashMap<String, NamespaceState>,
    group_index: HashMap<GroupId, String>,
    bad_groups: Vec<Vec<GroupId>>,
    cache_groups: HashMap<String, GroupSet>,
    fetched_at: DateTime<Utc>,
}

impl Topology {
    pub fn empty() -> Self {
        Self {
            namespaces: HashMap::new(),
            group_index: HashMap::new(),
            bad_groups: Vec::new(),
            cache_groups: HashMap::new(),
            fetched_at: Utc::now(),
        }
    }

    pub fn build(snapshot: &TopologySnapshot) -> Result<Self> {
        let mut namespaces = HashMap::new();
        let mut group_index = HashMap::new();

        for record in &snapshot.namespaces {
            let state = NamespaceState::from_record(record.clone())?;

            for couple in state.couples() {
                for group in couple.groups.iter() {
                    if let Some(owner) = group_index.insert(group, state.name().to_string()) {
                        return Err(TopologyError::InvalidSnapshot(format!(
                            "group {} belongs to both {} and {}",
                            group,
                            owner,
                            state.name()
                        )));
                    }
                }
            }

            if namespaces.insert(state.name().to_string(), state).is_some() {
                return Err(TopologyError::InvalidSnapshot(format!(
                    "namespace {} listed twice",
                    record.name
                )));
            }
        }

        let mut cache_groups = HashMap::with_capacity(snapshot.cache_groups.len());
        for (key, groups) in &snapshot.cache_groups {
            let groups = GroupSet::new(groups.iter().copied()).map_err(|e| {
                TopologyError::InvalidSnapshot(format!("cache groups of {}: {}", key, e))
            })?;
            cache_groups.insert(key.clone(), groups);
        }

        Ok(Self {
            namespaces,
            group_index,
            bad_groups: snapshot.bad_groups.clone(),
            cache_groups,
            fetched_at: Utc::now(),
        })
    }

    pub fn find_by_group(&self, group: GroupId) -> Option<&NamespaceState> {
        self.group_index
            .get(&group)
            .and_then(|name| self.namespaces.get(name))
    }

    pub fn get(&self, name: &str) -> Option<&NamespaceState> {
        self.namespaces.get(name)
    }

    pub fn bad_groups(&self) -> &[Vec<GroupId>] {
        &self.bad_groups
    }

    pub fn cache_groups(&self, key: &str) -> Option<&GroupSet> {
        self.cache_groups.get(key)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.namespaces.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.namespaces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.namespaces.is_empty()
    }

    pub fn fetched_at(&self) -> DateTime<Utc> {
        self.fetched_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn couple(id: &str, groups: &[GroupId]) -> CoupleRecord {
        CoupleRecord {
            id: id.to_string(),
            groups: groups.to_vec(),
            weight: 1,
            free_space: 1024,
        }
    }

    fn namespace(name: &str, couples: Vec<CoupleRecord>) -> NamespaceRecord {
        NamespaceRecord {
            name: name.to_string(),
            settings: NamespaceSettings::default(),
            couples,
        }
    }

    #[test]
    fn groups_resolve_to_their_namespace() {
        let snapshot = TopologySnapshot {
            namespaces: vec![
                namespace("default", vec![couple("5:6", &[5, 6])]),
                namespace("photos", vec![couple("7:8", &[7, 8])]),
            ],
            ..Default::default()
        };

        let topology = Topology::build(&snapshot).unwrap();
        assert_eq!(topology.find_by_group(6).unwrap().name(), "default");
        assert_eq!(topology.find_by_group(7).unwrap().name(), "photos");
        assert!(topology.find_by_group(0).is_none());
        assert_eq!(topology.names(), vec!["default".to_string(), "photos".to_string()]);
    }

    #[test]
    fn group_shared_between_namespaces_is_rejected() {
        let snapshot = TopologySnapshot {
            namespaces: vec![
                namespace("a", vec![couple("1:2", &[1, 2])]),
                namespace("b", vec![couple("2:3", &[2, 3])]),
            ],
            ..Default::default()
        };

        assert!(matches!(
            Topology::build(&snapshot),
            Err(TopologyError::InvalidSnapshot(_))
        ));
    }

    #[test]
    fn duplicate_namespace_is_rejected() {
        let snapshot = TopologySnapshot {
            namespaces: vec![
                namespace("a", vec![couple("1:2", &[1, 2])]),
                namespace("a", vec![couple("3:4", &[3, 4])]),
            ],
            ..Default::default()
        };

        assert!(Topology::build(&snapshot).is_err());
    }

    #[test]
    fn wire_format_fills_defaults() {
        let json = r#"{"namespaces":[{"name":"default","couples":[{"id":"5:6","groups":[5,6]}]}]}"#;
        let snapshot: TopologySnapshot = serde_json::from_str(json).unwrap();

        let record = &snapshot.namespaces[0];
        assert_eq!(record.settings.success_copies_num, "any");
        assert_eq!(record.couples[0].weight, 0);
        assert!(snapshot.bad_groups.is_empty());
        assert!(snapshot.cache_groups.is_empty());
    }

    #[test]
    fn bad_and_cache_groups_are_carried() {
        let json = r#"{
            "namespaces": [{"name": "default", "couples": [{"id": "5:6", "groups": [5, 6]}]}],
            "bad_groups": [[9, 10]],
            "cache_groups": {"hot": [11, 12]}
        }"#;
        let snapshot: TopologySnapshot = serde_json::from_str(json).unwrap();

        let topology = Topology::build(&snapshot).unwrap();
        assert_eq!(topology.bad_groups().to_vec(), vec![vec![9, 10]]);
        assert_eq!(topology.cache_groups("hot").unwrap().as_slice(), &[11, 12]);
        assert!(topology.cache_groups("cold").is_none());
    }

    #[test]
    fn cache_group_zero_is_rejected() {
        let mut snapshot = TopologySnapshot::default();
        snapshot.cache_groups.insert("hot".to_string(), vec![0]);

        assert!(matches!(
            Topology::build(&snapshot),
            Err(TopologyError::InvalidSnapshot(_))
        ));
    }
}
