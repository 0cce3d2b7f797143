use rand::Rng;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use storage::{GroupId, GroupSet};

use crate::snapshot::{NamespaceRecord, NamespaceSettings};
use crate::{Result, TopologyError};

#[derive(Debug, Clone, PartialEq)]
pub struct Couple {
    pub id: String,
    pub groups: GroupSet,
    pub weight: u64,
    pub free_space: u64,
}

#[derive(Debug)]
struct NamespaceData {
    name: String,
    settings: NamespaceSettings,
    couples: Vec<Couple>,
    by_group: HashMap<GroupId, usize>,
}

/// Published state of one namespace. Cheap to clone; never mutated after build.
#[derive(Debug, Clone)]
pub struct NamespaceState {
    data: Arc<NamespaceData>,
}

impl NamespaceState {
    pub fn from_record(record: NamespaceRecord) -> Result<Self> {
        if record.name.is_empty() {
            return Err(TopologyError::InvalidSnapshot("empty namespace name".to_string()));
        }

        let mut couples = Vec::with_capacity(record.couples.len());
        let mut by_group = HashMap::new();
        let mut couple_ids = HashSet::new();

        for couple in record.couples {
            if !couple_ids.insert(couple.id.clone()) {
                return Err(TopologyError::InvalidSnapshot(format!(
                    "{}: reuse of couple id {}",
                    record.name, couple.id
                )));
            }

            let groups = GroupSet::new(couple.groups).map_err(|e| {
                TopologyError::InvalidSnapshot(format!("{}: couple {}: {}", record.name, couple.id, e))
            })?;
            if groups.is_empty() {
                return Err(TopologyError::InvalidSnapshot(format!(
                    "{}: couple {} has no groups",
                    record.name, couple.id
                )));
            }

            let index = couples.len();
            for group in groups.iter() {
                if by_group.insert(group, index).is_some() {
                    return Err(TopologyError::InvalidSnapshot(format!(
                        "{}: reuse of group id {}",
                        record.name, group
                    )));
                }
            }

            couples.push(Couple {
                id: couple.id,
                groups,
                weight: couple.weight,
                free_space: couple.free_space,
            });
        }

        Ok(Self {
            data: Arc::new(NamespaceData {
                name: record.name,
                settings: record.settings,
                couples,
                by_group,
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.data.name
    }

    pub fn settings(&self) -> &NamespaceSettings {
        &self.data.settings
    }

    pub fn couples(&self) -> &[Couple] {
        &self.data.couples
    }

    pub fn contains_group(&self, group: GroupId) -> bool {
        self.data.by_group.contains_key(&group)
    }

    /// Groups of the couple that `group` belongs to.
    pub fn couple_groups(&self, group: GroupId) -> Option<&GroupSet> {
        self.data
            .by_group
            .get(&group)
            .map(|index| &self.data.couples[*index].groups)
    }

    /// Weighted random choice among couples with at least `size` bytes free.
    pub fn pick_couple(&self, size: u64) -> Result<&Couple> {
        let roomy: Vec<&Couple> = self
            .data
            .couples
            .iter()
            .filter(|couple| couple.free_space >= size)
            .collect();

        if roomy.is_empty() {
            return Err(TopologyError::NotEnoughSpace {
                namespace: self.data.name.clone(),
                requested: size,
            });
        }

        let total_weight: u64 = roomy.iter().map(|couple| couple.weight).sum();
        if total_weight == 0 {
            return Err(TopologyError::CoupleNotFound(self.data.name.clone()));
        }

        let mut shoot = rand::thread_rng().gen_range(0..total_weight);
        for couple in roomy {
            if shoot < couple.weight {
                return Ok(couple);
            }
            shoot -= couple.weight;
        }

        Err(TopologyError::CoupleNotFound(self.data.name.clone()))
    }
}
