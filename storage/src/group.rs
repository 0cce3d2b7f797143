use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{Result, StorageError};

pub type GroupId = u32;

/// Ordered, duplicate-free set of replica groups.
///
/// Iteration order is the fan-out order; per-group results are reported in it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "Vec<GroupId>", into = "Vec<GroupId>")]
pub struct GroupSet {
    groups: Vec<GroupId>,
}

impl GroupSet {
    /// Builds a set keeping the first occurrence of every id. Id 0 is rejected.
    pub fn new(groups: impl IntoIterator<Item = GroupId>) -> Result<Self> {
        let mut unique = Vec::new();
        for group in groups {
            if group == 0 {
                return Err(StorageError::InvalidGroup(group));
            }
            if !unique.contains(&group) {
                unique.push(group);
            }
        }
        Ok(Self { groups: unique })
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn contains(&self, group: GroupId) -> bool {
        self.groups.contains(&group)
    }

    pub fn first(&self) -> Option<GroupId> {
        self.groups.first().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = GroupId> + '_ {
        self.groups.iter().copied()
    }

    pub fn as_slice(&self) -> &[GroupId] {
        &self.groups
    }

    /// Keeps at most `count` groups; `0` means no limit.
    pub fn truncated(&self, count: usize) -> Self {
        let mut groups = self.groups.clone();
        if count != 0 && count < groups.len() {
            groups.truncate(count);
        }
        Self { groups }
    }

    /// First group stays in front, the rest are shuffled.
    pub fn with_shuffled_tail(&self) -> Self {
        let mut groups = self.groups.clone();
        if groups.len() > 2 {
            groups[1..].shuffle(&mut rand::thread_rng());
        }
        Self { groups }
    }
}

impl TryFrom<Vec<GroupId>> for GroupSet {
    type Error = StorageError;

    fn try_from(groups: Vec<GroupId>) -> Result<Self> {
        Self::new(groups)
    }
}

impl From<GroupSet> for Vec<GroupId> {
    fn from(set: GroupSet) -> Self {
        set.groups
    }
}

impl<'a> IntoIterator for &'a GroupSet {
    type Item = GroupId;
    type IntoIter = std::iter::Copied<std::slice::Iter<'a, GroupId>>;

    fn into_iter(self) -> Self::IntoIter {
        self.groups.iter().copied()
    }
}

impl fmt::Display for GroupSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ids: Vec<String> = self.groups.iter().map(|g| g.to_string()).collect();
        write!(f, "[{}]", ids.join(", "))
    }
}
