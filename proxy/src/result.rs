use storage::{GroupError, GroupId};

use crate::SuccessCopies;

/// Outcome of one sub-operation against one group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationResult {
    group: GroupId,
    error: Option<GroupError>,
}

impl OperationResult {
    pub fn new(group: GroupId, outcome: Result<(), GroupError>) -> Self {
        Self {
            group,
            error: outcome.err(),
        }
    }

    pub fn group(&self) -> GroupId {
        self.group
    }

    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }

    pub fn error(&self) -> Option<&GroupError> {
        self.error.as_ref()
    }
}

/// One entry per targeted group, in fan-out order.
///
/// Partial success is a normal value; check the entries or `satisfies`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteResultSet {
    results: Vec<OperationResult>,
}

impl WriteResultSet {
    pub fn new(results: Vec<OperationResult>) -> Self {
        Self { results }
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &OperationResult> {
        self.results.iter()
    }

    pub fn results(&self) -> &[OperationResult] {
        &self.results
    }

    pub fn successful_groups(&self) -> Vec<GroupId> {
        self.results
            .iter()
            .filter(|r| r.succeeded())
            .map(|r| r.group())
            .collect()
    }

    pub fn failures(&self) -> Vec<&OperationResult> {
        self.results.iter().filter(|r| !r.succeeded()).collect()
    }

    pub fn success_count(&self) -> usize {
        self.results.iter().filter(|r| r.succeeded()).count()
    }

    pub fn all_succeeded(&self) -> bool {
        self.results.iter().all(|r| r.succeeded())
    }

    pub fn satisfies(&self, policy: SuccessCopies) -> bool {
        self.success_count() >= policy.required(self.results.len())
    }
}

impl<'a> IntoIterator for &'a WriteResultSet {
    type Item = &'a OperationResult;
    type IntoIter = std::slice::Iter<'a, OperationResult>;

    fn into_iter(self) -> Self::IntoIter {
        self.results.iter()
    }
}
