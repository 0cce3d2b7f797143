use bytes::Bytes;

use crate::{GroupError, GroupId, Key};

/// Primitive operations exposed by a single storage group.
///
/// Implementations own the transport; the proxy only fans calls out and
/// records the outcome of each one.
#[async_trait::async_trait]
pub trait GroupBackend: Send + Sync + 'static {
    /// Store the packed bytes of a container under `key` in `group`.
    async fn write(&self, group: GroupId, key: &Key, data: Bytes) -> Result<(), GroupError>;

    /// Fetch the bytes stored under `key`, or `GroupError::NotFound`.
    async fn read(&self, group: GroupId, key: &Key) -> Result<Bytes, GroupError>;

    /// Drop `key` from `group`. Removing an absent key reports `NotFound`.
    async fn remove(&self, group: GroupId, key: &Key) -> Result<(), GroupError>;
}
