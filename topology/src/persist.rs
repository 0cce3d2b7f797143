//! On-disk copy of the last good snapshot, so a restart is usable before the
//! first refresh completes.

use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::fs;

use crate::snapshot::TopologySnapshot;
use crate::{Result, TopologyError};

#[derive(Serialize, Deserialize)]
struct CacheFile {
    checksum: String,
    payload: Vec<u8>,
}

pub async fn store_snapshot(path: &Path, snapshot: &TopologySnapshot) -> Result<()> {
    let payload = bincode::serialize(snapshot)?;
    let file = CacheFile {
        checksum: blake3::hash(&payload).to_hex().to_string(),
        payload,
    };
    let encoded = bincode::serialize(&file)?;

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).await?;
        }
    }

    let tmp = path.with_extension("tmp");
    fs::write(&tmp, &encoded).await?;
    fs::rename(&tmp, path).await?;

    tracing::debug!("Stored topology cache at {:?} ({} bytes)", path, encoded.len());
    Ok(())
}

/// `Ok(None)` when there is no cache file yet.
pub async fn load_snapshot(path: &Path) -> Result<Option<TopologySnapshot>> {
    let encoded = match fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    let file: CacheFile = bincode::deserialize(&encoded)?;
    let checksum = blake3::hash(&file.payload).to_hex().to_string();
    if checksum != file.checksum {
        return Err(TopologyError::CacheFile(format!(
            "checksum mismatch in {:?}",
            path
        )));
    }

    Ok(Some(bincode::deserialize(&file.payload)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::{CoupleRecord, NamespaceRecord, NamespaceSettings};

    fn snapshot() -> TopologySnapshot {
        TopologySnapshot {
            namespaces: vec![NamespaceRecord {
                name: "default".to_string(),
                settings: NamespaceSettings::default(),
                couples: vec![CoupleRecord {
                    id: "5:6".to_string(),
                    groups: vec![5, 6],
                    weight: 3,
                    free_space: 4096,
                }],
            }],
            bad_groups: vec![vec![9]],
            cache_groups: [("hot".to_string(), vec![11, 12])].into_iter().collect(),
        }
    }

    #[tokio::test]
    async fn missing_file_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_snapshot(&dir.path().join("absent.cache")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn stored_snapshot_loads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("topology.cache");

        store_snapshot(&path, &snapshot()).await.unwrap();
        assert_eq!(load_snapshot(&path).await.unwrap(), Some(snapshot()));
        assert!(!path.with_extension("tmp").exists());
    }

    #[tokio::test]
    async fn tampered_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("topology.cache");
        store_snapshot(&path, &snapshot()).await.unwrap();

        let mut bytes = std::fs::read(&path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        std::fs::write(&path, bytes).unwrap();

        assert!(load_snapshot(&path).await.is_err());
    }
}
