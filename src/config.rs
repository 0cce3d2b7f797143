use proxy::{ProxyConfig, SuccessCopies};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use storage::{GroupId, GroupSet};
use topology::{RefreshConfig, Remote};

use crate::error::{GroupProxyError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Default target groups, in fan-out order.
    pub groups: Vec<GroupId>,
    /// Coordination service endpoints as `host:port`.
    pub remotes: Vec<String>,
    /// Namespace used to place writes that name no groups.
    pub namespace: Option<String>,
    /// Seconds between topology refreshes.
    pub refresh_interval: u64,
    /// Seconds after which a topology that failed to refresh is reported stale.
    pub warning_time: u64,
    /// Milliseconds allowed for one topology fetch.
    pub fetch_timeout: u64,
    pub cache_path: Option<PathBuf>,
    pub log_path: Option<PathBuf>,
    /// Milliseconds allowed for one group-level sub-operation.
    pub wait_timeout: u64,
    pub worker_threads: usize,
    pub replication_count: usize,
    pub success_copies: SuccessCopies,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            groups: Vec::new(),
            remotes: Vec::new(),
            namespace: None,
            refresh_interval: 60,
            warning_time: 300,
            fetch_timeout: 4000,
            cache_path: None,
            log_path: None,
            wait_timeout: 5000,
            worker_threads: 4,
            replication_count: 0,
            success_copies: SuccessCopies::Any,
        }
    }
}

impl Config {
    pub fn new(groups: Vec<GroupId>, remotes: Vec<String>) -> Self {
        Self {
            groups,
            remotes,
            ..Self::default()
        }
    }

    /// Reads and validates a JSON config file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.group_set()?;
        if self.remotes.is_empty() {
            return Err(GroupProxyError::InvalidConfig(
                "at least one remote is required".to_string(),
            ));
        }
        self.remotes()?;
        if self.worker_threads == 0 {
            return Err(GroupProxyError::InvalidConfig(
                "worker_threads must be positive".to_string(),
            ));
        }
        if self.refresh_interval == 0 {
            return Err(GroupProxyError::InvalidConfig(
                "refresh_interval must be at least one second".to_string(),
            ));
        }
        Ok(())
    }

    pub fn group_set(&self) -> Result<GroupSet> {
        let groups = GroupSet::new(self.groups.iter().copied())?;
        if groups.is_empty() {
            return Err(GroupProxyError::InvalidConfig(
                "at least one group is required".to_string(),
            ));
        }
        Ok(groups)
    }

    pub fn remotes(&self) -> Result<Vec<Remote>> {
        self.remotes
            .iter()
            .map(|remote| remote.parse::<Remote>().map_err(GroupProxyError::from))
            .collect()
    }
}

impl TryFrom<&Config> for ProxyConfig {
    type Error = GroupProxyError;

    fn try_from(config: &Config) -> Result<Self> {
        Ok(ProxyConfig {
            groups: config.group_set()?,
            wait_timeout: Duration::from_millis(config.wait_timeout),
            worker_threads: config.worker_threads,
            replication_count: config.replication_count,
            success_copies: config.success_copies,
        })
    }
}

impl From<&Config> for RefreshConfig {
    fn from(config: &Config) -> Self {
        RefreshConfig {
            refresh_interval: Duration::from_secs(config.refresh_interval),
            fetch_timeout: Duration::from_millis(config.fetch_timeout),
            warning_time: Duration::from_secs(config.warning_time),
            cache_path: config.cache_path.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn valid() -> Config {
        Config::new(vec![1, 2], vec!["localhost:10053".to_string()])
    }

    #[test]
    fn minimal_file_takes_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("groupproxy.json");
        std::fs::write(
            &path,
            r#"{ "groups": [1, 2], "remotes": ["localhost:10053"], "success_copies": "quorum" }"#,
        )
        .unwrap();

        let config = Config::load(&path).unwrap();

        assert_eq!(config.groups, vec![1, 2]);
        assert_eq!(config.refresh_interval, 60);
        assert_eq!(config.success_copies, SuccessCopies::Quorum);
        assert_eq!(config.remotes().unwrap(), vec![Remote::new("localhost", 10053)]);
    }

    #[test]
    fn validation_rejects_bad_groups_and_remotes() {
        assert!(valid().validate().is_ok());

        let mut no_groups = valid();
        no_groups.groups.clear();
        assert!(no_groups.validate().is_err());

        let mut zero_group = valid();
        zero_group.groups.push(0);
        assert!(zero_group.validate().is_err());

        let mut no_remotes = valid();
        no_remotes.remotes.clear();
        assert!(no_remotes.validate().is_err());

        let mut bad_remote = valid();
        bad_remote.remotes = vec!["no-port".to_string()];
        assert!(bad_remote.validate().is_err());
    }

    #[test]
    fn validation_rejects_zero_intervals_and_workers() {
        let mut busy_loop = valid();
        busy_loop.refresh_interval = 0;
        assert!(matches!(
            busy_loop.validate(),
            Err(GroupProxyError::InvalidConfig(_))
        ));

        let mut no_workers = valid();
        no_workers.worker_threads = 0;
        assert!(no_workers.validate().is_err());
    }

    #[test]
    fn converts_into_crate_configs() {
        let mut config = valid();
        config.wait_timeout = 250;
        config.cache_path = Some(PathBuf::from("/tmp/topology.cache"));

        let proxy = ProxyConfig::try_from(&config).unwrap();
        assert_eq!(proxy.groups.as_slice(), &[1, 2]);
        assert_eq!(proxy.wait_timeout, Duration::from_millis(250));

        let refresh = RefreshConfig::from(&config);
        assert_eq!(refresh.refresh_interval, Duration::from_secs(60));
        assert_eq!(refresh.cache_path, config.cache_path);
    }

    proptest! {
        #[test]
        fn nonzero_groups_validate_in_first_seen_order(ids in proptest::collection::vec(1u32..50, 1..12)) {
            let mut config = valid();
            config.groups = ids.clone();

            prop_assert!(config.validate().is_ok());

            let mut expected = Vec::new();
            for id in ids {
                if !expected.contains(&id) {
                    expected.push(id);
                }
            }
            let groups = config.group_set().unwrap();
            prop_assert_eq!(groups.as_slice(), expected.as_slice());
        }

        #[test]
        fn group_zero_anywhere_is_rejected(
            ids in proptest::collection::vec(1u32..50, 0..8),
            at in 0usize..8,
        ) {
            let mut config = valid();
            config.groups = ids.clone();
            config.groups.insert(at.min(ids.len()), 0);

            prop_assert!(config.validate().is_err());
        }

        #[test]
        fn any_port_makes_a_valid_remote(host in "[a-z][a-z0-9.-]{0,20}", port in any::<u16>()) {
            let mut config = valid();
            config.remotes = vec![format!("{}:{}", host, port)];

            prop_assert!(config.validate().is_ok());
            prop_assert_eq!(config.remotes().unwrap(), vec![Remote::new(host, port)]);
        }
    }
}
