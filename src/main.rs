use anyhow::{bail, Context};
use clap::{Arg, ArgAction, ArgMatches, Command};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use groupproxy::proxy::{ReadOptions, WriteOptions};
use groupproxy::storage::{DataContainer, GroupId, MemoryBackend, Timestamp};
use groupproxy::{Config, Node};

fn main() -> anyhow::Result<()> {
    let matches = Command::new("groupproxy")
        .version("0.1.0")
        .about("Replicating storage proxy with a cluster topology cache")
        .arg(
            Arg::new("config")
                .long("config")
                .short('c')
                .help("Path to a JSON config file")
                .value_parser(clap::value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("group")
                .long("group")
                .short('g')
                .help("Storage group id; repeat for several")
                .action(ArgAction::Append)
                .value_parser(clap::value_parser!(GroupId)),
        )
        .arg(
            Arg::new("remote")
                .long("remote")
                .short('r')
                .help("Coordination service as host:port; repeat for several")
                .action(ArgAction::Append),
        )
        .arg(
            Arg::new("log-path")
                .long("log-path")
                .help("Write logs to this file instead of stderr")
                .value_parser(clap::value_parser!(PathBuf)),
        )
        .subcommand(
            Command::new("selftest")
                .about("Write, read and remove a key through in-memory groups"),
        )
        .subcommand(
            Command::new("topology")
                .about("Fetch the cluster topology and print its namespaces")
                .arg(
                    Arg::new("wait")
                        .long("wait")
                        .help("Seconds to wait for the first snapshot")
                        .default_value("10")
                        .value_parser(clap::value_parser!(u64)),
                ),
        )
        .subcommand_required(true)
        .get_matches();

    let config = build_config(&matches)?;
    init_logging(config.log_path.as_deref())?;

    match matches.subcommand() {
        Some(("selftest", _)) => selftest(config),
        Some(("topology", sub)) => {
            let wait = sub.get_one::<u64>("wait").copied().unwrap_or(10);
            show_topology(config, Duration::from_secs(wait))
        }
        _ => bail!("unknown subcommand"),
    }
}

fn build_config(matches: &ArgMatches) -> anyhow::Result<Config> {
    let mut config = match matches.get_one::<PathBuf>("config") {
        Some(path) => {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("reading config {}", path.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("parsing config {}", path.display()))?
        }
        None => Config::default(),
    };

    if let Some(groups) = matches.get_many::<GroupId>("group") {
        config.groups = groups.copied().collect();
    }
    if let Some(remotes) = matches.get_many::<String>("remote") {
        config.remotes = remotes.cloned().collect();
    }
    if let Some(path) = matches.get_one::<PathBuf>("log-path") {
        config.log_path = Some(path.clone());
    }

    Ok(config)
}

fn init_logging(log_path: Option<&Path>) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    match log_path {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("opening log file {}", path.display()))?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(std::sync::Mutex::new(file))
                .init();
        }
        None => tracing_subscriber::fmt().with_env_filter(filter).init(),
    }
    Ok(())
}

/// Exercises the proxy against in-memory groups, without a coordination service.
fn selftest(mut config: Config) -> anyhow::Result<()> {
    if config.groups.is_empty() {
        config.groups = vec![1, 2];
    }
    let groups = config.group_set()?;
    info!("Running selftest against groups {}", groups);

    let backend = Arc::new(MemoryBackend::new(groups.iter()));
    let proxy = groupproxy::proxy::StorageProxy::new(
        groupproxy::proxy::ProxyConfig::try_from(&config)?,
        backend.clone(),
    )?;

    let key = format!("selftest-{}", uuid::Uuid::new_v4());
    let data = DataContainer::new("selftest payload").with_timestamp(Timestamp::now());

    let results = proxy.write(key.as_str(), data.clone(), WriteOptions::new())?;
    if !results.all_succeeded() {
        bail!("write reached only groups {:?}", results.successful_groups());
    }

    let copies = proxy
        .read_async(key.as_str(), ReadOptions::new().embedded(true))
        .get()?;
    if copies.len() != groups.len() || copies.iter().any(|c| c.payload() != data.payload()) {
        bail!("read back {} of {} copies", copies.len(), groups.len());
    }

    proxy.remove(key.as_str(), None)?;
    if proxy.read(key.as_str(), ReadOptions::new()).is_ok() {
        bail!("key still readable after remove");
    }

    let counts = backend.operation_counts();
    info!(
        "Selftest passed: {} writes, {} reads, {} removes",
        counts.writes, counts.reads, counts.removes
    );
    println!("selftest ok");
    Ok(())
}

fn show_topology(config: Config, wait: Duration) -> anyhow::Result<()> {
    let groups = config.groups.clone();
    let node = Node::new(config, Arc::new(MemoryBackend::new(groups.iter().copied())))?;
    node.start();

    if !node.wait_until_valid(wait) {
        node.shutdown();
        bail!("no topology received within {:?}", wait);
    }

    let cache = node.topology();
    for name in cache.namespaces() {
        let state = cache.get_namespace_state(&name)?;
        println!("{}", name);
        for couple in state.couples() {
            println!(
                "  couple {} groups {} weight {} free {}",
                couple.id, couple.groups, couple.weight, couple.free_space
            );
        }
    }

    for bad in cache.bad_groups() {
        println!("bad groups {:?}", bad);
    }

    for group in groups {
        match cache.find_namespace_state(group) {
            Ok(state) => println!("group {} -> {}", group, state.name()),
            Err(e) => warn!("group {}: {}", group, e),
        }
    }

    node.shutdown();
    Ok(())
}
