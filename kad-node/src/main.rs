//! `kad-node` — the Kademlia DHT peer binary: CLI argument parsing,
//! configuration precedence (CLI > environment > default), logging and
//! build-info startup, process wiring, and graceful shutdown.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use clap::Parser;
use color_eyre::eyre::{eyre, Result};
use kad_logging::{LogBuilder, LogFormat, LogOutputDest};
use kad_net::{NetworkConfig, Node};
use kad_protocol::NodeId;
use tracing::{info, warn};

/// A Kademlia DHT peer.
#[derive(Parser, Debug)]
#[command(name = "kad-node", version = env!("CARGO_PKG_VERSION"))]
struct Opt {
    /// IP address to bind the UDP socket on.
    #[clap(long, env = "KAD_IP", default_value_t = IpAddr::V4(Ipv4Addr::UNSPECIFIED))]
    ip: IpAddr,

    /// UDP port to bind. `0` lets the OS assign one.
    #[clap(long, env = "KAD_PORT", default_value_t = 0)]
    port: u16,

    /// This node's 160-bit id as 40 lowercase hex chars. If omitted, a
    /// cryptographically random id is generated.
    #[clap(long, env = "KAD_SELF_ID")]
    self_id: Option<String>,

    /// Bucket size / STORE replication factor.
    #[clap(long, env = "KAD_K", default_value_t = kad_net::config::DEFAULT_K)]
    k: usize,

    /// Lookup concurrency parameter.
    #[clap(long, env = "KAD_ALPHA", default_value_t = kad_net::config::DEFAULT_ALPHA)]
    alpha: usize,

    /// Per-request timeout, in seconds.
    #[clap(long, env = "KAD_REQUEST_TIMEOUT_SECS", default_value_t = kad_net::config::DEFAULT_REQUEST_TIMEOUT.as_secs())]
    request_timeout_secs: u64,

    /// Bucket refresh interval, in seconds.
    #[clap(long, env = "KAD_BUCKET_REFRESH_INTERVAL_SECS", default_value_t = kad_net::config::DEFAULT_BUCKET_REFRESH_INTERVAL.as_secs())]
    bucket_refresh_interval_secs: u64,

    /// Stored-value TTL, in seconds.
    #[clap(long, env = "KAD_VALUE_TTL_SECS", default_value_t = kad_net::config::DEFAULT_VALUE_TTL.as_secs())]
    value_ttl_secs: u64,

    /// Stored-value republish interval, in seconds.
    #[clap(long, env = "KAD_VALUE_REPUBLISH_INTERVAL_SECS", default_value_t = kad_net::config::DEFAULT_VALUE_REPUBLISH_INTERVAL.as_secs())]
    value_republish_interval_secs: u64,

    /// Well-known peer addresses to bootstrap from. May be repeated.
    #[clap(long = "bootstrap-peer", env = "KAD_BOOTSTRAP_PEERS", value_delimiter = ',')]
    bootstrap_peers: Vec<SocketAddr>,

    /// Logging output destination: "stdout", "data-dir", or a custom path.
    #[clap(long, env = "KAD_LOG_OUTPUT_DEST", default_value = "stdout")]
    log_output_dest: String,

    /// Logging format: "default" or "json".
    #[clap(long, env = "KAD_LOG_FORMAT", default_value = "default")]
    log_format: String,

    /// Directory under which logs are written when `--log-output-dest` is
    /// a bare directory name rather than "stdout"/"data-dir".
    #[clap(long, env = "KAD_ROOT_DIR")]
    root_dir: Option<std::path::PathBuf>,

    /// Optional local admin endpoint. Accepted and logged only — the admin
    /// RPC surface itself is out of scope for this node.
    #[clap(long, env = "KAD_RPC")]
    rpc: Option<SocketAddr>,

    /// Print the crate version and exit.
    #[clap(long)]
    crate_version: bool,
}

fn build_network_config(opt: &Opt) -> Result<NetworkConfig> {
    let self_id = match &opt.self_id {
        Some(hex) => NodeId::from_hex(hex).map_err(|e| eyre!("invalid --self-id: {e}"))?,
        None => NodeId::random(),
    };

    let bind_addr = SocketAddr::new(opt.ip, opt.port);
    let mut config = NetworkConfig::new(bind_addr);
    config.self_id = self_id;
    config.k = opt.k;
    config.alpha = opt.alpha;
    config.request_timeout = Duration::from_secs(opt.request_timeout_secs);
    config.bucket_refresh_interval = Duration::from_secs(opt.bucket_refresh_interval_secs);
    config.value_ttl = Duration::from_secs(opt.value_ttl_secs);
    config.value_republish_interval = Duration::from_secs(opt.value_republish_interval_secs);
    config.bootstrap_peers = opt.bootstrap_peers.clone();
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let opt = Opt::parse();

    if opt.crate_version {
        println!("{}", kad_build_info::PKG_VERSION);
        return Ok(());
    }

    let output_dest = LogOutputDest::parse_from_str(&opt.log_output_dest)
        .map_err(|e| eyre!("invalid --log-output-dest: {e}"))?;
    let output_dest = match (&opt.root_dir, &output_dest) {
        (Some(root), LogOutputDest::Stdout) => LogOutputDest::Path(root.join("logs")),
        _ => output_dest,
    };
    let format = LogFormat::parse_from_str(&opt.log_format)
        .map_err(|e| eyre!("invalid --log-format: {e}"))?;

    let _log_guard = LogBuilder::new("kad_net=info,kad_node=info")
        .output_dest(output_dest)
        .format(format)
        .init()
        .map_err(|e| eyre!("failed to initialize logging: {e}"))?;

    kad_build_info::log_version();

    if let Some(rpc_addr) = opt.rpc {
        warn!(%rpc_addr, "--rpc was given but the admin RPC surface is not implemented; ignoring");
    }

    let config = build_network_config(&opt)?;
    info!(self_id = %config.self_id, bind_addr = %config.bind_addr, "starting kad-node");

    let node = std::sync::Arc::new(Node::bind(config).await?);

    let serve_node = std::sync::Arc::clone(&node);
    let serve_task = tokio::spawn(async move { serve_node.serve().await });

    let maintenance_task = {
        let cfg = node.maintenance_config(kad_net::config::DEFAULT_EXPIRY_TICK);
        let routing_table = std::sync::Arc::clone(&node.routing_table);
        let value_store = std::sync::Arc::clone(&node.value_store);
        let client = std::sync::Arc::clone(&node.client);
        let pending = std::sync::Arc::clone(&node.pending);
        let probe = std::sync::Arc::clone(&node.probe);
        tokio::spawn(async move {
            kad_net::maintenance::run(cfg, routing_table, value_store, client, pending, probe).await
        })
    };

    node.bootstrap().await;

    tokio::signal::ctrl_c()
        .await
        .map_err(|e| eyre!("failed to listen for shutdown signal: {e}"))?;
    info!("received shutdown signal, stopping");

    serve_task.abort();
    maintenance_task.abort();

    Ok(())
}
