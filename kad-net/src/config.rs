//! Configuration constants and settings for the Kademlia networking stack
//! (spec.md §6 "Configuration").

use std::net::SocketAddr;
use std::time::Duration;

use kad_protocol::NodeId;

/// Default bucket size, also the STORE replication factor.
pub const DEFAULT_K: usize = 20;

/// Default lookup concurrency parameter.
pub const DEFAULT_ALPHA: usize = 3;

/// Default per-request timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Default interval after which an untouched bucket is considered stale.
pub const DEFAULT_BUCKET_REFRESH_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Default lifetime of a stored value before it expires.
pub const DEFAULT_VALUE_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Default interval between republishes of a still-live value.
pub const DEFAULT_VALUE_REPUBLISH_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Soft cap on outstanding entries in the pending-request table (spec.md §5).
pub const DEFAULT_PENDING_TABLE_CAPACITY: usize = 10_000;

/// Interval between value-store expiry sweeps (spec.md §4.9 "short tick").
pub const DEFAULT_EXPIRY_TICK: Duration = Duration::from_secs(1);

/// Configuration for a `kad-net` node. Mirrors the wire-level configuration
/// table in spec.md §6.
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    pub k: usize,
    pub alpha: usize,
    pub request_timeout: Duration,
    pub bucket_refresh_interval: Duration,
    pub value_ttl: Duration,
    pub value_republish_interval: Duration,
    pub pending_table_capacity: usize,
    pub self_id: NodeId,
    pub bind_addr: SocketAddr,
    pub bootstrap_peers: Vec<SocketAddr>,
}

impl NetworkConfig {
    /// Builds a config with every default except `self_id` (randomly
    /// generated) and `bind_addr`, which the caller must always supply.
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self {
            k: DEFAULT_K,
            alpha: DEFAULT_ALPHA,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            bucket_refresh_interval: DEFAULT_BUCKET_REFRESH_INTERVAL,
            value_ttl: DEFAULT_VALUE_TTL,
            value_republish_interval: DEFAULT_VALUE_REPUBLISH_INTERVAL,
            pending_table_capacity: DEFAULT_PENDING_TABLE_CAPACITY,
            self_id: NodeId::random(),
            bind_addr,
            bootstrap_peers: Vec::new(),
        }
    }
}
