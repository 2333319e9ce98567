//! Maintenance scheduler (C9, spec.md §4.9): periodic bucket refresh, value
//! republish, and value expiry.

use std::sync::Arc;
use std::time::Duration;

use kad_protocol::NodeId;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::lookup::{LookupEngine, LookupOutcome, LookupTarget};
use crate::pending::PendingRequestTable;
use crate::rpc_client::RpcClient;
use crate::routing_table::{EvictionProbe, RoutingTable};
use crate::store::ValueStore;

pub struct MaintenanceConfig {
    pub bucket_refresh_interval: Duration,
    pub value_republish_interval: Duration,
    pub expiry_tick: Duration,
    pub k: usize,
    pub alpha: usize,
    pub request_timeout: Duration,
}

/// Runs the three maintenance duties as independent periodic loops under
/// one `tokio::select!`, matching the teacher's pattern of a single task
/// multiplexing several interval timers (see `ant-networking`'s driver
/// event loop).
pub async fn run(
    cfg: MaintenanceConfig,
    routing_table: Arc<Mutex<RoutingTable>>,
    value_store: Arc<ValueStore>,
    client: Arc<RpcClient>,
    pending: Arc<PendingRequestTable>,
    probe: Arc<dyn EvictionProbe>,
) {
    let mut refresh_tick = tokio::time::interval(cfg.bucket_refresh_interval);
    let mut republish_tick = tokio::time::interval(cfg.value_republish_interval);
    let mut expire_tick = tokio::time::interval(cfg.expiry_tick);

    loop {
        tokio::select! {
            _ = refresh_tick.tick() => {
                refresh_stale_buckets(&cfg, &routing_table, &client, &pending, probe.as_ref()).await;
            }
            _ = republish_tick.tick() => {
                republish_values(&cfg, &routing_table, &value_store, &client, &pending, probe.as_ref()).await;
            }
            _ = expire_tick.tick() => {
                let expired = value_store.expire_due().await;
                if !expired.is_empty() {
                    debug!(count = expired.len(), "expired stored values");
                }
            }
        }
    }
}

async fn refresh_stale_buckets(
    cfg: &MaintenanceConfig,
    routing_table: &Mutex<RoutingTable>,
    client: &RpcClient,
    pending: &PendingRequestTable,
    probe: &dyn EvictionProbe,
) {
    let (self_id, stale) = {
        let table = routing_table.lock().await;
        (table.self_id(), table.stale_buckets(cfg.bucket_refresh_interval))
    };
    if stale.is_empty() {
        return;
    }
    info!(count = stale.len(), "refreshing stale buckets");

    let engine = LookupEngine {
        routing_table,
        client,
        pending,
        probe,
        k: cfg.k,
        alpha: cfg.alpha,
        request_timeout: cfg.request_timeout,
        // Scheduled maintenance work runs to completion; nobody holds a
        // handle to cancel it.
        cancel: tokio_util::sync::CancellationToken::new(),
    };
    for bucket in stale {
        let random_target = NodeId::random_in_bucket(&self_id, bucket);
        engine.run(LookupTarget::Node(random_target)).await;
        routing_table.lock().await.touch_bucket(bucket);
    }
}

async fn republish_values(
    cfg: &MaintenanceConfig,
    routing_table: &Mutex<RoutingTable>,
    value_store: &ValueStore,
    client: &RpcClient,
    pending: &PendingRequestTable,
    probe: &dyn EvictionProbe,
) {
    let due = value_store.republish_due(cfg.value_republish_interval).await;
    if due.is_empty() {
        return;
    }
    info!(count = due.len(), "republishing values");

    let engine = LookupEngine {
        routing_table,
        client,
        pending,
        probe,
        k: cfg.k,
        alpha: cfg.alpha,
        request_timeout: cfg.request_timeout,
        // Scheduled maintenance work runs to completion; nobody holds a
        // handle to cancel it.
        cancel: tokio_util::sync::CancellationToken::new(),
    };
    for (key, value) in due {
        if let LookupOutcome::ClosestNodes(peers) = engine.run(LookupTarget::Node(key)).await {
            engine.store_fan_out(key, value, &peers).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, SocketAddr};
    use std::sync::Arc;

    use crate::rpc_client::PingProbe;
    use crate::transport::Transport;

    fn loopback(port: u16) -> SocketAddr {
        SocketAddr::new(Ipv4Addr::LOCALHOST.into(), port)
    }

    // Invariant 8 / S8 — a bucket untouched for the refresh interval is
    // refreshed (touched) the next time the scheduler's refresh pass runs.
    // Against an empty routing table the lookup it triggers has no peers to
    // query and returns immediately, so this exercises the scheduling path
    // without needing a live peer.
    #[tokio::test]
    async fn refresh_pass_touches_every_stale_bucket() {
        let transport = Transport::bind(loopback(0)).await.unwrap();
        let self_id = NodeId::random();
        let routing_table = Mutex::new(RoutingTable::new(self_id, 20));
        let client = Arc::new(RpcClient::new(transport, self_id, Duration::from_millis(50)));
        let pending = Arc::new(PendingRequestTable::new(100));
        let probe = PingProbe {
            client: Arc::clone(&client),
            pending: Arc::clone(&pending),
        };

        let cfg = MaintenanceConfig {
            bucket_refresh_interval: Duration::from_secs(0),
            value_republish_interval: Duration::from_secs(3600),
            expiry_tick: Duration::from_secs(1),
            k: 20,
            alpha: 3,
            request_timeout: Duration::from_millis(50),
        };

        assert_eq!(
            routing_table.lock().await.stale_buckets(Duration::from_secs(0)).len(),
            160
        );

        refresh_stale_buckets(&cfg, &routing_table, &client, &pending, &probe).await;

        assert!(routing_table
            .lock()
            .await
            .stale_buckets(Duration::from_secs(3600))
            .is_empty());
    }
}
