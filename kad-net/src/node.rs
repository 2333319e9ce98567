//! Top-level wiring: owns every component and runs the inbound-datagram
//! dispatch loop (spec.md §2 "Data flow").

use std::sync::Arc;

use kad_protocol::{NodeId, RpcMessage};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::NetworkConfig;
use crate::lookup::{LookupEngine, LookupOutcome, LookupTarget};
use crate::peer::Peer;
use crate::pending::PendingRequestTable;
use crate::routing_table::{EvictionProbe, RoutingTable};
use crate::rpc_client::{PingProbe, RpcClient};
use crate::rpc_server::RpcServer;
use crate::store::ValueStore;
use crate::transport::Transport;

/// A running Kademlia peer: the transport loop plus every shared
/// component the RPC server and lookup engine operate on.
pub struct Node {
    pub config: NetworkConfig,
    pub transport: Transport,
    pub routing_table: Arc<Mutex<RoutingTable>>,
    pub value_store: Arc<ValueStore>,
    pub pending: Arc<PendingRequestTable>,
    pub client: Arc<RpcClient>,
    pub server: Arc<RpcServer>,
    pub probe: Arc<dyn EvictionProbe>,
}

impl Node {
    pub async fn bind(config: NetworkConfig) -> Result<Self, crate::error::NetworkError> {
        let transport = Transport::bind(config.bind_addr).await?;
        let routing_table = Arc::new(Mutex::new(RoutingTable::new(config.self_id, config.k)));
        let value_store = Arc::new(ValueStore::new());
        let pending = Arc::new(PendingRequestTable::new(config.pending_table_capacity));
        let client = Arc::new(RpcClient::new(
            transport.clone(),
            config.self_id,
            config.request_timeout,
        ));
        let server = Arc::new(RpcServer::new(
            transport.clone(),
            config.self_id,
            config.k,
            config.value_ttl,
        ));
        let probe: Arc<dyn EvictionProbe> = Arc::new(PingProbe {
            client: Arc::clone(&client),
            pending: Arc::clone(&pending),
        });

        info!(addr = %transport.local_addr()?, self_id = %config.self_id, "node bound");

        Ok(Self {
            config,
            transport,
            routing_table,
            value_store,
            pending,
            client,
            server,
            probe,
        })
    }

    fn lookup_engine(&self) -> LookupEngine<'_> {
        self.lookup_engine_with_cancel(CancellationToken::new())
    }

    fn lookup_engine_with_cancel(&self, cancel: CancellationToken) -> LookupEngine<'_> {
        LookupEngine {
            routing_table: &self.routing_table,
            client: &self.client,
            pending: &self.pending,
            probe: self.probe.as_ref(),
            k: self.config.k,
            alpha: self.config.alpha,
            request_timeout: self.config.request_timeout,
            cancel,
        }
    }

    /// Builds a lookup engine for `target` together with a
    /// [`CancellationToken`] the caller can invoke `.cancel()` on at any
    /// point to stop it (spec.md §5 "A lookup may be cancelled by its
    /// initiator"). The engine itself still needs to be `run()`.
    pub fn cancellable_lookup_engine(&self) -> (LookupEngine<'_>, CancellationToken) {
        let cancel = CancellationToken::new();
        (self.lookup_engine_with_cancel(cancel.clone()), cancel)
    }

    /// Runs the inbound dispatch loop forever: decode, then route to the
    /// RPC server (requests) or the pending-request table (replies)
    /// (spec.md §2 "Data flow").
    pub async fn serve(&self) {
        loop {
            let (from, bytes) = match self.transport.recv().await {
                Ok(datagram) => datagram,
                Err(error) => {
                    warn!(%error, "transport receive failed");
                    continue;
                }
            };
            let Some(msg) = self.client.decode_inbound(from, &bytes) else {
                continue;
            };
            match msg {
                RpcMessage::Request(request) => {
                    self.server
                        .handle(
                            from,
                            request,
                            &self.routing_table,
                            &self.value_store,
                            self.probe.as_ref(),
                            self.config.request_timeout,
                        )
                        .await;
                }
                RpcMessage::Reply(reply) => {
                    self.pending.deliver(reply).await;
                }
            }
        }
    }

    /// Joins the network per spec.md §4.8 "Bootstrap": PINGs each seed,
    /// looks up its own id, then refreshes every bucket farther than its
    /// closest known neighbor.
    pub async fn bootstrap(&self) {
        if self.config.bootstrap_peers.is_empty() {
            warn!("no bootstrap peers configured, starting peerless");
            return;
        }

        for addr in &self.config.bootstrap_peers {
            // The seed's id is unknown until it replies, so this first
            // contact correlates by echo token alone (spec.md §4.8
            // "Bootstrap"); the reply's `src` is the seed's learned id.
            match self.client.send_first_contact_ping(*addr, &self.pending).await {
                Ok(reply) => {
                    let seed = Peer::new(reply.src, *addr);
                    self.routing_table
                        .lock()
                        .await
                        .observe(seed, self.probe.as_ref(), self.config.request_timeout)
                        .await;
                }
                Err(error) => warn!(%addr, %error, "bootstrap seed unreachable"),
            }
        }

        let engine = self.lookup_engine();
        engine.run(LookupTarget::Node(self.config.self_id)).await;

        let closest_bucket = {
            let table = self.routing_table.lock().await;
            table
                .closest(&self.config.self_id, 1)
                .first()
                .and_then(|p| self.config.self_id.bucket_index(&p.id))
        };
        let start = closest_bucket.map(|b| b + 1).unwrap_or(0);
        for bucket in start..160 {
            let target = NodeId::random_in_bucket(&self.config.self_id, bucket);
            engine.run(LookupTarget::Node(target)).await;
        }
        info!("bootstrap complete");
    }

    /// Looks up `key`'s closest nodes, then issues STORE to each in
    /// parallel (spec.md §4.8 "STORE fan-out").
    pub async fn store(&self, key: NodeId, value: Vec<u8>) {
        let engine = self.lookup_engine();
        if let LookupOutcome::ClosestNodes(peers) = engine.run(LookupTarget::Node(key)).await {
            engine.store_fan_out(key, value, &peers).await;
        }
    }

    /// Looks up `key`'s value across the network.
    pub async fn find_value(&self, key: NodeId) -> Option<Vec<u8>> {
        if let Some(local) = self.value_store.get(&key).await {
            return Some(local);
        }
        match self.lookup_engine().run(LookupTarget::Value(key)).await {
            LookupOutcome::Value(value) => Some(value),
            LookupOutcome::ClosestNodes(_) => None,
        }
    }

    pub fn maintenance_config(&self, expiry_tick: std::time::Duration) -> crate::maintenance::MaintenanceConfig {
        crate::maintenance::MaintenanceConfig {
            bucket_refresh_interval: self.config.bucket_refresh_interval,
            value_republish_interval: self.config.value_republish_interval,
            expiry_tick,
            k: self.config.k,
            alpha: self.config.alpha,
            request_timeout: self.config.request_timeout,
        }
    }
}
