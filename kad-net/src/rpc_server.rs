//! RPC server (C7, spec.md §4.7): dispatches inbound requests, composes
//! replies from the routing table and value store, and is the only path by
//! which the table learns about unsolicited peers.

use std::net::SocketAddr;
use std::time::Duration;

use kad_protocol::{encode, FindValueResult, NodeId, Reply, ReplyBody, Request, RequestBody, RpcMessage};
use tokio::sync::Mutex;
use tracing::debug;

use crate::peer::Peer;
use crate::routing_table::{EvictionProbe, RoutingTable};
use crate::store::ValueStore;
use crate::transport::Transport;

pub struct RpcServer {
    transport: Transport,
    self_id: NodeId,
    k: usize,
    value_ttl: Duration,
}

impl RpcServer {
    pub fn new(transport: Transport, self_id: NodeId, k: usize, value_ttl: Duration) -> Self {
        Self {
            transport,
            self_id,
            k,
            value_ttl,
        }
    }

    /// Handles one inbound request: builds and sends the reply, then
    /// `observe()`s the requester (spec.md §4.7: "this is the only path by
    /// which the table learns about unsolicited peers").
    pub async fn handle(
        &self,
        from: SocketAddr,
        request: Request,
        routing_table: &Mutex<RoutingTable>,
        value_store: &ValueStore,
        probe: &dyn EvictionProbe,
        request_timeout: Duration,
    ) {
        let body = match request.body {
            RequestBody::Ping => ReplyBody::Ping,
            RequestBody::Store { key, val } => {
                value_store.put(key, val, self.value_ttl).await;
                ReplyBody::Store
            }
            RequestBody::FindNode { target } => {
                let nodes = routing_table
                    .lock()
                    .await
                    .closest(&target, self.k)
                    .iter()
                    .map(Peer::to_contact_info)
                    .collect();
                ReplyBody::FindNode { nodes }
            }
            RequestBody::FindValue { key } => {
                if let Some(value) = value_store.get(&key).await {
                    ReplyBody::FindValue(FindValueResult::Value(value))
                } else {
                    let nodes = routing_table
                        .lock()
                        .await
                        .closest(&key, self.k)
                        .iter()
                        .map(Peer::to_contact_info)
                        .collect();
                    ReplyBody::FindValue(FindValueResult::Nodes(nodes))
                }
            }
        };

        let reply = Reply {
            src: self.self_id,
            echo: request.echo,
            body,
        };
        let bytes = encode(&RpcMessage::Reply(reply));
        self.transport.send(from, &bytes).await;

        let peer = Peer::new(request.src, from);
        let outcome = routing_table
            .lock()
            .await
            .observe(peer, probe, request_timeout)
            .await;
        debug!(peer = %request.src, ?outcome, "observed requester");
    }
}
