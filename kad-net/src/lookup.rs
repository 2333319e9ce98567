//! Iterative lookup engine (C8, spec.md §4.8) — the central algorithm.
//! Bounded-concurrency traversal of the XOR metric space toward a target,
//! feeding discovered peers back into the routing table and driving
//! bootstrap, STORE fan-out, and periodic bucket refresh.

use std::collections::HashSet;
use std::time::Duration;

use futures::stream::FuturesUnordered;
use futures::StreamExt;
use kad_protocol::{Distance, FindValueResult, NodeId, ReplyBody, RequestBody};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::peer::Peer;
use crate::pending::PendingRequestTable;
use crate::rpc_client::RpcClient;
use crate::routing_table::{EvictionProbe, RoutingTable};

/// What an iterative lookup is searching for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupTarget {
    Node(NodeId),
    Value(NodeId),
}

impl LookupTarget {
    fn id(&self) -> NodeId {
        match self {
            LookupTarget::Node(id) | LookupTarget::Value(id) => *id,
        }
    }
}

#[derive(Debug)]
pub enum LookupOutcome {
    /// FIND_VALUE terminated early on a hit (spec.md §4.8 step 3).
    Value(Vec<u8>),
    /// The *k* closest live peers found (spec.md §4.8 step 4).
    ClosestNodes(Vec<Peer>),
}

enum QueryOutcome {
    Nodes(Vec<Peer>),
    Value(Vec<u8>),
    Unreachable,
}

/// Parameters and collaborators an iterative lookup needs. Borrowed rather
/// than owned so the same engine instance can drive repeated lookups
/// (bootstrap, bucket refresh, STORE fan-out) against one node's state.
pub struct LookupEngine<'a> {
    pub routing_table: &'a Mutex<RoutingTable>,
    pub client: &'a RpcClient,
    pub pending: &'a PendingRequestTable,
    pub probe: &'a dyn EvictionProbe,
    pub k: usize,
    pub alpha: usize,
    pub request_timeout: Duration,
    /// Lets the lookup's initiator cancel it (spec.md §5 "Cancellation"):
    /// `cancel.cancel()` causes in-flight FIND_*s to resolve as
    /// `NetworkError::Cancelled` and stops the loop from scheduling more.
    /// Maintenance-driven lookups (bootstrap, bucket refresh, republish)
    /// pass a token nobody holds a cancelling handle to.
    pub cancel: CancellationToken,
}

impl LookupEngine<'_> {
    pub async fn run(&self, target: LookupTarget) -> LookupOutcome {
        let target_id = target.id();
        let self_id = self.routing_table.lock().await.self_id();

        let mut shortlist: Vec<Peer> = self
            .routing_table
            .lock()
            .await
            .closest(&target_id, self.alpha.max(self.k));
        shortlist.sort_by_key(|p| target_id.distance(&p.id));

        let mut queried: HashSet<NodeId> = HashSet::new();
        let mut in_flight: HashSet<NodeId> = HashSet::new();
        let mut best_distance: Option<Distance> =
            shortlist.first().map(|p| target_id.distance(&p.id));
        // Buckets (relative to this node's own id) the lookup queried a peer
        // through, touched once at return so organic lookup traffic resets
        // their staleness the same way maintenance's refresh pass does
        // (spec.md §4.5 "touch_bucket").
        let mut touched_buckets: HashSet<usize> = HashSet::new();

        let mut tasks = FuturesUnordered::new();

        loop {
            if self.cancel.is_cancelled() {
                debug!(target = %target_id, "lookup cancelled by initiator, scheduling no further FIND_*s");
                break;
            }

            let room = self.alpha.saturating_sub(in_flight.len());
            let candidates: Vec<Peer> = shortlist
                .iter()
                .filter(|p| !queried.contains(&p.id) && !in_flight.contains(&p.id))
                .take(room)
                .cloned()
                .collect();

            for peer in candidates {
                in_flight.insert(peer.id);
                tasks.push(self.query_peer(peer, target));
            }

            let Some((peer, outcome)) = tasks.next().await else {
                // Nothing in flight and the shortlist offered no new
                // candidates: the lookup has exhausted the network it knows.
                break;
            };
            in_flight.remove(&peer.id);
            queried.insert(peer.id);
            if let Some(bucket) = self_id.bucket_index(&peer.id) {
                touched_buckets.insert(bucket);
            }

            match outcome {
                QueryOutcome::Value(value) => {
                    self.touch_buckets(&touched_buckets).await;
                    return LookupOutcome::Value(value);
                }
                QueryOutcome::Nodes(nodes) => {
                    for node in nodes {
                        if node.id == self.routing_table.lock().await.self_id() {
                            continue;
                        }
                        if !shortlist.iter().any(|p| p.id == node.id) {
                            shortlist.push(node);
                        }
                    }
                    shortlist.sort_by_key(|p| target_id.distance(&p.id));
                    shortlist.truncate(self.k);
                }
                QueryOutcome::Unreachable => {
                    trace!(peer = %peer.id, "lookup peer unreachable, not retried");
                }
            }

            let current_best = shortlist.first().map(|p| target_id.distance(&p.id));
            let improved = matches!((best_distance, current_best), (Some(b), Some(c)) if c < b);
            if improved {
                best_distance = current_best;
            }

            let top_k_queried = shortlist
                .iter()
                .take(self.k)
                .all(|p| queried.contains(&p.id));

            if top_k_queried && !improved && in_flight.is_empty() {
                debug!(target = %target_id, shortlist = shortlist.len(), "lookup converged");
                break;
            }
        }

        self.touch_buckets(&touched_buckets).await;
        shortlist.truncate(self.k);
        LookupOutcome::ClosestNodes(shortlist)
    }

    /// Resets the staleness of every bucket this lookup queried a peer
    /// through (spec.md §4.5/§4.8): organic lookup traffic counts the same
    /// as maintenance's periodic refresh pass for deciding which buckets
    /// `stale_buckets` still needs to chase.
    async fn touch_buckets(&self, buckets: &HashSet<usize>) {
        if buckets.is_empty() {
            return;
        }
        let mut table = self.routing_table.lock().await;
        for &bucket in buckets {
            table.touch_bucket(bucket);
        }
    }

    async fn query_peer(&self, peer: Peer, target: LookupTarget) -> (Peer, QueryOutcome) {
        let body = match target {
            LookupTarget::Node(id) => RequestBody::FindNode { target: id },
            LookupTarget::Value(key) => RequestBody::FindValue { key },
        };

        let result = self
            .client
            .send_cancellable_request(&peer, body, self.pending, &self.cancel)
            .await;

        let reply = match result {
            Ok(reply) => reply,
            Err(_) => return (peer, QueryOutcome::Unreachable),
        };

        // Invariant (spec.md §4.8): observe the responding peer before its
        // result is merged into the shortlist.
        self.routing_table
            .lock()
            .await
            .observe(peer.clone(), self.probe, self.request_timeout)
            .await;

        let outcome = match reply.body {
            ReplyBody::FindNode { nodes } => QueryOutcome::Nodes(
                nodes.iter().filter_map(|c| Peer::try_from(c).ok()).collect(),
            ),
            ReplyBody::FindValue(FindValueResult::Value(value)) => QueryOutcome::Value(value),
            ReplyBody::FindValue(FindValueResult::Nodes(nodes)) => QueryOutcome::Nodes(
                nodes.iter().filter_map(|c| Peer::try_from(c).ok()).collect(),
            ),
            ReplyBody::Ping | ReplyBody::Store => QueryOutcome::Unreachable,
        };
        (peer, outcome)
    }

    /// STORE fan-out (spec.md §4.8 "STORE fan-out"): after a node-lookup
    /// for `key` completes, send STORE to each of the returned peers in
    /// parallel. Failures are ignored after one timeout — STORE replies
    /// are acknowledgements only, there is nothing to retry against.
    pub async fn store_fan_out(&self, key: NodeId, value: Vec<u8>, peers: &[Peer]) {
        let mut tasks = FuturesUnordered::new();
        for peer in peers {
            let value = value.clone();
            tasks.push(async move {
                let _ = self
                    .client
                    .send_request(
                        peer,
                        RequestBody::Store {
                            key,
                            val: value,
                        },
                        self.pending,
                    )
                    .await;
            });
        }
        while tasks.next().await.is_some() {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, SocketAddr};

    use async_trait::async_trait;

    use crate::routing_table::EvictionProbe;
    use crate::transport::Transport;

    fn loopback(port: u16) -> SocketAddr {
        SocketAddr::new(Ipv4Addr::LOCALHOST.into(), port)
    }

    struct NeverProbed;
    #[async_trait]
    impl EvictionProbe for NeverProbed {
        async fn ping(&self, _peer: &Peer) -> bool {
            panic!("bucket under test never fills, no eviction probe should run");
        }
    }

    // spec.md §4.5/§4.8 — a lookup must touch every bucket it queried a peer
    // through, not just the buckets the maintenance refresh pass visits, even
    // when the queried peer never replies.
    #[tokio::test]
    async fn run_touches_buckets_it_queried_even_when_the_peer_is_unreachable() {
        let self_id = NodeId::random();
        let bucket = 40;
        let peer_id = NodeId::random_in_bucket(&self_id, bucket);

        // Bound but never drained: sends land in its socket buffer, nothing
        // ever replies, so the FIND_NODE to this peer times out.
        let peer_transport = Transport::bind(loopback(0)).await.unwrap();
        let peer_addr = peer_transport.local_addr().unwrap();

        let routing_table = Mutex::new(RoutingTable::new(self_id, 20));
        routing_table
            .lock()
            .await
            .observe(
                Peer::new(peer_id, peer_addr),
                &NeverProbed,
                Duration::from_millis(50),
            )
            .await;
        assert!(routing_table
            .lock()
            .await
            .stale_buckets(Duration::from_secs(3600))
            .contains(&bucket));

        let transport = Transport::bind(loopback(0)).await.unwrap();
        let client = RpcClient::new(transport, self_id, Duration::from_millis(50));
        let pending = PendingRequestTable::new(100);
        let probe = NeverProbed;

        let engine = LookupEngine {
            routing_table: &routing_table,
            client: &client,
            pending: &pending,
            probe: &probe,
            k: 20,
            alpha: 3,
            request_timeout: Duration::from_millis(50),
            cancel: CancellationToken::new(),
        };

        engine.run(LookupTarget::Node(self_id)).await;

        assert!(!routing_table
            .lock()
            .await
            .stale_buckets(Duration::from_secs(3600))
            .contains(&bucket));
    }
}
