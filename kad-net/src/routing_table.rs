//! Routing table / k-buckets (C5, spec.md §3, §4.5).
//!
//! The bucket data structure is pure and synchronous — bump, insert,
//! closest-peer queries, and staleness checks never touch the network. The
//! one operation that does (`observe`, whose bucket-full path sends a PING
//! to probe the incumbent) is expressed against the [`EvictionProbe`] trait
//! so the data structure itself stays testable without a transport.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use kad_protocol::NodeId;
use tracing::{debug, info, trace};

use crate::peer::Peer;

/// Sends a liveness PING to `peer` and reports whether it responded before
/// the implementation's own timeout. Implemented by the RPC client in
/// `kad-net::rpc_client` against the real transport; swapped for a
/// scripted fake in tests (spec.md scenarios S4/S5).
#[async_trait]
pub trait EvictionProbe: Send + Sync {
    async fn ping(&self, peer: &Peer) -> bool;
}

/// An ordered sequence of up to `k` peers, oldest (least-recently-seen) at
/// the head (spec.md §3 "KBucket").
#[derive(Debug, Default)]
struct KBucket {
    peers: Vec<Peer>,
}

impl KBucket {
    fn position(&self, id: &NodeId) -> Option<usize> {
        self.peers.iter().position(|p| p.id == *id)
    }

    /// Moves the peer at `idx` to the tail (most-recently-seen position).
    fn bump(&mut self, idx: usize) {
        let mut peer = self.peers.remove(idx);
        peer.touch();
        self.peers.push(peer);
    }
}

/// Outcome of [`RoutingTable::observe`], useful for logging and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObserveOutcome {
    /// The node's own id — ignored.
    SelfId,
    /// Peer was already present; bumped to the tail.
    Bumped,
    /// Bucket had room; peer appended.
    Inserted,
    /// Bucket was full, the incumbent head responded to a probe; it was
    /// bumped and the new peer discarded.
    HeadAlive,
    /// Bucket was full, the incumbent head failed to respond; it was
    /// evicted and the new peer appended.
    HeadEvicted,
    /// An eviction probe was already outstanding for this bucket; the new
    /// peer was dropped rather than queued twice.
    ProbeAlreadyInFlight,
}

/// 160 distance-indexed k-buckets plus per-bucket refresh timestamps
/// (spec.md §3 "RoutingTable").
pub struct RoutingTable {
    self_id: NodeId,
    k: usize,
    buckets: Vec<KBucket>,
    last_refresh: Vec<Instant>,
    /// Bucket indices with an eviction probe currently outstanding
    /// (spec.md §4.5 "Eviction probe concurrency").
    probing: Vec<bool>,
}

impl RoutingTable {
    pub fn new(self_id: NodeId, k: usize) -> Self {
        let now = Instant::now();
        Self {
            self_id,
            k,
            buckets: (0..160).map(|_| KBucket::default()).collect(),
            last_refresh: vec![now; 160],
            probing: vec![false; 160],
        }
    }

    pub fn self_id(&self) -> NodeId {
        self.self_id
    }

    fn bucket_index(&self, id: &NodeId) -> Option<usize> {
        self.self_id.bucket_index(id)
    }

    /// `observe(peer)` per spec.md §4.5. Requires `&mut self` rather than
    /// interior mutability because a probe round is a single atomic
    /// decision: callers hold the table behind a `tokio::sync::Mutex`.
    pub async fn observe(
        &mut self,
        peer: Peer,
        probe: &dyn EvictionProbe,
        request_timeout: Duration,
    ) -> ObserveOutcome {
        if peer.id == self.self_id {
            return ObserveOutcome::SelfId;
        }
        let Some(i) = self.bucket_index(&peer.id) else {
            return ObserveOutcome::SelfId;
        };

        if let Some(idx) = self.buckets[i].position(&peer.id) {
            self.buckets[i].bump(idx);
            trace!(peer = %peer.id, bucket = i, "bumped existing peer");
            return ObserveOutcome::Bumped;
        }

        if self.buckets[i].peers.len() < self.k {
            self.buckets[i].peers.push(peer);
            debug!(bucket = i, "inserted new peer, bucket not yet full");
            return ObserveOutcome::Inserted;
        }

        if self.probing[i] {
            debug!(bucket = i, "eviction probe already in flight, dropping candidate");
            return ObserveOutcome::ProbeAlreadyInFlight;
        }

        self.probing[i] = true;
        let head = self.buckets[i].peers[0].clone();
        let alive = tokio::time::timeout(request_timeout, probe.ping(&head))
            .await
            .unwrap_or(false);
        self.probing[i] = false;

        if alive {
            self.buckets[i].bump(0);
            info!(bucket = i, head = %head.id, "eviction probe succeeded, incumbent kept");
            ObserveOutcome::HeadAlive
        } else {
            self.buckets[i].peers.remove(0);
            self.buckets[i].peers.push(peer);
            info!(bucket = i, evicted = %head.id, "eviction probe failed, incumbent evicted");
            ObserveOutcome::HeadEvicted
        }
    }

    /// Up to `count` peers across the whole table closest to `target`,
    /// ascending by XOR distance (spec.md §4.5 "closest").
    pub fn closest(&self, target: &NodeId, count: usize) -> Vec<Peer> {
        let mut all: Vec<&Peer> = self.buckets.iter().flat_map(|b| b.peers.iter()).collect();
        all.sort_by_key(|p| target.distance(&p.id));
        all.into_iter().take(count).cloned().collect()
    }

    pub fn touch_bucket(&mut self, i: usize) {
        self.last_refresh[i] = Instant::now();
    }

    pub fn stale_buckets(&self, refresh_interval: Duration) -> Vec<usize> {
        let now = Instant::now();
        self.last_refresh
            .iter()
            .enumerate()
            .filter(|(_, &last)| now.duration_since(last) >= refresh_interval)
            .map(|(i, _)| i)
            .collect()
    }

    /// Total number of peers held across every bucket. Exposed for
    /// diagnostics/logging, not part of the spec's contract.
    pub fn len(&self) -> usize {
        self.buckets.iter().map(|b| b.peers.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
