//! Outbound RPC plumbing: encodes a request, registers it in the
//! pending-request table, sends it, and awaits the correlated reply.
//!
//! This is also where [`EvictionProbe`](crate::routing_table::EvictionProbe)
//! is implemented, since probing a bucket's head is just a PING like any
//! other outbound request.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use kad_protocol::{decode, encode, EchoToken, NodeId, Reply, Request, RequestBody, RpcMessage};
use tokio_util::sync::CancellationToken;
use tracing::{trace, warn};

use crate::error::NetworkError;
use crate::peer::Peer;
use crate::pending::PendingRequestTable;
use crate::routing_table::EvictionProbe;
use crate::transport::Transport;

#[derive(Clone)]
pub struct RpcClient {
    transport: Transport,
    self_id: NodeId,
    request_timeout: Duration,
}

impl RpcClient {
    pub fn new(transport: Transport, self_id: NodeId, request_timeout: Duration) -> Self {
        Self {
            transport,
            self_id,
            request_timeout,
        }
    }

    /// Sends `body` to `peer` and awaits its reply, correlated through
    /// `pending` by a fresh echo token (spec.md §4.4). Not itself
    /// cancellable — used by the eviction prober and STORE fan-out, neither
    /// of which spec.md §5 "Cancellation" applies to (only an iterative
    /// lookup's FIND_* traffic is cancellable by its initiator).
    pub async fn send_request(
        &self,
        peer: &Peer,
        body: RequestBody,
        pending: &PendingRequestTable,
    ) -> Result<Reply, NetworkError> {
        self.send_cancellable_request(peer, body, pending, &CancellationToken::new())
            .await
    }

    /// As [`send_request`](Self::send_request), but resolves early as
    /// [`NetworkError::Cancelled`] if `cancel` fires first — the mechanism
    /// an iterative lookup uses to implement spec.md §5 "Cancellation".
    pub async fn send_cancellable_request(
        &self,
        peer: &Peer,
        body: RequestBody,
        pending: &PendingRequestTable,
        cancel: &CancellationToken,
    ) -> Result<Reply, NetworkError> {
        let echo = EchoToken::random();
        let msg = RpcMessage::Request(Request {
            src: self.self_id,
            echo,
            body,
        });
        let bytes = encode(&msg);

        // Registration is awaited here, strictly before the send, so a
        // reply that arrives immediately after the datagram leaves cannot
        // race ahead of the table knowing to expect it.
        let rx = pending.register(echo, peer.id).await?;
        self.transport.send(peer.addr, &bytes).await;
        pending
            .wait(echo, peer.id, rx, self.request_timeout, cancel)
            .await
    }

    /// Sends a first-contact PING to `addr`, whose peer id is not yet
    /// known — the case of a bootstrap peer, configured by address only
    /// (spec.md §4.8 "Bootstrap"). Correlates by echo token alone: there
    /// is no id to apply spec.md §4.4(b)'s src-match rule against yet, so
    /// any reply for this echo token is accepted, and its `src` is the
    /// peer's newly learned id.
    pub async fn send_first_contact_ping(
        &self,
        addr: std::net::SocketAddr,
        pending: &PendingRequestTable,
    ) -> Result<Reply, NetworkError> {
        let echo = EchoToken::random();
        let msg = RpcMessage::Request(Request {
            src: self.self_id,
            echo,
            body: RequestBody::Ping,
        });
        let bytes = encode(&msg);

        let rx = pending.register_unknown_src(echo).await?;
        self.transport.send(addr, &bytes).await;
        pending.wait_unknown_src(echo, rx, self.request_timeout).await
    }

    /// Decodes an inbound datagram, logging and dropping anything
    /// malformed (spec.md §7 `DecodeError`: "drop, count, continue").
    pub fn decode_inbound(
        &self,
        from: std::net::SocketAddr,
        bytes: &[u8],
    ) -> Option<RpcMessage> {
        match decode(bytes) {
            Ok(msg) => Some(msg),
            Err(source) => {
                warn!(%from, error = %source, "failed to decode datagram");
                None
            }
        }
    }
}

/// A probe harness pairs an [`RpcClient`] with the pending-request table it
/// needs to await a reply; `RoutingTable::observe` only sees the narrow
/// [`EvictionProbe`] seam. Owns `Arc`s rather than borrowing so it can be
/// shared with the long-lived maintenance scheduler (`Arc<dyn EvictionProbe>`).
pub struct PingProbe {
    pub client: Arc<RpcClient>,
    pub pending: Arc<PendingRequestTable>,
}

#[async_trait]
impl EvictionProbe for PingProbe {
    async fn ping(&self, peer: &Peer) -> bool {
        match self
            .client
            .send_request(peer, RequestBody::Ping, &self.pending)
            .await
        {
            Ok(_) => true,
            Err(NetworkError::Timeout { .. }) => false,
            Err(other) => {
                trace!(peer = %peer.id, error = %other, "probe ping failed");
                false
            }
        }
    }
}
