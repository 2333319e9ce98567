//! Error taxonomy for `kad-net` (spec.md §7). Every variant maps to one of
//! the error kinds enumerated there, with the action the spec prescribes
//! noted alongside each one.

use std::net::SocketAddr;

use kad_protocol::NodeId;
use thiserror::Error;

pub type Result<T, E = NetworkError> = std::result::Result<T, E>;

/// Errors surfaced by the transport, pending-request table, routing table,
/// and RPC layers. `BindError` is the only variant fatal at startup; the
/// rest are handled locally per spec.md §7.
#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("malformed datagram from {from}: {source}")]
    DecodeError {
        from: SocketAddr,
        #[source]
        source: kad_protocol::DecodeError,
    },

    #[error("request to {peer:?} ({echo}) timed out")]
    Timeout { peer: Option<NodeId>, echo: NodeId },

    #[error("failed to bind UDP socket on {addr}: {source}")]
    BindError {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to send datagram to {addr}: {source}")]
    SendError {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to receive on {local_addr}: {source}")]
    RecvError {
        local_addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("pending-request table is saturated ({capacity} entries in flight)")]
    Backpressure { capacity: usize },

    #[error("request to {peer:?} ({echo}) was cancelled by its initiator")]
    Cancelled { peer: Option<NodeId>, echo: NodeId },

    #[error("protocol violation from {from:?}: {reason}")]
    ProtocolError {
        from: Option<NodeId>,
        reason: String,
    },
}
