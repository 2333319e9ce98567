//! Wire protocol for the kad-dht peer: 160-bit node identifiers, the XOR
//! distance metric, and the RPC message types exchanged between peers.
//!
//! This crate has no networking or storage logic of its own — it is the
//! vocabulary `kad-net` speaks, kept separate so it can be reused by
//! anything that needs to talk the protocol without pulling in a UDP
//! transport (e.g. tests, future tooling).

pub mod codec;
pub mod message;
pub mod node_id;

pub use codec::{decode, encode};
pub use message::{
    ContactInfo, DecodeError, EchoToken, FindValueResult, MessageKind, Reply, ReplyBody, Request,
    RequestBody, RpcKind, RpcMessage, WireMessage,
};
pub use node_id::{NodeId, NodeIdError, Distance, ID_LEN};
