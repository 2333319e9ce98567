//! RPC message types (spec.md §3 `RpcMessage`, §6 wire format) and the
//! conversion between the self-describing wire envelope and the typed,
//! per-RPC message shapes the rest of the system works with.
//!
//! The wire envelope (`WireMessage`) mirrors the dynamic key/value bag the
//! original implementation used, so unknown fields are tolerated for
//! forward compatibility (spec.md §4.2, §9). Everything above the codec
//! boundary works with the typed `RpcMessage` tagged union instead, per the
//! redesign called for in spec.md §9.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::node_id::NodeId;

/// A per-request/reply correlation nonce. Shares `NodeId`'s 160-bit hex
/// representation (spec.md §6: "160-bit correlation token, 40-char
/// lowercase hex") but carries no distance semantics of its own.
pub type EchoToken = NodeId;

/// Contact information for a peer as carried inside `FIND_NODE` /
/// `FIND_VALUE` replies: `[ip_string, port_int, id_hex]` (spec.md §6).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactInfo {
    pub ip: String,
    pub port: u16,
    pub id: NodeId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageKind {
    #[serde(rename = "REQ")]
    Request,
    #[serde(rename = "REP")]
    Reply,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RpcKind {
    #[serde(rename = "PING")]
    Ping,
    #[serde(rename = "STORE")]
    Store,
    #[serde(rename = "FIND_NODE")]
    FindNode,
    #[serde(rename = "FIND_VALUE")]
    FindValue,
}

/// The literal wire envelope: one struct with every possible field,
/// optional fields skipped when absent. This is what actually crosses the
/// UDP socket (spec.md §4.2, §6). `#[serde(default)]` on every optional
/// field means fields present in a future version but unknown to this one
/// are simply dropped by the deserializer rather than causing a decode
/// error, and fields this version expects but a sender omits come back as
/// `None` rather than failing to parse.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireMessage {
    pub r#type: MessageKind,
    pub rpc: RpcKind,
    pub src: NodeId,
    pub echo: EchoToken,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<NodeId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<NodeId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub val: Option<Vec<u8>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Vec<u8>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nodes: Option<Vec<ContactInfo>>,
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed datagram: {0}")]
    Malformed(#[from] rmp_serde::decode::Error),
    #[error("{rpc:?} {kind:?} is missing required field `{field}`")]
    MissingField {
        rpc: RpcKind,
        kind: MessageKind,
        field: &'static str,
    },
}

/// Typed request body, one variant per RPC (spec.md §4.7, §6).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestBody {
    Ping,
    Store { key: NodeId, val: Vec<u8> },
    FindNode { target: NodeId },
    FindValue { key: NodeId },
}

/// Typed reply body, one variant per RPC.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyBody {
    Ping,
    Store,
    FindNode { nodes: Vec<ContactInfo> },
    /// Either the stored value, or the closest known nodes — never both
    /// (spec.md §4.7 FIND_VALUE).
    FindValue(FindValueResult),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FindValueResult {
    Value(Vec<u8>),
    Nodes(Vec<ContactInfo>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub src: NodeId,
    pub echo: EchoToken,
    pub body: RequestBody,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub src: NodeId,
    pub echo: EchoToken,
    pub body: ReplyBody,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RpcMessage {
    Request(Request),
    Reply(Reply),
}

impl RpcMessage {
    pub fn src(&self) -> NodeId {
        match self {
            RpcMessage::Request(r) => r.src,
            RpcMessage::Reply(r) => r.src,
        }
    }

    pub fn echo(&self) -> EchoToken {
        match self {
            RpcMessage::Request(r) => r.echo,
            RpcMessage::Reply(r) => r.echo,
        }
    }
}

impl TryFrom<WireMessage> for RpcMessage {
    type Error = DecodeError;

    fn try_from(w: WireMessage) -> Result<Self, Self::Error> {
        let missing = |field: &'static str| DecodeError::MissingField {
            rpc: w.rpc,
            kind: w.r#type,
            field,
        };

        match w.r#type {
            MessageKind::Request => {
                let body = match w.rpc {
                    RpcKind::Ping => RequestBody::Ping,
                    RpcKind::Store => RequestBody::Store {
                        key: w.key.ok_or_else(|| missing("key"))?,
                        val: w.val.ok_or_else(|| missing("val"))?,
                    },
                    // Per spec.md §9 open question: a request's `id` field
                    // names the FIND_NODE lookup target, never the sender.
                    RpcKind::FindNode => RequestBody::FindNode {
                        target: w.id.ok_or_else(|| missing("id"))?,
                    },
                    RpcKind::FindValue => RequestBody::FindValue {
                        key: w.key.ok_or_else(|| missing("key"))?,
                    },
                };
                Ok(RpcMessage::Request(Request {
                    src: w.src,
                    echo: w.echo,
                    body,
                }))
            }
            MessageKind::Reply => {
                let body = match w.rpc {
                    RpcKind::Ping => ReplyBody::Ping,
                    RpcKind::Store => ReplyBody::Store,
                    RpcKind::FindNode => ReplyBody::FindNode {
                        nodes: w.nodes.ok_or_else(|| missing("nodes"))?,
                    },
                    RpcKind::FindValue => {
                        if let Some(value) = w.value {
                            ReplyBody::FindValue(FindValueResult::Value(value))
                        } else if let Some(nodes) = w.nodes {
                            ReplyBody::FindValue(FindValueResult::Nodes(nodes))
                        } else {
                            return Err(missing("value|nodes"));
                        }
                    }
                };
                Ok(RpcMessage::Reply(Reply {
                    src: w.src,
                    echo: w.echo,
                    body,
                }))
            }
        }
    }
}

impl From<RpcMessage> for WireMessage {
    fn from(msg: RpcMessage) -> Self {
        match msg {
            RpcMessage::Request(Request { src, echo, body }) => {
                let mut w = WireMessage {
                    r#type: MessageKind::Request,
                    rpc: rpc_kind_of_request(&body),
                    src,
                    echo,
                    id: None,
                    key: None,
                    val: None,
                    value: None,
                    nodes: None,
                };
                match body {
                    RequestBody::Ping => {}
                    RequestBody::Store { key, val } => {
                        w.key = Some(key);
                        w.val = Some(val);
                    }
                    RequestBody::FindNode { target } => w.id = Some(target),
                    RequestBody::FindValue { key } => w.key = Some(key),
                }
                w
            }
            RpcMessage::Reply(Reply { src, echo, body }) => {
                let mut w = WireMessage {
                    r#type: MessageKind::Reply,
                    rpc: rpc_kind_of_reply(&body),
                    src,
                    echo,
                    id: None,
                    key: None,
                    val: None,
                    value: None,
                    nodes: None,
                };
                match body {
                    ReplyBody::Ping | ReplyBody::Store => {}
                    ReplyBody::FindNode { nodes } => w.nodes = Some(nodes),
                    ReplyBody::FindValue(FindValueResult::Value(value)) => w.value = Some(value),
                    ReplyBody::FindValue(FindValueResult::Nodes(nodes)) => w.nodes = Some(nodes),
                }
                w
            }
        }
    }
}

fn rpc_kind_of_request(body: &RequestBody) -> RpcKind {
    match body {
        RequestBody::Ping => RpcKind::Ping,
        RequestBody::Store { .. } => RpcKind::Store,
        RequestBody::FindNode { .. } => RpcKind::FindNode,
        RequestBody::FindValue { .. } => RpcKind::FindValue,
    }
}

fn rpc_kind_of_reply(body: &ReplyBody) -> RpcKind {
    match body {
        ReplyBody::Ping => RpcKind::Ping,
        ReplyBody::Store => RpcKind::Store,
        ReplyBody::FindNode { .. } => RpcKind::FindNode,
        ReplyBody::FindValue { .. } => RpcKind::FindValue,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(byte: u8) -> NodeId {
        let mut bytes = [0u8; 20];
        bytes[19] = byte;
        NodeId::from_bytes(bytes)
    }

    #[test]
    fn find_node_request_roundtrips_through_wire_message() {
        let msg = RpcMessage::Request(Request {
            src: id(1),
            echo: id(2),
            body: RequestBody::FindNode { target: id(3) },
        });
        let wire: WireMessage = msg.clone().into();
        assert_eq!(wire.rpc, RpcKind::FindNode);
        assert_eq!(wire.id, Some(id(3)));
        let back: RpcMessage = wire.try_into().unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn find_value_reply_prefers_value_over_nodes() {
        let wire = WireMessage {
            r#type: MessageKind::Reply,
            rpc: RpcKind::FindValue,
            src: id(1),
            echo: id(2),
            id: None,
            key: None,
            val: None,
            value: Some(b"noodles".to_vec()),
            nodes: Some(vec![]),
        };
        let msg: RpcMessage = wire.try_into().unwrap();
        match msg {
            RpcMessage::Reply(Reply {
                body: ReplyBody::FindValue(FindValueResult::Value(v)),
                ..
            }) => assert_eq!(v, b"noodles"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn missing_required_field_is_rejected() {
        let wire = WireMessage {
            r#type: MessageKind::Request,
            rpc: RpcKind::Store,
            src: id(1),
            echo: id(2),
            id: None,
            key: Some(id(3)),
            val: None, // missing `val`
            value: None,
            nodes: None,
        };
        let result: Result<RpcMessage, _> = wire.try_into();
        assert!(matches!(
            result,
            Err(DecodeError::MissingField { field: "val", .. })
        ));
    }
}
