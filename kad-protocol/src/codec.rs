//! MessagePack framing for [`RpcMessage`]. Every UDP datagram is exactly
//! one `rmp_serde::to_vec_named` frame — self-describing, so unknown
//! fields are ignored rather than rejected (spec.md §6, §9).

use crate::message::{DecodeError, RpcMessage, WireMessage};

/// Encodes a message for sending over the wire.
pub fn encode(msg: &RpcMessage) -> Vec<u8> {
    let wire: WireMessage = msg.clone().into();
    // Field names round-trip, not just positions, so the struct can grow
    // new optional fields later without breaking older decoders.
    rmp_serde::to_vec_named(&wire).expect("WireMessage is always serializable")
}

/// Decodes a datagram payload into a typed message.
pub fn decode(bytes: &[u8]) -> Result<RpcMessage, DecodeError> {
    let wire: WireMessage = rmp_serde::from_slice(bytes)?;
    wire.try_into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Reply, ReplyBody, Request, RequestBody};
    use crate::node_id::NodeId;

    #[test]
    fn ping_request_roundtrips_through_bytes() {
        let msg = RpcMessage::Request(Request {
            src: NodeId::random(),
            echo: NodeId::random(),
            body: RequestBody::Ping,
        });
        let bytes = encode(&msg);
        let back = decode(&bytes).unwrap();
        assert_eq!(msg, back);
    }

    #[test]
    fn store_roundtrips_with_binary_value() {
        let msg = RpcMessage::Request(Request {
            src: NodeId::random(),
            echo: NodeId::random(),
            body: RequestBody::Store {
                key: NodeId::random(),
                val: vec![0xde, 0xad, 0xbe, 0xef, 0x00, 0xff],
            },
        });
        let bytes = encode(&msg);
        assert_eq!(decode(&bytes).unwrap(), msg);
    }

    #[test]
    fn find_node_reply_roundtrips_with_empty_nodes() {
        let msg = RpcMessage::Reply(Reply {
            src: NodeId::random(),
            echo: NodeId::random(),
            body: ReplyBody::FindNode { nodes: vec![] },
        });
        let bytes = encode(&msg);
        assert_eq!(decode(&bytes).unwrap(), msg);
    }

    #[test]
    fn garbage_bytes_fail_to_decode() {
        let garbage = [0xffu8; 8];
        assert!(matches!(decode(&garbage), Err(DecodeError::Malformed(_))));
    }
}
