//! 160-bit node identifiers and the XOR distance metric between them.

use std::fmt;

use rand::RngCore;
use thiserror::Error;

/// Number of bytes in a [`NodeId`] (160 bits).
pub const ID_LEN: usize = 20;

/// An opaque 160-bit identifier in the Kademlia keyspace. Used both for
/// node identities and for value keys — the two share a keyspace by design.
#[derive(Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct NodeId([u8; ID_LEN]);

#[derive(Debug, Error)]
pub enum NodeIdError {
    #[error("node id must be exactly {ID_LEN} bytes, got {0}")]
    WrongLength(usize),
    #[error("invalid hex in node id: {0}")]
    InvalidHex(#[from] hex::FromHexError),
}

impl NodeId {
    /// Generates a cryptographically random id, per spec.md §6 (`self_id`
    /// falls back to this when not explicitly configured).
    pub fn random() -> Self {
        let mut bytes = [0u8; ID_LEN];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Builds a node id from a random id generator seeded for a given
    /// range — used by the lookup engine to pick a random target inside a
    /// given bucket when triggering bucket refresh (spec.md §4.9) and
    /// bootstrap's "lookup for a random id in every farther bucket"
    /// (spec.md §4.8 "Bootstrap").
    ///
    /// The returned id agrees with `self_id` on the first `prefix_bits` of
    /// the XOR distance's leading zero run, i.e. it falls inside bucket
    /// `bucket_index` of `self_id`'s routing table.
    pub fn random_in_bucket(self_id: &NodeId, bucket_index: usize) -> Self {
        let mut bytes = self_id.0;
        let mut rng_bytes = [0u8; ID_LEN];
        rand::rngs::OsRng.fill_bytes(&mut rng_bytes);

        // Flip the bit at position `bucket_index` (counting from the MSB of
        // the whole id, bit 0 = MSB) so distance(self, result) has its
        // highest set bit exactly at `bucket_index`; then randomize
        // everything after that bit to land anywhere within the bucket.
        let byte_idx = bucket_index / 8;
        let bit_in_byte = 7 - (bucket_index % 8);
        bytes[byte_idx] ^= 1 << bit_in_byte;

        for i in (byte_idx + 1)..ID_LEN {
            bytes[i] = rng_bytes[i];
        }
        // Randomize the bits after the flipped one within its own byte.
        let mask_below = (1u16 << bit_in_byte) as u8 - 1;
        bytes[byte_idx] = (bytes[byte_idx] & !mask_below) | (rng_bytes[byte_idx] & mask_below);

        Self(bytes)
    }

    pub fn from_bytes(bytes: [u8; ID_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; ID_LEN] {
        &self.0
    }

    /// Parses a 40-char lowercase hex string, per the wire format in
    /// spec.md §6.
    pub fn from_hex(s: &str) -> Result<Self, NodeIdError> {
        let decoded = hex::decode(s)?;
        if decoded.len() != ID_LEN {
            return Err(NodeIdError::WrongLength(decoded.len()));
        }
        let mut bytes = [0u8; ID_LEN];
        bytes.copy_from_slice(&decoded);
        Ok(Self(bytes))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// The Kademlia distance metric: XOR interpreted as an unsigned
    /// 160-bit integer (spec.md §4.1).
    pub fn distance(&self, other: &NodeId) -> Distance {
        let mut out = [0u8; ID_LEN];
        for i in 0..ID_LEN {
            out[i] = self.0[i] ^ other.0[i];
        }
        Distance(out)
    }

    /// `bucket_index(self, other) = 159 - leading_zero_bits(distance)`.
    /// Undefined (returns `None`) when the ids are equal — that peer is
    /// never inserted into the routing table (spec.md §4.1, §8 invariant 3).
    pub fn bucket_index(&self, other: &NodeId) -> Option<usize> {
        self.distance(other).bucket_index()
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", self.to_hex())
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// XOR distance between two [`NodeId`]s, ordered the same as the unsigned
/// 160-bit integer it represents (lexicographic byte comparison, since the
/// bytes are stored most-significant-first).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Distance([u8; ID_LEN]);

impl Distance {
    /// Index of the most significant set bit, i.e. `159 - leading_zeros`.
    /// `None` when the distance is zero (identical ids).
    pub fn bucket_index(&self) -> Option<usize> {
        for (byte_idx, byte) in self.0.iter().enumerate() {
            if *byte != 0 {
                let leading = byte.leading_zeros() as usize;
                return Some(159 - (byte_idx * 8 + leading));
            }
        }
        None
    }

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }
}

impl fmt::Debug for Distance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Distance({})", hex::encode(self.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // S1 — Bucket index.
    #[test]
    fn bucket_index_of_adjacent_ids_is_zero() {
        let self_id = NodeId::from_bytes([0u8; ID_LEN]);
        let mut other = [0u8; ID_LEN];
        other[ID_LEN - 1] = 1;
        let other_id = NodeId::from_bytes(other);
        assert_eq!(self_id.bucket_index(&other_id), Some(0));
    }

    #[test]
    fn bucket_index_of_msb_flip_is_159() {
        let self_id = NodeId::from_bytes([0u8; ID_LEN]);
        let mut other = [0u8; ID_LEN];
        other[0] = 0x80;
        let other_id = NodeId::from_bytes(other);
        assert_eq!(self_id.bucket_index(&other_id), Some(159));
    }

    #[test]
    fn identical_ids_have_no_bucket() {
        let id = NodeId::random();
        assert_eq!(id.bucket_index(&id), None);
        assert!(id.distance(&id).is_zero());
    }

    #[test]
    fn hex_roundtrip() {
        let id = NodeId::random();
        let hex = id.to_hex();
        assert_eq!(hex.len(), 40);
        let back = NodeId::from_hex(&hex).unwrap();
        assert_eq!(id, back);
    }

    #[test]
    fn from_hex_rejects_wrong_length() {
        assert!(matches!(
            NodeId::from_hex("abcd"),
            Err(NodeIdError::WrongLength(_))
        ));
    }

    #[test]
    fn random_in_bucket_lands_in_requested_bucket() {
        let self_id = NodeId::random();
        for bucket in [0usize, 1, 63, 100, 159] {
            let candidate = NodeId::random_in_bucket(&self_id, bucket);
            assert_eq!(self_id.bucket_index(&candidate), Some(bucket));
        }
    }

    #[test]
    fn distance_ordering_matches_numeric_order() {
        let target = NodeId::from_bytes([0u8; ID_LEN]);
        let mut near = [0u8; ID_LEN];
        near[ID_LEN - 1] = 1;
        let mut far = [0u8; ID_LEN];
        far[0] = 1;
        let near_id = NodeId::from_bytes(near);
        let far_id = NodeId::from_bytes(far);
        assert!(target.distance(&near_id) < target.distance(&far_id));
    }
}
