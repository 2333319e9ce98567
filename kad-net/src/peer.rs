//! `PeerAddr` and `Peer` (spec.md §3).

use std::net::{AddrParseError, IpAddr, SocketAddr};
use std::time::Instant;

use kad_protocol::{ContactInfo, NodeId};

/// Transport address of a peer. Immutable after construction — a peer that
/// changes address is a different `Peer` as far as the routing table is
/// concerned.
pub type PeerAddr = SocketAddr;

/// A known peer: its identity, address, and the last time it was observed.
///
/// Two peers are equal iff their ids are equal (spec.md §3); `last_seen` and
/// `alive` are mutable bookkeeping, not part of identity.
#[derive(Debug, Clone)]
pub struct Peer {
    pub id: NodeId,
    pub addr: PeerAddr,
    pub last_seen: Instant,
}

impl Peer {
    pub fn new(id: NodeId, addr: PeerAddr) -> Self {
        Self {
            id,
            addr,
            last_seen: Instant::now(),
        }
    }

    pub fn touch(&mut self) {
        self.last_seen = Instant::now();
    }

    pub fn to_contact_info(&self) -> ContactInfo {
        ContactInfo {
            ip: self.addr.ip().to_string(),
            port: self.addr.port(),
            id: self.id,
        }
    }
}

impl TryFrom<&ContactInfo> for Peer {
    type Error = AddrParseError;

    fn try_from(contact: &ContactInfo) -> Result<Self, Self::Error> {
        let ip: IpAddr = contact.ip.parse()?;
        Ok(Peer::new(contact.id, SocketAddr::new(ip, contact.port)))
    }
}

impl PartialEq for Peer {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Peer {}
