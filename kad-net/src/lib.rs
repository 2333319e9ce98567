//! UDP transport, routing table, value store, RPC layer, and the iterative
//! lookup engine for a Kademlia DHT peer (spec.md §2 components C3–C9).

pub mod config;
pub mod error;
pub mod lookup;
pub mod maintenance;
pub mod node;
pub mod peer;
pub mod pending;
pub mod routing_table;
pub mod rpc_client;
pub mod rpc_server;
pub mod store;
pub mod transport;

pub use config::NetworkConfig;
pub use error::NetworkError;
pub use lookup::{LookupEngine, LookupOutcome, LookupTarget};
pub use node::Node;
pub use peer::{Peer, PeerAddr};
pub use pending::PendingRequestTable;
pub use routing_table::{EvictionProbe, ObserveOutcome, RoutingTable};
pub use rpc_client::{PingProbe, RpcClient};
pub use rpc_server::RpcServer;
pub use store::ValueStore;
pub use transport::Transport;

pub use tokio_util::sync::CancellationToken;
