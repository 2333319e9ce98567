//! S6 — three-node ring bootstrap; STORE via one node, FIND_VALUE from a
//! fourth returns the stored value (spec.md §8).

use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use kad_net::{NetworkConfig, Node};
use kad_protocol::NodeId;

fn loopback(port: u16) -> SocketAddr {
    SocketAddr::new(Ipv4Addr::LOCALHOST.into(), port)
}

async fn spawn_node(bootstrap_of: Option<SocketAddr>) -> (std::sync::Arc<Node>, SocketAddr) {
    let mut config = NetworkConfig::new(loopback(0));
    config.request_timeout = Duration::from_millis(500);
    if let Some(addr) = bootstrap_of {
        config.bootstrap_peers.push(addr);
    }
    let node = std::sync::Arc::new(Node::bind(config).await.expect("bind"));
    let addr = node.transport.local_addr().expect("local addr");
    let serve_node = std::sync::Arc::clone(&node);
    tokio::spawn(async move { serve_node.serve().await });
    if bootstrap_of.is_some() {
        node.bootstrap().await;
    }
    (node, addr)
}

#[tokio::test]
async fn store_then_find_value_across_a_ring() {
    let (node_a, addr_a) = spawn_node(None).await;
    let (node_b, _addr_b) = spawn_node(Some(addr_a)).await;
    let (node_c, _addr_c) = spawn_node(Some(addr_a)).await;
    let (node_d, _addr_d) = spawn_node(Some(addr_a)).await;

    // Give bootstrap lookups time to populate routing tables both ways.
    tokio::time::sleep(Duration::from_millis(200)).await;

    let key = NodeId::random();
    node_b.store(key, b"noodles".to_vec()).await;

    tokio::time::sleep(Duration::from_millis(100)).await;

    let found = node_d.find_value(key).await;
    assert_eq!(found, Some(b"noodles".to_vec()));

    // Sanity: node A (the bootstrap seed) learned about its peers too.
    assert!(node_a.routing_table.lock().await.len() >= 1);
    assert!(node_c.routing_table.lock().await.len() >= 1);
}
