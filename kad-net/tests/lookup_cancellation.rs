//! spec.md §5 "Cancellation": a lookup's initiator can cancel it mid-flight.
//! Cancellation must cut a lookup short well before its in-flight requests'
//! full timeout, and must not schedule any further FIND_*s afterward.

use std::net::{Ipv4Addr, SocketAddr};
use std::time::{Duration, Instant};

use kad_net::{LookupOutcome, LookupTarget, NetworkConfig, Node};
use kad_protocol::NodeId;

fn loopback(port: u16) -> SocketAddr {
    SocketAddr::new(Ipv4Addr::LOCALHOST.into(), port)
}

#[tokio::test]
async fn cancelling_a_lookup_returns_well_before_the_request_timeout() {
    let mut config = NetworkConfig::new(loopback(0));
    config.request_timeout = Duration::from_secs(5);
    let node = Node::bind(config).await.expect("bind");

    // Seed the routing table with a peer address nothing is listening on,
    // so its FIND_NODE would otherwise hang until the full request timeout.
    let unreachable_addr = loopback(0);
    let unreachable_peer = kad_net::Peer::new(NodeId::random(), {
        // bind a socket briefly to grab a genuinely free port, then drop it
        // so the address is guaranteed unoccupied for the test's duration.
        let probe = std::net::UdpSocket::bind(unreachable_addr).unwrap();
        probe.local_addr().unwrap()
    });
    node.routing_table
        .lock()
        .await
        .observe(
            unreachable_peer,
            &*node.probe,
            Duration::from_millis(50),
        )
        .await;

    let (engine, cancel) = node.cancellable_lookup_engine();
    let target = NodeId::random();

    let started = Instant::now();
    let run = engine.run(LookupTarget::Node(target));
    let cancel_after_a_beat = async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
    };

    let (outcome, ()) = tokio::join!(run, cancel_after_a_beat);
    let elapsed = started.elapsed();

    assert!(matches!(outcome, LookupOutcome::ClosestNodes(_)));
    assert!(
        elapsed < Duration::from_secs(1),
        "cancellation should cut the lookup short long before its 5s request timeout, took {elapsed:?}"
    );
}
