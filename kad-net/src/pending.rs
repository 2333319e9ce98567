//! Pending-request table (C4, spec.md §4.4): correlates outbound requests
//! with inbound replies by echo token, with a per-request timeout and the
//! `src`-mismatch protection described there.

use std::collections::HashMap;
use std::time::Duration;

use kad_protocol::{EchoToken, NodeId, Reply};
use tokio::sync::{oneshot, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{trace, warn};

use crate::error::NetworkError;

struct PendingEntry {
    /// `None` for a first-contact request whose peer id is not yet known
    /// (spec.md §4.8 "Bootstrap": a bootstrap peer is configured by
    /// address only). `deliver` accepts any `src` for such an entry —
    /// spec.md §4.4(b)'s src-match rule presupposes an expected id to
    /// match against, which doesn't exist yet here.
    expected_peer_id: Option<NodeId>,
    tx: oneshot::Sender<Reply>,
}

/// Registers in-flight requests keyed by echo token and wakes their waiter
/// when a matching reply arrives, or when the caller's deadline elapses.
///
/// Shared behind an async mutex per spec.md §4.4 "the table is shared...
/// inserts and deletes are mutually exclusive".
pub struct PendingRequestTable {
    entries: Mutex<HashMap<EchoToken, PendingEntry>>,
    capacity: usize,
}

impl PendingRequestTable {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            capacity,
        }
    }

    /// Registers `echo_token` and returns the receiving half of its
    /// rendezvous. Split out from [`wait`](Self::wait) so callers can force
    /// registration to complete (by awaiting this call) strictly before
    /// the request is handed to the transport — an `async fn` does nothing
    /// until polled, so a future built by a would-be combined
    /// "register-then-send-then-wait" helper would otherwise register only
    /// once the caller got around to awaiting it, after the send.
    pub async fn register(
        &self,
        echo_token: EchoToken,
        expected_peer_id: NodeId,
    ) -> Result<oneshot::Receiver<Reply>, NetworkError> {
        self.register_entry(echo_token, Some(expected_peer_id)).await
    }

    /// Registers `echo_token` for a first-contact request whose peer id
    /// isn't known yet — e.g. the initial PING to a bootstrap peer
    /// configured only by address (spec.md §4.8 "Bootstrap"). Any `src`
    /// is accepted by [`deliver`](Self::deliver) for this entry, and the
    /// reply's `src` is the peer's newly learned id.
    pub async fn register_unknown_src(
        &self,
        echo_token: EchoToken,
    ) -> Result<oneshot::Receiver<Reply>, NetworkError> {
        self.register_entry(echo_token, None).await
    }

    async fn register_entry(
        &self,
        echo_token: EchoToken,
        expected_peer_id: Option<NodeId>,
    ) -> Result<oneshot::Receiver<Reply>, NetworkError> {
        let (tx, rx) = oneshot::channel();
        let mut entries = self.entries.lock().await;
        if entries.len() >= self.capacity {
            return Err(NetworkError::Backpressure {
                capacity: self.capacity,
            });
        }
        entries.insert(
            echo_token,
            PendingEntry {
                expected_peer_id,
                tx,
            },
        );
        Ok(rx)
    }

    /// Suspends on an already-[`register`](Self::register)ed token until
    /// either a matching reply arrives via [`deliver`](Self::deliver), the
    /// caller's `timeout` elapses, or `cancel` fires — whichever happens
    /// first. The registration is always removed before returning, so a
    /// cancelled lookup cannot leak a pending-request table entry (spec.md
    /// §5 "Cancellation must not leak pending-request table entries").
    pub async fn wait(
        &self,
        echo_token: EchoToken,
        expected_peer_id: NodeId,
        rx: oneshot::Receiver<Reply>,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<Reply, NetworkError> {
        let outcome = tokio::select! {
            result = tokio::time::timeout(timeout, rx) => Ok(result),
            () = cancel.cancelled() => Err(()),
        };
        self.entries.lock().await.remove(&echo_token);

        match outcome {
            Err(()) => {
                trace!(echo = %echo_token, peer = %expected_peer_id, "request cancelled by initiator");
                Err(NetworkError::Cancelled {
                    peer: Some(expected_peer_id),
                    echo: echo_token,
                })
            }
            Ok(Ok(Ok(reply))) => Ok(reply),
            Ok(Ok(Err(_))) | Ok(Err(_)) => {
                trace!(echo = %echo_token, peer = %expected_peer_id, "request timed out");
                Err(NetworkError::Timeout {
                    peer: Some(expected_peer_id),
                    echo: echo_token,
                })
            }
        }
    }

    /// As [`wait`](Self::wait), for a token registered via
    /// [`register_unknown_src`](Self::register_unknown_src): there is no
    /// expected peer id to validate a reply's `src` against (`deliver`
    /// already accepts any `src` for this entry), and none to report on
    /// timeout — the point of this path is that the peer isn't known yet.
    /// Not cancellable: first-contact requests (bootstrap's seed PING)
    /// aren't part of a cancellable iterative lookup (spec.md §5).
    pub async fn wait_unknown_src(
        &self,
        echo_token: EchoToken,
        rx: oneshot::Receiver<Reply>,
        timeout: Duration,
    ) -> Result<Reply, NetworkError> {
        let result = tokio::time::timeout(timeout, rx).await;
        self.entries.lock().await.remove(&echo_token);
        match result {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) | Err(_) => {
                trace!(echo = %echo_token, "first-contact request timed out");
                Err(NetworkError::Timeout {
                    peer: None,
                    echo: echo_token,
                })
            }
        }
    }

    /// Convenience wrapper combining [`register`](Self::register) and
    /// [`wait`](Self::wait) for callers (tests, direct probes) that have no
    /// send step to interleave between them and are never cancelled.
    pub async fn await_reply(
        &self,
        echo_token: EchoToken,
        expected_peer_id: NodeId,
        timeout: Duration,
    ) -> Result<Reply, NetworkError> {
        let rx = self.register(echo_token, expected_peer_id).await?;
        self.wait(
            echo_token,
            expected_peer_id,
            rx,
            timeout,
            &CancellationToken::new(),
        )
        .await
    }

    /// Looks up by `reply.echo`; wakes the waiter iff its `src` also
    /// matches the peer the original request was sent to (spec.md §4.4
    /// "Matching rule"), or unconditionally if the entry was registered
    /// via [`register_unknown_src`](Self::register_unknown_src) (no
    /// expected peer to match against). Returns `true` iff the reply was
    /// delivered.
    pub async fn deliver(&self, reply: Reply) -> bool {
        let mut entries = self.entries.lock().await;
        let Some(entry) = entries.get(&reply.echo) else {
            trace!(echo = %reply.echo, "reply for unregistered echo token, discarding");
            return false;
        };
        if let Some(expected) = entry.expected_peer_id {
            if expected != reply.src {
                warn!(
                    echo = %reply.echo,
                    expected = %expected,
                    got = %reply.src,
                    "reply src mismatch, keeping waiter pending"
                );
                return false;
            }
        }
        let entry = entries.remove(&reply.echo).expect("checked above");
        // The receiver may already be gone (e.g. the waiter's future was
        // dropped on cancellation); that is not an error here.
        let _ = entry.tx.send(reply);
        true
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kad_protocol::ReplyBody;

    fn id(byte: u8) -> NodeId {
        let mut bytes = [0u8; 20];
        bytes[19] = byte;
        NodeId::from_bytes(bytes)
    }

    // S2 — echo mismatch.
    #[tokio::test]
    async fn reply_with_wrong_echo_does_not_resolve_waiter() {
        let table = PendingRequestTable::new(10);
        let e1 = id(1);
        let e2 = id(2);
        let peer = id(3);

        let wait = table.await_reply(e1, peer, Duration::from_millis(50));
        let deliver_wrong = async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            table
                .deliver(Reply {
                    src: peer,
                    echo: e2,
                    body: ReplyBody::Ping,
                })
                .await
        };

        let (wait_result, delivered) = tokio::join!(wait, deliver_wrong);
        assert!(!delivered);
        assert!(matches!(wait_result, Err(NetworkError::Timeout { .. })));
    }

    #[tokio::test]
    async fn reply_with_mismatched_src_is_dropped_but_waiter_stays_pending() {
        let table = PendingRequestTable::new(10);
        let echo = id(1);
        let expected_peer = id(2);
        let impersonator = id(3);

        let wait = table.await_reply(echo, expected_peer, Duration::from_millis(80));
        let deliver_bad_then_good = async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            let first = table
                .deliver(Reply {
                    src: impersonator,
                    echo,
                    body: ReplyBody::Ping,
                })
                .await;
            assert!(!first);
            table
                .deliver(Reply {
                    src: expected_peer,
                    echo,
                    body: ReplyBody::Ping,
                })
                .await
        };

        let (wait_result, delivered) = tokio::join!(wait, deliver_bad_then_good);
        assert!(delivered);
        assert!(wait_result.is_ok());
    }

    #[tokio::test]
    async fn matching_reply_resolves_the_waiter() {
        let table = PendingRequestTable::new(10);
        let echo = id(5);
        let peer = id(6);

        let wait = table.await_reply(echo, peer, Duration::from_millis(200));
        let deliver = async {
            tokio::time::sleep(Duration::from_millis(5)).await;
            table
                .deliver(Reply {
                    src: peer,
                    echo,
                    body: ReplyBody::Store,
                })
                .await
        };

        let (wait_result, delivered) = tokio::join!(wait, deliver);
        assert!(delivered);
        assert!(matches!(wait_result.unwrap().body, ReplyBody::Store));
        assert_eq!(table.len().await, 0);
    }

    #[tokio::test]
    async fn saturated_table_refuses_new_registrations() {
        use std::sync::Arc;

        let table = Arc::new(PendingRequestTable::new(1));
        let first = {
            let table = Arc::clone(&table);
            tokio::spawn(async move { table.await_reply(id(1), id(2), Duration::from_millis(100)).await })
        };
        // Give the spawned task a chance to register before we probe capacity.
        tokio::time::sleep(Duration::from_millis(10)).await;

        let result = table.await_reply(id(3), id(4), Duration::from_millis(10)).await;
        assert!(matches!(result, Err(NetworkError::Backpressure { .. })));

        first.abort();
    }

    // spec.md §5 "Cancellation": a cancelled wait resolves as `Cancelled`
    // and does not leak its pending-request table entry.
    #[tokio::test]
    async fn cancelling_the_token_resolves_the_waiter_and_clears_the_entry() {
        let table = PendingRequestTable::new(10);
        let echo = id(7);
        let peer = id(8);
        let cancel = CancellationToken::new();

        let rx = table.register(echo, peer).await.unwrap();
        assert_eq!(table.len().await, 1);

        let wait = table.wait(echo, peer, rx, Duration::from_secs(10), &cancel);
        let cancel_after_a_beat = async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            cancel.cancel();
        };

        let (wait_result, ()) = tokio::join!(wait, cancel_after_a_beat);
        assert!(matches!(wait_result, Err(NetworkError::Cancelled { .. })));
        assert_eq!(table.len().await, 0);
    }

    // spec.md §4.8 "Bootstrap": a first-contact PING's peer id is unknown
    // until the reply arrives, so it must correlate by echo token alone —
    // any `src` is accepted, and the reply teaches the caller the peer's id.
    #[tokio::test]
    async fn unknown_src_registration_accepts_any_reply_src() {
        let table = PendingRequestTable::new(10);
        let echo = id(9);
        let seed_id = id(10);

        let rx = table.register_unknown_src(echo).await.unwrap();
        let wait = table.wait_unknown_src(echo, rx, Duration::from_millis(200));
        let deliver = async {
            tokio::time::sleep(Duration::from_millis(5)).await;
            table
                .deliver(Reply {
                    src: seed_id,
                    echo,
                    body: ReplyBody::Ping,
                })
                .await
        };

        let (wait_result, delivered) = tokio::join!(wait, deliver);
        assert!(delivered);
        assert_eq!(wait_result.unwrap().src, seed_id);
        assert_eq!(table.len().await, 0);
    }
}
