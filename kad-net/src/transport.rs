//! Transport adapter (C3, spec.md §4.3): the sole component that performs
//! network I/O. Binds one UDP socket and offers fire-and-forget sends plus
//! an inbound stream of `(addr, bytes)` datagrams.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::UdpSocket;
use tracing::warn;

use crate::error::NetworkError;

/// Datagrams larger than this are truncated and dropped (spec.md §4.3).
pub const MAX_DATAGRAM_SIZE: usize = 64 * 1024;

/// A bound UDP endpoint. Cloning shares the same underlying socket.
#[derive(Clone)]
pub struct Transport {
    socket: Arc<UdpSocket>,
}

impl Transport {
    /// Binds `local_addr`, failing with `BindError` on port conflict.
    pub async fn bind(local_addr: SocketAddr) -> Result<Self, NetworkError> {
        let socket = UdpSocket::bind(local_addr)
            .await
            .map_err(|source| NetworkError::BindError {
                addr: local_addr,
                source,
            })?;
        Ok(Self {
            socket: Arc::new(socket),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Fire-and-forget send. Failures are logged and swallowed — UDP is
    /// best-effort and callers never see a `SendError` (spec.md §4.3).
    pub async fn send(&self, addr: SocketAddr, bytes: &[u8]) {
        if let Err(source) = self.socket.send_to(bytes, addr).await {
            warn!(%addr, error = %source, "failed to send datagram");
        }
    }

    /// Awaits the next inbound datagram. Oversized datagrams are truncated
    /// by the fixed-size receive buffer; anything that fills the buffer
    /// exactly is treated as oversized and dropped with a warning, since a
    /// legitimate message never approaches 64 KiB.
    pub async fn recv(&self) -> Result<(SocketAddr, Vec<u8>), NetworkError> {
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
        loop {
            let (len, addr) = self
                .socket
                .recv_from(&mut buf)
                .await
                .map_err(|source| NetworkError::RecvError {
                    local_addr: self.local_addr().unwrap_or(addr_unspecified()),
                    source,
                })?;
            if len >= MAX_DATAGRAM_SIZE {
                warn!(%addr, len, "datagram at/over size limit, dropping");
                continue;
            }
            return Ok((addr, buf[..len].to_vec()));
        }
    }
}

fn addr_unspecified() -> SocketAddr {
    SocketAddr::new(std::net::Ipv4Addr::UNSPECIFIED.into(), 0)
}
