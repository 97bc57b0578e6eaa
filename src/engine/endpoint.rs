use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use bytes::Bytes;
use tokio::net::UdpSocket;
use tokio::time::timeout;
use tracing::trace;

use crate::error::TcuError;

/// biggest datagram the receive loop accepts; comfortably above a full TCU
///  frame (header + [MAX_PAYLOAD](crate::wire::packet::MAX_PAYLOAD))
const RECV_BUF_LEN: usize = 2048;

/// The engine's UDP socket capability: bound once, shared by the receive
///  task (reading) and everything that transmits (writing). Tokio sockets
///  are non-blocking by construction; the receive side polls with a short
///  timeout so loops can observe a shutdown flag promptly.
///
/// The endpoint is owned by the engine facade and closed by dropping it
///  after both tasks have stopped - nothing else ever closes the socket.
pub struct UdpEndpoint {
    socket: UdpSocket,
}

impl UdpEndpoint {
    /// binds on all interfaces; port 0 asks the OS for an ephemeral port
    pub async fn bind(port: u16) -> Result<UdpEndpoint, TcuError> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, port))
            .await
            .map_err(TcuError::Socket)?;
        Ok(UdpEndpoint { socket })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, TcuError> {
        self.socket.local_addr().map_err(TcuError::Socket)
    }

    pub async fn send_to(&self, buf: &[u8], peer: SocketAddr) -> Result<(), TcuError> {
        let sent = self
            .socket
            .send_to(buf, peer)
            .await
            .map_err(TcuError::Socket)?;
        trace!(bytes = sent, ?peer, "datagram sent");
        Ok(())
    }

    /// Waits up to `slice` for a datagram. `Ok(None)` on timeout; transient
    ///  OS errors are returned as `Err` and left to the caller to log - the
    ///  receive loop continues over them.
    pub async fn recv(&self, slice: Duration) -> Result<Option<(Bytes, SocketAddr)>, TcuError> {
        let mut buf = [0u8; RECV_BUF_LEN];
        match timeout(slice, self.socket.recv_from(&mut buf)).await {
            Err(_elapsed) => Ok(None),
            Ok(Err(e)) => Err(TcuError::Socket(e)),
            Ok(Ok((len, src))) => {
                trace!(bytes = len, ?src, "datagram received");
                Ok(Some((Bytes::copy_from_slice(&buf[..len]), src)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bind_ephemeral_and_round_trip() {
        let a = UdpEndpoint::bind(0).await.unwrap();
        let b = UdpEndpoint::bind(0).await.unwrap();

        let addr_b = b.local_addr().unwrap();
        a.send_to(b"ping", addr_b).await.unwrap();

        let (data, src) = b
            .recv(Duration::from_secs(1))
            .await
            .unwrap()
            .expect("datagram expected");
        assert_eq!(&data[..], b"ping");
        assert_eq!(src.port(), a.local_addr().unwrap().port());
    }

    #[tokio::test]
    async fn test_recv_timeout_returns_none() {
        let endpoint = UdpEndpoint::bind(0).await.unwrap();
        let received = endpoint.recv(Duration::from_millis(20)).await.unwrap();
        assert!(received.is_none());
    }
}
