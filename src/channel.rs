use std::io;
use std::mem::MaybeUninit;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use socket2::{Domain, Protocol, Socket, Type};
use tracing::debug;

use crate::error::{OpenError, SendError};

const RECV_BUFFER_LEN: usize = 2048;
const WOULD_BLOCK_BACKOFF: Duration = Duration::from_millis(1);

/// One raw ICMP socket, bound to a single address family for the lifetime
/// of a session.
pub struct RawChannel {
    socket: Option<Socket>,
}

impl RawChannel {
    /// Open a raw datagram socket for the family of `target`. Raw ICMP
    /// sockets usually need elevated privilege, so the common failure here
    /// is `PermissionDenied`.
    pub fn open(target: IpAddr) -> Result<Self, OpenError> {
        let (domain, protocol) = match target {
            IpAddr::V4(_) => (Domain::IPV4, Protocol::ICMPV4),
            IpAddr::V6(_) => (Domain::IPV6, Protocol::ICMPV6),
        };

        let socket = Socket::new(domain, Type::RAW, Some(protocol))?;
        socket.set_nonblocking(true)?;

        debug!("opened raw {:?} socket", protocol);
        Ok(Self {
            socket: Some(socket),
        })
    }

    fn socket(&self) -> io::Result<&Socket> {
        self.socket
            .as_ref()
            .ok_or_else(|| io::Error::from(io::ErrorKind::NotConnected))
    }

    /// Send one datagram. A short write counts as failure, never as partial
    /// success.
    pub fn send(&self, packet: &[u8], dest: SocketAddr) -> Result<usize, SendError> {
        let socket = self.socket().map_err(|_| SendError::Closed)?;
        let sent = socket.send_to(packet, &dest.into())?;
        if sent != packet.len() {
            return Err(SendError::ShortSend {
                sent,
                expected: packet.len(),
            });
        }
        Ok(sent)
    }

    /// Await one inbound datagram. The caller decides whether to wait for
    /// another after each event; there is no internal read loop past the
    /// first datagram.
    pub async fn receive(&self) -> io::Result<Vec<u8>> {
        let mut buffer = [MaybeUninit::new(0u8); RECV_BUFFER_LEN];

        loop {
            match self.socket()?.recv(&mut buffer) {
                Ok(n) => {
                    let data: Vec<u8> = buffer[..n]
                        .iter()
                        .map(|b| unsafe { b.assume_init() })
                        .collect();
                    return Ok(data);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    tokio::time::sleep(WOULD_BLOCK_BACKOFF).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Idempotent; drops the socket handle on first call.
    pub fn close(&mut self) {
        if self.socket.take().is_some() {
            debug!("closed raw socket");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.socket.is_none()
    }
}

impl Drop for RawChannel {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closed_channel_refuses_sends() {
        let mut channel = RawChannel { socket: None };
        assert!(channel.is_closed());
        let err = channel
            .send(&[0u8; 8], "127.0.0.1:0".parse().unwrap())
            .unwrap_err();
        assert!(matches!(err, SendError::Closed));

        // close() stays a no-op on an already-closed channel
        channel.close();
        channel.close();
        assert!(channel.is_closed());
    }

    #[tokio::test]
    async fn closed_channel_refuses_receives() {
        let channel = RawChannel { socket: None };
        let err = channel.receive().await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotConnected);
    }
}
