//! UDP datagram transport.

use std::time::Duration;

use async_trait::async_trait;
use tokio::net::UdpSocket;
use tokio::time::timeout;

use super::socket::{Socket, TransportError};
use super::wire::{self, Packet};

/// Upper bound for one serialized packet.
const MAX_DATAGRAM: usize = 65_000;

pub struct UdpTransport {
    socket: UdpSocket,
    addr: String,
}

impl UdpTransport {
    /// Bind a UDP socket. Passing a `:0` port lets the OS pick one; the
    /// resolved address becomes the peer's identity.
    pub async fn bind(address: &str) -> Result<Self, TransportError> {
        let socket = UdpSocket::bind(address).await?;
        let addr = socket.local_addr()?.to_string();
        Ok(Self { socket, addr })
    }
}

#[async_trait]
impl Socket for UdpTransport {
    fn local_addr(&self) -> String {
        self.addr.clone()
    }

    async fn send(
        &self,
        dest: &str,
        packet: &Packet,
        send_timeout: Duration,
    ) -> Result<(), TransportError> {
        let bytes = wire::encode(packet)?;
        match timeout(send_timeout, self.socket.send_to(&bytes, dest)).await {
            Ok(result) => {
                result?;
                Ok(())
            }
            Err(_) => Ok(()), // dropped; anti-entropy recovers
        }
    }

    async fn recv(&self, recv_timeout: Duration) -> Result<Option<Packet>, TransportError> {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        let (len, from) = match timeout(recv_timeout, self.socket.recv_from(&mut buf)).await {
            Ok(result) => result?,
            Err(_) => return Ok(None),
        };
        match wire::decode::<Packet>(&buf[..len]) {
            Ok(packet) => Ok(Some(packet)),
            Err(e) => {
                log::warn!("dropping malformed datagram from {from}: {e}");
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::wire::{Header, Message};

    #[tokio::test]
    async fn test_udp_round_trip() {
        let a = UdpTransport::bind("127.0.0.1:0").await.unwrap();
        let b = UdpTransport::bind("127.0.0.1:0").await.unwrap();

        let packet = Packet {
            header: Header::new(a.local_addr(), a.local_addr(), b.local_addr()),
            message: Message::Empty,
        };
        a.send(&b.local_addr(), &packet, Duration::from_secs(1))
            .await
            .unwrap();

        let received = b.recv(Duration::from_secs(1)).await.unwrap().unwrap();
        assert_eq!(received, packet);
    }

    #[tokio::test]
    async fn test_udp_recv_times_out_cleanly() {
        let a = UdpTransport::bind("127.0.0.1:0").await.unwrap();
        let got = a.recv(Duration::from_millis(20)).await.unwrap();
        assert!(got.is_none());
    }
}
