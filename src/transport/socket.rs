//! The socket abstraction the peer runs on.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use super::wire::Packet;

/// Errors from the transport layer. A receive timeout is not an error; it
/// surfaces as `Ok(None)` from `recv`.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("codec error: {0}")]
    Codec(String),

    #[error("unknown address: {0}")]
    UnknownAddress(String),
}

/// A datagram endpoint addressed by socket-address strings.
#[async_trait]
pub trait Socket: Send + Sync {
    /// The address this socket is bound to; it is the peer's identity.
    fn local_addr(&self) -> String;

    /// Send one packet to `dest`.
    async fn send(&self, dest: &str, packet: &Packet, timeout: Duration)
        -> Result<(), TransportError>;

    /// Receive one packet. `Ok(None)` on timeout; malformed datagrams are
    /// dropped with a warning, also surfacing as `Ok(None)`.
    async fn recv(&self, timeout: Duration) -> Result<Option<Packet>, TransportError>;
}
