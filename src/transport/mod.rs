//! Datagram transport: wire types, the socket trait, and its UDP and
//! in-memory implementations.

pub mod channel;
pub mod socket;
pub mod udp;
pub mod wire;

pub use channel::{LocalNetwork, LocalSocket};
pub use socket::{Socket, TransportError};
pub use udp::UdpTransport;
pub use wire::{
    AckMessage, CrdtOperationsMessage, Header, Message, Packet, Rumor, RumorsMessage,
    StatusMessage,
};
