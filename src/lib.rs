// Notemesh - Collaborative Block Editor Core

pub mod config;
pub mod crdt;
pub mod gossip;
pub mod peer;
pub mod snapshot;
pub mod transport;

pub use config::PeerConfig;
pub use crdt::{CrdtError, CrdtOperation, OpId, OpPayload};
pub use peer::{Peer, PeerError};
