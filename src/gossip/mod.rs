//! Rumor gossip state. The protocol handlers live on the peer; this module
//! owns the sequence bookkeeping they share.

pub mod view;

pub use view::View;
