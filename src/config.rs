//! Peer configuration
//!
//! All tunables of a running peer live here. Intervals set to zero disable
//! the corresponding background task.

use std::path::PathBuf;
use std::time::Duration;

/// Configuration for a peer.
#[derive(Clone, Debug)]
pub struct PeerConfig {
    /// Period of empty broadcasts used as liveness signals. Zero disables.
    pub heartbeat_interval: Duration,

    /// Period of status mongering with a random neighbor. Zero disables.
    pub anti_entropy_interval: Duration,

    /// How long to wait for an ack before retransmitting a rumor batch to a
    /// different neighbor. Zero disables the ack timer entirely.
    pub ack_timeout: Duration,

    /// Probability (0..=1) of forwarding a status message to another
    /// neighbor when a status exchange finds both sides in sync.
    pub continue_mongering: f64,

    /// Fleet size. Consumed by the naming-consensus collaborator, carried
    /// here because it shares this configuration surface.
    pub total_peers: usize,

    /// Chunk size for the file-sharing collaborator.
    pub chunk_size: usize,

    /// Directory for compiled-document snapshots. None disables the store.
    pub document_dir: Option<PathBuf>,

    /// Minimum spacing between two snapshots of the same document.
    pub doc_timestamp_threshold: Duration,

    /// Maximum retained snapshots per document before the oldest is evicted.
    pub doc_queue_size: usize,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::ZERO,
            anti_entropy_interval: Duration::ZERO,
            ack_timeout: Duration::from_secs(3),
            continue_mongering: 0.5,
            total_peers: 1,
            chunk_size: 8192,
            document_dir: None,
            doc_timestamp_threshold: Duration::from_secs(2),
            doc_queue_size: 10,
        }
    }
}
