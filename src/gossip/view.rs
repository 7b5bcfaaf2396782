//! Rumor-sequence state
//!
//! The view tracks three things: the sequence number for the next locally
//! originated rumor, the highest contiguous sequence seen per origin, and
//! the retained rumor log used to replay history to lagging peers.
//!
//! The recording rule is the per-origin FIFO invariant: a rumor is accepted
//! iff its sequence is exactly one past what we have from its origin.
//! Anything else is out of order and discarded; anti-entropy closes the gap
//! later.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::transport::{Rumor, StatusMessage};

#[derive(Default)]
struct ViewInner {
    rumor_seq: u64,
    peer_seq: HashMap<String, u64>,
    rumors: HashMap<String, Vec<Rumor>>,
}

#[derive(Default)]
pub struct View {
    inner: Mutex<ViewInner>,
}

impl View {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sequence number for the next locally originated rumor.
    pub fn next_rumor_seq(&self) -> u64 {
        let mut inner = self.inner.lock().unwrap();
        inner.rumor_seq += 1;
        inner.rumor_seq
    }

    /// Record a rumor if it is the next expected one from its origin.
    /// Returns whether it was expected (and thus recorded).
    pub fn record(&self, rumor: Rumor) -> bool {
        let mut inner = self.inner.lock().unwrap();
        let seen = inner.peer_seq.get(&rumor.origin).copied().unwrap_or(0);
        if rumor.sequence != seen + 1 {
            return false;
        }
        inner.peer_seq.insert(rumor.origin.clone(), rumor.sequence);
        inner
            .rumors
            .entry(rumor.origin.clone())
            .or_default()
            .push(rumor);
        true
    }

    /// Snapshot of the per-origin sequence vector.
    pub fn status(&self) -> StatusMessage {
        let inner = self.inner.lock().unwrap();
        inner
            .peer_seq
            .iter()
            .map(|(origin, seq)| (origin.clone(), *seq))
            .collect()
    }

    /// Retained rumors from `origin` with sequences in `(from, to]`.
    pub fn rumor_range(&self, origin: &str, from: u64, to: u64) -> Vec<Rumor> {
        let inner = self.inner.lock().unwrap();
        inner
            .rumors
            .get(origin)
            .map(|log| {
                log.iter()
                    .filter(|r| r.sequence > from && r.sequence <= to)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Every rumor the remote's status vector says it is missing.
    pub fn missing_for(&self, remote: &StatusMessage) -> Vec<Rumor> {
        let local = self.status();
        let mut missing = Vec::new();
        for (origin, &seq) in &local {
            let remote_seq = remote.get(origin).copied().unwrap_or(0);
            if remote_seq < seq {
                missing.extend(self.rumor_range(origin, remote_seq, seq));
            }
        }
        missing
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::Message;

    fn rumor(origin: &str, sequence: u64) -> Rumor {
        Rumor {
            origin: origin.into(),
            sequence,
            payload: Box::new(Message::Empty),
        }
    }

    #[test]
    fn test_in_order_rumors_are_recorded() {
        let view = View::new();
        assert!(view.record(rumor("a", 1)));
        assert!(view.record(rumor("a", 2)));
        assert_eq!(view.status().get("a"), Some(&2));
    }

    #[test]
    fn test_gapped_rumor_is_discarded() {
        let view = View::new();
        assert!(view.record(rumor("a", 1)));
        assert!(!view.record(rumor("a", 3)));
        assert_eq!(view.status().get("a"), Some(&1));
        // The gap closes once 2 arrives, then 3 is accepted.
        assert!(view.record(rumor("a", 2)));
        assert!(view.record(rumor("a", 3)));
    }

    #[test]
    fn test_duplicate_rumor_is_discarded() {
        let view = View::new();
        assert!(view.record(rumor("a", 1)));
        assert!(!view.record(rumor("a", 1)));
        assert_eq!(view.rumor_range("a", 0, 10).len(), 1);
    }

    #[test]
    fn test_first_rumor_must_be_sequence_one() {
        let view = View::new();
        assert!(!view.record(rumor("a", 2)));
        assert!(view.status().is_empty());
    }

    #[test]
    fn test_rumor_seq_increments() {
        let view = View::new();
        assert_eq!(view.next_rumor_seq(), 1);
        assert_eq!(view.next_rumor_seq(), 2);
    }

    #[test]
    fn test_missing_for_unknown_origin_replays_everything() {
        let view = View::new();
        for seq in 1..=3 {
            view.record(rumor("a", seq));
        }
        let missing = view.missing_for(&StatusMessage::new());
        assert_eq!(missing.len(), 3);
        assert!(missing.iter().all(|r| r.origin == "a"));
    }

    #[test]
    fn test_missing_for_partial_origin() {
        let view = View::new();
        for seq in 1..=4 {
            view.record(rumor("a", seq));
        }
        let mut remote = StatusMessage::new();
        remote.insert("a".into(), 2);
        let missing = view.missing_for(&remote);
        let sequences: Vec<u64> = missing.iter().map(|r| r.sequence).collect();
        assert_eq!(sequences, vec![3, 4]);
    }
}
