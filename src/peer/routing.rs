//! Next-hop routing table
//!
//! Maps a destination origin to the neighbor packets for it should be
//! handed to. The peer's own address maps to itself; a destination whose
//! entry equals its key is a direct neighbor.

use std::collections::HashMap;
use std::sync::Mutex;

use rand::seq::SliceRandom;

#[derive(Default)]
pub struct RoutingTable {
    entries: Mutex<HashMap<String, String>>,
}

impl RoutingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `origin -> relay`. An empty relay deletes the entry.
    pub fn set_entry(&self, origin: &str, relay: &str) {
        let mut entries = self.entries.lock().unwrap();
        if relay.is_empty() {
            entries.remove(origin);
        } else {
            entries.insert(origin.to_string(), relay.to_string());
        }
    }

    pub fn next_hop(&self, dest: &str) -> Option<String> {
        self.entries.lock().unwrap().get(dest).cloned()
    }

    pub fn contains(&self, origin: &str) -> bool {
        self.entries.lock().unwrap().contains_key(origin)
    }

    pub fn snapshot(&self) -> HashMap<String, String> {
        self.entries.lock().unwrap().clone()
    }

    /// Direct neighbors (fixed-point entries), minus any excluded address.
    pub fn neighbors(&self, excluding: &[&str]) -> Vec<String> {
        let entries = self.entries.lock().unwrap();
        entries
            .iter()
            .filter(|(origin, relay)| origin == relay && !excluding.contains(&origin.as_str()))
            .map(|(origin, _)| origin.clone())
            .collect()
    }

    pub fn random_neighbor(&self, excluding: &[&str]) -> Option<String> {
        let neighbors = self.neighbors(excluding);
        neighbors.choose(&mut rand::thread_rng()).cloned()
    }
}
