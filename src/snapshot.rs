//! Compiled-document snapshot store
//!
//! Writes compiled documents to disk as `{doc_id}_{unix_ts}.txt`, rate
//! limited per document and bounded to a fixed number of retained files.
//! This is a convenience for the desktop shell; the collaboration core
//! never reads these files back.

use std::collections::{HashMap, VecDeque};
use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use chrono::Utc;

#[derive(Default)]
struct SnapshotIndex {
    newest: HashMap<String, i64>,
    saved: HashMap<String, VecDeque<PathBuf>>,
}

pub struct SnapshotStore {
    dir: PathBuf,
    threshold: Duration,
    queue_size: usize,
    index: Mutex<SnapshotIndex>,
}

impl SnapshotStore {
    pub fn new(dir: PathBuf, threshold: Duration, queue_size: usize) -> Self {
        Self {
            dir,
            threshold,
            queue_size,
            index: Mutex::new(SnapshotIndex::default()),
        }
    }

    /// Write one snapshot. A write inside the per-document threshold window
    /// is skipped; once a document exceeds the queue size, its oldest
    /// snapshot file is removed.
    pub fn store(&self, doc_id: &str, document: &str) -> io::Result<()> {
        let mut now = Utc::now().timestamp();
        let mut index = self.index.lock().unwrap();

        if let Some(&newest) = index.newest.get(doc_id) {
            if (now - newest) < self.threshold.as_secs() as i64 {
                log::debug!("snapshot of {doc_id} inside threshold window, skipping");
                return Ok(());
            }
            // File names must stay unique per document.
            if now <= newest {
                now = newest + 1;
            }
        }

        fs::create_dir_all(&self.dir)?;
        let path = self.dir.join(format!("{doc_id}_{now}.txt"));
        fs::write(&path, document)?;

        index.newest.insert(doc_id.to_string(), now);
        let queue = index.saved.entry(doc_id.to_string()).or_default();
        queue.push_back(path);
        if queue.len() > self.queue_size {
            if let Some(oldest) = queue.pop_front() {
                if let Err(e) = fs::remove_file(&oldest) {
                    log::warn!("failed to evict snapshot {}: {e}", oldest.display());
                }
            }
        }
        Ok(())
    }
}
