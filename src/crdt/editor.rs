//! Per-document, per-block append-only operation log
//!
//! The editor is the replica's source of truth: every operation ever
//! delivered, grouped by document and by the block it targets. Insertion
//! order within a block list is delivery order at this replica, not a
//! semantic order; the compiler sorts before folding.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use super::op::{CrdtOperation, OpId};

/// Ops of one document, keyed by block ID.
pub type DocumentOps = HashMap<String, Vec<CrdtOperation>>;

#[derive(Default)]
struct EditorInner {
    docs: HashMap<String, DocumentOps>,
    /// Dedup key: (doc_id, op id). Re-delivered operations are dropped.
    seen: HashSet<(String, OpId)>,
}

/// Mutex-guarded op log. One logical writer (the packet dispatcher), many
/// snapshot readers (compilers).
#[derive(Default)]
pub struct Editor {
    inner: Mutex<EditorInner>,
}

impl Editor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append each operation to its document/block list, creating entries
    /// as needed. Idempotent: an operation already recorded is a no-op.
    pub fn update(&self, ops: &[CrdtOperation]) {
        let mut inner = self.inner.lock().unwrap();
        for op in ops {
            let key = (op.doc_id.clone(), op.id());
            if !inner.seen.insert(key) {
                log::debug!("dropping duplicate op {} for doc {}", op.id(), op.doc_id);
                continue;
            }
            inner
                .docs
                .entry(op.doc_id.clone())
                .or_default()
                .entry(op.block_id.clone())
                .or_default()
                .push(op.clone());
        }
    }

    /// Deep copy of a document's op lists. Unknown documents are empty.
    pub fn document_ops(&self, doc_id: &str) -> DocumentOps {
        let inner = self.inner.lock().unwrap();
        inner.docs.get(doc_id).cloned().unwrap_or_default()
    }

    /// Deep copy of one block's op list. Unknown blocks are empty.
    pub fn block_ops(&self, doc_id: &str, block_id: &str) -> Vec<CrdtOperation> {
        let inner = self.inner.lock().unwrap();
        inner
            .docs
            .get(doc_id)
            .and_then(|doc| doc.get(block_id))
            .cloned()
            .unwrap_or_default()
    }
}
