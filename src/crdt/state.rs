//! Authoritative sequence assignment and temporary-ID resolution
//!
//! A client batch arrives with provisional sequence numbers and `@temp`
//! references between its own operations. Stamping walks the batch in input
//! order, hands out the next per-document sequence numbers, and rewrites
//! every reference so no temporary ID survives.

use std::collections::HashMap;
use std::sync::Mutex;

use super::op::{CrdtError, CrdtOperation, OpId, OpPayload};

/// Per-document counters for the next authoritative sequence number.
#[derive(Default)]
pub struct CrdtState {
    next: Mutex<HashMap<String, u64>>,
}

impl CrdtState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Highest sequence number assigned so far for a document (0 if none).
    pub fn get(&self, doc_id: &str) -> u64 {
        *self.next.lock().unwrap().get(doc_id).unwrap_or(&0)
    }

    /// Increment and return the document's counter.
    fn bump(&self, doc_id: &str) -> u64 {
        let mut next = self.next.lock().unwrap();
        let counter = next.entry(doc_id.to_string()).or_insert(0);
        *counter += 1;
        *counter
    }
}

/// Stamp a client batch with authoritative IDs and resolve every `@temp`
/// reference against the batch-local mapping.
///
/// Counter bumps are committed even when rewriting fails afterwards: a
/// retried batch is re-submitted, never re-issued under the same IDs. On
/// failure the caller must not deliver the batch to the editor.
pub fn stamp_batch(
    ops: &mut [CrdtOperation],
    self_addr: &str,
    state: &CrdtState,
) -> Result<(), CrdtError> {
    // Pass 1: assign sequence numbers, remembering supplied -> authoritative.
    let mut tmp_map: HashMap<u64, u64> = HashMap::new();
    for op in ops.iter_mut() {
        let seq = state.bump(&op.doc_id);
        tmp_map.insert(op.seq, seq);
        op.seq = seq;
        op.origin = self_addr.to_string();
    }

    // Pass 2: rewrite references, forward references included.
    for op in ops.iter_mut() {
        rewrite_op(op, self_addr, &tmp_map)?;
    }
    Ok(())
}

fn rewrite_op(
    op: &mut CrdtOperation,
    self_addr: &str,
    tmp_map: &HashMap<u64, u64>,
) -> Result<(), CrdtError> {
    op.block_id = rewrite_key(&op.block_id, self_addr, tmp_map)?;

    match &mut op.payload {
        OpPayload::AddBlock(add) => {
            rewrite_opt(&mut add.after_block, self_addr, tmp_map)?;
            rewrite_opt(&mut add.parent_block, self_addr, tmp_map)?;
        }
        OpPayload::RemoveBlock(remove) => {
            rewrite_id(&mut remove.removed_block, self_addr, tmp_map)?;
        }
        OpPayload::UpdateBlock(update) => {
            rewrite_id(&mut update.updated_block, self_addr, tmp_map)?;
            rewrite_opt(&mut update.after_block, self_addr, tmp_map)?;
            rewrite_opt(&mut update.parent_block, self_addr, tmp_map)?;
        }
        OpPayload::InsertChar(insert) => {
            rewrite_opt(&mut insert.after_id, self_addr, tmp_map)?;
        }
        OpPayload::DeleteChar(delete) => {
            rewrite_id(&mut delete.removed_id, self_addr, tmp_map)?;
        }
        OpPayload::AddMark(mark) => {
            rewrite_id(&mut mark.start.id, self_addr, tmp_map)?;
            rewrite_id(&mut mark.end.id, self_addr, tmp_map)?;
        }
        OpPayload::RemoveMark(mark) => {
            rewrite_id(&mut mark.start.id, self_addr, tmp_map)?;
            rewrite_id(&mut mark.end.id, self_addr, tmp_map)?;
        }
    }
    Ok(())
}

/// Rewrite a string block key. Empty stays empty; anything else must parse
/// as an operation ID.
fn rewrite_key(
    key: &str,
    self_addr: &str,
    tmp_map: &HashMap<u64, u64>,
) -> Result<String, CrdtError> {
    if key.is_empty() {
        return Ok(String::new());
    }
    let mut id: OpId = key
        .parse()
        .map_err(|e: CrdtError| CrdtError::RefRewriteFailed(e.to_string()))?;
    rewrite_id(&mut id, self_addr, tmp_map)?;
    Ok(id.to_string())
}

fn rewrite_opt(
    id: &mut Option<OpId>,
    self_addr: &str,
    tmp_map: &HashMap<u64, u64>,
) -> Result<(), CrdtError> {
    if let Some(id) = id {
        rewrite_id(id, self_addr, tmp_map)?;
    }
    Ok(())
}

fn rewrite_id(
    id: &mut OpId,
    self_addr: &str,
    tmp_map: &HashMap<u64, u64>,
) -> Result<(), CrdtError> {
    if !id.is_temp() {
        return Ok(());
    }
    let seq = *tmp_map
        .get(&id.seq)
        .ok_or_else(|| CrdtError::RefRewriteFailed(format!("unknown temporary id {id}")))?;
    *id = OpId::new(seq, self_addr);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crdt::op::{AddBlock, BlockKind, BlockProps, InsertChar};

    const ADDR: &str = "127.0.0.1:7000";

    fn temp_add_block(supplied: u64, after: Option<u64>) -> CrdtOperation {
        CrdtOperation {
            origin: "temp".into(),
            seq: supplied,
            doc_id: "doc1".into(),
            block_id: format!("{supplied}@temp"),
            payload: OpPayload::AddBlock(AddBlock {
                block_type: BlockKind::Paragraph,
                props: BlockProps::default(),
                after_block: after.map(OpId::temp),
                parent_block: None,
            }),
        }
    }

    fn temp_insert(supplied: u64, block: u64, after: Option<u64>) -> CrdtOperation {
        CrdtOperation {
            origin: "temp".into(),
            seq: supplied,
            doc_id: "doc1".into(),
            block_id: format!("{block}@temp"),
            payload: OpPayload::InsertChar(InsertChar {
                after_id: after.map(OpId::temp),
                character: "x".into(),
            }),
        }
    }

    #[test]
    fn test_stamp_assigns_in_input_order() {
        let state = CrdtState::new();
        let mut ops = vec![temp_add_block(10, None), temp_insert(11, 10, None)];
        stamp_batch(&mut ops, ADDR, &state).unwrap();

        assert_eq!(ops[0].seq, 1);
        assert_eq!(ops[1].seq, 2);
        assert_eq!(ops[0].origin, ADDR);
        assert_eq!(ops[0].block_id, format!("1@{ADDR}"));
        assert_eq!(ops[1].block_id, format!("1@{ADDR}"));
        assert_eq!(state.get("doc1"), 2);
    }

    #[test]
    fn test_forward_references_resolve() {
        // The first op references the second one's provisional ID.
        let state = CrdtState::new();
        let mut ops = vec![temp_add_block(42, Some(43)), temp_add_block(43, None)];
        stamp_batch(&mut ops, ADDR, &state).unwrap();

        match &ops[0].payload {
            OpPayload::AddBlock(add) => {
                assert_eq!(add.after_block, Some(OpId::new(2, ADDR)));
            }
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[test]
    fn test_no_temp_survives() {
        let state = CrdtState::new();
        let mut ops = vec![
            temp_add_block(1, None),
            temp_insert(2, 1, None),
            temp_insert(3, 1, Some(2)),
        ];
        stamp_batch(&mut ops, ADDR, &state).unwrap();

        let json = serde_json::to_string(&ops).unwrap();
        assert!(!json.contains("@temp"), "temporary id escaped: {json}");
    }

    #[test]
    fn test_unknown_temp_fails_batch() {
        let state = CrdtState::new();
        let mut ops = vec![temp_add_block(1, Some(99))];
        let err = stamp_batch(&mut ops, ADDR, &state).unwrap_err();
        assert!(matches!(err, CrdtError::RefRewriteFailed(_)));
        // IDs stay issued even though the batch failed.
        assert_eq!(state.get("doc1"), 1);
    }

    #[test]
    fn test_malformed_block_key_fails_batch() {
        let state = CrdtState::new();
        let mut op = temp_add_block(1, None);
        op.block_id = "not-an-id".into();
        let err = stamp_batch(std::slice::from_mut(&mut op), ADDR, &state).unwrap_err();
        assert!(matches!(err, CrdtError::RefRewriteFailed(_)));
    }

    #[test]
    fn test_counters_are_per_document() {
        let state = CrdtState::new();
        let mut a = vec![temp_add_block(1, None)];
        stamp_batch(&mut a, ADDR, &state).unwrap();

        let mut b = vec![temp_add_block(1, None)];
        b[0].doc_id = "doc2".into();
        stamp_batch(&mut b, ADDR, &state).unwrap();

        assert_eq!(state.get("doc1"), 1);
        assert_eq!(state.get("doc2"), 1);
        assert_eq!(b[0].seq, 1);
    }

    #[test]
    fn test_concrete_references_left_alone() {
        let state = CrdtState::new();
        let mut op = temp_add_block(5, None);
        match &mut op.payload {
            OpPayload::AddBlock(add) => add.after_block = Some(OpId::new(3, "10.0.0.2:9")),
            _ => unreachable!(),
        }
        stamp_batch(std::slice::from_mut(&mut op), ADDR, &state).unwrap();
        match &op.payload {
            OpPayload::AddBlock(add) => {
                assert_eq!(add.after_block, Some(OpId::new(3, "10.0.0.2:9")));
            }
            _ => unreachable!(),
        }
    }
}
