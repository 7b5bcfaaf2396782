//! Document compiler
//!
//! A pure fold over a document's op log that materializes the block tree as
//! a JSON array. Replicas holding the same multiset of operations compile
//! JSON-equivalent documents: the fold consumes operations in the total
//! `(seq, origin)` order, and every step is a function of the accumulator
//! and the next operation alone.
//!
//! Ops whose anchor (parent block, sibling, preceding character) has not
//! arrived yet are skipped for this pass; they take effect on the first
//! compile after the missing operation is delivered.

use std::collections::{HashMap, HashSet};

use serde::Serialize;

use super::editor::DocumentOps;
use super::op::{
    AddBlock, BlockKind, BlockProps, CrdtError, CrdtOperation, MarkType, OpId, OpPayload,
    TextStyle, UpdateBlock,
};

/// A maximal run of contiguous characters sharing one style.
#[derive(Serialize)]
struct StyledRun {
    #[serde(rename = "type")]
    kind: &'static str,
    #[serde(rename = "charIds")]
    char_ids: Vec<String>,
    text: String,
    styles: TextStyle,
}

#[derive(Serialize)]
struct CompiledBlock {
    id: String,
    #[serde(rename = "type")]
    kind: BlockKind,
    props: BlockProps,
    content: Vec<StyledRun>,
    children: Vec<CompiledBlock>,
}

/// Compile a document's op lists into the serialized block tree.
pub fn compile_document(doc_ops: &DocumentOps) -> Result<String, CrdtError> {
    let mut structural: Vec<&CrdtOperation> = doc_ops
        .values()
        .flatten()
        .filter(|op| op.payload.is_structural())
        .collect();
    structural.sort_by_key(|op| op.id());

    let mut tree = BlockTree::default();
    for op in structural {
        match &op.payload {
            OpPayload::AddBlock(add) => tree.insert_block(op, add),
            OpPayload::RemoveBlock(remove) => tree.tombstone(&remove.removed_block),
            OpPayload::UpdateBlock(update) => tree.update_block(update),
            _ => unreachable!("filtered to structural ops"),
        }
    }

    let blocks: Vec<CompiledBlock> = tree
        .roots
        .clone()
        .into_iter()
        .filter_map(|idx| tree.render(idx, doc_ops))
        .collect();
    serde_json::to_string(&blocks).map_err(|e| CrdtError::Serialization(e.to_string()))
}

// ---------------------------------------------------------------------------
// Block-tree construction
// ---------------------------------------------------------------------------

struct Node {
    id: String,
    kind: BlockKind,
    props: BlockProps,
    children: Vec<usize>,
    deleted: bool,
}

/// Arena of block nodes with an id index, so slot resolution is a map hit
/// instead of a tree search.
#[derive(Default)]
struct BlockTree {
    nodes: Vec<Node>,
    index: HashMap<String, usize>,
    roots: Vec<usize>,
}

/// An insertion point: a position in the root list or in some node's
/// child list.
enum Slot {
    Roots(usize),
    Children(usize, usize),
}

impl BlockTree {
    fn insert_block(&mut self, op: &CrdtOperation, add: &AddBlock) {
        let id = op.block_id.clone();
        if self.index.contains_key(&id) {
            return;
        }
        let after = add.after_block.as_ref().map(OpId::to_string);
        let parent = add.parent_block.as_ref().map(OpId::to_string);
        let Some(slot) = self.resolve_slot(after.as_deref(), parent.as_deref()) else {
            log::debug!("no slot for block {id} yet, skipping this pass");
            return;
        };

        let idx = self.nodes.len();
        self.nodes.push(Node {
            id: id.clone(),
            kind: add.block_type,
            props: add.props.clone(),
            children: Vec::new(),
            deleted: false,
        });
        self.place(slot, idx);
        self.index.insert(id, idx);
    }

    /// Tombstone: the node stays in place so sibling positions survive the
    /// rest of the fold; rendering drops it.
    fn tombstone(&mut self, removed: &OpId) {
        if let Some(&idx) = self.index.get(&removed.to_string()) {
            self.nodes[idx].deleted = true;
        }
    }

    fn update_block(&mut self, update: &UpdateBlock) {
        let Some(&idx) = self.index.get(&update.updated_block.to_string()) else {
            return;
        };
        self.detach(idx);

        if let Some(kind) = update.block_type {
            self.nodes[idx].kind = kind;
        }
        merge_props(&mut self.nodes[idx].props, &update.props);

        let after = update.after_block.as_ref().map(OpId::to_string);
        let parent = update.parent_block.as_ref().map(OpId::to_string);
        match self.resolve_slot(after.as_deref(), parent.as_deref()) {
            Some(slot) => self.place(slot, idx),
            // The anchor may be gone; keep the block visible at the front
            // of the document rather than dropping live content.
            None => self.roots.insert(0, idx),
        }
    }

    /// Slot rules, in order: a matching parent anchors into its child list;
    /// no anchors at all prepends to the roots; otherwise the sibling named
    /// by `after` is located wherever it lives and the slot is right after
    /// it. No match means the op is not causally ready.
    fn resolve_slot(&self, after: Option<&str>, parent: Option<&str>) -> Option<Slot> {
        if let Some(parent) = parent {
            if let Some(&pi) = self.index.get(parent) {
                return match after {
                    None => Some(Slot::Children(pi, 0)),
                    Some(after) => self
                        .position_in(&self.nodes[pi].children, after)
                        .map(|pos| Slot::Children(pi, pos + 1)),
                };
            }
        }
        match after {
            None if parent.is_none() => Some(Slot::Roots(0)),
            None => None,
            Some(after) => {
                if let Some(pos) = self.position_in(&self.roots, after) {
                    return Some(Slot::Roots(pos + 1));
                }
                for (pi, node) in self.nodes.iter().enumerate() {
                    if let Some(pos) = self.position_in(&node.children, after) {
                        return Some(Slot::Children(pi, pos + 1));
                    }
                }
                None
            }
        }
    }

    fn position_in(&self, list: &[usize], id: &str) -> Option<usize> {
        list.iter().position(|&idx| self.nodes[idx].id == id)
    }

    fn place(&mut self, slot: Slot, idx: usize) {
        match slot {
            Slot::Roots(pos) => self.roots.insert(pos, idx),
            Slot::Children(parent, pos) => self.nodes[parent].children.insert(pos, idx),
        }
    }

    fn detach(&mut self, idx: usize) {
        if let Some(pos) = self.roots.iter().position(|&i| i == idx) {
            self.roots.remove(pos);
            return;
        }
        for node in &mut self.nodes {
            if let Some(pos) = node.children.iter().position(|&i| i == idx) {
                node.children.remove(pos);
                return;
            }
        }
    }

    fn render(&self, idx: usize, doc_ops: &DocumentOps) -> Option<CompiledBlock> {
        let node = &self.nodes[idx];
        if node.deleted {
            return None;
        }
        let mut props = node.props.clone();
        if node.kind != BlockKind::Heading {
            props.level = 0;
        }
        let content = doc_ops
            .get(&node.id)
            .map(|ops| fold_content(ops))
            .unwrap_or_default();
        let children = node
            .children
            .iter()
            .filter_map(|&child| self.render(child, doc_ops))
            .collect();
        Some(CompiledBlock {
            id: node.id.clone(),
            kind: node.kind,
            props,
            content,
            children,
        })
    }
}

/// Field-by-field overwrite: only non-empty / non-zero values win.
fn merge_props(target: &mut BlockProps, update: &BlockProps) {
    if !update.background_color.is_empty() {
        target.background_color = update.background_color.clone();
    }
    if !update.text_color.is_empty() {
        target.text_color = update.text_color.clone();
    }
    if !update.text_alignment.is_empty() {
        target.text_alignment = update.text_alignment.clone();
    }
    if update.level != 0 {
        target.level = update.level;
    }
}

// ---------------------------------------------------------------------------
// Per-block content
// ---------------------------------------------------------------------------

fn fold_content(ops: &[CrdtOperation]) -> Vec<StyledRun> {
    let mut content: Vec<&CrdtOperation> =
        ops.iter().filter(|op| !op.payload.is_structural()).collect();
    content.sort_by_key(|op| op.id());

    let mut char_ids: Vec<OpId> = Vec::new();
    let mut chars: Vec<String> = Vec::new();
    let mut styles: HashMap<OpId, TextStyle> = HashMap::new();
    let mut removed: HashSet<OpId> = HashSet::new();

    for op in content {
        match &op.payload {
            OpPayload::InsertChar(insert) => {
                let pos = match &insert.after_id {
                    // Inserting at the start; an empty list appends.
                    None => Some(0),
                    Some(after) if char_ids.last() == Some(after) => Some(char_ids.len()),
                    Some(after) => char_ids.iter().position(|id| id == after).map(|p| p + 1),
                };
                match pos {
                    Some(pos) => {
                        char_ids.insert(pos, op.id());
                        chars.insert(pos, insert.character.clone());
                    }
                    None => log::debug!(
                        "insert {} anchors to unknown char {:?}, skipping",
                        op.id(),
                        insert.after_id
                    ),
                }
            }
            OpPayload::DeleteChar(delete) => {
                removed.insert(delete.removed_id.clone());
            }
            OpPayload::AddMark(mark) => {
                if let Some((start, end)) = mark_range(&char_ids, &mark.start.id, &mark.end.id) {
                    for id in &char_ids[start..=end] {
                        let style = styles.entry(id.clone()).or_default();
                        apply_mark(style, mark.mark_type, &mark.options.color, true);
                    }
                } else {
                    log::debug!("mark {} spans unknown chars, skipping", op.id());
                }
            }
            OpPayload::RemoveMark(mark) => {
                if let Some((start, end)) = mark_range(&char_ids, &mark.start.id, &mark.end.id) {
                    for id in &char_ids[start..=end] {
                        let style = styles.entry(id.clone()).or_default();
                        apply_mark(style, mark.mark_type, "", false);
                    }
                } else {
                    log::debug!("mark removal {} spans unknown chars, skipping", op.id());
                }
            }
            _ => unreachable!("structural ops filtered out"),
        }
    }

    let mut runs: Vec<StyledRun> = Vec::new();
    for (id, ch) in char_ids.into_iter().zip(chars) {
        if removed.contains(&id) {
            continue;
        }
        let style = styles.get(&id).cloned().unwrap_or_default();
        match runs.last_mut() {
            Some(run) if run.styles == style => {
                run.char_ids.push(id.to_string());
                run.text.push_str(&ch);
            }
            _ => runs.push(StyledRun {
                kind: "text",
                char_ids: vec![id.to_string()],
                text: ch,
                styles: style,
            }),
        }
    }
    runs
}

/// Inclusive index range of a mark, or None if either anchor is missing.
fn mark_range(char_ids: &[OpId], start: &OpId, end: &OpId) -> Option<(usize, usize)> {
    let start = char_ids.iter().position(|id| id == start)?;
    let end = char_ids.iter().position(|id| id == end)?;
    (start <= end).then_some((start, end))
}

fn apply_mark(style: &mut TextStyle, mark_type: MarkType, color: &str, set: bool) {
    match mark_type {
        MarkType::Bold => style.bold = set,
        MarkType::Italic => style.italic = set,
        MarkType::Underline => style.underline = set,
        MarkType::Strikethrough => style.strikethrough = set,
        MarkType::TextColor => {
            style.text_color = if set { color.to_string() } else { String::new() };
        }
        MarkType::BackgroundColor => {
            style.background_color = if set { color.to_string() } else { String::new() };
        }
    }
}
