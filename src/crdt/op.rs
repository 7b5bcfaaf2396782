//! Operation model and identifier algebra
//!
//! Every change to a document is one of seven operations, carried in a
//! common envelope. Operations are identified by `(seq, origin)` pairs
//! rendered as `"{seq}@{origin}"`; the ordering on identifiers (seq first,
//! origin as lexicographic tiebreak) is what makes compilation
//! peer-independent.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// The literal origin used by clients for references inside a batch whose
/// authoritative sequence numbers are not yet known.
pub const TEMP_ORIGIN: &str = "temp";

/// Errors from the CRDT subsystem.
#[derive(Error, Debug)]
pub enum CrdtError {
    #[error("malformed operation id: {0:?}")]
    MalformedId(String),

    #[error("reference rewrite failed: {0}")]
    RefRewriteFailed(String),

    #[error("document not found: {0}")]
    DocumentNotFound(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Globally unique operation identifier: a per-document sequence number
/// paired with the socket address of the issuing peer.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OpId {
    pub seq: u64,
    pub origin: String,
}

impl OpId {
    pub fn new(seq: u64, origin: impl Into<String>) -> Self {
        Self {
            seq,
            origin: origin.into(),
        }
    }

    /// A client-issued identifier whose sequence number is provisional.
    pub fn temp(seq: u64) -> Self {
        Self::new(seq, TEMP_ORIGIN)
    }

    pub fn is_temp(&self) -> bool {
        self.origin == TEMP_ORIGIN
    }
}

impl fmt::Display for OpId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.seq, self.origin)
    }
}

impl FromStr for OpId {
    type Err = CrdtError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (seq, origin) = s
            .split_once('@')
            .ok_or_else(|| CrdtError::MalformedId(s.to_string()))?;
        let seq: u64 = seq
            .parse()
            .map_err(|_| CrdtError::MalformedId(s.to_string()))?;
        Ok(Self::new(seq, origin))
    }
}

impl Serialize for OpId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for OpId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// The kinds of blocks a document can contain.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlockKind {
    #[serde(rename = "paragraph")]
    Paragraph,
    #[serde(rename = "heading")]
    Heading,
    #[serde(rename = "bulletListItem")]
    BulletedList,
    #[serde(rename = "numberedListItem")]
    NumberedList,
    #[serde(rename = "image")]
    Image,
    #[serde(rename = "table")]
    Table,
}

fn is_zero(level: &u8) -> bool {
    *level == 0
}

/// Presentation properties shared by all block kinds. `level` is only
/// meaningful for headings (1..=4); zero means unset and is not serialized.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BlockProps {
    pub text_color: String,
    pub background_color: String,
    pub text_alignment: String,
    #[serde(skip_serializing_if = "is_zero")]
    pub level: u8,
}

/// Inline styling accumulated per character. Defaults serialize to `{}`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TextStyle {
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub bold: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub italic: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub underline: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub strikethrough: bool,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub text_color: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub background_color: String,
}

/// The styling dimensions a mark can set or clear.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MarkType {
    #[serde(rename = "bold")]
    Bold,
    #[serde(rename = "italic")]
    Italic,
    #[serde(rename = "underline")]
    Underline,
    #[serde(rename = "strikethrough")]
    Strikethrough,
    #[serde(rename = "textColor")]
    TextColor,
    #[serde(rename = "backgroundColor")]
    BackgroundColor,
}

/// Which side of the anchor character a mark boundary sits on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BoundSide {
    Before,
    After,
}

/// One end of a mark range, anchored to a character's operation ID.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MarkBound {
    pub side: BoundSide,
    #[serde(rename = "opId")]
    pub id: OpId,
}

/// Extra mark parameters; only color marks use it.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MarkOptions {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub color: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddBlock {
    pub block_type: BlockKind,
    #[serde(default)]
    pub props: BlockProps,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after_block: Option<OpId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_block: Option<OpId>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoveBlock {
    pub removed_block: OpId,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateBlock {
    pub updated_block: OpId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_type: Option<BlockKind>,
    #[serde(default)]
    pub props: BlockProps,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after_block: Option<OpId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_block: Option<OpId>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InsertChar {
    /// Character this one goes after; None inserts at the block start.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after_id: Option<OpId>,
    /// A single grapheme.
    pub character: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteChar {
    pub removed_id: OpId,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddMark {
    pub start: MarkBound,
    pub end: MarkBound,
    pub mark_type: MarkType,
    #[serde(default)]
    pub options: MarkOptions,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoveMark {
    pub start: MarkBound,
    pub end: MarkBound,
    pub mark_type: MarkType,
}

/// The seven operation kinds, tagged on the wire by `kind`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum OpPayload {
    #[serde(rename = "addBlock")]
    AddBlock(AddBlock),
    #[serde(rename = "removeBlock")]
    RemoveBlock(RemoveBlock),
    #[serde(rename = "updateBlock")]
    UpdateBlock(UpdateBlock),
    #[serde(rename = "insert")]
    InsertChar(InsertChar),
    #[serde(rename = "delete")]
    DeleteChar(DeleteChar),
    #[serde(rename = "addMark")]
    AddMark(AddMark),
    #[serde(rename = "removeMark")]
    RemoveMark(RemoveMark),
}

impl OpPayload {
    /// True for the block-structural kinds the tree fold consumes.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            OpPayload::AddBlock(_) | OpPayload::RemoveBlock(_) | OpPayload::UpdateBlock(_)
        )
    }
}

/// Common envelope for every operation. `seq` and `origin` together form
/// the operation ID; `block_id` keys the op log entry this operation lands
/// in (for AddBlock it is the new block's own ID).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrdtOperation {
    pub origin: String,
    pub seq: u64,
    pub doc_id: String,
    pub block_id: String,
    pub payload: OpPayload,
}

impl CrdtOperation {
    pub fn id(&self) -> OpId {
        OpId::new(self.seq, self.origin.clone())
    }
}
