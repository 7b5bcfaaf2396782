//! The collaboration core: operation model, op log, submission, compiler.

pub mod compile;
pub mod editor;
pub mod op;
pub mod state;

pub use compile::compile_document;
pub use editor::{DocumentOps, Editor};
pub use op::{
    AddBlock, AddMark, BlockKind, BlockProps, BoundSide, CrdtError, CrdtOperation, DeleteChar,
    InsertChar, MarkBound, MarkOptions, MarkType, OpId, OpPayload, RemoveBlock, RemoveMark,
    TextStyle, UpdateBlock, TEMP_ORIGIN,
};
pub use state::{stamp_batch, CrdtState};
