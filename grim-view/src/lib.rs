pub mod buffer;
pub mod highlight;

pub use buffer::{Buffer, BufferChange, BufferError, BufferId, Buffers, ChangeKind, Cursor};
pub use highlight::{
    Color, HighlightError, HighlightGroup, HighlightRegistry, NamespaceHighlight, StyleFlags,
};
