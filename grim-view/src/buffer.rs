//! The buffer bridge: rope-backed buffers with cursor, selection and
//! change-tick state, adjusted on every edit and surfaced to plugins as
//! typed events.
//!
//! All offsets are byte offsets. Every mutation validates its arguments
//! before touching the rope, so a failed operation leaves the buffer
//! untouched.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use ropey::Rope;
use thiserror::Error;

use grim_core::{surround, ByteRange};
use grim_event::{EventBus, EventPayload, EventType};

pub type BufferId = u32;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BufferError {
    #[error("unknown buffer {0}")]
    InvalidBuffer(BufferId),
    #[error("offset {offset} out of range for buffer of length {len}")]
    OutOfRange { offset: usize, len: usize },
    #[error("io error: {0}")]
    Io(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Cursor {
    pub line: usize,
    pub column: usize,
    pub byte_offset: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Insert,
    Delete,
    Replace,
}

/// Low-level change record delivered to the registered notifier before the
/// typed events fire.
#[derive(Debug, Clone)]
pub struct BufferChange {
    pub buffer_id: BufferId,
    pub range: ByteRange,
    pub inserted_len: usize,
    pub kind: ChangeKind,
}

pub type ChangeNotifier = Box<dyn FnMut(&BufferChange)>;

#[derive(Debug)]
pub struct Buffer {
    pub id: BufferId,
    rope: Rope,
    pub path: Option<PathBuf>,
    pub modified: bool,
    cursor: Cursor,
    selection: Option<ByteRange>,
    pub filetype: Option<String>,
    change_tick: u64,
}

impl Buffer {
    fn new(id: BufferId) -> Self {
        Self {
            id,
            rope: Rope::new(),
            path: None,
            modified: false,
            cursor: Cursor::default(),
            selection: None,
            filetype: None,
            change_tick: 0,
        }
    }

    pub fn rope(&self) -> &Rope {
        &self.rope
    }

    pub fn cursor(&self) -> Cursor {
        self.cursor
    }

    pub fn selection(&self) -> Option<ByteRange> {
        self.selection
    }

    pub fn change_tick(&self) -> u64 {
        self.change_tick
    }

    fn sync_cursor(&mut self) {
        let offset = self.cursor.byte_offset.min(self.rope.len_bytes());
        let line = self.rope.byte_to_line(offset);
        self.cursor = Cursor {
            line,
            column: offset - self.rope.line_to_byte(line),
            byte_offset: offset,
        };
    }

    /// Shift anchors for an insertion of `len` bytes at `offset`:
    /// anchors at or after the insertion point move forward.
    fn adjust_for_insert(&mut self, offset: usize, len: usize) {
        if self.cursor.byte_offset >= offset {
            self.cursor.byte_offset += len;
        }
        if let Some(sel) = self.selection {
            let shift = |anchor: usize| if anchor >= offset { anchor + len } else { anchor };
            self.selection = Some(ByteRange::new(shift(sel.start), shift(sel.end)));
        }
        self.sync_cursor();
    }

    /// Shift anchors for a deletion of `range`: anchors past the end move
    /// back, anchors inside collapse to the deletion start.
    fn adjust_for_delete(&mut self, range: ByteRange) {
        let len = range.len();
        let shift = |anchor: usize| {
            if anchor >= range.end {
                anchor - len
            } else {
                anchor.min(range.start)
            }
        };
        self.cursor.byte_offset = shift(self.cursor.byte_offset);
        if let Some(sel) = self.selection {
            self.selection = Some(ByteRange::new(shift(sel.start), shift(sel.end)));
        }
        self.sync_cursor();
    }
}

fn filetype_of(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_string)
}

/// The editor-side owner of all buffers. Buffer ids are handed out
/// monotonically starting at 1 and never reused.
pub struct Buffers {
    buffers: HashMap<BufferId, Buffer>,
    next_id: BufferId,
    notifier: Option<ChangeNotifier>,
}

impl Default for Buffers {
    fn default() -> Self {
        Self::new()
    }
}

impl Buffers {
    pub fn new() -> Self {
        Self {
            buffers: HashMap::new(),
            next_id: 1,
            notifier: None,
        }
    }

    pub fn set_change_notifier(&mut self, notifier: ChangeNotifier) {
        self.notifier = Some(notifier);
    }

    pub fn get(&self, id: BufferId) -> Result<&Buffer, BufferError> {
        self.buffers.get(&id).ok_or(BufferError::InvalidBuffer(id))
    }

    fn get_mut(&mut self, id: BufferId) -> Result<&mut Buffer, BufferError> {
        self.buffers
            .get_mut(&id)
            .ok_or(BufferError::InvalidBuffer(id))
    }

    pub fn ids(&self) -> Vec<BufferId> {
        let mut ids: Vec<_> = self.buffers.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Create an empty buffer.
    pub fn create(&mut self, bus: &mut EventBus) -> BufferId {
        let id = self.alloc();
        bus.emit(
            EventType::BufNew,
            EventPayload::Buffer {
                buffer_id: id,
                path: None,
            },
        );
        id
    }

    /// Open a file into a fresh buffer. The filetype is derived from the
    /// extension.
    pub fn open(&mut self, bus: &mut EventBus, path: &Path) -> Result<BufferId, BufferError> {
        let id = self.alloc();
        let payload = EventPayload::Buffer {
            buffer_id: id,
            path: Some(path.display().to_string()),
        };
        bus.emit(EventType::BufNew, payload.clone());
        bus.emit(EventType::BufReadPre, payload.clone());

        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(err) => {
                self.buffers.remove(&id);
                return Err(BufferError::Io(err.to_string()));
            }
        };

        let buffer = self.buffers.get_mut(&id).expect("buffer allocated above");
        buffer.rope = Rope::from_str(&text);
        buffer.path = Some(path.to_path_buf());
        buffer.filetype = filetype_of(path);

        bus.emit(EventType::BufReadPost, payload);
        Ok(id)
    }

    /// Close a buffer and drop its state.
    pub fn close(&mut self, bus: &mut EventBus, id: BufferId) -> Result<(), BufferError> {
        let buffer = self
            .buffers
            .remove(&id)
            .ok_or(BufferError::InvalidBuffer(id))?;
        bus.emit(
            EventType::BufDelete,
            EventPayload::Buffer {
                buffer_id: id,
                path: buffer.path.as_ref().map(|p| p.display().to_string()),
            },
        );
        Ok(())
    }

    /// Write the buffer back to its path and clear the modified flag.
    pub fn save(&mut self, bus: &mut EventBus, id: BufferId) -> Result<(), BufferError> {
        let buffer = self.get(id)?;
        let path = buffer
            .path
            .clone()
            .ok_or_else(|| BufferError::Io("buffer has no file path".to_string()))?;
        let payload = EventPayload::Buffer {
            buffer_id: id,
            path: Some(path.display().to_string()),
        };

        bus.emit(EventType::BufWritePre, payload.clone());

        let text = self.get(id)?.rope.to_string();
        std::fs::write(&path, text).map_err(|err| BufferError::Io(err.to_string()))?;

        self.get_mut(id)?.modified = false;
        bus.emit(EventType::BufWritePost, payload);
        Ok(())
    }

    pub fn content(&self, id: BufferId) -> Result<String, BufferError> {
        Ok(self.get(id)?.rope.to_string())
    }

    pub fn line(&self, id: BufferId, line: usize) -> Result<String, BufferError> {
        let buffer = self.get(id)?;
        if line >= buffer.rope.len_lines() {
            return Err(BufferError::OutOfRange {
                offset: line,
                len: buffer.rope.len_lines(),
            });
        }
        Ok(buffer.rope.line(line).to_string())
    }

    /// Replace the entire content in one atomic edit.
    pub fn set_content(
        &mut self,
        bus: &mut EventBus,
        id: BufferId,
        text: &str,
    ) -> Result<(), BufferError> {
        let len = self.get(id)?.rope.len_bytes();
        self.replace(bus, id, ByteRange::new(0, len), text)
    }

    pub fn insert(
        &mut self,
        bus: &mut EventBus,
        id: BufferId,
        offset: usize,
        text: &str,
    ) -> Result<(), BufferError> {
        let buffer = self.get_mut(id)?;
        let char_idx = char_index(&buffer.rope, offset)?;

        buffer.rope.insert(char_idx, text);
        buffer.adjust_for_insert(offset, text.len());
        buffer.modified = true;
        buffer.change_tick += 1;

        self.notify(BufferChange {
            buffer_id: id,
            range: ByteRange::new(offset, offset),
            inserted_len: text.len(),
            kind: ChangeKind::Insert,
        });
        emit_text(bus, id, (offset, offset + text.len()), text);
        Ok(())
    }

    pub fn delete(
        &mut self,
        bus: &mut EventBus,
        id: BufferId,
        range: ByteRange,
    ) -> Result<(), BufferError> {
        let buffer = self.get_mut(id)?;
        let start_char = char_index(&buffer.rope, range.start)?;
        let end_char = char_index(&buffer.rope, range.end)?;
        let removed = buffer.rope.slice(start_char..end_char).to_string();

        buffer.rope.remove(start_char..end_char);
        buffer.adjust_for_delete(range);
        buffer.modified = true;
        buffer.change_tick += 1;

        self.notify(BufferChange {
            buffer_id: id,
            range,
            inserted_len: 0,
            kind: ChangeKind::Delete,
        });
        emit_text(bus, id, (range.start, range.start), &removed);
        Ok(())
    }

    /// Replace `range` with `text`. Observably this is one atomic change
    /// (a single Replace notification) followed by the delete and insert
    /// events the two-step form would have produced.
    pub fn replace(
        &mut self,
        bus: &mut EventBus,
        id: BufferId,
        range: ByteRange,
        text: &str,
    ) -> Result<(), BufferError> {
        let buffer = self.get_mut(id)?;
        let start_char = char_index(&buffer.rope, range.start)?;
        let end_char = char_index(&buffer.rope, range.end)?;
        let removed = buffer.rope.slice(start_char..end_char).to_string();

        buffer.rope.remove(start_char..end_char);
        buffer.adjust_for_delete(range);
        let insert_char = buffer.rope.byte_to_char(range.start);
        buffer.rope.insert(insert_char, text);
        buffer.adjust_for_insert(range.start, text.len());
        buffer.modified = true;
        buffer.change_tick += 1;

        self.notify(BufferChange {
            buffer_id: id,
            range,
            inserted_len: text.len(),
            kind: ChangeKind::Replace,
        });
        emit_text(bus, id, (range.start, range.start), &removed);
        emit_text(bus, id, (range.start, range.start + text.len()), text);
        Ok(())
    }

    /// Apply several non-overlapping edits in one call. Edits are applied in
    /// descending start order so earlier offsets stay valid.
    pub fn replace_many(
        &mut self,
        bus: &mut EventBus,
        id: BufferId,
        edits: &[(ByteRange, &str)],
    ) -> Result<(), BufferError> {
        // validate everything against the untouched rope first
        {
            let buffer = self.get(id)?;
            for (range, _) in edits {
                char_index(&buffer.rope, range.start)?;
                char_index(&buffer.rope, range.end)?;
            }
        }

        let mut ordered: Vec<_> = edits.to_vec();
        ordered.sort_by(|a, b| b.0.start.cmp(&a.0.start));
        for (range, text) in ordered {
            self.replace(bus, id, range, text)?;
        }
        Ok(())
    }

    /// Wrap `range` in a delimiter pair, closing side first.
    pub fn surround(
        &mut self,
        bus: &mut EventBus,
        id: BufferId,
        range: ByteRange,
        open: &str,
        close: &str,
    ) -> Result<(), BufferError> {
        {
            let buffer = self.get(id)?;
            char_index(&buffer.rope, range.start)?;
            char_index(&buffer.rope, range.end)?;
        }
        for (offset, text) in surround::surround_insertions(range, open, close) {
            self.insert(bus, id, offset, &text)?;
        }
        Ok(())
    }

    pub fn cursor(&self, id: BufferId) -> Result<Cursor, BufferError> {
        Ok(self.get(id)?.cursor)
    }

    /// Move the cursor to a byte offset, clamping to the buffer length and
    /// recomputing line/column.
    pub fn set_cursor(
        &mut self,
        bus: &mut EventBus,
        id: BufferId,
        byte_offset: usize,
    ) -> Result<Cursor, BufferError> {
        let buffer = self.get_mut(id)?;
        buffer.cursor.byte_offset = byte_offset;
        buffer.sync_cursor();
        let cursor = buffer.cursor;
        bus.emit(
            EventType::CursorMoved,
            EventPayload::Cursor {
                buffer_id: id,
                line: cursor.line,
                column: cursor.column,
                byte_offset: cursor.byte_offset,
            },
        );
        Ok(cursor)
    }

    pub fn selection(&self, id: BufferId) -> Result<Option<ByteRange>, BufferError> {
        Ok(self.get(id)?.selection)
    }

    /// Set or clear the selection. The stored range is always normalized.
    pub fn set_selection(
        &mut self,
        id: BufferId,
        selection: Option<(usize, usize)>,
    ) -> Result<(), BufferError> {
        let buffer = self.get_mut(id)?;
        buffer.selection = selection.map(|(start, end)| ByteRange::new(start, end));
        Ok(())
    }

    pub fn change_tick(&self, id: BufferId) -> Result<u64, BufferError> {
        Ok(self.get(id)?.change_tick)
    }

    fn alloc(&mut self) -> BufferId {
        let id = self.next_id;
        self.next_id += 1;
        self.buffers.insert(id, Buffer::new(id));
        id
    }

    fn notify(&mut self, change: BufferChange) {
        if let Some(notifier) = &mut self.notifier {
            notifier(&change);
        }
    }
}

fn emit_text(bus: &mut EventBus, id: BufferId, range: (usize, usize), text: &str) {
    bus.emit(
        EventType::TextChanged,
        EventPayload::Text {
            buffer_id: id,
            range,
            text: text.to_string(),
        },
    );
}

/// Map a byte offset to a char index, rejecting out-of-range offsets and
/// offsets that split a code point. Nothing is mutated on failure.
fn char_index(rope: &Rope, offset: usize) -> Result<usize, BufferError> {
    let len = rope.len_bytes();
    if offset > len {
        return Err(BufferError::OutOfRange { offset, len });
    }
    let char_idx = rope.byte_to_char(offset);
    if rope.char_to_byte(char_idx) != offset {
        return Err(BufferError::OutOfRange { offset, len });
    }
    Ok(char_idx)
}
