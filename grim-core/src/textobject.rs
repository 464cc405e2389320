use ropey::RopeSlice;
use thiserror::Error;

use crate::chars::{
    byte_is_blank, byte_is_sentence_end, byte_is_whitespace, byte_is_word,
};
use crate::surround;
use crate::ByteRange;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextObjectKind {
    /// `[A-Za-z0-9_]` run.
    Word,
    /// Non-whitespace run.
    BigWord,
    Sentence,
    Paragraph,
    Line,
    /// Balanced pair; accepts either side of `()`, `[]`, `{}`, `<>`.
    Block(char),
    /// `'`, `"` or a backtick.
    Quoted(char),
    Tag,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TextObjectError {
    #[error("no matching opening bracket")]
    NoMatchingOpeningBracket,
    #[error("no matching closing bracket")]
    NoMatchingClosingBracket,
    #[error("text object not implemented")]
    NotImplemented,
}

/// Find the byte range of the text object of `kind` around `offset`.
///
/// For delimited objects `include_delimiters` selects between the inner
/// range and the range including the pair; for words it widens the range to
/// the adjacent blank run the way `aw` does.
pub fn textobject_range(
    slice: RopeSlice,
    offset: usize,
    kind: TextObjectKind,
    include_delimiters: bool,
) -> Result<ByteRange, TextObjectError> {
    match kind {
        TextObjectKind::Word => Ok(word_range(slice, offset, byte_is_word, include_delimiters)),
        TextObjectKind::BigWord => Ok(word_range(
            slice,
            offset,
            |b| !byte_is_whitespace(b),
            include_delimiters,
        )),
        TextObjectKind::Sentence => Ok(sentence_range(slice, offset)),
        TextObjectKind::Paragraph => Ok(paragraph_range(slice, offset)),
        TextObjectKind::Line => Ok(line_range(slice, offset)),
        TextObjectKind::Block(ch) => {
            let (open, close) = surround::get_pair(ch as u8);
            let open_pos = surround::find_opening(slice, open, close, offset)
                .ok_or(TextObjectError::NoMatchingOpeningBracket)?;
            let close_pos = surround::find_closing(slice, open, close, offset)
                .ok_or(TextObjectError::NoMatchingClosingBracket)?;
            Ok(if include_delimiters {
                ByteRange::new(open_pos, close_pos + 1)
            } else {
                ByteRange::new(open_pos + 1, close_pos)
            })
        }
        TextObjectKind::Quoted(ch) => {
            let open_pos = surround::find_quote_start(slice, ch as u8, offset)
                .ok_or(TextObjectError::NoMatchingOpeningBracket)?;
            let close_pos = surround::find_quote_end(slice, ch as u8, offset)
                .ok_or(TextObjectError::NoMatchingClosingBracket)?;
            Ok(if include_delimiters {
                ByteRange::new(open_pos, close_pos + 1)
            } else {
                ByteRange::new(open_pos + 1, close_pos)
            })
        }
        TextObjectKind::Tag => Err(TextObjectError::NotImplemented),
    }
}

fn word_range(
    slice: RopeSlice,
    offset: usize,
    is_word_byte: impl Fn(u8) -> bool,
    around: bool,
) -> ByteRange {
    let len = slice.len_bytes();
    if len == 0 {
        return ByteRange::point(0);
    }
    let offset = offset.min(len);

    let mut start = offset;
    while start > 0 && is_word_byte(slice.byte(start - 1)) {
        start -= 1;
    }
    let mut end = offset;
    while end < len && is_word_byte(slice.byte(end)) {
        end += 1;
    }

    if !around || start == end {
        return ByteRange::new(start, end);
    }

    // `around` favors the blank run to the right, falling back to the left.
    let mut wide_end = end;
    while wide_end < len && byte_is_blank(slice.byte(wide_end)) {
        wide_end += 1;
    }
    if wide_end > end {
        return ByteRange::new(start, wide_end);
    }
    let mut wide_start = start;
    while wide_start > 0 && byte_is_blank(slice.byte(wide_start - 1)) {
        wide_start -= 1;
    }
    ByteRange::new(wide_start, end)
}

fn sentence_range(slice: RopeSlice, offset: usize) -> ByteRange {
    let len = slice.len_bytes();
    if len == 0 {
        return ByteRange::point(0);
    }
    let offset = offset.min(len - 1);

    // backward to the previous terminator, then past the gap
    let mut start = 0;
    let mut bytes = slice.bytes_at(offset);
    let mut i = offset;
    while let Some(b) = bytes.prev() {
        i -= 1;
        if byte_is_sentence_end(b) {
            start = i + 1;
            break;
        }
    }
    while start < len && byte_is_whitespace(slice.byte(start)) {
        start += 1;
    }

    // forward to and including the next terminator
    let mut end = offset;
    let mut bytes = slice.bytes_at(offset);
    while let Some(b) = bytes.next() {
        end += 1;
        if byte_is_sentence_end(b) {
            break;
        }
    }

    ByteRange::new(start.min(end), end)
}

fn paragraph_range(slice: RopeSlice, offset: usize) -> ByteRange {
    let len = slice.len_bytes();
    if len == 0 {
        return ByteRange::point(0);
    }
    let offset = offset.min(len - 1);
    let line = slice.byte_to_line(offset);
    if line_is_blank(slice, line) {
        return ByteRange::point(slice.line_to_byte(line));
    }

    let mut first = line;
    while first > 0 && !line_is_blank(slice, first - 1) {
        first -= 1;
    }
    let total = slice.len_lines();
    let mut past = line + 1;
    while past < total && !line_is_blank(slice, past) {
        past += 1;
    }

    let start = slice.line_to_byte(first);
    let end = if past < total {
        slice.line_to_byte(past)
    } else {
        len
    };
    ByteRange::new(start, end)
}

fn line_range(slice: RopeSlice, offset: usize) -> ByteRange {
    let len = slice.len_bytes();
    if len == 0 {
        return ByteRange::point(0);
    }
    let line = slice.byte_to_line(offset.min(len - 1));
    let start = slice.line_to_byte(line);
    let end = if line + 1 < slice.len_lines() {
        slice.line_to_byte(line + 1)
    } else {
        len
    };
    ByteRange::new(start, end)
}

fn line_is_blank(slice: RopeSlice, line: usize) -> bool {
    slice.line(line).bytes().all(byte_is_whitespace)
}
