//! Byte classification used by the text object engine.
//!
//! Text objects operate on byte offsets, so the classes here are byte-level:
//! a word byte is `[A-Za-z0-9_]`, everything that is not whitespace belongs
//! to a WORD.

#[derive(Debug, Eq, PartialEq)]
pub enum CharCategory {
    Whitespace,
    Eol,
    Word,
    Punctuation,
}

#[inline]
pub fn categorize_byte(b: u8) -> CharCategory {
    if byte_is_line_ending(b) {
        CharCategory::Eol
    } else if byte_is_whitespace(b) {
        CharCategory::Whitespace
    } else if byte_is_word(b) {
        CharCategory::Word
    } else {
        CharCategory::Punctuation
    }
}

#[inline]
pub fn byte_is_word(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

/// Whitespace including line endings; the complement of this class defines a
/// WORD.
#[inline]
pub fn byte_is_whitespace(b: u8) -> bool {
    matches!(b, b' ' | b'\t' | b'\n' | b'\r')
}

/// Whitespace that does not end a line.
#[inline]
pub fn byte_is_blank(b: u8) -> bool {
    matches!(b, b' ' | b'\t')
}

#[inline]
pub fn byte_is_line_ending(b: u8) -> bool {
    matches!(b, b'\n' | b'\r')
}

#[inline]
pub fn byte_is_sentence_end(b: u8) -> bool {
    matches!(b, b'.' | b'!' | b'?')
}
