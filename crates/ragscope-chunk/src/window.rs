//! Fixed-size sliding window chunker.
//!
//! Windows are measured in chars so a window never splits a UTF-8 sequence.
//! Consecutive windows start `chunk_size - overlap` chars apart, and a window
//! starts at every such offset before the end of the text. Windows near the
//! end are truncated, so the tail may be covered by several shrinking windows.

use std::iter::FusedIterator;

use ragscope_core::{ChunkParams, ChunkSpan, Chunker};

/// One window of the source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window<'a> {
    /// The window text, borrowed from the source.
    pub text: &'a str,

    /// Start offset in chars.
    pub start: usize,

    /// End offset in chars (exclusive).
    pub end: usize,
}

/// Lazy iterator over the windows of a text.
///
/// Holds no state beyond its position. Clones yield the remaining windows
/// independently, and calling [`windows`] again starts over.
#[derive(Debug, Clone)]
pub struct Windows<'a> {
    text: &'a str,
    params: ChunkParams,
    start_byte: usize,
    start_char: usize,
}

/// Split `text` into overlapping windows.
///
/// # Example
///
/// ```rust
/// use ragscope_chunk::windows;
/// use ragscope_core::ChunkParams;
///
/// let texts: Vec<&str> = windows("abcdefghijklmnopqrstuvwxyz", ChunkParams::new(10, 2))
///     .map(|w| w.text)
///     .collect();
/// assert_eq!(texts, ["abcdefghij", "ijklmnopqr", "qrstuvwxyz", "yz"]);
/// ```
pub fn windows(text: &str, params: ChunkParams) -> Windows<'_> {
    Windows {
        text,
        params,
        start_byte: 0,
        start_char: 0,
    }
}

/// Convenience wrapper: clamp raw parameters and collect the window texts.
pub fn chunk_text(text: &str, chunk_size: i64, overlap: i64) -> Vec<&str> {
    windows(text, ChunkParams::new(chunk_size, overlap))
        .map(|w| w.text)
        .collect()
}

/// Byte offset after `n` chars of `s`, and the number of chars actually
/// consumed (less than `n` only when `s` is shorter).
fn advance(s: &str, n: usize) -> (usize, usize) {
    match s.char_indices().nth(n) {
        Some((idx, _)) => (idx, n),
        None => (s.len(), s.chars().count()),
    }
}

impl<'a> Iterator for Windows<'a> {
    type Item = Window<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.start_byte >= self.text.len() {
            return None;
        }

        let rest = &self.text[self.start_byte..];
        let (end_byte, len) = advance(rest, self.params.chunk_size());
        let window = Window {
            text: &rest[..end_byte],
            start: self.start_char,
            end: self.start_char + len,
        };

        // Runs past the end when fewer than `step` chars remain
        let (step_byte, step) = advance(rest, self.params.step());
        self.start_byte += step_byte;
        self.start_char += step;

        Some(window)
    }
}

impl FusedIterator for Windows<'_> {}

/// Sliding window chunker over chars.
#[derive(Debug, Clone, Copy, Default)]
pub struct SlidingWindowChunker;

impl SlidingWindowChunker {
    /// Create a new sliding window chunker.
    pub fn new() -> Self {
        Self
    }
}

impl Chunker for SlidingWindowChunker {
    fn chunk(&self, content: &str, params: ChunkParams) -> Vec<ChunkSpan> {
        windows(content, params)
            .map(|w| ChunkSpan {
                content: w.text.to_string(),
                start: w.start,
                end: w.end,
            })
            .collect()
    }
}
