//! Sliding-window text chunker.
//!
//! Windows are measured in characters (Unicode scalar values), not bytes, so
//! multi-byte text never splits inside a code point. Consecutive windows
//! share exactly `overlap` characters.

use crate::error::{DocqaError, Result};
use crate::types::Chunk;

/// Splits document text into overlapping fixed-size windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunker {
    chunk_size: usize,
    overlap: usize,
}

impl Chunker {
    /// Create a chunker, rejecting sizes that would make no forward progress.
    pub fn new(chunk_size: usize, overlap: usize) -> Result<Self> {
        if chunk_size == 0 {
            return Err(DocqaError::Config(
                "chunk_size must be greater than zero".to_string(),
            ));
        }
        if overlap >= chunk_size {
            return Err(DocqaError::Config(format!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                overlap, chunk_size
            )));
        }
        Ok(Self {
            chunk_size,
            overlap,
        })
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn overlap(&self) -> usize {
        self.overlap
    }

    /// Characters the window advances per step.
    pub fn stride(&self) -> usize {
        self.chunk_size - self.overlap
    }

    /// Split `text` into chunks attributed to `document`.
    ///
    /// Empty text yields no chunks. Text no longer than `chunk_size` yields a
    /// single chunk. Otherwise a window starts at every multiple of the
    /// stride below the text length, and the last windows are truncated to
    /// the end of the text.
    pub fn chunk(&self, document: &str, text: &str) -> Vec<Chunk> {
        // Byte offset of every char boundary, including the end of the text.
        let boundaries: Vec<usize> = text
            .char_indices()
            .map(|(offset, _)| offset)
            .chain(std::iter::once(text.len()))
            .collect();
        let total = boundaries.len() - 1;

        if total == 0 {
            return Vec::new();
        }

        let starts: Vec<usize> = if total <= self.chunk_size {
            vec![0]
        } else {
            (0..total).step_by(self.stride()).collect()
        };

        starts
            .into_iter()
            .enumerate()
            .map(|(sequence_index, start)| {
                let end = (start + self.chunk_size).min(total);
                Chunk {
                    text: text[boundaries[start]..boundaries[end]].to_string(),
                    source_document: document.to_string(),
                    sequence_index,
                    char_span: (start, end),
                }
            })
            .collect()
    }
}

/// Rebuild the original text from chunks produced by a chunker with the
/// given overlap, dropping the shared prefix of every chunk after the first.
pub fn reassemble(chunks: &[Chunk], overlap: usize) -> String {
    let mut out = String::new();
    for (i, chunk) in chunks.iter().enumerate() {
        if i == 0 {
            out.push_str(&chunk.text);
        } else {
            out.extend(chunk.text.chars().skip(overlap));
        }
    }
    out
}
