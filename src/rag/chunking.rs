//! Line-based chunking with overlap.
//!
//! Lines are accumulated into a buffer until adding the next one would reach
//! `chunk_size`; the buffer is then emitted as one chunk and its tail is kept
//! as the seed of the next buffer. Lengths are counted in chars.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

/// Separator placed between units when a buffer is emitted.
pub const UNIT_SEPARATOR: &str = "\n";

/// A bounded segment of one document, the unit that gets embedded and stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub document_id: String,
    pub chunk_sequence: u32,
    pub source: String,
    pub text: String,
}

impl Chunk {
    pub fn new(
        document_id: impl Into<String>,
        chunk_sequence: u32,
        source: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            document_id: document_id.into(),
            chunk_sequence,
            source: source.into(),
            text: text.into(),
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ChunkError {
    #[error("chunk_size must be greater than 0, got {0}")]
    ZeroChunkSize(i64),

    #[error("chunk_overlap must not be negative, got {0}")]
    NegativeOverlap(i64),

    #[error("chunk_overlap ({overlap}) must be smaller than chunk_size ({chunk_size})")]
    OverlapTooLarge { chunk_size: i64, overlap: i64 },
}

/// Validated chunking parameters: `chunk_size > 0` and `0 <= overlap < chunk_size`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkParams {
    chunk_size: usize,
    overlap: usize,
}

impl ChunkParams {
    pub fn new(chunk_size: i64, overlap: i64) -> Result<Self, ChunkError> {
        if chunk_size <= 0 {
            return Err(ChunkError::ZeroChunkSize(chunk_size));
        }
        if overlap < 0 {
            return Err(ChunkError::NegativeOverlap(overlap));
        }
        if overlap >= chunk_size {
            return Err(ChunkError::OverlapTooLarge {
                chunk_size,
                overlap,
            });
        }

        Ok(Self {
            chunk_size: chunk_size as usize,
            overlap: overlap as usize,
        })
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn overlap(&self) -> usize {
        self.overlap
    }
}

/// Split a document into overlapping chunks.
///
/// Units longer than `chunk_size` are hard-split first, so the summed unit
/// length of every chunk stays within `chunk_size`. The emitted text can be
/// longer by the separators placed between units.
pub fn chunk_lines<I, S>(lines: I, document_id: &str, source: &str, params: ChunkParams) -> Vec<Chunk>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut chunker = LineChunker::new(document_id, source, params);
    for line in lines {
        for unit in split_oversized(line.as_ref(), params.chunk_size) {
            chunker.push(unit);
        }
    }
    chunker.finish()
}

struct LineChunker<'a> {
    document_id: &'a str,
    source: &'a str,
    params: ChunkParams,
    buffer: VecDeque<(String, usize)>,
    buffer_len: usize,
    next_sequence: u32,
    chunks: Vec<Chunk>,
}

impl<'a> LineChunker<'a> {
    fn new(document_id: &'a str, source: &'a str, params: ChunkParams) -> Self {
        Self {
            document_id,
            source,
            params,
            buffer: VecDeque::new(),
            buffer_len: 0,
            next_sequence: 0,
            chunks: Vec::new(),
        }
    }

    fn push(&mut self, unit: String) {
        let unit_len = unit.chars().count();

        if !self.buffer.is_empty() && self.buffer_len + unit_len >= self.params.chunk_size {
            self.emit();
            self.seed_overlap(unit_len);
        }

        self.buffer_len += unit_len;
        self.buffer.push_back((unit, unit_len));
    }

    fn finish(mut self) -> Vec<Chunk> {
        if !self.buffer.is_empty() {
            self.emit();
        }
        self.chunks
    }

    fn emit(&mut self) {
        let text = self
            .buffer
            .iter()
            .map(|(unit, _)| unit.as_str())
            .collect::<Vec<_>>()
            .join(UNIT_SEPARATOR);

        self.chunks.push(Chunk::new(
            self.document_id,
            self.next_sequence,
            self.source,
            text,
        ));
        self.next_sequence += 1;
    }

    /// Keep the suffix of the emitted buffer whose length is closest to the
    /// overlap, then drop from its front until the incoming unit fits.
    fn seed_overlap(&mut self, incoming_len: usize) {
        let overlap = self.params.overlap;

        let mut keep = 0;
        let mut best_keep = 0;
        let mut best_distance = overlap;
        let mut suffix_len = 0;
        for (_, len) in self.buffer.iter().rev() {
            keep += 1;
            suffix_len += len;
            let distance = suffix_len.abs_diff(overlap);
            if distance <= best_distance {
                best_distance = distance;
                best_keep = keep;
            }
            if suffix_len > overlap {
                break;
            }
        }

        let drop = self.buffer.len() - best_keep;
        self.buffer.drain(..drop);
        self.buffer_len = self.buffer.iter().map(|(_, len)| len).sum();

        while !self.buffer.is_empty() && self.buffer_len + incoming_len > self.params.chunk_size {
            if let Some((_, len)) = self.buffer.pop_front() {
                self.buffer_len -= len;
            }
        }
    }
}

fn split_oversized(unit: &str, chunk_size: usize) -> Vec<String> {
    if unit.chars().count() <= chunk_size {
        return vec![unit.to_string()];
    }

    let chars: Vec<char> = unit.chars().collect();
    chars
        .chunks(chunk_size)
        .map(|piece| piece.iter().collect())
        .collect()
}
