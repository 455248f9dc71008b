//! Deterministic text chunk planner.
//!
//! Splits parsed markdown into overlapping, size-bounded chunks ahead of
//! embedding. Pure function of (input, parameters): no I/O, no global state,
//! byte-identical output for identical input.

use crate::models::PlannedChunk;

/// Approximate token count: one token ≈ ¾ word, so tokens = ⌈words × 4⁄3⌉.
pub fn approx_token_count(text: &str) -> usize {
    let words = text.split_whitespace().count();
    (words * 4).div_ceil(3)
}

/// Plans chunks of roughly `chunk_size_tokens` with `chunk_overlap_tokens`
/// of trailing context carried into each following chunk.
#[derive(Debug, Clone, Copy)]
pub struct ChunkPlanner {
    chunk_size_tokens: usize,
    chunk_overlap_tokens: usize,
}

impl ChunkPlanner {
    pub fn new(chunk_size_tokens: usize, chunk_overlap_tokens: usize) -> Self {
        let chunk_size_tokens = chunk_size_tokens.max(1);
        // Overlap must leave room for new content or packing cannot advance.
        let chunk_overlap_tokens = chunk_overlap_tokens.min(chunk_size_tokens / 2);
        Self {
            chunk_size_tokens,
            chunk_overlap_tokens,
        }
    }

    /// Split `text` into ordered chunks with contiguous 0-based indices.
    /// Empty or whitespace-only input yields an empty list.
    pub fn plan(&self, text: &str) -> Vec<PlannedChunk> {
        if text.trim().is_empty() {
            return vec![];
        }

        let units = self.units(text);
        let mut chunks: Vec<PlannedChunk> = Vec::new();
        // (text, tokens) of units accumulated for the current chunk.
        let mut current: Vec<(String, usize)> = Vec::new();
        let mut current_tokens = 0usize;

        for (unit, tokens) in units {
            if !current.is_empty() && current_tokens + tokens > self.chunk_size_tokens {
                self.emit(&mut chunks, &current);
                let carried = self.overlap_tail(&current);
                current_tokens = carried.iter().map(|(_, t)| t).sum();
                current = carried;
            }
            current_tokens += tokens;
            current.push((unit, tokens));
        }

        if !current.is_empty() {
            self.emit(&mut chunks, &current);
        }

        chunks
    }

    /// Sentence-level units, force-splitting any sentence that alone exceeds
    /// the chunk size at whitespace boundaries.
    fn units(&self, text: &str) -> Vec<(String, usize)> {
        let mut units = Vec::new();
        for paragraph in text.split("\n\n") {
            let paragraph = paragraph.trim();
            if paragraph.is_empty() {
                continue;
            }
            for sentence in split_sentences(paragraph) {
                let tokens = approx_token_count(&sentence);
                if tokens <= self.chunk_size_tokens {
                    units.push((sentence, tokens));
                } else {
                    // Oversized sentence: fall back to word windows.
                    let max_words = ((self.chunk_size_tokens * 3) / 4).max(1);
                    let words: Vec<&str> = sentence.split_whitespace().collect();
                    for piece in words.chunks(max_words) {
                        let piece = piece.join(" ");
                        let piece_tokens = approx_token_count(&piece);
                        units.push((piece, piece_tokens));
                    }
                }
            }
        }
        units
    }

    fn emit(&self, chunks: &mut Vec<PlannedChunk>, units: &[(String, usize)]) {
        let text = units
            .iter()
            .map(|(u, _)| u.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        let token_count = approx_token_count(&text) as i32;
        chunks.push(PlannedChunk {
            chunk_index: chunks.len() as i32,
            text,
            token_count,
        });
    }

    /// Trailing units of the just-emitted chunk totalling at most the
    /// configured overlap, preserved in order.
    fn overlap_tail(&self, units: &[(String, usize)]) -> Vec<(String, usize)> {
        let mut tail: Vec<(String, usize)> = Vec::new();
        let mut total = 0usize;
        for (unit, tokens) in units.iter().rev() {
            if total + tokens > self.chunk_overlap_tokens {
                break;
            }
            total += tokens;
            tail.push((unit.clone(), *tokens));
        }
        tail.reverse();
        tail
    }
}

/// Split a paragraph into sentences at terminator-plus-whitespace boundaries.
/// A paragraph with no terminators is one sentence.
fn split_sentences(paragraph: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut start = 0usize;
    let bytes = paragraph.as_bytes();
    let mut i = 0usize;
    while i < bytes.len() {
        let b = bytes[i];
        if (b == b'.' || b == b'!' || b == b'?')
            && bytes
                .get(i + 1)
                .map(|next| next.is_ascii_whitespace())
                .unwrap_or(true)
        {
            let sentence = paragraph[start..=i].trim();
            if !sentence.is_empty() {
                sentences.push(sentence.to_string());
            }
            start = i + 1;
        }
        i += 1;
    }
    if start < paragraph.len() {
        let rest = paragraph[start..].trim();
        if !rest.is_empty() {
            sentences.push(rest.to_string());
        }
    }
    sentences
}
