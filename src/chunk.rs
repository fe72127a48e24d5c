//! Sliding-window text chunker.
//!
//! Splits extracted report text into overlapping fixed-size segments for
//! embedding. Chunk `i` starts at `i * (chunk_size - overlap)` characters;
//! the overlap keeps sentences that straddle a boundary visible to both
//! neighboring chunks. Windows are measured in Unicode scalar values so a
//! multi-byte character is never split.

/// Split text into overlapping chunks. Empty input yields no chunks; any
/// non-empty input yields at least one. `overlap` must be smaller than
/// `chunk_size` (enforced at config load).
pub fn split_text(text: &str, chunk_size: usize, overlap: usize) -> Vec<String> {
    if text.is_empty() {
        return Vec::new();
    }

    let chars: Vec<char> = text.chars().collect();
    let step = chunk_size - overlap;
    let mut chunks = Vec::new();

    let mut start = 0;
    while start < chars.len() {
        let end = (start + chunk_size).min(chars.len());
        chunks.push(chars[start..end].iter().collect());
        if end == chars.len() {
            break;
        }
        start += step;
    }

    chunks
}
