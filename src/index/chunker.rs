//! Overlapping text windows for embedding.
//!
//! Sizes are measured in bytes and every cut lands on a UTF-8 boundary, so
//! for ASCII sources a "character" budget and a byte budget coincide.

use serde::Serialize;

#[derive(Debug, Clone, Copy)]
pub struct ChunkPolicy {
    pub size: usize,
    pub overlap: usize,
    pub min_len: usize,
}

impl Default for ChunkPolicy {
    fn default() -> Self {
        Self {
            size: 1000,
            overlap: 100,
            min_len: 50,
        }
    }
}

/// A window of whole lines. Lines are 1-based and inclusive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChunkWithLines {
    pub content: String,
    pub line_start: u32,
    pub line_end: u32,
}

/// Split `content` into overlapping windows.
///
/// Content that fits in one window is returned whole when it is not blank.
/// Otherwise each window ends at the last newline past its midpoint (or at the
/// window size when there is none), consecutive windows share `overlap` bytes,
/// and windows whose trimmed text is shorter than `min_len` are dropped.
pub fn split_text(content: &str, policy: &ChunkPolicy) -> Vec<String> {
    if content.trim().is_empty() {
        return vec![];
    }
    if content.len() <= policy.size {
        return vec![content.to_string()];
    }

    let size = policy.size.max(1);
    let mut chunks = Vec::new();
    let mut start = 0usize;

    while start < content.len() {
        let mut end = floor_boundary(content, (start + size).min(content.len()));
        if end <= start {
            end = ceil_boundary(content, start + 1);
        }

        if end < content.len() {
            let half = floor_boundary(content, start + size / 2);
            if let Some(pos) = content[half..end].rfind('\n') {
                end = half + pos + 1;
            }
        }

        let piece = &content[start..end];
        if piece.trim().len() >= policy.min_len {
            chunks.push(piece.to_string());
        }

        if end >= content.len() {
            break;
        }
        let next = floor_boundary(content, end.saturating_sub(policy.overlap));
        start = if next > start { next } else { end };
    }

    chunks
}

/// Split `content` into windows of whole lines, carrying line numbers.
///
/// Lines are accumulated until the next one would push the window past the
/// size; a single line longer than the window becomes its own oversize chunk.
/// The next window starts by walking backward from the break, line by line,
/// until at least `overlap` bytes are shared, always moving forward by at
/// least one line.
pub fn split_with_lines(content: &str, policy: &ChunkPolicy) -> Vec<ChunkWithLines> {
    if content.trim().is_empty() {
        return vec![];
    }

    let lines: Vec<&str> = content.split('\n').collect();
    let single_window = content.len() <= policy.size;
    let mut chunks = Vec::new();
    let mut i = 0usize;

    while i < lines.len() {
        let mut j = i;
        let mut acc = 0usize;
        while j < lines.len() && (j == i || acc + lines[j].len() + 1 <= policy.size) {
            acc += lines[j].len() + 1;
            j += 1;
        }

        let text = lines[i..j].join("\n");
        let trimmed = text.trim();
        if !trimmed.is_empty() && (single_window || trimmed.len() >= policy.min_len) {
            chunks.push(ChunkWithLines {
                content: text,
                line_start: i as u32 + 1,
                line_end: j as u32,
            });
        }

        if j >= lines.len() {
            break;
        }

        let mut k = j;
        let mut shared = 0usize;
        while k > i + 1 && shared < policy.overlap {
            k -= 1;
            shared += lines[k].len() + 1;
        }
        i = k;
    }

    chunks
}

fn floor_boundary(s: &str, mut idx: usize) -> usize {
    if idx >= s.len() {
        return s.len();
    }
    while idx > 0 && !s.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

fn ceil_boundary(s: &str, mut idx: usize) -> usize {
    while idx < s.len() && !s.is_char_boundary(idx) {
        idx += 1;
    }
    idx.min(s.len())
}
