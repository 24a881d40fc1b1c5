//! Paragraph-boundary text chunker with word overlap.
//!
//! Splits document text into [`DocumentChunk`]s of at most `chunk_size`
//! words. Splitting prefers paragraph boundaries (`\n\n`); a paragraph
//! longer than the limit is hard-split on word boundaries. Every chunk after
//! the first starts with the last `overlap` words of its predecessor so that
//! sentences straddling a boundary stay retrievable.
//!
//! Each chunk carries a SHA-256 hash of its text; the hash doubles as the
//! deduplication key when the same span appears in several messages.

use sha2::{Digest, Sha256};

use crate::models::DocumentChunk;

/// Split `text` into chunks for one source document.
///
/// Returns chunks with contiguous indices starting at 0. Whitespace-only
/// text produces no chunks.
pub fn chunk_text(
    source: &str,
    path: &str,
    text: &str,
    chunk_size: usize,
    overlap: usize,
) -> Vec<DocumentChunk> {
    let chunk_size = chunk_size.max(1);
    let overlap = overlap.min(chunk_size - 1);

    let mut pieces: Vec<Vec<&str>> = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    // Real words in `current`; paragraph markers do not count
    let mut current_words = 0usize;

    for para in text.split("\n\n") {
        let words: Vec<&str> = para.split_whitespace().collect();
        if words.is_empty() {
            continue;
        }

        // Flush if this paragraph does not fit next to what we have
        if !current.is_empty() && current_words + words.len() > chunk_size {
            pieces.push(std::mem::take(&mut current));
            current_words = 0;
        }

        if words.len() > chunk_size {
            if !current.is_empty() {
                pieces.push(std::mem::take(&mut current));
                current_words = 0;
            }
            for window in words.chunks(chunk_size) {
                pieces.push(window.to_vec());
            }
        } else {
            if !current.is_empty() {
                // Paragraph marker survives as an empty word; rendered as a blank line
                current.push("");
            }
            current_words += words.len();
            current.extend(words);
        }
    }

    if !current.is_empty() {
        pieces.push(current);
    }

    let mut chunks = Vec::with_capacity(pieces.len());
    let mut previous_tail: Vec<&str> = Vec::new();

    for (index, piece) in pieces.into_iter().enumerate() {
        let mut words: Vec<&str> = Vec::with_capacity(previous_tail.len() + piece.len());
        words.extend(previous_tail.iter().copied());
        words.extend(piece.iter().copied());

        previous_tail = tail_words(&piece, overlap);
        chunks.push(make_chunk(source, path, index as i64, &render(&words)));
    }

    chunks
}

/// Last `n` real words of a piece (paragraph markers are not counted).
fn tail_words<'a>(piece: &[&'a str], n: usize) -> Vec<&'a str> {
    if n == 0 {
        return Vec::new();
    }
    let real: Vec<&str> = piece.iter().copied().filter(|w| !w.is_empty()).collect();
    let start = real.len().saturating_sub(n);
    real[start..].to_vec()
}

fn render(words: &[&str]) -> String {
    let mut out = String::new();
    for word in words {
        if word.is_empty() {
            out.push_str("\n\n");
            continue;
        }
        if !out.is_empty() && !out.ends_with('\n') {
            out.push(' ');
        }
        out.push_str(word);
    }
    out
}

pub fn text_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn make_chunk(source: &str, path: &str, index: i64, text: &str) -> DocumentChunk {
    DocumentChunk {
        source: source.to_string(),
        path: path.to_string(),
        chunk_index: index,
        text: text.to_string(),
        hash: text_hash(text),
    }
}
