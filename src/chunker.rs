use crate::checkpoint::ChunkKey;

/// One unit of extraction work: a bounded slice of a page's cleaned text.
/// `(source_url, chunk_index)` is the identity key used for checkpointing.
#[derive(Debug, Clone)]
pub struct ChunkTask {
    pub source_url: String,
    pub chunk_index: u32,
    pub text: String,
}

impl ChunkTask {
    pub fn key(&self) -> ChunkKey {
        (self.source_url.clone(), self.chunk_index)
    }
}

/// Split `text` into contiguous chunks of at most `chunk_size` characters.
/// Every chunk except possibly the last is exactly `chunk_size` long, and
/// concatenating the chunks reproduces `text`. Boundaries are measured in
/// characters so multi-byte text never splits a code point.
pub fn split_text(text: &str, chunk_size: usize) -> Vec<String> {
    assert!(chunk_size > 0, "chunk_size must be positive");
    let chars: Vec<char> = text.chars().collect();
    chars
        .chunks(chunk_size)
        .map(|c| c.iter().collect())
        .collect()
}

/// Cap a page's cleaned text at `max_text` characters and enumerate its
/// chunks into tasks. Empty text yields no tasks.
pub fn build_tasks(url: &str, text: &str, chunk_size: usize, max_text: usize) -> Vec<ChunkTask> {
    let capped: String = text.chars().take(max_text).collect();
    split_text(&capped, chunk_size)
        .into_iter()
        .enumerate()
        .map(|(i, chunk)| ChunkTask {
            source_url: url.to_string(),
            chunk_index: i as u32,
            text: chunk,
        })
        .collect()
}

// ── Tests ──
