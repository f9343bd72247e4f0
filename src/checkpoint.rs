use std::collections::HashSet;
use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};

use crate::chunker::ChunkTask;

/// Canonical identity of one chunk: (source URL, 0-based chunk index).
/// Serialized as a two-element JSON array.
pub type ChunkKey = (String, u32);

/// Durable record of which chunks have already been extracted and written.
/// Full-snapshot JSON file, rewritten after every settled batch; always a
/// subset of what the output sinks contain.
pub struct CheckpointStore {
    path: PathBuf,
}

impl CheckpointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Read the persisted set. An absent file means a fresh run; a
    /// malformed file is a fatal error, never silently dropped state.
    pub fn load(&self) -> Result<HashSet<ChunkKey>> {
        if !self.path.exists() {
            return Ok(HashSet::new());
        }
        let raw = fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read checkpoint {}", self.path.display()))?;
        let keys: Vec<ChunkKey> = serde_json::from_str(&raw)
            .with_context(|| format!("corrupt checkpoint {}", self.path.display()))?;
        Ok(keys.into_iter().collect())
    }

    /// Overwrite the snapshot atomically: write a sibling temp file, then
    /// rename over the old one, so a mid-write kill cannot leave a
    /// half-written checkpoint.
    pub fn save(&self, keys: &HashSet<ChunkKey>) -> Result<()> {
        let mut sorted: Vec<&ChunkKey> = keys.iter().collect();
        sorted.sort();
        let json = serde_json::to_string_pretty(&sorted)?;
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, json)
            .with_context(|| format!("failed to write checkpoint {}", tmp.display()))?;
        fs::rename(&tmp, &self.path)
            .with_context(|| format!("failed to replace checkpoint {}", self.path.display()))?;
        Ok(())
    }
}

/// Keep only tasks whose key is not yet checkpointed, preserving the
/// original enqueue order.
pub fn filter_pending(tasks: Vec<ChunkTask>, done: &HashSet<ChunkKey>) -> Vec<ChunkTask> {
    tasks.into_iter().filter(|t| !done.contains(&t.key())).collect()
}

// ── Tests ──
