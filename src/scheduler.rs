use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Result;
use indicatif::{ProgressBar, ProgressStyle};
use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::checkpoint::{CheckpointStore, ChunkKey};
use crate::chunker::ChunkTask;
use crate::extract::Extractor;
use crate::writer::InsightWriter;

/// Totals for one scheduling pass.
#[derive(Debug, Default)]
pub struct RunStats {
    pub processed: usize,
    pub rows: usize,
    pub failed: usize,
    pub parse_errors: usize,
}

impl RunStats {
    pub fn print(&self) {
        println!(
            "Processed {} chunks: {} rows written, {} extraction failures, {} parse errors.",
            self.processed, self.rows, self.failed, self.parse_errors
        );
    }
}

/// Drive pending chunks through the extractor in fixed-size batches.
///
/// Batch size is the concurrency bound: every extraction in a batch is
/// joined before any result is merged, and the checkpoint snapshot is
/// persisted only after the whole batch settles. A crash therefore
/// re-processes at most one batch's worth of chunks on the next run, and
/// the checkpoint never references output that is not already flushed.
pub async fn run_batches(
    extractor: Arc<Extractor>,
    writer: &mut InsightWriter,
    store: &CheckpointStore,
    done: &mut HashSet<ChunkKey>,
    pending: Vec<ChunkTask>,
    batch_size: usize,
) -> Result<RunStats> {
    let batch_size = batch_size.max(1);
    let mut stats = RunStats::default();
    let total_batches = pending.len().div_ceil(batch_size);

    let pb = ProgressBar::new(pending.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40} {pos}/{len} chunks ({eta})")?
            .progress_chars("=> "),
    );

    let mut tasks = pending.into_iter();
    let mut batch_no = 0usize;
    loop {
        let batch: Vec<ChunkTask> = tasks.by_ref().take(batch_size).collect();
        if batch.is_empty() {
            break;
        }
        batch_no += 1;
        info!(
            "processing batch {}/{} ({} chunks)",
            batch_no,
            total_batches,
            batch.len()
        );

        // Concurrent phase: every task in the batch is spawned and joined
        // before anything is merged.
        let mut join_set = JoinSet::new();
        for task in batch {
            let ex = Arc::clone(&extractor);
            join_set.spawn(async move { ex.extract(task).await });
        }
        let mut results = Vec::new();
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(result) => results.push(result),
                Err(e) => warn!("extraction task panicked: {}", e),
            }
        }

        // Merge phase: single writer, keyed by task identity, so
        // within-batch completion order does not matter.
        for result in results {
            stats.processed += 1;
            pb.inc(1);
            let task = result.task;
            match result.raw_output {
                Some(raw) => match writer.record(&raw, &task.source_url) {
                    Ok(rows) => {
                        stats.rows += rows;
                        done.insert(task.key());
                    }
                    Err(e) => {
                        stats.parse_errors += 1;
                        warn!(
                            "unparseable model output for {} chunk {}: {:#}",
                            task.source_url, task.chunk_index, e
                        );
                    }
                },
                None => stats.failed += 1,
            }
        }

        store.save(done)?;
    }

    pb.finish_and_clear();
    Ok(stats)
}

// ── Tests ──
