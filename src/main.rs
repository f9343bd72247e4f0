mod checkpoint;
mod chunker;
mod crawler;
mod extract;
mod links;
mod llm;
mod prompt;
mod refine;
mod scheduler;
mod transforms;
mod writer;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::warn;

use crate::checkpoint::CheckpointStore;
use crate::extract::{Extractor, RetryPolicy, DEFAULT_TIMEOUT};
use crate::llm::{CompletionClient, OpenAiClient};
use crate::writer::InsightWriter;

#[derive(Parser)]
#[command(name = "fmcg_miner", about = "FMCG market-insight extraction pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Crawl the link manifest and extract insights (resumable)
    Run {
        /// Link manifest JSON (region label -> URLs)
        #[arg(long, default_value = "links.json")]
        links: PathBuf,
        /// Insights CSV sink
        #[arg(long, default_value = "insights_output.csv")]
        output: PathBuf,
        /// Raw model output audit log
        #[arg(long, default_value = "insights_output.txt")]
        audit: PathBuf,
        /// Checkpoint file for resumable runs
        #[arg(long, default_value = "checkpoint.json")]
        checkpoint: PathBuf,
        /// Chunk size in characters
        #[arg(long, default_value_t = 5000)]
        chunk_size: usize,
        /// Per-URL text cap in characters
        #[arg(long, default_value_t = 15000)]
        max_text: usize,
        /// Chunks extracted concurrently per batch
        #[arg(short = 'b', long, default_value_t = 5)]
        batch_size: usize,
        /// Max URLs to crawl (default: all)
        #[arg(short = 'n', long)]
        limit: Option<usize>,
        /// Model identifier
        #[arg(long, default_value = "gpt-4o-mini")]
        model: String,
    },
    /// Export one CSV per insight category
    Filter {
        /// Insights CSV produced by `run`
        #[arg(long, default_value = "insights_output.csv")]
        input: PathBuf,
        #[arg(long, default_value = "filtered_exports")]
        out_dir: PathBuf,
    },
    /// Structure filtered insights into brand/metric/value rows via the model
    Refine {
        #[arg(long, default_value = "filtered_exports")]
        in_dir: PathBuf,
        #[arg(long, default_value = "cleaned_category")]
        out_dir: PathBuf,
        /// Model identifier
        #[arg(long, default_value = "gpt-4o-mini")]
        model: String,
    },
    /// Apply manual cleaning rules to refined category CSVs in place
    Clean {
        #[arg(long, default_value = "cleaned_category")]
        dir: PathBuf,
    },
    /// Combine category CSVs and drop duplicate facts
    Combine {
        #[arg(long, default_value = "cleaned_category")]
        dir: PathBuf,
        #[arg(long, default_value = "combined_insights.csv")]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Run {
            links,
            output,
            audit,
            checkpoint,
            chunk_size,
            max_text,
            batch_size,
            limit,
            model,
        } => {
            let cfg = RunConfig {
                links,
                output,
                audit,
                checkpoint,
                chunk_size,
                max_text,
                batch_size,
                limit,
                model,
            };
            run_pipeline(&cfg).await
        }
        Commands::Filter { input, out_dir } => {
            for category in prompt::CATEGORIES {
                if let Err(e) = transforms::export_category(&input, category, &out_dir) {
                    warn!("export failed for {:?}: {:#}", category, e);
                }
            }
            Ok(())
        }
        Commands::Refine {
            in_dir,
            out_dir,
            model,
        } => {
            let client: Arc<dyn CompletionClient> = Arc::new(OpenAiClient::from_env(&model)?);
            refine::refine_dir(
                client,
                &in_dir,
                &out_dir,
                DEFAULT_TIMEOUT,
                RetryPolicy::default(),
            )
            .await
        }
        Commands::Clean { dir } => transforms::clean_dir(&dir),
        Commands::Combine { dir, output } => {
            let rows = transforms::combine_dedupe(&dir, &output)?;
            println!("Combined {} unique rows into {}", rows, output.display());
            Ok(())
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

struct RunConfig {
    links: PathBuf,
    output: PathBuf,
    audit: PathBuf,
    checkpoint: PathBuf,
    chunk_size: usize,
    max_text: usize,
    batch_size: usize,
    limit: Option<usize>,
    model: String,
}

async fn run_pipeline(cfg: &RunConfig) -> Result<()> {
    // Storage-integrity and configuration failures are fatal up front;
    // everything after this point degrades per URL or per chunk.
    let store = CheckpointStore::new(&cfg.checkpoint);
    let mut done = store.load()?;
    let client: Arc<dyn CompletionClient> = Arc::new(OpenAiClient::from_env(&cfg.model)?);

    let mut entries = links::load_manifest(&cfg.links)?;
    if let Some(n) = cfg.limit {
        entries.truncate(n);
    }
    if entries.is_empty() {
        println!("Link manifest is empty; nothing to do.");
        return Ok(());
    }

    // Phase 1: crawl and chunk. A crawl error costs that URL its chunks,
    // never the run.
    let http = crawler::http_client()?;
    let total_urls = entries.len();
    let mut all_tasks = Vec::new();
    let mut crawl_errors = 0usize;
    for (i, entry) in entries.iter().enumerate() {
        println!(
            "[{}/{}] Crawling: {} ({})",
            i + 1,
            total_urls,
            entry.url,
            entry.region
        );
        match crawler::fetch_page(&http, &entry.url).await {
            Ok(html) => {
                let text = crawler::pre_clean_html(&html);
                all_tasks.extend(chunker::build_tasks(
                    &entry.url,
                    &text,
                    cfg.chunk_size,
                    cfg.max_text,
                ));
            }
            Err(e) => {
                warn!("crawl failed for {}: {:#}", entry.url, e);
                crawl_errors += 1;
            }
        }
    }

    // Phase 2: resume filter.
    let total_chunks = all_tasks.len();
    let pending = checkpoint::filter_pending(all_tasks, &done);
    println!(
        "[RESUME] {} / {} chunks already processed.",
        total_chunks - pending.len(),
        total_chunks
    );

    // Phase 3: batched extraction. Sinks are truncated only on a fresh
    // run; a resume appends so output the checkpoint refers to survives.
    let fresh = done.is_empty();
    let mut writer = InsightWriter::open(&cfg.output, &cfg.audit, fresh)?;
    let extractor = Arc::new(Extractor::new(client, RetryPolicy::default(), DEFAULT_TIMEOUT));
    let stats = scheduler::run_batches(
        extractor,
        &mut writer,
        &store,
        &mut done,
        pending,
        cfg.batch_size,
    )
    .await?;

    println!(
        "Crawled {} URLs ({} errors).",
        total_urls - crawl_errors,
        crawl_errors
    );
    stats.print();
    Ok(())
}

fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
