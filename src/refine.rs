use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::Value;
use tracing::warn;

use crate::extract::{complete_with_retry, RetryPolicy};
use crate::llm::CompletionClient;
use crate::prompt;
use crate::transforms::CLEAN_HEADER;

/// Structure every filtered category CSV in `in_dir` into brand/metric/
/// value tables under `out_dir`, one model call per row. Per-row failures
/// are logged and skipped; per-file failures skip the file.
pub async fn refine_dir(
    client: Arc<dyn CompletionClient>,
    in_dir: &Path,
    out_dir: &Path,
    timeout: Duration,
    policy: RetryPolicy,
) -> Result<()> {
    std::fs::create_dir_all(out_dir)
        .with_context(|| format!("failed to create {}", out_dir.display()))?;

    let mut paths: Vec<_> = std::fs::read_dir(in_dir)
        .with_context(|| format!("failed to read {}", in_dir.display()))?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| p.extension().is_some_and(|ext| ext == "csv"))
        .collect();
    paths.sort();

    for path in paths {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let out_path = out_dir.join(&file_name);
        println!("Refining {}...", file_name);
        if let Err(e) = refine_file(client.as_ref(), &path, &out_path, timeout, policy).await {
            warn!("skipping {}: {:#}", path.display(), e);
        }
    }
    Ok(())
}

async fn refine_file(
    client: &dyn CompletionClient,
    input: &Path,
    output: &Path,
    timeout: Duration,
    policy: RetryPolicy,
) -> Result<()> {
    let mut reader = csv::Reader::from_path(input)
        .with_context(|| format!("failed to open {}", input.display()))?;
    let headers = reader.headers()?.clone();
    let url_idx = column_index(&headers, "Source URL")?;
    let insight_idx = column_index(&headers, "Insight")?;
    let year_idx = column_index(&headers, "Year")?;

    let rows: Vec<csv::StringRecord> = reader.records().collect::<Result<_, _>>()?;
    let mut writer = csv::Writer::from_path(output)
        .with_context(|| format!("failed to create {}", output.display()))?;
    writer.write_record(CLEAN_HEADER)?;

    let pb = ProgressBar::new(rows.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40} {pos}/{len} rows")?
            .progress_chars("=> "),
    );

    let mut refined = 0usize;
    for row in &rows {
        pb.inc(1);
        let source_url = row.get(url_idx).unwrap_or("");
        let insight = row.get(insight_idx).unwrap_or("");
        let year = row.get(year_idx).unwrap_or("");
        if insight.trim().is_empty() {
            continue;
        }

        let prompt = prompt::refinement_prompt(source_url, insight, year);
        let snippet: String = insight.chars().take(40).collect();
        let context = format!("{} row {:?}", input.display(), snippet);
        let Some(raw) = complete_with_retry(client, &prompt, timeout, policy, &context).await
        else {
            continue;
        };
        match parse_refined(&raw) {
            Ok(fact) => {
                writer.write_record([
                    fact.country.as_str(),
                    fact.year.as_str(),
                    fact.brand.as_str(),
                    fact.metric.as_str(),
                    fact.value.as_str(),
                    source_url,
                ])?;
                refined += 1;
            }
            Err(e) => warn!("unusable refinement for {}: {:#}", context, e),
        }
    }
    writer.flush()?;
    pb.finish_and_clear();
    println!("  {} / {} rows refined.", refined, rows.len());
    Ok(())
}

#[derive(Debug, PartialEq, Eq)]
struct RefinedFact {
    brand: String,
    metric: String,
    value: String,
    country: String,
    year: String,
}

/// Parse a refinement response into a structured fact. `null` and missing
/// fields become empty strings; the downstream cleaner decides what to
/// drop.
fn parse_refined(raw: &str) -> Result<RefinedFact> {
    let value: Value = serde_json::from_str(strip_fence(raw))
        .context("refinement output is not valid JSON")?;
    let obj = value
        .as_object()
        .context("refinement output is not a JSON object")?;
    let field = |key: &str| -> String {
        match obj.get(key) {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            _ => String::new(),
        }
    };
    Ok(RefinedFact {
        brand: field("Brand"),
        metric: field("Metric"),
        value: field("Value"),
        country: field("Country"),
        year: field("Year"),
    })
}

fn strip_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    match rest.strip_suffix("```") {
        Some(inner) => inner.trim(),
        None => trimmed,
    }
}

fn column_index(headers: &csv::StringRecord, name: &str) -> Result<usize> {
    headers
        .iter()
        .position(|h| h == name)
        .with_context(|| format!("missing column {name:?}"))
}

// ── Tests ──
