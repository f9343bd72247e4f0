use std::fs::{File, OpenOptions};
use std::io::Write as _;
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde_json::Value;

pub const CSV_HEADER: [&str; 4] = ["Source URL", "Category", "Insight", "Year"];

const AUDIT_SEPARATOR: &str =
    "--------------------------------------------------------------------------------";

/// One extracted fact, flattened for the CSV sink. Category and year may
/// be empty when the model did not supply them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsightRecord {
    pub source_url: String,
    pub category: String,
    pub insight: String,
    pub year: String,
}

/// Appends parsed insights to the CSV sink and raw model output to the
/// audit log. Sinks stay open for the run's lifetime; every record() call
/// flushes both before reporting ok, so checkpointed work is always on
/// disk. Single-writer: only the scheduler's merge phase calls record().
pub struct InsightWriter {
    csv: csv::Writer<File>,
    audit: File,
}

impl InsightWriter {
    /// `fresh` truncates both sinks and writes the CSV header. A resumed
    /// run (non-empty checkpoint) appends instead, so output the
    /// checkpoint already refers to survives.
    pub fn open(csv_path: &Path, audit_path: &Path, fresh: bool) -> Result<Self> {
        let mut opts = OpenOptions::new();
        opts.create(true).write(true);
        if fresh {
            opts.truncate(true);
        } else {
            opts.append(true);
        }

        let csv_file = opts
            .open(csv_path)
            .with_context(|| format!("failed to open insights CSV {}", csv_path.display()))?;
        // A resumed run normally appends below an existing header, but if
        // the sink went missing the recreated file still needs one.
        let needs_header = fresh || csv_file.metadata()?.len() == 0;
        let mut csv = csv::Writer::from_writer(csv_file);
        if needs_header {
            csv.write_record(CSV_HEADER)?;
            csv.flush()?;
        }

        let audit = opts
            .open(audit_path)
            .with_context(|| format!("failed to open audit log {}", audit_path.display()))?;

        Ok(Self { csv, audit })
    }

    /// Merge one chunk's raw model output into the sinks. The audit entry
    /// is written even when parsing fails, mirroring the log's
    /// replay-everything purpose; a parse error leaves the CSV untouched
    /// and the task un-checkpointed. Returns the number of rows written.
    pub fn record(&mut self, raw_output: &str, source_url: &str) -> Result<usize> {
        writeln!(
            self.audit,
            "\n[Source] {}\n{}\n{}",
            source_url, raw_output, AUDIT_SEPARATOR
        )?;
        self.audit.flush()?;

        let records = parse_insights(raw_output, source_url)?;
        for r in &records {
            self.csv
                .write_record([&r.source_url, &r.category, &r.insight, &r.year])?;
        }
        self.csv.flush()?;
        Ok(records.len())
    }
}

/// Parse model output as a map from category name to a sequence of
/// entries, where an entry is either an {insight, year} object (missing
/// fields default to empty) or a bare string (empty year). Any other
/// shape is a parse error, so the chunk stays eligible for retry.
pub fn parse_insights(raw: &str, source_url: &str) -> Result<Vec<InsightRecord>> {
    let value: Value =
        serde_json::from_str(strip_code_fence(raw)).context("model output is not valid JSON")?;
    let Value::Object(map) = value else {
        bail!("model output is not a JSON object of categories");
    };

    let mut records = Vec::new();
    for (category, entries) in map {
        let Value::Array(entries) = entries else {
            bail!("category {:?} does not map to a list", category);
        };
        for entry in entries {
            let (insight, year) = match entry {
                Value::String(s) => (s, String::new()),
                Value::Object(obj) => (str_field(&obj, "insight"), str_field(&obj, "year")),
                other => bail!("unsupported entry shape under {:?}: {}", category, other),
            };
            records.push(InsightRecord {
                source_url: source_url.to_string(),
                category: category.clone(),
                insight,
                year,
            });
        }
    }
    Ok(records)
}

fn str_field(obj: &serde_json::Map<String, Value>, key: &str) -> String {
    obj.get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

/// Models often wrap JSON in a Markdown code fence; unwrap it before
/// parsing.
fn strip_code_fence(raw: &str) -> &str {
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

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mixed_entry_shapes_are_tolerated() {
        let raw = r#"{"Category A": [{"insight": "X grew 5%", "year": "2023"}, "bare string"]}"#;
        let records = parse_insights(raw, "https://a").unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].insight, "X grew 5%");
        assert_eq!(records[0].year, "2023");
        assert_eq!(records[1].insight, "bare string");
        assert_eq!(records[1].year, "");
        assert!(records.iter().all(|r| r.category == "Category A"));
    }

    #[test]
    fn missing_fields_default_to_empty() {
        let raw = r#"{"Dealer Stock": [{"insight": "stock at 45 days"}, {"year": "FY22"}]}"#;
        let records = parse_insights(raw, "https://a").unwrap();
        assert_eq!(records[0].year, "");
        assert_eq!(records[1].insight, "");
    }

    #[test]
    fn wrong_top_level_shape_is_a_parse_error() {
        assert!(parse_insights("[1, 2]", "https://a").is_err());
        assert!(parse_insights("not json at all", "https://a").is_err());
        assert!(parse_insights(r#"{"Category": "not a list"}"#, "https://a").is_err());
        assert!(parse_insights(r#"{"Category": [42]}"#, "https://a").is_err());
    }

    #[test]
    fn empty_categories_yield_zero_rows() {
        let records = parse_insights(r#"{"Promotions Impact": []}"#, "https://a").unwrap();
        assert!(records.is_empty());
    }

    #[test]
    fn code_fenced_output_is_unwrapped() {
        let raw = "```json\n{\"Brand-wise Sales\": [\"BrandX sold 1M units\"]}\n```";
        let records = parse_insights(raw, "https://a").unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].insight, "BrandX sold 1M units");
    }

    #[test]
    fn record_appends_rows_and_audit_entry() {
        let dir = tempfile::tempdir().unwrap();
        let csv_path = dir.path().join("insights.csv");
        let audit_path = dir.path().join("insights.txt");

        let mut writer = InsightWriter::open(&csv_path, &audit_path, true).unwrap();
        let rows = writer
            .record(r#"{"Category A": ["first", "second"]}"#, "https://a")
            .unwrap();
        assert_eq!(rows, 2);
        drop(writer);

        let csv = std::fs::read_to_string(&csv_path).unwrap();
        let mut lines = csv.lines();
        assert_eq!(lines.next(), Some("Source URL,Category,Insight,Year"));
        assert_eq!(lines.next(), Some("https://a,Category A,first,"));
        assert_eq!(lines.next(), Some("https://a,Category A,second,"));

        let audit = std::fs::read_to_string(&audit_path).unwrap();
        assert!(audit.contains("[Source] https://a"));
        assert!(audit.contains(AUDIT_SEPARATOR));
    }

    #[test]
    fn parse_error_keeps_csv_untouched_but_audits_raw() {
        let dir = tempfile::tempdir().unwrap();
        let csv_path = dir.path().join("insights.csv");
        let audit_path = dir.path().join("insights.txt");

        let mut writer = InsightWriter::open(&csv_path, &audit_path, true).unwrap();
        assert!(writer.record("model rambled instead of JSON", "https://a").is_err());
        drop(writer);

        let csv = std::fs::read_to_string(&csv_path).unwrap();
        assert_eq!(csv.lines().count(), 1); // header only
        let audit = std::fs::read_to_string(&audit_path).unwrap();
        assert!(audit.contains("model rambled"));
    }

    #[test]
    fn resumed_run_recreates_missing_sink_with_header() {
        let dir = tempfile::tempdir().unwrap();
        let csv_path = dir.path().join("insights.csv");
        let audit_path = dir.path().join("insights.txt");

        // Checkpoint kept but sink deleted: the recreated CSV must still
        // start with a header.
        let mut writer = InsightWriter::open(&csv_path, &audit_path, false).unwrap();
        writer.record(r#"{"A": ["one"]}"#, "https://a").unwrap();
        drop(writer);

        let csv = std::fs::read_to_string(&csv_path).unwrap();
        let mut lines = csv.lines();
        assert_eq!(lines.next(), Some("Source URL,Category,Insight,Year"));
        assert_eq!(lines.next(), Some("https://a,A,one,"));
    }

    #[test]
    fn resumed_run_appends_without_second_header() {
        let dir = tempfile::tempdir().unwrap();
        let csv_path = dir.path().join("insights.csv");
        let audit_path = dir.path().join("insights.txt");

        let mut writer = InsightWriter::open(&csv_path, &audit_path, true).unwrap();
        writer.record(r#"{"A": ["one"]}"#, "https://a").unwrap();
        drop(writer);

        let mut writer = InsightWriter::open(&csv_path, &audit_path, false).unwrap();
        writer.record(r#"{"A": ["two"]}"#, "https://b").unwrap();
        drop(writer);

        let csv = std::fs::read_to_string(&csv_path).unwrap();
        let headers = csv.lines().filter(|l| l.starts_with("Source URL")).count();
        assert_eq!(headers, 1);
        assert_eq!(csv.lines().count(), 3);
    }
}
