use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use tracing::{info, warn};

/// Column order of the refined/cleaned category tables.
pub const CLEAN_HEADER: [&str; 6] = ["Country", "Year", "Brand", "Metric", "Value", "Source URL"];

/// Dedupe key for the final combine step.
const DEDUPE_COLUMNS: [&str; 5] = ["Country", "Year", "Brand", "Metric", "Value"];

fn column_index(headers: &csv::StringRecord, name: &str) -> Result<usize> {
    headers
        .iter()
        .position(|h| h == name)
        .with_context(|| format!("missing column {name:?}"))
}

/// List the CSV files directly under `dir`, sorted by name.
fn csv_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut paths: Vec<PathBuf> = fs::read_dir(dir)
        .with_context(|| format!("failed to read directory {}", dir.display()))?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| p.extension().is_some_and(|ext| ext == "csv"))
        .collect();
    paths.sort();
    Ok(paths)
}

/// Exact-match filter on the Category column: write matching rows of
/// `input` to `<out_dir>/<Category_With_Underscores>.csv`. Returns the
/// row count.
pub fn export_category(input: &Path, category: &str, out_dir: &Path) -> Result<usize> {
    fs::create_dir_all(out_dir)
        .with_context(|| format!("failed to create {}", out_dir.display()))?;
    let mut reader = csv::Reader::from_path(input)
        .with_context(|| format!("failed to open {}", input.display()))?;
    let headers = reader.headers()?.clone();
    let cat_idx = column_index(&headers, "Category")?;

    let out_path = out_dir.join(format!("{}.csv", category.replace(' ', "_")));
    let mut writer = csv::Writer::from_path(&out_path)
        .with_context(|| format!("failed to create {}", out_path.display()))?;
    writer.write_record(&headers)?;

    let mut matched = 0usize;
    for row in reader.records() {
        let row = row?;
        if row.get(cat_idx) == Some(category) {
            writer.write_record(&row)?;
            matched += 1;
        }
    }
    writer.flush()?;
    info!("exported {} rows to {}", matched, out_path.display());
    Ok(matched)
}

/// Manual cleaning rules, applied in place: default an empty Country to
/// "India", drop rows with an empty Brand, drop rows whose Value is not
/// numeric. Returns (kept, dropped).
pub fn clean_rows(path: &Path) -> Result<(usize, usize)> {
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    let headers = reader.headers()?.clone();
    let brand_idx = column_index(&headers, "Brand")?;
    let value_idx = column_index(&headers, "Value")?;
    let country_idx = column_index(&headers, "Country")?;

    let mut kept: Vec<Vec<String>> = Vec::new();
    let mut dropped = 0usize;
    for row in reader.records() {
        let row = row?;
        let brand = row.get(brand_idx).unwrap_or("").trim();
        let value = row.get(value_idx).unwrap_or("").trim();
        if brand.is_empty() || value.parse::<f64>().is_err() {
            dropped += 1;
            continue;
        }
        let mut fields: Vec<String> = row.iter().map(str::to_string).collect();
        if fields[country_idx].trim().is_empty() {
            fields[country_idx] = "India".to_string();
        }
        kept.push(fields);
    }

    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("failed to rewrite {}", path.display()))?;
    writer.write_record(&headers)?;
    for row in &kept {
        writer.write_record(row)?;
    }
    writer.flush()?;
    info!("cleaned {}: kept {}, dropped {}", path.display(), kept.len(), dropped);
    Ok((kept.len(), dropped))
}

/// Clean every CSV in a directory; a file missing a required column is
/// reported and skipped, never fatal to the pass.
pub fn clean_dir(dir: &Path) -> Result<()> {
    for path in csv_files(dir)? {
        if let Err(e) = clean_rows(&path) {
            warn!("skipping {}: {:#}", path.display(), e);
        }
    }
    Ok(())
}

/// Concatenate every CSV in `dir` (except `output` itself) and drop
/// duplicate rows by (Country, Year, Brand, Metric, Value), keeping the
/// first occurrence. Column order of the first readable file defines the
/// output; later files are projected onto it by column name. Returns the
/// number of rows written.
pub fn combine_dedupe(dir: &Path, output: &Path) -> Result<usize> {
    let mut writer: Option<csv::Writer<fs::File>> = None;
    let mut out_headers: Vec<String> = Vec::new();
    let mut seen: HashSet<Vec<String>> = HashSet::new();
    let mut written = 0usize;

    for path in csv_files(dir)? {
        if path == output {
            continue;
        }
        let mut reader = match csv::Reader::from_path(&path) {
            Ok(r) => r,
            Err(e) => {
                warn!("skipping unreadable {}: {}", path.display(), e);
                continue;
            }
        };
        let headers = match reader.headers() {
            Ok(h) => h.clone(),
            Err(e) => {
                warn!("skipping {}: bad header: {}", path.display(), e);
                continue;
            }
        };
        let key_idx: Result<Vec<usize>> = DEDUPE_COLUMNS
            .iter()
            .map(|c| column_index(&headers, c))
            .collect();
        let key_idx = match key_idx {
            Ok(idx) => idx,
            Err(e) => {
                warn!("skipping {}: {:#}", path.display(), e);
                continue;
            }
        };

        if writer.is_none() {
            out_headers = headers.iter().map(str::to_string).collect();
            let mut w = csv::Writer::from_path(output)
                .with_context(|| format!("failed to create {}", output.display()))?;
            w.write_record(&out_headers)?;
            writer = Some(w);
        }
        let Some(w) = writer.as_mut() else { continue };
        let col_map: Vec<Option<usize>> = out_headers
            .iter()
            .map(|c| headers.iter().position(|h| h == c))
            .collect();

        for row in reader.records() {
            let row = match row {
                Ok(r) => r,
                Err(e) => {
                    warn!("bad row in {}: {}", path.display(), e);
                    continue;
                }
            };
            let key: Vec<String> = key_idx
                .iter()
                .map(|&i| row.get(i).unwrap_or("").to_string())
                .collect();
            if !seen.insert(key) {
                continue;
            }
            let projected: Vec<&str> = col_map
                .iter()
                .map(|idx| idx.and_then(|i| row.get(i)).unwrap_or(""))
                .collect();
            w.write_record(&projected)?;
            written += 1;
        }
    }

    match writer {
        Some(mut w) => w.flush()?,
        None => bail!("no usable CSV files in {}", dir.display()),
    }
    info!("combined {} unique rows into {}", written, output.display());
    Ok(written)
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;

    fn write_csv(path: &Path, content: &str) {
        fs::write(path, content).unwrap();
    }

    #[test]
    fn export_filters_by_exact_category() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("insights.csv");
        write_csv(
            &input,
            "Source URL,Category,Insight,Year\n\
             https://a,Dealer Stock,stock fell 3%,2023\n\
             https://a,Dealer Stocking,unrelated,2023\n\
             https://b,Dealer Stock,stock rose 8%,FY24\n",
        );
        let out_dir = dir.path().join("filtered");
        let n = export_category(&input, "Dealer Stock", &out_dir).unwrap();
        assert_eq!(n, 2);
        let out = fs::read_to_string(out_dir.join("Dealer_Stock.csv")).unwrap();
        assert_eq!(out.lines().count(), 3);
        assert!(!out.contains("unrelated"));
    }

    #[test]
    fn clean_applies_manual_rules() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cat.csv");
        write_csv(
            &path,
            "Country,Year,Brand,Metric,Value,Source URL\n\
             ,2023,BrandX,Revenue,100,https://a\n\
             Germany,2023,,Revenue,200,https://a\n\
             India,2023,BrandY,Growth,twelve,https://a\n\
             USA,FY24,BrandZ,Sales,35.5,https://b\n",
        );
        let (kept, dropped) = clean_rows(&path).unwrap();
        assert_eq!((kept, dropped), (2, 2));
        let out = fs::read_to_string(&path).unwrap();
        // Empty country defaulted to India; empty brand and non-numeric
        // value rows dropped.
        assert!(out.contains("India,2023,BrandX,Revenue,100"));
        assert!(out.contains("USA,FY24,BrandZ,Sales,35.5"));
        assert!(!out.contains("Germany"));
        assert!(!out.contains("twelve"));
    }

    #[test]
    fn clean_missing_column_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cat.csv");
        write_csv(&path, "Country,Year,Metric\nIndia,2023,Revenue\n");
        assert!(clean_rows(&path).is_err());
        // clean_dir reports and continues instead of failing the pass.
        clean_dir(dir.path()).unwrap();
    }

    #[test]
    fn combine_drops_duplicate_facts() {
        let dir = tempfile::tempdir().unwrap();
        write_csv(
            &dir.path().join("a.csv"),
            "Country,Year,Brand,Metric,Value,Source URL\n\
             India,2023,BrandX,Revenue,100,https://a\n\
             India,2023,BrandX,Revenue,120,https://a\n",
        );
        write_csv(
            &dir.path().join("b.csv"),
            "Country,Year,Brand,Metric,Value,Source URL\n\
             India,2023,BrandX,Revenue,100,https://other\n\
             Germany,2022,BrandY,Sales,50,https://b\n",
        );
        let output = dir.path().join("combined.csv");
        let n = combine_dedupe(dir.path(), &output).unwrap();
        assert_eq!(n, 3);
        let out = fs::read_to_string(&output).unwrap();
        // Duplicate (India,2023,BrandX,Revenue,100) kept once, first
        // occurrence wins (source https://a from the first file).
        assert_eq!(out.matches("Revenue,100").count(), 1);
        assert!(out.contains("https://a"));
    }

    #[test]
    fn combine_skips_files_missing_key_columns() {
        let dir = tempfile::tempdir().unwrap();
        write_csv(
            &dir.path().join("good.csv"),
            "Country,Year,Brand,Metric,Value,Source URL\nIndia,2023,BrandX,Revenue,100,https://a\n",
        );
        write_csv(&dir.path().join("bad.csv"), "Only,Two\n1,2\n");
        let output = dir.path().join("combined.csv");
        assert_eq!(combine_dedupe(dir.path(), &output).unwrap(), 1);
    }

    #[test]
    fn combine_with_no_usable_files_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(combine_dedupe(dir.path(), &dir.path().join("out.csv")).is_err());
    }
}
