use std::path::Path;

use anyhow::{bail, Context, Result};
use serde_json::Value;
use tracing::info;

/// One crawl target. The region label is kept for provenance only; it is
/// not part of task identity.
#[derive(Debug, Clone)]
pub struct LinkEntry {
    pub region: String,
    pub url: String,
}

/// Load a manifest mapping region label -> URL list and flatten it into a
/// single ordered work list. Enqueue order follows the manifest: regions
/// in file order, then URL order within a region.
pub fn load_manifest(path: &Path) -> Result<Vec<LinkEntry>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read link manifest {}", path.display()))?;
    let value: Value = serde_json::from_str(&raw)
        .with_context(|| format!("invalid link manifest {}", path.display()))?;
    let Value::Object(map) = value else {
        bail!(
            "link manifest {} is not a JSON object of region -> URL list",
            path.display()
        );
    };

    let mut entries = Vec::new();
    for (region, urls) in map {
        let Value::Array(urls) = urls else {
            bail!("region {:?} does not map to a URL list", region);
        };
        for url in urls {
            let Value::String(url) = url else {
                bail!("region {:?} contains a non-string URL", region);
            };
            entries.push(LinkEntry {
                region: region.clone(),
                url,
            });
        }
    }
    info!("loaded {} links from {}", entries.len(), path.display());
    Ok(entries)
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flattens_all_regions() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("links.json");
        std::fs::write(
            &path,
            r#"{"Germany": ["https://a", "https://b"], "India": ["https://c"]}"#,
        )
        .unwrap();
        let entries = load_manifest(&path).unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].region, "Germany");
        assert_eq!(entries[0].url, "https://a");
        assert_eq!(entries[2].region, "India");
    }

    #[test]
    fn manifest_order_is_preserved() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("links.json");
        // Regions deliberately out of alphabetical order: enqueue order
        // must follow the file, not a sorted map.
        std::fs::write(
            &path,
            r#"{"India": ["https://c"], "Germany": ["https://a", "https://b"]}"#,
        )
        .unwrap();
        let entries = load_manifest(&path).unwrap();
        let urls: Vec<&str> = entries.iter().map(|e| e.url.as_str()).collect();
        assert_eq!(urls, vec!["https://c", "https://a", "https://b"]);
        assert_eq!(entries[0].region, "India");
    }

    #[test]
    fn missing_manifest_is_an_error() {
        assert!(load_manifest(Path::new("/nonexistent/links.json")).is_err());
    }

    #[test]
    fn wrong_shape_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("links.json");
        std::fs::write(&path, r#"["https://a"]"#).unwrap();
        assert!(load_manifest(&path).is_err());
    }
}
