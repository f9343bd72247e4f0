use std::fmt::Write as _;

/// The fixed FMCG performance topics the extraction prompt asks for.
pub const CATEGORIES: &[&str] = &[
    "Total Sales Performance",
    "Channel-wise Performance",
    "Promotions Impact",
    "Customer Retention",
    "Market Share & ASP",
    "Innovation & Features",
    "Demand & Inventory",
    "Cost Optimization",
    "Dealer Stock",
    "Brand-wise Sales",
];

/// Category-extraction prompt wrapped around one chunk of page text.
pub fn extraction_prompt(text: &str) -> String {
    let mut numbered = String::new();
    for (i, cat) in CATEGORIES.iter().enumerate() {
        let _ = writeln!(numbered, "{}. {}", i + 1, cat);
    }

    format!(
        r#"You are an expert in FMCG performance analysis. Below is the content from a webpage related to FMCG industry insights.

Your task is to extract only relevant insights based on the following performance categories:

{numbered}
For each category, return only the most relevant quantitative or qualitative insights (must include numerical values) along with the year or time period mentioned (e.g., 2022, FY23, Q3 2024, etc.).

Format your response in this exact JSON structure:

{{
  "Total Sales Performance": [
    {{"insight": "Total revenue grew by 12%", "year": "Q3 FY24"}}
  ],
  "Channel-wise Performance": [
    {{"insight": "E-commerce share rose to 28%", "year": "2023"}}
  ]
}}

Each list should only contain clear, actionable insights. Skip irrelevant or generic content (e.g., history, leadership quotes, etc.).

Now analyze and extract from the following content:
{text}"#
    )
}

/// Row-refinement prompt: turns one free-text insight into a structured
/// brand/metric/value fact.
pub fn refinement_prompt(source_url: &str, insight: &str, year: &str) -> String {
    format!(
        r#"You are an expert FMCG analyst. Given the following raw insight text:

Source URL: "{source_url}"
Insight: "{insight}"
Year: "{year}"

Extract and format the structured data in this exact JSON format:

{{
  "Brand": "The brand name mentioned (if any)",
  "Metric": "What is being measured (e.g., turnover, sales, growth, strictly cleaned)",
  "Value": "Mentioned value or milestone (strictly cleaned, must be numeric)",
  "Country": "Mentioned region or country, or 'India' if implied, else null",
  "Year": "{year} (strictly cleaned, e.g. 2023)"
}}

Return only valid JSON. No extra text or markdown."#
    )
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extraction_prompt_lists_every_category() {
        let p = extraction_prompt("chunk text here");
        for cat in CATEGORIES {
            assert!(p.contains(cat), "missing category {cat}");
        }
        assert!(p.ends_with("chunk text here"));
    }

    #[test]
    fn prompt_size_is_bounded_by_chunk_size() {
        let chunk = "z".repeat(5000);
        let p = extraction_prompt(&chunk);
        // Template overhead stays well under one chunk's worth of text.
        assert!(p.len() < 5000 + 2500);
    }

    #[test]
    fn refinement_prompt_embeds_row_fields() {
        let p = refinement_prompt("https://a", "Sales rose 5%", "FY23");
        assert!(p.contains("https://a"));
        assert!(p.contains("Sales rose 5%"));
        assert!(p.contains("FY23"));
    }
}
