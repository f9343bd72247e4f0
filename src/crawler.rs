use std::sync::LazyLock;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use regex::Regex;

const USER_AGENT: &str = "fmcg-miner/0.1 (+market research batch crawler)";
const FETCH_TIMEOUT: Duration = Duration::from_secs(60);

// Boilerplate containers dropped wholesale before tag stripping.
const DROP_TAGS: &[&str] = &["script", "style", "nav", "footer", "aside"];

static DROP_BLOCK_RES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    DROP_TAGS
        .iter()
        .map(|t| Regex::new(&format!(r"(?is)<{t}\b[^>]*>.*?</{t}\s*>")).unwrap())
        .collect()
});
static COMMENT_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<!--.*?-->").unwrap());
static BREAK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)</(?:p|div|li|ul|ol|tr|table|h[1-6]|section|article)>|<br\s*/?>").unwrap());
static ANY_TAG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<[^>]+>").unwrap());
static SPACES_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[ \t]{2,}").unwrap());

pub fn http_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .timeout(FETCH_TIMEOUT)
        .build()
        .context("failed to build HTTP client")
}

/// Fetch one page's raw markup. Failures here are per-URL: the caller
/// logs and moves on to the next URL.
pub async fn fetch_page(client: &reqwest::Client, url: &str) -> Result<String> {
    let resp = client
        .get(url)
        .send()
        .await
        .with_context(|| format!("request failed for {url}"))?;
    if !resp.status().is_success() {
        bail!("{} returned {}", url, resp.status());
    }
    resp.text()
        .await
        .with_context(|| format!("failed to read body for {url}"))
}

/// Pure HTML-to-text filter: drop boilerplate blocks and comments, turn
/// block-level closers into line breaks, strip remaining tags, decode the
/// common entities, and keep trimmed non-blank lines.
pub fn pre_clean_html(raw: &str) -> String {
    let mut text = raw.to_string();
    for re in DROP_BLOCK_RES.iter() {
        text = re.replace_all(&text, " ").into_owned();
    }
    let text = COMMENT_RE.replace_all(&text, " ");
    let text = BREAK_RE.replace_all(&text, "\n");
    let text = ANY_TAG_RE.replace_all(&text, " ");
    let text = decode_entities(&text);
    let text = SPACES_RE.replace_all(&text, " ");

    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn decode_entities(text: &str) -> String {
    text.replace("&nbsp;", " ")
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drops_boilerplate_blocks() {
        let html = "<html><nav>menu items</nav><body>\
                    <script>var x = 1;</script>\
                    <p>Revenue grew 12% in FY24.</p>\
                    <style>.a { color: red }</style>\
                    <footer>contact us</footer></body></html>";
        let text = pre_clean_html(html);
        assert_eq!(text, "Revenue grew 12% in FY24.");
    }

    #[test]
    fn block_closers_become_line_breaks() {
        let html = "<div>First insight</div><div>Second insight</div>";
        let text = pre_clean_html(html);
        assert_eq!(text, "First insight\nSecond insight");
    }

    #[test]
    fn entities_are_decoded() {
        let html = "<p>M&amp;A activity rose &gt; 5%&nbsp;in 2023</p>";
        let text = pre_clean_html(html);
        assert_eq!(text, "M&A activity rose > 5% in 2023");
    }

    #[test]
    fn comments_and_attrs_are_stripped() {
        let html = "<!-- tracking --><a href=\"https://x\">link text</a>";
        assert_eq!(pre_clean_html(html), "link text");
    }

    #[test]
    fn plain_text_passes_through() {
        assert_eq!(pre_clean_html("  already clean \n\n line two "), "already clean\nline two");
    }
}
