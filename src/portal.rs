//! Web fallback: live passages from the external curriculum portal.
//!
//! [`WebScraper`] walks a fixed, ordered list of portal resources and pulls
//! out text relevant to the query. HTML pages are searched in priority
//! order (table rows, then links, then content blocks); PDFs are reduced to
//! an excerpt window around the first match.
//!
//! Scanning stops as soon as the gathered text exceeds `max_chars`, and
//! returns `None` if the whole scan produced less than `min_chars`. A failing
//! resource (timeout, HTTP error, unparsable body) is logged and skipped.
//! Resources are fetched one at a time in configured order, so the early
//! exit is deterministic.

use ::scraper::{ElementRef, Html, Selector};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::RegexBuilder;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE};
use reqwest::Url;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::code::{find_code_span, mentions_code};
use crate::config::{ResourceKind, ScraperConfig};
use crate::models::{MatchKind, PassageFragment, ScrapedPassage};

#[derive(Debug, thiserror::Error)]
pub enum ScrapeError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("HTTP {status} from {url}")]
    Status { status: u16, url: String },
    #[error("PDF extraction failed: {0}")]
    Pdf(String),
    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

/// Raw body of a fetched resource.
#[derive(Debug, Clone)]
pub struct FetchedResource {
    pub bytes: Vec<u8>,
    /// URL after redirects; relative links resolve against it.
    pub final_url: Url,
}

/// Retrieves portal resources. [`HttpFetcher`] is the production implementation.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &Url) -> Result<FetchedResource, ScrapeError>;
}

/// `reqwest` fetcher presenting a browser-like identity to the portal.
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(user_agent: &str, timeout: Duration) -> anyhow::Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static(
                "text/html,application/xhtml+xml,application/xml;q=0.9,application/pdf,*/*;q=0.8",
            ),
        );
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));

        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .default_headers(headers)
            .timeout(timeout)
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &Url) -> Result<FetchedResource, ScrapeError> {
        let response = self.client.get(url.clone()).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ScrapeError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }
        let final_url = response.url().clone();
        let bytes = response.bytes().await?.to_vec();
        Ok(FetchedResource { bytes, final_url })
    }
}

#[derive(Debug, Clone)]
struct Resource {
    name: String,
    url: Url,
    kind: ResourceKind,
}

/// What one resource contributed to the passage.
struct Extracted {
    title: Option<String>,
    fragments: Vec<PassageFragment>,
}

pub struct WebScraper {
    fetcher: Arc<dyn Fetcher>,
    resources: Vec<Resource>,
    authority: String,
    timeout: Duration,
    max_chars: usize,
    min_chars: usize,
    pdf_before: usize,
    pdf_after: usize,
}

impl WebScraper {
    pub fn from_config(config: &ScraperConfig, fetcher: Arc<dyn Fetcher>) -> anyhow::Result<Self> {
        let resources = config
            .resources
            .iter()
            .map(|r| {
                Ok(Resource {
                    name: r.name.clone(),
                    url: Url::parse(&r.url)?,
                    kind: r.kind,
                })
            })
            .collect::<anyhow::Result<Vec<_>>>()?;

        Ok(Self {
            fetcher,
            resources,
            authority: config.authority.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
            max_chars: config.max_chars,
            min_chars: config.min_chars,
            pdf_before: config.pdf_window_before,
            pdf_after: config.pdf_window_after,
        })
    }

    /// Build a scraper that fetches over HTTP.
    pub fn http(config: &ScraperConfig) -> anyhow::Result<Self> {
        let fetcher = HttpFetcher::new(
            &config.user_agent,
            Duration::from_secs(config.timeout_secs),
        )?;
        Self::from_config(config, Arc::new(fetcher))
    }

    pub fn has_resources(&self) -> bool {
        !self.resources.is_empty()
    }

    /// Scan the portal for `query` (or for `code`, when one was detected).
    pub async fn scrape(&self, query: &str, code: Option<&str>) -> Option<ScrapedPassage> {
        self.scrape_until(query, code, None).await
    }

    /// Like [`scrape`](Self::scrape), but stop fetching at `deadline` and
    /// build the passage from whatever was gathered before it.
    pub async fn scrape_until(
        &self,
        query: &str,
        code: Option<&str>,
        deadline: Option<Instant>,
    ) -> Option<ScrapedPassage> {
        let needle = code.unwrap_or(query).trim();
        if needle.is_empty() {
            return None;
        }

        let mut fragments: Vec<PassageFragment> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();
        let mut total_chars = 0usize;
        let mut source: Option<(String, String)> = None;

        for resource in &self.resources {
            let limit = match deadline {
                Some(deadline) => {
                    let left = deadline.saturating_duration_since(Instant::now());
                    if left.is_zero() {
                        warn!(resource = %resource.name, "grounding budget spent; ending portal scan");
                        break;
                    }
                    left.min(self.timeout)
                }
                None => self.timeout,
            };
            let extracted =
                match tokio::time::timeout(limit, self.scan_resource(resource, needle, code)).await
                {
                    Ok(Ok(extracted)) => extracted,
                    Ok(Err(e)) => {
                        warn!(resource = %resource.name, error = %e, "portal resource failed; skipping");
                        continue;
                    }
                    Err(_) => {
                        warn!(
                            resource = %resource.name,
                            error = %ScrapeError::Timeout(limit),
                            "portal resource failed; skipping"
                        );
                        continue;
                    }
                };

            let before = fragments.len();
            for fragment in extracted.fragments {
                if !seen.insert(fragment.text.to_lowercase()) {
                    continue;
                }
                total_chars += fragment.text.chars().count();
                fragments.push(fragment);
            }

            if fragments.len() > before && source.is_none() {
                let title = extracted.title.unwrap_or_else(|| resource.name.clone());
                source = Some((resource.url.to_string(), title));
            }

            debug!(
                resource = %resource.name,
                fragments = fragments.len() - before,
                total_chars,
                "scanned portal resource"
            );

            if total_chars > self.max_chars {
                debug!(total_chars, "portal scan reached max_chars; stopping early");
                break;
            }
        }

        if total_chars < self.min_chars {
            debug!(total_chars, "portal scan found too little text");
            return None;
        }
        let (source_url, title) = source?;

        let text = fragments
            .iter()
            .map(|f| f.text.as_str())
            .collect::<Vec<_>>()
            .join("\n");

        Some(ScrapedPassage {
            authority: self.authority.clone(),
            source_url,
            title,
            text,
            fragments,
        })
    }

    async fn scan_resource(
        &self,
        resource: &Resource,
        needle: &str,
        code: Option<&str>,
    ) -> Result<Extracted, ScrapeError> {
        let fetched = self.fetcher.fetch(&resource.url).await?;
        match resource.kind {
            ResourceKind::Html => {
                let body = String::from_utf8_lossy(&fetched.bytes);
                Ok(extract_html(&body, &fetched.final_url, needle, code))
            }
            ResourceKind::Pdf => {
                let bytes = fetched.bytes;
                let text = tokio::task::spawn_blocking(move || {
                    pdf_extract::extract_text_from_mem(&bytes)
                })
                .await
                .map_err(|e| ScrapeError::Pdf(e.to_string()))?
                .map_err(|e| ScrapeError::Pdf(e.to_string()))?;

                let fragments = pdf_excerpt(&text, needle, code, self.pdf_before, self.pdf_after)
                    .map(|excerpt| PassageFragment {
                        kind: MatchKind::PdfExcerpt,
                        text: excerpt,
                        url: fetched.final_url.to_string(),
                    })
                    .into_iter()
                    .collect();
                Ok(Extracted {
                    title: None,
                    fragments,
                })
            }
        }
    }
}

// ============ HTML ============

fn selector(css: &str) -> Selector {
    Selector::parse(css).expect("static CSS selector")
}

static TITLE: Lazy<Selector> = Lazy::new(|| selector("title"));
static ROWS: Lazy<Selector> = Lazy::new(|| selector("tr"));
static CELLS: Lazy<Selector> = Lazy::new(|| selector("th, td"));
static LINKS: Lazy<Selector> = Lazy::new(|| selector("a[href]"));
static BLOCKS: Lazy<Selector> = Lazy::new(|| selector("p, li, h1, h2, h3, h4, h5, h6"));

const NON_CONTENT_TAGS: &[&str] = &[
    "script", "style", "noscript", "nav", "header", "footer", "aside", "iframe", "form", "svg",
];
const NON_CONTENT_MARKERS: &[&str] = &["advert", "banner", "cookie", "promo", "sponsor"];

/// Whether the element or any ancestor is navigation, styling, or advertising.
fn is_non_content(el: ElementRef<'_>) -> bool {
    std::iter::once(el)
        .chain(el.ancestors().filter_map(ElementRef::wrap))
        .any(|node| {
            let element = node.value();
            if NON_CONTENT_TAGS.contains(&element.name()) {
                return true;
            }
            let marks_ad = |value: &str| {
                value.split(|c: char| c.is_whitespace() || c == '-' || c == '_').any(|token| {
                    let token = token.to_ascii_lowercase();
                    token == "ad"
                        || token == "ads"
                        || NON_CONTENT_MARKERS.iter().any(|m| token.contains(m))
                })
            };
            element.attr("class").is_some_and(marks_ad) || element.attr("id").is_some_and(marks_ad)
        })
}

fn element_text(el: ElementRef<'_>) -> String {
    collapse_whitespace(&el.text().collect::<Vec<_>>().join(" "))
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Case-insensitive containment, also accepting any surface form of `code`.
fn is_relevant(text: &str, needle: &str, code: Option<&str>) -> bool {
    if text.to_lowercase().contains(&needle.to_lowercase()) {
        return true;
    }
    code.is_some_and(|c| mentions_code(text, c))
}

/// Links worth following: not fragments, scripts, or mail addresses.
fn resolve_href(base: &Url, href: &str) -> Option<Url> {
    let href = href.trim();
    if href.is_empty()
        || href.starts_with('#')
        || href.starts_with("javascript:")
        || href.starts_with("mailto:")
    {
        return None;
    }
    let url = base.join(href).ok()?;
    matches!(url.scheme(), "http" | "https").then_some(url)
}

fn extract_html(body: &str, page_url: &Url, needle: &str, code: Option<&str>) -> Extracted {
    let document = Html::parse_document(body);
    let title = document
        .select(&TITLE)
        .next()
        .map(element_text)
        .filter(|t| !t.is_empty());

    let mut fragments = Vec::new();
    let page = page_url.to_string();

    for row in document.select(&ROWS) {
        if is_non_content(row) {
            continue;
        }
        let cells: Vec<String> = row
            .select(&CELLS)
            .map(element_text)
            .filter(|c| !c.is_empty())
            .collect();
        let text = cells.join(" | ");
        if !text.is_empty() && is_relevant(&text, needle, code) {
            fragments.push(PassageFragment {
                kind: MatchKind::TableRow,
                text,
                url: page.clone(),
            });
        }
    }

    for link in document.select(&LINKS) {
        if is_non_content(link) {
            continue;
        }
        let text = element_text(link);
        if text.is_empty() || !is_relevant(&text, needle, code) {
            continue;
        }
        let Some(target) = link.value().attr("href").and_then(|h| resolve_href(page_url, h))
        else {
            continue;
        };
        fragments.push(PassageFragment {
            kind: MatchKind::Link,
            text: format!("{} ({})", text, target),
            url: target.to_string(),
        });
    }

    for block in document.select(&BLOCKS) {
        if is_non_content(block) {
            continue;
        }
        let text = element_text(block);
        if !text.is_empty() && is_relevant(&text, needle, code) {
            fragments.push(PassageFragment {
                kind: MatchKind::Block,
                text,
                url: page.clone(),
            });
        }
    }

    Extracted { title, fragments }
}

// ============ PDF ============

/// Byte offset `n` chars before `from`, clamped to the start.
fn back_chars(text: &str, from: usize, n: usize) -> usize {
    text[..from]
        .char_indices()
        .rev()
        .nth(n.saturating_sub(1))
        .map(|(i, _)| i)
        .unwrap_or(0)
        .min(from)
}

/// Byte offset `n` chars after `from`, clamped to the end.
fn forward_chars(text: &str, from: usize, n: usize) -> usize {
    text[from..]
        .char_indices()
        .nth(n)
        .map(|(i, _)| from + i)
        .unwrap_or(text.len())
}

/// Excerpt around the first case-insensitive occurrence of `needle`.
///
/// Takes `before` chars ahead of the match and `after` chars from the match
/// start onward, since an identifier is usually followed by its definition.
pub fn pdf_excerpt(
    text: &str,
    needle: &str,
    code: Option<&str>,
    before: usize,
    after: usize,
) -> Option<String> {
    let needle = needle.trim();
    if needle.is_empty() {
        return None;
    }
    let literal = RegexBuilder::new(&regex::escape(needle))
        .case_insensitive(true)
        .build()
        .ok()?;
    let start = literal
        .find(text)
        .map(|m| m.start())
        .or_else(|| code.and_then(|c| find_code_span(text, c)).map(|(s, _)| s))?;

    let lo = if before == 0 { start } else { back_chars(text, start, before) };
    let hi = forward_chars(text, start, after);
    let excerpt = collapse_whitespace(&text[lo..hi]);
    (!excerpt.is_empty()).then_some(excerpt)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PortalResource;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct MapFetcher {
        pages: HashMap<String, Result<Vec<u8>, u16>>,
        calls: AtomicUsize,
        order: std::sync::Mutex<Vec<String>>,
    }

    impl MapFetcher {
        fn new(pages: Vec<(&str, Result<&str, u16>)>) -> Self {
            Self {
                pages: pages
                    .into_iter()
                    .map(|(u, b)| (u.to_string(), b.map(|s| s.as_bytes().to_vec())))
                    .collect(),
                calls: AtomicUsize::new(0),
                order: std::sync::Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Fetcher for MapFetcher {
        async fn fetch(&self, url: &Url) -> Result<FetchedResource, ScrapeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.order.lock().unwrap().push(url.to_string());
            match self.pages.get(url.as_str()) {
                Some(Ok(bytes)) => Ok(FetchedResource {
                    bytes: bytes.clone(),
                    final_url: url.clone(),
                }),
                Some(Err(status)) => Err(ScrapeError::Status {
                    status: *status,
                    url: url.to_string(),
                }),
                None => Err(ScrapeError::Status {
                    status: 404,
                    url: url.to_string(),
                }),
            }
        }
    }

    fn config(urls: &[&str], max_chars: usize, min_chars: usize) -> ScraperConfig {
        ScraperConfig {
            max_chars,
            min_chars,
            authority: "Board".to_string(),
            resources: urls
                .iter()
                .enumerate()
                .map(|(i, u)| PortalResource {
                    name: format!("r{}", i),
                    url: u.to_string(),
                    kind: ResourceKind::Html,
                })
                .collect(),
            ..ScraperConfig::default()
        }
    }

    const PAGE: &str = r#"
<html><head><title>Science SLOs</title><style>.S8A5 { color: red }</style></head>
<body>
  <nav><a href="/s8a5">S8A5 in the menu</a></nav>
  <div class="ad-slot"><p>Buy S8A5 workbooks now</p></div>
  <table>
    <tr><th>Code</th><th>Objective</th></tr>
    <tr><td>S-08-A-05</td><td>Describe density as mass per unit volume.</td></tr>
    <tr><td>S8A6</td><td>Explain pressure.</td></tr>
  </table>
  <p>See <a href="docs/s8a5.pdf">S8A5 lesson guide</a> for worked examples.</p>
  <ul><li>S8A5 is assessed in term two.</li></ul>
  <script>var code = "S8A5";</script>
</body></html>
"#;

    #[test]
    fn test_html_priority_and_tags() {
        let url = Url::parse("https://portal.example.org/science/slo.html").unwrap();
        let extracted = extract_html(PAGE, &url, "S8A5", Some("S8A5"));
        let kinds: Vec<MatchKind> = extracted.fragments.iter().map(|f| f.kind).collect();
        assert_eq!(
            kinds,
            vec![MatchKind::TableRow, MatchKind::Link, MatchKind::Block, MatchKind::Block]
        );
        assert!(extracted.fragments[0].text.contains("Describe density"));
        assert_eq!(
            extracted.fragments[1].url,
            "https://portal.example.org/science/docs/s8a5.pdf"
        );
        assert_eq!(extracted.title.as_deref(), Some("Science SLOs"));
    }

    #[test]
    fn test_html_skips_nav_ads_and_scripts() {
        let url = Url::parse("https://portal.example.org/").unwrap();
        let extracted = extract_html(PAGE, &url, "S8A5", Some("S8A5"));
        for f in &extracted.fragments {
            assert!(!f.text.contains("menu"), "nav leaked: {}", f.text);
            assert!(!f.text.contains("workbooks"), "ad leaked: {}", f.text);
            assert!(!f.text.contains("var code"), "script leaked: {}", f.text);
        }
    }

    #[test]
    fn test_html_plain_query_is_case_insensitive() {
        let url = Url::parse("https://portal.example.org/").unwrap();
        let extracted = extract_html(PAGE, &url, "MASS PER UNIT", None);
        assert_eq!(extracted.fragments.len(), 1);
        assert_eq!(extracted.fragments[0].kind, MatchKind::TableRow);
    }

    #[test]
    fn test_pdf_excerpt_window_is_asymmetric() {
        let text = format!("{}S8A5 {}", "a".repeat(500), "b".repeat(3000));
        let excerpt = pdf_excerpt(&text, "s8a5", None, 300, 1500).unwrap();
        let before = excerpt.find("S8A5").unwrap();
        assert_eq!(before, 300);
        assert!(excerpt.len() - before > before);
        assert!(excerpt.chars().count() <= 1801);
    }

    #[test]
    fn test_pdf_excerpt_finds_hyphenated_code() {
        let text = "Strand A\nS-08-A-05 Describe density.";
        let excerpt = pdf_excerpt(text, "S8A5", Some("S8A5"), 5, 100).unwrap();
        assert!(excerpt.contains("S-08-A-05 Describe density."));
    }

    #[test]
    fn test_pdf_excerpt_handles_multibyte_text() {
        let text = "ééééé density ééééé";
        let excerpt = pdf_excerpt(text, "DENSITY", None, 3, 10).unwrap();
        assert!(excerpt.starts_with("éé density"));
        assert_eq!(pdf_excerpt(text, "pressure", None, 3, 10), None);
    }

    #[tokio::test]
    async fn test_early_exit_skips_later_resources() {
        let long_row = format!("<table><tr><td>S8A5</td><td>{}</td></tr></table>", "x ".repeat(200));
        let fetcher = Arc::new(MapFetcher::new(vec![
            ("https://p.example.org/one", Ok(long_row.as_str())),
            ("https://p.example.org/two", Ok(PAGE)),
        ]));
        let scraper = WebScraper::from_config(
            &config(&["https://p.example.org/one", "https://p.example.org/two"], 100, 10),
            fetcher.clone(),
        )
        .unwrap();

        let passage = scraper.scrape("Explain S8A5", Some("S8A5")).await.unwrap();
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
        assert_eq!(passage.source_url, "https://p.example.org/one");
        assert_eq!(passage.authority, "Board");
    }

    #[tokio::test]
    async fn test_failed_resource_does_not_abort_scan() {
        let fetcher = Arc::new(MapFetcher::new(vec![
            ("https://p.example.org/down", Err(503)),
            ("https://p.example.org/slo", Ok(PAGE)),
        ]));
        let scraper = WebScraper::from_config(
            &config(&["https://p.example.org/down", "https://p.example.org/slo"], 4000, 20),
            fetcher.clone(),
        )
        .unwrap();

        let passage = scraper.scrape("S8A5", Some("S8A5")).await.unwrap();
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 2);
        assert_eq!(passage.source_url, "https://p.example.org/slo");
        assert_eq!(passage.title, "Science SLOs");
        assert!(passage.text.contains("Describe density"));
    }

    #[tokio::test]
    async fn test_too_little_text_is_none() {
        let fetcher = Arc::new(MapFetcher::new(vec![(
            "https://p.example.org/slo",
            Ok("<p>S8A5</p>"),
        )]));
        let scraper = WebScraper::from_config(
            &config(&["https://p.example.org/slo"], 4000, 80),
            fetcher.clone(),
        )
        .unwrap();
        assert!(scraper.scrape("S8A5", Some("S8A5")).await.is_none());
    }

    #[tokio::test]
    async fn test_resources_fetched_in_configured_order() {
        let fetcher = Arc::new(MapFetcher::new(vec![]));
        let urls = ["https://p.example.org/b", "https://p.example.org/a", "https://p.example.org/c"];
        let scraper = WebScraper::from_config(&config(&urls, 4000, 80), fetcher.clone()).unwrap();
        assert!(scraper.scrape("S8A5", None).await.is_none());
        assert_eq!(*fetcher.order.lock().unwrap(), urls.to_vec());
    }

    /// Single-page PDF showing `text` in Helvetica, with a correct xref table.
    fn pdf_with_text(text: &str) -> Vec<u8> {
        let content = format!("BT /F1 12 Tf 72 700 Td ({}) Tj ET", text);
        let mut out = Vec::new();
        let mut offsets = Vec::new();
        out.extend_from_slice(b"%PDF-1.4\n");
        let objects = [
            "<< /Type /Catalog /Pages 2 0 R >>".to_string(),
            "<< /Type /Pages /Kids [3 0 R] /Count 1 >>".to_string(),
            "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] /Contents 4 0 R /Resources << /Font << /F1 5 0 R >> >> >>".to_string(),
            format!("<< /Length {} >>\nstream\n{}\nendstream", content.len(), content),
            "<< /Type /Font /Subtype /Type1 /BaseFont /Helvetica >>".to_string(),
        ];
        for (i, body) in objects.iter().enumerate() {
            offsets.push(out.len());
            out.extend_from_slice(format!("{} 0 obj {} endobj\n", i + 1, body).as_bytes());
        }
        let xref_start = out.len();
        out.extend_from_slice(format!("xref\n0 {}\n", objects.len() + 1).as_bytes());
        out.extend_from_slice(format!("{:010} 65535 f \n", 0).as_bytes());
        for offset in offsets {
            out.extend_from_slice(format!("{:010} 00000 n \n", offset).as_bytes());
        }
        out.extend_from_slice(
            format!(
                "trailer << /Size {} /Root 1 0 R >>\nstartxref\n{}\n%%EOF\n",
                objects.len() + 1,
                xref_start
            )
            .as_bytes(),
        );
        out
    }

    #[tokio::test]
    async fn test_pdf_resource_yields_excerpt() {
        let url = "https://p.example.org/slo.pdf";
        let mut fetcher = MapFetcher::new(vec![]);
        fetcher.pages.insert(
            url.to_string(),
            Ok(pdf_with_text("S8A5 Describe density as mass per unit volume")),
        );
        let fetcher = Arc::new(fetcher);
        let mut cfg = config(&[url], 4000, 10);
        cfg.resources[0].kind = ResourceKind::Pdf;
        let scraper = WebScraper::from_config(&cfg, fetcher.clone()).unwrap();

        let passage = scraper.scrape("Explain S8A5", Some("S8A5")).await.unwrap();
        assert_eq!(passage.fragments.len(), 1);
        assert_eq!(passage.fragments[0].kind, MatchKind::PdfExcerpt);
        assert_eq!(passage.fragments[0].url, url);
        assert!(passage.text.contains("S8A5"));
        assert!(passage.text.contains("density"));
        assert_eq!(passage.source_url, url);
        assert_eq!(passage.title, "r0");
    }

    #[tokio::test]
    async fn test_unreadable_pdf_is_skipped() {
        let pdf_url = "https://p.example.org/broken.pdf";
        let html_url = "https://p.example.org/slo";
        let mut fetcher = MapFetcher::new(vec![(html_url, Ok(PAGE))]);
        fetcher
            .pages
            .insert(pdf_url.to_string(), Ok(b"%PDF-1.4 this is not a pdf".to_vec()));
        let fetcher = Arc::new(fetcher);
        let mut cfg = config(&[pdf_url, html_url], 4000, 20);
        cfg.resources[0].kind = ResourceKind::Pdf;
        let scraper = WebScraper::from_config(&cfg, fetcher.clone()).unwrap();

        let passage = scraper.scrape("S8A5", Some("S8A5")).await.unwrap();
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 2);
        assert_eq!(passage.source_url, html_url);
        assert!(passage
            .fragments
            .iter()
            .all(|f| f.kind != MatchKind::PdfExcerpt));
    }
}
