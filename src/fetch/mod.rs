//! Page fetching: download a URL and reduce it to plain text.
//!
//! HTML pages go through `scraper`; PDFs are streamed (capped at
//! [`MAX_PDF_BYTES`]) and parsed off the async runtime. Every fetch made by the
//! research pipeline goes through [`fetch_with_timeout`], so a hung server
//! costs at most one timeout.

use async_trait::async_trait;
use reqwest::Client;
use scraper::{ElementRef, Html, Selector};
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{FetchError, FetchResult};

/// Browser-like User-Agent; many sites reject default HTTP client agents.
pub const USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";

/// Largest PDF body read before truncating.
pub const MAX_PDF_BYTES: usize = 50 * 1024 * 1024;

/// Pages read by the fallback PDF parser.
pub const MAX_PDF_PAGES: usize = 30;

/// Elements whose text is kept from HTML pages.
const CONTENT_TAGS: &[&str] = &[
    "h1", "h2", "h3", "h4", "h5", "h6", "p", "li", "pre", "code", "td", "th", "blockquote",
];

/// What kind of document a fetch produced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentKind {
    Html,
    Pdf,
}

/// Extracted text of one page
#[derive(Debug, Clone)]
pub struct FetchedPage {
    pub url: String,
    pub text: String,
    pub kind: ContentKind,
}

/// Page-fetch capability: URL in, plain text out.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    /// Fetch `url` and extract its text. `timeout` bounds the whole operation.
    async fn fetch(&self, url: &str, timeout: Duration) -> FetchResult<FetchedPage>;
}

/// Whether a URL points at a PDF by its path.
pub fn is_pdf_url(url: &str) -> bool {
    let lower = url.to_lowercase();
    lower.ends_with(".pdf") || lower.contains(".pdf?")
}

/// Per-content-type fetch timeouts
#[derive(Debug, Clone, Copy)]
pub struct FetchPolicy {
    pub html_timeout: Duration,
    pub pdf_timeout: Duration,
}

impl FetchPolicy {
    /// PDFs get at least three times the HTML timeout and never less than 20s.
    pub fn new(html_timeout: Duration, pdf_timeout: Duration) -> Self {
        let floor = (html_timeout * 3).max(Duration::from_secs(20));
        Self {
            html_timeout,
            pdf_timeout: pdf_timeout.max(floor),
        }
    }

    /// Timeout to apply to `url`
    pub fn timeout_for(&self, url: &str) -> Duration {
        if is_pdf_url(url) {
            self.pdf_timeout
        } else {
            self.html_timeout
        }
    }
}

impl Default for FetchPolicy {
    fn default() -> Self {
        Self::new(Duration::from_secs(7), Duration::from_secs(20))
    }
}

/// Fetch through `fetcher`, abandoning the call once `policy`'s timeout passes.
pub async fn fetch_with_timeout(
    fetcher: &dyn PageFetcher,
    url: &str,
    policy: &FetchPolicy,
) -> FetchResult<FetchedPage> {
    let timeout = policy.timeout_for(url);
    match tokio::time::timeout(timeout, fetcher.fetch(url, timeout)).await {
        Ok(result) => result,
        Err(_) => Err(FetchError::Timeout {
            url: url.to_string(),
            timeout_ms: timeout.as_millis() as u64,
        }),
    }
}

/// Remove NUL bytes and U+FFFD replacement characters left by broken encodings.
pub fn clean_text(text: &str) -> String {
    text.chars()
        .filter(|c| *c != '\u{0}' && *c != '\u{FFFD}')
        .collect()
}

/// Extract readable text from an HTML document.
///
/// Keeps headings, paragraphs, list items, code blocks, table cells and
/// blockquotes. Elements nested inside another kept element are skipped so
/// their text is not repeated.
pub fn extract_html_text(html: &str) -> String {
    let document = Html::parse_document(html);
    let Ok(selector) = Selector::parse(&CONTENT_TAGS.join(", ")) else {
        return String::new();
    };

    let mut blocks: Vec<String> = Vec::new();
    for element in document.select(&selector) {
        if has_content_ancestor(element) {
            continue;
        }
        let text = compact_whitespace(&element.text().collect::<Vec<_>>().join(" "));
        if !text.is_empty() {
            blocks.push(text);
        }
    }

    blocks.join("\n\n")
}

fn has_content_ancestor(element: ElementRef<'_>) -> bool {
    element.ancestors().any(|node| {
        node.value()
            .as_element()
            .map(|e| CONTENT_TAGS.contains(&e.name()))
            .unwrap_or(false)
    })
}

fn compact_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Extract text from PDF bytes.
///
/// Tries `pdf-extract` on the whole document, then falls back to `lopdf`
/// page-by-page text over the first [`MAX_PDF_PAGES`] pages. Blocking; call
/// from `spawn_blocking`.
pub fn extract_pdf_text(bytes: &[u8]) -> Option<String> {
    // pdf-extract panics on some malformed inputs
    let primary = std::panic::catch_unwind(|| pdf_extract::extract_text_from_mem(bytes));
    match primary {
        Ok(Ok(text)) if !text.trim().is_empty() => return Some(clean_text(&text)),
        Ok(Ok(_)) => debug!("pdf-extract produced no text, trying lopdf"),
        Ok(Err(e)) => debug!(error = %e, "pdf-extract failed, trying lopdf"),
        Err(_) => debug!("pdf-extract panicked, trying lopdf"),
    }

    let document = match lopdf::Document::load_mem(bytes) {
        Ok(doc) => doc,
        Err(e) => {
            warn!(error = %e, "Both PDF parsers failed");
            return None;
        }
    };

    let pages: Vec<String> = document
        .get_pages()
        .keys()
        .take(MAX_PDF_PAGES)
        .filter_map(|page| document.extract_text(&[*page]).ok())
        .filter(|text| !text.trim().is_empty())
        .collect();

    if pages.is_empty() {
        return None;
    }
    Some(clean_text(&pages.join("\n\n")))
}

/// HTTP page fetcher
#[derive(Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    /// Create a new fetcher
    pub fn new() -> FetchResult<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()?;

        Ok(Self { client })
    }

    async fn read_pdf_body(&self, url: &str, mut response: reqwest::Response) -> FetchResult<String> {
        let mut body: Vec<u8> = Vec::new();

        while let Some(chunk) = response.chunk().await? {
            if body.len() + chunk.len() > MAX_PDF_BYTES {
                warn!(url = %url, max_bytes = MAX_PDF_BYTES, "PDF too large, truncating");
                let remaining = MAX_PDF_BYTES - body.len();
                body.extend_from_slice(&chunk[..remaining]);
                break;
            }
            body.extend_from_slice(&chunk);
        }

        let text = tokio::task::spawn_blocking(move || extract_pdf_text(&body))
            .await
            .map_err(|e| FetchError::Failed {
                url: url.to_string(),
                message: format!("PDF extraction task failed: {}", e),
            })?;

        text.ok_or_else(|| FetchError::Failed {
            url: url.to_string(),
            message: "No text could be extracted from PDF".to_string(),
        })
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch(&self, url: &str, timeout: Duration) -> FetchResult<FetchedPage> {
        debug!(url = %url, timeout_ms = timeout.as_millis(), "Fetching page");

        let response = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    FetchError::Timeout {
                        url: url.to_string(),
                        timeout_ms: timeout.as_millis() as u64,
                    }
                } else {
                    FetchError::Http(e)
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Failed {
                url: url.to_string(),
                message: format!("HTTP {}", status.as_u16()),
            });
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_lowercase();

        let (text, kind) = if content_type.contains("application/pdf") || is_pdf_url(url) {
            (self.read_pdf_body(url, response).await?, ContentKind::Pdf)
        } else if content_type.is_empty()
            || content_type.contains("html")
            || content_type.starts_with("text/")
        {
            let html = response.text().await?;
            (clean_text(&extract_html_text(&html)), ContentKind::Html)
        } else {
            return Err(FetchError::UnsupportedContent {
                url: url.to_string(),
                content_type,
            });
        };

        if text.trim().is_empty() {
            return Err(FetchError::Failed {
                url: url.to_string(),
                message: "No readable text".to_string(),
            });
        }

        Ok(FetchedPage {
            url: url.to_string(),
            text,
            kind,
        })
    }
}
