//! arXiv client - preprint source, consulted last in the chain.
//!
//! The arXiv export API speaks Atom XML. The subset of fields needed
//! here (entry, id, title, summary, published year, authors) is regular
//! enough to extract with anchored patterns rather than a full XML
//! parser. arXiv has no citation graph, so edge queries are not
//! supported.

use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use tracing::{debug, warn};

use crate::paper::{Author, DiscoverySource, ExternalIds, Paper};

use super::http_client::build_provider_http_client;
use super::pacer::RequestPacer;
use super::{ProviderClient, ProviderError, ProviderRole};

/// Default arXiv export API base URL.
const DEFAULT_BASE_URL: &str = "http://export.arxiv.org/api";

/// arXiv asks for no more than one request every three seconds.
const PACING_INTERVAL_MS: u64 = 3000;

/// DOI prefix arXiv assigns to its own preprints.
const ARXIV_DOI_PREFIX: &str = "10.48550/arxiv.";

// ==================== ArxivClient ====================

/// Client for the arXiv export API.
pub struct ArxivClient {
    client: Client,
    base_url: String,
    pacer: RequestPacer,
    entry_pattern: Regex,
    field_patterns: FieldPatterns,
}

struct FieldPatterns {
    id: Regex,
    title: Regex,
    summary: Regex,
    published_year: Regex,
    author_name: Regex,
}

impl ArxivClient {
    /// Creates a client against the production API.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError`] if HTTP client or pattern construction
    /// fails.
    pub fn new() -> Result<Self, ProviderError> {
        Self::build(
            DEFAULT_BASE_URL.to_string(),
            RequestPacer::new(std::time::Duration::from_millis(PACING_INTERVAL_MS)),
        )
    }

    /// Creates a client with a custom base URL and no pacing (for testing
    /// with wiremock).
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError`] if HTTP client or pattern construction
    /// fails.
    pub fn with_base_url(base_url: impl Into<String>) -> Result<Self, ProviderError> {
        Self::build(base_url.into(), RequestPacer::unpaced())
    }

    fn build(base_url: String, pacer: RequestPacer) -> Result<Self, ProviderError> {
        let client = build_provider_http_client("arxiv")?;
        let compile = |pattern: &str| {
            Regex::new(pattern)
                .map_err(|e| ProviderError::unavailable(format!("arxiv: bad pattern: {e}")))
        };
        Ok(Self {
            client,
            base_url,
            pacer,
            entry_pattern: compile(r"(?s)<entry>(.*?)</entry>")?,
            field_patterns: FieldPatterns {
                id: compile(r"<id>\s*https?://arxiv\.org/abs/([^<\s]+)\s*</id>")?,
                title: compile(r"(?s)<title[^>]*>(.*?)</title>")?,
                summary: compile(r"(?s)<summary[^>]*>(.*?)</summary>")?,
                published_year: compile(r"<published>(\d{4})")?,
                author_name: compile(r"(?s)<name>(.*?)</name>")?,
            },
        })
    }

    async fn fetch_feed(&self, url: &str) -> Result<String, ProviderError> {
        self.pacer.acquire().await;
        debug!(api_url = %url, "Calling arXiv export API");

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ProviderError::unavailable(format!("cannot reach arXiv API: {e}")))?;

        let status = response.status();
        if status.as_u16() == 429 || status.as_u16() == 503 {
            // arXiv signals throttling with 503 rather than 429.
            return Err(ProviderError::rate_limited());
        }
        if !status.is_success() {
            return Err(ProviderError::unavailable(format!(
                "arXiv API returned HTTP {}",
                status.as_u16()
            )));
        }

        response.text().await.map_err(|e| {
            warn!(error = %e, "Failed to read arXiv response body");
            ProviderError::unavailable("unreadable arXiv response body")
        })
    }

    /// Parses the first Atom entry of a feed into a record.
    fn parse_first_entry(&self, feed: &str) -> Option<Paper> {
        let entry = self.entry_pattern.captures(feed)?.get(1)?.as_str();
        let fields = &self.field_patterns;

        let title = fields
            .title
            .captures(entry)
            .and_then(|c| c.get(1))
            .map(|m| collapse_xml_text(m.as_str()))?;
        if title.is_empty() {
            return None;
        }

        let mut paper = Paper::new(title, DiscoverySource::Seed);
        paper.ids.arxiv_id = fields
            .id
            .captures(entry)
            .and_then(|c| c.get(1))
            .map(|m| strip_version(m.as_str()).to_string());
        paper.abstract_text = fields
            .summary
            .captures(entry)
            .and_then(|c| c.get(1))
            .map(|m| collapse_xml_text(m.as_str()))
            .filter(|s| !s.is_empty());
        paper.year = fields
            .published_year
            .captures(entry)
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().parse().ok());
        paper.authors = fields
            .author_name
            .captures_iter(entry)
            .filter_map(|c| c.get(1))
            .map(|m| collapse_xml_text(m.as_str()))
            .filter(|name| !name.is_empty())
            .map(Author::named)
            .collect();

        Some(paper)
    }
}

impl std::fmt::Debug for ArxivClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArxivClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl ProviderClient for ArxivClient {
    fn name(&self) -> &'static str {
        "arxiv"
    }

    fn role(&self) -> ProviderRole {
        ProviderRole::Preprint
    }

    #[tracing::instrument(skip(self, ids), fields(provider = "arxiv"))]
    async fn lookup_by_identifier(
        &self,
        ids: &ExternalIds,
    ) -> Result<Option<Paper>, ProviderError> {
        let Some(arxiv_id) = addressable_arxiv_id(ids) else {
            return Ok(None);
        };
        let url = format!(
            "{}/query?id_list={}&max_results=1",
            self.base_url,
            urlencoding::encode(&arxiv_id)
        );
        let feed = self.fetch_feed(&url).await?;
        Ok(self.parse_first_entry(&feed))
    }

    #[tracing::instrument(skip(self), fields(provider = "arxiv", title = %title))]
    async fn lookup_by_title(
        &self,
        title: &str,
        _year_hint: Option<i32>,
    ) -> Result<Option<Paper>, ProviderError> {
        let query = format!("ti:\"{title}\"");
        let url = format!(
            "{}/query?search_query={}&max_results=1",
            self.base_url,
            urlencoding::encode(&query)
        );
        let feed = self.fetch_feed(&url).await?;
        Ok(self.parse_first_entry(&feed))
    }

    async fn references(&self, _paper: &Paper) -> Result<Vec<Paper>, ProviderError> {
        Err(ProviderError::not_supported("references"))
    }

    async fn citations(&self, _paper: &Paper) -> Result<Vec<Paper>, ProviderError> {
        Err(ProviderError::not_supported("citations"))
    }
}

// ==================== Parsing Helpers ====================

/// Extracts an arXiv ID from the record's identifiers, accepting either
/// a native arXiv ID or an arXiv-issued DOI (`10.48550/arXiv.*`).
fn addressable_arxiv_id(ids: &ExternalIds) -> Option<String> {
    if let Some(arxiv_id) = &ids.arxiv_id {
        return Some(strip_version(arxiv_id).to_string());
    }
    let doi = ids.doi.as_deref()?;
    let lowered = doi.to_lowercase();
    let suffix = lowered.strip_prefix(ARXIV_DOI_PREFIX)?;
    // Preserve original casing of the suffix (old-style IDs carry
    // category prefixes like cs.DC).
    Some(strip_version(&doi[doi.len() - suffix.len()..]).to_string())
}

/// Drops a trailing `vN` version marker from an arXiv ID.
fn strip_version(id: &str) -> &str {
    match id.rfind('v') {
        Some(pos) if pos > 0 && id[pos + 1..].chars().all(|c| c.is_ascii_digit())
            && !id[pos + 1..].is_empty() =>
        {
            &id[..pos]
        }
        _ => id,
    }
}

/// Unescapes the XML entities the feed uses and collapses whitespace.
fn collapse_xml_text(raw: &str) -> String {
    let unescaped = raw
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&");
    unescaped.split_whitespace().collect::<Vec<_>>().join(" ")
}
