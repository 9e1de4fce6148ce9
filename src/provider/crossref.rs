//! Crossref client - general bibliographic source.
//!
//! Resolves DOIs and title searches against the Crossref REST API.
//! Crossref serves bibliographic metadata only; reference and citation
//! edges are not offered here, so the chain falls through to a
//! citation-capable provider for those.

use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::paper::{Author, DiscoverySource, ExternalIds, Paper, Venue};

use super::http_client::build_provider_http_client;
use super::pacer::{RequestPacer, parse_retry_after};
use super::{ProviderClient, ProviderError, ProviderRole};

/// Default Crossref REST API base URL.
const DEFAULT_BASE_URL: &str = "https://api.crossref.org";

/// Minimum interval between requests (polite-pool etiquette).
const PACING_INTERVAL_MS: u64 = 200;

// ==================== Crossref API Response Types ====================

#[derive(Debug, Deserialize)]
pub(crate) struct CrossrefWorkResponse {
    pub message: CrossrefWork,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CrossrefSearchResponse {
    pub message: CrossrefSearchMessage,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CrossrefSearchMessage {
    #[serde(default)]
    pub items: Vec<CrossrefWork>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub(crate) struct CrossrefWork {
    #[serde(rename = "DOI")]
    pub doi: Option<String>,
    #[serde(default)]
    pub title: Vec<String>,
    #[serde(default)]
    pub author: Vec<CrossrefAuthor>,
    pub issued: Option<CrossrefDate>,
    #[serde(default)]
    pub container_title: Vec<String>,
    #[serde(rename = "type")]
    pub work_type: Option<String>,
    pub volume: Option<String>,
    pub issue: Option<String>,
    pub page: Option<String>,
    pub is_referenced_by_count: Option<u32>,
    #[serde(rename = "abstract")]
    pub abstract_text: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CrossrefAuthor {
    pub given: Option<String>,
    pub family: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CrossrefDate {
    #[serde(rename = "date-parts", default)]
    pub date_parts: Vec<Vec<Option<i32>>>,
}

impl CrossrefDate {
    fn year(&self) -> Option<i32> {
        self.date_parts.first().and_then(|parts| parts.first()).copied().flatten()
    }
}

// ==================== CrossrefClient ====================

/// Client for the Crossref REST API.
///
/// Sends the configured contact email on every request so traffic lands
/// in Crossref's polite pool.
pub struct CrossrefClient {
    client: Client,
    base_url: String,
    mailto: Option<String>,
    pacer: RequestPacer,
    jats_tag: Regex,
}

impl CrossrefClient {
    /// Creates a client against the production API.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError`] if HTTP client construction fails.
    pub fn new(mailto: Option<String>) -> Result<Self, ProviderError> {
        Self::build(
            mailto,
            DEFAULT_BASE_URL.to_string(),
            RequestPacer::new(std::time::Duration::from_millis(PACING_INTERVAL_MS)),
        )
    }

    /// Creates a client with a custom base URL and no pacing (for testing
    /// with wiremock).
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError`] if HTTP client construction fails.
    pub fn with_base_url(
        mailto: Option<String>,
        base_url: impl Into<String>,
    ) -> Result<Self, ProviderError> {
        Self::build(mailto, base_url.into(), RequestPacer::unpaced())
    }

    fn build(
        mailto: Option<String>,
        base_url: String,
        pacer: RequestPacer,
    ) -> Result<Self, ProviderError> {
        let client = build_provider_http_client("crossref")?;
        let jats_tag = Regex::new(r"<[^>]+>")
            .map_err(|e| ProviderError::unavailable(format!("crossref: bad tag pattern: {e}")))?;
        Ok(Self {
            client,
            base_url,
            mailto,
            pacer,
            jats_tag,
        })
    }

    fn append_mailto(&self, url: &mut String, has_query: bool) {
        if let Some(mailto) = &self.mailto {
            url.push(if has_query { '&' } else { '?' });
            url.push_str(&format!("mailto={}", urlencoding::encode(mailto)));
        }
    }

    async fn fetch_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
    ) -> Result<Option<T>, ProviderError> {
        self.pacer.acquire().await;
        debug!(api_url = %url, "Calling Crossref API");

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ProviderError::unavailable(format!("cannot reach Crossref API: {e}")))?;

        let status = response.status();
        if status.as_u16() == 404 {
            return Ok(None);
        }
        if status.as_u16() == 429 {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(parse_retry_after);
            return Err(ProviderError::RateLimited { retry_after });
        }
        if !status.is_success() {
            return Err(ProviderError::unavailable(format!(
                "Crossref API returned HTTP {}",
                status.as_u16()
            )));
        }

        let body = response.json::<T>().await.map_err(|e| {
            warn!(error = %e, "Failed to parse Crossref response JSON");
            ProviderError::unavailable("unexpected Crossref response format")
        })?;
        Ok(Some(body))
    }

    /// Strips JATS markup from Crossref abstract payloads.
    fn clean_abstract(&self, raw: &str) -> Option<String> {
        let text = self.jats_tag.replace_all(raw, " ");
        let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
        if collapsed.is_empty() {
            None
        } else {
            Some(collapsed)
        }
    }

    fn parse_work(&self, work: CrossrefWork) -> Paper {
        let title = work.title.first().cloned().unwrap_or_default();
        let mut paper = Paper::new(title, DiscoverySource::Seed);

        paper.ids.doi = work.doi;
        paper.year = work.issued.as_ref().and_then(CrossrefDate::year);
        paper.citation_count = work.is_referenced_by_count;
        paper.abstract_text = work
            .abstract_text
            .as_deref()
            .and_then(|raw| self.clean_abstract(raw));
        paper.authors = work
            .author
            .into_iter()
            .filter_map(|a| match (a.given, a.family) {
                (Some(given), Some(family)) => Some(format!("{given} {family}")),
                (None, Some(family)) => Some(family),
                (Some(given), None) => Some(given),
                (None, None) => None,
            })
            .map(Author::named)
            .collect();

        let venue_name = work.container_title.into_iter().next();
        if venue_name.is_some() || work.work_type.is_some() {
            paper.venue = Some(Venue {
                name: venue_name,
                kind: work.work_type.map(normalize_work_type),
                volume: work.volume,
                issue: work.issue,
                pages: work.page,
            });
        }

        paper
    }
}

impl std::fmt::Debug for CrossrefClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CrossrefClient")
            .field("base_url", &self.base_url)
            .field("polite_pool", &self.mailto.is_some())
            .finish_non_exhaustive()
    }
}

/// Maps Crossref work types onto the shared venue vocabulary.
fn normalize_work_type(work_type: String) -> String {
    match work_type.as_str() {
        "journal-article" => "journal".to_string(),
        "proceedings-article" => "conference".to_string(),
        "book-chapter" | "monograph" => "book".to_string(),
        other => other.to_string(),
    }
}

#[async_trait]
impl ProviderClient for CrossrefClient {
    fn name(&self) -> &'static str {
        "crossref"
    }

    fn role(&self) -> ProviderRole {
        ProviderRole::Bibliographic
    }

    #[tracing::instrument(skip(self, ids), fields(provider = "crossref"))]
    async fn lookup_by_identifier(
        &self,
        ids: &ExternalIds,
    ) -> Result<Option<Paper>, ProviderError> {
        // Crossref is keyed on DOIs only.
        let Some(doi) = &ids.doi else {
            return Ok(None);
        };
        let mut url = format!("{}/works/{}", self.base_url, urlencoding::encode(doi));
        self.append_mailto(&mut url, false);

        let paper = self
            .fetch_json::<CrossrefWorkResponse>(&url)
            .await?
            .map(|response| self.parse_work(response.message));
        Ok(paper)
    }

    #[tracing::instrument(skip(self), fields(provider = "crossref", title = %title))]
    async fn lookup_by_title(
        &self,
        title: &str,
        _year_hint: Option<i32>,
    ) -> Result<Option<Paper>, ProviderError> {
        let mut url = format!(
            "{}/works?query.bibliographic={}&rows=1",
            self.base_url,
            urlencoding::encode(title)
        );
        self.append_mailto(&mut url, true);

        let Some(response) = self.fetch_json::<CrossrefSearchResponse>(&url).await? else {
            return Ok(None);
        };
        Ok(response
            .message
            .items
            .into_iter()
            .next()
            .map(|work| self.parse_work(work)))
    }

    async fn references(&self, _paper: &Paper) -> Result<Vec<Paper>, ProviderError> {
        Err(ProviderError::not_supported("references"))
    }

    async fn citations(&self, _paper: &Paper) -> Result<Vec<Paper>, ProviderError> {
        Err(ProviderError::not_supported("citations"))
    }
}
