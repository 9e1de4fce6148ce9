//! OpenAlex client - bibliographic source with citation edges.
//!
//! OpenAlex serves work metadata keyed by DOI or OpenAlex work ID, plus
//! outbound reference lists (`referenced_works`) and inbound citations
//! (the `cites:` filter). Abstracts arrive as an inverted index and are
//! reconstructed locally.

use std::collections::BTreeMap;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::paper::{Author, DiscoverySource, ExternalIds, Paper, Venue};

use super::http_client::build_provider_http_client;
use super::pacer::{RequestPacer, parse_retry_after};
use super::{ProviderClient, ProviderError, ProviderRole};

/// Default OpenAlex API base URL.
const DEFAULT_BASE_URL: &str = "https://api.openalex.org";

/// Minimum interval between requests (published guidance is 10 req/s).
const PACING_INTERVAL_MS: u64 = 120;

/// Work IDs fetched per batch when expanding `referenced_works`.
const REFERENCE_BATCH_SIZE: usize = 50;

/// Page size for citation queries.
const CITATION_PAGE_SIZE: usize = 200;

/// Cap on fetched edges per paper.
const EDGE_LIMIT: usize = 1000;

// ==================== OpenAlex API Response Types ====================

#[derive(Debug, Deserialize)]
pub(crate) struct OpenAlexWork {
    pub id: Option<String>,
    pub doi: Option<String>,
    pub display_name: Option<String>,
    pub publication_year: Option<i32>,
    #[serde(default)]
    pub authorships: Vec<OpenAlexAuthorship>,
    pub cited_by_count: Option<u32>,
    pub primary_location: Option<OpenAlexLocation>,
    pub biblio: Option<OpenAlexBiblio>,
    pub ids: Option<OpenAlexIds>,
    #[serde(default)]
    pub referenced_works: Vec<String>,
    pub abstract_inverted_index: Option<BTreeMap<String, Vec<usize>>>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct OpenAlexAuthorship {
    pub author: Option<OpenAlexAuthor>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct OpenAlexAuthor {
    pub display_name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct OpenAlexLocation {
    pub source: Option<OpenAlexSource>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct OpenAlexSource {
    pub display_name: Option<String>,
    #[serde(rename = "type")]
    pub source_type: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct OpenAlexBiblio {
    pub volume: Option<String>,
    pub issue: Option<String>,
    pub first_page: Option<String>,
    pub last_page: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct OpenAlexIds {
    pub pmid: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct OpenAlexListResponse {
    #[serde(default)]
    pub results: Vec<OpenAlexWork>,
}

// ==================== OpenAlexClient ====================

/// Client for the OpenAlex API.
pub struct OpenAlexClient {
    client: Client,
    base_url: String,
    mailto: Option<String>,
    pacer: RequestPacer,
}

impl OpenAlexClient {
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
        let client = build_provider_http_client("openalex")?;
        Ok(Self {
            client,
            base_url,
            mailto,
            pacer,
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
        debug!(api_url = %url, "Calling OpenAlex API");

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ProviderError::unavailable(format!("cannot reach OpenAlex API: {e}")))?;

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
                "OpenAlex API returned HTTP {}",
                status.as_u16()
            )));
        }

        let body = response.json::<T>().await.map_err(|e| {
            warn!(error = %e, "Failed to parse OpenAlex response JSON");
            ProviderError::unavailable("unexpected OpenAlex response format")
        })?;
        Ok(Some(body))
    }

    /// Fetches the raw OpenAlex work for a record, resolving by OpenAlex
    /// ID, DOI, or PubMed ID in that order.
    async fn fetch_work(&self, ids: &ExternalIds) -> Result<Option<OpenAlexWork>, ProviderError> {
        let descriptor = if let Some(openalex_id) = &ids.openalex_id {
            openalex_id.clone()
        } else if let Some(doi) = &ids.doi {
            format!("doi:{}", urlencoding::encode(doi))
        } else if let Some(pmid) = &ids.pmid {
            format!("pmid:{pmid}")
        } else {
            return Ok(None);
        };

        let mut url = format!("{}/works/{}", self.base_url, descriptor);
        self.append_mailto(&mut url, false);
        self.fetch_json::<OpenAlexWork>(&url).await
    }

    /// Expands `referenced_works` IDs into full records, batched through
    /// the `openalex_id` filter.
    async fn fetch_works_by_ids(
        &self,
        work_ids: &[String],
    ) -> Result<Vec<Paper>, ProviderError> {
        let mut papers = Vec::new();
        for batch in work_ids.chunks(REFERENCE_BATCH_SIZE) {
            let keys: Vec<&str> = batch.iter().map(|id| short_work_id(id)).collect();
            let mut url = format!(
                "{}/works?filter=openalex_id:{}&per-page={}",
                self.base_url,
                keys.join("|"),
                REFERENCE_BATCH_SIZE
            );
            self.append_mailto(&mut url, true);

            let Some(response) = self.fetch_json::<OpenAlexListResponse>(&url).await? else {
                continue;
            };
            papers.extend(
                response
                    .results
                    .into_iter()
                    .map(|work| parse_work(work, DiscoverySource::Backward)),
            );
        }
        Ok(papers)
    }
}

impl std::fmt::Debug for OpenAlexClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAlexClient")
            .field("base_url", &self.base_url)
            .field("polite_pool", &self.mailto.is_some())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl ProviderClient for OpenAlexClient {
    fn name(&self) -> &'static str {
        "openalex"
    }

    fn role(&self) -> ProviderRole {
        ProviderRole::Bibliographic
    }

    #[tracing::instrument(skip(self, ids), fields(provider = "openalex"))]
    async fn lookup_by_identifier(
        &self,
        ids: &ExternalIds,
    ) -> Result<Option<Paper>, ProviderError> {
        Ok(self
            .fetch_work(ids)
            .await?
            .map(|work| parse_work(work, DiscoverySource::Seed)))
    }

    #[tracing::instrument(skip(self), fields(provider = "openalex", title = %title))]
    async fn lookup_by_title(
        &self,
        title: &str,
        _year_hint: Option<i32>,
    ) -> Result<Option<Paper>, ProviderError> {
        let mut url = format!(
            "{}/works?filter=title.search:{}&per-page=1",
            self.base_url,
            urlencoding::encode(title)
        );
        self.append_mailto(&mut url, true);

        let Some(response) = self.fetch_json::<OpenAlexListResponse>(&url).await? else {
            return Ok(None);
        };
        Ok(response
            .results
            .into_iter()
            .next()
            .map(|work| parse_work(work, DiscoverySource::Seed)))
    }

    #[tracing::instrument(skip(self, paper), fields(provider = "openalex"))]
    async fn references(&self, paper: &Paper) -> Result<Vec<Paper>, ProviderError> {
        let Some(work) = self.fetch_work(&paper.ids).await? else {
            return Ok(Vec::new());
        };
        let mut ids = work.referenced_works;
        ids.truncate(EDGE_LIMIT);
        let refs = self.fetch_works_by_ids(&ids).await?;
        debug!(count = refs.len(), "fetched OpenAlex references");
        Ok(refs)
    }

    #[tracing::instrument(skip(self, paper), fields(provider = "openalex"))]
    async fn citations(&self, paper: &Paper) -> Result<Vec<Paper>, ProviderError> {
        // Inbound citations are keyed on the work ID, so an unresolved
        // record costs one extra lookup first.
        let work_id = match &paper.ids.openalex_id {
            Some(id) => short_work_id(id).to_string(),
            None => match self.fetch_work(&paper.ids).await? {
                Some(work) => match work.id.as_deref().map(short_work_id) {
                    Some(id) => id.to_string(),
                    None => return Ok(Vec::new()),
                },
                None => return Ok(Vec::new()),
            },
        };

        let mut papers = Vec::new();
        let mut page = 1usize;
        while papers.len() < EDGE_LIMIT {
            let mut url = format!(
                "{}/works?filter=cites:{}&per-page={}&page={}",
                self.base_url, work_id, CITATION_PAGE_SIZE, page
            );
            self.append_mailto(&mut url, true);

            let Some(response) = self.fetch_json::<OpenAlexListResponse>(&url).await? else {
                break;
            };
            let batch_len = response.results.len();
            papers.extend(
                response
                    .results
                    .into_iter()
                    .map(|work| parse_work(work, DiscoverySource::Forward)),
            );
            if batch_len < CITATION_PAGE_SIZE {
                break;
            }
            page += 1;
        }

        papers.truncate(EDGE_LIMIT);
        debug!(count = papers.len(), "fetched OpenAlex citations");
        Ok(papers)
    }
}

// ==================== Parsing Helpers ====================

/// Strips the `https://openalex.org/` prefix from a work ID URL.
fn short_work_id(id: &str) -> &str {
    id.rsplit('/').next().unwrap_or(id)
}

/// Strips the `https://doi.org/` prefix from an OpenAlex DOI value.
fn bare_doi(doi: &str) -> &str {
    doi.strip_prefix("https://doi.org/").unwrap_or(doi)
}

/// Rebuilds abstract text from OpenAlex's inverted word index.
fn reconstruct_abstract(index: &BTreeMap<String, Vec<usize>>) -> Option<String> {
    let mut positions: Vec<(usize, &str)> = Vec::new();
    for (word, offsets) in index {
        for &offset in offsets {
            positions.push((offset, word.as_str()));
        }
    }
    if positions.is_empty() {
        return None;
    }
    positions.sort_unstable_by_key(|(offset, _)| *offset);
    Some(
        positions
            .into_iter()
            .map(|(_, word)| word)
            .collect::<Vec<_>>()
            .join(" "),
    )
}

/// Converts an OpenAlex work payload into a canonical record.
fn parse_work(work: OpenAlexWork, source: DiscoverySource) -> Paper {
    let mut paper = Paper::new(work.display_name.unwrap_or_default(), source);

    paper.ids.openalex_id = work.id.as_deref().map(|id| short_work_id(id).to_string());
    paper.ids.doi = work.doi.as_deref().map(|doi| bare_doi(doi).to_string());
    paper.ids.pmid = work
        .ids
        .as_ref()
        .and_then(|ids| ids.pmid.as_deref())
        .map(|pmid| pmid.rsplit('/').next().unwrap_or(pmid).to_string());

    paper.year = work.publication_year;
    paper.citation_count = work.cited_by_count;
    paper.abstract_text = work
        .abstract_inverted_index
        .as_ref()
        .and_then(reconstruct_abstract);
    paper.authors = work
        .authorships
        .into_iter()
        .filter_map(|a| a.author.and_then(|author| author.display_name))
        .map(Author::named)
        .collect();

    let source_info = work.primary_location.and_then(|location| location.source);
    let biblio = work.biblio;
    if source_info.is_some() || biblio.is_some() {
        paper.venue = Some(Venue {
            name: source_info.as_ref().and_then(|s| s.display_name.clone()),
            kind: source_info.as_ref().and_then(|s| s.source_type.clone()),
            volume: biblio.as_ref().and_then(|b| b.volume.clone()),
            issue: biblio.as_ref().and_then(|b| b.issue.clone()),
            pages: biblio.as_ref().and_then(|b| {
                match (&b.first_page, &b.last_page) {
                    (Some(first), Some(last)) => Some(format!("{first}-{last}")),
                    (Some(first), None) => Some(first.clone()),
                    _ => None,
                }
            }),
        });
    }

    paper
}
