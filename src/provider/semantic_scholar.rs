//! Semantic Scholar client - primary citation-graph source.
//!
//! Talks to the Semantic Scholar Graph API v1 for identifier lookups,
//! title search, and reference/citation edge traversal. Edge queries
//! paginate in batches of 100 up to a fixed cap.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::paper::{Author, DiscoverySource, ExternalIds, Paper, Venue};

use super::http_client::build_provider_http_client;
use super::pacer::{RequestPacer, parse_retry_after};
use super::{ProviderClient, ProviderError, ProviderRole};

/// Default Semantic Scholar Graph API base URL.
const DEFAULT_BASE_URL: &str = "https://api.semanticscholar.org/graph/v1";

/// Fields requested on every paper payload.
const PAPER_FIELDS: &str = "paperId,externalIds,title,abstract,venue,year,authors,\
citationCount,influentialCitationCount,publicationTypes,journal";

/// Minimum interval between unauthenticated requests (published guidance
/// is 1 req/s for the shared pool).
const PACING_INTERVAL_MS: u64 = 1100;

/// Edge pagination batch size.
const EDGE_BATCH_SIZE: usize = 100;

/// Cap on fetched edges per paper.
const EDGE_LIMIT: usize = 1000;

// ==================== Semantic Scholar API Response Types ====================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct S2Paper {
    pub paper_id: Option<String>,
    pub external_ids: Option<S2ExternalIds>,
    pub title: Option<String>,
    #[serde(rename = "abstract")]
    pub abstract_text: Option<String>,
    pub venue: Option<String>,
    pub journal: Option<S2Journal>,
    pub year: Option<i32>,
    #[serde(default)]
    pub authors: Vec<S2Author>,
    pub citation_count: Option<u32>,
    pub influential_citation_count: Option<u32>,
    pub publication_types: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct S2ExternalIds {
    #[serde(rename = "DOI")]
    pub doi: Option<String>,
    #[serde(rename = "ArXiv")]
    pub arxiv: Option<String>,
    #[serde(rename = "PubMed")]
    pub pubmed: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct S2Journal {
    pub name: Option<String>,
    pub volume: Option<String>,
    pub pages: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct S2Author {
    pub name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct S2SearchResponse {
    #[serde(default)]
    pub data: Vec<S2Paper>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct S2ReferenceBatch {
    #[serde(default)]
    pub data: Vec<S2ReferenceEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct S2ReferenceEntry {
    pub cited_paper: Option<S2Paper>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct S2CitationBatch {
    #[serde(default)]
    pub data: Vec<S2CitationEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct S2CitationEntry {
    pub citing_paper: Option<S2Paper>,
}

// ==================== SemanticScholarClient ====================

/// Client for the Semantic Scholar Graph API.
///
/// The only chain member with full reference and citation coverage, so
/// it is consulted first for every operation kind.
pub struct SemanticScholarClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    pacer: RequestPacer,
}

impl SemanticScholarClient {
    /// Creates a client against the production API.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError`] if HTTP client construction fails.
    pub fn new(api_key: Option<String>) -> Result<Self, ProviderError> {
        Self::build(
            api_key,
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
        api_key: Option<String>,
        base_url: impl Into<String>,
    ) -> Result<Self, ProviderError> {
        Self::build(api_key, base_url.into(), RequestPacer::unpaced())
    }

    fn build(
        api_key: Option<String>,
        base_url: String,
        pacer: RequestPacer,
    ) -> Result<Self, ProviderError> {
        let client = build_provider_http_client("semantic-scholar")?;
        Ok(Self {
            client,
            base_url,
            api_key,
            pacer,
        })
    }

    /// Issues a GET and decodes the JSON body.
    ///
    /// Returns `Ok(None)` on 404 (unknown record is not an error).
    async fn fetch_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
    ) -> Result<Option<T>, ProviderError> {
        self.pacer.acquire().await;
        debug!(api_url = %url, "Calling Semantic Scholar API");

        let mut request = self.client.get(url);
        if let Some(key) = &self.api_key {
            request = request.header("x-api-key", key);
        }

        let response = request.send().await.map_err(|e| {
            ProviderError::unavailable(format!("cannot reach Semantic Scholar API: {e}"))
        })?;

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
                "Semantic Scholar API returned HTTP {}",
                status.as_u16()
            )));
        }

        let body = response.json::<T>().await.map_err(|e| {
            warn!(error = %e, "Failed to parse Semantic Scholar response JSON");
            ProviderError::unavailable("unexpected Semantic Scholar response format")
        })?;
        Ok(Some(body))
    }

    /// Builds the `paper/{descriptor}` path segment for a paper, using
    /// whichever addressable identifier is available.
    fn paper_descriptor(ids: &ExternalIds) -> Option<String> {
        if let Some(s2_id) = &ids.semantic_scholar_id {
            return Some(s2_id.clone());
        }
        if let Some(doi) = &ids.doi {
            return Some(format!("DOI:{}", urlencoding::encode(doi)));
        }
        if let Some(arxiv_id) = &ids.arxiv_id {
            return Some(format!("arXiv:{arxiv_id}"));
        }
        if let Some(pmid) = &ids.pmid {
            return Some(format!("PMID:{pmid}"));
        }
        None
    }

    async fn fetch_edges<B>(
        &self,
        descriptor: &str,
        kind: &str,
        extract: impl Fn(B) -> Vec<Option<S2Paper>>,
        source: DiscoverySource,
    ) -> Result<Vec<Paper>, ProviderError>
    where
        B: serde::de::DeserializeOwned,
    {
        let mut papers = Vec::new();
        let mut offset = 0usize;

        while offset < EDGE_LIMIT {
            let limit = EDGE_BATCH_SIZE.min(EDGE_LIMIT - offset);
            let url = format!(
                "{}/paper/{}/{}?fields={}&limit={}&offset={}",
                self.base_url, descriptor, kind, PAPER_FIELDS, limit, offset
            );
            let Some(batch) = self.fetch_json::<B>(&url).await? else {
                break;
            };

            let entries = extract(batch);
            let batch_len = entries.len();
            for entry in entries.into_iter().flatten() {
                papers.push(parse_paper(entry, source));
            }

            if batch_len < limit {
                break;
            }
            offset += batch_len;
        }

        debug!(count = papers.len(), kind, "fetched Semantic Scholar edges");
        Ok(papers)
    }
}

impl std::fmt::Debug for SemanticScholarClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SemanticScholarClient")
            .field("base_url", &self.base_url)
            .field("authenticated", &self.api_key.is_some())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl ProviderClient for SemanticScholarClient {
    fn name(&self) -> &'static str {
        "semantic-scholar"
    }

    fn role(&self) -> ProviderRole {
        ProviderRole::CitationGraph
    }

    #[tracing::instrument(skip(self, ids), fields(provider = "semantic-scholar"))]
    async fn lookup_by_identifier(
        &self,
        ids: &ExternalIds,
    ) -> Result<Option<Paper>, ProviderError> {
        let Some(descriptor) = Self::paper_descriptor(ids) else {
            return Ok(None);
        };
        let url = format!(
            "{}/paper/{}?fields={}",
            self.base_url, descriptor, PAPER_FIELDS
        );
        let paper = self
            .fetch_json::<S2Paper>(&url)
            .await?
            .map(|data| parse_paper(data, DiscoverySource::Seed));
        Ok(paper)
    }

    #[tracing::instrument(skip(self), fields(provider = "semantic-scholar", title = %title))]
    async fn lookup_by_title(
        &self,
        title: &str,
        year_hint: Option<i32>,
    ) -> Result<Option<Paper>, ProviderError> {
        let mut url = format!(
            "{}/paper/search?query={}&fields={}&limit=1",
            self.base_url,
            urlencoding::encode(title),
            PAPER_FIELDS
        );
        if let Some(year) = year_hint {
            url.push_str(&format!("&year={year}"));
        }

        let Some(response) = self.fetch_json::<S2SearchResponse>(&url).await? else {
            return Ok(None);
        };
        Ok(response
            .data
            .into_iter()
            .next()
            .map(|data| parse_paper(data, DiscoverySource::Seed)))
    }

    #[tracing::instrument(skip(self, paper), fields(provider = "semantic-scholar"))]
    async fn references(&self, paper: &Paper) -> Result<Vec<Paper>, ProviderError> {
        let Some(descriptor) = Self::paper_descriptor(&paper.ids) else {
            return Ok(Vec::new());
        };
        self.fetch_edges::<S2ReferenceBatch>(
            &descriptor,
            "references",
            |batch| batch.data.into_iter().map(|e| e.cited_paper).collect(),
            DiscoverySource::Backward,
        )
        .await
    }

    #[tracing::instrument(skip(self, paper), fields(provider = "semantic-scholar"))]
    async fn citations(&self, paper: &Paper) -> Result<Vec<Paper>, ProviderError> {
        let Some(descriptor) = Self::paper_descriptor(&paper.ids) else {
            return Ok(Vec::new());
        };
        self.fetch_edges::<S2CitationBatch>(
            &descriptor,
            "citations",
            |batch| batch.data.into_iter().map(|e| e.citing_paper).collect(),
            DiscoverySource::Forward,
        )
        .await
    }
}

// ==================== Parsing Helpers ====================

/// Converts a Semantic Scholar payload into a canonical record.
fn parse_paper(data: S2Paper, source: DiscoverySource) -> Paper {
    let mut paper = Paper::new(data.title.unwrap_or_default(), source);

    paper.ids.semantic_scholar_id = data.paper_id;
    if let Some(external) = data.external_ids {
        paper.ids.doi = external.doi;
        paper.ids.arxiv_id = external.arxiv;
        paper.ids.pmid = external.pubmed;
    }

    paper.year = data.year;
    paper.abstract_text = data.abstract_text;
    paper.citation_count = data.citation_count;
    paper.influential_citation_count = data.influential_citation_count;
    paper.authors = data
        .authors
        .into_iter()
        .filter_map(|a| a.name)
        .filter(|name| !name.trim().is_empty())
        .map(Author::named)
        .collect();

    let venue_name = data
        .venue
        .filter(|v| !v.trim().is_empty())
        .or_else(|| data.journal.as_ref().and_then(|j| j.name.clone()));
    let kind = data
        .publication_types
        .as_ref()
        .and_then(|kinds| kinds.first())
        .map(|k| k.to_lowercase());
    if venue_name.is_some() || kind.is_some() {
        paper.venue = Some(Venue {
            name: venue_name,
            kind,
            volume: data.journal.as_ref().and_then(|j| j.volume.clone()),
            issue: None,
            pages: data.journal.as_ref().and_then(|j| j.pages.clone()),
        });
    }

    paper
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    // ==================== Serde Deserialization Tests ====================

    #[test]
    fn test_s2_paper_deserialize_full() {
        let json = serde_json::json!({
            "paperId": "649def34f8be52c8b66281af98ae884c09aef38b",
            "externalIds": {"DOI": "10.1/abc", "ArXiv": "2301.00001", "PubMed": "12345"},
            "title": "A Great Paper",
            "abstract": "We do things.",
            "venue": "NeurIPS",
            "year": 2020,
            "authors": [{"name": "Ada Lovelace"}],
            "citationCount": 42,
            "influentialCitationCount": 7,
            "publicationTypes": ["Conference"],
            "journal": {"name": null, "volume": null, "pages": "1-10"}
        });

        let parsed: S2Paper = serde_json::from_value(json).unwrap();
        assert_eq!(parsed.title.as_deref(), Some("A Great Paper"));
        assert_eq!(parsed.citation_count, Some(42));
        assert_eq!(
            parsed.external_ids.as_ref().unwrap().doi.as_deref(),
            Some("10.1/abc")
        );
    }

    #[test]
    fn test_s2_paper_deserialize_minimal() {
        let parsed: S2Paper = serde_json::from_value(serde_json::json!({})).unwrap();
        assert!(parsed.title.is_none());
        assert!(parsed.authors.is_empty());
        assert!(parsed.external_ids.is_none());
    }

    #[test]
    fn test_parse_paper_partial_record_is_valid() {
        let data: S2Paper = serde_json::from_value(serde_json::json!({
            "title": "Sparse Record"
        }))
        .unwrap();
        let paper = parse_paper(data, DiscoverySource::Backward);
        assert_eq!(paper.title, "Sparse Record");
        assert!(paper.year.is_none());
        assert!(paper.ids.is_empty());
        assert!(paper.venue.is_none());
    }

    #[test]
    fn test_parse_paper_venue_kind_from_publication_types() {
        let data: S2Paper = serde_json::from_value(serde_json::json!({
            "title": "t",
            "venue": "ICSE",
            "publicationTypes": ["Conference", "Review"]
        }))
        .unwrap();
        let paper = parse_paper(data, DiscoverySource::Seed);
        let venue = paper.venue.unwrap();
        assert_eq!(venue.name.as_deref(), Some("ICSE"));
        assert_eq!(venue.kind.as_deref(), Some("conference"));
    }

    #[test]
    fn test_paper_descriptor_prefers_s2_id() {
        let ids = ExternalIds {
            semantic_scholar_id: Some("s2id".to_string()),
            doi: Some("10.1/abc".to_string()),
            ..ExternalIds::default()
        };
        assert_eq!(
            SemanticScholarClient::paper_descriptor(&ids).unwrap(),
            "s2id"
        );

        let doi_only = ExternalIds::from_doi("10.1/a b");
        assert_eq!(
            SemanticScholarClient::paper_descriptor(&doi_only).unwrap(),
            "DOI:10.1%2Fa%20b"
        );

        assert!(SemanticScholarClient::paper_descriptor(&ExternalIds::default()).is_none());
    }

    // ==================== Wiremock Integration Tests ====================

    fn s2_paper_json() -> serde_json::Value {
        serde_json::json!({
            "paperId": "s2-1",
            "externalIds": {"DOI": "10.1/abc"},
            "title": "Found Paper",
            "year": 2021,
            "authors": [{"name": "Grace Hopper"}],
            "citationCount": 10
        })
    }

    #[tokio::test]
    async fn test_lookup_by_doi_success() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/paper/DOI:10.1%2Fabc"))
            .respond_with(ResponseTemplate::new(200).set_body_json(s2_paper_json()))
            .mount(&server)
            .await;

        let client = SemanticScholarClient::with_base_url(None, server.uri()).unwrap();
        let paper = client
            .lookup_by_identifier(&ExternalIds::from_doi("10.1/abc"))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(paper.title, "Found Paper");
        assert_eq!(paper.year, Some(2021));
        assert_eq!(paper.ids.semantic_scholar_id.as_deref(), Some("s2-1"));
        assert_eq!(paper.authors.len(), 1);
    }

    #[tokio::test]
    async fn test_lookup_by_identifier_404_is_none() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let client = SemanticScholarClient::with_base_url(None, server.uri()).unwrap();
        let result = client
            .lookup_by_identifier(&ExternalIds::from_doi("10.1/missing"))
            .await
            .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_lookup_429_maps_to_rate_limited_with_hint() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "17"))
            .mount(&server)
            .await;

        let client = SemanticScholarClient::with_base_url(None, server.uri()).unwrap();
        let error = client
            .lookup_by_identifier(&ExternalIds::from_doi("10.1/abc"))
            .await
            .unwrap_err();
        match error {
            ProviderError::RateLimited { retry_after } => {
                assert_eq!(retry_after, Some(std::time::Duration::from_secs(17)));
            }
            other => panic!("expected RateLimited, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_lookup_503_maps_to_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let client = SemanticScholarClient::with_base_url(None, server.uri()).unwrap();
        let error = client
            .lookup_by_identifier(&ExternalIds::from_doi("10.1/abc"))
            .await
            .unwrap_err();
        assert!(matches!(error, ProviderError::Unavailable { .. }));
    }

    #[tokio::test]
    async fn test_lookup_by_title_uses_search_endpoint() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/paper/search"))
            .and(query_param("query", "found paper"))
            .and(query_param("limit", "1"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"data": [s2_paper_json()]})),
            )
            .mount(&server)
            .await;

        let client = SemanticScholarClient::with_base_url(None, server.uri()).unwrap();
        let paper = client
            .lookup_by_title("found paper", None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(paper.title, "Found Paper");
    }

    #[tokio::test]
    async fn test_lookup_by_title_empty_results_is_none() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/paper/search"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"data": []})))
            .mount(&server)
            .await;

        let client = SemanticScholarClient::with_base_url(None, server.uri()).unwrap();
        let result = client.lookup_by_title("unknown", None).await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_references_parses_cited_papers() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/paper/s2-1/references"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [
                    {"citedPaper": {"title": "Ref One", "year": 2001}},
                    {"citedPaper": null},
                    {"citedPaper": {"title": "Ref Two"}}
                ]
            })))
            .mount(&server)
            .await;

        let client = SemanticScholarClient::with_base_url(None, server.uri()).unwrap();
        let mut subject = Paper::new("Subject", DiscoverySource::Seed);
        subject.ids.semantic_scholar_id = Some("s2-1".to_string());

        let refs = client.references(&subject).await.unwrap();
        assert_eq!(refs.len(), 2);
        assert_eq!(refs[0].title, "Ref One");
        assert_eq!(refs[0].source, DiscoverySource::Backward);
    }

    #[tokio::test]
    async fn test_citations_parses_citing_papers() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/paper/s2-1/citations"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [{"citingPaper": {"title": "Citing Paper", "year": 2023}}]
            })))
            .mount(&server)
            .await;

        let client = SemanticScholarClient::with_base_url(None, server.uri()).unwrap();
        let mut subject = Paper::new("Subject", DiscoverySource::Seed);
        subject.ids.semantic_scholar_id = Some("s2-1".to_string());

        let cits = client.citations(&subject).await.unwrap();
        assert_eq!(cits.len(), 1);
        assert_eq!(cits[0].source, DiscoverySource::Forward);
    }

    #[tokio::test]
    async fn test_references_without_addressable_id_is_empty() {
        let server = MockServer::start().await;
        let client = SemanticScholarClient::with_base_url(None, server.uri()).unwrap();
        let anonymous = Paper::new("No IDs", DiscoverySource::Seed);
        let refs = client.references(&anonymous).await.unwrap();
        assert!(refs.is_empty());
    }

    #[tokio::test]
    async fn test_api_key_header_sent_when_configured() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(header("x-api-key", "secret-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(s2_paper_json()))
            .mount(&server)
            .await;

        let client =
            SemanticScholarClient::with_base_url(Some("secret-key".to_string()), server.uri())
                .unwrap();
        let paper = client
            .lookup_by_identifier(&ExternalIds::from_doi("10.1/abc"))
            .await
            .unwrap();
        assert!(paper.is_some(), "request without the key would 404");
    }
}
