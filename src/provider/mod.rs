//! Provider clients for external paper-metadata sources.
//!
//! This module provides the closed set of metadata providers the engine
//! can consult, each translating provider-specific results into canonical
//! [`Paper`] records, plus the prioritized fallback chain that
//! orchestrates them.
//!
//! # Architecture
//!
//! - [`ProviderClient`] - Async trait individual providers implement
//! - [`ProviderChain`] - Fixed-order fallback chain with field merging
//! - [`SemanticScholarClient`] - Primary citation-graph source
//! - [`CrossrefClient`] - General bibliographic source
//! - [`OpenAlexClient`] - General bibliographic source with citation edges
//! - [`ArxivClient`] - Preprint source (no citation graph), tried last

mod arxiv;
mod chain;
mod crossref;
mod error;
mod http_client;
mod openalex;
mod pacer;
mod semantic_scholar;

pub use arxiv::ArxivClient;
pub use chain::{LookupProbe, ProviderChain};
pub use crossref::CrossrefClient;
pub use error::ProviderError;
pub use http_client::{build_provider_http_client, standard_user_agent};
pub use openalex::OpenAlexClient;
pub use pacer::{RequestPacer, parse_retry_after};
pub use semantic_scholar::SemanticScholarClient;

use async_trait::async_trait;
use tracing::warn;

use crate::paper::{ExternalIds, Paper};

/// Role a provider plays in the fallback chain.
///
/// Derives `Ord` so that `CitationGraph < Bibliographic < Preprint`
/// (consult the citation-graph source first, the preprint index last).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ProviderRole {
    /// Full citation-graph coverage (references and citations).
    CitationGraph = 0,
    /// General bibliographic metadata.
    Bibliographic = 1,
    /// Preprint index without citation data.
    Preprint = 2,
}

/// Contract every metadata provider implements.
///
/// Missing optional fields never raise: partial records are valid
/// results. A record the provider does not know returns `Ok(None)`.
/// Each client paces its own requests; cross-provider fallback belongs
/// to the [`ProviderChain`].
///
/// # Object Safety
///
/// Uses `async_trait` so the chain can hold `Box<dyn ProviderClient>`.
#[async_trait]
pub trait ProviderClient: Send + Sync {
    /// Returns the provider's name (e.g. "semantic-scholar").
    fn name(&self) -> &'static str;

    /// Returns the provider's role in the chain.
    fn role(&self) -> ProviderRole;

    /// Looks up a paper by any external identifier the provider indexes.
    ///
    /// Returns `Ok(None)` when no indexed namespace is present in `ids`
    /// or the record is unknown.
    async fn lookup_by_identifier(
        &self,
        ids: &ExternalIds,
    ) -> Result<Option<Paper>, ProviderError>;

    /// Searches for a paper by title, optionally biased by a year hint.
    ///
    /// Returns the provider's best match; the chain validates the title
    /// before trusting it.
    async fn lookup_by_title(
        &self,
        title: &str,
        year_hint: Option<i32>,
    ) -> Result<Option<Paper>, ProviderError>;

    /// Returns papers referenced by the given paper (backward edges).
    async fn references(&self, paper: &Paper) -> Result<Vec<Paper>, ProviderError>;

    /// Returns papers citing the given paper (forward edges).
    async fn citations(&self, paper: &Paper) -> Result<Vec<Paper>, ProviderError>;
}

/// Options for constructing the default provider chain.
#[derive(Debug, Clone, Default)]
pub struct ProviderOptions {
    /// Semantic Scholar API key for authenticated (higher-rate) access.
    pub semantic_scholar_api_key: Option<String>,
    /// Contact email sent to Crossref and OpenAlex polite pools.
    pub mailto: Option<String>,
}

/// Builds the default provider chain in fixed priority order:
/// Semantic Scholar, Crossref, OpenAlex, arXiv.
///
/// A provider whose constructor fails is skipped with a warning; the
/// chain continues with the remaining providers.
#[must_use]
pub fn build_default_provider_chain(options: &ProviderOptions) -> ProviderChain {
    let mut chain = ProviderChain::new();

    match SemanticScholarClient::new(options.semantic_scholar_api_key.clone()) {
        Ok(client) => chain.register(Box::new(client)),
        Err(error) => warn!(
            error = %error,
            "Semantic Scholar client unavailable; continuing with remaining providers"
        ),
    }

    match CrossrefClient::new(options.mailto.clone()) {
        Ok(client) => chain.register(Box::new(client)),
        Err(error) => warn!(
            error = %error,
            "Crossref client unavailable; continuing with remaining providers"
        ),
    }

    match OpenAlexClient::new(options.mailto.clone()) {
        Ok(client) => chain.register(Box::new(client)),
        Err(error) => warn!(
            error = %error,
            "OpenAlex client unavailable; continuing with remaining providers"
        ),
    }

    match ArxivClient::new() {
        Ok(client) => chain.register(Box::new(client)),
        Err(error) => warn!(
            error = %error,
            "arXiv client unavailable; continuing without a preprint source"
        ),
    }

    chain
}
