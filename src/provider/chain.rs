//! Prioritized provider fallback chain.
//!
//! Providers are consulted in registration order. A provider that is
//! throttled gets a bounded number of retries before the chain moves on;
//! a provider that is down or lacks the capability is skipped
//! immediately. The first usable answer wins. Enrichment consults every
//! provider and merges fields first-non-null-wins.

use std::time::Duration;

use rand::Rng;
use tracing::{debug, warn};

use crate::dedup::{DEFAULT_TITLE_THRESHOLD, title_similarity};
use crate::paper::{ExternalIds, Paper};

use super::{ProviderClient, ProviderError};

/// Attempts per provider when it reports throttling.
const RATE_LIMIT_ATTEMPTS: u32 = 2;

/// Backoff before a throttled retry when no hint was published.
const RATE_LIMIT_BACKOFF: Duration = Duration::from_millis(500);

/// Upper bound on honoring a provider's retry hint.
const RATE_LIMIT_BACKOFF_CAP: Duration = Duration::from_secs(10);

/// Jitter added to every throttled-retry backoff.
const RATE_LIMIT_JITTER_MS: u64 = 250;

/// How a record is being looked up across the chain.
#[derive(Debug, Clone, Copy)]
pub enum LookupProbe<'a> {
    /// Resolve by external identifiers.
    ByIdentifier(&'a ExternalIds),
    /// Resolve by title search, optionally biased by a year hint.
    ByTitle {
        /// Title to search for.
        title: &'a str,
        /// Publication year, when known.
        year_hint: Option<i32>,
    },
    /// Resolve a partial record: identifiers when present, otherwise a
    /// title search hinted by the record's year.
    ByPaper(&'a Paper),
}

/// Ordered collection of metadata providers with fallback semantics.
pub struct ProviderChain {
    providers: Vec<Box<dyn ProviderClient>>,
    title_threshold: f64,
}

impl Default for ProviderChain {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ProviderChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.providers.iter().map(|p| p.name()).collect();
        f.debug_struct("ProviderChain")
            .field("providers", &names)
            .finish_non_exhaustive()
    }
}

impl ProviderChain {
    /// Creates an empty chain.
    #[must_use]
    pub fn new() -> Self {
        Self {
            providers: Vec::new(),
            title_threshold: DEFAULT_TITLE_THRESHOLD,
        }
    }

    /// Appends a provider at the lowest priority position.
    pub fn register(&mut self, provider: Box<dyn ProviderClient>) {
        debug!(provider = provider.name(), "Registered provider");
        self.providers.push(provider);
    }

    /// Returns the number of registered providers.
    #[must_use]
    pub fn provider_count(&self) -> usize {
        self.providers.len()
    }

    /// Returns `true` when no providers are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// Resolves a record through the chain; the first provider returning
    /// a match wins. Title-search matches are only trusted when the
    /// returned title is close enough to the query.
    ///
    /// # Errors
    ///
    /// Returns the last [`ProviderError`] only when every provider
    /// failed; an unknown record is `Ok(None)`.
    pub async fn identify(&self, probe: LookupProbe<'_>) -> Result<Option<Paper>, ProviderError> {
        let mut last_error: Option<ProviderError> = None;
        let mut answered = false;

        for provider in &self.providers {
            let outcome = self
                .with_rate_limit_retry(provider.name(), || async move {
                    match probe {
                        LookupProbe::ByIdentifier(ids) => provider.lookup_by_identifier(ids).await,
                        LookupProbe::ByTitle { title, year_hint } => {
                            provider.lookup_by_title(title, year_hint).await
                        }
                        LookupProbe::ByPaper(paper) => {
                            if paper.ids.is_empty() {
                                provider.lookup_by_title(&paper.title, paper.year).await
                            } else {
                                provider.lookup_by_identifier(&paper.ids).await
                            }
                        }
                    }
                })
                .await;

            match outcome {
                Ok(Some(found)) => {
                    if let Some(query_title) = probe_title(&probe) {
                        let score = title_similarity(query_title, &found.title);
                        if score < self.title_threshold {
                            debug!(
                                provider = provider.name(),
                                score, "Search result title too dissimilar; trying next provider"
                            );
                            answered = true;
                            continue;
                        }
                    }
                    debug!(provider = provider.name(), "Provider resolved record");
                    return Ok(Some(found));
                }
                Ok(None) => answered = true,
                Err(error) => {
                    warn!(
                        provider = provider.name(),
                        error = %error,
                        "Provider lookup failed; trying next provider"
                    );
                    last_error = Some(error);
                }
            }
        }

        match last_error {
            Some(error) if !answered => Err(error),
            _ => Ok(None),
        }
    }

    /// Fetches backward edges (papers the given paper references).
    ///
    /// The first provider returning a non-empty list wins; providers
    /// without citation data are skipped.
    ///
    /// # Errors
    ///
    /// Returns the last [`ProviderError`] only when every capable
    /// provider failed.
    pub async fn references(&self, paper: &Paper) -> Result<Vec<Paper>, ProviderError> {
        self.edges(paper, "references", |provider, paper| {
            Box::pin(provider.references(paper))
        })
        .await
    }

    /// Fetches forward edges (papers citing the given paper).
    ///
    /// # Errors
    ///
    /// Returns the last [`ProviderError`] only when every capable
    /// provider failed.
    pub async fn citations(&self, paper: &Paper) -> Result<Vec<Paper>, ProviderError> {
        self.edges(paper, "citations", |provider, paper| {
            Box::pin(provider.citations(paper))
        })
        .await
    }

    async fn edges<'a, F>(
        &'a self,
        paper: &'a Paper,
        kind: &'static str,
        fetch: F,
    ) -> Result<Vec<Paper>, ProviderError>
    where
        F: Fn(
            &'a dyn ProviderClient,
            &'a Paper,
        ) -> std::pin::Pin<
            Box<dyn std::future::Future<Output = Result<Vec<Paper>, ProviderError>> + Send + 'a>,
        >,
    {
        let mut last_error: Option<ProviderError> = None;
        let mut answered = false;

        for provider in &self.providers {
            let outcome = self
                .with_rate_limit_retry(provider.name(), || fetch(provider.as_ref(), paper))
                .await;

            match outcome {
                Ok(edges) if !edges.is_empty() => {
                    debug!(
                        provider = provider.name(),
                        count = edges.len(),
                        kind,
                        "Provider returned edges"
                    );
                    return Ok(edges);
                }
                Ok(_) => answered = true,
                Err(ProviderError::NotSupported { .. }) => {
                    debug!(provider = provider.name(), kind, "Provider lacks edge data");
                }
                Err(error) => {
                    warn!(
                        provider = provider.name(),
                        error = %error,
                        kind,
                        "Provider edge query failed; trying next provider"
                    );
                    last_error = Some(error);
                }
            }
        }

        match last_error {
            Some(error) if !answered => Err(error),
            _ => Ok(Vec::new()),
        }
    }

    /// Enriches a record by consulting every provider in chain order and
    /// merging missing fields first-non-null-wins.
    pub async fn enrich(&self, paper: &mut Paper) {
        if paper.ids.is_empty() {
            return;
        }
        for provider in &self.providers {
            let outcome = self
                .with_rate_limit_retry(provider.name(), || {
                    provider.lookup_by_identifier(&paper.ids)
                })
                .await;
            match outcome {
                Ok(Some(found)) => paper.absorb(&found),
                Ok(None) => {}
                Err(error) => {
                    debug!(
                        provider = provider.name(),
                        error = %error,
                        "Enrichment lookup failed; continuing"
                    );
                }
            }
        }
    }

    /// Runs one provider call with bounded retries on throttling.
    ///
    /// Retries honor the provider's backoff hint (capped), fall back to a
    /// fixed delay otherwise, and always add jitter.
    async fn with_rate_limit_retry<T, F, Fut>(
        &self,
        provider_name: &str,
        call: F,
    ) -> Result<T, ProviderError>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T, ProviderError>>,
    {
        let mut attempt = 1u32;
        loop {
            match call().await {
                Err(ProviderError::RateLimited { retry_after }) if attempt < RATE_LIMIT_ATTEMPTS => {
                    let base = retry_after
                        .map_or(RATE_LIMIT_BACKOFF, |hint| hint.min(RATE_LIMIT_BACKOFF_CAP));
                    let jitter =
                        Duration::from_millis(rand::thread_rng().gen_range(0..=RATE_LIMIT_JITTER_MS));
                    let delay = base + jitter;
                    debug!(
                        provider = provider_name,
                        attempt,
                        delay_ms = delay.as_millis(),
                        "Provider throttled; backing off before retry"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }
}

/// Title to validate a search hit against, when the probe was by title.
fn probe_title<'a>(probe: &LookupProbe<'a>) -> Option<&'a str> {
    match probe {
        LookupProbe::ByTitle { title, .. } => Some(title),
        LookupProbe::ByPaper(paper) if paper.ids.is_empty() => Some(&paper.title),
        _ => None,
    }
}
