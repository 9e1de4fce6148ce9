//! The snowball iteration engine.
//!
//! Ties the other components together: seeds enter through the provider
//! chain, iterations expand the frontier's reference lists and citing
//! papers concurrently, and every discovered candidate flows through
//! reconciliation and screening before it is written to the store.
//!
//! # Iteration model
//!
//! The frontier of iteration N is every included record discovered at
//! iteration N. Expanding it yields candidates stamped with iteration
//! N + 1. An iteration commits by appending its statistics to the
//! project and advancing the iteration counter; a cancelled or failed
//! run commits nothing to the project, and re-running it is safe because
//! already-stored discoveries reconcile as merges.

mod error;

pub use error::EngineError;

use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures_util::StreamExt;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::dedup::{DedupConfig, Deduplicator, Reconciliation};
use crate::filter::{self, FilterDecision};
use crate::paper::{
    Author, DiscoverySource, ExclusionKind, ExternalIds, Paper, PaperId, ReviewStatus,
};
use crate::project::{IterationStats, Project};
use crate::provider::{LookupProbe, ProviderChain};
use crate::store::{RecordStore, StoreError};

/// Default number of frontier papers expanded concurrently.
pub const DEFAULT_CONCURRENCY: usize = 4;

/// Which citation edges an iteration follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Reference lists only.
    Backward,
    /// Citing papers only.
    Forward,
    /// Both edge kinds.
    Both,
}

impl Direction {
    /// Returns the stable string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Backward => "backward",
            Self::Forward => "forward",
            Self::Both => "both",
        }
    }

    fn includes_backward(self) -> bool {
        matches!(self, Self::Backward | Self::Both)
    }

    fn includes_forward(self) -> bool {
        matches!(self, Self::Forward | Self::Both)
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "backward" => Ok(Self::Backward),
            "forward" => Ok(Self::Forward),
            "both" => Ok(Self::Both),
            _ => Err(format!("invalid direction: {s}")),
        }
    }
}

/// Engine tunables.
#[derive(Debug, Clone, Copy)]
pub struct EngineConfig {
    /// Frontier papers expanded concurrently per iteration.
    pub concurrency: usize,
    /// Identity-equivalence tunables.
    pub dedup: DedupConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            dedup: DedupConfig::default(),
        }
    }
}

/// Manually supplied seed metadata, for papers without a known DOI.
#[derive(Debug, Clone, Default)]
pub struct SeedMetadata {
    /// Paper title.
    pub title: String,
    /// DOI, when known.
    pub doi: Option<String>,
    /// arXiv ID, when known.
    pub arxiv_id: Option<String>,
    /// Publication year, when known.
    pub year: Option<i32>,
    /// Author display names.
    pub authors: Vec<String>,
}

/// Cooperative cancellation flag for long-running iterations.
///
/// Cloned handles share the flag; cancelling any one of them stops the
/// run at the next per-paper boundary.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle {
    flag: Arc<AtomicBool>,
}

impl CancelHandle {
    /// Creates an uncancelled handle.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// True once cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Clears the flag so the handle can drive another run.
    pub fn reset(&self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

/// Citation-snowballing engine over a record store and a provider chain.
pub struct SnowballEngine<S: RecordStore> {
    store: Arc<S>,
    chain: ProviderChain,
    dedup: Deduplicator,
    config: EngineConfig,
    // Single-writer discipline: all store writes of an iteration happen
    // under this lock, so concurrent expansion can never race
    // reconciliation decisions.
    reconcile_lock: Mutex<()>,
    cancel: CancelHandle,
}

impl<S: RecordStore> std::fmt::Debug for SnowballEngine<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnowballEngine")
            .field("chain", &self.chain)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<S: RecordStore> SnowballEngine<S> {
    /// Creates an engine with default configuration.
    pub fn new(store: Arc<S>, chain: ProviderChain) -> Self {
        Self::with_config(store, chain, EngineConfig::default())
    }

    /// Creates an engine with explicit configuration.
    pub fn with_config(store: Arc<S>, chain: ProviderChain, config: EngineConfig) -> Self {
        Self {
            store,
            chain,
            dedup: Deduplicator::new(config.dedup),
            config,
            reconcile_lock: Mutex::new(()),
            cancel: CancelHandle::new(),
        }
    }

    /// Returns a handle that can cancel a running iteration.
    #[must_use]
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Resolves a DOI through the provider chain and stores it as an
    /// included seed at iteration 0.
    ///
    /// Re-adding a known seed merges instead of duplicating: the stored
    /// record keeps its identity and status, gains any new fields, and
    /// its observation count grows.
    ///
    /// # Errors
    ///
    /// [`EngineError::SeedNotFound`] when no provider knows the DOI,
    /// [`EngineError::Provider`] when every provider failed, or
    /// [`EngineError::Store`] on storage faults.
    #[tracing::instrument(skip(self, project))]
    pub async fn add_seed_from_doi(
        &self,
        project: &mut Project,
        doi: &str,
    ) -> Result<Paper, EngineError> {
        let ids = ExternalIds::from_doi(doi);
        let Some(mut paper) = self.chain.identify(LookupProbe::ByIdentifier(&ids)).await? else {
            return Err(EngineError::seed_not_found(doi));
        };
        // The provider indexed this DOI even if it did not echo it back.
        if paper.ids.doi.is_none() {
            paper.ids.doi = Some(doi.to_string());
        }
        self.finish_seed(project, paper).await
    }

    /// Stores manually supplied metadata as an included seed, resolving
    /// it to a canonical record through the provider chain when possible.
    ///
    /// # Errors
    ///
    /// [`EngineError::UnidentifiableSeed`] when the metadata has neither
    /// an identifier nor a usable title, or [`EngineError::Store`] on
    /// storage faults.
    #[tracing::instrument(skip(self, project, seed), fields(title = %seed.title))]
    pub async fn add_seed_from_metadata(
        &self,
        project: &mut Project,
        seed: SeedMetadata,
    ) -> Result<Paper, EngineError> {
        let mut local = Paper::new(seed.title, DiscoverySource::Seed);
        local.ids.doi = seed.doi;
        local.ids.arxiv_id = seed.arxiv_id;
        local.year = seed.year;
        local.authors = seed.authors.into_iter().map(Author::named).collect();
        if local.is_unidentifiable() {
            return Err(EngineError::UnidentifiableSeed);
        }

        // A resolution failure degrades to storing the local metadata;
        // the record can still be enriched on a later pass.
        let paper = match self.chain.identify(LookupProbe::ByPaper(&local)).await {
            Ok(Some(mut found)) => {
                found.source = DiscoverySource::Seed;
                found.absorb(&local);
                found
            }
            Ok(None) => local,
            Err(error) => {
                warn!(error = %error, "Seed resolution failed; storing local metadata");
                local
            }
        };

        self.finish_seed(project, paper).await
    }

    /// Enriches, reconciles, and stores a resolved seed record.
    async fn finish_seed(
        &self,
        project: &mut Project,
        mut paper: Paper,
    ) -> Result<Paper, EngineError> {
        self.chain.enrich(&mut paper).await;
        paper.source = DiscoverySource::Seed;
        paper.snowball_iteration = 0;

        let _guard = self.reconcile_lock.lock().await;
        let stored = match self.dedup.reconcile(self.store.as_ref(), paper)? {
            Reconciliation::Merged(merged) => merged,
            Reconciliation::New(mut fresh) => {
                fresh.set_status(ReviewStatus::Included, Some("seed paper".to_string()));
                fresh
            }
            Reconciliation::Unidentifiable => return Err(EngineError::UnidentifiableSeed),
        };
        self.store.upsert(&stored)?;
        project.record_seed(stored.id.clone());
        info!(id = %stored.id, title = %stored.title, "Seed stored");
        Ok(stored)
    }

    /// The frontier of the project's current iteration: included records
    /// discovered at that iteration.
    fn frontier(&self, project: &Project) -> Result<Vec<Paper>, EngineError> {
        let frontier = self
            .store
            .list_by_status(ReviewStatus::Included)?
            .into_iter()
            .filter(|p| p.snowball_iteration == project.current_iteration)
            .collect();
        Ok(frontier)
    }

    /// Runs one snowball iteration over the current frontier.
    ///
    /// Frontier papers are expanded concurrently (bounded by the
    /// configured concurrency); discovered candidates are reconciled and
    /// screened sequentially under the write lock. A provider failure on
    /// one paper, or a store failure on one record's commit, is recorded
    /// in the statistics and does not abort the run. On success the
    /// statistics are committed to the project and the iteration counter
    /// advances.
    ///
    /// # Errors
    ///
    /// [`EngineError::Cancelled`] when the run was cancelled; store
    /// writes made before the cancellation point are kept, but the
    /// project is not advanced, so re-running the iteration completes it
    /// (rediscoveries merge). [`EngineError::Store`] when the frontier
    /// itself cannot be read.
    #[tracing::instrument(skip(self, project), fields(iteration = project.current_iteration))]
    pub async fn run_iteration(
        &self,
        project: &mut Project,
        direction: Direction,
    ) -> Result<IterationStats, EngineError> {
        let iteration = project.current_iteration;
        let next_iteration = iteration + 1;
        let mut stats = IterationStats::begin(iteration);

        let frontier = self.frontier(project)?;
        info!(
            iteration,
            frontier = frontier.len(),
            %direction,
            "Starting snowball iteration"
        );

        let expansions: Vec<Option<Expansion>> = futures_util::stream::iter(frontier.iter())
            .map(|paper| async move {
                if self.cancel.is_cancelled() {
                    return None;
                }
                Some(self.expand_paper(paper, direction).await)
            })
            .buffer_unordered(self.config.concurrency.max(1))
            .collect()
            .await;

        let cancelled = expansions.iter().any(Option::is_none);

        let _guard = self.reconcile_lock.lock().await;
        for expansion in expansions.into_iter().flatten() {
            stats.errors.extend(expansion.errors);
            for mut candidate in expansion.candidates {
                stats.discovered += 1;
                let source = candidate.source;
                let title = candidate.title.clone();
                candidate.snowball_iteration = next_iteration;
                candidate.source_paper_ids = vec![expansion.origin.clone()];

                match self.dedup.reconcile(self.store.as_ref(), candidate) {
                    Ok(Reconciliation::Unidentifiable) => stats.unidentifiable += 1,
                    Ok(Reconciliation::Merged(merged)) => match self.store.upsert(&merged) {
                        Ok(()) => stats.merged += 1,
                        Err(error) => note_store_failure(&mut stats, &merged.title, &error),
                    },
                    Ok(Reconciliation::New(mut paper)) => {
                        let decision = filter::evaluate(&paper, &project.criteria);
                        if let FilterDecision::Rejected(rule) = &decision {
                            paper.set_status(
                                ReviewStatus::Excluded,
                                Some(rule.as_str().to_string()),
                            );
                            paper.exclusion = Some(ExclusionKind::Auto);
                        }
                        match self.store.upsert(&paper) {
                            Ok(()) => {
                                stats.added += 1;
                                match source {
                                    DiscoverySource::Backward => stats.backward += 1,
                                    DiscoverySource::Forward => stats.forward += 1,
                                    DiscoverySource::Seed => {}
                                }
                                match decision {
                                    FilterDecision::Accepted => stats.for_review += 1,
                                    FilterDecision::Rejected(_) => stats.auto_excluded += 1,
                                }
                            }
                            Err(error) => note_store_failure(&mut stats, &paper.title, &error),
                        }
                    }
                    Err(error) => note_store_failure(&mut stats, &title, &error),
                }
            }
        }

        if cancelled {
            warn!(iteration, "Iteration cancelled; partial discoveries kept");
            return Err(EngineError::Cancelled);
        }

        info!(
            iteration,
            discovered = stats.discovered,
            added = stats.added,
            merged = stats.merged,
            auto_excluded = stats.auto_excluded,
            "Iteration committed"
        );
        project.iteration_stats.push(stats.clone());
        project.current_iteration = next_iteration;
        Ok(stats)
    }

    /// Expands one frontier paper in the requested directions.
    ///
    /// Failures become per-paper error messages rather than aborting the
    /// iteration.
    async fn expand_paper(&self, paper: &Paper, direction: Direction) -> Expansion {
        let mut expansion = Expansion {
            origin: paper.id.clone(),
            candidates: Vec::new(),
            errors: Vec::new(),
        };

        if direction.includes_backward() {
            match self.chain.references(paper).await {
                Ok(refs) => expansion.candidates.extend(refs),
                Err(error) => expansion
                    .errors
                    .push(format!("references of '{}': {error}", paper.title)),
            }
        }
        if direction.includes_forward() {
            match self.chain.citations(paper).await {
                Ok(cits) => expansion.candidates.extend(cits),
                Err(error) => expansion
                    .errors
                    .push(format!("citations of '{}': {error}", paper.title)),
            }
        }

        debug!(
            paper = %paper.id,
            candidates = expansion.candidates.len(),
            "Expanded frontier paper"
        );
        expansion
    }

    /// Whether another iteration is worth running: the iteration cap
    /// (when one is set) is not reached, the last committed iteration
    /// added records, and the next frontier is non-empty.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Store`] when the corpus cannot be read.
    pub fn should_continue(&self, project: &Project) -> Result<bool, EngineError> {
        if project
            .max_iterations
            .is_some_and(|cap| project.current_iteration >= cap)
        {
            return Ok(false);
        }
        if project
            .latest_stats()
            .is_some_and(IterationStats::is_exhausted)
        {
            return Ok(false);
        }
        Ok(!self.frontier(project)?.is_empty())
    }

    /// Applies a reviewer decision to a stored record.
    ///
    /// An exclusion through this path is marked manual, distinguishing it
    /// from filter rejections.
    ///
    /// # Errors
    ///
    /// [`EngineError::PaperNotFound`] for an unknown id, or
    /// [`EngineError::Store`] on storage faults.
    pub fn update_review(
        &self,
        id: &PaperId,
        status: ReviewStatus,
        note: Option<String>,
    ) -> Result<Paper, EngineError> {
        let Some(mut paper) = self.store.get(id)? else {
            return Err(EngineError::paper_not_found(id.clone()));
        };
        paper.set_status(status, note);
        if status == ReviewStatus::Excluded {
            paper.exclusion = Some(ExclusionKind::Manual);
        }
        self.store.upsert(&paper)?;
        debug!(id = %paper.id, status = %status, "Review decision recorded");
        Ok(paper)
    }

    /// Pending records awaiting review, most-cited first (unknown counts
    /// last), optionally restricted to one discovery iteration.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Store`] when the corpus cannot be read.
    pub fn papers_for_review(
        &self,
        iteration: Option<u32>,
    ) -> Result<Vec<Paper>, EngineError> {
        let mut pending = self.store.list_by_status(ReviewStatus::Pending)?;
        if let Some(iteration) = iteration {
            pending.retain(|p| p.snowball_iteration == iteration);
        }
        pending.sort_by(|a, b| {
            b.citation_count
                .unwrap_or(0)
                .cmp(&a.citation_count.unwrap_or(0))
                .then_with(|| a.title.cmp(&b.title))
        });
        Ok(pending)
    }
}

/// What expanding one frontier paper produced.
struct Expansion {
    origin: PaperId,
    candidates: Vec<Paper>,
    errors: Vec<String>,
}

/// Records a failed record commit; the iteration carries on.
fn note_store_failure(stats: &mut IterationStats, title: &str, error: &StoreError) {
    warn!(%error, title, "Record commit failed");
    stats.errors.push(format!("storing '{title}': {error}"));
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::HashMap;

    use async_trait::async_trait;

    use super::*;
    use crate::provider::{ProviderClient, ProviderError, ProviderRole};
    use crate::store::MemoryStore;

    // ==================== Test Fixtures ====================

    /// Provider with canned answers keyed by DOI.
    #[derive(Default)]
    struct CannedProvider {
        papers: HashMap<String, Paper>,
        references: HashMap<String, Vec<Paper>>,
        citations: HashMap<String, Vec<Paper>>,
    }

    impl CannedProvider {
        fn with_paper(mut self, paper: Paper) -> Self {
            let doi = paper.ids.doi.clone().unwrap();
            self.papers.insert(doi, paper);
            self
        }

        fn with_references(mut self, doi: &str, refs: Vec<Paper>) -> Self {
            self.references.insert(doi.to_string(), refs);
            self
        }

        fn with_citations(mut self, doi: &str, cits: Vec<Paper>) -> Self {
            self.citations.insert(doi.to_string(), cits);
            self
        }
    }

    #[async_trait]
    impl ProviderClient for CannedProvider {
        fn name(&self) -> &'static str {
            "canned"
        }

        fn role(&self) -> ProviderRole {
            ProviderRole::CitationGraph
        }

        async fn lookup_by_identifier(
            &self,
            ids: &ExternalIds,
        ) -> Result<Option<Paper>, ProviderError> {
            Ok(ids
                .doi
                .as_ref()
                .and_then(|doi| self.papers.get(doi))
                .cloned())
        }

        async fn lookup_by_title(
            &self,
            title: &str,
            _year_hint: Option<i32>,
        ) -> Result<Option<Paper>, ProviderError> {
            Ok(self.papers.values().find(|p| p.title == title).cloned())
        }

        async fn references(&self, paper: &Paper) -> Result<Vec<Paper>, ProviderError> {
            Ok(paper
                .ids
                .doi
                .as_ref()
                .and_then(|doi| self.references.get(doi))
                .cloned()
                .unwrap_or_default())
        }

        async fn citations(&self, paper: &Paper) -> Result<Vec<Paper>, ProviderError> {
            Ok(paper
                .ids
                .doi
                .as_ref()
                .and_then(|doi| self.citations.get(doi))
                .cloned()
                .unwrap_or_default())
        }
    }

    fn paper_with_doi(title: &str, doi: &str, source: DiscoverySource) -> Paper {
        let mut paper = Paper::new(title, source);
        paper.ids.doi = Some(doi.to_string());
        paper.year = Some(2020);
        paper
    }

    fn engine_with(provider: CannedProvider) -> (SnowballEngine<MemoryStore>, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let mut chain = ProviderChain::new();
        chain.register(Box::new(provider));
        (SnowballEngine::new(Arc::clone(&store), chain), store)
    }

    /// Stores an included seed at iteration 0 and records it on the
    /// project.
    fn plant_seed(store: &MemoryStore, project: &mut Project, title: &str, doi: &str) -> Paper {
        let mut seed = paper_with_doi(title, doi, DiscoverySource::Seed);
        seed.set_status(ReviewStatus::Included, Some("seed paper".to_string()));
        store.upsert(&seed).unwrap();
        project.record_seed(seed.id.clone());
        seed
    }

    // ==================== Direction Tests ====================

    #[test]
    fn test_direction_round_trip() {
        for direction in [Direction::Backward, Direction::Forward, Direction::Both] {
            assert_eq!(
                direction.as_str().parse::<Direction>().unwrap(),
                direction
            );
        }
        assert!("sideways".parse::<Direction>().is_err());
    }

    // ==================== Seeding Tests ====================

    #[tokio::test]
    async fn test_add_seed_from_doi() {
        let provider = CannedProvider::default().with_paper(paper_with_doi(
            "Seed Paper",
            "10.1/seed",
            DiscoverySource::Seed,
        ));
        let (engine, store) = engine_with(provider);
        let mut project = Project::new("p");

        let stored = engine
            .add_seed_from_doi(&mut project, "10.1/seed")
            .await
            .unwrap();

        assert_eq!(stored.status, ReviewStatus::Included);
        assert_eq!(stored.snowball_iteration, 0);
        assert_eq!(project.seed_paper_ids, vec![stored.id.clone()]);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_add_seed_unknown_doi_fails() {
        let (engine, _store) = engine_with(CannedProvider::default());
        let mut project = Project::new("p");

        let error = engine
            .add_seed_from_doi(&mut project, "10.1/missing")
            .await
            .unwrap_err();
        assert!(matches!(error, EngineError::SeedNotFound { .. }));
        assert!(project.seed_paper_ids.is_empty());
    }

    #[tokio::test]
    async fn test_readding_seed_merges() {
        let provider = CannedProvider::default().with_paper(paper_with_doi(
            "Seed Paper",
            "10.1/seed",
            DiscoverySource::Seed,
        ));
        let (engine, store) = engine_with(provider);
        let mut project = Project::new("p");

        let first = engine
            .add_seed_from_doi(&mut project, "10.1/seed")
            .await
            .unwrap();
        let second = engine
            .add_seed_from_doi(&mut project, "10.1/seed")
            .await
            .unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.observation_count, 2);
        assert_eq!(store.len(), 1);
        assert_eq!(project.seed_paper_ids.len(), 1);
    }

    #[tokio::test]
    async fn test_add_seed_from_metadata_resolves_canonical_record() {
        let mut canonical =
            paper_with_doi("A Canonical Title", "10.1/known", DiscoverySource::Seed);
        canonical.citation_count = Some(12);
        let provider = CannedProvider::default().with_paper(canonical);
        let (engine, _store) = engine_with(provider);
        let mut project = Project::new("p");

        let seed = SeedMetadata {
            title: "A Canonical Title".to_string(),
            year: Some(2020),
            ..SeedMetadata::default()
        };
        let stored = engine
            .add_seed_from_metadata(&mut project, seed)
            .await
            .unwrap();

        assert_eq!(stored.ids.doi.as_deref(), Some("10.1/known"));
        assert_eq!(stored.citation_count, Some(12));
        assert_eq!(stored.status, ReviewStatus::Included);
    }

    #[tokio::test]
    async fn test_add_seed_from_metadata_unresolvable_still_stores() {
        let (engine, store) = engine_with(CannedProvider::default());
        let mut project = Project::new("p");

        let seed = SeedMetadata {
            title: "Unindexed Workshop Paper".to_string(),
            year: Some(2019),
            ..SeedMetadata::default()
        };
        let stored = engine
            .add_seed_from_metadata(&mut project, seed)
            .await
            .unwrap();
        assert_eq!(stored.title, "Unindexed Workshop Paper");
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_add_seed_from_metadata_unidentifiable_fails() {
        let (engine, _store) = engine_with(CannedProvider::default());
        let mut project = Project::new("p");

        let error = engine
            .add_seed_from_metadata(&mut project, SeedMetadata::default())
            .await
            .unwrap_err();
        assert!(matches!(error, EngineError::UnidentifiableSeed));
    }

    // ==================== Iteration Tests ====================

    #[tokio::test]
    async fn test_backward_iteration_adds_references() {
        let provider = CannedProvider::default().with_references(
            "10.1/seed",
            vec![
                paper_with_doi("Ref One", "10.1/r1", DiscoverySource::Backward),
                paper_with_doi("Ref Two", "10.1/r2", DiscoverySource::Backward),
            ],
        );
        let (engine, store) = engine_with(provider);
        let mut project = Project::new("p");
        let seed = plant_seed(&store, &mut project, "Seed Paper", "10.1/seed");

        let stats = engine
            .run_iteration(&mut project, Direction::Backward)
            .await
            .unwrap();

        assert_eq!(stats.discovered, 2);
        assert_eq!(stats.added, 2);
        assert_eq!(stats.backward, 2);
        assert_eq!(stats.forward, 0);
        assert_eq!(stats.for_review, 2);
        assert_eq!(project.current_iteration, 1);
        assert_eq!(project.iteration_stats.len(), 1);
        assert_eq!(store.len(), 3);

        let pending = engine.papers_for_review(None).unwrap();
        assert_eq!(pending.len(), 2);
        assert!(pending
            .iter()
            .all(|p| p.snowball_iteration == 1 && p.source_paper_ids == vec![seed.id.clone()]));
    }

    #[tokio::test]
    async fn test_both_directions_counts_edges_separately() {
        let provider = CannedProvider::default()
            .with_references(
                "10.1/seed",
                vec![paper_with_doi("Ref", "10.1/r1", DiscoverySource::Backward)],
            )
            .with_citations(
                "10.1/seed",
                vec![paper_with_doi("Citing", "10.1/c1", DiscoverySource::Forward)],
            );
        let (engine, store) = engine_with(provider);
        let mut project = Project::new("p");
        plant_seed(&store, &mut project, "Seed Paper", "10.1/seed");

        let stats = engine
            .run_iteration(&mut project, Direction::Both)
            .await
            .unwrap();
        assert_eq!(stats.backward, 1);
        assert_eq!(stats.forward, 1);
        assert_eq!(stats.added, 2);
    }

    #[tokio::test]
    async fn test_shared_reference_merges_once() {
        // Two seeds citing the same paper: one insert, one merge.
        let shared = paper_with_doi("Shared Ref", "10.1/shared", DiscoverySource::Backward);
        let provider = CannedProvider::default()
            .with_references("10.1/s1", vec![shared.clone()])
            .with_references("10.1/s2", vec![shared]);
        let (engine, store) = engine_with(provider);
        let mut project = Project::new("p");
        let seed_a = plant_seed(&store, &mut project, "Seed A", "10.1/s1");
        let seed_b = plant_seed(&store, &mut project, "Seed B", "10.1/s2");

        let stats = engine
            .run_iteration(&mut project, Direction::Backward)
            .await
            .unwrap();

        assert_eq!(stats.discovered, 2);
        assert_eq!(stats.added, 1);
        assert_eq!(stats.merged, 1);
        assert_eq!(store.len(), 3);

        let stored = store
            .find_by_any_identifier(&ExternalIds::from_doi("10.1/shared"))
            .unwrap()
            .unwrap();
        assert_eq!(stored.observation_count, 2);
        assert!(stored.source_paper_ids.contains(&seed_a.id));
        assert!(stored.source_paper_ids.contains(&seed_b.id));
    }

    #[tokio::test]
    async fn test_rerunning_iteration_only_bumps_observations() {
        let provider = CannedProvider::default().with_references(
            "10.1/seed",
            vec![paper_with_doi("Ref", "10.1/r1", DiscoverySource::Backward)],
        );
        let (engine, store) = engine_with(provider);
        let mut project = Project::new("p");
        plant_seed(&store, &mut project, "Seed Paper", "10.1/seed");

        engine
            .run_iteration(&mut project, Direction::Backward)
            .await
            .unwrap();
        let first = store
            .find_by_any_identifier(&ExternalIds::from_doi("10.1/r1"))
            .unwrap()
            .unwrap();

        // Simulate a crash before commit: same frontier runs again.
        project.current_iteration = 0;
        let stats = engine
            .run_iteration(&mut project, Direction::Backward)
            .await
            .unwrap();

        assert_eq!(stats.added, 0);
        assert_eq!(stats.merged, 1);
        let second = store
            .find_by_any_identifier(&ExternalIds::from_doi("10.1/r1"))
            .unwrap()
            .unwrap();
        assert_eq!(second.id, first.id);
        assert_eq!(second.observation_count, first.observation_count + 1);
        assert_eq!(second.status, first.status);
        assert_eq!(second.snowball_iteration, first.snowball_iteration);
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn test_rediscovered_excluded_record_keeps_its_status() {
        let mut excluded = paper_with_doi("Rejected Ref", "10.1/dup", DiscoverySource::Backward);
        excluded.set_status(ReviewStatus::Excluded, Some("off-topic".to_string()));
        excluded.exclusion = Some(ExclusionKind::Manual);
        let provider = CannedProvider::default().with_references(
            "10.1/seed",
            vec![
                paper_with_doi("Fresh Ref", "10.1/fresh", DiscoverySource::Backward),
                paper_with_doi("Rejected Ref", "10.1/dup", DiscoverySource::Backward),
            ],
        );
        let (engine, store) = engine_with(provider);
        store.upsert(&excluded).unwrap();
        let mut project = Project::new("p");
        plant_seed(&store, &mut project, "Seed Paper", "10.1/seed");

        let stats = engine
            .run_iteration(&mut project, Direction::Backward)
            .await
            .unwrap();

        assert_eq!(stats.discovered, 2);
        assert_eq!(stats.added, 1);
        assert_eq!(stats.merged, 1);
        assert_eq!(stats.backward, 1);

        let kept = store
            .find_by_any_identifier(&ExternalIds::from_doi("10.1/dup"))
            .unwrap()
            .unwrap();
        assert_eq!(kept.id, excluded.id);
        assert_eq!(kept.status, ReviewStatus::Excluded);
        assert_eq!(kept.exclusion, Some(ExclusionKind::Manual));
        assert_eq!(kept.observation_count, excluded.observation_count + 1);
    }

    #[tokio::test]
    async fn test_iteration_applies_filter_criteria() {
        let mut old = paper_with_doi("Old Ref", "10.1/old", DiscoverySource::Backward);
        old.year = Some(1999);
        let provider = CannedProvider::default().with_references(
            "10.1/seed",
            vec![
                old,
                paper_with_doi("Recent Ref", "10.1/new", DiscoverySource::Backward),
            ],
        );
        let (engine, store) = engine_with(provider);
        let mut project = Project::new("p");
        project.criteria.min_year = Some(2010);
        plant_seed(&store, &mut project, "Seed Paper", "10.1/seed");

        let stats = engine
            .run_iteration(&mut project, Direction::Backward)
            .await
            .unwrap();

        assert_eq!(stats.added, 2);
        assert_eq!(stats.auto_excluded, 1);
        assert_eq!(stats.for_review, 1);

        let rejected = store
            .find_by_any_identifier(&ExternalIds::from_doi("10.1/old"))
            .unwrap()
            .unwrap();
        assert_eq!(rejected.status, ReviewStatus::Excluded);
        assert_eq!(rejected.exclusion, Some(ExclusionKind::Auto));
        assert!(!rejected.status_history.is_empty());
    }

    #[tokio::test]
    async fn test_unidentifiable_candidates_never_stored() {
        let provider = CannedProvider::default().with_references(
            "10.1/seed",
            vec![Paper::new("", DiscoverySource::Backward)],
        );
        let (engine, store) = engine_with(provider);
        let mut project = Project::new("p");
        plant_seed(&store, &mut project, "Seed Paper", "10.1/seed");

        let stats = engine
            .run_iteration(&mut project, Direction::Backward)
            .await
            .unwrap();
        assert_eq!(stats.unidentifiable, 1);
        assert_eq!(stats.added, 0);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_run_does_not_commit_project() {
        let provider = CannedProvider::default().with_references(
            "10.1/seed",
            vec![paper_with_doi("Ref", "10.1/r1", DiscoverySource::Backward)],
        );
        let (engine, store) = engine_with(provider);
        let mut project = Project::new("p");
        plant_seed(&store, &mut project, "Seed Paper", "10.1/seed");

        engine.cancel_handle().cancel();
        let error = engine
            .run_iteration(&mut project, Direction::Backward)
            .await
            .unwrap_err();

        assert!(matches!(error, EngineError::Cancelled));
        assert_eq!(project.current_iteration, 0);
        assert!(project.iteration_stats.is_empty());

        // Re-running after reset completes the iteration.
        engine.cancel_handle().reset();
        let stats = engine
            .run_iteration(&mut project, Direction::Backward)
            .await
            .unwrap();
        assert_eq!(stats.added, 1);
        assert_eq!(project.current_iteration, 1);
    }

    #[tokio::test]
    async fn test_per_paper_failure_recorded_not_fatal() {
        struct FailingProvider;

        #[async_trait]
        impl ProviderClient for FailingProvider {
            fn name(&self) -> &'static str {
                "failing"
            }
            fn role(&self) -> ProviderRole {
                ProviderRole::CitationGraph
            }
            async fn lookup_by_identifier(
                &self,
                _ids: &ExternalIds,
            ) -> Result<Option<Paper>, ProviderError> {
                Ok(None)
            }
            async fn lookup_by_title(
                &self,
                _title: &str,
                _year_hint: Option<i32>,
            ) -> Result<Option<Paper>, ProviderError> {
                Ok(None)
            }
            async fn references(&self, _paper: &Paper) -> Result<Vec<Paper>, ProviderError> {
                Err(ProviderError::unavailable("graph service down"))
            }
            async fn citations(&self, _paper: &Paper) -> Result<Vec<Paper>, ProviderError> {
                Err(ProviderError::unavailable("graph service down"))
            }
        }

        let store = Arc::new(MemoryStore::new());
        let mut chain = ProviderChain::new();
        chain.register(Box::new(FailingProvider));
        let engine = SnowballEngine::new(Arc::clone(&store), chain);

        let mut project = Project::new("p");
        plant_seed(&store, &mut project, "Seed Paper", "10.1/seed");

        let stats = engine
            .run_iteration(&mut project, Direction::Backward)
            .await
            .unwrap();
        assert_eq!(stats.added, 0);
        assert_eq!(stats.errors.len(), 1);
        assert!(stats.errors[0].contains("Seed Paper"));
        assert_eq!(project.current_iteration, 1);
    }

    #[tokio::test]
    async fn test_store_failure_skips_record_and_commits_the_rest() {
        /// Store that refuses to write one specific DOI.
        struct FailingUpsertStore {
            inner: MemoryStore,
            reject_doi: String,
        }

        impl RecordStore for FailingUpsertStore {
            fn get(&self, id: &PaperId) -> Result<Option<Paper>, StoreError> {
                self.inner.get(id)
            }
            fn find_by_any_identifier(
                &self,
                ids: &ExternalIds,
            ) -> Result<Option<Paper>, StoreError> {
                self.inner.find_by_any_identifier(ids)
            }
            fn list_by_status(&self, status: ReviewStatus) -> Result<Vec<Paper>, StoreError> {
                self.inner.list_by_status(status)
            }
            fn list_all(&self) -> Result<Vec<Paper>, StoreError> {
                self.inner.list_all()
            }
            fn upsert(&self, paper: &Paper) -> Result<(), StoreError> {
                if paper.ids.doi.as_deref() == Some(self.reject_doi.as_str()) {
                    return Err(StoreError::corrupt(self.reject_doi.clone(), "disk full"));
                }
                self.inner.upsert(paper)
            }
        }

        let provider = CannedProvider::default().with_references(
            "10.1/seed",
            vec![
                paper_with_doi("Writable Ref", "10.1/good", DiscoverySource::Backward),
                paper_with_doi("Unwritable Ref", "10.1/bad", DiscoverySource::Backward),
            ],
        );
        let store = Arc::new(FailingUpsertStore {
            inner: MemoryStore::new(),
            reject_doi: "10.1/bad".to_string(),
        });
        let mut chain = ProviderChain::new();
        chain.register(Box::new(provider));
        let engine = SnowballEngine::new(Arc::clone(&store), chain);

        let mut project = Project::new("p");
        let mut seed = paper_with_doi("Seed Paper", "10.1/seed", DiscoverySource::Seed);
        seed.set_status(ReviewStatus::Included, Some("seed paper".to_string()));
        store.upsert(&seed).unwrap();
        project.record_seed(seed.id.clone());

        let stats = engine
            .run_iteration(&mut project, Direction::Backward)
            .await
            .unwrap();

        // The failed commit is reported; the iteration still lands.
        assert_eq!(stats.discovered, 2);
        assert_eq!(stats.added, 1);
        assert_eq!(stats.backward, 1);
        assert_eq!(stats.errors.len(), 1);
        assert!(stats.errors[0].contains("Unwritable Ref"));
        assert_eq!(project.current_iteration, 1);
        assert_eq!(store.inner.len(), 2);
    }

    // ==================== Continuation Tests ====================

    #[tokio::test]
    async fn test_should_continue_lifecycle() {
        let provider = CannedProvider::default().with_references(
            "10.1/seed",
            vec![paper_with_doi("Ref", "10.1/r1", DiscoverySource::Backward)],
        );
        let (engine, store) = engine_with(provider);
        let mut project = Project::new("p");

        // Nothing to expand yet.
        assert!(!engine.should_continue(&project).unwrap());

        plant_seed(&store, &mut project, "Seed Paper", "10.1/seed");
        assert!(engine.should_continue(&project).unwrap());

        engine
            .run_iteration(&mut project, Direction::Backward)
            .await
            .unwrap();
        // The new record is pending, not included: empty next frontier.
        assert!(!engine.should_continue(&project).unwrap());

        // Including it re-opens the frontier.
        let pending = engine.papers_for_review(None).unwrap();
        engine
            .update_review(&pending[0].id, ReviewStatus::Included, None)
            .unwrap();
        assert!(engine.should_continue(&project).unwrap());

        // A cap at the current iteration wins over the open frontier.
        project.max_iterations = Some(project.current_iteration);
        assert!(!engine.should_continue(&project).unwrap());
    }

    #[tokio::test]
    async fn test_should_continue_unbounded_without_cap() {
        let (engine, store) = engine_with(CannedProvider::default());
        let mut project = Project::new("p");
        assert!(project.max_iterations.is_none());

        // Deep into a review with an open frontier and a productive last
        // iteration: no cap means no refusal.
        let mut included = paper_with_doi("Late Find", "10.1/late", DiscoverySource::Backward);
        included.snowball_iteration = 9;
        included.set_status(ReviewStatus::Included, None);
        store.upsert(&included).unwrap();
        project.current_iteration = 9;
        project.iteration_stats.push(IterationStats {
            iteration: 8,
            added: 1,
            ..IterationStats::default()
        });

        assert!(engine.should_continue(&project).unwrap());

        project.max_iterations = Some(9);
        assert!(!engine.should_continue(&project).unwrap());
    }

    #[tokio::test]
    async fn test_should_continue_false_after_exhausted_iteration() {
        let (engine, store) = engine_with(CannedProvider::default());
        let mut project = Project::new("p");
        plant_seed(&store, &mut project, "Seed Paper", "10.1/seed");

        let stats = engine
            .run_iteration(&mut project, Direction::Backward)
            .await
            .unwrap();
        assert!(stats.is_exhausted());
        assert!(!engine.should_continue(&project).unwrap());
    }

    // ==================== Review Tests ====================

    #[tokio::test]
    async fn test_update_review_manual_exclusion() {
        let (engine, store) = engine_with(CannedProvider::default());
        let paper = paper_with_doi("Pending Paper", "10.1/p", DiscoverySource::Backward);
        store.upsert(&paper).unwrap();

        let updated = engine
            .update_review(
                &paper.id,
                ReviewStatus::Excluded,
                Some("off topic".to_string()),
            )
            .unwrap();

        assert_eq!(updated.status, ReviewStatus::Excluded);
        assert_eq!(updated.exclusion, Some(ExclusionKind::Manual));
        assert_eq!(updated.status_history.len(), 1);
        assert_eq!(
            updated.status_history[0].note.as_deref(),
            Some("off topic")
        );
    }

    #[tokio::test]
    async fn test_update_review_unknown_id() {
        let (engine, _store) = engine_with(CannedProvider::default());
        let error = engine
            .update_review(&PaperId::new(), ReviewStatus::Included, None)
            .unwrap_err();
        assert!(matches!(error, EngineError::PaperNotFound { .. }));
    }

    #[tokio::test]
    async fn test_papers_for_review_sorted_by_citations() {
        let (engine, store) = engine_with(CannedProvider::default());
        let mut low = paper_with_doi("Low", "10.1/low", DiscoverySource::Backward);
        low.citation_count = Some(2);
        let mut high = paper_with_doi("High", "10.1/high", DiscoverySource::Backward);
        high.citation_count = Some(90);
        let unknown = paper_with_doi("Unknown", "10.1/unknown", DiscoverySource::Backward);
        for paper in [&low, &high, &unknown] {
            store.upsert(paper).unwrap();
        }

        let pending = engine.papers_for_review(None).unwrap();
        let titles: Vec<&str> = pending.iter().map(|p| p.title.as_str()).collect();
        assert_eq!(titles, vec!["High", "Low", "Unknown"]);
    }
}
