//! Identity-equivalence decisions for discovered records.
//!
//! The deduplicator answers one question: is this candidate the same
//! logical paper as something already stored? Identifier matches win
//! outright; otherwise normalized titles are compared with a token-overlap
//! ratio, gated on publication-year agreement. The
//! similarity threshold is deliberately configurable: false merges and
//! false splits have asymmetric, project-dependent costs.

use tracing::debug;

use crate::paper::Paper;
use crate::store::{RecordStore, StoreError};

/// Reference similarity threshold for title-based matching.
pub const DEFAULT_TITLE_THRESHOLD: f64 = 0.92;

/// Tunables for identity-equivalence matching.
#[derive(Debug, Clone, Copy)]
pub struct DedupConfig {
    /// Minimum similarity score (over `[0, 1]`) of normalized titles for
    /// two records to be considered the same paper.
    pub title_threshold: f64,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            title_threshold: DEFAULT_TITLE_THRESHOLD,
        }
    }
}

/// Result of reconciling a candidate against the current corpus.
///
/// The deduplicator only reads the store; writing the outcome back is the
/// caller's job (single-writer discipline during an iteration).
#[derive(Debug)]
pub enum Reconciliation {
    /// Candidate is identity-equivalent to a stored record. Carries the
    /// stored record with the candidate's new information absorbed and its
    /// observation count incremented; identity fields (id, iteration,
    /// source, status) are the stored record's.
    Merged(Paper),
    /// Candidate is a distinct paper, ready for insertion as-is.
    New(Paper),
    /// Candidate has neither an external identifier nor a usable title;
    /// it must never be stored.
    Unidentifiable,
}

/// Decides identity-equivalence of candidates against a record store.
#[derive(Debug, Clone, Copy, Default)]
pub struct Deduplicator {
    config: DedupConfig,
}

impl Deduplicator {
    /// Creates a deduplicator with the given configuration.
    #[must_use]
    pub fn new(config: DedupConfig) -> Self {
        Self { config }
    }

    /// Reconciles a candidate against the current corpus.
    ///
    /// Match order, first hit wins:
    /// 1. any shared non-null external identifier;
    /// 2. normalized-title similarity at or above the threshold, with
    ///    publication years equal or at least one unset.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the corpus cannot be read.
    pub fn reconcile<S: RecordStore + ?Sized>(
        &self,
        store: &S,
        candidate: Paper,
    ) -> Result<Reconciliation, StoreError> {
        if candidate.is_unidentifiable() {
            debug!("dropping unidentifiable candidate (no identifier, no usable title)");
            return Ok(Reconciliation::Unidentifiable);
        }

        if let Some(existing) = store.find_by_any_identifier(&candidate.ids)? {
            debug!(
                existing = %existing.id,
                "candidate matched stored record by external identifier"
            );
            return Ok(Reconciliation::Merged(merge_into(existing, &candidate)));
        }

        let normalized = normalize_title(&candidate.title);
        if !normalized.is_empty() {
            for existing in store.list_all()? {
                if !years_compatible(candidate.year, existing.year) {
                    continue;
                }
                let score = similarity(&normalized, &normalize_title(&existing.title));
                if score >= self.config.title_threshold {
                    debug!(
                        existing = %existing.id,
                        score,
                        "candidate matched stored record by title similarity"
                    );
                    return Ok(Reconciliation::Merged(merge_into(existing, &candidate)));
                }
            }
        }

        Ok(Reconciliation::New(candidate))
    }
}

/// Merges candidate data into the stored record, preserving identity.
fn merge_into(mut existing: Paper, candidate: &Paper) -> Paper {
    existing.absorb(candidate);
    existing.observation_count = existing.observation_count.saturating_add(1);
    for origin in &candidate.source_paper_ids {
        if !existing.source_paper_ids.contains(origin) {
            existing.source_paper_ids.push(origin.clone());
        }
    }
    existing
}

/// Years are compatible when equal or when either is unset.
fn years_compatible(a: Option<i32>, b: Option<i32>) -> bool {
    match (a, b) {
        (Some(x), Some(y)) => x == y,
        _ => true,
    }
}

/// Normalizes a title for comparison: lowercase, punctuation stripped,
/// whitespace collapsed to single spaces.
#[must_use]
pub fn normalize_title(title: &str) -> String {
    let mut normalized = String::with_capacity(title.len());
    let mut pending_space = false;
    for ch in title.chars() {
        if ch.is_alphanumeric() {
            if pending_space && !normalized.is_empty() {
                normalized.push(' ');
            }
            pending_space = false;
            for lower in ch.to_lowercase() {
                normalized.push(lower);
            }
        } else {
            pending_space = true;
        }
    }
    normalized
}

/// Similarity of two titles over `[0, 1]` after normalization.
#[must_use]
pub fn title_similarity(a: &str, b: &str) -> f64 {
    similarity(&normalize_title(a), &normalize_title(b))
}

/// Minimum per-token edit-distance ratio for two tokens to count as the
/// same word (tolerates typos and singular/plural variation).
const TOKEN_MATCH_THRESHOLD: f64 = 0.85;

/// Token-overlap (Dice) ratio over normalized titles.
///
/// Tokens are matched greedily; a token pairs with the first unconsumed
/// token on the other side that is equal or nearly equal under
/// `normalized_levenshtein`. A single swapped word in a long title
/// (e.g. "... for X" vs "... for Y") drops the score well below the
/// dedup threshold, while case and punctuation differences score 1.0.
fn similarity(a: &str, b: &str) -> f64 {
    let a_tokens: Vec<&str> = a.split_whitespace().collect();
    let b_tokens: Vec<&str> = b.split_whitespace().collect();
    if a_tokens.is_empty() || b_tokens.is_empty() {
        return 0.0;
    }

    let mut consumed = vec![false; b_tokens.len()];
    let mut matched = 0usize;
    for token in &a_tokens {
        let hit = b_tokens.iter().enumerate().find(|(i, other)| {
            !consumed[*i]
                && (token == *other
                    || strsim::normalized_levenshtein(token, other) >= TOKEN_MATCH_THRESHOLD)
        });
        if let Some((i, _)) = hit {
            consumed[i] = true;
            matched += 1;
        }
    }

    #[allow(clippy::cast_precision_loss)]
    {
        (2 * matched) as f64 / (a_tokens.len() + b_tokens.len()) as f64
    }
}
