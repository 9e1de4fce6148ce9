//! Review project state.
//!
//! A [`Project`] holds everything about one systematic review that is
//! not a paper record: the screening criteria, the iteration counter,
//! the seed set, and the committed per-iteration statistics.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::filter::FilterCriteria;
use crate::paper::PaperId;

/// One systematic review and its snowballing state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    /// Human-readable project name.
    pub name: String,
    /// The research question guiding screening decisions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub research_question: Option<String>,
    /// Screening criteria applied to newly discovered records.
    #[serde(default)]
    pub criteria: FilterCriteria,
    /// Advisory cap on iterations; `should_continue` goes false at the
    /// cap. Absent means unbounded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_iterations: Option<u32>,
    /// Next iteration to run. Iterations `0..current_iteration` are
    /// committed.
    pub current_iteration: u32,
    /// Records added as seeds, in insertion order.
    #[serde(default)]
    pub seed_paper_ids: Vec<PaperId>,
    /// Committed statistics, one entry per completed iteration.
    #[serde(default)]
    pub iteration_stats: Vec<IterationStats>,
    /// When the project was created.
    pub created_at: DateTime<Utc>,
}

impl Project {
    /// Creates an empty project with default criteria.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            research_question: None,
            criteria: FilterCriteria::default(),
            max_iterations: None,
            current_iteration: 0,
            seed_paper_ids: Vec::new(),
            iteration_stats: Vec::new(),
            created_at: Utc::now(),
        }
    }

    /// Statistics of the most recently committed iteration.
    #[must_use]
    pub fn latest_stats(&self) -> Option<&IterationStats> {
        self.iteration_stats.last()
    }

    /// Records a seed, ignoring duplicates.
    pub fn record_seed(&mut self, id: PaperId) {
        if !self.seed_paper_ids.contains(&id) {
            self.seed_paper_ids.push(id);
        }
    }
}

/// Outcome counters for one committed snowball iteration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IterationStats {
    /// Which iteration these counters belong to.
    pub iteration: u32,
    /// When the iteration started.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// Raw candidate records returned by providers before reconciliation.
    pub discovered: usize,
    /// New records written to the store this iteration.
    pub added: usize,
    /// Candidates merged into already-known records.
    pub merged: usize,
    /// New records discovered via reference lists.
    pub backward: usize,
    /// New records discovered via citing papers.
    pub forward: usize,
    /// New records rejected by the screening criteria.
    pub auto_excluded: usize,
    /// New records accepted into the review queue.
    pub for_review: usize,
    /// Candidates dropped for lacking any identifier or title.
    pub unidentifiable: usize,
    /// Per-paper expansion failures, as human-readable messages.
    #[serde(default)]
    pub errors: Vec<String>,
}

impl IterationStats {
    /// Creates a zeroed stats record for the given iteration, stamped
    /// with the current time.
    #[must_use]
    pub fn begin(iteration: u32) -> Self {
        Self {
            iteration,
            started_at: Some(Utc::now()),
            ..Self::default()
        }
    }

    /// True when the iteration produced no new records for review.
    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        self.added == 0
    }
}
