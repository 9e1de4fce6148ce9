//! Acceptance filtering for discovered records.
//!
//! [`evaluate`] is a pure predicate over a record and a criteria set. It
//! auto-routes candidates to "rejected" or "for review" during an
//! iteration; rejected records are still stored (marked auto-excluded) so
//! they stay traceable and can be re-evaluated under different criteria.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::paper::Paper;

/// Configurable acceptance criteria for discovered records.
///
/// Every field is optional; an absent bound never rejects. Keyword
/// matching is case-insensitive substring search over title + abstract.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FilterCriteria {
    /// Inclusive lower publication-year bound.
    pub min_year: Option<i32>,
    /// Inclusive upper publication-year bound.
    pub max_year: Option<i32>,
    /// Minimum citation count. Records with an unknown count pass.
    pub min_citations: Option<u32>,
    /// Minimum influential-citation count. Unknown counts pass.
    pub min_influential_citations: Option<u32>,
    /// Record must match at least one of these (when non-empty).
    #[serde(default)]
    pub keywords: Vec<String>,
    /// Record is rejected if it matches any of these. Evaluated before
    /// `keywords`.
    #[serde(default)]
    pub excluded_keywords: Vec<String>,
    /// Allowed venue kinds (journal, conference, ...). Records with an
    /// unknown venue kind pass.
    #[serde(default)]
    pub venue_types: Vec<String>,
}

impl FilterCriteria {
    /// True when no criterion is set, i.e. everything is accepted.
    #[must_use]
    pub fn is_unconstrained(&self) -> bool {
        self.min_year.is_none()
            && self.max_year.is_none()
            && self.min_citations.is_none()
            && self.min_influential_citations.is_none()
            && self.keywords.is_empty()
            && self.excluded_keywords.is_empty()
            && self.venue_types.is_empty()
    }
}

/// The first rule that rejected a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterRule {
    /// Year outside `[min_year, max_year]`.
    YearOutOfRange,
    /// Title or abstract matched an excluded keyword.
    ExcludedKeyword,
    /// Known citation count below `min_citations`.
    BelowMinCitations,
    /// Known influential-citation count below `min_influential_citations`.
    BelowMinInfluentialCitations,
    /// Known venue kind not in `venue_types`.
    VenueTypeNotAllowed,
    /// `keywords` set non-empty and nothing matched.
    NoKeywordMatch,
}

impl FilterRule {
    /// Short rationale tag recorded on auto-excluded records.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::YearOutOfRange => "year out of range",
            Self::ExcludedKeyword => "matched excluded keyword",
            Self::BelowMinCitations => "below minimum citations",
            Self::BelowMinInfluentialCitations => "below minimum influential citations",
            Self::VenueTypeNotAllowed => "venue type not allowed",
            Self::NoKeywordMatch => "no keyword match",
        }
    }
}

impl fmt::Display for FilterRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Outcome of evaluating a record against criteria.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterDecision {
    /// Record passes; it enters review as `Pending`.
    Accepted,
    /// Record fails; it is stored as auto-excluded with the rule named.
    Rejected(FilterRule),
}

impl FilterDecision {
    /// True for [`FilterDecision::Accepted`].
    #[must_use]
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted)
    }
}

/// Evaluates a record against a criteria set; first applicable rule decides.
///
/// Unknown-safe policy: a bound only rejects when the record's value is
/// known. A record with `citation_count = None` is never rejected by
/// `min_citations`.
#[must_use]
pub fn evaluate(paper: &Paper, criteria: &FilterCriteria) -> FilterDecision {
    if let Some(year) = paper.year {
        if criteria.min_year.is_some_and(|min| year < min)
            || criteria.max_year.is_some_and(|max| year > max)
        {
            return FilterDecision::Rejected(FilterRule::YearOutOfRange);
        }
    }

    let haystack = search_text(paper);

    if matches_any_keyword(&haystack, &criteria.excluded_keywords) {
        return FilterDecision::Rejected(FilterRule::ExcludedKeyword);
    }

    if let (Some(count), Some(min)) = (paper.citation_count, criteria.min_citations) {
        if count < min {
            return FilterDecision::Rejected(FilterRule::BelowMinCitations);
        }
    }

    if let (Some(count), Some(min)) = (
        paper.influential_citation_count,
        criteria.min_influential_citations,
    ) {
        if count < min {
            return FilterDecision::Rejected(FilterRule::BelowMinInfluentialCitations);
        }
    }

    if !criteria.venue_types.is_empty() {
        if let Some(kind) = paper.venue.as_ref().and_then(|v| v.kind.as_deref()) {
            let allowed = criteria
                .venue_types
                .iter()
                .any(|t| t.eq_ignore_ascii_case(kind));
            if !allowed {
                return FilterDecision::Rejected(FilterRule::VenueTypeNotAllowed);
            }
        }
    }

    if !criteria.keywords.is_empty() && !matches_any_keyword(&haystack, &criteria.keywords) {
        return FilterDecision::Rejected(FilterRule::NoKeywordMatch);
    }

    FilterDecision::Accepted
}

fn search_text(paper: &Paper) -> String {
    let mut text = paper.title.to_lowercase();
    if let Some(abstract_text) = &paper.abstract_text {
        text.push(' ');
        text.push_str(&abstract_text.to_lowercase());
    }
    text
}

fn matches_any_keyword(haystack: &str, keywords: &[String]) -> bool {
    keywords
        .iter()
        .filter(|k| !k.trim().is_empty())
        .any(|k| haystack.contains(k.trim().to_lowercase().as_str()))
}
