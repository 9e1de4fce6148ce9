//! Canonical paper record types and field-level merge rules.
//!
//! A [`Paper`] is the unit the whole engine operates on: provider clients
//! produce partial ones, the deduplicator reconciles them into the record
//! store, and the iteration controller reads them back as the frontier.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stable, opaque identifier assigned to a record on first insertion.
///
/// Immutable once assigned; survives merges (the existing record's id wins).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PaperId(String);

impl PaperId {
    /// Generates a fresh identifier.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Wraps an existing identifier string (e.g. read back from storage).
    #[must_use]
    pub fn from_string(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for PaperId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PaperId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Review status of a paper.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewStatus {
    /// Awaiting review.
    Pending,
    /// Accepted into the corpus; eligible for the next frontier.
    Included,
    /// Rejected (automatically or by a reviewer).
    Excluded,
    /// Deferred decision.
    Maybe,
}

impl ReviewStatus {
    /// Returns the stable string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Included => "included",
            Self::Excluded => "excluded",
            Self::Maybe => "maybe",
        }
    }
}

impl fmt::Display for ReviewStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ReviewStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "included" => Ok(Self::Included),
            "excluded" => Ok(Self::Excluded),
            "maybe" => Ok(Self::Maybe),
            _ => Err(format!("invalid review status: {s}")),
        }
    }
}

/// How a paper entered the corpus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscoverySource {
    /// Provided by the user as a starting point.
    Seed,
    /// Found in another paper's reference list.
    Backward,
    /// Found among another paper's citing papers.
    Forward,
}

impl DiscoverySource {
    /// Returns the stable string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Seed => "seed",
            Self::Backward => "backward",
            Self::Forward => "forward",
        }
    }
}

impl fmt::Display for DiscoverySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Distinguishes filter-rejected records from reviewer-excluded ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExclusionKind {
    /// Excluded by the filter evaluator during an iteration run.
    Auto,
    /// Excluded by a human reviewer.
    Manual,
}

/// One attributable review-status transition.
///
/// Transitions are free-form (any status to any other), but every one is
/// recorded so review decisions can be audited or undone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusChange {
    /// Status before the transition.
    pub from: ReviewStatus,
    /// Status after the transition.
    pub to: ReviewStatus,
    /// When the transition happened.
    pub at: DateTime<Utc>,
    /// Optional reviewer note or automatic rationale.
    pub note: Option<String>,
}

/// Author of a paper.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Author {
    /// Display name as reported by the provider.
    pub name: String,
    /// Affiliations, when the provider reports them.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub affiliations: Vec<String>,
}

impl Author {
    /// Creates an author with no affiliations.
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            affiliations: Vec::new(),
        }
    }
}

/// Publication venue descriptor.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Venue {
    /// Venue name (journal or conference title).
    pub name: Option<String>,
    /// Venue kind (journal, conference, workshop, ...), lowercase.
    pub kind: Option<String>,
    /// Volume, for journal articles.
    pub volume: Option<String>,
    /// Issue, for journal articles.
    pub issue: Option<String>,
    /// Page range.
    pub pages: Option<String>,
}

impl Venue {
    /// True when no field is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.kind.is_none()
            && self.volume.is_none()
            && self.issue.is_none()
            && self.pages.is_none()
    }
}

/// External identifiers for a paper, at most one value per namespace.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalIds {
    /// Digital Object Identifier (compared case-insensitively).
    pub doi: Option<String>,
    /// arXiv identifier, e.g. `2301.12345`.
    pub arxiv_id: Option<String>,
    /// Semantic Scholar paper id.
    pub semantic_scholar_id: Option<String>,
    /// OpenAlex work id, e.g. `W2741809807`.
    pub openalex_id: Option<String>,
    /// PubMed id.
    pub pmid: Option<String>,
}

impl ExternalIds {
    /// Builds an identifier set containing only a DOI.
    #[must_use]
    pub fn from_doi(doi: impl Into<String>) -> Self {
        Self {
            doi: Some(doi.into()),
            ..Self::default()
        }
    }

    /// True when no namespace has a value.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.doi.is_none()
            && self.arxiv_id.is_none()
            && self.semantic_scholar_id.is_none()
            && self.openalex_id.is_none()
            && self.pmid.is_none()
    }

    /// True when any namespace has the same non-null value in both sets.
    ///
    /// DOIs are matched case-insensitively; the remaining namespaces are
    /// exact matches.
    #[must_use]
    pub fn matches(&self, other: &Self) -> bool {
        if let (Some(a), Some(b)) = (&self.doi, &other.doi) {
            if a.eq_ignore_ascii_case(b) {
                return true;
            }
        }
        same_value(&self.arxiv_id, &other.arxiv_id)
            || same_value(&self.semantic_scholar_id, &other.semantic_scholar_id)
            || same_value(&self.openalex_id, &other.openalex_id)
            || same_value(&self.pmid, &other.pmid)
    }

    /// Fills unset namespaces from `other`; existing values are never
    /// overwritten (first-non-null-wins).
    pub fn absorb(&mut self, other: &Self) {
        fill(&mut self.doi, &other.doi);
        fill(&mut self.arxiv_id, &other.arxiv_id);
        fill(&mut self.semantic_scholar_id, &other.semantic_scholar_id);
        fill(&mut self.openalex_id, &other.openalex_id);
        fill(&mut self.pmid, &other.pmid);
    }
}

fn same_value(a: &Option<String>, b: &Option<String>) -> bool {
    matches!((a, b), (Some(x), Some(y)) if x == y)
}

fn fill(slot: &mut Option<String>, value: &Option<String>) {
    if slot.is_none() {
        slot.clone_from(value);
    }
}

/// A scholarly paper record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Paper {
    /// Stable internal identifier.
    pub id: PaperId,
    /// External identifiers, flattened into the record for lossless
    /// round-tripping through any encoding.
    #[serde(flatten)]
    pub ids: ExternalIds,

    /// Title (may be empty for unidentifiable provider stubs; such
    /// candidates are rejected before storage).
    pub title: String,
    /// Normalized author list.
    #[serde(default)]
    pub authors: Vec<Author>,
    /// Publication year.
    pub year: Option<i32>,
    /// Abstract, when a provider supplies one.
    #[serde(rename = "abstract")]
    pub abstract_text: Option<String>,
    /// Publication venue.
    pub venue: Option<Venue>,

    /// Citation count as last reported by a provider; may be stale.
    pub citation_count: Option<u32>,
    /// Influential-citation count (Semantic Scholar metric).
    pub influential_citation_count: Option<u32>,

    /// Review status.
    pub status: ReviewStatus,
    /// How the current `Excluded` status came about, when applicable.
    pub exclusion: Option<ExclusionKind>,
    /// How this record was discovered. Preserved across rediscoveries.
    pub source: DiscoverySource,
    /// Iteration in which the record was first discovered (0 for seeds).
    /// Never retroactively changed; rediscoveries only bump
    /// `observation_count`.
    pub snowball_iteration: u32,
    /// Number of independent discovery events that resolved to this record.
    pub observation_count: u32,
    /// Papers whose expansion discovered this one.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub source_paper_ids: Vec<PaperId>,

    /// Free-form review notes.
    #[serde(default)]
    pub notes: String,
    /// Reviewer tags.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    /// Attributable status-transition history.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub status_history: Vec<StatusChange>,
}

impl Paper {
    /// Creates a new record with a fresh identifier.
    ///
    /// Defaults: `Pending` status, observation count 1, iteration 0.
    #[must_use]
    pub fn new(title: impl Into<String>, source: DiscoverySource) -> Self {
        Self {
            id: PaperId::new(),
            ids: ExternalIds::default(),
            title: title.into(),
            authors: Vec::new(),
            year: None,
            abstract_text: None,
            venue: None,
            citation_count: None,
            influential_citation_count: None,
            status: ReviewStatus::Pending,
            exclusion: None,
            source,
            snowball_iteration: 0,
            observation_count: 1,
            source_paper_ids: Vec::new(),
            notes: String::new(),
            tags: Vec::new(),
            status_history: Vec::new(),
        }
    }

    /// Transitions the review status, recording an attributable change.
    ///
    /// A no-op transition (same status) is still recorded so repeated
    /// confirmations show up in the audit trail.
    pub fn set_status(&mut self, status: ReviewStatus, note: Option<String>) {
        self.status_history.push(StatusChange {
            from: self.status,
            to: status,
            at: Utc::now(),
            note,
        });
        self.status = status;
        if status != ReviewStatus::Excluded {
            self.exclusion = None;
        }
    }

    /// Merges another record's fields into this one, first-non-null-wins.
    ///
    /// Existing non-null (or non-empty) values are never overwritten by a
    /// later, sparser source. Identity fields (`id`, `status`, `source`,
    /// `snowball_iteration`, `observation_count`) are untouched; callers
    /// that merge duplicates handle those separately.
    pub fn absorb(&mut self, other: &Paper) {
        if self.title.trim().is_empty() && !other.title.trim().is_empty() {
            self.title.clone_from(&other.title);
        }
        if self.authors.is_empty() && !other.authors.is_empty() {
            self.authors.clone_from(&other.authors);
        }
        if self.year.is_none() {
            self.year = other.year;
        }
        if self.abstract_text.is_none() {
            self.abstract_text.clone_from(&other.abstract_text);
        }
        match (&mut self.venue, &other.venue) {
            (Some(mine), Some(theirs)) => {
                fill(&mut mine.name, &theirs.name);
                fill(&mut mine.kind, &theirs.kind);
                fill(&mut mine.volume, &theirs.volume);
                fill(&mut mine.issue, &theirs.issue);
                fill(&mut mine.pages, &theirs.pages);
            }
            (mine @ None, Some(theirs)) => *mine = Some(theirs.clone()),
            _ => {}
        }
        if self.citation_count.is_none() {
            self.citation_count = other.citation_count;
        }
        if self.influential_citation_count.is_none() {
            self.influential_citation_count = other.influential_citation_count;
        }
        self.ids.absorb(&other.ids);
    }

    /// True when the record has neither an external identifier nor a
    /// usable title. Such candidates are never stored.
    #[must_use]
    pub fn is_unidentifiable(&self) -> bool {
        self.ids.is_empty() && crate::dedup::normalize_title(&self.title).is_empty()
    }
}
