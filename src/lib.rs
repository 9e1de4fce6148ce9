//! Citation-snowballing engine for systematic literature reviews.
//!
//! Starting from a handful of seed papers, the engine walks the citation
//! graph in iterations: each round expands the reference lists and
//! citing papers of the current frontier, reconciles what it finds
//! against the growing corpus, and screens new records against the
//! review's criteria.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`paper`] - Canonical paper records and field-level merge rules
//! - [`store`] - Record store capability and in-memory implementation
//! - [`provider`] - Metadata provider clients and the fallback chain
//! - [`dedup`] - Identity-equivalence reconciliation
//! - [`filter`] - Criteria screening for discovered records
//! - [`project`] - Review project state and iteration statistics
//! - [`snowball`] - The iteration engine tying it all together

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod dedup;
pub mod filter;
pub mod paper;
pub mod project;
pub mod provider;
pub mod snowball;
pub mod store;

// Re-export commonly used types
pub use dedup::{DEFAULT_TITLE_THRESHOLD, DedupConfig, Deduplicator, Reconciliation};
pub use filter::{FilterCriteria, FilterDecision, FilterRule, evaluate};
pub use paper::{
    Author, DiscoverySource, ExclusionKind, ExternalIds, Paper, PaperId, ReviewStatus, Venue,
};
pub use project::{IterationStats, Project};
pub use provider::{
    LookupProbe, ProviderChain, ProviderClient, ProviderError, ProviderOptions, ProviderRole,
    build_default_provider_chain,
};
pub use snowball::{
    CancelHandle, Direction, EngineConfig, EngineError, SeedMetadata, SnowballEngine,
};
pub use store::{MemoryStore, RecordStore, StoreError};
