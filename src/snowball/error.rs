//! Error types for the snowball engine.

use thiserror::Error;

use crate::paper::PaperId;
use crate::provider::ProviderError;
use crate::store::StoreError;

/// Failures an engine operation can report.
///
/// Per-paper expansion failures during an iteration are not errors at
/// this level; they are collected into the iteration's statistics so one
/// dead reference list cannot abort a run.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The record store failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Every provider failed while resolving a seed.
    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// No provider knows the given DOI.
    #[error("no record found for DOI {doi}")]
    SeedNotFound {
        /// The DOI that could not be resolved.
        doi: String,
    },

    /// Seed metadata carried neither an identifier nor a usable title.
    #[error("seed has neither an external identifier nor a usable title")]
    UnidentifiableSeed,

    /// A review operation referenced an unknown record.
    #[error("no stored record with id {id}")]
    PaperNotFound {
        /// The missing record's identifier.
        id: PaperId,
    },

    /// The run was cancelled. Work completed before the cancellation
    /// point is already persisted in the store.
    #[error("iteration cancelled")]
    Cancelled,
}

impl EngineError {
    /// Creates a seed-not-found error.
    pub fn seed_not_found(doi: impl Into<String>) -> Self {
        Self::SeedNotFound { doi: doi.into() }
    }

    /// Creates a paper-not-found error.
    #[must_use]
    pub fn paper_not_found(id: PaperId) -> Self {
        Self::PaperNotFound { id }
    }
}
