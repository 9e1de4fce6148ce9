//! Record store capability and the in-memory reference implementation.
//!
//! The engine never owns corpus state: every component receives a
//! [`RecordStore`] and re-reads current records on each operation, which is
//! what makes iteration runs safe to retry after partial failure.

mod error;

pub use error::StoreError;

use std::collections::HashMap;
use std::sync::RwLock;

use crate::paper::{ExternalIds, Paper, PaperId, ReviewStatus};

/// Capability interface over the paper corpus.
///
/// All calls are synchronous from the engine's perspective; implementations
/// backed by slow media should cache or batch internally. Implementations
/// must be safe to share across the engine's concurrent lookups
/// (`Send + Sync`).
pub trait RecordStore: Send + Sync {
    /// Returns the record with the given identifier, if present.
    fn get(&self, id: &PaperId) -> Result<Option<Paper>, StoreError>;

    /// Returns the record sharing any non-null external identifier with
    /// `ids`, if one exists.
    fn find_by_any_identifier(&self, ids: &ExternalIds) -> Result<Option<Paper>, StoreError>;

    /// Returns all records with the given review status.
    fn list_by_status(&self, status: ReviewStatus) -> Result<Vec<Paper>, StoreError>;

    /// Returns the full corpus.
    fn list_all(&self) -> Result<Vec<Paper>, StoreError>;

    /// Inserts or replaces a record keyed by its stable identifier.
    fn upsert(&self, paper: &Paper) -> Result<(), StoreError>;
}

/// In-memory record store.
///
/// Reference implementation used by the engine's tests and by library
/// consumers that bring their own persistence on top (export the corpus
/// via [`RecordStore::list_all`]).
#[derive(Debug, Default)]
pub struct MemoryStore {
    papers: RwLock<HashMap<PaperId, Paper>>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored records.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    #[must_use]
    #[allow(clippy::unwrap_used)]
    pub fn len(&self) -> usize {
        self.papers.read().unwrap().len()
    }

    /// True when no records are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// Lock poisoning can only happen if a panic occurred while holding the
// write lock; treat it as corrupt storage rather than propagating a panic.
fn poisoned<T>(_: std::sync::PoisonError<T>) -> StoreError {
    StoreError::corrupt("<memory>", "lock poisoned by a previous panic")
}

impl RecordStore for MemoryStore {
    fn get(&self, id: &PaperId) -> Result<Option<Paper>, StoreError> {
        let papers = self.papers.read().map_err(poisoned)?;
        Ok(papers.get(id).cloned())
    }

    fn find_by_any_identifier(&self, ids: &ExternalIds) -> Result<Option<Paper>, StoreError> {
        if ids.is_empty() {
            return Ok(None);
        }
        let papers = self.papers.read().map_err(poisoned)?;
        Ok(papers.values().find(|p| p.ids.matches(ids)).cloned())
    }

    fn list_by_status(&self, status: ReviewStatus) -> Result<Vec<Paper>, StoreError> {
        let papers = self.papers.read().map_err(poisoned)?;
        Ok(papers
            .values()
            .filter(|p| p.status == status)
            .cloned()
            .collect())
    }

    fn list_all(&self) -> Result<Vec<Paper>, StoreError> {
        let papers = self.papers.read().map_err(poisoned)?;
        Ok(papers.values().cloned().collect())
    }

    fn upsert(&self, paper: &Paper) -> Result<(), StoreError> {
        let mut papers = self.papers.write().map_err(poisoned)?;
        papers.insert(paper.id.clone(), paper.clone());
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::paper::DiscoverySource;

    fn stored(title: &str, doi: Option<&str>) -> Paper {
        let mut p = Paper::new(title, DiscoverySource::Seed);
        p.ids.doi = doi.map(str::to_string);
        p
    }

    #[test]
    fn test_memory_store_upsert_and_get() {
        let store = MemoryStore::new();
        let paper = stored("A Paper", Some("10.1/a"));
        store.upsert(&paper).unwrap();

        let loaded = store.get(&paper.id).unwrap().unwrap();
        assert_eq!(loaded.title, "A Paper");
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_memory_store_get_missing_returns_none() {
        let store = MemoryStore::new();
        assert!(store.get(&PaperId::new()).unwrap().is_none());
    }

    #[test]
    fn test_memory_store_upsert_replaces() {
        let store = MemoryStore::new();
        let mut paper = stored("Before", None);
        store.upsert(&paper).unwrap();

        paper.title = "After".to_string();
        store.upsert(&paper).unwrap();

        assert_eq!(store.len(), 1);
        assert_eq!(store.get(&paper.id).unwrap().unwrap().title, "After");
    }

    #[test]
    fn test_memory_store_find_by_any_identifier() {
        let store = MemoryStore::new();
        store.upsert(&stored("With DOI", Some("10.1/abc"))).unwrap();

        let hit = store
            .find_by_any_identifier(&ExternalIds::from_doi("10.1/ABC"))
            .unwrap();
        assert_eq!(hit.unwrap().title, "With DOI");

        let miss = store
            .find_by_any_identifier(&ExternalIds::from_doi("10.1/other"))
            .unwrap();
        assert!(miss.is_none());
    }

    #[test]
    fn test_memory_store_find_by_empty_ids_is_none() {
        let store = MemoryStore::new();
        store.upsert(&stored("No IDs", None)).unwrap();
        let hit = store.find_by_any_identifier(&ExternalIds::default()).unwrap();
        assert!(hit.is_none());
    }

    #[test]
    fn test_memory_store_list_by_status() {
        let store = MemoryStore::new();
        let mut included = stored("In", None);
        included.status = ReviewStatus::Included;
        store.upsert(&included).unwrap();
        store.upsert(&stored("Pending", None)).unwrap();

        let listed = store.list_by_status(ReviewStatus::Included).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].title, "In");
        assert_eq!(store.list_all().unwrap().len(), 2);
    }
}
