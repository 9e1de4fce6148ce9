//! Error types for record store implementations.

use thiserror::Error;

/// Errors surfaced by a [`RecordStore`](super::RecordStore).
///
/// Store failures are the only fatal-to-a-record conditions in an
/// iteration: the affected record's commit is aborted and reported, while
/// the iteration itself continues.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying storage I/O failed.
    #[error("storage I/O error: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// A stored record could not be decoded.
    #[error("corrupt record {id}: {reason}")]
    Corrupt {
        /// Identifier of the unreadable record.
        id: String,
        /// What went wrong while decoding.
        reason: String,
    },
}

impl StoreError {
    /// Creates a corrupt-record error.
    pub fn corrupt(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Corrupt {
            id: id.into(),
            reason: reason.into(),
        }
    }
}
