//! Error types for provider clients.

use std::time::Duration;

use thiserror::Error;

/// Failures a provider client can report.
///
/// A missing record is not an error: lookups return `Ok(None)` and edge
/// queries return an empty vector. Partial records are valid results.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The provider throttled the request (HTTP 429 or equivalent).
    ///
    /// Carries the provider's backoff hint when one was published.
    /// Handled inside the fallback chain; never surfaced per-paper.
    #[error("provider rate limited{}", retry_hint(.retry_after))]
    RateLimited {
        /// Parsed `Retry-After` value, when the response carried one.
        retry_after: Option<Duration>,
    },

    /// Transient network or service fault (timeouts, 5xx, bad payloads).
    #[error("provider unavailable: {reason}")]
    Unavailable {
        /// What failed, for logs and iteration error reports.
        reason: String,
    },

    /// The provider has no data of this kind for the record type
    /// (e.g. a preprint index asked for a citation graph).
    #[error("operation not supported by provider: {operation}")]
    NotSupported {
        /// The unsupported operation name.
        operation: &'static str,
    },
}

impl ProviderError {
    /// Creates a rate-limited error without a backoff hint.
    #[must_use]
    pub fn rate_limited() -> Self {
        Self::RateLimited { retry_after: None }
    }

    /// Creates a rate-limited error with a backoff hint.
    #[must_use]
    pub fn rate_limited_for(retry_after: Duration) -> Self {
        Self::RateLimited {
            retry_after: Some(retry_after),
        }
    }

    /// Creates an unavailable error.
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::Unavailable {
            reason: reason.into(),
        }
    }

    /// Creates a not-supported error for the named operation.
    #[must_use]
    pub fn not_supported(operation: &'static str) -> Self {
        Self::NotSupported { operation }
    }

    /// True when falling back to another provider could help.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited { .. } | Self::Unavailable { .. })
    }
}

fn retry_hint(retry_after: &Option<Duration>) -> String {
    match retry_after {
        Some(d) => format!(" (retry after {}s)", d.as_secs()),
        None => String::new(),
    }
}
