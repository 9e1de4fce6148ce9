//! Per-client request pacing.
//!
//! Each provider client owns a [`RequestPacer`] enforcing a minimum
//! interval between its own requests, honoring the provider's published
//! rate-limit policy. Pacing is local to one client; cross-provider
//! fallback on throttling is the chain's responsibility.

use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

/// Minimum-interval pacer for a single provider endpoint.
///
/// The first request proceeds immediately; subsequent requests wait until
/// the configured interval has elapsed since the previous one. Safe to
/// share across concurrent lookups (the interior mutex serializes the
/// check-and-update).
#[derive(Debug)]
pub struct RequestPacer {
    min_interval: Duration,
    last_request: Mutex<Option<Instant>>,
}

impl RequestPacer {
    /// Creates a pacer with the given minimum inter-request interval.
    #[must_use]
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_request: Mutex::new(None),
        }
    }

    /// Creates a pacer that never delays (for tests and mock servers).
    #[must_use]
    pub fn unpaced() -> Self {
        Self::new(Duration::ZERO)
    }

    /// Returns the configured minimum interval.
    #[must_use]
    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Waits until a request may be issued, then records the request time.
    pub async fn acquire(&self) {
        if self.min_interval.is_zero() {
            return;
        }

        let mut last_request = self.last_request.lock().await;
        if let Some(last) = *last_request {
            let elapsed = last.elapsed();
            if elapsed < self.min_interval {
                let delay = self.min_interval.saturating_sub(elapsed);
                debug!(delay_ms = delay.as_millis(), "pacing provider request");
                tokio::time::sleep(delay).await;
            }
        }
        *last_request = Some(Instant::now());
    }
}

/// Parses a `Retry-After` header value: either delta-seconds or an
/// RFC 7231 HTTP-date.
#[must_use]
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    let trimmed = value.trim();
    if let Ok(seconds) = trimmed.parse::<u64>() {
        return Some(Duration::from_secs(seconds));
    }
    let when = httpdate::parse_http_date(trimmed).ok()?;
    when.duration_since(std::time::SystemTime::now()).ok()
}
