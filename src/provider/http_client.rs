//! Shared HTTP client construction policy for provider clients.
//!
//! Centralizes networking defaults so provider adapters stay consistent
//! on timeouts, user-agent, and compression.

use std::time::Duration;

use reqwest::Client;

use super::ProviderError;

const CONNECT_TIMEOUT_SECS: u64 = 10;
const READ_TIMEOUT_SECS: u64 = 30;

/// Builds the single shared user-agent string used by every provider
/// client, so traffic identifies the tool without per-provider
/// fingerprinting.
#[must_use]
pub fn standard_user_agent() -> String {
    format!(
        "snowball/{} (systematic-review tool; +https://github.com/fierce/snowball)",
        env!("CARGO_PKG_VERSION")
    )
}

/// Builds a provider HTTP client using shared project policy.
///
/// `provider_name` is used only in error messages, not in the user-agent.
///
/// # Errors
///
/// Returns [`ProviderError::Unavailable`] when client construction fails.
pub fn build_provider_http_client(provider_name: &str) -> Result<Client, ProviderError> {
    Client::builder()
        .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
        .timeout(Duration::from_secs(READ_TIMEOUT_SECS))
        .user_agent(standard_user_agent())
        .gzip(true)
        .build()
        .map_err(|error| {
            ProviderError::unavailable(format!(
                "{provider_name}: HTTP client construction failed: {error}"
            ))
        })
}
