//! Shared HTTP client factory.
//!
//! Provides consistent HTTP client configuration across backends and the scanner.

use reqwest::Client;
use std::time::Duration;

/// Default timeout for API calls (30 seconds).
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Short timeout for reachability probes (5 seconds).
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Connect timeout applied to every client.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// User agent sent with every request.
pub const USER_AGENT: &str = concat!("modelmesh/", env!("CARGO_PKG_VERSION"));

/// Create a new HTTP client with the default timeout.
pub fn create_client() -> Client {
    create_client_with_timeout(DEFAULT_TIMEOUT)
}

/// Create a new HTTP client with a custom total-request timeout.
pub fn create_client_with_timeout(timeout: Duration) -> Client {
    match Client::builder()
        .timeout(timeout)
        .connect_timeout(CONNECT_TIMEOUT.min(timeout))
        .user_agent(USER_AGENT)
        .build()
    {
        Ok(client) => client,
        Err(e) => {
            tracing::warn!("Falling back to default HTTP client: {}", e);
            Client::new()
        }
    }
}
