//! HTTP client and crypto-provider initialization.

use std::time::Duration;

use crate::config::{DEFAULT_USER_AGENT, FETCH_TIMEOUT};
use crate::errors::Result;

/// Initializes the shared HTTP client used for catalog fetches.
///
/// Configured with the fetch timeout, the scout User-Agent, and the rustls
/// TLS backend.
pub fn init_client() -> Result<reqwest::Client> {
    init_client_with(FETCH_TIMEOUT, DEFAULT_USER_AGENT)
}

/// [`init_client`] with explicit timeout and User-Agent.
pub fn init_client_with(timeout: Duration, user_agent: &str) -> Result<reqwest::Client> {
    let client = reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(user_agent)
        .use_rustls_tls()
        .build()
        .map_err(|e| anyhow::anyhow!("HTTP client initialization: {e}"))?;
    Ok(client)
}

/// Installs the process-wide rustls crypto provider.
///
/// Safe to call more than once; later calls are no-ops.
pub fn init_crypto_provider() {
    let _ = rustls::crypto::ring::default_provider().install_default();
}
