//! Unified error handling.
//!
//! Fetch-side failures are typed so callers can distinguish configuration
//! mistakes from transient network problems and from malformed catalog
//! payloads. Probe-stage failures are not errors: they are recorded on the
//! measurement itself (see `prober::Measurement::error`) so a dead edge IP
//! produces data instead of aborting a scan.

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, EdgeScoutError>;

/// Coarse classification for metrics and log-based triage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// User or configuration mistakes (bad URL scheme, missing source, ...).
    Configuration,
    /// Transient or remote-service problems.
    Network,
    /// Catalog payloads that could not be decoded.
    Format,
    /// Some sources failed while others succeeded.
    Partial,
    /// The surrounding operation was cancelled.
    Cancelled,
    /// Everything else.
    Internal,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorCategory::Configuration => "configuration",
            ErrorCategory::Network => "network",
            ErrorCategory::Format => "format",
            ErrorCategory::Partial => "partial",
            ErrorCategory::Cancelled => "cancelled",
            ErrorCategory::Internal => "internal",
        };
        f.write_str(s)
    }
}

/// Primary error type for the edge scout.
#[derive(Error, Debug)]
pub enum EdgeScoutError {
    /// Invalid configuration: missing parser, non-positive credibility,
    /// bad endpoint scheme, and friends.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A source name that matches no configured provider.
    #[error("unknown source {0:?}")]
    UnknownSource(String),

    /// Transport-level failure while fetching a catalog endpoint.
    #[error("fetch {url}: {source}")]
    Network {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// A catalog endpoint answered with a non-2xx status.
    #[error("{url} returned status {status}")]
    EndpointStatus { url: String, status: u16 },

    /// A catalog payload that could not be parsed; carries the offending
    /// token so log lines identify the bad row.
    #[error("parse {token:?}: {reason}")]
    Format { token: String, reason: String },

    /// Every endpoint of a single provider failed.
    #[error("all endpoints failed for {provider}: {reason}")]
    ProviderFailed { provider: String, reason: String },

    /// At least one provider failed while at least one succeeded.
    #[error(transparent)]
    PartialFetch(#[from] PartialFetchError),

    /// Every provider failed and no cache was available.
    #[error("all sources failed: {0}")]
    AllSourcesFailed(String),

    /// Cooperative cancellation won a race against a sleep or an I/O wait.
    #[error("operation cancelled")]
    Cancelled,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl EdgeScoutError {
    /// Maps the error onto its reporting category.
    pub fn category(&self) -> ErrorCategory {
        match self {
            EdgeScoutError::Configuration(_) | EdgeScoutError::UnknownSource(_) => {
                ErrorCategory::Configuration
            }
            EdgeScoutError::Network { .. }
            | EdgeScoutError::EndpointStatus { .. }
            | EdgeScoutError::ProviderFailed { .. }
            | EdgeScoutError::AllSourcesFailed(_) => ErrorCategory::Network,
            EdgeScoutError::Format { .. } => ErrorCategory::Format,
            EdgeScoutError::PartialFetch(_) => ErrorCategory::Partial,
            EdgeScoutError::Cancelled => ErrorCategory::Cancelled,
            EdgeScoutError::Io(_) | EdgeScoutError::Json(_) | EdgeScoutError::Other(_) => {
                ErrorCategory::Internal
            }
        }
    }

    /// True when the error was produced by cancellation rather than failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, EdgeScoutError::Cancelled)
    }
}

/// Failure of a single provider, kept alongside the successful ones.
#[derive(Debug)]
pub struct ProviderFailure {
    /// Lower-case provider name.
    pub provider: String,
    /// The error that sank it.
    pub error: EdgeScoutError,
}

/// Returned by `Fetcher::fetch_all` when some (but not all) providers failed.
///
/// Non-fatal: scans proceed on the surviving sources.
#[derive(Error, Debug)]
#[error("{} of {} sources failed: {}", .failures.len(), .total, failed_names(.failures))]
pub struct PartialFetchError {
    /// Number of providers attempted.
    pub total: usize,
    /// One entry per failed provider.
    pub failures: Vec<ProviderFailure>,
}

fn failed_names(failures: &[ProviderFailure]) -> String {
    let names: Vec<&str> = failures.iter().map(|f| f.provider.as_str()).collect();
    names.join(", ")
}
