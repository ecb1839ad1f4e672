//! Multi-source range retrieval.
//!
//! Two fetch paths share the underlying HTTP client:
//!
//! - [`Fetcher::fetch_provider`] / [`Fetcher::fetch_all`] work against
//!   explicit [`ProviderSpec`]s and keep each provider's ranges separate so
//!   the sampler can allocate per source.
//! - [`Fetcher::fetch_aggregated`] works against the internally configured
//!   [`SourceConfig`]s with per-source rate limiting and request signing,
//!   deduplicates across sources with provenance, snapshots the result to
//!   disk, and falls back to that snapshot when every source fails.
//!
//! Network, HTTP-status, and format failures are all per-endpoint; a
//! provider fails only when all of its endpoints fail, and a fetch is fatal
//! only when every provider fails with no usable cache.

mod aggregator;
mod cache;
mod parse;
mod providers;

pub use aggregator::{AggregatedSet, Aggregator, RangeEntry, RangeMetadata, RangeRecord};
pub use parse::{parse_network, parse_payload, parse_plain_cidr};
pub use providers::{
    bestip_source, cloudflare_source, default_providers, default_sources, filter_providers,
    named_sources, uouin_source, EndpointSpec, PayloadFormat, ProviderSpec, Signer, SourceConfig,
    SourceKind,
};

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use futures::future::join_all;
use ipnet::IpNet;
use log::{debug, warn};
use tokio_util::sync::CancellationToken;

use crate::errors::{EdgeScoutError, PartialFetchError, ProviderFailure, Result};

/// IPv4 and IPv6 networks belonging to one logical set.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RangeSet {
    pub ipv4: Vec<IpNet>,
    pub ipv6: Vec<IpNet>,
}

impl RangeSet {
    pub fn is_empty(&self) -> bool {
        self.ipv4.is_empty() && self.ipv6.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ipv4.len() + self.ipv6.len()
    }
}

/// One provider's deduplicated ranges, annotated with the provider itself.
#[derive(Debug, Clone)]
pub struct SourceRange {
    pub provider: ProviderSpec,
    pub ranges: RangeSet,
}

/// Result of [`Fetcher::fetch_all`].
///
/// `partial` is populated when at least one provider failed while others
/// succeeded; scans proceed on `sources` regardless.
#[derive(Debug)]
pub struct FetchOutcome {
    pub sources: Vec<SourceRange>,
    pub partial: Option<PartialFetchError>,
}

struct ProviderState {
    config: SourceConfig,
    last_request: tokio::sync::Mutex<Option<Instant>>,
}

/// Downloads edge network ranges and parses them into structured data.
pub struct Fetcher {
    client: reqwest::Client,
    sources: Vec<Arc<ProviderState>>,
    cache_dir: Option<PathBuf>,
}

impl Fetcher {
    /// Returns a Fetcher using the provided HTTP client and the built-in
    /// source catalog.
    pub fn new(client: reqwest::Client) -> Self {
        let mut fetcher = Fetcher {
            client,
            sources: Vec::new(),
            cache_dir: None,
        };
        fetcher
            .use_sources(default_sources())
            .expect("built-in sources must validate");
        fetcher
    }

    /// Replaces the sources used by [`Fetcher::fetch_aggregated`].
    pub fn use_sources(&mut self, configs: Vec<SourceConfig>) -> Result<()> {
        let mut states = Vec::with_capacity(configs.len());
        for config in configs {
            config.validate()?;
            states.push(Arc::new(ProviderState {
                config,
                last_request: tokio::sync::Mutex::new(None),
            }));
        }
        self.sources = states;
        Ok(())
    }

    /// Enables the on-disk range snapshot under the given directory.
    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = Some(dir.into());
        self
    }

    /// Fetches one provider: the IPv4 endpoint, then the IPv6 endpoint.
    ///
    /// Either endpoint may be absent. Network, HTTP-status, and format
    /// errors are per-endpoint; the provider fails only when every
    /// attempted endpoint fails. The provider's ranges are deduplicated
    /// and IPv4-mapped IPv6 entries end up in the v4 family.
    pub async fn fetch_provider(
        &self,
        cancel: &CancellationToken,
        provider: &ProviderSpec,
    ) -> Result<SourceRange> {
        provider.validate()?;
        let mut networks = Vec::new();
        let mut errors: Vec<String> = Vec::new();
        let mut attempted = 0usize;
        for endpoint in [&provider.ipv4, &provider.ipv6].into_iter().flatten() {
            attempted += 1;
            match self.fetch_endpoint(cancel, endpoint).await {
                Ok(parsed) => networks.extend(parsed),
                Err(e) if e.is_cancelled() => return Err(e),
                Err(e) => {
                    warn!(
                        "provider {} endpoint {} failed: {e}",
                        provider.name, endpoint.url
                    );
                    errors.push(format!("{}: {e}", endpoint.url));
                }
            }
        }
        if errors.len() == attempted {
            return Err(EdgeScoutError::ProviderFailed {
                provider: provider.name.clone(),
                reason: errors.join("; "),
            });
        }

        let mut seen = HashSet::new();
        let mut ranges = RangeSet::default();
        for network in networks {
            if !seen.insert(network) {
                continue;
            }
            match network {
                IpNet::V4(_) => ranges.ipv4.push(network),
                IpNet::V6(_) => ranges.ipv6.push(network),
            }
        }
        debug!(
            "provider {}: {} ipv4 / {} ipv6 networks",
            provider.name,
            ranges.ipv4.len(),
            ranges.ipv6.len()
        );
        Ok(SourceRange {
            provider: provider.clone(),
            ranges,
        })
    }

    /// Fetches every provider concurrently and aggregates the outcomes.
    ///
    /// Returns all successful sources; `partial` lists the providers that
    /// failed. A hard error is returned only when every provider failed.
    pub async fn fetch_all(
        &self,
        cancel: &CancellationToken,
        providers: &[ProviderSpec],
    ) -> Result<FetchOutcome> {
        if providers.is_empty() {
            return Err(EdgeScoutError::Configuration(
                "no providers to fetch".into(),
            ));
        }
        let results = join_all(
            providers
                .iter()
                .map(|provider| self.fetch_provider(cancel, provider)),
        )
        .await;

        let mut sources = Vec::new();
        let mut failures = Vec::new();
        for (provider, result) in providers.iter().zip(results) {
            match result {
                Ok(source) => sources.push(source),
                Err(error) => {
                    if error.is_cancelled() {
                        return Err(error);
                    }
                    warn!("provider {} failed: {error}", provider.name);
                    failures.push(ProviderFailure {
                        provider: provider.name.clone(),
                        error,
                    });
                }
            }
        }

        if sources.is_empty() {
            let reasons: Vec<String> = failures
                .iter()
                .map(|f| format!("{}: {}", f.provider, f.error))
                .collect();
            return Err(EdgeScoutError::AllSourcesFailed(reasons.join("; ")));
        }
        let partial = if failures.is_empty() {
            None
        } else {
            Some(PartialFetchError {
                total: providers.len(),
                failures,
            })
        };
        Ok(FetchOutcome { sources, partial })
    }

    /// Fetches the configured sources, deduplicates across them, and
    /// snapshots the result; on total failure, serves the snapshot instead.
    pub async fn fetch_aggregated(&self, cancel: &CancellationToken) -> Result<AggregatedSet> {
        if self.sources.is_empty() {
            return Err(EdgeScoutError::Configuration("no sources configured".into()));
        }
        let aggregator = Aggregator::new();
        let results = join_all(
            self.sources
                .iter()
                .map(|state| self.source_fetch(cancel, Arc::clone(state))),
        )
        .await;

        let mut errors = Vec::new();
        for (state, result) in self.sources.iter().zip(results) {
            match result {
                Ok(records) => aggregator.add(records),
                Err(error) => {
                    if error.is_cancelled() {
                        return Err(error);
                    }
                    warn!("source {} failed: {error}", state.config.name);
                    errors.push(error.to_string());
                }
            }
        }

        let set = aggregator.result();
        if !set.is_empty() {
            if let Some(dir) = &self.cache_dir {
                if let Err(e) = cache::persist(&set, dir).await {
                    warn!("failed to persist range cache: {e}");
                }
            }
            return Ok(set);
        }

        if let Some(dir) = &self.cache_dir {
            if let Ok(cached) = cache::load(dir).await {
                warn!(
                    "all sources failed ({}); serving {} cached range entries",
                    errors.join("; "),
                    cached.entries.len()
                );
                return Ok(cached);
            }
        }
        Err(EdgeScoutError::AllSourcesFailed(errors.join("; ")))
    }

    /// Walks one source's endpoints in order, honoring its rate limit, and
    /// collects records from every endpoint that succeeds.
    async fn source_fetch(
        &self,
        cancel: &CancellationToken,
        state: Arc<ProviderState>,
    ) -> Result<Vec<RangeRecord>> {
        let mut aggregated = Vec::new();
        let mut errors: Vec<String> = Vec::new();
        for endpoint in &state.config.endpoints {
            wait_for_rate_limit(cancel, &state).await?;
            let mut request = self.client.get(endpoint);
            if let Some(signer) = &state.config.signer {
                request = signer(request);
            }
            let response = tokio::select! {
                _ = cancel.cancelled() => return Err(EdgeScoutError::Cancelled),
                res = request.send() => res,
            };
            let response = match response {
                Ok(resp) => resp,
                Err(e) => {
                    errors.push(format!("{endpoint}: {e}"));
                    continue;
                }
            };
            if !response.status().is_success() {
                errors.push(format!(
                    "{} returned {}",
                    endpoint,
                    response.status().as_u16()
                ));
                continue;
            }
            let body = match response.bytes().await {
                Ok(body) => body,
                Err(e) => {
                    errors.push(format!("{endpoint}: {e}"));
                    continue;
                }
            };
            let networks = match parse_payload(&body, &state.config.format) {
                Ok(networks) if networks.is_empty() => {
                    errors.push(format!("{endpoint}: no networks parsed"));
                    continue;
                }
                Ok(networks) => networks,
                Err(e) => {
                    errors.push(format!("{endpoint}: {e}"));
                    continue;
                }
            };
            let retrieved_at = Utc::now();
            aggregated.extend(networks.into_iter().map(|network| RangeRecord {
                network,
                metadata: RangeMetadata {
                    source: state.config.name.clone(),
                    endpoint: endpoint.clone(),
                    retrieved_at,
                    credibility: state.config.credibility,
                },
            }));
        }
        if !aggregated.is_empty() {
            return Ok(aggregated);
        }
        Err(EdgeScoutError::ProviderFailed {
            provider: state.config.name.clone(),
            reason: errors.join("; "),
        })
    }

    async fn fetch_endpoint(
        &self,
        cancel: &CancellationToken,
        endpoint: &EndpointSpec,
    ) -> Result<Vec<IpNet>> {
        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(EdgeScoutError::Cancelled),
            res = self.client.get(&endpoint.url).send() => res.map_err(|e| EdgeScoutError::Network {
                url: endpoint.url.clone(),
                source: e,
            })?,
        };
        if !response.status().is_success() {
            return Err(EdgeScoutError::EndpointStatus {
                url: endpoint.url.clone(),
                status: response.status().as_u16(),
            });
        }
        let body = response.bytes().await.map_err(|e| EdgeScoutError::Network {
            url: endpoint.url.clone(),
            source: e,
        })?;
        parse_payload(&body, &endpoint.format)
    }
}

/// Enforces the source's minimum inter-request interval.
///
/// The lock stays held across the sleep: endpoints of the same source must
/// remain serial for the interval to mean anything.
async fn wait_for_rate_limit(cancel: &CancellationToken, state: &ProviderState) -> Result<()> {
    if state.config.rate_limit.is_zero() {
        return Ok(());
    }
    let mut last = state.last_request.lock().await;
    if let Some(prev) = *last {
        let elapsed = prev.elapsed();
        if elapsed < state.config.rate_limit {
            let wait = state.config.rate_limit - elapsed;
            tokio::select! {
                _ = cancel.cancelled() => return Err(EdgeScoutError::Cancelled),
                _ = tokio::time::sleep(wait) => {}
            }
        }
    }
    *last = Some(Instant::now());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn test_client() -> reqwest::Client {
        reqwest::Client::builder()
            .timeout(Duration::from_secs(2))
            .build()
            .unwrap()
    }

    #[test]
    fn range_set_counts() {
        let mut rs = RangeSet::default();
        assert!(rs.is_empty());
        rs.ipv4.push("1.1.1.0/24".parse().unwrap());
        rs.ipv6.push("2400:cb00::/32".parse().unwrap());
        assert_eq!(rs.len(), 2);
    }

    #[test]
    fn use_sources_rejects_invalid_configs() {
        let mut fetcher = Fetcher::new(test_client());
        let bad = SourceConfig {
            name: String::new(),
            endpoints: vec!["https://x.example".into()],
            format: PayloadFormat::PlainCidr,
            signer: None,
            rate_limit: Duration::ZERO,
            credibility: 1.0,
        };
        assert!(fetcher.use_sources(vec![bad]).is_err());
    }

    #[tokio::test]
    async fn fetch_all_requires_providers() {
        let fetcher = Fetcher::new(test_client());
        let cancel = CancellationToken::new();
        let err = fetcher.fetch_all(&cancel, &[]).await.unwrap_err();
        assert!(matches!(err, EdgeScoutError::Configuration(_)));
    }

    #[tokio::test]
    async fn rate_limit_wait_is_cancellable() {
        let state = ProviderState {
            config: SourceConfig {
                name: "slow".into(),
                endpoints: vec!["https://x.example".into()],
                format: PayloadFormat::PlainCidr,
                signer: None,
                rate_limit: Duration::from_secs(60),
                credibility: 1.0,
            },
            last_request: tokio::sync::Mutex::new(Some(Instant::now())),
        };
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = wait_for_rate_limit(&cancel, &state).await.unwrap_err();
        assert!(err.is_cancelled());
    }

    #[tokio::test]
    async fn rate_limit_spaces_requests() {
        let state = ProviderState {
            config: SourceConfig {
                name: "spaced".into(),
                endpoints: vec!["https://x.example".into()],
                format: PayloadFormat::PlainCidr,
                signer: None,
                rate_limit: Duration::from_millis(30),
                credibility: 1.0,
            },
            last_request: tokio::sync::Mutex::new(None),
        };
        let cancel = CancellationToken::new();
        let start = Instant::now();
        wait_for_rate_limit(&cancel, &state).await.unwrap();
        wait_for_rate_limit(&cancel, &state).await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(30));
    }
}
