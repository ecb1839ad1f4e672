//! Range providers and their per-source policies.
//!
//! Two configuration shapes coexist here, mirroring the two fetch paths:
//! [`ProviderSpec`] describes a provider with one endpoint per address
//! family (used by `fetch_provider` / `fetch_all`), while [`SourceConfig`]
//! describes an ordered endpoint list with a shared format (used by the
//! aggregating `fetch_aggregated` path).

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::DEFAULT_USER_AGENT;
use crate::errors::{EdgeScoutError, Result};

/// Whether a source is the official publication or a community mirror.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SourceKind {
    Official,
    ThirdParty,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Official => "official",
            SourceKind::ThirdParty => "third-party",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload format of a catalog endpoint.
///
/// The format tag selects the parser, so a "missing parser" is
/// unrepresentable: every endpoint carries exactly one decoding strategy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayloadFormat {
    /// Newline-separated CIDRs or bare IPs; `#` introduces a comment.
    PlainCidr,
    /// A JSON document with an array of CIDR/IP strings reachable through
    /// the ordered key `path` (empty path means the document root).
    JsonArray { path: Vec<String> },
}

/// A single catalog endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointSpec {
    pub url: String,
    pub format: PayloadFormat,
}

impl EndpointSpec {
    /// Creates a plain-CIDR endpoint.
    pub fn plain(url: impl Into<String>) -> Self {
        EndpointSpec {
            url: url.into(),
            format: PayloadFormat::PlainCidr,
        }
    }

    /// Creates a JSON-array endpoint with the given key path.
    pub fn json(url: impl Into<String>, path: &[&str]) -> Self {
        EndpointSpec {
            url: url.into(),
            format: PayloadFormat::JsonArray {
                path: path.iter().map(|s| (*s).to_string()).collect(),
            },
        }
    }

    pub(crate) fn validate(&self) -> Result<()> {
        validate_endpoint_url(&self.url)
    }
}

fn validate_endpoint_url(url: &str) -> Result<()> {
    if !url.starts_with("http://") && !url.starts_with("https://") {
        return Err(EdgeScoutError::Configuration(format!(
            "endpoint {url:?} must be HTTP or HTTPS"
        )));
    }
    Ok(())
}

/// A range provider with per-family endpoints and a sampling weight.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderSpec {
    /// Lower-case key, unique across configured providers.
    pub name: String,
    /// Human-readable name carried onto candidates and measurements.
    pub display_name: String,
    pub kind: SourceKind,
    pub description: String,
    /// Credibility weight; biases both sampling allocation and scoring.
    pub weight: f64,
    pub ipv4: Option<EndpointSpec>,
    pub ipv6: Option<EndpointSpec>,
    pub enabled: bool,
    /// Host expected in origin-identifying response headers; empty means
    /// "accept anything".
    pub expected_origin: String,
    /// CNs accepted during certificate validation; empty falls back to
    /// matching the probe domain itself.
    pub trusted_cns: Vec<String>,
}

impl ProviderSpec {
    pub(crate) fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(EdgeScoutError::Configuration(
                "provider name is required".into(),
            ));
        }
        if self.weight <= 0.0 {
            return Err(EdgeScoutError::Configuration(format!(
                "provider {} must declare a positive weight",
                self.name
            )));
        }
        if self.ipv4.is_none() && self.ipv6.is_none() {
            return Err(EdgeScoutError::Configuration(format!(
                "provider {} has no endpoints",
                self.name
            )));
        }
        for endpoint in [&self.ipv4, &self.ipv6].into_iter().flatten() {
            endpoint.validate()?;
        }
        Ok(())
    }
}

/// The built-in provider catalog.
pub fn default_providers() -> Vec<ProviderSpec> {
    vec![
        ProviderSpec {
            name: "official".into(),
            display_name: "Cloudflare official listing".into(),
            kind: SourceKind::Official,
            description: "IPv4/IPv6 ranges published by Cloudflare".into(),
            weight: 1.0,
            ipv4: Some(EndpointSpec::plain("https://www.cloudflare.com/ips-v4")),
            ipv6: Some(EndpointSpec::plain("https://www.cloudflare.com/ips-v6")),
            enabled: true,
            expected_origin: String::new(),
            trusted_cns: Vec::new(),
        },
        ProviderSpec {
            name: "bestip".into(),
            display_name: "BestIP community mirror".into(),
            kind: SourceKind::ThirdParty,
            description: "Cloudflare edge data from bestip.one".into(),
            weight: 0.8,
            ipv4: Some(EndpointSpec::json(
                "https://api.bestip.one/cloudflare/ipv4",
                &["data"],
            )),
            ipv6: Some(EndpointSpec::json(
                "https://api.bestip.one/cloudflare/ipv6",
                &["data"],
            )),
            enabled: true,
            expected_origin: String::new(),
            trusted_cns: Vec::new(),
        },
        ProviderSpec {
            name: "uouin".into(),
            display_name: "UOUIN curated nodes".into(),
            kind: SourceKind::ThirdParty,
            description: "Cloudflare node list from api.uouin.com".into(),
            weight: 0.7,
            ipv4: Some(EndpointSpec::json(
                "https://api.uouin.com/cloudflare/ipv4",
                &["data", "ipv4"],
            )),
            ipv6: Some(EndpointSpec::json(
                "https://api.uouin.com/cloudflare/ipv6",
                &["data", "ipv6"],
            )),
            enabled: true,
            expected_origin: String::new(),
            trusted_cns: Vec::new(),
        },
    ]
}

/// Selects providers by name, defaulting to all enabled ones.
///
/// Names are trimmed and lower-cased; `all` (or an empty list) selects every
/// enabled provider. Unknown names are configuration errors, and so is a
/// selection that leaves nothing enabled.
pub fn filter_providers(providers: &[ProviderSpec], names: &[String]) -> Result<Vec<ProviderSpec>> {
    let normalized: Vec<String> = names
        .iter()
        .map(|n| n.trim().to_lowercase())
        .filter(|n| !n.is_empty())
        .collect();

    if normalized.is_empty() || normalized.iter().any(|n| n == "all") {
        let out: Vec<ProviderSpec> = providers.iter().filter(|p| p.enabled).cloned().collect();
        if out.is_empty() {
            return Err(EdgeScoutError::Configuration(
                "no providers available".into(),
            ));
        }
        return Ok(out);
    }

    let mut out = Vec::with_capacity(normalized.len());
    for name in &normalized {
        let provider = providers
            .iter()
            .find(|p| p.name.to_lowercase() == *name)
            .ok_or_else(|| EdgeScoutError::UnknownSource(name.clone()))?;
        if provider.enabled {
            out.push(provider.clone());
        }
    }
    if out.is_empty() {
        return Err(EdgeScoutError::Configuration(
            "all selected providers are disabled".into(),
        ));
    }
    Ok(out)
}

/// Callback that may decorate an outgoing catalog request, e.g. with
/// authentication headers.
pub type Signer = Arc<dyn Fn(reqwest::RequestBuilder) -> reqwest::RequestBuilder + Send + Sync>;

/// Per-source policy for the aggregating fetch path.
///
/// Endpoints are tried in order; records from every succeeding endpoint are
/// collected, and the source fails only when all of them fail.
#[derive(Clone)]
pub struct SourceConfig {
    pub name: String,
    pub endpoints: Vec<String>,
    pub format: PayloadFormat,
    pub signer: Option<Signer>,
    /// Minimum interval between requests to this source.
    pub rate_limit: Duration,
    /// Credibility weight attached to every range this source contributes.
    pub credibility: f64,
}

impl fmt::Debug for SourceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceConfig")
            .field("name", &self.name)
            .field("endpoints", &self.endpoints)
            .field("format", &self.format)
            .field("signer", &self.signer.as_ref().map(|_| "<fn>"))
            .field("rate_limit", &self.rate_limit)
            .field("credibility", &self.credibility)
            .finish()
    }
}

impl SourceConfig {
    /// Ensures the source configuration is well formed.
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(EdgeScoutError::Configuration(
                "source name is required".into(),
            ));
        }
        if self.endpoints.is_empty() {
            return Err(EdgeScoutError::Configuration(format!(
                "source {} has no endpoints",
                self.name
            )));
        }
        for endpoint in &self.endpoints {
            validate_endpoint_url(endpoint).map_err(|_| {
                EdgeScoutError::Configuration(format!(
                    "source {} endpoint {:?} must be HTTP or HTTPS",
                    self.name, endpoint
                ))
            })?;
        }
        if self.credibility <= 0.0 {
            return Err(EdgeScoutError::Configuration(format!(
                "source {} must declare a positive credibility",
                self.name
            )));
        }
        Ok(())
    }
}

fn default_signer() -> Signer {
    Arc::new(|req: reqwest::RequestBuilder| req.header(reqwest::header::USER_AGENT, DEFAULT_USER_AGENT))
}

/// The official Cloudflare publication.
pub fn cloudflare_source() -> SourceConfig {
    SourceConfig {
        name: "cloudflare".into(),
        endpoints: vec![
            "https://www.cloudflare.com/ips-v4".into(),
            "https://www.cloudflare.com/ips-v6".into(),
        ],
        format: PayloadFormat::PlainCidr,
        signer: Some(default_signer()),
        rate_limit: Duration::from_millis(250),
        credibility: 1.0,
    }
}

/// Community mirror at bestip.io.
pub fn bestip_source() -> SourceConfig {
    SourceConfig {
        name: "bestip".into(),
        endpoints: vec!["https://bestip.io/cloudflare/ips".into()],
        format: PayloadFormat::PlainCidr,
        signer: Some(default_signer()),
        rate_limit: Duration::from_millis(500),
        credibility: 0.8,
    }
}

/// Community mirror at cf.17171.net.
pub fn uouin_source() -> SourceConfig {
    SourceConfig {
        name: "uouin".into(),
        endpoints: vec!["https://cf.17171.net/api/ips".into()],
        format: PayloadFormat::PlainCidr,
        signer: Some(default_signer()),
        rate_limit: Duration::from_millis(500),
        credibility: 0.75,
    }
}

/// Built-in sources for the aggregating fetch path.
pub fn default_sources() -> Vec<SourceConfig> {
    vec![cloudflare_source(), bestip_source(), uouin_source()]
}

/// Resolves source names against the built-in catalog.
pub fn named_sources(names: &[String]) -> Result<Vec<SourceConfig>> {
    if names.is_empty() {
        return Err(EdgeScoutError::Configuration("no sources requested".into()));
    }
    let available = default_sources();
    let mut configs = Vec::with_capacity(names.len());
    for name in names {
        let key = name.trim().to_lowercase();
        let cfg = available
            .iter()
            .find(|c| c.name == key)
            .ok_or_else(|| EdgeScoutError::UnknownSource(name.clone()))?;
        configs.push(cfg.clone());
    }
    Ok(configs)
}
