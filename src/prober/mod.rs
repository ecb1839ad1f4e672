//! Layered probing of a single edge IP.
//!
//! Three stages run in order, each timed from just before issue to just
//! after completion:
//!
//! 1. **TCP** — dial `ip:port` and close; proves basic reachability.
//! 2. **TLS** — handshake with SNI = target domain, capturing ALPN, TLS
//!    version, and the leaf certificate's identity.
//! 3. **HTTP** — `GET https://{domain}{path}` over a client whose resolver
//!    pins the domain to the candidate IP while TLS keeps the domain as
//!    ServerName; the body streams through a capped SHA-256 hasher.
//!
//! Stage failures short-circuit into a measurement with `success = false`
//! and a classifier-prefixed error; they are data, not errors. The prober
//! itself is stateless, so probes may run concurrently.

mod measurement;
mod tls;

pub use measurement::{
    HttpFingerprint, IntegrityReport, LocationInfo, Measurement, ValidationResult,
    FAILURE_CERT_CN_MISMATCH, FAILURE_ORIGIN_MISMATCH, FAILURE_ORIGIN_MISSING,
};

use std::net::{IpAddr, SocketAddr};
use std::time::{Duration, Instant};

use futures::StreamExt;
use log::debug;
use sha2::{Digest, Sha256};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;

use crate::config::{
    CF_COLO_FALLBACK_HEADER, CF_RAY_HEADER, DEFAULT_HTTP_PATH, DEFAULT_ORIGIN_HEADERS,
    DEFAULT_PROBE_PORT, DEFAULT_USER_AGENT, HTTP_CLIENT_TIMEOUT, MAX_BODY_HASH_BYTES,
    RESPONSE_HEADER_ALLOWLIST, TCP_DIAL_TIMEOUT, TLS_HANDSHAKE_TIMEOUT,
};
use crate::errors::{EdgeScoutError, Result};
use crate::geo;

/// Executes network measurements against edge IPs.
#[derive(Debug, Clone)]
pub struct Prober {
    port: u16,
    http_method: reqwest::Method,
    http_path: String,
    user_agent: String,
    dial_timeout: Duration,
    handshake_timeout: Duration,
    http_timeout: Duration,
    /// Headers consulted, in order, for an origin-identifying value.
    origin_headers: Vec<String>,
}

impl Default for Prober {
    fn default() -> Self {
        Prober {
            port: DEFAULT_PROBE_PORT,
            http_method: reqwest::Method::GET,
            http_path: DEFAULT_HTTP_PATH.to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            dial_timeout: TCP_DIAL_TIMEOUT,
            handshake_timeout: TLS_HANDSHAKE_TIMEOUT,
            http_timeout: HTTP_CLIENT_TIMEOUT,
            origin_headers: DEFAULT_ORIGIN_HEADERS
                .iter()
                .map(|h| (*h).to_string())
                .collect(),
        }
    }
}

impl Prober {
    /// Returns a prober with the default port, path, and timeouts.
    pub fn new() -> Self {
        Prober::default()
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_http_path(mut self, path: impl Into<String>) -> Self {
        self.http_path = path.into();
        self
    }

    /// Replaces the origin-identifying header candidates.
    pub fn with_origin_headers(mut self, headers: Vec<String>) -> Self {
        self.origin_headers = headers;
        self
    }

    pub fn with_timeouts(mut self, dial: Duration, handshake: Duration, http: Duration) -> Self {
        self.dial_timeout = dial;
        self.handshake_timeout = handshake;
        self.http_timeout = http;
        self
    }

    /// Executes the TCP, TLS, and HTTP stages for the given IP.
    ///
    /// Only cancellation and client-construction problems surface as
    /// errors; every network-level failure is recorded on the returned
    /// measurement instead.
    pub async fn probe(
        &self,
        cancel: &CancellationToken,
        ip: IpAddr,
        domain: &str,
    ) -> Result<Measurement> {
        if domain.is_empty() {
            return Err(EdgeScoutError::Configuration("domain is required".into()));
        }
        let mut m = Measurement::new(ip, domain);
        m.integrity.tls_server_name = domain.to_string();
        let addr = SocketAddr::new(ip, self.port);

        // TCP stage
        let tcp_start = Instant::now();
        let dialed = tokio::select! {
            _ = cancel.cancelled() => return Err(EdgeScoutError::Cancelled),
            res = tokio::time::timeout(self.dial_timeout, TcpStream::connect(addr)) => res,
        };
        match dialed {
            Ok(Ok(stream)) => {
                m.tcp_duration = tcp_start.elapsed();
                drop(stream);
            }
            Ok(Err(e)) => {
                m.error = format!("tcp dial: {e}");
                return Ok(m);
            }
            Err(_) => {
                m.error = format!("tcp dial: timeout after {:?}", self.dial_timeout);
                return Ok(m);
            }
        }

        // TLS stage
        let tls_start = Instant::now();
        let observed = tokio::select! {
            _ = cancel.cancelled() => return Err(EdgeScoutError::Cancelled),
            res = tls::handshake(addr, domain, self.handshake_timeout) => res,
        };
        match observed {
            Ok(obs) => {
                m.tls_duration = tls_start.elapsed();
                m.alpn = obs.alpn;
                m.tls_version = obs.tls_version;
                m.sni = obs.server_name;
                m.certificate_cn = obs.certificate_cn.clone();
                m.certificate_dns_names = obs.certificate_dns_names.clone();
                m.integrity.certificate_cn = obs.certificate_cn;
                m.integrity.certificate_sans = obs.certificate_dns_names;
                m.integrity.matches_sni = obs.matches_sni;
            }
            Err(e) => {
                m.error = format!("tls dial: {e:#}");
                return Ok(m);
            }
        }

        // HTTP stage, on a fresh client that routes the domain to this IP
        let client = reqwest::Client::builder()
            .user_agent(&self.user_agent)
            .resolve(domain, addr)
            .use_rustls_tls()
            .danger_accept_invalid_certs(true)
            .connect_timeout(self.dial_timeout)
            .timeout(self.http_timeout)
            .build()
            .map_err(|e| EdgeScoutError::Other(e.into()))?;

        let url = if self.port == 443 {
            format!("https://{domain}{}", self.http_path)
        } else {
            format!("https://{domain}:{}{}", self.port, self.http_path)
        };
        m.request_host = domain.to_string();

        let http_start = Instant::now();
        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(EdgeScoutError::Cancelled),
            res = client.request(self.http_method.clone(), url.as_str()).send() => res,
        };
        let response = match response {
            Ok(resp) => resp,
            Err(e) => {
                m.error = format!("http: {e}");
                return Ok(m);
            }
        };

        let status = response.status().as_u16();
        m.http_fingerprint.status_code = status;
        m.integrity.http_status = status;
        m.http_fingerprint.content_length = response
            .content_length()
            .map_or(-1, |len| i64::try_from(len).unwrap_or(i64::MAX));
        for name in RESPONSE_HEADER_ALLOWLIST {
            if let Some(value) = header_str(&response, name) {
                m.http_fingerprint.headers.insert(name.to_string(), value);
            }
        }
        for name in &self.origin_headers {
            if let Some(value) = header_str(&response, name) {
                if !value.trim().is_empty() {
                    m.origin_host = value.trim().to_string();
                    break;
                }
            }
        }
        m.cf_ray = header_str(&response, CF_RAY_HEADER).unwrap_or_default();
        m.cf_colo = colo_from_ray(&m.cf_ray);
        if m.cf_colo.is_empty() {
            m.cf_colo = header_str(&response, CF_COLO_FALLBACK_HEADER)
                .unwrap_or_default()
                .to_ascii_uppercase();
        }

        // Stream the body through the hasher, capped, discarding the bytes.
        let mut hasher = Sha256::new();
        let mut bytes_read: u64 = 0;
        let mut stream = response.bytes_stream();
        loop {
            let chunk = tokio::select! {
                _ = cancel.cancelled() => return Err(EdgeScoutError::Cancelled),
                chunk = stream.next() => chunk,
            };
            match chunk {
                Some(Ok(bytes)) => {
                    let remaining = MAX_BODY_HASH_BYTES - bytes_read;
                    let take = bytes.len().min(remaining as usize);
                    hasher.update(&bytes[..take]);
                    bytes_read += take as u64;
                    if bytes_read >= MAX_BODY_HASH_BYTES {
                        break;
                    }
                }
                Some(Err(e)) => {
                    m.error = format!("read body: {e}");
                    break;
                }
                None => break,
            }
        }
        m.bytes_read = bytes_read;
        m.http_duration = http_start.elapsed();
        m.integrity.response_hash = hex::encode(hasher.finalize());

        let duration_seconds = m.http_duration.as_secs_f64();
        if duration_seconds > 0.0 {
            m.throughput = (bytes_read * 8) as f64 / duration_seconds;
        }

        match geo::lookup_colo(&m.cf_colo) {
            Some(info) => {
                m.location = LocationInfo {
                    colo: info.code,
                    city: info.city,
                    country: info.country,
                };
            }
            None => {
                m.location.colo = m.cf_colo.clone();
            }
        }

        m.success = (200..400).contains(&status) && m.error.is_empty();
        debug!(
            "probe {ip} {domain}: status={status} colo={} success={}",
            m.cf_colo, m.success
        );
        Ok(m)
    }
}

fn header_str(response: &reqwest::Response, name: &str) -> Option<String> {
    response
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string())
}

/// Extracts the colo code from a `<ray>-<COLO>` value; empty when the
/// header is absent or malformed.
fn colo_from_ray(cf_ray: &str) -> String {
    let parts: Vec<&str> = cf_ray.split('-').collect();
    if parts.len() == 2 && !parts[1].is_empty() {
        parts[1].to_ascii_uppercase()
    } else {
        String::new()
    }
}
