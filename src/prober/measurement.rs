//! Measurement data model.
//!
//! One [`Measurement`] is produced per probe attempt. Probe-stage failures
//! live in [`Measurement::error`] with a short classifier prefix
//! (`tcp dial:`, `tls dial:`, `http:`, `read body:`) so logs can be
//! categorized without structured errors.

use std::collections::BTreeMap;
use std::net::IpAddr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Validation failure tag: certificate CN matched no trusted CN.
pub const FAILURE_CERT_CN_MISMATCH: &str = "certificate_cn_mismatch";
/// Validation failure tag: an origin was expected but none was observed.
pub const FAILURE_ORIGIN_MISSING: &str = "origin_host_missing";
/// Validation failure tag: the observed origin differs from the expected one.
pub const FAILURE_ORIGIN_MISMATCH: &str = "origin_host_mismatch";

/// TLS and HTTP integrity information.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IntegrityReport {
    pub tls_server_name: String,
    pub certificate_cn: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub certificate_sans: Vec<String>,
    pub matches_sni: bool,
    pub http_status: u16,
    pub response_hash: String,
}

/// Colo metadata extracted from response headers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LocationInfo {
    pub colo: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub city: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub country: String,
}

/// High-level HTTP characteristics observed during the probe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpFingerprint {
    pub status_code: u16,
    /// Allow-listed response headers only.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    /// Declared Content-Length; -1 when the server did not send one.
    pub content_length: i64,
}

impl Default for HttpFingerprint {
    fn default() -> Self {
        HttpFingerprint {
            status_code: 0,
            headers: BTreeMap::new(),
            content_length: -1,
        }
    }
}

/// Outcome of the post-probe safety checks.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub sni: String,
    pub certificate_cn: String,
    pub certificate_match: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub expected_cns: Vec<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub origin_host: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub expected_origin: String,
    pub origin_match: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<String>,
}

/// The complete record of one probe attempt against one candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    pub ip: IpAddr,
    pub domain: String,
    pub request_host: String,
    pub tcp_duration: Duration,
    pub tls_duration: Duration,
    pub http_duration: Duration,
    pub success: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,
    pub alpn: String,
    pub tls_version: String,
    pub sni: String,
    /// Bits per second over the HTTP stage; 0 when unknown.
    pub throughput: f64,
    pub cf_ray: String,
    pub cf_colo: String,
    pub source: String,
    pub source_type: String,
    pub source_weight: f64,
    pub provider: String,
    pub network: String,
    pub family: String,
    pub certificate_cn: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub certificate_dns_names: Vec<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub origin_host: String,
    pub http_fingerprint: HttpFingerprint,
    pub validation: ValidationResult,
    pub integrity: IntegrityReport,
    pub bytes_read: u64,
    pub location: LocationInfo,
    pub timestamp: DateTime<Utc>,
}

impl Measurement {
    /// Returns an empty measurement for the given target, stamped now.
    pub fn new(ip: IpAddr, domain: &str) -> Self {
        Measurement {
            ip,
            domain: domain.to_string(),
            request_host: String::new(),
            tcp_duration: Duration::ZERO,
            tls_duration: Duration::ZERO,
            http_duration: Duration::ZERO,
            success: false,
            error: String::new(),
            alpn: String::new(),
            tls_version: String::new(),
            sni: String::new(),
            throughput: 0.0,
            cf_ray: String::new(),
            cf_colo: String::new(),
            source: String::new(),
            source_type: String::new(),
            source_weight: 0.0,
            provider: String::new(),
            network: String::new(),
            family: String::new(),
            certificate_cn: String::new(),
            certificate_dns_names: Vec::new(),
            origin_host: String::new(),
            http_fingerprint: HttpFingerprint::default(),
            validation: ValidationResult::default(),
            integrity: IntegrityReport::default(),
            bytes_read: 0,
            location: LocationInfo::default(),
            timestamp: Utc::now(),
        }
    }

    /// Sum of the three stage durations.
    pub fn total_latency(&self) -> Duration {
        self.tcp_duration + self.tls_duration + self.http_duration
    }

    /// Evaluates the measurement against the expected origin and trusted
    /// CNs, filling [`Measurement::validation`].
    ///
    /// With trusted CNs configured, the certificate matches when its CN or
    /// any DNS name equals (case-insensitively) one of them; without, the
    /// CN must equal the probe domain. An empty expected origin accepts any
    /// observed origin.
    pub fn apply_validation(&mut self, expected_origin: &str, trusted_cns: &[String]) {
        let mut validation = ValidationResult {
            sni: self.domain.clone(),
            certificate_cn: self.certificate_cn.clone(),
            expected_cns: trusted_cns.to_vec(),
            origin_host: self.origin_host.clone(),
            expected_origin: expected_origin.to_string(),
            ..ValidationResult::default()
        };

        let certificate_match = if trusted_cns.is_empty() {
            self.certificate_cn.eq_ignore_ascii_case(&self.domain)
        } else {
            let trusted: Vec<String> = trusted_cns
                .iter()
                .map(|cn| cn.trim().to_lowercase())
                .filter(|cn| !cn.is_empty())
                .collect();
            let cn = self.certificate_cn.to_lowercase();
            trusted.iter().any(|t| {
                cn == *t
                    || self
                        .certificate_dns_names
                        .iter()
                        .any(|alt| alt.to_lowercase() == *t)
            })
        };
        validation.certificate_match = certificate_match;
        if !certificate_match {
            validation.failures.push(FAILURE_CERT_CN_MISMATCH.to_string());
        }

        if expected_origin.is_empty() {
            validation.origin_match = true;
        } else if self.origin_host.is_empty() {
            validation.failures.push(FAILURE_ORIGIN_MISSING.to_string());
        } else if expected_origin.eq_ignore_ascii_case(&self.origin_host) {
            validation.origin_match = true;
        } else {
            validation.failures.push(FAILURE_ORIGIN_MISMATCH.to_string());
        }

        self.validation = validation;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn measurement() -> Measurement {
        Measurement::new("1.1.1.1".parse().unwrap(), "example.com")
    }

    #[test]
    fn empty_trusted_cns_match_the_domain_itself() {
        let mut m = measurement();
        m.certificate_cn = "Example.COM".into();
        m.apply_validation("", &[]);
        assert!(m.validation.certificate_match);
        assert!(m.validation.origin_match);
        assert!(m.validation.failures.is_empty());
    }

    #[test]
    fn trusted_cns_match_cn_or_dns_names() {
        let mut m = measurement();
        m.certificate_cn = "edge.example".into();
        m.certificate_dns_names = vec!["alt.example".into()];
        m.apply_validation("", &["ALT.EXAMPLE".into()]);
        assert!(m.validation.certificate_match);

        m.apply_validation("", &["other.example".into()]);
        assert!(!m.validation.certificate_match);
        assert_eq!(m.validation.failures, vec![FAILURE_CERT_CN_MISMATCH]);
    }

    #[test]
    fn mismatched_certificate_and_origin_collect_both_tags() {
        let mut m = measurement();
        m.certificate_cn = "bad.example".into();
        m.origin_host = "other.example".into();
        m.apply_validation("origin.example", &[]);
        assert!(!m.validation.certificate_match);
        assert!(!m.validation.origin_match);
        assert_eq!(
            m.validation.failures,
            vec![FAILURE_CERT_CN_MISMATCH, FAILURE_ORIGIN_MISMATCH]
        );
    }

    #[test]
    fn missing_origin_is_its_own_failure() {
        let mut m = measurement();
        m.certificate_cn = "example.com".into();
        m.apply_validation("origin.example", &[]);
        assert!(!m.validation.origin_match);
        assert_eq!(m.validation.failures, vec![FAILURE_ORIGIN_MISSING]);
    }

    #[test]
    fn origin_comparison_is_case_insensitive() {
        let mut m = measurement();
        m.certificate_cn = "example.com".into();
        m.origin_host = "Origin.Example".into();
        m.apply_validation("origin.example", &[]);
        assert!(m.validation.origin_match);
        assert!(m.validation.failures.is_empty());
    }

    #[test]
    fn validation_is_idempotent() {
        let mut m = measurement();
        m.certificate_cn = "bad.example".into();
        m.apply_validation("origin.example", &[]);
        m.apply_validation("origin.example", &[]);
        assert_eq!(m.validation.failures.len(), 2);
    }

    #[test]
    fn record_roundtrips_through_json() {
        let mut m = measurement();
        m.success = true;
        m.http_fingerprint.status_code = 200;
        m.tcp_duration = Duration::from_millis(12);
        let json = serde_json::to_string(&m).unwrap();
        let back: Measurement = serde_json::from_str(&json).unwrap();
        assert_eq!(back, m);
    }
}
