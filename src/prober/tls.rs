//! TLS handshake stage.
//!
//! Connects with SNI set to the target domain and ALPN `{h2, http/1.1}`,
//! then extracts the negotiated protocol, TLS version, and leaf-certificate
//! identity. Certificates are always accepted at the rustls layer so that
//! invalid or mismatched certificates still produce observations; hostname
//! agreement is checked separately and recorded on the measurement.
//!
//! Uses `tokio-rustls` for the async handshake and `x509-parser` for
//! certificate parsing.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, ProtocolVersion, SignatureScheme};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use x509_parser::extensions::{GeneralName, ParsedExtension};

/// A certificate verifier that always accepts certificates.
/// Certificate problems are observed and scored, never fatal to a probe.
#[derive(Debug)]
struct AcceptAllVerifier;

impl ServerCertVerifier for AcceptAllVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        vec![
            SignatureScheme::RSA_PKCS1_SHA256,
            SignatureScheme::RSA_PKCS1_SHA384,
            SignatureScheme::RSA_PKCS1_SHA512,
            SignatureScheme::ECDSA_NISTP256_SHA256,
            SignatureScheme::ECDSA_NISTP384_SHA384,
            SignatureScheme::ECDSA_NISTP521_SHA512,
            SignatureScheme::ED25519,
            SignatureScheme::ED448,
            SignatureScheme::RSA_PSS_SHA256,
            SignatureScheme::RSA_PSS_SHA384,
            SignatureScheme::RSA_PSS_SHA512,
        ]
    }
}

/// What the TLS stage observed.
#[derive(Debug, Clone, Default)]
pub(crate) struct TlsObservation {
    pub alpn: String,
    pub tls_version: String,
    /// The SNI we offered, echoed back for the measurement.
    pub server_name: String,
    pub certificate_cn: String,
    pub certificate_dns_names: Vec<String>,
    /// Whether the leaf certificate covers the probed domain.
    pub matches_sni: bool,
}

/// Performs one TLS handshake against `addr` with SNI `domain`.
pub(crate) async fn handshake(
    addr: SocketAddr,
    domain: &str,
    timeout: Duration,
) -> Result<TlsObservation> {
    let mut config = ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(AcceptAllVerifier))
        .with_no_client_auth();
    config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];

    let server_name =
        ServerName::try_from(domain.to_string()).map_err(|e| anyhow!("invalid server name: {e}"))?;

    let sock = tokio::time::timeout(timeout, TcpStream::connect(addr))
        .await
        .map_err(|_| anyhow!("connect timeout after {timeout:?}"))?
        .context("connect")?;

    let connector = TlsConnector::from(Arc::new(config));
    let stream = tokio::time::timeout(timeout, connector.connect(server_name, sock))
        .await
        .map_err(|_| anyhow!("handshake timeout after {timeout:?}"))?
        .context("handshake")?;

    let (_, session) = stream.get_ref();
    let mut observation = TlsObservation {
        alpn: session
            .alpn_protocol()
            .map(|proto| String::from_utf8_lossy(proto).into_owned())
            .unwrap_or_default(),
        tls_version: tls_version_string(session.protocol_version()),
        server_name: domain.to_string(),
        ..TlsObservation::default()
    };

    if let Some(certs) = session.peer_certificates() {
        if let Some(cert) = certs.first() {
            let (_, parsed) = x509_parser::parse_x509_certificate(cert.as_ref())
                .map_err(|e| anyhow!("parse certificate: {e}"))?;
            observation.certificate_cn = parsed
                .subject()
                .iter_common_name()
                .next()
                .and_then(|attr| attr.as_str().ok())
                .unwrap_or_default()
                .to_string();
            observation.certificate_dns_names = extract_dns_names(&parsed);
            observation.matches_sni = hostname_matches(
                domain,
                &observation.certificate_cn,
                &observation.certificate_dns_names,
            );
        }
    }
    // dropping the stream closes the connection; the HTTP stage dials fresh
    Ok(observation)
}

fn tls_version_string(version: Option<ProtocolVersion>) -> String {
    match version {
        Some(ProtocolVersion::TLSv1_3) => "TLS1.3",
        Some(ProtocolVersion::TLSv1_2) => "TLS1.2",
        Some(ProtocolVersion::TLSv1_1) => "TLS1.1",
        Some(ProtocolVersion::TLSv1_0) => "TLS1.0",
        _ => "unknown",
    }
    .to_string()
}

/// DNS names from the Subject Alternative Name extension. Only DNS entries
/// are relevant for hostname agreement; other name forms are ignored.
fn extract_dns_names(cert: &x509_parser::certificate::X509Certificate<'_>) -> Vec<String> {
    let mut names = Vec::new();
    for ext in cert.extensions() {
        if let ParsedExtension::SubjectAlternativeName(san) = ext.parsed_extension() {
            for general_name in &san.general_names {
                if let GeneralName::DNSName(dns_name) = general_name {
                    names.push((*dns_name).to_string());
                }
            }
        }
    }
    names
}

/// Hostname agreement against the leaf certificate: SANs win when present,
/// otherwise the CN is consulted. Wildcards cover exactly one left label.
pub(crate) fn hostname_matches(host: &str, cn: &str, dns_names: &[String]) -> bool {
    let host = host.to_ascii_lowercase();
    if dns_names.is_empty() {
        return pattern_matches(cn, &host);
    }
    dns_names.iter().any(|name| pattern_matches(name, &host))
}

fn pattern_matches(pattern: &str, host: &str) -> bool {
    let pattern = pattern.to_ascii_lowercase();
    if let Some(suffix) = pattern.strip_prefix("*.") {
        return match host.split_once('.') {
            Some((label, tail)) => !label.is_empty() && tail == suffix,
            None => false,
        };
    }
    pattern == host
}
