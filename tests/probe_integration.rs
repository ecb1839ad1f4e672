//! Prober integration tests against a local TLS server.
//!
//! The server answers with a fixed body and configurable headers over a
//! self-signed localhost certificate (see tests/fixtures/). Probes accept
//! the certificate at the TLS layer and record identity mismatches instead
//! of failing, so the fixture works without a trust store.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;

use edgescout::{initialization, Prober};

const CERT_PEM: &[u8] = include_bytes!("fixtures/localhost.crt");
const KEY_PEM: &[u8] = include_bytes!("fixtures/localhost.key");

fn server_tls_config() -> Arc<rustls::ServerConfig> {
    let certs = rustls_pemfile::certs(&mut &CERT_PEM[..])
        .collect::<Result<Vec<_>, _>>()
        .expect("fixture certificate should parse");
    let key = rustls_pemfile::private_key(&mut &KEY_PEM[..])
        .expect("fixture key should parse")
        .expect("fixture key should be present");
    let mut config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .expect("server config should build");
    config.alpn_protocols = vec![b"http/1.1".to_vec()];
    Arc::new(config)
}

/// Serves `body` over HTTPS on an ephemeral port. Bare TCP connects and
/// handshake-only connections (the probe's first two stages) are tolerated.
async fn spawn_tls_server(
    body: &'static str,
    headers: &'static [(&'static str, &'static str)],
) -> SocketAddr {
    initialization::init_crypto_provider();
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("listener should bind");
    let addr = listener.local_addr().unwrap();
    let acceptor = TlsAcceptor::from(server_tls_config());
    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                break;
            };
            let acceptor = acceptor.clone();
            tokio::spawn(async move {
                let Ok(mut tls) = acceptor.accept(stream).await else {
                    return;
                };
                let mut request = Vec::new();
                let mut buf = [0u8; 4096];
                loop {
                    match tls.read(&mut buf).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => {
                            request.extend_from_slice(&buf[..n]);
                            if request.windows(4).any(|w| w == b"\r\n\r\n") {
                                break;
                            }
                        }
                    }
                }
                let mut response = format!(
                    "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nContent-Type: text/plain\r\nConnection: close\r\n",
                    body.len()
                );
                for (name, value) in headers {
                    response.push_str(&format!("{name}: {value}\r\n"));
                }
                response.push_str("\r\n");
                response.push_str(body);
                let _ = tls.write_all(response.as_bytes()).await;
                let _ = tls.shutdown().await;
            });
        }
    });
    addr
}

fn prober_for(addr: SocketAddr) -> Prober {
    Prober::new().with_port(addr.port()).with_timeouts(
        Duration::from_secs(2),
        Duration::from_secs(2),
        Duration::from_secs(2),
    )
}

#[tokio::test]
async fn probe_happy_path_captures_all_three_stages() {
    let addr = spawn_tls_server("hello", &[("CF-RAY", "8c2f3a1b4d5e6f70-SJC")]).await;
    let prober = prober_for(addr);
    let cancel = CancellationToken::new();

    let m = prober
        .probe(&cancel, addr.ip(), "localhost")
        .await
        .expect("probe should not error");

    assert!(m.success, "error was {:?}", m.error);
    assert_eq!(m.http_fingerprint.status_code, 200);
    assert_eq!(m.cf_colo, "SJC");
    assert_eq!(m.location.city, "San Jose");
    assert_eq!(m.bytes_read, 5);
    assert!(!m.integrity.response_hash.is_empty());
    assert_eq!(m.alpn, "http/1.1");
    assert_eq!(m.tls_version, "TLS1.3");
    assert_eq!(m.sni, "localhost");
    assert_eq!(m.certificate_cn, "localhost");
    assert!(m.integrity.matches_sni);
    assert!(m.tcp_duration > Duration::ZERO);
    assert!(m.tls_duration > Duration::ZERO);
    assert!(m.http_duration > Duration::ZERO);
    assert!(m.throughput > 0.0);
    assert_eq!(
        m.http_fingerprint.headers.get("Content-Type").map(String::as_str),
        Some("text/plain")
    );
}

#[tokio::test]
async fn identical_bodies_hash_identically() {
    let addr = spawn_tls_server("stable-body", &[]).await;
    let prober = prober_for(addr);
    let cancel = CancellationToken::new();
    let first = prober.probe(&cancel, addr.ip(), "localhost").await.unwrap();
    let second = prober.probe(&cancel, addr.ip(), "localhost").await.unwrap();
    assert_eq!(first.integrity.response_hash, second.integrity.response_hash);
}

#[tokio::test]
async fn origin_header_is_extracted_in_declared_order() {
    let addr = spawn_tls_server(
        "ok",
        &[
            ("CF-Worker-Upstream", "origin.example"),
            ("CF-Cache-Status", "HIT"),
        ],
    )
    .await;
    let prober = prober_for(addr);
    let cancel = CancellationToken::new();
    let m = prober.probe(&cancel, addr.ip(), "localhost").await.unwrap();
    // first non-empty candidate wins
    assert_eq!(m.origin_host, "origin.example");
}

#[tokio::test]
async fn colo_fallback_header_is_used_when_ray_is_malformed() {
    let addr = spawn_tls_server(
        "ok",
        &[("CF-RAY", "malformed"), ("CF-ORIGIN-COL", "lhr")],
    )
    .await;
    let prober = prober_for(addr);
    let cancel = CancellationToken::new();
    let m = prober.probe(&cancel, addr.ip(), "localhost").await.unwrap();
    assert_eq!(m.cf_colo, "LHR");
    assert_eq!(m.location.city, "London");
}

#[tokio::test]
async fn unknown_colo_keeps_only_the_code() {
    let addr = spawn_tls_server("ok", &[("CF-RAY", "8c2f3a1b4d5e6f70-QQQ")]).await;
    let prober = prober_for(addr);
    let cancel = CancellationToken::new();
    let m = prober.probe(&cancel, addr.ip(), "localhost").await.unwrap();
    assert_eq!(m.cf_colo, "QQQ");
    assert_eq!(m.location.colo, "QQQ");
    assert!(m.location.city.is_empty());
    assert!(m.location.country.is_empty());
}

#[tokio::test]
async fn validation_passes_when_certificate_covers_the_domain() {
    let addr = spawn_tls_server("ok", &[]).await;
    let prober = prober_for(addr);
    let cancel = CancellationToken::new();
    let mut m = prober.probe(&cancel, addr.ip(), "localhost").await.unwrap();
    m.apply_validation("", &[]);
    assert!(m.validation.certificate_match);
    assert!(m.validation.origin_match);
    assert!(m.validation.failures.is_empty());
}

#[tokio::test]
async fn repeated_probes_are_independent() {
    let addr = spawn_tls_server("ok", &[("CF-RAY", "1-SJC")]).await;
    let prober = prober_for(addr);
    let cancel = CancellationToken::new();
    for _ in 0..3 {
        let m = prober.probe(&cancel, addr.ip(), "localhost").await.unwrap();
        assert!(m.success);
    }
}
