//! Catalog payload parsers.
//!
//! Both formats funnel into [`parse_network`], which accepts a CIDR or a
//! bare IP (promoted to /32 or /128) and normalizes IPv4-mapped IPv6 values
//! back to the v4 family so equality and textual rendering stay canonical.

use ipnet::{IpNet, Ipv4Net};
use std::net::IpAddr;

use super::providers::PayloadFormat;
use crate::errors::{EdgeScoutError, Result};

/// Parses the raw endpoint payload according to its declared format.
pub fn parse_payload(bytes: &[u8], format: &PayloadFormat) -> Result<Vec<IpNet>> {
    match format {
        PayloadFormat::PlainCidr => {
            let text = std::str::from_utf8(bytes).map_err(|e| EdgeScoutError::Format {
                token: "<payload>".into(),
                reason: format!("payload is not UTF-8: {e}"),
            })?;
            parse_plain_cidr(text)
        }
        PayloadFormat::JsonArray { path } => parse_json_array(bytes, path),
    }
}

/// Parses newline-separated CIDRs or bare IPs; `#` comments and blank lines
/// are skipped. Any bad row fails the whole payload.
pub fn parse_plain_cidr(text: &str) -> Result<Vec<IpNet>> {
    let mut networks = Vec::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        networks.push(parse_network(line)?);
    }
    Ok(networks)
}

/// Decodes a JSON document and walks `path` to an array of CIDR/IP strings.
///
/// Non-string array items are skipped (some mirrors interleave objects with
/// the address strings); a string item that fails to parse fails the
/// payload.
pub fn parse_json_array(bytes: &[u8], path: &[String]) -> Result<Vec<IpNet>> {
    let payload: serde_json::Value = serde_json::from_slice(bytes)?;
    let mut target = &payload;
    for key in path {
        target = target
            .as_object()
            .and_then(|obj| obj.get(key))
            .ok_or_else(|| EdgeScoutError::Format {
                token: path.join("."),
                reason: format!("JSON path missing key {key:?}"),
            })?;
    }
    let items = target.as_array().ok_or_else(|| EdgeScoutError::Format {
        token: path.join("."),
        reason: "target field is not an array".into(),
    })?;
    let mut networks = Vec::with_capacity(items.len());
    for item in items {
        if let Some(s) = item.as_str() {
            networks.push(parse_network(s)?);
        }
    }
    Ok(networks)
}

/// Parses one catalog row: either a CIDR or a bare IP.
pub fn parse_network(value: &str) -> Result<IpNet> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(EdgeScoutError::Format {
            token: value.to_string(),
            reason: "empty network entry".into(),
        });
    }
    if trimmed.contains('/') {
        let net: IpNet = trimmed.parse().map_err(|e| EdgeScoutError::Format {
            token: trimmed.to_string(),
            reason: format!("invalid CIDR: {e}"),
        })?;
        // trunc() zeroes host bits so "1.1.1.5/24" and "1.1.1.0/24" collapse
        // to the same canonical entry.
        return Ok(normalize_network(net.trunc()));
    }
    let ip: IpAddr = trimmed.parse().map_err(|e| EdgeScoutError::Format {
        token: trimmed.to_string(),
        reason: format!("invalid IP: {e}"),
    })?;
    let ip = match ip {
        IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) => IpAddr::V4(v4),
            None => IpAddr::V6(v6),
        },
        v4 => v4,
    };
    Ok(IpNet::from(ip))
}

/// Moves IPv4-mapped IPv6 blocks (::ffff:a.b.c.d/n, n >= 96) into the v4
/// family. Other networks pass through unchanged.
pub fn normalize_network(net: IpNet) -> IpNet {
    if let IpNet::V6(v6) = net {
        if v6.prefix_len() >= 96 {
            if let Some(mapped) = v6.addr().to_ipv4_mapped() {
                let prefix = v6.prefix_len() - 96;
                if let Ok(v4net) = Ipv4Net::new(mapped, prefix) {
                    return IpNet::V4(v4net.trunc());
                }
            }
        }
    }
    net
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_cidr_skips_comments_and_blanks() {
        let text = "# Cloudflare ranges\n\n1.1.1.0/24\n 2400:cb00::/32 \n";
        let nets = parse_plain_cidr(text).unwrap();
        assert_eq!(nets.len(), 2);
        assert_eq!(nets[0].to_string(), "1.1.1.0/24");
        assert_eq!(nets[1].to_string(), "2400:cb00::/32");
    }

    #[test]
    fn plain_cidr_is_deterministic() {
        let text = "1.1.1.0/24\n8.8.8.8\n2400:cb00::/32\n";
        let first = parse_plain_cidr(text).unwrap();
        let second = parse_plain_cidr(text).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn bare_ips_promote_to_host_networks() {
        assert_eq!(parse_network("8.8.8.8").unwrap().to_string(), "8.8.8.8/32");
        assert_eq!(
            parse_network("2400:cb00::1").unwrap().to_string(),
            "2400:cb00::1/128"
        );
    }

    #[test]
    fn host_bits_are_truncated() {
        assert_eq!(
            parse_network("1.1.1.5/24").unwrap().to_string(),
            "1.1.1.0/24"
        );
    }

    #[test]
    fn mapped_v6_normalizes_to_v4() {
        assert_eq!(
            parse_network("::ffff:1.2.3.4").unwrap().to_string(),
            "1.2.3.4/32"
        );
        assert_eq!(
            parse_network("::ffff:1.2.3.0/120").unwrap().to_string(),
            "1.2.3.0/24"
        );
    }

    #[test]
    fn bad_rows_fail_the_payload() {
        assert!(parse_plain_cidr("1.1.1.0/24\nnot-a-cidr\n").is_err());
        let err = parse_network("999.1.2.3/24").unwrap_err();
        assert!(matches!(err, EdgeScoutError::Format { .. }));
    }

    #[test]
    fn json_array_walks_the_declared_path() {
        let payload = br#"{"data": {"ipv4": ["1.1.1.0/24", "8.8.8.8"]}}"#;
        let nets =
            parse_json_array(payload, &["data".to_string(), "ipv4".to_string()]).unwrap();
        assert_eq!(nets.len(), 2);
        assert_eq!(nets[1].to_string(), "8.8.8.8/32");
    }

    #[test]
    fn json_array_skips_non_string_items() {
        let payload = br#"{"data": ["1.1.1.0/24", 42, {"x": 1}]}"#;
        let nets = parse_json_array(payload, &["data".to_string()]).unwrap();
        assert_eq!(nets.len(), 1);
    }

    #[test]
    fn json_array_missing_path_is_a_format_error() {
        let payload = br#"{"data": []}"#;
        let err = parse_json_array(payload, &["entries".to_string()]).unwrap_err();
        assert!(matches!(err, EdgeScoutError::Format { .. }));
    }

    #[test]
    fn json_array_requires_an_array_terminal() {
        let payload = br#"{"data": "1.1.1.0/24"}"#;
        assert!(parse_json_array(payload, &["data".to_string()]).is_err());
    }

    #[test]
    fn payload_dispatch_selects_parser() {
        let plain = parse_payload(b"1.1.1.0/24\n", &PayloadFormat::PlainCidr).unwrap();
        assert_eq!(plain.len(), 1);
        let json = parse_payload(
            br#"["1.0.0.0/24"]"#,
            &PayloadFormat::JsonArray { path: vec![] },
        )
        .unwrap();
        assert_eq!(json.len(), 1);
    }
}
