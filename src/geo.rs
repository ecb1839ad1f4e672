//! Static colo metadata.
//!
//! Cloudflare identifies its edge data centers with three-letter IATA-like
//! codes. The catalog below covers the colos most commonly seen in `CF-RAY`
//! headers; codes outside the catalog still flow through measurements, they
//! just carry no city or country.

use serde::{Deserialize, Serialize};

/// Metadata for a Cloudflare colo code.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColoInfo {
    /// Three-letter colo code, upper case.
    pub code: String,
    /// City the colo serves.
    pub city: String,
    /// ISO 3166-1 alpha-2 country code.
    pub country: String,
}

const COLO_CATALOG: &[(&str, &str, &str)] = &[
    ("AMS", "Amsterdam", "NL"),
    ("ATL", "Atlanta", "US"),
    ("CDG", "Paris", "FR"),
    ("DFW", "Dallas", "US"),
    ("EWR", "Newark", "US"),
    ("FRA", "Frankfurt", "DE"),
    ("GRU", "Sao Paulo", "BR"),
    ("HKG", "Hong Kong", "HK"),
    ("IAD", "Ashburn", "US"),
    ("ICN", "Seoul", "KR"),
    ("KIX", "Osaka", "JP"),
    ("LAX", "Los Angeles", "US"),
    ("LHR", "London", "GB"),
    ("MAD", "Madrid", "ES"),
    ("NRT", "Tokyo", "JP"),
    ("ORD", "Chicago", "US"),
    ("SEA", "Seattle", "US"),
    ("SIN", "Singapore", "SG"),
    ("SJC", "San Jose", "US"),
    ("SYD", "Sydney", "AU"),
    ("YYZ", "Toronto", "CA"),
];

/// Returns metadata for the provided colo code if known.
///
/// Lookup is case-insensitive; `None` for empty or unknown codes.
pub fn lookup_colo(code: &str) -> Option<ColoInfo> {
    if code.is_empty() {
        return None;
    }
    let upper = code.to_ascii_uppercase();
    COLO_CATALOG
        .iter()
        .find(|(c, _, _)| *c == upper)
        .map(|(c, city, country)| ColoInfo {
            code: (*c).to_string(),
            city: (*city).to_string(),
            country: (*country).to_string(),
        })
}
