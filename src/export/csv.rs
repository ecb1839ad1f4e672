//! CSV export.
//!
//! A flattened, one-row-per-record view carrying the fields operators
//! filter on most: score, grade, latency, colo, and integrity identity.

use std::io::Write;

use crate::errors::{EdgeScoutError, Result};
use crate::store::Record;

const HEADER: [&str; 19] = [
    "timestamp",
    "source",
    "score",
    "grade",
    "status",
    "failure_reasons",
    "ip",
    "domain",
    "request_host",
    "sni",
    "certificate_cn",
    "origin_host",
    "success",
    "latency_ms",
    "throughput_bps",
    "colo",
    "colo_city",
    "colo_country",
    "status_code",
];

/// Writes a CSV representation of the records.
pub fn to_csv<W: Write>(records: &[Record], writer: W) -> Result<()> {
    let mut writer = csv::Writer::from_writer(writer);
    writer
        .write_record(HEADER)
        .map_err(|e| EdgeScoutError::Other(e.into()))?;
    for record in records {
        let m = &record.measurement;
        let latency = m.total_latency();
        let row = [
            record
                .timestamp
                .to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
            record.source.clone(),
            format!("{:.4}", record.score),
            record.grade.clone(),
            record.status.clone(),
            record.failure_reasons.join(";"),
            m.ip.to_string(),
            m.domain.clone(),
            m.request_host.clone(),
            m.sni.clone(),
            m.certificate_cn.clone(),
            m.origin_host.clone(),
            m.success.to_string(),
            format!("{:.2}", latency.as_secs_f64() * 1000.0),
            format!("{:.0}", m.throughput),
            m.cf_colo.clone(),
            m.location.city.clone(),
            m.location.country.clone(),
            m.http_fingerprint.status_code.to_string(),
        ];
        writer
            .write_record(&row)
            .map_err(|e| EdgeScoutError::Other(e.into()))?;
    }
    writer
        .flush()
        .map_err(|e| EdgeScoutError::Other(e.into()))?;
    Ok(())
}
