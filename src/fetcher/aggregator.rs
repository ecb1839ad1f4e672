//! Deduplication of ranges across sources, with provenance.
//!
//! Identical CIDRs from different sources collapse into one entry whose
//! metadata lists every contributor. Entries are keyed (and therefore
//! sorted) by the canonical CIDR string so downstream behaviour is
//! deterministic regardless of fetch completion order.

use std::collections::BTreeMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use ipnet::IpNet;
use serde::{Deserialize, Serialize};

use super::RangeSet;

/// Provenance for a CIDR block: which source supplied it, from where, when,
/// and with what credibility.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RangeMetadata {
    pub source: String,
    pub endpoint: String,
    pub retrieved_at: DateTime<Utc>,
    pub credibility: f64,
}

/// A single network annotated with its provenance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RangeRecord {
    pub network: IpNet,
    pub metadata: RangeMetadata,
}

/// A deduplicated network with every contributing source's provenance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RangeEntry {
    pub network: IpNet,
    pub metadata: Vec<RangeMetadata>,
}

/// The deduplicated result across all providers, sorted by CIDR string.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregatedSet {
    pub entries: Vec<RangeEntry>,
}

impl AggregatedSet {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Splits the entries into per-family network lists.
    pub fn range_set(&self) -> RangeSet {
        let mut rs = RangeSet::default();
        for entry in &self.entries {
            match entry.network {
                IpNet::V4(_) => rs.ipv4.push(entry.network),
                IpNet::V6(_) => rs.ipv6.push(entry.network),
            }
        }
        rs
    }
}

/// Collects range records from concurrently fetching providers.
#[derive(Debug, Default)]
pub struct Aggregator {
    entries: Mutex<BTreeMap<String, RangeEntry>>,
}

impl Aggregator {
    pub fn new() -> Self {
        Aggregator::default()
    }

    /// Merges the records into the aggregator.
    pub fn add(&self, records: Vec<RangeRecord>) {
        let mut entries = self.entries.lock().expect("aggregator mutex poisoned");
        for record in records {
            let key = record.network.to_string();
            entries
                .entry(key)
                .or_insert_with(|| RangeEntry {
                    network: record.network,
                    metadata: Vec::new(),
                })
                .metadata
                .push(record.metadata);
        }
    }

    /// Returns the aggregated set, metadata sorted by (source, endpoint).
    pub fn result(&self) -> AggregatedSet {
        let entries = self.entries.lock().expect("aggregator mutex poisoned");
        let entries = entries
            .values()
            .map(|entry| {
                let mut entry = entry.clone();
                entry
                    .metadata
                    .sort_by(|a, b| (&a.source, &a.endpoint).cmp(&(&b.source, &b.endpoint)));
                entry
            })
            .collect();
        AggregatedSet { entries }
    }
}
