//! Stratified, history-aware candidate sampling.
//!
//! Allocation happens in two layers: the target count is split across
//! sources in proportion to their weights, then each source's share is
//! split across its blocks in proportion to block size (capped, so a /8
//! cannot monopolize the scan). Within a block, IPs are drawn uniformly at
//! random; a short-term history set rejects IPs probed recently by the same
//! sampler instance.

use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::sync::Mutex;

use ipnet::IpNet;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::{BLOCK_WEIGHT_SPAN_CAP, SAMPLER_MAX_TRIES};
use crate::errors::{EdgeScoutError, Result};
use crate::fetcher::{SourceKind, SourceRange};

/// Address family of a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpFamily {
    V4,
    V6,
}

impl IpFamily {
    pub fn as_str(&self) -> &'static str {
        match self {
            IpFamily::V4 => "ipv4",
            IpFamily::V6 => "ipv6",
        }
    }
}

/// An IP address selected for probing, annotated with its origin.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub ip: IpAddr,
    pub network: IpNet,
    pub family: IpFamily,
    /// Lower-case source name.
    pub source: String,
    /// Provider display name.
    pub provider: String,
    pub kind: SourceKind,
    /// Provider weight, carried through to scoring.
    pub weight: f64,
    /// Expected origin host for validation; empty accepts anything.
    pub expected_origin: String,
    /// Trusted certificate CNs for validation.
    pub trusted_cns: Vec<String>,
}

struct SamplerState {
    history: HashSet<IpAddr>,
    rng: StdRng,
}

/// Produces candidate IPs from edge network ranges.
///
/// The history set is the only cross-scan state in the pipeline and it is
/// owned here, not process-global, so constructing a fresh sampler resets
/// it.
pub struct Sampler {
    state: Mutex<SamplerState>,
    max_tries: usize,
}

impl Sampler {
    /// Returns a sampler seeded from OS entropy, pre-loaded with previously
    /// probed IPs.
    pub fn new(previous: &[IpAddr]) -> Self {
        Sampler::with_rng(previous, StdRng::from_entropy())
    }

    /// Returns a sampler with an injected RNG; tests use a seeded `StdRng`
    /// to obtain reproducible sequences.
    pub fn with_rng(previous: &[IpAddr], rng: StdRng) -> Self {
        Sampler {
            state: Mutex::new(SamplerState {
                history: previous.iter().copied().collect(),
                rng,
            }),
            max_tries: SAMPLER_MAX_TRIES,
        }
    }

    /// Adds the IP to the history so it is not re-sampled in the short term.
    pub fn remember(&self, ip: IpAddr) {
        let mut state = self.state.lock().expect("sampler mutex poisoned");
        state.history.insert(ip);
    }

    /// Selects up to `total` candidates with source-proportional allocation.
    ///
    /// Fewer than `total` candidates are returned when the blocks cannot
    /// contribute more fresh IPs; that is not an error. `total == 0` and an
    /// empty source list are configuration errors.
    pub fn sample_sources(
        &self,
        sources: &[SourceRange],
        total: usize,
    ) -> Result<Vec<Candidate>> {
        if total == 0 {
            return Err(EdgeScoutError::Configuration("total must be > 0".into()));
        }
        if sources.is_empty() {
            return Err(EdgeScoutError::Configuration("no sources available".into()));
        }

        let weights: Vec<f64> = sources
            .iter()
            .map(|s| if s.provider.weight > 0.0 { s.provider.weight } else { 1.0 })
            .collect();
        let weight_sum: f64 = weights.iter().sum();

        let mut results = Vec::with_capacity(total);
        let mut remaining = total;
        for (source, weight) in sources.iter().zip(&weights) {
            if remaining == 0 {
                break;
            }
            let mut portion = ((total as f64) * weight / weight_sum).round() as usize;
            portion = portion.max(1).min(remaining);
            let sampled = self.sample_range(source, portion)?;
            results.extend(sampled);
            remaining = total - results.len();
        }
        Ok(results)
    }

    /// Samples one source, allocating its share across blocks by size.
    fn sample_range(&self, source: &SourceRange, total: usize) -> Result<Vec<Candidate>> {
        let networks: Vec<IpNet> = source
            .ranges
            .ipv4
            .iter()
            .chain(source.ranges.ipv6.iter())
            .copied()
            .collect();
        if networks.is_empty() {
            return Err(EdgeScoutError::Configuration(format!(
                "source {} has no usable networks",
                source.provider.name
            )));
        }

        let weights: Vec<f64> = networks.iter().map(weight_for_network).collect();
        let weight_sum: f64 = weights.iter().sum();

        let mut candidates = Vec::with_capacity(total);
        for (network, weight) in networks.iter().zip(&weights) {
            if candidates.len() >= total {
                break;
            }
            let mut portion = ((total as f64) * weight / weight_sum).round() as usize;
            if portion == 0 {
                portion = 1;
            }
            for _ in 0..portion {
                if candidates.len() >= total {
                    break;
                }
                let Some(ip) = self.pick_unique_ip(network) else {
                    continue;
                };
                candidates.push(Candidate {
                    ip,
                    network: *network,
                    family: family_of(network),
                    source: source.provider.name.clone(),
                    provider: source.provider.display_name.clone(),
                    kind: source.provider.kind,
                    weight: source.provider.weight,
                    expected_origin: source.provider.expected_origin.clone(),
                    trusted_cns: source.provider.trusted_cns.clone(),
                });
            }
        }
        Ok(candidates)
    }

    /// Draws random IPs from the block until one misses the history set.
    /// The IP is recorded in history before it is returned.
    fn pick_unique_ip(&self, network: &IpNet) -> Option<IpAddr> {
        let mut state = self.state.lock().expect("sampler mutex poisoned");
        for _ in 0..self.max_tries {
            let ip = random_ip(network, &mut state.rng);
            if state.history.contains(&ip) {
                continue;
            }
            state.history.insert(ip);
            return Some(ip);
        }
        None
    }
}

/// Block weight `2^min(bits - ones, 16)`: larger blocks get proportionally
/// more picks, capped so huge blocks stay bounded.
fn weight_for_network(network: &IpNet) -> f64 {
    let span = (network.max_prefix_len() - network.prefix_len()).min(BLOCK_WEIGHT_SPAN_CAP);
    f64::powi(2.0, i32::from(span))
}

fn family_of(network: &IpNet) -> IpFamily {
    match network {
        IpNet::V4(_) => IpFamily::V4,
        IpNet::V6(_) => IpFamily::V6,
    }
}

/// Uniform random IP inside the block: a random offset in
/// `[0, 2^(bits-n))` OR-ed onto the network base. The v4 arm keeps the
/// 4-byte representation so rendering and equality stay canonical.
fn random_ip(network: &IpNet, rng: &mut StdRng) -> IpAddr {
    match network {
        IpNet::V4(net) => {
            let span = 32 - net.prefix_len();
            let base = u32::from(net.network());
            let offset: u32 = match span {
                0 => 0,
                32 => rng.gen(),
                s => rng.gen_range(0..1u32 << s),
            };
            IpAddr::V4(Ipv4Addr::from(base | offset))
        }
        IpNet::V6(net) => {
            let span = 128 - net.prefix_len();
            let base = u128::from(net.network());
            let offset: u128 = match span {
                0 => 0,
                128 => rng.gen(),
                s => rng.gen_range(0..1u128 << s),
            };
            IpAddr::V6(Ipv6Addr::from(base | offset))
        }
    }
}
