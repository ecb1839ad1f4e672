//! edgescout: continuously evaluates which Cloudflare edge IPs yield the
//! best reachability, latency, throughput, and integrity for a target
//! hostname.
//!
//! The pipeline is strictly linear:
//!
//! ```text
//! catalogs -> Fetcher -> SourceRange -> Sampler -> Candidate
//!                                                    |
//!                                  Prober <----------+
//!                                    |
//!                                  Scorer -> Record -> Store
//! ```
//!
//! Ownership follows the arrows: the fetcher owns catalog bytes until
//! aggregation, candidates become immutable snapshots handed to the prober,
//! and scored records are handed to the store. The only cross-scan state is
//! the sampler's anti-recency history, owned by the sampler instance.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use edgescout::{
//!     initialization, Fetcher, MemoryStore, Prober, Sampler, Scheduler, Scorer,
//! };
//! use tokio_util::sync::CancellationToken;
//!
//! # #[tokio::main]
//! # async fn main() -> edgescout::Result<()> {
//! initialization::init_crypto_provider();
//! let client = initialization::init_client()?;
//! let fetcher = Fetcher::new(client);
//! let cancel = CancellationToken::new();
//!
//! let providers = edgescout::fetcher::default_providers();
//! let outcome = fetcher.fetch_all(&cancel, &providers).await?;
//!
//! let scheduler = Scheduler::new(
//!     Arc::new(Sampler::new(&[])),
//!     Arc::new(Prober::new()),
//!     Arc::new(Scorer::new()),
//!     Arc::new(MemoryStore::new()),
//! );
//! let records = scheduler
//!     .scan(&cancel, &outcome.sources, "example.com", 32)
//!     .await?;
//! println!("stored {} records", records.len());
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod errors;
pub mod export;
pub mod fetcher;
pub mod geo;
pub mod initialization;
pub mod prober;
pub mod sampler;
pub mod scheduler;
pub mod scorer;
pub mod store;

pub use errors::{EdgeScoutError, ErrorCategory, PartialFetchError, Result};
pub use fetcher::{AggregatedSet, FetchOutcome, Fetcher, ProviderSpec, RangeSet, SourceRange};
pub use prober::{Measurement, Prober, ValidationResult};
pub use sampler::{Candidate, Sampler};
pub use scheduler::{ProbeRunner, Scheduler};
pub use scorer::{ScoreResult, Scorer, ScorerConfig};
pub use store::{JsonlStore, MemoryStore, Record, Store};
