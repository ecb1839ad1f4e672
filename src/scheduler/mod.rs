//! Scan orchestration.
//!
//! A scan walks `sample → rate-gate → probe-with-retries → enrich → score →
//! persist` for each candidate. Probe-stage failures stay on the
//! measurement; sampler, scorer, and store failures (and cancellation) are
//! fatal and abort the scan immediately.
//!
//! With `parallelism > 1`, candidates are dispatched through a bounded
//! semaphore and a shared ticker gates start times so no two workers begin
//! probes closer than the configured rate limit. The first worker error
//! cancels outstanding work and is returned.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use log::{debug, info};
use tokio::sync::Semaphore;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::config::RETRY_PAUSE;
use crate::errors::{EdgeScoutError, Result};
use crate::fetcher::SourceRange;
use crate::prober::{Measurement, Prober};
use crate::sampler::{Candidate, Sampler};
use crate::scorer::Scorer;
use crate::store::{Record, Store};

/// The probing seam; stubbed out by scheduler tests.
#[async_trait]
pub trait ProbeRunner: Send + Sync {
    async fn probe(
        &self,
        cancel: &CancellationToken,
        ip: IpAddr,
        domain: &str,
    ) -> Result<Measurement>;
}

#[async_trait]
impl ProbeRunner for Prober {
    async fn probe(
        &self,
        cancel: &CancellationToken,
        ip: IpAddr,
        domain: &str,
    ) -> Result<Measurement> {
        Prober::probe(self, cancel, ip, domain).await
    }
}

/// Coordinates sampling, probing, scoring, and persistence.
pub struct Scheduler {
    sampler: Arc<Sampler>,
    prober: Arc<dyn ProbeRunner>,
    scorer: Arc<Scorer>,
    store: Arc<dyn Store>,
    rate_limit: Duration,
    retries: u32,
    parallelism: usize,
}

impl Scheduler {
    pub fn new(
        sampler: Arc<Sampler>,
        prober: Arc<dyn ProbeRunner>,
        scorer: Arc<Scorer>,
        store: Arc<dyn Store>,
    ) -> Self {
        Scheduler {
            sampler,
            prober,
            scorer,
            store,
            rate_limit: Duration::ZERO,
            retries: 0,
            parallelism: 1,
        }
    }

    /// Minimum delay between consecutive probe starts.
    pub fn with_rate_limit(mut self, rate_limit: Duration) -> Self {
        self.rate_limit = rate_limit;
        self
    }

    /// Extra probe attempts after a failed (but not errored) measurement.
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    /// Number of concurrent probe workers; `<= 1` keeps the scan sequential.
    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism.max(1);
        self
    }

    /// Performs a one-off scan returning the stored records.
    pub async fn scan(
        &self,
        cancel: &CancellationToken,
        sources: &[SourceRange],
        domain: &str,
        total: usize,
    ) -> Result<Vec<Record>> {
        if domain.is_empty() {
            return Err(EdgeScoutError::Configuration("domain is required".into()));
        }
        let candidates = self.sampler.sample_sources(sources, total)?;
        if candidates.is_empty() {
            return Ok(Vec::new());
        }
        debug!("scanning {} candidates for {domain}", candidates.len());
        if self.parallelism <= 1 {
            self.scan_sequential(cancel, candidates, domain).await
        } else {
            self.scan_parallel(cancel, candidates, domain).await
        }
    }

    async fn scan_sequential(
        &self,
        cancel: &CancellationToken,
        candidates: Vec<Candidate>,
        domain: &str,
    ) -> Result<Vec<Record>> {
        let mut results = Vec::with_capacity(candidates.len());
        let mut last_probe: Option<Instant> = None;
        for candidate in candidates {
            if cancel.is_cancelled() {
                return Err(EdgeScoutError::Cancelled);
            }
            if !self.rate_limit.is_zero() {
                if let Some(last) = last_probe {
                    let elapsed = last.elapsed();
                    if elapsed < self.rate_limit {
                        tokio::select! {
                            _ = cancel.cancelled() => return Err(EdgeScoutError::Cancelled),
                            _ = tokio::time::sleep(self.rate_limit - elapsed) => {}
                        }
                    }
                }
            }
            let record = self.probe_and_persist(cancel, &candidate, domain).await?;
            last_probe = Some(Instant::now());
            results.push(record);
        }
        Ok(results)
    }

    async fn scan_parallel(
        &self,
        cancel: &CancellationToken,
        candidates: Vec<Candidate>,
        domain: &str,
    ) -> Result<Vec<Record>> {
        let scan_cancel = cancel.child_token();
        let semaphore = Arc::new(Semaphore::new(self.parallelism));
        let ticker = if self.rate_limit.is_zero() {
            None
        } else {
            let mut interval = tokio::time::interval(self.rate_limit);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            Some(Arc::new(tokio::sync::Mutex::new(interval)))
        };

        let total = candidates.len();
        let mut tasks = tokio::task::JoinSet::new();
        for candidate in candidates {
            let prober = Arc::clone(&self.prober);
            let scorer = Arc::clone(&self.scorer);
            let store = Arc::clone(&self.store);
            let semaphore = Arc::clone(&semaphore);
            let ticker = ticker.clone();
            let token = scan_cancel.clone();
            let domain = domain.to_string();
            let retries = self.retries;
            tasks.spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|_| EdgeScoutError::Cancelled)?;
                if let Some(ticker) = ticker {
                    let mut guard = ticker.lock().await;
                    tokio::select! {
                        _ = token.cancelled() => return Err(EdgeScoutError::Cancelled),
                        _ = guard.tick() => {}
                    }
                }
                let measurement =
                    try_probe(prober.as_ref(), &token, &candidate, &domain, retries).await?;
                finish_candidate(
                    scorer.as_ref(),
                    store.as_ref(),
                    &token,
                    &candidate,
                    measurement,
                )
                .await
            });
        }

        // records arrive in completion order; the first error cancels the rest
        let mut results = Vec::with_capacity(total);
        let mut first_error: Option<EdgeScoutError> = None;
        while let Some(joined) = tasks.join_next().await {
            let outcome = match joined {
                Ok(outcome) => outcome,
                Err(e) => Err(EdgeScoutError::Other(anyhow::anyhow!("probe task: {e}"))),
            };
            match outcome {
                Ok(record) => results.push(record),
                Err(e) => {
                    if first_error.is_none() {
                        scan_cancel.cancel();
                        first_error = Some(e);
                    }
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(results),
        }
    }

    async fn probe_and_persist(
        &self,
        cancel: &CancellationToken,
        candidate: &Candidate,
        domain: &str,
    ) -> Result<Record> {
        let measurement =
            try_probe(self.prober.as_ref(), cancel, candidate, domain, self.retries).await?;
        finish_candidate(
            self.scorer.as_ref(),
            self.store.as_ref(),
            cancel,
            candidate,
            measurement,
        )
        .await
    }

    /// Continuously fetches ranges and scans at the provided interval.
    ///
    /// Fetch or scan errors end the daemon; cancellation ends it with the
    /// cancellation error.
    pub async fn run_daemon<F, Fut>(
        &self,
        cancel: &CancellationToken,
        fetch: F,
        domain: &str,
        total: usize,
        interval: Duration,
    ) -> Result<()>
    where
        F: Fn(CancellationToken) -> Fut,
        Fut: std::future::Future<Output = Result<Vec<SourceRange>>>,
    {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // the first tick completes immediately; consume it so each cycle
        // does its work first and then waits out the interval
        ticker.tick().await;
        loop {
            let sources = fetch(cancel.clone()).await?;
            let records = self.scan(cancel, &sources, domain, total).await?;
            info!("daemon cycle stored {} records", records.len());
            tokio::select! {
                _ = cancel.cancelled() => return Err(EdgeScoutError::Cancelled),
                _ = ticker.tick() => {}
            }
        }
    }
}

/// Probes with up to `retries` extra attempts; a retry only happens when
/// the measurement reports failure, and the last attempt is kept either
/// way. The inter-attempt pause honors cancellation.
async fn try_probe(
    prober: &dyn ProbeRunner,
    cancel: &CancellationToken,
    candidate: &Candidate,
    domain: &str,
    retries: u32,
) -> Result<Measurement> {
    let mut attempt = 0;
    loop {
        let measurement = prober.probe(cancel, candidate.ip, domain).await?;
        if measurement.success || attempt >= retries {
            return Ok(measurement);
        }
        attempt += 1;
        tokio::select! {
            _ = cancel.cancelled() => return Err(EdgeScoutError::Cancelled),
            _ = tokio::time::sleep(RETRY_PAUSE) => {}
        }
    }
}

/// Attaches candidate metadata, runs validation, scores, and persists.
async fn finish_candidate(
    scorer: &Scorer,
    store: &dyn Store,
    cancel: &CancellationToken,
    candidate: &Candidate,
    mut measurement: Measurement,
) -> Result<Record> {
    measurement.source = candidate.source.clone();
    measurement.provider = candidate.provider.clone();
    measurement.source_type = candidate.kind.as_str().to_string();
    measurement.source_weight = candidate.weight;
    measurement.network = candidate.network.to_string();
    measurement.family = candidate.family.as_str().to_string();
    measurement.apply_validation(&candidate.expected_origin, &candidate.trusted_cns);

    let scored = scorer.score(measurement);
    let record = Record {
        timestamp: scored.measurement.timestamp,
        source: scored.measurement.source.clone(),
        score: scored.score,
        grade: scored.grade,
        status: scored.status,
        failure_reasons: scored.failures,
        components: scored.components,
        measurement: scored.measurement,
    };
    store.save(cancel, record.clone()).await?;
    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetcher::{ProviderSpec, RangeSet, SourceKind};
    use crate::store::MemoryStore;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Probe stub that fails the first `fail_first` attempts.
    struct StubProber {
        fail_first: u32,
        calls: AtomicU32,
    }

    impl StubProber {
        fn succeeding() -> Self {
            StubProber {
                fail_first: 0,
                calls: AtomicU32::new(0),
            }
        }

        fn failing_first(n: u32) -> Self {
            StubProber {
                fail_first: n,
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl ProbeRunner for StubProber {
        async fn probe(
            &self,
            _cancel: &CancellationToken,
            ip: IpAddr,
            domain: &str,
        ) -> Result<Measurement> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            let mut m = Measurement::new(ip, domain);
            if call < self.fail_first {
                m.error = "tcp dial: connection refused".into();
            } else {
                m.success = true;
                m.integrity.http_status = 200;
                m.http_fingerprint.status_code = 200;
                m.certificate_cn = domain.to_string();
            }
            Ok(m)
        }
    }

    fn single_ip_source(cidr: &str) -> SourceRange {
        let net: ipnet::IpNet = cidr.parse().unwrap();
        let mut ranges = RangeSet::default();
        match net {
            ipnet::IpNet::V4(_) => ranges.ipv4.push(net),
            ipnet::IpNet::V6(_) => ranges.ipv6.push(net),
        }
        SourceRange {
            provider: ProviderSpec {
                name: "official".into(),
                display_name: "Cloudflare official listing".into(),
                kind: SourceKind::Official,
                description: String::new(),
                weight: 1.0,
                ipv4: None,
                ipv6: None,
                enabled: true,
                expected_origin: String::new(),
                trusted_cns: Vec::new(),
            },
            ranges,
        }
    }

    fn scheduler_with(prober: Arc<dyn ProbeRunner>, store: Arc<dyn Store>) -> Scheduler {
        Scheduler::new(
            Arc::new(Sampler::with_rng(&[], StdRng::seed_from_u64(11))),
            prober,
            Arc::new(Scorer::new()),
            store,
        )
    }

    #[tokio::test]
    async fn scan_stores_enriched_records() {
        let store = Arc::new(MemoryStore::new());
        let scheduler = scheduler_with(Arc::new(StubProber::succeeding()), store.clone());
        let cancel = CancellationToken::new();
        let records = scheduler
            .scan(&cancel, &[single_ip_source("1.1.1.1/32")], "example.com", 1)
            .await
            .unwrap();
        assert_eq!(records.len(), 1);
        let stored = store.list(&cancel).await.unwrap();
        assert_eq!(stored.len(), 1);
        let m = &stored[0].measurement;
        assert_eq!(m.source, "official");
        assert_eq!(m.source_type, "official");
        assert_eq!(m.network, "1.1.1.1/32");
        assert_eq!(m.family, "ipv4");
        assert_eq!(m.source_weight, 1.0);
        assert_eq!(stored[0].status, "pass");
    }

    #[tokio::test]
    async fn retry_probes_again_and_stores_once() {
        let store = Arc::new(MemoryStore::new());
        let prober = Arc::new(StubProber::failing_first(1));
        let scheduler =
            scheduler_with(prober.clone(), store.clone()).with_retries(1);
        let cancel = CancellationToken::new();
        let records = scheduler
            .scan(&cancel, &[single_ip_source("1.1.1.1/32")], "example.com", 1)
            .await
            .unwrap();
        assert_eq!(records.len(), 1);
        assert!(records[0].measurement.success);
        assert_eq!(prober.calls.load(Ordering::SeqCst), 2);
        assert_eq!(store.list(&cancel).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn exhausted_retries_keep_the_last_attempt() {
        let store = Arc::new(MemoryStore::new());
        let prober = Arc::new(StubProber::failing_first(10));
        let scheduler = scheduler_with(prober.clone(), store.clone()).with_retries(2);
        let cancel = CancellationToken::new();
        let records = scheduler
            .scan(&cancel, &[single_ip_source("1.1.1.1/32")], "example.com", 1)
            .await
            .unwrap();
        assert_eq!(records.len(), 1);
        assert!(!records[0].measurement.success);
        assert_eq!(prober.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn cancelled_scan_returns_the_cancellation() {
        let scheduler = scheduler_with(
            Arc::new(StubProber::succeeding()),
            Arc::new(MemoryStore::new()),
        );
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = scheduler
            .scan(&cancel, &[single_ip_source("1.1.1.1/32")], "example.com", 1)
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
    }

    #[tokio::test]
    async fn sequential_rate_limit_spaces_probes() {
        let store = Arc::new(MemoryStore::new());
        let scheduler = scheduler_with(Arc::new(StubProber::succeeding()), store)
            .with_rate_limit(Duration::from_millis(25));
        let cancel = CancellationToken::new();
        let start = Instant::now();
        let records = scheduler
            .scan(&cancel, &[single_ip_source("10.0.0.0/30")], "example.com", 2)
            .await
            .unwrap();
        assert_eq!(records.len(), 2);
        assert!(start.elapsed() >= Duration::from_millis(25));
    }

    #[tokio::test]
    async fn parallel_scan_stores_every_candidate() {
        let store = Arc::new(MemoryStore::new());
        let scheduler = scheduler_with(Arc::new(StubProber::succeeding()), store.clone())
            .with_parallelism(4);
        let cancel = CancellationToken::new();
        let records = scheduler
            .scan(&cancel, &[single_ip_source("10.0.0.0/24")], "example.com", 6)
            .await
            .unwrap();
        assert_eq!(records.len(), 6);
        assert_eq!(store.list(&cancel).await.unwrap().len(), 6);
    }

    #[tokio::test]
    async fn empty_domain_is_a_configuration_error() {
        let scheduler = scheduler_with(
            Arc::new(StubProber::succeeding()),
            Arc::new(MemoryStore::new()),
        );
        let cancel = CancellationToken::new();
        let err = scheduler
            .scan(&cancel, &[single_ip_source("1.1.1.1/32")], "", 1)
            .await
            .unwrap_err();
        assert!(matches!(err, EdgeScoutError::Configuration(_)));
    }

    #[tokio::test]
    async fn daemon_stops_with_the_cancellation_error() {
        let scheduler = scheduler_with(
            Arc::new(StubProber::succeeding()),
            Arc::new(MemoryStore::new()),
        )
        .with_rate_limit(Duration::from_millis(10));
        let cancel = CancellationToken::new();
        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            canceller.cancel();
        });
        let err = scheduler
            .run_daemon(
                &cancel,
                |_token| async { Ok(vec![single_ip_source("10.0.0.0/24")]) },
                "example.com",
                1,
                Duration::from_millis(10),
            )
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
    }

    #[tokio::test]
    async fn daemon_propagates_fetch_errors() {
        let scheduler = scheduler_with(
            Arc::new(StubProber::succeeding()),
            Arc::new(MemoryStore::new()),
        );
        let cancel = CancellationToken::new();
        let err = scheduler
            .run_daemon(
                &cancel,
                |_token| async {
                    Err(EdgeScoutError::AllSourcesFailed("stub outage".into()))
                },
                "example.com",
                1,
                Duration::from_millis(10),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, EdgeScoutError::AllSourcesFailed(_)));
    }
}
