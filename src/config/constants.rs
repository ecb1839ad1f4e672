//! Configuration constants.
//!
//! Operational parameters shared across the fetcher, prober, and scheduler.
//! Timeouts are per-operation, not per-scan.

use std::time::Duration;

// Network operation timeouts
/// Whole-request timeout for catalog fetches
pub const FETCH_TIMEOUT: Duration = Duration::from_secs(30);
/// TCP dial timeout for the probe's first stage
pub const TCP_DIAL_TIMEOUT: Duration = Duration::from_secs(10);
/// TLS handshake timeout for the probe's second stage
pub const TLS_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
/// End-to-end timeout for the probe's HTTP stage
pub const HTTP_CLIENT_TIMEOUT: Duration = Duration::from_secs(15);

// Probe behaviour
/// Default HTTPS port probed on each candidate
pub const DEFAULT_PROBE_PORT: u16 = 443;
/// Default request path for the HTTP stage
pub const DEFAULT_HTTP_PATH: &str = "/";
/// Response bodies are hashed up to this many bytes, then discarded.
/// The hash still changes whenever the first MiB changes, which is enough
/// for change detection across scans without persisting the body.
pub const MAX_BODY_HASH_BYTES: u64 = 1 << 20;
/// Pause between probe retries; cancellation wins the race against it
pub const RETRY_PAUSE: Duration = Duration::from_millis(100);

// Sampler
/// Attempts per block before the sampler gives up on finding a fresh IP
pub const SAMPLER_MAX_TRIES: usize = 8;
/// Cap on the host-bit span used for block weighting, so /8-style blocks
/// do not monopolize the allocation
pub const BLOCK_WEIGHT_SPAN_CAP: u8 = 16;

// HTTP identity
/// User-Agent sent on catalog fetches and probes
pub const DEFAULT_USER_AGENT: &str = "cf-edgescout/1.0";

// Header handling
/// Response headers recorded on the HTTP fingerprint
pub const RESPONSE_HEADER_ALLOWLIST: [&str; 4] =
    ["Server", "CF-RAY", "CF-Cache-Status", "Content-Type"];
/// Headers consulted, in order, for an origin-identifying value.
/// The exact set varies across Cloudflare deployments, so the prober treats
/// it as configuration; this is only the default.
pub const DEFAULT_ORIGIN_HEADERS: [&str; 4] = [
    "CF-Worker-Upstream",
    "CF-Worker-Subrequest",
    "CF-Cache-Status",
    "X-Backend-Host",
];
/// Header carrying `<ray>-<COLO>`
pub const CF_RAY_HEADER: &str = "CF-RAY";
/// Fallback colo header used when CF-RAY is absent or malformed
pub const CF_COLO_FALLBACK_HEADER: &str = "CF-ORIGIN-COL";

// Range cache
/// File name of the aggregated-set snapshot inside the cache directory
pub const CACHE_FILE_NAME: &str = "ranges.json";
/// Temporary name used for the atomic tmp-then-rename write
pub const CACHE_TMP_FILE_NAME: &str = "ranges.json.tmp";

// CLI defaults
/// Candidates probed per scan unless overridden
pub const DEFAULT_SCAN_COUNT: usize = 32;
/// Delay between probe starts in milliseconds unless overridden
pub const DEFAULT_SCAN_RATE_MS: u64 = 200;
/// Interval between daemon scans in seconds unless overridden
pub const DEFAULT_DAEMON_INTERVAL_SECS: u64 = 5 * 60;
