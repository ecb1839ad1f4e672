//! Composite scoring of measurements.
//!
//! Each metric is normalized into [0,1], combined as a weighted sum, then
//! biased by source preference and source weight. Scoring is a pure
//! function of the measurement and the configuration: identical inputs
//! yield identical results.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::prober::Measurement;

/// Latency above this maps to a 0.0 latency component.
const MAX_ACCEPTABLE_LATENCY: Duration = Duration::from_millis(500);
/// Throughput at or above this (50 MiB/s in bits) maps to 1.0 before the
/// square-root flattening.
const IDEAL_THROUGHPUT_BPS: f64 = 50.0 * 1024.0 * 1024.0 * 8.0;
/// Minimum composite score for a passing record.
const PASS_SCORE: f64 = 0.6;
/// Minimum integrity component for a passing record.
const PASS_INTEGRITY: f64 = 0.5;
/// Failure tag added when a record passes with weakened integrity.
const FAILURE_INTEGRITY_DEGRADED: &str = "integrity_degraded";

/// Weights and preferences applied when computing the composite score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScorerConfig {
    pub latency_weight: f64,
    pub success_weight: f64,
    pub throughput_weight: f64,
    pub integrity_weight: f64,
    /// Lower-cased source/provider name to multiplier; trusted sources may
    /// carry a small >1 boost.
    pub source_preference: HashMap<String, f64>,
    /// Grade letter to its lower score bound.
    pub grade_boundaries: HashMap<String, f64>,
}

impl Default for ScorerConfig {
    fn default() -> Self {
        ScorerConfig {
            latency_weight: 0.35,
            success_weight: 0.25,
            throughput_weight: 0.20,
            integrity_weight: 0.20,
            source_preference: HashMap::from([("official".to_string(), 1.05)]),
            grade_boundaries: HashMap::from([
                ("A".to_string(), 0.85),
                ("B".to_string(), 0.7),
                ("C".to_string(), 0.5),
                ("D".to_string(), 0.0),
            ]),
        }
    }
}

/// The final score with its intermediate contributions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreResult {
    /// Composite score in [0,1].
    pub score: f64,
    pub grade: String,
    /// `"pass"` or `"fail"`.
    pub status: String,
    pub failures: Vec<String>,
    /// Normalized per-component values keyed by component name.
    pub components: BTreeMap<String, f64>,
    pub measurement: Measurement,
}

/// Normalizes measurements and computes composite scores.
#[derive(Debug, Clone, Default)]
pub struct Scorer {
    pub config: ScorerConfig,
}

impl Scorer {
    /// Returns a scorer with the default weights and boundaries.
    pub fn new() -> Self {
        Scorer::default()
    }

    pub fn with_config(config: ScorerConfig) -> Self {
        Scorer { config }
    }

    /// Computes the final score for the measurement.
    pub fn score(&self, m: Measurement) -> ScoreResult {
        let mut components = BTreeMap::new();

        let latency_norm = normalize_latency(m.total_latency());
        components.insert("latency".to_string(), latency_norm);

        let success_norm = if m.success {
            1.0
        } else if m.error.is_empty() {
            0.5
        } else {
            0.0
        };
        components.insert("success".to_string(), success_norm);

        let throughput_norm = normalize_throughput(m.throughput);
        components.insert("throughput".to_string(), throughput_norm);

        let integrity_norm = normalize_integrity(&m);
        components.insert("integrity".to_string(), integrity_norm);

        let mut total_weight = self.config.latency_weight
            + self.config.success_weight
            + self.config.throughput_weight
            + self.config.integrity_weight;
        if total_weight == 0.0 {
            total_weight = 1.0;
        }
        let mut score = (latency_norm * self.config.latency_weight
            + success_norm * self.config.success_weight
            + throughput_norm * self.config.throughput_weight
            + integrity_norm * self.config.integrity_weight)
            / total_weight;

        let boost = self.source_boost(&m);
        components.insert("sourcePreference".to_string(), boost);
        score *= boost;
        if m.source_weight > 0.0 {
            components.insert("sourceWeight".to_string(), m.source_weight);
            score *= m.source_weight;
        }
        score = score.clamp(0.0, 1.0);

        let grade = determine_grade(score, &self.config.grade_boundaries);

        let mut failures = m.validation.failures.clone();
        let passing = score >= PASS_SCORE && failures.is_empty() && integrity_norm >= PASS_INTEGRITY;
        if passing && integrity_norm < 0.75 {
            failures.push(FAILURE_INTEGRITY_DEGRADED.to_string());
        }
        let status = if passing { "pass" } else { "fail" };

        ScoreResult {
            score,
            grade,
            status: status.to_string(),
            failures,
            components,
            measurement: m,
        }
    }

    /// Source preference multiplier; the provider display name can override
    /// the source key, both looked up case-insensitively.
    fn source_boost(&self, m: &Measurement) -> f64 {
        let mut boost = 1.0;
        for key in [&m.source, &m.provider] {
            let key = key.to_lowercase();
            if key.is_empty() {
                continue;
            }
            if let Some(weight) = self.config.source_preference.get(&key) {
                boost = *weight;
            }
        }
        boost
    }
}

/// `1 - latency/500ms`, clamped; an all-zero duration counts as instant.
fn normalize_latency(latency: Duration) -> f64 {
    if latency.is_zero() {
        return 1.0;
    }
    (1.0 - latency.as_secs_f64() / MAX_ACCEPTABLE_LATENCY.as_secs_f64()).clamp(0.0, 1.0)
}

/// Square-root of the throughput ratio, so mid-range differences matter
/// more than the gap between fast and very fast.
fn normalize_throughput(bits_per_second: f64) -> f64 {
    if bits_per_second <= 0.0 {
        return 0.0;
    }
    (bits_per_second / IDEAL_THROUGHPUT_BPS).clamp(0.0, 1.0).sqrt()
}

fn normalize_integrity(m: &Measurement) -> f64 {
    let status = m.integrity.http_status;
    let v = &m.validation;
    if v.failures.is_empty() && (200..400).contains(&status) {
        if v.certificate_match && v.origin_match {
            return 1.0;
        }
        return 0.75;
    }
    let penalty = v.failures.len() as f64 * 0.25;
    let mut score = (1.0 - penalty).max(0.0);
    if status >= 500 {
        score *= 0.5;
    }
    score
}

/// The highest grade whose lower bound is at or below the score; `F` when
/// no boundary matches.
fn determine_grade(score: f64, boundaries: &HashMap<String, f64>) -> String {
    let mut ordered: Vec<(&String, &f64)> = boundaries.iter().collect();
    ordered.sort_by(|a, b| b.1.partial_cmp(a.1).unwrap_or(std::cmp::Ordering::Equal));
    for (grade, cut) in ordered {
        if score >= *cut {
            return grade.clone();
        }
    }
    "F".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn successful_measurement() -> Measurement {
        let mut m = Measurement::new("1.1.1.1".parse().unwrap(), "example.com");
        m.success = true;
        m.tcp_duration = Duration::from_millis(10);
        m.tls_duration = Duration::from_millis(20);
        m.http_duration = Duration::from_millis(30);
        m.throughput = IDEAL_THROUGHPUT_BPS;
        m.integrity.http_status = 200;
        m.validation.certificate_match = true;
        m.validation.origin_match = true;
        m
    }

    #[test]
    fn happy_path_scores_high_and_passes() {
        let scorer = Scorer::new();
        let result = scorer.score(successful_measurement());
        assert!(result.score >= 0.85, "score was {}", result.score);
        assert_eq!(result.grade, "A");
        assert_eq!(result.status, "pass");
        assert!(result.failures.is_empty());
        assert_eq!(result.components["integrity"], 1.0);
    }

    #[test]
    fn score_is_a_pure_function() {
        let scorer = Scorer::new();
        let m = successful_measurement();
        let a = scorer.score(m.clone());
        let b = scorer.score(m);
        assert_eq!(a.score, b.score);
        assert_eq!(a.components, b.components);
        assert_eq!(a.grade, b.grade);
    }

    #[test]
    fn score_stays_in_unit_interval() {
        let scorer = Scorer::new();

        let mut worst = Measurement::new("1.1.1.1".parse().unwrap(), "example.com");
        worst.error = "tcp dial: connection refused".into();
        worst.tcp_duration = Duration::from_secs(10);
        worst.validation.failures =
            vec!["certificate_cn_mismatch".into(), "origin_host_mismatch".into()];
        worst.integrity.http_status = 503;
        let low = scorer.score(worst);
        assert!((0.0..=1.0).contains(&low.score));

        let mut best = successful_measurement();
        best.source = "official".into();
        best.source_weight = 1.0;
        let high = scorer.score(best);
        assert!((0.0..=1.0).contains(&high.score));
    }

    #[test]
    fn failed_probe_without_error_gets_half_success_credit() {
        let scorer = Scorer::new();
        let mut m = Measurement::new("1.1.1.1".parse().unwrap(), "example.com");
        m.success = false;
        let result = scorer.score(m);
        assert_eq!(result.components["success"], 0.5);
    }

    #[test]
    fn zero_latency_normalizes_to_one() {
        assert_eq!(normalize_latency(Duration::ZERO), 1.0);
        assert_eq!(normalize_latency(Duration::from_secs(5)), 0.0);
        let mid = normalize_latency(Duration::from_millis(250));
        assert!((mid - 0.5).abs() < 1e-9);
    }

    #[test]
    fn throughput_uses_square_root_flattening() {
        assert_eq!(normalize_throughput(0.0), 0.0);
        assert_eq!(normalize_throughput(-5.0), 0.0);
        assert_eq!(normalize_throughput(IDEAL_THROUGHPUT_BPS), 1.0);
        let quarter = normalize_throughput(IDEAL_THROUGHPUT_BPS / 4.0);
        assert!((quarter - 0.5).abs() < 1e-9);
    }

    #[test]
    fn integrity_penalizes_failures_and_server_errors() {
        let mut m = Measurement::new("1.1.1.1".parse().unwrap(), "example.com");
        m.integrity.http_status = 200;
        m.validation.failures = vec!["certificate_cn_mismatch".into()];
        assert_eq!(normalize_integrity(&m), 0.75);

        m.integrity.http_status = 503;
        assert_eq!(normalize_integrity(&m), 0.375);

        m.validation.failures.clear();
        m.integrity.http_status = 200;
        m.validation.certificate_match = false;
        m.validation.origin_match = true;
        assert_eq!(normalize_integrity(&m), 0.75);
    }

    #[test]
    fn source_preference_boosts_official() {
        let scorer = Scorer::new();
        let mut preferred = successful_measurement();
        preferred.source = "official".into();
        let neutral = scorer.score(successful_measurement());
        let boosted = scorer.score(preferred);
        assert!(boosted.score >= neutral.score);
        assert_eq!(boosted.components["sourcePreference"], 1.05);
    }

    #[test]
    fn source_weight_scales_the_score() {
        let scorer = Scorer::new();
        let mut weighted = successful_measurement();
        weighted.source_weight = 0.5;
        let result = scorer.score(weighted);
        let neutral = scorer.score(successful_measurement());
        assert!(result.score < neutral.score);
        assert_eq!(result.components["sourceWeight"], 0.5);
    }

    #[test]
    fn grades_follow_boundaries() {
        let boundaries = ScorerConfig::default().grade_boundaries;
        assert_eq!(determine_grade(0.9, &boundaries), "A");
        assert_eq!(determine_grade(0.85, &boundaries), "A");
        assert_eq!(determine_grade(0.7, &boundaries), "B");
        assert_eq!(determine_grade(0.55, &boundaries), "C");
        assert_eq!(determine_grade(0.1, &boundaries), "D");
        assert_eq!(determine_grade(-0.1, &boundaries), "F");
    }

    #[test]
    fn validation_failures_force_fail_status() {
        let scorer = Scorer::new();
        let mut m = successful_measurement();
        m.validation.failures = vec!["origin_host_mismatch".into()];
        let result = scorer.score(m);
        assert_eq!(result.status, "fail");
        assert!(result.failures.contains(&"origin_host_mismatch".to_string()));
    }

    #[test]
    fn degraded_integrity_pass_is_tagged() {
        let scorer = Scorer::new();
        // no explicit failures, but a 5xx status halves the clean integrity
        // to exactly 0.5: still passes the gate, and picks up the tag
        let mut m = successful_measurement();
        m.integrity.http_status = 500;
        let result = scorer.score(m);
        assert_eq!(result.components["integrity"], 0.5);
        assert_eq!(result.status, "pass");
        assert!(result.failures.contains(&"integrity_degraded".to_string()));
    }

    #[test]
    fn weakened_match_at_three_quarters_is_not_degraded() {
        let scorer = Scorer::new();
        let mut m = successful_measurement();
        m.validation.origin_match = false;
        let result = scorer.score(m);
        assert_eq!(result.components["integrity"], 0.75);
        assert_eq!(result.status, "pass");
        assert!(!result.failures.contains(&"integrity_degraded".to_string()));
    }

    #[test]
    fn integrity_below_gate_fails_even_with_good_score() {
        let scorer = Scorer::new();
        let mut m = successful_measurement();
        m.integrity.http_status = 500;
        m.validation.failures = vec!["certificate_cn_mismatch".into()];
        // one failure on a 5xx: (1 - 0.25) * 0.5 = 0.375 < 0.5
        let result = scorer.score(m);
        assert_eq!(result.components["integrity"], 0.375);
        assert_eq!(result.status, "fail");
    }
}
