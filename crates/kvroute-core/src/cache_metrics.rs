//! Cache hit/miss and TTFT speedup aggregation.
//!
//! Every statistic has a neutral value when nothing has been observed yet,
//! so [`CacheMetrics::get_stats`] never omits a field: rates are 0.0 and the
//! speedup ratio is 1.0.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};

/// One TTFT comparison between a cold and an actual (possibly cached) run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpeedupSample {
    pub baseline_ttft_ms: f64,
    pub actual_ttft_ms: f64,
    pub speedup_ratio: f64,
    pub cache_hit_ratio: f64,
}

/// Averages over the speedup history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeedupStats {
    /// Mean `baseline / actual` TTFT ratio.
    pub ratio: f64,
    /// Mean fraction of the prompt served from cache, as a percentage.
    pub cache_hit_rate: f64,
    pub avg_baseline_ttft_ms: f64,
    pub avg_actual_ttft_ms: f64,
    /// Mean TTFT saved per request.
    pub avg_ttft_saved_ms: f64,
    pub samples: usize,
}

impl Default for SpeedupStats {
    fn default() -> Self {
        Self {
            ratio: 1.0,
            cache_hit_rate: 0.0,
            avg_baseline_ttft_ms: 0.0,
            avg_actual_ttft_ms: 0.0,
            avg_ttft_saved_ms: 0.0,
            samples: 0,
        }
    }
}

/// Lookup counters for one endpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EndpointCacheStats {
    pub lookups: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub cache_hit_rate: f64,
    pub speedup_samples: u64,
}

/// Serializable cache statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    /// Percentage of lookups that matched at least one token.
    pub cache_hit_rate: f64,
    /// Percentage of looked-up tokens that were served from cache.
    pub token_reuse_rate: f64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub total_lookups: u64,
    pub tokens_reused: u64,
    pub tokens_total: u64,
    /// Mean matched length over recent hits.
    pub avg_prefix_length: f64,
    pub speedup_stats: SpeedupStats,
    pub per_endpoint: BTreeMap<String, EndpointCacheStats>,
}

#[derive(Debug, Default)]
struct MetricsInner {
    hits: u64,
    misses: u64,
    tokens_reused: u64,
    tokens_total: u64,
    prefix_lengths: VecDeque<usize>,
    speedups: VecDeque<SpeedupSample>,
    per_endpoint: BTreeMap<String, EndpointCacheStats>,
}

fn percent(part: f64, whole: f64) -> f64 {
    if whole > 0.0 {
        part / whole * 100.0
    } else {
        0.0
    }
}

/// Aggregator of prefix-cache observations.
pub struct CacheMetrics {
    prefix_history: usize,
    speedup_history: usize,
    inner: Mutex<MetricsInner>,
}

impl Default for CacheMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl CacheMetrics {
    pub fn new() -> Self {
        Self::with_history(1000, 1000)
    }

    pub fn with_history(prefix_history: usize, speedup_history: usize) -> Self {
        Self {
            prefix_history: prefix_history.max(1),
            speedup_history: speedup_history.max(1),
            inner: Mutex::new(MetricsInner::default()),
        }
    }

    /// Record the outcome of one prefix lookup.
    ///
    /// Any matched token makes it a hit. `matched_tokens` larger than
    /// `total_tokens` is clamped.
    pub fn record_cache_lookup(&self, endpoint: &str, total_tokens: usize, matched_tokens: usize) {
        let matched_tokens = matched_tokens.min(total_tokens);
        let hit = matched_tokens > 0;
        let mut inner = self.inner.lock();
        if hit {
            inner.hits += 1;
            if inner.prefix_lengths.len() >= self.prefix_history {
                inner.prefix_lengths.pop_front();
            }
            inner.prefix_lengths.push_back(matched_tokens);
        } else {
            inner.misses += 1;
        }
        inner.tokens_reused += matched_tokens as u64;
        inner.tokens_total += total_tokens as u64;

        let endpoint = inner.per_endpoint.entry(endpoint.to_string()).or_default();
        endpoint.lookups += 1;
        if hit {
            endpoint.cache_hits += 1;
        } else {
            endpoint.cache_misses += 1;
        }
    }

    /// Record a TTFT comparison. A zero `actual_ttft_ms` counts as ratio 1.0.
    ///
    /// Negative or non-finite times are clamped to 0 with a warning, so a
    /// negative `actual_ttft_ms` also yields ratio 1.0.
    pub fn record_speedup(
        &self,
        endpoint: &str,
        baseline_ttft_ms: f64,
        actual_ttft_ms: f64,
        cache_hit_ratio: f64,
    ) {
        let baseline_ttft_ms = non_negative_ms(endpoint, "baseline_ttft_ms", baseline_ttft_ms);
        let actual_ttft_ms = non_negative_ms(endpoint, "actual_ttft_ms", actual_ttft_ms);
        let speedup_ratio = if actual_ttft_ms > 0.0 {
            baseline_ttft_ms / actual_ttft_ms
        } else {
            1.0
        };
        let sample = SpeedupSample {
            baseline_ttft_ms,
            actual_ttft_ms,
            speedup_ratio,
            cache_hit_ratio: cache_hit_ratio.clamp(0.0, 1.0),
        };

        let mut inner = self.inner.lock();
        if inner.speedups.len() >= self.speedup_history {
            inner.speedups.pop_front();
        }
        inner.speedups.push_back(sample);
        inner
            .per_endpoint
            .entry(endpoint.to_string())
            .or_default()
            .speedup_samples += 1;
    }

    /// Hit and reuse rates, prefix lengths and speedup averages.
    pub fn get_stats(&self) -> CacheStats {
        let inner = self.inner.lock();
        let total_lookups = inner.hits + inner.misses;

        let avg_prefix_length = if inner.prefix_lengths.is_empty() {
            0.0
        } else {
            inner.prefix_lengths.iter().sum::<usize>() as f64 / inner.prefix_lengths.len() as f64
        };

        let speedup_stats = if inner.speedups.is_empty() {
            SpeedupStats::default()
        } else {
            let n = inner.speedups.len() as f64;
            let mean = |f: fn(&SpeedupSample) -> f64| inner.speedups.iter().map(f).sum::<f64>() / n;
            let avg_baseline_ttft_ms = mean(|s| s.baseline_ttft_ms);
            let avg_actual_ttft_ms = mean(|s| s.actual_ttft_ms);
            SpeedupStats {
                ratio: mean(|s| s.speedup_ratio),
                cache_hit_rate: mean(|s| s.cache_hit_ratio) * 100.0,
                avg_baseline_ttft_ms,
                avg_actual_ttft_ms,
                avg_ttft_saved_ms: avg_baseline_ttft_ms - avg_actual_ttft_ms,
                samples: inner.speedups.len(),
            }
        };

        let per_endpoint = inner
            .per_endpoint
            .iter()
            .map(|(name, e)| {
                let mut e = e.clone();
                e.cache_hit_rate = percent(e.cache_hits as f64, e.lookups as f64);
                (name.clone(), e)
            })
            .collect();

        CacheStats {
            cache_hit_rate: percent(inner.hits as f64, total_lookups as f64),
            token_reuse_rate: percent(inner.tokens_reused as f64, inner.tokens_total as f64),
            cache_hits: inner.hits,
            cache_misses: inner.misses,
            total_lookups,
            tokens_reused: inner.tokens_reused,
            tokens_total: inner.tokens_total,
            avg_prefix_length,
            speedup_stats,
            per_endpoint,
        }
    }
}

fn non_negative_ms(endpoint: &str, field: &'static str, value: f64) -> f64 {
    if value.is_finite() && value >= 0.0 {
        return value;
    }
    tracing::warn!(endpoint, field, value, "clamping invalid TTFT sample to 0");
    0.0
}
