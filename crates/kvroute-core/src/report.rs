//! Simulation results and their text rendering.

use crate::cache_metrics::CacheStats;
use crate::queue_tracker::{QueueStats, WaitTimeStats};
use crate::router::RouterStats;
use crate::seeding::BaselineSummary;
use crate::worker_registry::WorkerPoolStats;
use serde::{Deserialize, Serialize};

/// Everything a simulation run produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationReport {
    pub name: String,
    pub policy: String,
    pub num_workers: usize,
    pub total_requests: u64,
    pub completed_requests: u64,
    /// Requests the router could not place.
    pub rejected_requests: u64,
    /// Virtual time from first arrival to last completion.
    pub duration_ms: u64,
    pub requests_per_sec: f64,
    /// Time to first token: queue wait plus prefill of the uncached part.
    pub ttft: WaitTimeStats,
    pub end_to_end_latency: WaitTimeStats,
    /// Coefficient of variation of requests served per worker.
    pub load_cv: f64,
    pub jains_fairness_index: f64,
    pub baseline: Option<BaselineSummary>,
    pub router: RouterStats,
    pub cache: CacheStats,
    pub queue: QueueStats,
    pub workers: WorkerPoolStats,
}

/// Coefficient of variation (std / mean).
pub fn coefficient_of_variation(values: &[u64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<u64>() as f64 / n;
    if mean == 0.0 {
        return 0.0;
    }
    let variance = values
        .iter()
        .map(|&v| (v as f64 - mean).powi(2))
        .sum::<f64>()
        / n;
    variance.sqrt() / mean
}

/// Jain's fairness index: (sum(x_i))^2 / (n * sum(x_i^2)).
pub fn jains_fairness_index(values: &[u64]) -> f64 {
    if values.is_empty() {
        return 1.0;
    }
    let n = values.len() as f64;
    let sum: f64 = values.iter().map(|&v| v as f64).sum();
    let sum_sq: f64 = values.iter().map(|&v| (v as f64).powi(2)).sum();
    if sum_sq == 0.0 {
        return 1.0;
    }
    (sum * sum) / (n * sum_sq)
}

/// Render a report as a text table.
pub fn format_report(report: &SimulationReport) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "\n{:=<70}\n",
        format!("  {} / {}  ", report.name, report.policy)
    ));
    out.push_str(&format!(
        "  Duration: {:.1}s | Workers: {} | Requests: {} ({} rejected)\n",
        report.duration_ms as f64 / 1000.0,
        report.num_workers,
        report.total_requests,
        report.rejected_requests
    ));
    if let Some(baseline) = &report.baseline {
        out.push_str(&format!(
            "  Baseline: {} workers seeded, {} requests, {} blocks\n",
            baseline.workers_seeded, baseline.requests_imported, baseline.blocks_indexed
        ));
    }
    out.push_str(&format!("{:-<70}\n", "  Latency  "));
    out.push_str(&format!(
        "  TTFT (ms)       P50={:>8.1}  P95={:>8.1}  P99={:>8.1}\n",
        report.ttft.p50_ms, report.ttft.p95_ms, report.ttft.p99_ms
    ));
    out.push_str(&format!(
        "  E2E (ms)        P50={:>8.1}  P95={:>8.1}  P99={:>8.1}\n",
        report.end_to_end_latency.p50_ms,
        report.end_to_end_latency.p95_ms,
        report.end_to_end_latency.p99_ms
    ));
    let wait = &report.queue.wait_times;
    out.push_str(&format!(
        "  Queue wait (ms) P50={:>8.1}  P95={:>8.1}  P99={:>8.1}\n",
        wait.p50_ms, wait.p95_ms, wait.p99_ms
    ));
    out.push_str(&format!(
        "  Queue depth: max {}  Requests/sec: {:.1}\n",
        report.queue.max_depth, report.requests_per_sec
    ));
    out.push_str(&format!("{:-<70}\n", "  Cache  "));
    out.push_str(&format!(
        "  Hit rate: {:.1}%  Token reuse: {:.1}%  Avg prefix: {:.0} tokens\n",
        report.cache.cache_hit_rate, report.cache.token_reuse_rate, report.cache.avg_prefix_length
    ));
    out.push_str(&format!(
        "  Prefill speedup: {:.2}x  Index: {} nodes, {} blocks\n",
        report.cache.speedup_stats.ratio,
        report.router.index.total_nodes,
        report.router.index.total_cached_blocks
    ));
    out.push_str(&format!("{:-<70}\n", "  Workers  "));
    for w in &report.workers.workers {
        out.push_str(&format!(
            "  #{:<3} {:>6} req  {:>5.1}% util  {:>6} blocks  avg {:>8.1} ms\n",
            w.worker_id,
            w.total_requests,
            w.utilization * 100.0,
            w.cached_blocks,
            w.avg_request_duration_ms
        ));
    }
    out.push_str(&format!(
        "  Load CV: {:.3}  Jain's index: {:.4}\n",
        report.load_cv, report.jains_fairness_index
    ));
    out.push_str(&format!("{:=<70}\n", ""));
    out
}

/// Side-by-side summary of several runs over the same workload.
pub fn format_comparison_table(reports: &[SimulationReport]) -> String {
    if reports.is_empty() {
        return String::from("No results to compare.\n");
    }

    let mut out = String::new();
    out.push_str(&format!("\n{:=<90}\n", "  Policy Comparison  "));
    out.push_str(&format!(
        "{:<16} {:>9} {:>9} {:>9} {:>9} {:>8} {:>8} {:>8}\n",
        "Policy", "TTFT p50", "TTFT p99", "E2E p50", "Wait p95", "Hit%", "Reuse%", "Jain's"
    ));
    out.push_str(&format!("{:-<90}\n", ""));

    for r in reports {
        out.push_str(&format!(
            "{:<16} {:>9.1} {:>9.1} {:>9.1} {:>9.1} {:>7.1}% {:>7.1}% {:>8.4}\n",
            r.policy,
            r.ttft.p50_ms,
            r.ttft.p99_ms,
            r.end_to_end_latency.p50_ms,
            r.queue.wait_times.p95_ms,
            r.cache.cache_hit_rate,
            r.cache.token_reuse_rate,
            r.jains_fairness_index,
        ));
    }
    out.push_str(&format!("{:=<90}\n", ""));
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coefficient_of_variation() {
        assert_eq!(coefficient_of_variation(&[]), 0.0);
        assert_eq!(coefficient_of_variation(&[5, 5, 5, 5]), 0.0);
        assert_eq!(coefficient_of_variation(&[0, 0]), 0.0);
        assert!(coefficient_of_variation(&[1, 9]) > 0.5);
    }

    #[test]
    fn test_jains_fairness_index() {
        assert_eq!(jains_fairness_index(&[]), 1.0);
        assert_eq!(jains_fairness_index(&[10, 10, 10]), 1.0);
        // All load on one of four workers.
        assert!((jains_fairness_index(&[12, 0, 0, 0]) - 0.25).abs() < 1e-9);
    }

    #[test]
    fn test_comparison_of_nothing() {
        assert_eq!(format_comparison_table(&[]), "No results to compare.\n");
    }
}
