/// End-to-end tests running the cluster simulator.
use kvroute_core::{compare_policies, format_comparison_table, format_report, run_simulation};
use kvroute_core::{ClusterSimulator, KvRouteConfig};

fn small_config() -> KvRouteConfig {
    KvRouteConfig::from_str(
        r#"
[router]
block_size = 16

[workers]
num_workers = 4

[simulation]
name = "sim-test"
seed = 42
num_requests = 300
arrival_rate_per_sec = 10.0
num_prefixes = 4
prefix_len = 128
suffix_len_mean = 32.0
suffix_len_std = 16.0
output_tokens_mean = 32.0
output_tokens_std = 16.0
"#,
    )
    .unwrap()
}

#[test]
fn test_simulation_completes_everything() {
    let report = run_simulation(&small_config()).unwrap();
    assert_eq!(report.completed_requests, 300);
    assert_eq!(report.rejected_requests, 0);
    assert_eq!(report.queue.current_depth, 0);
    assert_eq!(report.workers.active_requests, 0);
    assert_eq!(report.router.total_routed, 300);
    assert!(report.duration_ms > 0);
    assert!(report.requests_per_sec > 0.0);
    for w in &report.workers.workers {
        assert!((0.0..=1.0).contains(&w.utilization));
    }
}

#[test]
fn test_shared_prefixes_produce_cache_hits() {
    let report = run_simulation(&small_config()).unwrap();
    // Four shared prompts over 300 requests: almost everything after the
    // first few completions should reuse a cached prefix.
    assert!(report.cache.cache_hit_rate > 50.0, "{}", report.cache.cache_hit_rate);
    assert!(report.cache.token_reuse_rate > 0.0);
    assert!(report.cache.speedup_stats.ratio > 1.0);
    assert!(report.router.index.total_cached_blocks > 0);
}

#[test]
fn test_kv_cost_reuses_at_least_as_much_as_least_loaded() {
    let reports = compare_policies(&small_config(), &["kv_cost", "least_loaded"]).unwrap();
    assert_eq!(reports.len(), 2);
    assert_eq!(reports[0].policy, "kv_cost");
    assert_eq!(reports[1].policy, "least_loaded");
    assert!(reports[0].cache.token_reuse_rate >= reports[1].cache.token_reuse_rate);

    let table = format_comparison_table(&reports);
    assert!(table.contains("kv_cost"));
    assert!(table.contains("least_loaded"));
}

#[test]
fn test_baseline_seeding_warms_cache() {
    let cold = run_simulation(&small_config()).unwrap();

    let mut config = small_config();
    config.simulation.seed_baseline = true;
    let warm = run_simulation(&config).unwrap();

    let baseline = warm.baseline.clone().unwrap();
    assert_eq!(baseline.workers_seeded, 4);
    assert!(warm.cache.cache_hits >= cold.cache.cache_hits);
}

#[test]
fn test_report_serializes_and_formats() {
    let report = ClusterSimulator::new(&small_config()).unwrap().run();
    let json = serde_json::to_value(&report).unwrap();
    assert!(json["cache"]["cache_hit_rate"].is_number());
    assert!(json["queue"]["wait_times"]["p95_ms"].is_number());
    assert!(json["router"]["index"]["total_nodes"].is_number());

    let text = format_report(&report);
    assert!(text.contains("sim-test"));
    assert!(text.contains("Hit rate"));
}

#[test]
fn test_unknown_policy_is_rejected() {
    let mut config = small_config();
    config.router.policy = "random".to_string();
    assert!(run_simulation(&config).is_err());
}
