/// Integration tests for queue accounting, worker utilization and cache
/// statistics.
use kvroute_core::cache_metrics::CacheMetrics;
use kvroute_core::clock::ManualClock;
use kvroute_core::queue_tracker::QueueTracker;
use kvroute_core::worker_registry::WorkerRegistry;
use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::collections::HashMap;
use std::sync::Arc;

#[test]
fn test_queue_depth_accounting() {
    let clock = Arc::new(ManualClock::new());
    let queue = QueueTracker::new(clock.clone());
    let mut rng = ChaCha8Rng::seed_from_u64(42);

    let mut pending: Vec<String> = Vec::new();
    let (mut enqueued, mut dequeued) = (0usize, 0usize);
    for i in 0..500 {
        clock.advance_by_ms(rng.gen_range(0..20));
        if pending.is_empty() || rng.gen_bool(0.6) {
            let id = format!("req-{}", i);
            queue.enqueue(&id, "llama-3-8b", 0, HashMap::new());
            pending.push(id);
            enqueued += 1;
        } else {
            let id = pending.swap_remove(rng.gen_range(0..pending.len()));
            assert!(queue.dequeue(&id) >= 0.0);
            dequeued += 1;
        }
        assert_eq!(queue.current_depth(), enqueued - dequeued);
    }

    let stats = queue.get_queue_stats();
    assert_eq!(stats.current_depth, enqueued - dequeued);
    assert_eq!(stats.total_enqueued, enqueued as u64);
    assert_eq!(stats.total_dequeued, dequeued as u64);
    assert!(stats.max_depth >= stats.current_depth);
}

#[test]
fn test_percentile_ordering() {
    let clock = Arc::new(ManualClock::new());
    let queue = QueueTracker::new(clock.clone());
    let mut rng = ChaCha8Rng::seed_from_u64(7);
    for i in 0..200 {
        let id = format!("r{}", i);
        queue.enqueue(&id, "m", 0, HashMap::new());
        clock.advance_by_ms(rng.gen_range(0..500));
        queue.dequeue(&id);

        let w = queue.get_queue_stats().wait_times;
        assert!(w.p99_ms >= w.p95_ms);
        assert!(w.p95_ms >= w.p50_ms);
        assert!(w.p50_ms >= 0.0);
    }
}

#[test]
fn test_stats_field_names() {
    let clock = Arc::new(ManualClock::new());
    let queue = QueueTracker::new(clock.clone());
    let registry = WorkerRegistry::new(2, clock);

    let q = serde_json::to_value(queue.get_queue_stats()).unwrap();
    assert!(q["current_depth"].is_number());
    assert!(q["max_depth"].is_number());
    assert!(q["wait_times"]["p95_ms"].is_number());

    let w = serde_json::to_value(registry.get_worker_stats()).unwrap();
    assert!(w["workers"][0]["active_requests"].is_number());
    assert!(w["workers"][0]["total_requests"].is_number());
    assert!(w["workers"][0]["avg_request_duration_ms"].is_number());
    assert!(w["workers"][0]["utilization"].is_number());
}

#[test]
fn test_utilization_stays_bounded() {
    let clock = Arc::new(ManualClock::new());
    let registry = WorkerRegistry::new(3, clock.clone());
    let mut rng = ChaCha8Rng::seed_from_u64(3);

    for _ in 0..300 {
        let worker = rng.gen_range(0..3);
        registry.start_request(worker);
        // Durations deliberately exceed elapsed time to stress the clamp.
        registry.complete_request(worker, rng.gen_range(0.0..5000.0), rng.gen_bool(0.9));
        clock.advance_by_ms(rng.gen_range(0..10));

        for w in registry.get_worker_stats().workers {
            assert!((0.0..=1.0).contains(&w.utilization), "{}", w.utilization);
        }
    }
}

#[test]
fn test_cache_metrics_neutral_then_live() {
    let metrics = CacheMetrics::new();
    let fresh = metrics.get_stats();
    assert_eq!(fresh.cache_hit_rate, 0.0);
    assert_eq!(fresh.token_reuse_rate, 0.0);
    assert_eq!(fresh.speedup_stats.ratio, 1.0);

    metrics.record_cache_lookup("chat", 512, 256);
    metrics.record_speedup("chat", 120.0, 40.0, 0.5);
    let stats = metrics.get_stats();
    assert_eq!(stats.cache_hit_rate, 100.0);
    assert_eq!(stats.token_reuse_rate, 50.0);
    assert!((stats.speedup_stats.ratio - 3.0).abs() < 1e-9);

    let json = serde_json::to_value(&stats).unwrap();
    assert!(json["cache_hit_rate"].is_number());
    assert!(json["token_reuse_rate"].is_number());
    assert!(json["per_endpoint"]["chat"]["lookups"].is_number());
}
