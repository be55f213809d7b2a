/// Integration tests for cache-aware routing across index and registry.
use kvroute_algorithms::{CostWeights, KvCost, PrefixMatch, RequestInfo, WorkerSnapshot};
use kvroute_core::clock::ManualClock;
use kvroute_core::prefix_index::PrefixCacheIndex;
use kvroute_core::router::{CacheAwareRouter, RouterError};
use kvroute_core::worker_registry::WorkerRegistry;
use kvroute_core::{Cluster, KvRouteConfig};
use std::sync::Arc;
use std::thread;

const WORKER_A: u32 = 0;
const WORKER_B: u32 = 1;

fn router(num_workers: u32, block_size: usize) -> CacheAwareRouter {
    let clock = Arc::new(ManualClock::new());
    let index = Arc::new(PrefixCacheIndex::new(block_size, clock.clone()).unwrap());
    let registry = Arc::new(WorkerRegistry::new(num_workers, clock));
    let weights = CostWeights {
        block_size,
        kv_overlap_weight: 1.0,
        load_balance_weight: 0.5,
    };
    CacheAwareRouter::new(index, registry, weights).unwrap()
}

#[test]
fn test_concrete_routing_example() {
    let r = router(2, 4);
    r.index().insert(&[1, 2, 3, 4], WORKER_A);

    let tokens: Vec<u32> = (1..=8).collect();
    let decision = r.route_request(&tokens, 4).unwrap();

    assert_eq!(decision.worker_id, WORKER_A);
    assert_eq!(decision.matched_token_count, 4);
    assert_eq!(decision.matched_block_count, 1);
    assert!((decision.cost - 2.0).abs() < 1e-9);

    let weights = r.weights();
    let request = RequestInfo {
        prompt_tokens: 8,
        estimated_output_tokens: 4,
    };
    let prefix = r.index().find_longest_prefix(&tokens);
    let worker_b = r
        .registry()
        .snapshots()
        .into_iter()
        .find(|w| w.id == WORKER_B)
        .unwrap();
    assert!((KvCost::cost(&request, &prefix, &worker_b, &weights) - 3.0).abs() < 1e-9);
}

#[test]
fn test_cost_monotonic_in_load() {
    let weights = CostWeights::default();
    let request = RequestInfo {
        prompt_tokens: 100,
        estimated_output_tokens: 20,
    };
    let prefix = PrefixMatch::miss();
    let mut worker = WorkerSnapshot {
        id: 0,
        status: Default::default(),
        active_requests: 0,
        total_requests: 0,
        cached_blocks: 0,
        utilization: 0.0,
    };
    let mut last = KvCost::cost(&request, &prefix, &worker, &weights);
    for load in 1..20 {
        worker.active_requests = load;
        let cost = KvCost::cost(&request, &prefix, &worker, &weights);
        assert!(cost > last);
        last = cost;
    }
}

#[test]
fn test_equally_matched_less_loaded_wins() {
    let r = router(3, 4);
    let tokens: Vec<u32> = (1..=16).collect();
    for w in 0..3 {
        r.index().insert(&tokens, w);
    }
    r.start_request(0);
    r.start_request(0);
    r.start_request(1);

    assert_eq!(r.route_request(&tokens, 4).unwrap().worker_id, 2);
}

#[test]
fn test_request_lifecycle_builds_affinity() {
    let r = router(4, 4);
    let system_prompt: Vec<u32> = (1000..1064).collect();

    let first = r.route_request(&system_prompt, 16).unwrap();
    assert_eq!(first.matched_token_count, 0);
    r.start_request(first.worker_id);
    r.complete_request(first.worker_id, &system_prompt, 16);

    for turn in 0..5u32 {
        let mut prompt = system_prompt.clone();
        prompt.extend([turn, turn + 1]);
        let d = r.route_request(&prompt, 16).unwrap();
        assert_eq!(d.worker_id, first.worker_id);
        assert_eq!(d.matched_token_count, 64);
    }

    let stats = r.registry().get_worker_stats();
    assert_eq!(stats.total_requests, 1);
    assert_eq!(stats.active_requests, 0);
}

#[test]
fn test_pool_errors() {
    assert!(matches!(
        router(0, 4).route_request(&[1, 2], 1),
        Err(RouterError::EmptyPool)
    ));

    let r = router(1, 4);
    r.registry().set_offline(0);
    assert!(matches!(
        r.route_request(&[1, 2], 1),
        Err(RouterError::NoAvailableWorkers(1))
    ));
    r.registry().set_online(0);
    assert!(r.route_request(&[1, 2], 1).is_ok());
}

#[test]
fn test_router_from_config() {
    let config = KvRouteConfig::from_str(
        r#"
[router]
block_size = 8
kv_overlap_weight = 2.0
load_balance_weight = 0.0
policy = "least_loaded"

[workers]
num_workers = 3
"#,
    )
    .unwrap();
    let cluster = Cluster::from_config(&config, Arc::new(ManualClock::new())).unwrap();
    let stats = cluster.router.get_stats();
    assert_eq!(stats.policy, "least_loaded");
    assert_eq!(stats.weights.block_size, 8);
    assert_eq!(stats.weights.kv_overlap_weight, 2.0);
}

#[test]
fn test_concurrent_routing() {
    let r = Arc::new(router(4, 16));
    let handles: Vec<_> = (0..4u32)
        .map(|t| {
            let r = r.clone();
            thread::spawn(move || {
                for i in 0..100u32 {
                    let tokens: Vec<u32> = (0..48).map(|x| x + (i % 3) * 1000 + t).collect();
                    let d = r.route_request(&tokens, 8).unwrap();
                    assert!(r.start_request(d.worker_id));
                    assert!(r.complete_request(d.worker_id, &tokens, 8));
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    let stats = r.get_stats();
    assert_eq!(stats.total_routed, 400);
    let pool = r.registry().get_worker_stats();
    assert_eq!(pool.total_requests, 400);
    assert_eq!(pool.active_requests, 0);
    for w in pool.workers {
        assert!((0.0..=1.0).contains(&w.utilization));
    }
}
