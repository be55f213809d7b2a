/// Integration tests for the prefix index.
use kvroute_core::clock::ManualClock;
use kvroute_core::prefix_index::{compute_block_hashes, PrefixCacheIndex};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::thread;

fn index(block_size: usize) -> PrefixCacheIndex {
    PrefixCacheIndex::new(block_size, Arc::new(ManualClock::new())).unwrap()
}

#[test]
fn test_idempotent_insert() {
    let idx = index(4);
    let tokens: Vec<u32> = (0..37).collect();

    assert_eq!(idx.insert(&tokens, 1), 9);
    let blocks_after_first: BTreeSet<u64> = idx
        .find_longest_prefix(&tokens)
        .matched_blocks
        .into_iter()
        .collect();

    assert_eq!(idx.insert(&tokens, 1), 0);
    let blocks_after_second: BTreeSet<u64> = idx
        .find_longest_prefix(&tokens)
        .matched_blocks
        .into_iter()
        .collect();

    assert_eq!(blocks_after_first, blocks_after_second);
    assert_eq!(idx.get_stats().total_cached_blocks, 9);
}

#[test]
fn test_prefix_monotonicity() {
    let idx = index(8);
    let a: Vec<u32> = (100..130).collect();
    idx.insert(&a, 0);

    for extra in [0usize, 1, 7, 20] {
        let mut b = a.clone();
        b.extend((0..extra as u32).map(|t| 9000 + t));
        let last_boundary = (a.len() / 8) * 8;
        assert!(idx.find_longest_prefix(&b).matched_tokens >= last_boundary);
    }
}

#[test]
fn test_content_address_stability() {
    let idx = index(4);
    let shared: Vec<u32> = vec![5, 6, 7, 8, 9, 10, 11, 12];
    idx.insert(&shared, 1);
    idx.insert(&shared, 2);

    let m = idx.find_longest_prefix(&shared);
    assert_eq!(m.matched_blocks, compute_block_hashes(&shared, 4));
    assert_eq!(m.candidate_workers, BTreeSet::from([1, 2]));
    assert_eq!(idx.get_stats().total_cached_blocks, 2);
}

#[test]
fn test_diverging_sequences_share_only_common_blocks() {
    let idx = index(4);
    idx.insert(&[1, 2, 3, 4, 5, 6, 7, 8], 0);
    idx.insert(&[1, 2, 3, 4, 9, 9, 9, 9], 1);

    let m = idx.find_longest_prefix(&[1, 2, 3, 4, 5, 6, 0, 0]);
    assert_eq!(m.matched_tokens, 6);
    assert_eq!(m.matched_block_count(), 1);
    assert_eq!(m.candidate_workers, BTreeSet::from([0, 1]));
    assert_eq!(idx.get_stats().total_nodes, 12);
}

#[test]
fn test_remove_worker_keeps_blocks() {
    let idx = index(4);
    let tokens: Vec<u32> = (1..=8).collect();
    idx.insert(&tokens, 0);
    idx.insert(&tokens, 1);

    assert_eq!(idx.remove_worker(0), 2);
    let m = idx.find_longest_prefix(&tokens);
    assert_eq!(m.candidate_workers, BTreeSet::from([1]));
    assert_eq!(m.matched_block_count(), 2);
}

#[test]
fn test_concurrent_inserts_and_lookups() {
    let idx = Arc::new(index(16));
    let handles: Vec<_> = (0..4u32)
        .map(|worker| {
            let idx = idx.clone();
            thread::spawn(move || {
                for round in 0..50u32 {
                    let tokens: Vec<u32> = (0..64).map(|t| t + round % 5).collect();
                    idx.insert(&tokens, worker);
                    let _ = idx.find_longest_prefix(&tokens);
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    for round in 0..5u32 {
        let tokens: Vec<u32> = (0..64).map(|t| t + round).collect();
        let m = idx.find_longest_prefix(&tokens);
        assert_eq!(m.matched_tokens, 64);
        assert_eq!(m.candidate_workers.len(), 4);
    }
}
