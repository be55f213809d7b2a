//! Least-loaded routing policy.
//!
//! Load-only assignment for pools that do not consult the prefix index:
//! spread requests over idle workers at random, and fall back to the worker
//! with the fewest in-flight requests once every worker is busy.

use crate::traits::*;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

/// Random-idle / least-loaded router.
///
/// Randomness comes from a seeded `ChaCha8Rng`, so two policies built with
/// the same seed make the same choices for the same inputs.
pub struct LeastLoaded {
    rng: ChaCha8Rng,
}

impl LeastLoaded {
    pub fn new() -> Self {
        Self::with_seed(42)
    }

    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    /// Pick a worker id from `workers` without looking at cache state.
    pub fn pick(&mut self, workers: &[WorkerSnapshot]) -> Option<WorkerId> {
        let available = available_workers(workers);
        let idle: Vec<WorkerId> = available
            .iter()
            .filter(|w| w.active_requests == 0)
            .map(|w| w.id)
            .collect();
        if let Some(&id) = idle.choose(&mut self.rng) {
            return Some(id);
        }

        available
            .iter()
            .min_by_key(|w| (w.active_requests, w.id))
            .map(|w| w.id)
    }
}

impl Default for LeastLoaded {
    fn default() -> Self {
        Self::new()
    }
}

impl RoutingPolicy for LeastLoaded {
    fn route(
        &mut self,
        _request: &RequestInfo,
        prefix: &PrefixMatch,
        workers: &[WorkerSnapshot],
        _weights: &CostWeights,
    ) -> Option<RoutingDecision> {
        let worker_id = self.pick(workers)?;
        let load = workers
            .iter()
            .find(|w| w.id == worker_id)
            .map(|w| w.active_requests)
            .unwrap_or(0);
        let holds_prefix = prefix.candidate_workers.contains(&worker_id);

        Some(RoutingDecision {
            worker_id,
            matched_token_count: prefix.overlap_for(worker_id),
            matched_block_count: if holds_prefix {
                prefix.matched_block_count()
            } else {
                0
            },
            cost: load as f64,
        })
    }

    fn name(&self) -> &str {
        "least_loaded"
    }
}
