//! Optional pre-population of a cluster with synthetic history.
//!
//! A freshly built cluster has empty workers and an empty index, which makes
//! demos and dashboards look dead for the first few hundred requests.
//! [`seed_baseline`] fakes a past: every worker gets a duration history, a
//! few failures and some uptime, and caches one or two of the shared
//! prefixes. Nothing calls it implicitly.

use crate::prefix_index::{compute_block_hashes, PrefixCacheIndex};
use crate::worker_registry::{WorkerHistory, WorkerRegistry};
use crate::workload::{prefix_tokens, sample_around};
use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

/// Shape of the synthetic history.
#[derive(Debug, Clone)]
pub struct BaselineOptions {
    pub seed: u64,
    pub requests_per_worker: usize,
    pub mean_duration_ms: f64,
    /// Distinct shared prefixes workers may have cached.
    pub num_prefixes: u32,
    pub prefix_len: usize,
    /// Fraction of the history spent busy.
    pub target_utilization: f64,
}

impl Default for BaselineOptions {
    fn default() -> Self {
        Self {
            seed: 42,
            requests_per_worker: 20,
            mean_duration_ms: 400.0,
            num_prefixes: 8,
            prefix_len: 256,
            target_utilization: 0.3,
        }
    }
}

/// What [`seed_baseline`] did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaselineSummary {
    pub workers_seeded: usize,
    pub requests_imported: u64,
    pub blocks_indexed: usize,
}

/// Import synthetic history into every registered worker and index the
/// prefixes they supposedly served.
pub fn seed_baseline(
    index: &PrefixCacheIndex,
    registry: &WorkerRegistry,
    options: &BaselineOptions,
) -> BaselineSummary {
    let mut rng = ChaCha8Rng::seed_from_u64(options.seed);
    let mut summary = BaselineSummary::default();
    let num_prefixes = options.num_prefixes.max(1);
    let utilization = options.target_utilization.clamp(0.01, 1.0);

    for worker_id in registry.worker_ids() {
        let durations_ms: Vec<f64> = (0..options.requests_per_worker)
            .map(|_| {
                sample_around(
                    &mut rng,
                    options.mean_duration_ms,
                    options.mean_duration_ms / 2.0,
                    1.0,
                )
            })
            .collect();
        let busy_ms: f64 = durations_ms.iter().sum();
        let failed_requests = rng.gen_range(0..=(options.requests_per_worker as u64 / 10));

        let mut cached_blocks = Vec::new();
        let mut tokens_processed = 0u64;
        for _ in 0..rng.gen_range(1..=2u32) {
            let tokens = prefix_tokens(rng.gen_range(0..num_prefixes), options.prefix_len);
            summary.blocks_indexed += index.insert(&tokens, worker_id);
            cached_blocks.extend(compute_block_hashes(&tokens, index.block_size()));
            tokens_processed += tokens.len() as u64;
        }
        tokens_processed *= options.requests_per_worker.max(1) as u64;

        let history = WorkerHistory {
            uptime_ms: (busy_ms / utilization) as u64,
            durations_ms,
            failed_requests,
            tokens_processed,
            cached_blocks,
        };
        if registry.import_history(worker_id, &history) {
            summary.workers_seeded += 1;
            summary.requests_imported += history.durations_ms.len() as u64 + failed_requests;
        }
    }

    tracing::info!(
        workers = summary.workers_seeded,
        requests = summary.requests_imported,
        blocks = summary.blocks_indexed,
        "seeded baseline history"
    );
    summary
}
