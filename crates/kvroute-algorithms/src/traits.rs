//! Routing policy trait definitions.
//!
//! All routing policies implement the [`RoutingPolicy`] trait, which receives
//! request information, the prefix-index match for the request, and read-only
//! worker snapshots, and picks the worker that should serve the request.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Identifier of a simulated worker.
pub type WorkerId = u32;

/// Token identifier as produced by a tokenizer.
pub type TokenId = u32;

/// Content hash identifying one cache block.
pub type BlockHash = u64;

/// Lifecycle state of a worker.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerStatus {
    /// Registered and serving no requests.
    #[default]
    Idle,
    /// Serving at least one request.
    Active,
    /// Administratively removed from rotation.
    Offline,
}

/// Read-only snapshot of a worker's state, provided to routing policies.
///
/// This is the policy crate's view of a worker: only what is needed for a
/// routing decision, not the full registry record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerSnapshot {
    pub id: WorkerId,
    pub status: WorkerStatus,
    pub active_requests: u32,
    pub total_requests: u64,
    pub cached_blocks: usize,
    pub utilization: f64,
}

/// Result of a longest-prefix lookup in the cache index.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrefixMatch {
    /// Number of leading tokens found in the index.
    pub matched_tokens: usize,
    /// Block hashes completed along the matched path, in order.
    pub matched_blocks: Vec<BlockHash>,
    /// Workers holding at least one of the matched blocks.
    pub candidate_workers: BTreeSet<WorkerId>,
}

impl PrefixMatch {
    /// A lookup that found nothing.
    pub fn miss() -> Self {
        Self::default()
    }

    /// Number of whole blocks matched.
    pub fn matched_block_count(&self) -> usize {
        self.matched_blocks.len()
    }

    /// Whether any tokens matched.
    pub fn is_hit(&self) -> bool {
        self.matched_tokens > 0
    }

    /// Tokens of overlap credited to `worker`: the full match if the worker
    /// holds the matched blocks, zero otherwise.
    pub fn overlap_for(&self, worker: WorkerId) -> usize {
        if self.candidate_workers.contains(&worker) {
            self.matched_tokens
        } else {
            0
        }
    }
}

/// Information about an incoming request, provided to routing policies.
#[derive(Debug, Clone, Copy)]
pub struct RequestInfo {
    /// Prompt length in tokens.
    pub prompt_tokens: usize,
    /// Expected number of generated tokens.
    pub estimated_output_tokens: usize,
}

/// Tunable weights of the routing cost function.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CostWeights {
    /// Tokens per cache block.
    pub block_size: usize,
    /// Weight on prefill blocks that must be recomputed.
    pub kv_overlap_weight: f64,
    /// Weight on each in-flight request of the worker.
    pub load_balance_weight: f64,
}

impl Default for CostWeights {
    fn default() -> Self {
        Self {
            block_size: 16,
            kv_overlap_weight: 1.0,
            load_balance_weight: 0.5,
        }
    }
}

/// Decision returned by a routing policy. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingDecision {
    pub worker_id: WorkerId,
    /// Prompt tokens already cached on the chosen worker. This is the
    /// worker's own overlap, not the raw lookup length: when the longest
    /// indexed prefix belongs to other workers, it is 0.
    pub matched_token_count: usize,
    /// Blocks of the matched prefix held by the chosen worker, under the
    /// same rule as `matched_token_count`.
    pub matched_block_count: usize,
    pub cost: f64,
}

/// The core routing policy trait.
///
/// Implement this trait to plug a custom selection strategy into the router.
/// Returning `None` means no worker could take the request.
pub trait RoutingPolicy: Send + Sync {
    /// Pick a worker for the request.
    fn route(
        &mut self,
        request: &RequestInfo,
        prefix: &PrefixMatch,
        workers: &[WorkerSnapshot],
        weights: &CostWeights,
    ) -> Option<RoutingDecision>;

    /// Human-readable name for reports.
    fn name(&self) -> &str;
}

/// Filter workers to only those that may receive new requests.
pub fn available_workers(workers: &[WorkerSnapshot]) -> Vec<&WorkerSnapshot> {
    workers
        .iter()
        .filter(|w| w.status != WorkerStatus::Offline)
        .collect()
}
