//! KV-overlap cost routing policy.
//!
//! Each worker gets a cost made of three terms, all expressed in blocks:
//! the prefill blocks it would have to recompute (discounted by the prefix
//! it already holds), the decode blocks the request will produce, and a
//! penalty per request already in flight. The request goes to the cheapest
//! worker.

use crate::traits::*;

/// Cache-aware cost-minimizing router.
///
/// ```text
/// cost = kv_overlap_weight * max(0, prompt - overlap) / block_size
///      + estimated_output / block_size
///      + load_balance_weight * active_requests
/// ```
///
/// Ties are broken by the lowest worker id so decisions are reproducible.
pub struct KvCost;

impl KvCost {
    pub fn new() -> Self {
        Self
    }

    /// Cost of sending `request` to `worker`.
    pub fn cost(
        request: &RequestInfo,
        prefix: &PrefixMatch,
        worker: &WorkerSnapshot,
        weights: &CostWeights,
    ) -> f64 {
        let block_size = weights.block_size.max(1) as f64;
        let overlap = prefix.overlap_for(worker.id);
        let prefill_blocks = request.prompt_tokens.saturating_sub(overlap) as f64 / block_size;
        let decode_blocks = request.estimated_output_tokens as f64 / block_size;
        weights.kv_overlap_weight * prefill_blocks
            + decode_blocks
            + weights.load_balance_weight * worker.active_requests as f64
    }
}

impl Default for KvCost {
    fn default() -> Self {
        Self::new()
    }
}

impl RoutingPolicy for KvCost {
    fn route(
        &mut self,
        request: &RequestInfo,
        prefix: &PrefixMatch,
        workers: &[WorkerSnapshot],
        weights: &CostWeights,
    ) -> Option<RoutingDecision> {
        let mut best: Option<(&WorkerSnapshot, f64)> = None;
        for worker in available_workers(workers) {
            let cost = Self::cost(request, prefix, worker, weights);
            let better = match best {
                None => true,
                Some((current, current_cost)) => {
                    cost < current_cost || (cost == current_cost && worker.id < current.id)
                }
            };
            if better {
                best = Some((worker, cost));
            }
        }

        best.map(|(worker, cost)| RoutingDecision {
            worker_id: worker.id,
            matched_token_count: prefix.overlap_for(worker.id),
            matched_block_count: if prefix.candidate_workers.contains(&worker.id) {
                prefix.matched_block_count()
            } else {
                0
            },
            cost,
        })
    }

    fn name(&self) -> &str {
        "kv_cost"
    }
}
