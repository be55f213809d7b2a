//! Cache-aware routing front end.
//!
//! The router ties the prefix index and the worker registry together: a
//! lookup in the index yields the workers that already hold a prefix of the
//! prompt, the registry yields their load, and the configured
//! [`RoutingPolicy`] turns both into a [`RoutingDecision`]. Routing itself
//! never changes worker state; callers start and complete requests
//! explicitly.

use crate::config::{validate_block_size, validate_weight, ConfigError, RouterSection};
use crate::prefix_index::{compute_block_hashes, IndexStats, PrefixCacheIndex};
use crate::worker_registry::{WorkerRecord, WorkerRegistry};
use kvroute_algorithms::{
    CostWeights, KvCost, RequestInfo, RoutingDecision, RoutingPolicy, TokenId, WorkerId,
    WorkerStatus,
};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RouterError {
    #[error("No workers are registered")]
    EmptyPool,
    #[error("All {0} registered workers are offline")]
    NoAvailableWorkers(usize),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Serializable router statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterStats {
    pub policy: String,
    pub total_routed: u64,
    /// Routes whose chosen worker already held part of the prompt.
    pub prefix_routed: u64,
    pub prefix_route_rate: f64,
    pub avg_matched_blocks: f64,
    pub weights: CostWeights,
    pub index: IndexStats,
}

/// Picks a worker for each request by prefix overlap and load.
pub struct CacheAwareRouter {
    index: Arc<PrefixCacheIndex>,
    registry: Arc<WorkerRegistry>,
    weights: RwLock<CostWeights>,
    policy: Mutex<Box<dyn RoutingPolicy>>,
    total_routed: AtomicU64,
    prefix_routed: AtomicU64,
    matched_blocks: AtomicU64,
}

impl CacheAwareRouter {
    /// Create a router using the [`KvCost`] policy.
    ///
    /// The block size always comes from the index, whatever `weights` says.
    pub fn new(
        index: Arc<PrefixCacheIndex>,
        registry: Arc<WorkerRegistry>,
        weights: CostWeights,
    ) -> Result<Self, RouterError> {
        validate_weight("kv_overlap_weight", weights.kv_overlap_weight)?;
        validate_weight("load_balance_weight", weights.load_balance_weight)?;
        validate_block_size(index.block_size())?;
        let weights = CostWeights {
            block_size: index.block_size(),
            ..weights
        };
        Ok(Self {
            index,
            registry,
            weights: RwLock::new(weights),
            policy: Mutex::new(Box::new(KvCost::new())),
            total_routed: AtomicU64::new(0),
            prefix_routed: AtomicU64::new(0),
            matched_blocks: AtomicU64::new(0),
        })
    }

    /// Create a router from the `[router]` configuration section, including
    /// its policy.
    pub fn from_config(
        config: &RouterSection,
        index: Arc<PrefixCacheIndex>,
        registry: Arc<WorkerRegistry>,
    ) -> Result<Self, RouterError> {
        let policy = kvroute_algorithms::policy_by_name(&config.policy).ok_or_else(|| {
            ConfigError::Validation(format!("Unknown routing policy: {}", config.policy))
        })?;
        Ok(Self::new(index, registry, config.cost_weights())?.with_policy(policy))
    }

    /// Replace the routing policy.
    pub fn with_policy(self, policy: Box<dyn RoutingPolicy>) -> Self {
        self.set_policy(policy);
        self
    }

    /// Swap the routing policy on a shared router.
    pub fn set_policy(&self, policy: Box<dyn RoutingPolicy>) {
        let name = policy.name().to_string();
        *self.policy.lock() = policy;
        tracing::info!(policy = %name, "switched routing policy");
    }

    pub fn index(&self) -> &Arc<PrefixCacheIndex> {
        &self.index
    }

    pub fn registry(&self) -> &Arc<WorkerRegistry> {
        &self.registry
    }

    pub fn policy_name(&self) -> String {
        self.policy.lock().name().to_string()
    }

    pub fn weights(&self) -> CostWeights {
        *self.weights.read()
    }

    /// Choose a worker for a prompt.
    ///
    /// Looks the prompt up in the index, then lets the policy score every
    /// online worker. Worker state is left untouched.
    pub fn route_request(
        &self,
        tokens: &[TokenId],
        estimated_output_tokens: usize,
    ) -> Result<RoutingDecision, RouterError> {
        let workers = self.registry.snapshots();
        if workers.is_empty() {
            return Err(RouterError::EmptyPool);
        }
        if workers.iter().all(|w| w.status == WorkerStatus::Offline) {
            return Err(RouterError::NoAvailableWorkers(workers.len()));
        }

        let prefix = self.index.find_longest_prefix(tokens);
        let request = RequestInfo {
            prompt_tokens: tokens.len(),
            estimated_output_tokens,
        };
        let weights = self.weights();
        let decision = self
            .policy
            .lock()
            .route(&request, &prefix, &workers, &weights)
            .ok_or(RouterError::NoAvailableWorkers(workers.len()))?;

        self.total_routed.fetch_add(1, Ordering::Relaxed);
        if decision.matched_token_count > 0 {
            self.prefix_routed.fetch_add(1, Ordering::Relaxed);
        }
        self.matched_blocks
            .fetch_add(decision.matched_block_count as u64, Ordering::Relaxed);

        tracing::debug!(
            worker_id = decision.worker_id,
            prompt_tokens = tokens.len(),
            matched_tokens = decision.matched_token_count,
            matched_blocks = decision.matched_block_count,
            cost = decision.cost,
            "routed request"
        );
        Ok(decision)
    }

    /// Mark a request as started on `worker_id`.
    pub fn start_request(&self, worker_id: WorkerId) -> bool {
        self.registry.start_request(worker_id)
    }

    /// Finish a request: release the worker slot, count its tokens and
    /// index the prompt as cached on the worker.
    ///
    /// Unknown workers are ignored and nothing is indexed.
    pub fn complete_request(
        &self,
        worker_id: WorkerId,
        tokens: &[TokenId],
        output_tokens: usize,
    ) -> bool {
        self.complete(worker_id, tokens, output_tokens, None)
    }

    /// Like [`CacheAwareRouter::complete_request`], also accounting the
    /// request duration towards the worker's utilization.
    pub fn complete_request_timed(
        &self,
        worker_id: WorkerId,
        tokens: &[TokenId],
        output_tokens: usize,
        duration_ms: f64,
    ) -> bool {
        self.complete(worker_id, tokens, output_tokens, Some(duration_ms))
    }

    fn complete(
        &self,
        worker_id: WorkerId,
        tokens: &[TokenId],
        output_tokens: usize,
        duration_ms: Option<f64>,
    ) -> bool {
        let blocks = compute_block_hashes(tokens, self.index.block_size());
        let processed = (tokens.len() + output_tokens) as u64;
        if !self
            .registry
            .complete_routed_request(worker_id, processed, &blocks, duration_ms)
        {
            return false;
        }
        self.index.insert(tokens, worker_id);
        true
    }

    /// Add a worker to the pool with an empty cache.
    ///
    /// Any index entries left under the same id are dropped first, so a
    /// reused id never inherits another worker's prefixes.
    pub fn register_worker(&self, worker_id: WorkerId) -> bool {
        if !self.registry.register_worker(worker_id) {
            return false;
        }
        self.index.remove_worker(worker_id);
        true
    }

    /// Remove a worker from the pool and from every owner set in the index.
    pub fn deregister_worker(&self, worker_id: WorkerId) -> Option<WorkerRecord> {
        let record = self.registry.deregister_worker(worker_id)?;
        let nodes = self.index.remove_worker(worker_id);
        tracing::debug!(worker_id, nodes, "dropped worker from index");
        Some(record)
    }

    /// Change the cost weights at runtime.
    ///
    /// Both values are validated before either is applied, so a rejected
    /// update leaves the router unchanged. Returns the weights now in effect.
    pub fn update_weights(
        &self,
        kv_overlap_weight: Option<f64>,
        load_balance_weight: Option<f64>,
    ) -> Result<CostWeights, RouterError> {
        if let Some(w) = kv_overlap_weight {
            validate_weight("kv_overlap_weight", w)?;
        }
        if let Some(w) = load_balance_weight {
            validate_weight("load_balance_weight", w)?;
        }

        let mut weights = self.weights.write();
        if let Some(w) = kv_overlap_weight {
            weights.kv_overlap_weight = w;
        }
        if let Some(w) = load_balance_weight {
            weights.load_balance_weight = w;
        }
        tracing::info!(
            kv_overlap_weight = weights.kv_overlap_weight,
            load_balance_weight = weights.load_balance_weight,
            "updated cost weights"
        );
        Ok(*weights)
    }

    pub fn get_stats(&self) -> RouterStats {
        let total_routed = self.total_routed.load(Ordering::Relaxed);
        let prefix_routed = self.prefix_routed.load(Ordering::Relaxed);
        let matched_blocks = self.matched_blocks.load(Ordering::Relaxed);
        let (prefix_route_rate, avg_matched_blocks) = if total_routed > 0 {
            (
                prefix_routed as f64 / total_routed as f64 * 100.0,
                matched_blocks as f64 / total_routed as f64,
            )
        } else {
            (0.0, 0.0)
        };
        RouterStats {
            policy: self.policy_name(),
            total_routed,
            prefix_routed,
            prefix_route_rate,
            avg_matched_blocks,
            weights: self.weights(),
            index: self.index.get_stats(),
        }
    }
}
