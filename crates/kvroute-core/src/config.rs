//! TOML configuration parsing for KV-Route.
//!
//! Defines the configuration schema for the routing core (block size, cost
//! weights, pool size, history bounds) and for simulation runs. Every field
//! has a default, so an empty document is a valid configuration.

use kvroute_algorithms::CostWeights;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Upper bound accepted for either cost weight.
pub const MAX_WEIGHT: f64 = 100.0;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid configuration: {0}")]
    Validation(String),
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KvRouteConfig {
    #[serde(default)]
    pub router: RouterSection,
    #[serde(default)]
    pub workers: WorkersSection,
    #[serde(default)]
    pub history: HistorySection,
    #[serde(default)]
    pub simulation: SimulationSection,
}

/// Cache index and cost-function parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterSection {
    /// Tokens per cache block. Must be a power of two.
    #[serde(default = "default_block_size")]
    pub block_size: usize,
    /// Weight on prefill blocks the worker would have to recompute.
    #[serde(default = "default_kv_overlap_weight")]
    pub kv_overlap_weight: f64,
    /// Weight on each request already in flight on the worker.
    #[serde(default = "default_load_balance_weight")]
    pub load_balance_weight: f64,
    /// Routing policy name (see `kvroute_algorithms::available_policies`).
    #[serde(default = "default_policy")]
    pub policy: String,
}

fn default_block_size() -> usize {
    16
}
fn default_kv_overlap_weight() -> f64 {
    1.0
}
fn default_load_balance_weight() -> f64 {
    0.5
}
fn default_policy() -> String {
    "kv_cost".to_string()
}

impl Default for RouterSection {
    fn default() -> Self {
        Self {
            block_size: default_block_size(),
            kv_overlap_weight: default_kv_overlap_weight(),
            load_balance_weight: default_load_balance_weight(),
            policy: default_policy(),
        }
    }
}

impl RouterSection {
    /// Cost weights handed to routing policies.
    pub fn cost_weights(&self) -> CostWeights {
        CostWeights {
            block_size: self.block_size,
            kv_overlap_weight: self.kv_overlap_weight,
            load_balance_weight: self.load_balance_weight,
        }
    }
}

/// Worker pool parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkersSection {
    /// Number of workers registered at startup.
    #[serde(default = "default_num_workers")]
    pub num_workers: u32,
    /// Seed for the random idle-worker choice of `assign_request`.
    #[serde(default = "default_seed")]
    pub assignment_seed: u64,
}

fn default_num_workers() -> u32 {
    4
}
fn default_seed() -> u64 {
    42
}

impl Default for WorkersSection {
    fn default() -> Self {
        Self {
            num_workers: default_num_workers(),
            assignment_seed: default_seed(),
        }
    }
}

/// Bounds of the rolling histories kept by each component.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistorySection {
    /// Request durations kept per worker.
    #[serde(default = "default_duration_history")]
    pub request_durations: usize,
    /// Wait times kept by the queue tracker.
    #[serde(default = "default_sample_history")]
    pub wait_times: usize,
    /// Queue depth samples kept by the queue tracker.
    #[serde(default = "default_sample_history")]
    pub queue_depths: usize,
    /// Matched prefix lengths kept by the cache metrics.
    #[serde(default = "default_sample_history")]
    pub prefix_lengths: usize,
    /// TTFT speedup observations kept by the cache metrics.
    #[serde(default = "default_sample_history")]
    pub speedups: usize,
}

fn default_duration_history() -> usize {
    100
}
fn default_sample_history() -> usize {
    1000
}

impl Default for HistorySection {
    fn default() -> Self {
        Self {
            request_durations: default_duration_history(),
            wait_times: default_sample_history(),
            queue_depths: default_sample_history(),
            prefix_lengths: default_sample_history(),
            speedups: default_sample_history(),
        }
    }
}

/// Synthetic workload parameters for the cluster simulator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationSection {
    /// Human-readable name for this run.
    #[serde(default = "default_sim_name")]
    pub name: String,
    /// Random seed for workload generation.
    #[serde(default = "default_seed")]
    pub seed: u64,
    /// Number of requests to generate.
    #[serde(default = "default_num_requests")]
    pub num_requests: u64,
    /// Mean arrival rate in requests per second.
    #[serde(default = "default_arrival_rate")]
    pub arrival_rate_per_sec: f64,
    /// Number of distinct shared prompt prefixes (system prompts).
    #[serde(default = "default_num_prefixes")]
    pub num_prefixes: u32,
    /// Length of each shared prefix in tokens.
    #[serde(default = "default_prefix_len")]
    pub prefix_len: usize,
    /// Mean length of the per-request unique suffix.
    #[serde(default = "default_suffix_len_mean")]
    pub suffix_len_mean: f64,
    /// Spread of the unique suffix length.
    #[serde(default = "default_suffix_len_std")]
    pub suffix_len_std: f64,
    /// Mean number of generated tokens.
    #[serde(default = "default_output_tokens_mean")]
    pub output_tokens_mean: f64,
    /// Spread of the generated token count.
    #[serde(default = "default_output_tokens_std")]
    pub output_tokens_std: f64,
    /// Prefill throughput of one worker in tokens/sec.
    #[serde(default = "default_prefill_tps")]
    pub prefill_tokens_per_sec: f64,
    /// Decode throughput of one request in tokens/sec.
    #[serde(default = "default_decode_tps")]
    pub decode_tokens_per_sec: f64,
    /// Requests one worker executes at a time; the rest wait in its queue.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_per_worker: u32,
    /// Model names requests are spread over.
    #[serde(default = "default_models")]
    pub models: Vec<String>,
    /// Pre-populate workers and the index with synthetic history.
    #[serde(default)]
    pub seed_baseline: bool,
    /// Synthetic past requests imported per worker when seeding.
    #[serde(default = "default_baseline_requests")]
    pub baseline_requests_per_worker: usize,
}

fn default_sim_name() -> String {
    "simulation".to_string()
}
fn default_num_requests() -> u64 {
    1000
}
fn default_arrival_rate() -> f64 {
    20.0
}
fn default_num_prefixes() -> u32 {
    8
}
fn default_prefix_len() -> usize {
    256
}
fn default_suffix_len_mean() -> f64 {
    128.0
}
fn default_suffix_len_std() -> f64 {
    64.0
}
fn default_output_tokens_mean() -> f64 {
    128.0
}
fn default_output_tokens_std() -> f64 {
    48.0
}
fn default_prefill_tps() -> f64 {
    10_000.0
}
fn default_decode_tps() -> f64 {
    80.0
}
fn default_max_concurrent() -> u32 {
    8
}
fn default_baseline_requests() -> usize {
    20
}
fn default_models() -> Vec<String> {
    vec!["llama-3-8b".to_string()]
}

impl Default for SimulationSection {
    fn default() -> Self {
        Self {
            name: default_sim_name(),
            seed: default_seed(),
            num_requests: default_num_requests(),
            arrival_rate_per_sec: default_arrival_rate(),
            num_prefixes: default_num_prefixes(),
            prefix_len: default_prefix_len(),
            suffix_len_mean: default_suffix_len_mean(),
            suffix_len_std: default_suffix_len_std(),
            output_tokens_mean: default_output_tokens_mean(),
            output_tokens_std: default_output_tokens_std(),
            prefill_tokens_per_sec: default_prefill_tps(),
            decode_tokens_per_sec: default_decode_tps(),
            max_concurrent_per_worker: default_max_concurrent(),
            models: default_models(),
            seed_baseline: false,
            baseline_requests_per_worker: default_baseline_requests(),
        }
    }
}

/// Reject block sizes that are zero or not a power of two.
pub fn validate_block_size(block_size: usize) -> Result<(), ConfigError> {
    if !block_size.is_power_of_two() {
        return Err(ConfigError::Validation(format!(
            "block_size must be a power of two, got {}",
            block_size
        )));
    }
    Ok(())
}

/// Reject a cost weight that is non-finite or outside `[0, MAX_WEIGHT]`.
pub fn validate_weight(name: &str, value: f64) -> Result<(), ConfigError> {
    if !value.is_finite() || !(0.0..=MAX_WEIGHT).contains(&value) {
        return Err(ConfigError::Validation(format!(
            "{} must be within [0, {}], got {}",
            name, MAX_WEIGHT, value
        )));
    }
    Ok(())
}

impl KvRouteConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Parse configuration from a TOML string.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Result<Self, ConfigError> {
        let config: KvRouteConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Render the configuration as TOML.
    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    /// Validate configuration consistency.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_block_size(self.router.block_size)?;
        validate_weight("kv_overlap_weight", self.router.kv_overlap_weight)?;
        validate_weight("load_balance_weight", self.router.load_balance_weight)?;
        if kvroute_algorithms::policy_by_name(&self.router.policy).is_none() {
            return Err(ConfigError::Validation(format!(
                "Unknown routing policy: {}. Available: {:?}",
                self.router.policy,
                kvroute_algorithms::available_policies()
            )));
        }
        if self.workers.num_workers == 0 {
            return Err(ConfigError::Validation(
                "num_workers must be > 0".to_string(),
            ));
        }
        let h = &self.history;
        if [
            h.request_durations,
            h.wait_times,
            h.queue_depths,
            h.prefix_lengths,
            h.speedups,
        ]
        .contains(&0)
        {
            return Err(ConfigError::Validation(
                "history bounds must be > 0".to_string(),
            ));
        }
        let s = &self.simulation;
        if s.arrival_rate_per_sec <= 0.0 {
            return Err(ConfigError::Validation(
                "arrival_rate_per_sec must be > 0".to_string(),
            ));
        }
        if s.prefill_tokens_per_sec <= 0.0 {
            return Err(ConfigError::Validation(
                "prefill_tokens_per_sec must be > 0".to_string(),
            ));
        }
        if s.decode_tokens_per_sec <= 0.0 {
            return Err(ConfigError::Validation(
                "decode_tokens_per_sec must be > 0".to_string(),
            ));
        }
        if s.max_concurrent_per_worker == 0 {
            return Err(ConfigError::Validation(
                "max_concurrent_per_worker must be > 0".to_string(),
            ));
        }
        if s.models.is_empty() {
            return Err(ConfigError::Validation(
                "at least one model name is required".to_string(),
            ));
        }
        Ok(())
    }
}
