//! KV-Route: cache-aware request routing for simulated LLM clusters.
//!
//! This crate owns the stateful side of routing: a prefix index over token
//! ids, per-worker load tracking, queue latency and cache statistics, and
//! the router that combines them. Routing policies from
//! `kvroute-algorithms` only ever see read-only snapshots.
//!
//! # Architecture
//!
//! ```text
//!                 tokens
//!                   │
//!                   ▼
//!          ┌─────────────────┐  find_longest_prefix  ┌──────────────────┐
//!          │ CacheAwareRouter│──────────────────────▶│ PrefixCacheIndex │
//!          │   + policy      │◀──────────────────────│   (radix tree)   │
//!          └───┬─────────┬───┘      insert on        └──────────────────┘
//!   snapshots  │         │        completion
//!              ▼         ▼
//!   ┌────────────────┐  ┌──────────────┐  ┌──────────────┐
//!   │ WorkerRegistry │  │ QueueTracker │  │ CacheMetrics │
//!   └────────────────┘  └──────────────┘  └──────────────┘
//! ```
//!
//! [`Cluster`] wires the pieces from a [`KvRouteConfig`];
//! [`ClusterSimulator`] drives a cluster with a synthetic workload in
//! virtual time.

pub mod cache_metrics;
pub mod clock;
pub mod cluster;
pub mod config;
pub mod engine;
pub mod logging;
pub mod prefix_index;
pub mod queue_tracker;
pub mod report;
pub mod router;
pub mod seeding;
pub mod worker_registry;
pub mod workload;

// Re-export key types for convenience.
pub use cache_metrics::{CacheMetrics, CacheStats, SpeedupStats};
pub use clock::{Clock, ManualClock, SystemClock};
pub use cluster::Cluster;
pub use config::{ConfigError, KvRouteConfig};
pub use engine::{ClusterSimulator, SimEvent};
pub use prefix_index::{compute_block_hashes, IndexStats, PrefixCacheIndex};
pub use queue_tracker::{QueueStats, QueueTracker, WaitTimeStats};
pub use report::{format_comparison_table, format_report, SimulationReport};
pub use router::{CacheAwareRouter, RouterError, RouterStats};
pub use seeding::{seed_baseline, BaselineOptions, BaselineSummary};
pub use worker_registry::{WorkerPoolStats, WorkerRegistry, WorkerStats};
pub use workload::{generate_workload, SimRequest};

/// Run one simulation described by `config`.
pub fn run_simulation(config: &KvRouteConfig) -> Result<SimulationReport, RouterError> {
    Ok(ClusterSimulator::new(config)?.run())
}

/// Run the same workload once per policy.
///
/// Only `router.policy` changes between runs, so the reports are directly
/// comparable.
pub fn compare_policies(
    config: &KvRouteConfig,
    policies: &[&str],
) -> Result<Vec<SimulationReport>, RouterError> {
    policies
        .iter()
        .map(|policy| {
            let mut config = config.clone();
            config.router.policy = policy.to_string();
            run_simulation(&config)
        })
        .collect()
}
