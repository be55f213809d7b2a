//! Composition root wiring the routing components together.

use crate::cache_metrics::CacheMetrics;
use crate::clock::Clock;
use crate::config::KvRouteConfig;
use crate::prefix_index::PrefixCacheIndex;
use crate::queue_tracker::QueueTracker;
use crate::router::{CacheAwareRouter, RouterError};
use crate::seeding::{seed_baseline, BaselineOptions, BaselineSummary};
use crate::worker_registry::WorkerRegistry;
use std::sync::Arc;

/// One set of components sharing a clock.
///
/// Every field is an `Arc`, so handles can be cloned out and used from
/// other threads.
#[derive(Clone)]
pub struct Cluster {
    pub clock: Arc<dyn Clock>,
    pub index: Arc<PrefixCacheIndex>,
    pub registry: Arc<WorkerRegistry>,
    pub router: Arc<CacheAwareRouter>,
    pub queue: Arc<QueueTracker>,
    pub metrics: Arc<CacheMetrics>,
}

impl Cluster {
    /// Build every component from a validated configuration.
    pub fn from_config(config: &KvRouteConfig, clock: Arc<dyn Clock>) -> Result<Self, RouterError> {
        config.validate()?;
        let history = &config.history;
        let index = Arc::new(PrefixCacheIndex::new(
            config.router.block_size,
            clock.clone(),
        )?);
        let registry = Arc::new(WorkerRegistry::with_options(
            config.workers.num_workers,
            clock.clone(),
            history.request_durations,
            config.workers.assignment_seed,
        ));
        let router = Arc::new(CacheAwareRouter::from_config(
            &config.router,
            index.clone(),
            registry.clone(),
        )?);
        let queue = Arc::new(QueueTracker::with_history(
            clock.clone(),
            history.wait_times,
            history.queue_depths,
        ));
        let metrics = Arc::new(CacheMetrics::with_history(
            history.prefix_lengths,
            history.speedups,
        ));

        tracing::info!(
            workers = config.workers.num_workers,
            block_size = config.router.block_size,
            policy = %config.router.policy,
            "built cluster"
        );
        Ok(Self {
            clock,
            index,
            registry,
            router,
            queue,
            metrics,
        })
    }

    /// Seed synthetic history shaped after the `[simulation]` section.
    pub fn seed_baseline(&self, config: &KvRouteConfig) -> BaselineSummary {
        let sim = &config.simulation;
        let options = BaselineOptions {
            seed: sim.seed,
            requests_per_worker: sim.baseline_requests_per_worker,
            num_prefixes: sim.num_prefixes,
            prefix_len: sim.prefix_len,
            ..BaselineOptions::default()
        };
        seed_baseline(&self.index, &self.registry, &options)
    }
}
