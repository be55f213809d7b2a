//! Per-worker load and cache-state tracking.
//!
//! Each simulated worker moves through a small state machine:
//!
//! ```text
//!            start_request              start_request
//!   ┌──────┐ ─────────────▶ ┌────────┐ ◀──────────┐
//!   │ Idle │                │ Active │ ───────────┘
//!   └──────┘ ◀───────────── └────────┘
//!        ▲   complete_request    │
//!        │   (drains to 0)       │ set_offline
//!        │ set_online            ▼
//!        └──────────────── ┌─────────┐
//!                          │ Offline │
//!                          └─────────┘
//! ```
//!
//! Utilization is derived on every query from cumulative busy time and the
//! worker's uptime; it is never stored.

use crate::clock::Clock;
use kvroute_algorithms::{BlockHash, LeastLoaded, WorkerId, WorkerSnapshot, WorkerStatus};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::Arc;

/// Full state of one worker.
#[derive(Debug, Clone)]
pub struct WorkerRecord {
    pub id: WorkerId,
    pub status: WorkerStatus,
    pub active_requests: u32,
    /// Requests ever started on this worker.
    pub total_requests: u64,
    pub completed_requests: u64,
    pub failed_requests: u64,
    pub total_tokens_processed: u64,
    pub cached_blocks: HashSet<BlockHash>,
    /// Sum of successful request durations.
    pub busy_time_ms: f64,
    pub registered_at_ms: u64,
    /// Uptime credited by imported history, on top of wall uptime.
    uptime_credit_ms: u64,
    /// Most recent successful durations, oldest first.
    durations_ms: VecDeque<f64>,
}

impl WorkerRecord {
    fn new(id: WorkerId, now_ms: u64) -> Self {
        Self {
            id,
            status: WorkerStatus::Idle,
            active_requests: 0,
            total_requests: 0,
            completed_requests: 0,
            failed_requests: 0,
            total_tokens_processed: 0,
            cached_blocks: HashSet::new(),
            busy_time_ms: 0.0,
            registered_at_ms: now_ms,
            uptime_credit_ms: 0,
            durations_ms: VecDeque::new(),
        }
    }

    fn push_duration(&mut self, duration_ms: f64, limit: usize) {
        if self.durations_ms.len() >= limit {
            self.durations_ms.pop_front();
        }
        self.durations_ms.push_back(duration_ms);
    }

    /// Mean of the rolling duration history.
    pub fn avg_duration_ms(&self) -> f64 {
        if self.durations_ms.is_empty() {
            return 0.0;
        }
        self.durations_ms.iter().sum::<f64>() / self.durations_ms.len() as f64
    }

    pub fn uptime_ms(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.registered_at_ms) + self.uptime_credit_ms
    }

    /// Busy time over uptime, clamped to `[0, 1]`.
    pub fn utilization(&self, now_ms: u64) -> f64 {
        let uptime = self.uptime_ms(now_ms);
        if uptime == 0 {
            return 0.0;
        }
        (self.busy_time_ms / uptime as f64).clamp(0.0, 1.0)
    }

    fn snapshot(&self, now_ms: u64) -> WorkerSnapshot {
        WorkerSnapshot {
            id: self.id,
            status: self.status,
            active_requests: self.active_requests,
            total_requests: self.total_requests,
            cached_blocks: self.cached_blocks.len(),
            utilization: self.utilization(now_ms),
        }
    }

    fn stats(&self, now_ms: u64) -> WorkerStats {
        WorkerStats {
            worker_id: self.id,
            status: self.status,
            active_requests: self.active_requests,
            total_requests: self.total_requests,
            completed_requests: self.completed_requests,
            failed_requests: self.failed_requests,
            avg_request_duration_ms: self.avg_duration_ms(),
            utilization: self.utilization(now_ms),
            total_tokens_processed: self.total_tokens_processed,
            cached_blocks: self.cached_blocks.len(),
            busy_time_ms: self.busy_time_ms,
            uptime_ms: self.uptime_ms(now_ms),
        }
    }
}

/// Serializable per-worker statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerStats {
    pub worker_id: WorkerId,
    pub status: WorkerStatus,
    pub active_requests: u32,
    pub total_requests: u64,
    pub completed_requests: u64,
    pub failed_requests: u64,
    pub avg_request_duration_ms: f64,
    pub utilization: f64,
    pub total_tokens_processed: u64,
    pub cached_blocks: usize,
    pub busy_time_ms: f64,
    pub uptime_ms: u64,
}

/// Pool-wide statistics, workers sorted by id.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkerPoolStats {
    pub total_workers: usize,
    pub idle_workers: usize,
    pub active_workers: usize,
    pub offline_workers: usize,
    pub active_requests: u64,
    pub total_requests: u64,
    pub avg_utilization: f64,
    pub workers: Vec<WorkerStats>,
}

/// Synthetic past activity imported into a worker record.
#[derive(Debug, Clone, Default)]
pub struct WorkerHistory {
    pub durations_ms: Vec<f64>,
    pub failed_requests: u64,
    pub tokens_processed: u64,
    /// Uptime the history covers.
    pub uptime_ms: u64,
    pub cached_blocks: Vec<BlockHash>,
}

struct RegistryInner {
    workers: BTreeMap<WorkerId, WorkerRecord>,
    assigner: LeastLoaded,
}

/// Registry of all workers in the pool.
pub struct WorkerRegistry {
    clock: Arc<dyn Clock>,
    duration_history: usize,
    inner: Mutex<RegistryInner>,
}

impl WorkerRegistry {
    /// Create a registry with workers `0..num_workers`, all idle.
    pub fn new(num_workers: u32, clock: Arc<dyn Clock>) -> Self {
        Self::with_options(num_workers, clock, 100, 42)
    }

    /// Create a registry with explicit history bound and assignment seed.
    pub fn with_options(
        num_workers: u32,
        clock: Arc<dyn Clock>,
        duration_history: usize,
        assignment_seed: u64,
    ) -> Self {
        let now = clock.now_ms();
        let workers = (0..num_workers)
            .map(|id| (id, WorkerRecord::new(id, now)))
            .collect();
        Self {
            clock,
            duration_history: duration_history.max(1),
            inner: Mutex::new(RegistryInner {
                workers,
                assigner: LeastLoaded::with_seed(assignment_seed),
            }),
        }
    }

    /// Add a worker to the pool. Returns false if the id is taken.
    pub fn register_worker(&self, worker_id: WorkerId) -> bool {
        let now = self.clock.now_ms();
        let mut inner = self.inner.lock();
        if inner.workers.contains_key(&worker_id) {
            return false;
        }
        inner
            .workers
            .insert(worker_id, WorkerRecord::new(worker_id, now));
        tracing::info!(worker_id, "registered worker");
        true
    }

    /// Remove a worker from the pool, returning its final record.
    pub fn deregister_worker(&self, worker_id: WorkerId) -> Option<WorkerRecord> {
        let removed = self.inner.lock().workers.remove(&worker_id);
        if removed.is_some() {
            tracing::info!(worker_id, "deregistered worker");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.inner.lock().workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Registered worker ids in ascending order.
    pub fn worker_ids(&self) -> Vec<WorkerId> {
        self.inner.lock().workers.keys().copied().collect()
    }

    /// Take a worker out of rotation. Its in-flight requests still complete.
    pub fn set_offline(&self, worker_id: WorkerId) -> bool {
        self.with_worker(worker_id, "set_offline", |w| {
            w.status = WorkerStatus::Offline;
        })
        .is_some()
    }

    /// Return an offline worker to rotation.
    pub fn set_online(&self, worker_id: WorkerId) -> bool {
        self.with_worker(worker_id, "set_online", |w| {
            if w.status == WorkerStatus::Offline {
                w.status = if w.active_requests > 0 {
                    WorkerStatus::Active
                } else {
                    WorkerStatus::Idle
                };
            }
        })
        .is_some()
    }

    /// Mark a request as started on `worker_id`.
    ///
    /// Returns false for unknown or offline workers.
    pub fn start_request(&self, worker_id: WorkerId) -> bool {
        let started = self.with_worker(worker_id, "start_request", |w| {
            if w.status == WorkerStatus::Offline {
                return false;
            }
            w.active_requests += 1;
            w.total_requests += 1;
            w.status = WorkerStatus::Active;
            true
        });
        match started {
            Some(true) => true,
            Some(false) => {
                tracing::warn!(worker_id, "refusing to start request on offline worker");
                false
            }
            None => false,
        }
    }

    /// Pick a worker by load alone and start the request on it.
    ///
    /// A random idle worker is preferred; when none is idle the worker with
    /// the fewest active requests is used. Returns `None` when no worker is
    /// available.
    pub fn assign_request(&self, request_id: &str) -> Option<WorkerId> {
        let now = self.clock.now_ms();
        let mut inner = self.inner.lock();
        let snapshots: Vec<WorkerSnapshot> =
            inner.workers.values().map(|w| w.snapshot(now)).collect();
        let worker_id = inner.assigner.pick(&snapshots)?;
        let worker = inner.workers.get_mut(&worker_id)?;
        worker.active_requests += 1;
        worker.total_requests += 1;
        worker.status = WorkerStatus::Active;
        tracing::debug!(request_id, worker_id, "assigned request");
        Some(worker_id)
    }

    /// Mark a request as finished on `worker_id`.
    ///
    /// Successful requests feed the duration history and busy time; failed
    /// ones only bump the failure counter. Unknown workers are a logged no-op.
    pub fn complete_request(&self, worker_id: WorkerId, duration_ms: f64, success: bool) -> bool {
        let limit = self.duration_history;
        self.with_worker(worker_id, "complete_request", |w| {
            release(w);
            if success {
                w.completed_requests += 1;
                let duration_ms = duration_ms.max(0.0);
                w.push_duration(duration_ms, limit);
                w.busy_time_ms += duration_ms;
            } else {
                w.failed_requests += 1;
            }
        })
        .is_some()
    }

    /// Completion path of routed requests: releases the slot, counts the
    /// tokens and records the blocks now cached on the worker. A duration,
    /// when known, is accounted like in [`WorkerRegistry::complete_request`].
    pub fn complete_routed_request(
        &self,
        worker_id: WorkerId,
        tokens_processed: u64,
        blocks: &[BlockHash],
        duration_ms: Option<f64>,
    ) -> bool {
        let limit = self.duration_history;
        self.with_worker(worker_id, "complete_request", |w| {
            release(w);
            w.completed_requests += 1;
            w.total_tokens_processed += tokens_processed;
            w.cached_blocks.extend(blocks.iter().copied());
            if let Some(duration_ms) = duration_ms {
                let duration_ms = duration_ms.max(0.0);
                w.push_duration(duration_ms, limit);
                w.busy_time_ms += duration_ms;
            }
        })
        .is_some()
    }

    /// Fold synthetic past activity into a worker record.
    pub fn import_history(&self, worker_id: WorkerId, history: &WorkerHistory) -> bool {
        let limit = self.duration_history;
        self.with_worker(worker_id, "import_history", |w| {
            for &d in &history.durations_ms {
                w.push_duration(d.max(0.0), limit);
                w.busy_time_ms += d.max(0.0);
            }
            let completed = history.durations_ms.len() as u64;
            w.completed_requests += completed;
            w.failed_requests += history.failed_requests;
            w.total_requests += completed + history.failed_requests;
            w.total_tokens_processed += history.tokens_processed;
            w.uptime_credit_ms += history.uptime_ms;
            w.cached_blocks.extend(history.cached_blocks.iter().copied());
        })
        .is_some()
    }

    /// Read-only views handed to routing policies, sorted by id.
    pub fn snapshots(&self) -> Vec<WorkerSnapshot> {
        let now = self.clock.now_ms();
        let inner = self.inner.lock();
        inner.workers.values().map(|w| w.snapshot(now)).collect()
    }

    /// Statistics for one worker.
    pub fn worker_stats(&self, worker_id: WorkerId) -> Option<WorkerStats> {
        let now = self.clock.now_ms();
        let inner = self.inner.lock();
        inner.workers.get(&worker_id).map(|w| w.stats(now))
    }

    /// Per-worker statistics plus pool-wide status counts.
    pub fn get_worker_stats(&self) -> WorkerPoolStats {
        let now = self.clock.now_ms();
        let inner = self.inner.lock();
        let workers: Vec<WorkerStats> = inner.workers.values().map(|w| w.stats(now)).collect();

        let count = |status: WorkerStatus| workers.iter().filter(|w| w.status == status).count();
        let avg_utilization = if workers.is_empty() {
            0.0
        } else {
            workers.iter().map(|w| w.utilization).sum::<f64>() / workers.len() as f64
        };

        WorkerPoolStats {
            total_workers: workers.len(),
            idle_workers: count(WorkerStatus::Idle),
            active_workers: count(WorkerStatus::Active),
            offline_workers: count(WorkerStatus::Offline),
            active_requests: workers.iter().map(|w| w.active_requests as u64).sum(),
            total_requests: workers.iter().map(|w| w.total_requests).sum(),
            avg_utilization,
            workers,
        }
    }

    /// Run `f` on a worker record, logging unknown ids.
    fn with_worker<T>(
        &self,
        worker_id: WorkerId,
        operation: &str,
        f: impl FnOnce(&mut WorkerRecord) -> T,
    ) -> Option<T> {
        let mut inner = self.inner.lock();
        match inner.workers.get_mut(&worker_id) {
            Some(worker) => Some(f(worker)),
            None => {
                tracing::warn!(worker_id, operation, "unknown worker, ignoring");
                None
            }
        }
    }
}

/// Give back one request slot; a drained active worker becomes idle.
fn release(worker: &mut WorkerRecord) {
    worker.active_requests = worker.active_requests.saturating_sub(1);
    if worker.active_requests == 0 && worker.status == WorkerStatus::Active {
        worker.status = WorkerStatus::Idle;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn registry(n: u32) -> (WorkerRegistry, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        (WorkerRegistry::new(n, clock.clone()), clock)
    }

    #[test]
    fn test_new_registry_all_idle() {
        let (reg, _) = registry(4);
        let stats = reg.get_worker_stats();
        assert_eq!(stats.total_workers, 4);
        assert_eq!(stats.idle_workers, 4);
        assert_eq!(stats.active_workers, 0);
        let ids: Vec<_> = stats.workers.iter().map(|w| w.worker_id).collect();
        assert_eq!(ids, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_state_machine() {
        let (reg, _) = registry(1);
        assert!(reg.start_request(0));
        assert_eq!(reg.worker_stats(0).unwrap().status, WorkerStatus::Active);
        assert!(reg.start_request(0));
        assert_eq!(reg.worker_stats(0).unwrap().active_requests, 2);

        reg.complete_request(0, 10.0, true);
        assert_eq!(reg.worker_stats(0).unwrap().status, WorkerStatus::Active);
        reg.complete_request(0, 10.0, true);
        let w = reg.worker_stats(0).unwrap();
        assert_eq!(w.status, WorkerStatus::Idle);
        assert_eq!(w.active_requests, 0);
        assert_eq!(w.total_requests, 2);
        assert_eq!(w.completed_requests, 2);
    }

    #[test]
    fn test_active_requests_never_negative() {
        let (reg, _) = registry(1);
        reg.complete_request(0, 5.0, true);
        reg.complete_request(0, 5.0, false);
        let w = reg.worker_stats(0).unwrap();
        assert_eq!(w.active_requests, 0);
        assert_eq!(w.status, WorkerStatus::Idle);
    }

    #[test]
    fn test_failure_adds_no_busy_time() {
        let (reg, _) = registry(1);
        reg.start_request(0);
        reg.complete_request(0, 500.0, false);
        let w = reg.worker_stats(0).unwrap();
        assert_eq!(w.failed_requests, 1);
        assert_eq!(w.completed_requests, 0);
        assert_eq!(w.busy_time_ms, 0.0);
        assert_eq!(w.avg_request_duration_ms, 0.0);
    }

    #[test]
    fn test_unknown_worker_is_noop() {
        let (reg, _) = registry(2);
        assert!(!reg.complete_request(9, 10.0, true));
        assert!(!reg.start_request(9));
        assert_eq!(reg.get_worker_stats().total_requests, 0);
    }

    #[test]
    fn test_utilization_bounded() {
        let (reg, clock) = registry(1);
        assert_eq!(reg.worker_stats(0).unwrap().utilization, 0.0);

        clock.advance_to_ms(1000);
        reg.start_request(0);
        reg.complete_request(0, 250.0, true);
        let u = reg.worker_stats(0).unwrap().utilization;
        assert!((u - 0.25).abs() < 1e-9);

        reg.start_request(0);
        reg.complete_request(0, 5000.0, true);
        assert_eq!(reg.worker_stats(0).unwrap().utilization, 1.0);
    }

    #[test]
    fn test_duration_history_is_bounded() {
        let clock = Arc::new(ManualClock::new());
        let reg = WorkerRegistry::with_options(1, clock, 3, 42);
        for d in [100.0, 100.0, 100.0, 10.0, 10.0, 10.0] {
            reg.start_request(0);
            reg.complete_request(0, d, true);
        }
        let w = reg.worker_stats(0).unwrap();
        assert!((w.avg_request_duration_ms - 10.0).abs() < 1e-9);
        assert_eq!(w.busy_time_ms, 330.0);
    }

    #[test]
    fn test_assign_prefers_idle_then_least_loaded() {
        let (reg, _) = registry(3);
        let mut assigned = HashSet::new();
        for i in 0..3 {
            assigned.insert(reg.assign_request(&format!("req-{}", i)).unwrap());
        }
        // Every worker was idle in turn, so each got exactly one request.
        assert_eq!(assigned.len(), 3);

        reg.complete_request(1, 1.0, true);
        reg.start_request(0);
        reg.start_request(2);
        assert_eq!(reg.assign_request("req-next"), Some(1));
    }

    #[test]
    fn test_offline_workers_skipped() {
        let (reg, _) = registry(2);
        assert!(reg.set_offline(0));
        assert!(!reg.start_request(0));
        for _ in 0..4 {
            assert_eq!(reg.assign_request("r"), Some(1));
        }
        let stats = reg.get_worker_stats();
        assert_eq!(stats.offline_workers, 1);

        assert!(reg.set_online(0));
        assert_eq!(reg.worker_stats(0).unwrap().status, WorkerStatus::Idle);
    }

    #[test]
    fn test_offline_worker_drains_without_going_idle() {
        let (reg, _) = registry(1);
        reg.start_request(0);
        reg.set_offline(0);
        reg.complete_request(0, 10.0, true);
        let w = reg.worker_stats(0).unwrap();
        assert_eq!(w.active_requests, 0);
        assert_eq!(w.status, WorkerStatus::Offline);
    }

    #[test]
    fn test_routed_completion_records_blocks_and_tokens() {
        let (reg, _) = registry(1);
        reg.start_request(0);
        reg.complete_routed_request(0, 300, &[1, 2, 3], None);
        reg.start_request(0);
        reg.complete_routed_request(0, 100, &[1, 2, 4], Some(40.0));
        let w = reg.worker_stats(0).unwrap();
        assert_eq!(w.cached_blocks, 4);
        assert_eq!(w.total_tokens_processed, 400);
        assert_eq!(w.completed_requests, 2);
        assert_eq!(w.busy_time_ms, 40.0);
    }

    #[test]
    fn test_register_and_deregister() {
        let (reg, _) = registry(2);
        assert!(reg.register_worker(5));
        assert!(!reg.register_worker(5));
        assert_eq!(reg.worker_ids(), vec![0, 1, 5]);
        assert!(reg.deregister_worker(0).is_some());
        assert!(reg.deregister_worker(0).is_none());
        assert_eq!(reg.len(), 2);
    }

    #[test]
    fn test_import_history() {
        let (reg, _) = registry(1);
        reg.import_history(
            0,
            &WorkerHistory {
                durations_ms: vec![100.0, 300.0],
                failed_requests: 1,
                tokens_processed: 900,
                uptime_ms: 1000,
                cached_blocks: vec![11, 12],
            },
        );
        let w = reg.worker_stats(0).unwrap();
        assert_eq!(w.total_requests, 3);
        assert_eq!(w.avg_request_duration_ms, 200.0);
        assert!((w.utilization - 0.4).abs() < 1e-9);
        assert_eq!(w.cached_blocks, 2);
        assert_eq!(w.status, WorkerStatus::Idle);
    }
}
