//! Queueing latency tracking.
//!
//! Records enqueue/dequeue events for in-flight requests and derives depth
//! and wait-time statistics, globally and per model. Wait-time percentiles
//! use the nearest-rank rule over a bounded history.

use crate::clock::Clock;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;

/// A request waiting in the queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueEntry {
    pub request_id: String,
    pub enqueued_at_ms: u64,
    pub model: String,
    pub priority: i32,
    pub metadata: HashMap<String, String>,
}

/// One depth observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepthSample {
    pub time_ms: u64,
    pub depth: usize,
}

/// Wait-time distribution summary.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WaitTimeStats {
    pub samples: usize,
    pub avg_ms: f64,
    pub min_ms: f64,
    pub max_ms: f64,
    pub p50_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
}

impl WaitTimeStats {
    /// Summarize `values`; all zeros when empty.
    pub fn from_values(values: &[f64]) -> Self {
        if values.is_empty() {
            return Self::default();
        }
        let mut sorted = values.to_vec();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let n = sorted.len();
        Self {
            samples: n,
            avg_ms: sorted.iter().sum::<f64>() / n as f64,
            min_ms: sorted[0],
            max_ms: sorted[n - 1],
            p50_ms: nearest_rank(&sorted, 50.0),
            p95_ms: nearest_rank(&sorted, 95.0),
            p99_ms: nearest_rank(&sorted, 99.0),
        }
    }
}

/// Value at index `floor(n * pct / 100)` of a sorted slice, clamped to the
/// last element.
pub fn nearest_rank(sorted: &[f64], pct: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let idx = (sorted.len() as f64 * pct / 100.0).floor() as usize;
    sorted[idx.min(sorted.len() - 1)]
}

/// Counters kept per model.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelQueueStats {
    pub current_depth: usize,
    pub max_depth: usize,
    pub total_enqueued: u64,
    pub total_dequeued: u64,
    pub wait_times: WaitTimeStats,
}

/// Serializable queue statistics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueueStats {
    pub current_depth: usize,
    pub max_depth: usize,
    pub total_enqueued: u64,
    pub total_dequeued: u64,
    /// Age of the longest-waiting entry still queued.
    pub oldest_pending_ms: u64,
    pub wait_times: WaitTimeStats,
    pub per_model: BTreeMap<String, ModelQueueStats>,
    pub depth_history: Vec<DepthSample>,
}

#[derive(Debug, Default)]
struct ModelCounters {
    current_depth: usize,
    max_depth: usize,
    total_enqueued: u64,
    total_dequeued: u64,
    wait_times_ms: VecDeque<f64>,
}

#[derive(Debug, Default)]
struct QueueInner {
    entries: HashMap<String, QueueEntry>,
    max_depth: usize,
    total_enqueued: u64,
    total_dequeued: u64,
    wait_times_ms: VecDeque<f64>,
    depth_history: VecDeque<DepthSample>,
    per_model: HashMap<String, ModelCounters>,
}

fn push_bounded<T>(buf: &mut VecDeque<T>, value: T, limit: usize) {
    if buf.len() >= limit {
        buf.pop_front();
    }
    buf.push_back(value);
}

/// Tracker of queued requests and their wait times.
pub struct QueueTracker {
    clock: Arc<dyn Clock>,
    wait_history: usize,
    depth_history: usize,
    inner: Mutex<QueueInner>,
}

impl QueueTracker {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self::with_history(clock, 1000, 1000)
    }

    /// Create a tracker with explicit bounds on the wait-time and depth
    /// histories.
    pub fn with_history(clock: Arc<dyn Clock>, wait_history: usize, depth_history: usize) -> Self {
        Self {
            clock,
            wait_history: wait_history.max(1),
            depth_history: depth_history.max(1),
            inner: Mutex::new(QueueInner::default()),
        }
    }

    /// Add a request to the queue and return its enqueue time.
    ///
    /// Enqueueing an id that is already queued replaces the entry; depth is
    /// unchanged.
    pub fn enqueue(
        &self,
        request_id: &str,
        model: &str,
        priority: i32,
        metadata: HashMap<String, String>,
    ) -> u64 {
        let now = self.clock.now_ms();
        let mut inner = self.inner.lock();
        let entry = QueueEntry {
            request_id: request_id.to_string(),
            enqueued_at_ms: now,
            model: model.to_string(),
            priority,
            metadata,
        };

        if let Some(previous) = inner.entries.insert(request_id.to_string(), entry) {
            tracing::warn!(request_id, "request enqueued twice, replacing entry");
            // The old entry's model loses its slot; the new one gains it.
            if let Some(counters) = inner.per_model.get_mut(&previous.model) {
                counters.current_depth = counters.current_depth.saturating_sub(1);
            }
        }
        inner.total_enqueued += 1;

        let counters = inner.per_model.entry(model.to_string()).or_default();
        counters.total_enqueued += 1;
        counters.current_depth += 1;
        counters.max_depth = counters.max_depth.max(counters.current_depth);

        let depth = inner.entries.len();
        inner.max_depth = inner.max_depth.max(depth);
        let limit = self.depth_history;
        push_bounded(
            &mut inner.depth_history,
            DepthSample { time_ms: now, depth },
            limit,
        );
        now
    }

    /// Remove a request from the queue and return how long it waited.
    ///
    /// Unknown ids (never enqueued, or already dequeued) return 0.0 and leave
    /// all counters untouched.
    pub fn dequeue(&self, request_id: &str) -> f64 {
        let now = self.clock.now_ms();
        let mut inner = self.inner.lock();
        let Some(entry) = inner.entries.remove(request_id) else {
            tracing::debug!(request_id, "dequeue of unknown request");
            return 0.0;
        };

        let wait_ms = now.saturating_sub(entry.enqueued_at_ms) as f64;
        inner.total_dequeued += 1;
        let wait_limit = self.wait_history;
        push_bounded(&mut inner.wait_times_ms, wait_ms, wait_limit);

        if let Some(counters) = inner.per_model.get_mut(&entry.model) {
            counters.total_dequeued += 1;
            counters.current_depth = counters.current_depth.saturating_sub(1);
            push_bounded(&mut counters.wait_times_ms, wait_ms, wait_limit);
        }

        let depth = inner.entries.len();
        let depth_limit = self.depth_history;
        push_bounded(
            &mut inner.depth_history,
            DepthSample { time_ms: now, depth },
            depth_limit,
        );
        wait_ms
    }

    /// Number of requests currently queued.
    pub fn current_depth(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// Queued entries, oldest first.
    pub fn pending(&self) -> Vec<QueueEntry> {
        let inner = self.inner.lock();
        let mut entries: Vec<QueueEntry> = inner.entries.values().cloned().collect();
        entries.sort_by(|a, b| {
            a.enqueued_at_ms
                .cmp(&b.enqueued_at_ms)
                .then_with(|| a.request_id.cmp(&b.request_id))
        });
        entries
    }

    /// Depth counters, wait-time distribution and per-model breakdown.
    pub fn get_queue_stats(&self) -> QueueStats {
        let now = self.clock.now_ms();
        let inner = self.inner.lock();
        let waits: Vec<f64> = inner.wait_times_ms.iter().copied().collect();
        let oldest_pending_ms = inner
            .entries
            .values()
            .map(|e| now.saturating_sub(e.enqueued_at_ms))
            .max()
            .unwrap_or(0);

        let per_model = inner
            .per_model
            .iter()
            .map(|(model, c)| {
                let waits: Vec<f64> = c.wait_times_ms.iter().copied().collect();
                (
                    model.clone(),
                    ModelQueueStats {
                        current_depth: c.current_depth,
                        max_depth: c.max_depth,
                        total_enqueued: c.total_enqueued,
                        total_dequeued: c.total_dequeued,
                        wait_times: WaitTimeStats::from_values(&waits),
                    },
                )
            })
            .collect();

        QueueStats {
            current_depth: inner.entries.len(),
            max_depth: inner.max_depth,
            total_enqueued: inner.total_enqueued,
            total_dequeued: inner.total_dequeued,
            oldest_pending_ms,
            wait_times: WaitTimeStats::from_values(&waits),
            per_model,
            depth_history: inner.depth_history.iter().copied().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn tracker() -> (QueueTracker, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        (QueueTracker::new(clock.clone()), clock)
    }

    #[test]
    fn test_depth_accounting() {
        let (q, _) = tracker();
        for i in 0..10 {
            q.enqueue(&format!("r{}", i), "m", 0, HashMap::new());
            assert_eq!(q.current_depth(), i + 1);
        }
        for i in 0..4 {
            q.dequeue(&format!("r{}", i));
        }
        let stats = q.get_queue_stats();
        assert_eq!(stats.current_depth, 6);
        assert_eq!(stats.max_depth, 10);
        assert_eq!(stats.total_enqueued, 10);
        assert_eq!(stats.total_dequeued, 4);
    }

    #[test]
    fn test_wait_time_from_clock() {
        let (q, clock) = tracker();
        clock.advance_to_ms(100);
        assert_eq!(q.enqueue("a", "m", 1, HashMap::new()), 100);
        clock.advance_to_ms(350);
        assert_eq!(q.dequeue("a"), 250.0);
    }

    #[test]
    fn test_unknown_and_duplicate_dequeue() {
        let (q, clock) = tracker();
        assert_eq!(q.dequeue("ghost"), 0.0);
        q.enqueue("a", "m", 0, HashMap::new());
        clock.advance_to_ms(10);
        assert_eq!(q.dequeue("a"), 10.0);
        assert_eq!(q.dequeue("a"), 0.0);
        let stats = q.get_queue_stats();
        assert_eq!(stats.total_dequeued, 1);
        assert_eq!(stats.current_depth, 0);
        assert_eq!(stats.wait_times.samples, 1);
    }

    #[test]
    fn test_duplicate_enqueue_keeps_depth() {
        let (q, _) = tracker();
        q.enqueue("a", "m1", 0, HashMap::new());
        q.enqueue("a", "m2", 0, HashMap::new());
        let stats = q.get_queue_stats();
        assert_eq!(stats.current_depth, 1);
        assert_eq!(stats.per_model["m1"].current_depth, 0);
        assert_eq!(stats.per_model["m2"].current_depth, 1);
    }

    #[test]
    fn test_nearest_rank() {
        let sorted: Vec<f64> = (1..=10).map(|x| x as f64).collect();
        assert_eq!(nearest_rank(&sorted, 50.0), 6.0);
        assert_eq!(nearest_rank(&sorted, 95.0), 10.0);
        assert_eq!(nearest_rank(&sorted, 99.0), 10.0);
        assert_eq!(nearest_rank(&[7.0], 50.0), 7.0);
        assert_eq!(nearest_rank(&[], 50.0), 0.0);
    }

    #[test]
    fn test_percentile_ordering() {
        let values: Vec<f64> = (0..257).map(|x| ((x * 37) % 101) as f64).collect();
        let stats = WaitTimeStats::from_values(&values);
        assert!(stats.p99_ms >= stats.p95_ms);
        assert!(stats.p95_ms >= stats.p50_ms);
        assert!(stats.p50_ms >= 0.0);
        assert!(stats.max_ms >= stats.p99_ms);
    }

    #[test]
    fn test_wait_history_is_bounded() {
        let clock = Arc::new(ManualClock::new());
        let q = QueueTracker::with_history(clock.clone(), 3, 4);
        for i in 0..6u64 {
            let id = format!("r{}", i);
            q.enqueue(&id, "m", 0, HashMap::new());
            clock.advance_by_ms(i * 10);
            q.dequeue(&id);
        }
        let stats = q.get_queue_stats();
        assert_eq!(stats.wait_times.samples, 3);
        assert_eq!(stats.wait_times.min_ms, 30.0);
        assert_eq!(stats.depth_history.len(), 4);
    }

    #[test]
    fn test_per_model_breakdown() {
        let (q, clock) = tracker();
        q.enqueue("a", "llama", 0, HashMap::new());
        q.enqueue("b", "llama", 0, HashMap::new());
        q.enqueue("c", "mistral", 0, HashMap::new());
        clock.advance_to_ms(20);
        q.dequeue("a");

        let stats = q.get_queue_stats();
        let llama = &stats.per_model["llama"];
        assert_eq!(llama.total_enqueued, 2);
        assert_eq!(llama.total_dequeued, 1);
        assert_eq!(llama.current_depth, 1);
        assert_eq!(llama.max_depth, 2);
        assert_eq!(llama.wait_times.p50_ms, 20.0);
        assert_eq!(stats.per_model["mistral"].current_depth, 1);
        assert_eq!(stats.oldest_pending_ms, 20);
    }

    #[test]
    fn test_pending_sorted_by_enqueue_time() {
        let (q, clock) = tracker();
        let mut meta = HashMap::new();
        meta.insert("tenant".to_string(), "acme".to_string());
        q.enqueue("late", "m", 0, HashMap::new());
        clock.advance_to_ms(5);
        q.enqueue("later", "m", 2, meta);
        let pending = q.pending();
        assert_eq!(pending[0].request_id, "late");
        assert_eq!(pending[1].metadata["tenant"], "acme");
        assert_eq!(pending[1].priority, 2);
    }

    #[test]
    fn test_empty_stats_are_zero() {
        let (q, _) = tracker();
        let stats = q.get_queue_stats();
        assert_eq!(stats.current_depth, 0);
        assert_eq!(stats.wait_times, WaitTimeStats::default());
        assert!(stats.per_model.is_empty());
    }
}
