//! Discrete-event cluster simulator.
//!
//! The simulator keeps a priority queue of [`SimEvent`]s sorted by virtual
//! time. Each iteration pops the next event, advances the [`ManualClock`]
//! shared by every component, and processes the event, possibly scheduling
//! new ones.
//!
//! A request's life:
//!
//! 1. **Arrival**: the router picks a worker, the lookup is recorded, the
//!    request is started on the worker and enters the queue tracker.
//! 2. **Dispatch**: once the worker has a free execution slot, the request
//!    leaves the queue. Prefill covers only the tokens the worker does not
//!    already hold; decode runs at a fixed per-request token rate.
//! 3. **Completion**: the router releases the worker and indexes the prompt
//!    under it, which is what lets later requests hit the cache.

use crate::clock::{Clock, ManualClock};
use crate::cluster::Cluster;
use crate::config::{KvRouteConfig, SimulationSection};
use crate::queue_tracker::WaitTimeStats;
use crate::report::{coefficient_of_variation, jains_fairness_index, SimulationReport};
use crate::router::RouterError;
use crate::seeding::BaselineSummary;
use crate::workload::{generate_workload, SimRequest};
use kvroute_algorithms::WorkerId;
use std::collections::{BTreeMap, BinaryHeap, HashMap, VecDeque};
use std::sync::Arc;

/// Events in the discrete-event simulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimEvent {
    /// Request `request` reaches the router.
    Arrival { request: usize },
    /// Request `request` finishes on `worker_id`.
    Complete {
        worker_id: WorkerId,
        request: usize,
        dispatched_ms: u64,
    },
}

/// A timestamped event for the priority queue.
#[derive(Debug, Clone)]
struct TimedEvent {
    time_ms: u64,
    sequence: u64,
    event: SimEvent,
}

impl PartialEq for TimedEvent {
    fn eq(&self, other: &Self) -> bool {
        self.time_ms == other.time_ms && self.sequence == other.sequence
    }
}

impl Eq for TimedEvent {}

impl PartialOrd for TimedEvent {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimedEvent {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // BinaryHeap is a max-heap; we want min-heap
        other
            .time_ms
            .cmp(&self.time_ms)
            .then(other.sequence.cmp(&self.sequence))
    }
}

/// A routed request waiting for an execution slot.
#[derive(Debug, Clone, Copy)]
struct Routed {
    request: usize,
    matched_tokens: usize,
}

#[derive(Debug, Default)]
struct WorkerLane {
    waiting: VecDeque<Routed>,
    running: u32,
    served: u64,
}

/// Drives a [`Cluster`] with a synthetic workload in virtual time.
pub struct ClusterSimulator {
    clock: Arc<ManualClock>,
    cluster: Cluster,
    config: SimulationSection,
    requests: Vec<SimRequest>,
    event_queue: BinaryHeap<TimedEvent>,
    sequence: u64,
    lanes: BTreeMap<WorkerId, WorkerLane>,
    ttft_ms: Vec<f64>,
    e2e_ms: Vec<f64>,
    completed: u64,
    rejected: u64,
    baseline: Option<BaselineSummary>,
    /// Total events processed.
    pub events_processed: u64,
}

impl ClusterSimulator {
    /// Build a cluster on a fresh virtual clock and generate its workload.
    ///
    /// Baseline seeding happens here only when `simulation.seed_baseline`
    /// is set.
    pub fn new(config: &KvRouteConfig) -> Result<Self, RouterError> {
        let clock = Arc::new(ManualClock::new());
        let cluster = Cluster::from_config(config, clock.clone())?;
        let baseline = config
            .simulation
            .seed_baseline
            .then(|| cluster.seed_baseline(config));

        Ok(Self {
            clock,
            cluster,
            config: config.simulation.clone(),
            requests: generate_workload(&config.simulation),
            event_queue: BinaryHeap::new(),
            sequence: 0,
            lanes: BTreeMap::new(),
            ttft_ms: Vec::new(),
            e2e_ms: Vec::new(),
            completed: 0,
            rejected: 0,
            baseline,
            events_processed: 0,
        })
    }

    /// Replace the generated workload.
    pub fn with_requests(mut self, mut requests: Vec<SimRequest>) -> Self {
        requests.sort_by_key(|r| r.arrival_time_ms);
        self.requests = requests;
        self
    }

    /// The simulated components, for inspection or manual intervention.
    pub fn cluster(&self) -> &Cluster {
        &self.cluster
    }

    pub fn requests(&self) -> &[SimRequest] {
        &self.requests
    }

    /// Schedule an event at a given time.
    pub fn schedule_event(&mut self, time_ms: u64, event: SimEvent) {
        self.event_queue.push(TimedEvent {
            time_ms,
            sequence: self.sequence,
            event,
        });
        self.sequence += 1;
    }

    /// Run until every request has completed or been rejected.
    pub fn run(mut self) -> SimulationReport {
        tracing::info!(
            name = %self.config.name,
            policy = %self.cluster.router.policy_name(),
            requests = self.requests.len(),
            "starting simulation"
        );
        for request in 0..self.requests.len() {
            let arrival = self.requests[request].arrival_time_ms;
            self.schedule_event(arrival, SimEvent::Arrival { request });
        }

        while let Some(timed_event) = self.event_queue.pop() {
            self.clock.advance_to_ms(timed_event.time_ms);
            self.process_event(timed_event.event);
            self.events_processed += 1;
        }

        let report = self.build_report();
        tracing::info!(
            completed = report.completed_requests,
            rejected = report.rejected_requests,
            hit_rate = report.cache.cache_hit_rate,
            "simulation finished"
        );
        report
    }

    fn process_event(&mut self, event: SimEvent) {
        match event {
            SimEvent::Arrival { request } => self.handle_arrival(request),
            SimEvent::Complete {
                worker_id,
                request,
                dispatched_ms,
            } => self.handle_complete(worker_id, request, dispatched_ms),
        }
    }

    fn handle_arrival(&mut self, request: usize) {
        let req = &self.requests[request];
        let decision = match self
            .cluster
            .router
            .route_request(&req.tokens, req.output_tokens)
        {
            Ok(decision) => decision,
            Err(e) => {
                tracing::warn!(request_id = req.id, error = %e, "request rejected");
                self.rejected += 1;
                return;
            }
        };

        if !self.cluster.router.start_request(decision.worker_id) {
            tracing::warn!(
                request_id = req.id,
                worker_id = decision.worker_id,
                "chosen worker could not start request"
            );
            self.rejected += 1;
            return;
        }
        self.cluster.metrics.record_cache_lookup(
            &req.model,
            req.tokens.len(),
            decision.matched_token_count,
        );
        let metadata = HashMap::from([
            ("prefix_id".to_string(), req.prefix_id.to_string()),
            ("worker_id".to_string(), decision.worker_id.to_string()),
        ]);
        self.cluster
            .queue
            .enqueue(&req.request_id(), &req.model, 0, metadata);

        self.lanes
            .entry(decision.worker_id)
            .or_default()
            .waiting
            .push_back(Routed {
                request,
                matched_tokens: decision.matched_token_count,
            });
        self.dispatch(decision.worker_id);
    }

    /// Start queued requests on `worker_id` while it has free slots.
    fn dispatch(&mut self, worker_id: WorkerId) {
        let now = self.clock.now_ms();
        let prefill_tps = self.config.prefill_tokens_per_sec;
        let decode_tps = self.config.decode_tokens_per_sec;
        let max_running = self.config.max_concurrent_per_worker;

        let mut started = Vec::new();
        {
            let lane = self.lanes.entry(worker_id).or_default();
            while lane.running < max_running {
                let Some(routed) = lane.waiting.pop_front() else {
                    break;
                };
                lane.running += 1;
                started.push(routed);
            }
        }

        for routed in started {
            let req = &self.requests[routed.request];
            let wait_ms = self.cluster.queue.dequeue(&req.request_id());

            let prompt = req.tokens.len();
            let uncached = prompt.saturating_sub(routed.matched_tokens);
            let cold_prefill_ms = prompt as f64 / prefill_tps * 1000.0;
            let prefill_ms = uncached as f64 / prefill_tps * 1000.0;
            let decode_ms = req.output_tokens as f64 / decode_tps * 1000.0;

            self.cluster.metrics.record_speedup(
                &req.model,
                wait_ms + cold_prefill_ms,
                wait_ms + prefill_ms,
                routed.matched_tokens as f64 / prompt.max(1) as f64,
            );
            self.ttft_ms.push(wait_ms + prefill_ms);

            let service_ms = ((prefill_ms + decode_ms).ceil() as u64).max(1);
            self.schedule_event(
                now + service_ms,
                SimEvent::Complete {
                    worker_id,
                    request: routed.request,
                    dispatched_ms: now,
                },
            );
        }
    }

    fn handle_complete(&mut self, worker_id: WorkerId, request: usize, dispatched_ms: u64) {
        let now = self.clock.now_ms();
        let req = &self.requests[request];
        self.cluster.router.complete_request_timed(
            worker_id,
            &req.tokens,
            req.output_tokens,
            now.saturating_sub(dispatched_ms) as f64,
        );
        self.e2e_ms
            .push(now.saturating_sub(req.arrival_time_ms) as f64);
        self.completed += 1;

        if let Some(lane) = self.lanes.get_mut(&worker_id) {
            lane.running = lane.running.saturating_sub(1);
            lane.served += 1;
        }
        self.dispatch(worker_id);
    }

    fn build_report(&self) -> SimulationReport {
        let first_arrival = self
            .requests
            .first()
            .map(|r| r.arrival_time_ms)
            .unwrap_or(0);
        let duration_ms = self.clock.now_ms().saturating_sub(first_arrival);
        let requests_per_sec = if duration_ms > 0 {
            self.completed as f64 / (duration_ms as f64 / 1000.0)
        } else {
            0.0
        };

        let served: Vec<u64> = self
            .cluster
            .registry
            .worker_ids()
            .iter()
            .map(|id| self.lanes.get(id).map_or(0, |lane| lane.served))
            .collect();

        SimulationReport {
            name: self.config.name.clone(),
            policy: self.cluster.router.policy_name(),
            num_workers: self.cluster.registry.len(),
            total_requests: self.requests.len() as u64,
            completed_requests: self.completed,
            rejected_requests: self.rejected,
            duration_ms,
            requests_per_sec,
            ttft: WaitTimeStats::from_values(&self.ttft_ms),
            end_to_end_latency: WaitTimeStats::from_values(&self.e2e_ms),
            load_cv: coefficient_of_variation(&served),
            jains_fairness_index: jains_fairness_index(&served),
            baseline: self.baseline.clone(),
            router: self.cluster.router.get_stats(),
            cache: self.cluster.metrics.get_stats(),
            queue: self.cluster.queue.get_queue_stats(),
            workers: self.cluster.registry.get_worker_stats(),
        }
    }
}
