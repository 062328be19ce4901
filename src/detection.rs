//! Flow consistency checking.
//!
//! The aggregator is the single consumer of every worker's observations. It
//! remembers which worker first saw each flow and flags any later packet of
//! that flow, or of its reverse direction, that shows up somewhere else.

use std::collections::{BTreeMap, HashMap, HashSet};

use crossbeam_channel::{select, Receiver};
use tracing::{info, warn};

use crate::models::{FiveTuple, LayerPath, Observation, WorkerId};
use crate::stats::{self, StatsSnapshot};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AggregatorConfig {
    /// Collection stops once more than this many distinct flows are known.
    pub max_flows: usize,
    /// Packets between periodic snapshots. Zero disables them.
    pub status_interval: u64,
    /// Keep a per-worker histogram of the layer paths of new flows.
    pub dump_layers: bool,
}

/// Where a single flow direction stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowState {
    Unseen,
    /// Seen by exactly one worker so far, never confirmed.
    Owned(WorkerId),
    /// Seen again, or its reverse seen, on the owning worker.
    Confirmed(WorkerId),
    /// Seen on a worker other than its owner. Never cleared.
    Failed,
}

/// What the caller should do after an observation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Continue,
    /// The status interval was hit; hand this to the reporter.
    Report(StatsSnapshot),
    /// The flow limit was exceeded; consume nothing more.
    Stop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    FlowLimit,
    WorkersFinished,
    Interrupted,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Counters {
    pub packets: u64,
    pub success: u64,
    pub failures: u64,
    pub reverse_success: u64,
    pub reverse_failures: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Forward,
    Reverse,
}

pub struct FlowAggregator {
    config: AggregatorConfig,
    owners: HashMap<FiveTuple, WorkerId>,
    success: HashSet<FiveTuple>,
    failed: HashSet<FiveTuple>,
    counters: Counters,
    worker_flows: BTreeMap<WorkerId, usize>,
    layer_paths: BTreeMap<WorkerId, BTreeMap<LayerPath, usize>>,
}

impl FlowAggregator {
    pub fn new(config: AggregatorConfig) -> Self {
        Self {
            config,
            owners: HashMap::new(),
            success: HashSet::new(),
            failed: HashSet::new(),
            counters: Counters::default(),
            worker_flows: BTreeMap::new(),
            layer_paths: BTreeMap::new(),
        }
    }

    /// Drain `observations` until the flow limit is exceeded, every worker
    /// has hung up, or `shutdown` fires. Periodic snapshots are logged as
    /// they come due.
    pub fn run(&mut self, observations: &Receiver<Observation>, shutdown: &Receiver<()>) -> StopReason {
        info!(
            max_flows = self.config.max_flows,
            "Collecting results until {} flows have been seen", self.config.max_flows
        );
        loop {
            select! {
                recv(observations) -> msg => match msg {
                    Ok(observation) => match self.observe(observation) {
                        Outcome::Continue => {}
                        Outcome::Report(snapshot) => stats::report_periodic(&snapshot),
                        Outcome::Stop => return StopReason::FlowLimit,
                    },
                    Err(_) => return StopReason::WorkersFinished,
                },
                recv(shutdown) -> _ => return StopReason::Interrupted,
            }
        }
    }

    /// Apply one observation: count it, check it against its owner, check its
    /// reverse direction against that direction's owner, then decide whether
    /// to stop or report.
    pub fn observe(&mut self, observation: Observation) -> Outcome {
        let Observation { worker, flow } = observation;
        self.counters.packets += 1;

        match self.owners.get(&flow).copied() {
            None => self.claim(worker, flow.clone()),
            Some(owner) => self.check(Direction::Forward, &flow, worker, owner),
        }

        let reverse = flow.reverse();
        if let Some(owner) = self.owners.get(&reverse).copied() {
            self.check(Direction::Reverse, &reverse, worker, owner);
        }

        if self.owners.len() > self.config.max_flows {
            return Outcome::Stop;
        }

        let interval = self.config.status_interval;
        if interval != 0 && self.counters.packets % interval == 0 {
            return Outcome::Report(self.snapshot());
        }
        Outcome::Continue
    }

    fn claim(&mut self, worker: WorkerId, flow: FiveTuple) {
        *self.worker_flows.entry(worker).or_insert(0) += 1;
        if self.config.dump_layers {
            if let Some(path) = &flow.layers {
                *self
                    .layer_paths
                    .entry(worker)
                    .or_default()
                    .entry(path.clone())
                    .or_insert(0) += 1;
            }
        }
        self.owners.insert(flow, worker);
    }

    fn check(&mut self, direction: Direction, flow: &FiveTuple, worker: WorkerId, owner: WorkerId) {
        if owner == worker {
            if !self.failed.contains(flow) {
                self.success.insert(flow.clone());
            }
            match direction {
                Direction::Forward => self.counters.success += 1,
                Direction::Reverse => self.counters.reverse_success += 1,
            }
            return;
        }

        self.success.remove(flow);
        self.failed.insert(flow.clone());
        match direction {
            Direction::Forward => {
                self.counters.failures += 1;
                warn!(
                    %flow,
                    worker,
                    expected = owner,
                    "FAIL: saw flow {} on worker {} expected {}", flow, worker, owner
                );
            }
            Direction::Reverse => {
                self.counters.reverse_failures += 1;
                warn!(
                    %flow,
                    worker,
                    expected = owner,
                    "FAIL: saw reverse flow of {} on worker {} expected {}", flow.reverse(), worker, owner
                );
            }
        }
    }

    pub fn state_of(&self, flow: &FiveTuple) -> FlowState {
        if self.failed.contains(flow) {
            return FlowState::Failed;
        }
        match self.owners.get(flow) {
            None => FlowState::Unseen,
            Some(&owner) if self.success.contains(flow) => FlowState::Confirmed(owner),
            Some(&owner) => FlowState::Owned(owner),
        }
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            packets: self.counters.packets,
            flows: self.owners.len(),
            success_flows: self.success.len(),
            failed_flows: self.failed.len(),
            pkt_success: self.counters.success,
            pkt_reverse_success: self.counters.reverse_success,
            pkt_failures: self.counters.failures,
            pkt_reverse_failures: self.counters.reverse_failures,
        }
    }

    pub fn counters(&self) -> &Counters {
        &self.counters
    }

    pub fn config(&self) -> &AggregatorConfig {
        &self.config
    }

    /// Distinct flows first seen by each worker.
    pub fn worker_flows(&self) -> &BTreeMap<WorkerId, usize> {
        &self.worker_flows
    }

    /// Distinct flows per layer path, per worker. Empty unless layer dumping
    /// is enabled.
    pub fn layer_paths(&self) -> &BTreeMap<WorkerId, BTreeMap<LayerPath, usize>> {
        &self.layer_paths
    }

    pub fn failed_flows(&self) -> impl Iterator<Item = &FiveTuple> {
        self.failed.iter()
    }
}
