//! Stats reporting. Formatting only; all numbers come from the aggregator.

use std::collections::BTreeMap;
use std::fmt;

use tracing::info;

use crate::detection::{FlowAggregator, StopReason};
use crate::models::{LayerPath, WorkerId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub packets: u64,
    pub flows: usize,
    pub success_flows: usize,
    pub failed_flows: usize,
    pub pkt_success: u64,
    pub pkt_reverse_success: u64,
    pub pkt_failures: u64,
    pub pkt_reverse_failures: u64,
}

impl fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "packets={} flows={} success_flows={} failed_flows={} pkt_success={} pkt_reverse_success={} pkt_failures={} pkt_reverse_failures={}",
            self.packets,
            self.flows,
            self.success_flows,
            self.failed_flows,
            self.pkt_success,
            self.pkt_reverse_success,
            self.pkt_failures,
            self.pkt_reverse_failures
        )
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::FlowLimit => f.write_str("flow limit reached"),
            StopReason::WorkersFinished => f.write_str("all workers finished"),
            StopReason::Interrupted => f.write_str("interrupted"),
        }
    }
}

pub fn report_periodic(snapshot: &StatsSnapshot) {
    info!("Stats: {}", snapshot);
}

/// Final stats, the per-worker flow distribution and, when layer dumping is
/// on, the per-worker layer path histogram.
pub fn report_final(aggregator: &FlowAggregator, workers: WorkerId, reason: StopReason) {
    info!(%reason, "Final Stats: {}", aggregator.snapshot());

    info!("Worker flow count distribution:");
    for line in distribution_lines(workers, aggregator.worker_flows()) {
        info!("{}", line);
    }

    if aggregator.config().dump_layers {
        info!("Worker network layer distribution:");
        for line in layer_histogram_lines(workers, aggregator.layer_paths()) {
            info!("{}", line);
        }
    }
}

/// One line per worker, including workers that never claimed a flow.
pub fn distribution_lines(workers: WorkerId, worker_flows: &BTreeMap<WorkerId, usize>) -> Vec<String> {
    (1..=workers)
        .map(|worker| {
            let flows = worker_flows.get(&worker).copied().unwrap_or(0);
            format!(" - worker={} flows={}", worker, flows)
        })
        .collect()
}

pub fn layer_histogram_lines(
    workers: WorkerId,
    layer_paths: &BTreeMap<WorkerId, BTreeMap<LayerPath, usize>>,
) -> Vec<String> {
    let mut lines = Vec::new();
    for worker in 1..=workers {
        let Some(paths) = layer_paths.get(&worker) else {
            lines.push(format!(" - worker={} (no layer information)", worker));
            continue;
        };
        for (path, flows) in paths {
            lines.push(format!(" - worker={} layers={} flows={}", worker, path, flows));
        }
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_line() {
        let snapshot = StatsSnapshot {
            packets: 500,
            flows: 12,
            success_flows: 10,
            failed_flows: 2,
            pkt_success: 470,
            pkt_reverse_success: 15,
            pkt_failures: 3,
            pkt_reverse_failures: 1,
        };
        assert_eq!(
            snapshot.to_string(),
            "packets=500 flows=12 success_flows=10 failed_flows=2 pkt_success=470 pkt_reverse_success=15 pkt_failures=3 pkt_reverse_failures=1"
        );
    }

    #[test]
    fn test_distribution_fills_missing_workers() {
        let mut flows = BTreeMap::new();
        flows.insert(1, 4);
        flows.insert(3, 2);

        assert_eq!(
            distribution_lines(3, &flows),
            vec![
                " - worker=1 flows=4".to_string(),
                " - worker=2 flows=0".to_string(),
                " - worker=3 flows=2".to_string(),
            ]
        );
    }

    #[test]
    fn test_layer_histogram_lines() {
        let mut paths = BTreeMap::new();
        paths.insert(LayerPath::from(vec!["Ethernet", "IPv4"]), 3);
        paths.insert(LayerPath::from(vec!["Ethernet", "Dot1Q", "IPv4"]), 1);
        let mut per_worker = BTreeMap::new();
        per_worker.insert(2, paths);

        assert_eq!(
            layer_histogram_lines(2, &per_worker),
            vec![
                " - worker=1 (no layer information)".to_string(),
                " - worker=2 layers=Ethernet/Dot1Q/IPv4 flows=1".to_string(),
                " - worker=2 layers=Ethernet/IPv4 flows=3".to_string(),
            ]
        );
    }
}
