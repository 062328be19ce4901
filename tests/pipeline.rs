//! Worker pool -> aggregator runs over in-memory frames.

use std::collections::VecDeque;

use crossbeam_channel::{bounded, never};
use etherparse::PacketBuilder;
use fanout_verify::sniff::Next;
use fanout_verify::{
    AggregatorConfig, CaptureError, FiveTuple, FlowAggregator, FlowState, LayerPath,
    PacketSource, StopReason, Transport, WorkerId, WorkerOptions, WorkerPool,
};

struct FrameSource {
    frames: VecDeque<Vec<u8>>,
    current: Vec<u8>,
}

impl FrameSource {
    fn new(frames: Vec<Vec<u8>>) -> Self {
        Self {
            frames: frames.into(),
            current: Vec::new(),
        }
    }
}

impl PacketSource for FrameSource {
    fn next_packet(&mut self) -> Result<Next<'_>, CaptureError> {
        match self.frames.pop_front() {
            Some(frame) => {
                self.current = frame;
                Ok(Next::Packet(&self.current))
            }
            None => Ok(Next::End),
        }
    }
}

fn tcp_frame(src: [u8; 4], sport: u16, dst: [u8; 4], dport: u16) -> Vec<u8> {
    let builder = PacketBuilder::ethernet2([2, 0, 0, 0, 0, 1], [2, 0, 0, 0, 0, 2])
        .ipv4(src, dst, 64)
        .tcp(sport, dport, 1, 1024);
    let payload = [0u8; 16];
    let mut frame = Vec::with_capacity(builder.size(payload.len()));
    builder.write(&mut frame, &payload).unwrap();
    frame
}

fn client(worker: WorkerId) -> [u8; 4] {
    [10, 0, 0, worker as u8]
}

const SERVER: [u8; 4] = [10, 0, 1, 1];

fn forward(worker: WorkerId) -> Vec<u8> {
    tcp_frame(client(worker), 40000 + worker, SERVER, 443)
}

fn reverse(worker: WorkerId) -> Vec<u8> {
    tcp_frame(SERVER, 443, client(worker), 40000 + worker)
}

fn flow_of(worker: WorkerId) -> FiveTuple {
    FiveTuple::new(
        Transport::Tcp,
        client(worker).into(),
        40000 + worker,
        SERVER.into(),
        443,
    )
}

fn run_pool<F>(workers: WorkerId, options: WorkerOptions, config: AggregatorConfig, frames: F) -> (FlowAggregator, StopReason)
where
    F: Fn(WorkerId) -> Vec<Vec<u8>> + Send + Sync + 'static,
{
    let (tx, rx) = bounded(usize::from(workers));
    let pool = WorkerPool::spawn(workers, options, tx, move |id| Ok(FrameSource::new(frames(id)))).unwrap();
    pool.wait_registered().unwrap();

    let mut aggregator = FlowAggregator::new(config);
    let reason = aggregator.run(&rx, &never());
    (aggregator, reason)
}

#[test]
fn test_consistent_fanout_has_no_failures() {
    let options = WorkerOptions {
        skip_initial: 1,
        include_layers: true,
    };
    let config = AggregatorConfig {
        max_flows: 1000,
        status_interval: 3,
        dump_layers: true,
    };

    let (aggregator, reason) = run_pool(4, options, config, |id| {
        vec![forward(id), forward(id), reverse(id), forward(id), reverse(id)]
    });

    assert_eq!(reason, StopReason::WorkersFinished);
    let snapshot = aggregator.snapshot();
    assert_eq!(snapshot.packets, 16);
    assert_eq!(snapshot.flows, 8);
    assert_eq!(snapshot.failed_flows, 0);
    assert_eq!(snapshot.success_flows, 8);
    assert_eq!(snapshot.pkt_failures + snapshot.pkt_reverse_failures, 0);

    let path = LayerPath::from(vec!["Ethernet", "IPv4"]);
    for worker in 1..=4 {
        assert_eq!(aggregator.worker_flows().get(&worker), Some(&2));
        assert_eq!(aggregator.layer_paths()[&worker].get(&path), Some(&2));
        let flow = flow_of(worker).with_layers(path.clone());
        assert_eq!(aggregator.state_of(&flow), FlowState::Confirmed(worker));
    }
}

#[test]
fn test_split_flow_is_detected() {
    let options = WorkerOptions {
        skip_initial: 0,
        include_layers: false,
    };
    let config = AggregatorConfig {
        max_flows: 1000,
        status_interval: 500,
        dump_layers: false,
    };

    // Worker 1 sees only the client side, worker 2 only the server side
    let (aggregator, reason) = run_pool(2, options, config, |id| match id {
        1 => vec![forward(1); 3],
        _ => vec![reverse(1); 3],
    });

    assert_eq!(reason, StopReason::WorkersFinished);
    let snapshot = aggregator.snapshot();
    assert_eq!(snapshot.packets, 6);
    assert_eq!(snapshot.flows, 2);
    assert!(snapshot.failed_flows >= 1);
    assert!(snapshot.pkt_reverse_failures >= 1);
    assert_eq!(snapshot.pkt_failures, 0);

    let a = flow_of(1);
    let states = [aggregator.state_of(&a), aggregator.state_of(&a.reverse())];
    assert!(states.contains(&FlowState::Failed));
}

#[test]
fn test_flow_limit_ends_collection() {
    let options = WorkerOptions {
        skip_initial: 0,
        include_layers: false,
    };
    let config = AggregatorConfig {
        max_flows: 3,
        status_interval: 500,
        dump_layers: false,
    };

    let (aggregator, reason) = run_pool(1, options, config, |_| {
        (1..=20)
            .map(|port| tcp_frame([10, 0, 0, 1], port, SERVER, 80))
            .collect()
    });

    assert_eq!(reason, StopReason::FlowLimit);
    assert_eq!(aggregator.snapshot().packets, 4);
    assert_eq!(aggregator.snapshot().flows, 4);
}
