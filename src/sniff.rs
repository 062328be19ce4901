// src/sniff.rs
//! Capture workers: one libpcap handle per worker, all joined to the same
//! kernel fanout group, each feeding flow observations to the aggregator.

use std::io;
use std::sync::Arc;
use std::thread;

use clap::ValueEnum;
use crossbeam_channel::{bounded, Receiver, Sender};
use pcap::{Active, Capture};
use thiserror::Error;
use tracing::{debug, error, info, trace};

use crate::barrier::StartupBarrier;
use crate::models::{Observation, WorkerId};
use crate::parser;

const SNAPLEN: i32 = 65535;
const READ_TIMEOUT_MS: i32 = 100;

const PACKET_FANOUT_HASH: u32 = 0;
const PACKET_FANOUT_FLAG_DEFRAG: u32 = 0x8000;

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("failed to open capture on {interface}: {source}")]
    Open {
        interface: String,
        #[source]
        source: pcap::Error,
    },

    #[error("failed to join fanout group {group} on {interface}: {source}")]
    Fanout {
        interface: String,
        group: u16,
        #[source]
        source: io::Error,
    },

    #[error("capture read failed: {0}")]
    Read(#[from] pcap::Error),
}

/// How the kernel spreads packets across the sockets of a fanout group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum HashMode {
    /// Hash on the flow's header fields.
    Hash,
    /// Same hash, but IP fragments are reassembled first so every fragment
    /// lands on the socket its flow hashes to.
    HashDefrag,
}

impl HashMode {
    fn type_flags(self) -> u32 {
        match self {
            HashMode::Hash => PACKET_FANOUT_HASH,
            HashMode::HashDefrag => PACKET_FANOUT_HASH | PACKET_FANOUT_FLAG_DEFRAG,
        }
    }
}

/// PACKET_FANOUT argument: group id in the low 16 bits, type and flags in
/// the high 16 bits.
fn fanout_arg(group: u16, mode: HashMode) -> u32 {
    u32::from(group) | (mode.type_flags() << 16)
}

/// Result of one read from a packet source.
pub enum Next<'a> {
    Packet(&'a [u8]),
    /// Read timed out with nothing to deliver.
    Idle,
    End,
}

/// Where a worker's frames come from.
pub trait PacketSource {
    fn next_packet(&mut self) -> Result<Next<'_>, CaptureError>;
}

/// A libpcap handle whose socket has joined a fanout group.
pub struct PcapSource {
    cap: Capture<Active>,
}

impl PcapSource {
    pub fn open(interface: &str, group: u16, mode: HashMode) -> Result<Self, CaptureError> {
        let cap = create_capture(interface).map_err(|source| CaptureError::Open {
            interface: interface.to_string(),
            source,
        })?;

        join_fanout(&cap, group, mode).map_err(|source| CaptureError::Fanout {
            interface: interface.to_string(),
            group,
            source,
        })?;
        debug!(interface, group, ?mode, "capture handle joined fanout group");

        Ok(Self { cap })
    }
}

impl PacketSource for PcapSource {
    fn next_packet(&mut self) -> Result<Next<'_>, CaptureError> {
        match self.cap.next_packet() {
            Ok(packet) => Ok(Next::Packet(packet.data)),
            Err(pcap::Error::TimeoutExpired) => Ok(Next::Idle),
            Err(pcap::Error::NoMorePackets) => Ok(Next::End),
            Err(e) => Err(CaptureError::Read(e)),
        }
    }
}

fn create_capture(interface: &str) -> Result<Capture<Active>, pcap::Error> {
    Capture::from_device(interface)?
        .promisc(true)
        .snaplen(SNAPLEN)
        .timeout(READ_TIMEOUT_MS)
        .immediate_mode(true)
        .open()
}

#[cfg(target_os = "linux")]
fn join_fanout(cap: &Capture<Active>, group: u16, mode: HashMode) -> io::Result<()> {
    use std::os::unix::io::AsRawFd;

    let arg = fanout_arg(group, mode) as libc::c_int;
    // SAFETY: the fd belongs to a live capture handle and `arg` outlives the call.
    let rc = unsafe {
        libc::setsockopt(
            cap.as_raw_fd(),
            libc::SOL_PACKET,
            libc::PACKET_FANOUT,
            &arg as *const libc::c_int as *const libc::c_void,
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(not(target_os = "linux"))]
fn join_fanout(_cap: &Capture<Active>, _group: u16, _mode: HashMode) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "PACKET_FANOUT is only available on Linux",
    ))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerOptions {
    /// Decoded packets dropped before a worker starts emitting.
    pub skip_initial: usize,
    pub include_layers: bool,
}

struct WarmUp {
    remaining: usize,
}

impl WarmUp {
    fn new(skip: usize) -> Self {
        Self { remaining: skip }
    }

    /// Count one decoded packet; true once the warm-up is over.
    fn admit(&mut self) -> bool {
        if self.remaining == 0 {
            return true;
        }
        self.remaining -= 1;
        false
    }

    fn is_done(&self) -> bool {
        self.remaining == 0
    }
}

/// Read `source` until it ends or the aggregator hangs up, sending every
/// decodable packet past the warm-up as an observation tagged with `id`.
pub fn run_worker<S: PacketSource>(
    id: WorkerId,
    source: &mut S,
    options: &WorkerOptions,
    sender: &Sender<Observation>,
) -> Result<(), CaptureError> {
    let mut warm_up = WarmUp::new(options.skip_initial);
    if warm_up.is_done() {
        info!(worker = id, "Worker is collecting data");
    }

    loop {
        let flow = match source.next_packet()? {
            Next::Packet(data) => match parser::extract_five_tuple(data, options.include_layers) {
                Ok(flow) => flow,
                Err(e) => {
                    trace!(worker = id, reason = %e, "dropping packet");
                    continue;
                }
            },
            Next::Idle => continue,
            Next::End => {
                debug!(worker = id, "packet source exhausted");
                return Ok(());
            }
        };

        if !warm_up.admit() {
            if warm_up.is_done() {
                info!(
                    worker = id,
                    skipped = options.skip_initial,
                    "Worker has seen enough packets, collecting data"
                );
            }
            continue;
        }

        if sender.send(Observation::new(id, flow)).is_err() {
            debug!(worker = id, "aggregator hung up");
            return Ok(());
        }
    }
}

/// Worker threads plus the channel they report their registration on.
pub struct WorkerPool {
    registrations: Receiver<Result<WorkerId, CaptureError>>,
    workers: usize,
}

impl WorkerPool {
    /// Start `workers` threads numbered from 1. Each opens its own source
    /// with `open`, reports the outcome, waits on the startup barrier and
    /// then streams observations into `sender`.
    pub fn spawn<S, F>(
        workers: WorkerId,
        options: WorkerOptions,
        sender: Sender<Observation>,
        open: F,
    ) -> io::Result<Self>
    where
        S: PacketSource + 'static,
        F: Fn(WorkerId) -> Result<S, CaptureError> + Send + Sync + 'static,
    {
        let (reg_tx, reg_rx) = bounded(usize::from(workers));
        let barrier = StartupBarrier::new(usize::from(workers));
        let open = Arc::new(open);

        for id in 1..=workers {
            let open = open.clone();
            let barrier = barrier.clone();
            let reg_tx = reg_tx.clone();
            let sender = sender.clone();

            thread::Builder::new()
                .name(format!("worker-{id}"))
                .spawn(move || {
                    info!(worker = id, "Starting worker");
                    let mut source = match open(id) {
                        Ok(source) => source,
                        Err(e) => {
                            let _ = reg_tx.send(Err(e));
                            return;
                        }
                    };
                    let _ = reg_tx.send(Ok(id));
                    barrier.arrive(id);

                    if let Err(e) = run_worker(id, &mut source, &options, &sender) {
                        error!(worker = id, error = %e, "capture worker stopped");
                    }
                })?;
        }

        Ok(Self {
            registrations: reg_rx,
            workers: usize::from(workers),
        })
    }

    /// Block until every worker has opened its source and joined the
    /// fanout group. The first failure is returned as-is.
    pub fn wait_registered(&self) -> Result<(), CaptureError> {
        for _ in 0..self.workers {
            match self.registrations.recv() {
                Ok(Ok(id)) => debug!(worker = id, "worker registered"),
                Ok(Err(e)) => return Err(e),
                Err(_) => break,
            }
        }
        Ok(())
    }
}
