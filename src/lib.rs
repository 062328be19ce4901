//! Verifies that Linux PACKET_FANOUT hashing sends every packet of a flow,
//! in both directions, to the same capture socket.
//!
//! Capture workers ([`sniff`]) each join one fanout group and tag the
//! five-tuples they see ([`parser`]) with their worker id. A single
//! [`detection::FlowAggregator`] consumes those observations and records
//! which worker owns each flow, flagging any packet that lands elsewhere.

pub mod barrier;
pub mod cli;
pub mod detection;
pub mod error;
pub mod logger;
pub mod models;
pub mod parser;
pub mod sniff;
pub mod stats;

pub use cli::{CliError, Config};
pub use detection::{AggregatorConfig, FlowAggregator, FlowState, Outcome, StopReason};
pub use error::Error;
pub use models::{FiveTuple, LayerPath, Observation, Transport, WorkerId};
pub use sniff::{CaptureError, HashMode, PacketSource, PcapSource, WorkerOptions, WorkerPool};
pub use stats::StatsSnapshot;
