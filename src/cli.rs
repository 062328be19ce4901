//! Command-line configuration.
//!
//! Every option can also come from the environment (or a `.env` file loaded
//! before parsing).

use clap::{ArgAction, Parser};
use thiserror::Error;

use crate::detection::AggregatorConfig;
use crate::models::WorkerId;
use crate::sniff::{HashMode, WorkerOptions};

pub const DEFAULT_WORKERS: WorkerId = 8;
pub const DEFAULT_FANOUT_GROUP: u16 = 42;
pub const DEFAULT_MAX_FLOWS: usize = 100;
pub const DEFAULT_INTERFACE: &str = "eth0";
pub const DEFAULT_STATUS_INTERVAL: u64 = 500;
pub const DEFAULT_SKIP_INITIAL: usize = 100;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CliError {
    #[error("workers must be at least 1, got {0}")]
    InvalidWorkers(WorkerId),

    #[error("status-interval must be at least 1, got {0}")]
    InvalidStatusInterval(u64),

    #[error("interface must not be empty")]
    EmptyInterface,
}

/// Check that PACKET_FANOUT hashing keeps both directions of every flow on
/// one capture socket.
#[derive(Parser, Debug, Clone, PartialEq, Eq)]
#[command(name = "fanout-verify")]
#[command(version, about, long_about = None)]
pub struct Config {
    /// Number of capture workers sharing the fanout group.
    #[arg(short = 'w', long = "workers", env = "FANOUT_WORKERS", default_value_t = DEFAULT_WORKERS)]
    pub workers: WorkerId,

    /// Fanout group id. Every worker joins the same group.
    #[arg(short = 'g', long, env = "FANOUT_GROUP", default_value_t = DEFAULT_FANOUT_GROUP)]
    pub fanout_group: u16,

    /// Stop once more than this many distinct flows have been seen.
    #[arg(short = 'm', long, env = "FANOUT_MAX_FLOWS", default_value_t = DEFAULT_MAX_FLOWS)]
    pub max_flows: usize,

    /// Interface to capture on.
    #[arg(short = 'i', long, env = "FANOUT_INTERFACE", default_value = DEFAULT_INTERFACE)]
    pub interface: String,

    /// Packets between status updates.
    #[arg(long, env = "FANOUT_STATUS_INTERVAL", default_value_t = DEFAULT_STATUS_INTERVAL)]
    pub status_interval: u64,

    /// Decoded packets each worker drops before collecting, while the
    /// kernel's fanout table settles.
    #[arg(long, env = "FANOUT_SKIP_INITIAL", default_value_t = DEFAULT_SKIP_INITIAL)]
    pub skip_initial: usize,

    /// Kernel fanout hashing mode.
    #[arg(long, value_enum, env = "FANOUT_HASH_MODE", default_value_t = HashMode::HashDefrag)]
    pub hash_mode: HashMode,

    /// Key flows on their encapsulation layers as well as the five-tuple.
    #[arg(long)]
    pub include_network_layer: bool,

    /// Print a per-worker histogram of layer paths at exit. Implies
    /// --include-network-layer.
    #[arg(long)]
    pub dump_network_layer_information: bool,

    /// Increase log verbosity (-v debug, -vv trace).
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,
}

impl Config {
    pub fn validate(&self) -> Result<(), CliError> {
        if self.workers == 0 {
            return Err(CliError::InvalidWorkers(self.workers));
        }
        if self.status_interval == 0 {
            return Err(CliError::InvalidStatusInterval(self.status_interval));
        }
        if self.interface.trim().is_empty() {
            return Err(CliError::EmptyInterface);
        }
        Ok(())
    }

    pub fn include_layers(&self) -> bool {
        self.include_network_layer || self.dump_network_layer_information
    }

    pub fn aggregator_config(&self) -> AggregatorConfig {
        AggregatorConfig {
            max_flows: self.max_flows,
            status_interval: self.status_interval,
            dump_layers: self.dump_network_layer_information,
        }
    }

    pub fn worker_options(&self) -> WorkerOptions {
        WorkerOptions {
            skip_initial: self.skip_initial,
            include_layers: self.include_layers(),
        }
    }
}
