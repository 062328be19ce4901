//! Top-level error type and exit codes for the binary.

use thiserror::Error;

use crate::cli::CliError;
use crate::sniff::CaptureError;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid configuration: {0}")]
    Config(#[from] CliError),

    #[error(transparent)]
    Capture(#[from] CaptureError),

    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("failed to install Ctrl+C handler: {0}")]
    Signal(#[from] ctrlc::Error),
}

pub mod codes {
    pub const SUCCESS: u8 = 0;
    pub const INVALID_ARGS: u8 = 1;
    pub const CAPTURE_ERROR: u8 = 2;
    pub const RUNTIME_ERROR: u8 = 3;
}

pub fn exit_code(error: &Error) -> u8 {
    match error {
        Error::Config(_) => codes::INVALID_ARGS,
        Error::Capture(_) => codes::CAPTURE_ERROR,
        Error::Spawn(_) | Error::Signal(_) => codes::RUNTIME_ERROR,
    }
}
