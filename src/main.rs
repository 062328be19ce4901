use std::process::ExitCode;

use clap::Parser;
use crossbeam_channel::bounded;
use tracing::{error, info};

use fanout_verify::error::{codes, exit_code};
use fanout_verify::{logger, stats, Config, Error, FlowAggregator, PcapSource, WorkerPool};

fn main() -> ExitCode {
    dotenv::dotenv().ok();
    let config = Config::parse();
    logger::init(config.verbose);

    match run(&config) {
        Ok(()) => ExitCode::from(codes::SUCCESS),
        Err(e) => {
            error!("{}", e);
            ExitCode::from(exit_code(&e))
        }
    }
}

fn run(config: &Config) -> Result<(), Error> {
    config.validate()?;

    let (tx, rx) = bounded(usize::from(config.workers));
    let (shutdown_tx, shutdown_rx) = bounded(1);
    ctrlc::set_handler(move || {
        let _ = shutdown_tx.try_send(());
    })?;

    info!(
        interface = %config.interface,
        workers = config.workers,
        group = config.fanout_group,
        mode = ?config.hash_mode,
        "Starting capture workers"
    );
    let interface = config.interface.clone();
    let group = config.fanout_group;
    let mode = config.hash_mode;
    let pool = WorkerPool::spawn(config.workers, config.worker_options(), tx, move |_| {
        PcapSource::open(&interface, group, mode)
    })?;
    pool.wait_registered()?;

    // Workers are left running; process exit closes their capture handles.
    let mut aggregator = FlowAggregator::new(config.aggregator_config());
    let reason = aggregator.run(&rx, &shutdown_rx);
    stats::report_final(&aggregator, config.workers, reason);

    Ok(())
}
