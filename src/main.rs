//! # Balance Logger Application Entry Point
//!
//! This binary wires the library together: it reads the configuration, sets up logging,
//! opens the balance (a serial port, or the simulated balance for dry runs) and runs
//! the poll loop in the configured mode until the process is stopped or the balance
//! stops answering.

// Test modules
#[cfg(test)]
mod tests;

mod args;

use anyhow::{anyhow, Context};
use args::{Args, USAGE};
use balance_lib::config::Config;
use balance_lib::mode::{HydroMode, LogMode, Mode};
use balance_lib::output::{default_file_name, ReadingLog};
use balance_lib::poller::Poller;
use balance_lib::protocol::Model;
use balance_lib::serial::{FrameSource, SerialBalance, SimulatedBalance};
use chrono::Local;
use std::env;
use std::fs;
use std::path::Path;

/// Poll `source` according to `config`, appending results to `log_path`.
///
/// Returns the number of ticks performed when `max_ticks` ends the run.
fn run_session<S: FrameSource>(
    config: &Config,
    source: S,
    log_path: &Path,
    max_ticks: Option<u64>,
) -> anyhow::Result<u64> {
    let log = ReadingLog::append_to(log_path, config.output.format)
        .with_context(|| format!("open output log {}", log_path.display()))?;
    log::info!("Writing {:?} output to {}", config.output.format, log_path.display());

    let mut poller = Poller::new(source, config.poller_settings());
    poller.initialize().context("send balance setup commands")?;

    let label = config.output.label.clone();
    let ticks = match config.main.mode {
        Mode::Log => {
            log::info!(
                "Logging mass every {} s from {} balance",
                config.main.update_interval,
                config.main.model
            );
            poller.run(&mut LogMode::new(log, label), max_ticks)
        }
        Mode::Hydro => {
            let interval = config.main.update_interval;
            let flow_interval = config.flow_interval()?;
            let average_n = config.average_n()?;
            log::info!(
                "Update interval = {} s, flow interval = {} * {} = {} s, running average n = {} ({} s)",
                interval,
                flow_interval,
                interval,
                interval * flow_interval.get() as u64,
                average_n,
                interval * (flow_interval.get() * average_n.get()) as u64
            );
            poller.run(&mut HydroMode::new(log, label, flow_interval, average_n), max_ticks)
        }
    }?;

    Ok(ticks)
}

fn list_ports() -> anyhow::Result<()> {
    let ports = serialport::available_ports().context("enumerate serial ports")?;
    if ports.is_empty() {
        println!("No serial ports found");
    }
    for port in ports {
        println!("{}", port.port_name);
    }
    Ok(())
}

/// Main application entry point.
fn main() -> anyhow::Result<()> {
    let raw_args: Vec<String> = env::args().skip(1).collect();
    let args = Args::parse(&raw_args).map_err(|e| anyhow!(e))?;

    // --log-level wins over RUST_LOG; info when neither is set
    let mut logger =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    if let Some(level) = args.log_level {
        logger.filter_level(level);
    }
    logger.format_timestamp_millis().init();

    if args.help {
        println!("{}", USAGE);
        return Ok(());
    }
    if args.list_ports {
        return list_ports();
    }

    let mut config = match &args.config {
        Some(path) => Config::load_from_path(path),
        None => Config::load(),
    }
    .context("load configuration")?;
    if let Some(label) = args.label {
        config.output.label = label;
    }

    fs::create_dir_all(&config.output.directory).with_context(|| {
        format!(
            "create output directory {}",
            config.output.directory.display()
        )
    })?;
    let log_path = config.output_path(&default_file_name(Local::now()));

    log::info!("Starting {} in {:?} mode", env!("CARGO_PKG_NAME"), config.main.mode);

    match config.main.model {
        Model::Simulated => {
            log::warn!("Using the simulated balance; readings are synthetic");
            run_session(&config, SimulatedBalance::new(), &log_path, args.ticks)?;
        }
        Model::Denver | Model::Mettler => {
            let balance =
                SerialBalance::open(&config.main.port, config.main.baud, config.read_timeout())
                    .with_context(|| {
                        format!(
                            "could not connect to serial port {} at {} baud",
                            config.main.port, config.main.baud
                        )
                    })?;
            run_session(&config, balance, &log_path, args.ticks)?;
        }
    }

    log::info!("Run finished; output in {}", log_path.display());
    Ok(())
}
