//! Command-line arguments.
//!
//! Everything about a measurement lives in the config file; the command line only
//! picks the file and adjusts the run.

use log::LevelFilter;
use std::path::PathBuf;

pub const USAGE: &str = "\
usage: balance-logger [options]

options:
  --config <path>      configuration file (default: balance-config.toml)
  --label <text>       tag written on every log line, overrides output.label
  --log-level <level>  off, error, warn, info, debug or trace (default: RUST_LOG or info)
  --ticks <n>          stop after n polls
  --list-ports         list serial ports and exit
  --help               show this message";

#[derive(Debug, Default, PartialEq)]
pub struct Args {
    pub config: Option<PathBuf>,
    pub label: Option<String>,
    pub log_level: Option<LevelFilter>,
    pub ticks: Option<u64>,
    pub list_ports: bool,
    pub help: bool,
}

impl Args {
    /// Parse arguments, excluding the program name.
    pub fn parse(args: &[String]) -> Result<Self, String> {
        let mut parsed = Args::default();
        let mut iter = args.iter();

        while let Some(arg) = iter.next() {
            let arg = arg.as_str();
            let mut value = |name: &str| {
                iter.next()
                    .cloned()
                    .ok_or_else(|| format!("{} needs a value", name))
            };

            match arg {
                "--config" | "-c" => parsed.config = Some(PathBuf::from(value(arg)?)),
                "--label" => parsed.label = Some(value(arg)?),
                "--log-level" => parsed.log_level = Some(parse_log_level(&value(arg)?)?),
                "--ticks" => {
                    let text = value(arg)?;
                    let ticks = text
                        .parse::<u64>()
                        .map_err(|_| format!("--ticks expects a whole number, got {:?}", text))?;
                    parsed.ticks = Some(ticks);
                }
                "--list-ports" => parsed.list_ports = true,
                "--help" | "-h" => parsed.help = true,
                other => return Err(format!("unknown argument {:?}\n\n{}", other, USAGE)),
            }
        }

        Ok(parsed)
    }
}

pub fn parse_log_level(level: &str) -> Result<LevelFilter, String> {
    match level.to_uppercase().as_str() {
        "OFF" => Ok(LevelFilter::Off),
        "ERROR" => Ok(LevelFilter::Error),
        "WARN" => Ok(LevelFilter::Warn),
        "INFO" => Ok(LevelFilter::Info),
        "DEBUG" => Ok(LevelFilter::Debug),
        "TRACE" => Ok(LevelFilter::Trace),
        _ => Err(format!("unknown log level {:?}", level)),
    }
}
