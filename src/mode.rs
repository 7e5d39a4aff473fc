//! # Operating Modes
//!
//! What happens to a reading once the poller has one:
//! - [`LogMode`]: write it straight to the output log
//! - [`HydroMode`]: run it through a [`FlowCalculator`] and log the flow report

use crate::flow::FlowCalculator;
use crate::output::{OutputError, ReadingLog};
use crate::Reading;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::num::NonZeroUsize;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Log,
    Hydro,
}

/// Consumer of the readings produced by the poll loop.
pub trait ReadingSink {
    fn record(&mut self, reading: Reading) -> Result<(), OutputError>;
}

/// Raw mass logging: one output line per reading.
pub struct LogMode<W: Write> {
    log: ReadingLog<W>,
    label: String,
}

impl<W: Write> LogMode<W> {
    pub fn new(log: ReadingLog<W>, label: impl Into<String>) -> Self {
        Self {
            log,
            label: label.into(),
        }
    }

    pub fn log(&self) -> &ReadingLog<W> {
        &self.log
    }
}

impl<W: Write> ReadingSink for LogMode<W> {
    fn record(&mut self, reading: Reading) -> Result<(), OutputError> {
        self.log.write_reading(&self.label, &reading)
    }
}

/// Flow-rate mode for hydraulic conductance runs.
pub struct HydroMode<W: Write> {
    log: ReadingLog<W>,
    label: String,
    flow: FlowCalculator,
}

impl<W: Write> HydroMode<W> {
    pub fn new(
        log: ReadingLog<W>,
        label: impl Into<String>,
        flow_interval: NonZeroUsize,
        average_n: NonZeroUsize,
    ) -> Self {
        Self {
            log,
            label: label.into(),
            flow: FlowCalculator::new(flow_interval, average_n),
        }
    }

    pub fn log(&self) -> &ReadingLog<W> {
        &self.log
    }
}

impl<W: Write> ReadingSink for HydroMode<W> {
    fn record(&mut self, reading: Reading) -> Result<(), OutputError> {
        match self.flow.push(reading) {
            Some(report) => self.log.write_flow(&self.label, &report),
            None => {
                log::debug!("No flow rate yet; waiting for the next reading");
                Ok(())
            }
        }
    }
}
