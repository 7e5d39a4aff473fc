//! # Balance Logger Core Library
//!
//! This library provides the data structures and processing pipeline for reading an
//! analytical balance over a serial line. It is used for hydraulic conductance
//! measurements, where the rate at which water accumulates on the balance pan is the
//! quantity of interest.
//!
//! ## Design Philosophy
//!
//! ### One Owner Per Resource
//! - **Explicit configuration**: [`config::Config`] is loaded once and handed to the
//!   components that need it; nothing reads process-wide settings
//! - **Exclusive serial access**: the [`poller::Poller`] owns its [`serial::FrameSource`]
//!   for the lifetime of the run
//! - **Owned history**: rate history lives inside a single [`flow::FlowCalculator`]
//!
//! ### Failure Tolerance
//! A balance that misses a print request or emits a garbled line must not stop a
//! multi-hour measurement. Timeouts and malformed frames are logged and the loop moves
//! on to the next tick. Only a sustained run of failures (a lost cable, a switched-off
//! balance) ends the run, and it does so loudly.
//!
//! ### Data Flow
//! 1. **Request**: the poller sends the vendor print command on a fixed schedule
//! 2. **Parse**: the returned line is decoded by [`protocol::Model::parse_frame`]
//! 3. **Record**: the resulting [`Reading`] goes to a [`mode::ReadingSink`]
//!    - *log mode*: appended to the output log as-is
//!    - *hydro mode*: turned into flow rates with a running average
//!
//! ## Core Types
//!
//! - [`Reading`]: a single mass measurement stamped with wall-clock and elapsed time

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use crate::protocol::Unit;

// Module declarations
pub mod config;
pub mod flow;
pub mod mode;
pub mod output;
pub mod poller;
pub mod protocol;
pub mod serial;

/// A single mass measurement taken by the balance.
///
/// Two clocks are recorded:
/// - `timestamp`: local wall-clock time, for the humans reading the log
/// - `elapsed_secs`: monotonic seconds since the poll loop started, used for all
///   rate arithmetic so that clock adjustments cannot produce bogus flows
///
/// `mass` is exactly the number the balance printed, sign applied, in `unit`.
///
/// # Example
/// ```
/// use balance_lib::{protocol::Unit, Reading};
///
/// let reading = Reading::new(chrono::Local::now(), 5.0, 12.345, Some(Unit::Gram));
/// assert_eq!(reading.mass, 12.345);
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    /// Local time at which the frame was parsed
    pub timestamp: DateTime<Local>,
    /// Seconds since the poll loop started
    pub elapsed_secs: f64,
    /// Mass as printed by the balance
    pub mass: f64,
    /// Unit token from the frame, if the balance sent one
    pub unit: Option<Unit>,
}

impl Reading {
    pub fn new(timestamp: DateTime<Local>, elapsed_secs: f64, mass: f64, unit: Option<Unit>) -> Self {
        Self {
            timestamp,
            elapsed_secs,
            mass,
            unit,
        }
    }

    /// Unit symbol for output, empty when the balance did not print one.
    pub fn unit_symbol(&self) -> &str {
        self.unit.as_ref().map(Unit::symbol).unwrap_or("")
    }
}
