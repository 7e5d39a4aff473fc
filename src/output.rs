//! # Output Log
//!
//! Append-only record of a run. Each reading (log mode) or flow report (hydro mode)
//! becomes exactly one line, written and flushed before the next poll so an
//! interrupted run loses nothing already measured.
//!
//! Two line formats are available:
//! - **tsv**: tab-separated, 10 decimal places, easy to paste into a spreadsheet
//! - **json**: one JSON object per line
//!
//! Every line written is also echoed to the console at info level.

use crate::{flow::FlowReport, Reading};
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use thiserror::Error;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// Errors writing the output log.
#[derive(Error, Debug)]
pub enum OutputError {
    #[error("output log IO: {0}")]
    Io(#[from] io::Error),

    #[error("output log encoding: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Tsv,
    Json,
}

#[derive(Serialize)]
struct MassRecord<'a> {
    timestamp: DateTime<Local>,
    label: &'a str,
    elapsed_secs: f64,
    mass: f64,
    unit: &'a str,
}

#[derive(Serialize)]
struct FlowRecord<'a> {
    timestamp: DateTime<Local>,
    label: &'a str,
    elapsed_secs: f64,
    mass: f64,
    unit: &'a str,
    instantaneous: f64,
    interval_rate: f64,
    running_average: f64,
}

/// Default log file name for a run started at `started`, e.g. `20240616-141503-balance.log`.
pub fn default_file_name(started: DateTime<Local>) -> String {
    format!("{}-balance.log", started.format("%Y%m%d-%H%M%S"))
}

/// Line-per-record writer over any `Write`.
pub struct ReadingLog<W: Write> {
    writer: W,
    format: OutputFormat,
    lines_written: u64,
}

impl ReadingLog<File> {
    /// Open `path` for appending, creating it if needed.
    pub fn append_to<P: AsRef<Path>>(path: P, format: OutputFormat) -> Result<Self, OutputError> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self::new(file, format))
    }
}

impl<W: Write> ReadingLog<W> {
    pub fn new(writer: W, format: OutputFormat) -> Self {
        Self {
            writer,
            format,
            lines_written: 0,
        }
    }

    /// Log-mode line: timestamp, label, elapsed seconds, mass, unit.
    pub fn write_reading(&mut self, label: &str, reading: &Reading) -> Result<(), OutputError> {
        let line = match self.format {
            OutputFormat::Tsv => format!(
                "{}\t{}\t{:.10}\t{:.10}\t{}",
                reading.timestamp.format(TIMESTAMP_FORMAT),
                label,
                reading.elapsed_secs,
                reading.mass,
                reading.unit_symbol()
            ),
            OutputFormat::Json => serde_json::to_string(&MassRecord {
                timestamp: reading.timestamp,
                label,
                elapsed_secs: reading.elapsed_secs,
                mass: reading.mass,
                unit: reading.unit_symbol(),
            })?,
        };
        self.write_line(&line)
    }

    /// Hydro-mode line: timestamp, mass, instantaneous rate, interval rate, running average.
    pub fn write_flow(&mut self, label: &str, report: &FlowReport) -> Result<(), OutputError> {
        let reading = &report.reading;
        let line = match self.format {
            OutputFormat::Tsv => format!(
                "{}\t{:.10}\t{:.10}\t{:.10}\t{:.10}",
                reading.timestamp.format(TIMESTAMP_FORMAT),
                reading.mass,
                report.instantaneous,
                report.interval_rate,
                report.running_average
            ),
            OutputFormat::Json => serde_json::to_string(&FlowRecord {
                timestamp: reading.timestamp,
                label,
                elapsed_secs: reading.elapsed_secs,
                mass: reading.mass,
                unit: reading.unit_symbol(),
                instantaneous: report.instantaneous,
                interval_rate: report.interval_rate,
                running_average: report.running_average,
            })?,
        };
        self.write_line(&line)
    }

    fn write_line(&mut self, line: &str) -> Result<(), OutputError> {
        writeln!(self.writer, "{}", line)?;
        self.writer.flush()?;
        self.lines_written += 1;
        log::info!("{}", line);
        Ok(())
    }

    pub fn lines_written(&self) -> u64 {
        self.lines_written
    }

    pub fn get_ref(&self) -> &W {
        &self.writer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Unit;
    use chrono::TimeZone;
    use std::fs;
    use tempfile::tempdir;

    fn fixed_reading(mass: f64) -> Reading {
        let timestamp = Local.with_ymd_and_hms(2024, 6, 16, 14, 15, 3).unwrap();
        Reading::new(timestamp, 5.0, mass, Some(Unit::Gram))
    }

    /// Tab-separated layout: timestamp, label, elapsed, mass, unit.
    #[test]
    fn tsv_reading_line_layout() {
        let mut log = ReadingLog::new(Vec::new(), OutputFormat::Tsv);
        log.write_reading("stem-3", &fixed_reading(12.345)).unwrap();

        let text = String::from_utf8(log.get_ref().clone()).unwrap();
        assert_eq!(
            text,
            "2024-06-16 14:15:03.000\tstem-3\t5.0000000000\t12.3450000000\tg\n"
        );
        assert_eq!(log.lines_written(), 1);
    }

    /// Units the balance prints outside the common set are written as printed.
    #[test]
    fn unlisted_unit_is_written_verbatim() {
        let mut reading = fixed_reading(0.75);
        reading.unit = Some(Unit::Other("ozt".to_string()));

        let mut log = ReadingLog::new(Vec::new(), OutputFormat::Tsv);
        log.write_reading("", &reading).unwrap();

        let text = String::from_utf8(log.get_ref().clone()).unwrap();
        assert!(text.ends_with("\t0.7500000000\tozt\n"), "{text:?}");
    }

    /// JSON output is one object per line.
    #[test]
    fn json_flow_line_is_one_object() {
        let mut log = ReadingLog::new(Vec::new(), OutputFormat::Json);
        let report = FlowReport {
            reading: fixed_reading(2.0),
            instantaneous: 0.5,
            interval_rate: 0.25,
            running_average: 0.3,
        };
        log.write_flow("run", &report).unwrap();

        let text = String::from_utf8(log.get_ref().clone()).unwrap();
        assert_eq!(text.lines().count(), 1);
        let value: serde_json::Value = serde_json::from_str(text.trim_end()).unwrap();
        assert_eq!(value["mass"], 2.0);
        assert_eq!(value["unit"], "g");
        assert_eq!(value["running_average"], 0.3);
        assert_eq!(value["label"], "run");
    }

    /// Reopening a log appends instead of truncating.
    #[test]
    fn append_to_keeps_existing_lines() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("run.log");
        fs::write(&path, "earlier run\n").unwrap();

        let mut log = ReadingLog::append_to(&path, OutputFormat::Tsv).unwrap();
        log.write_reading("", &fixed_reading(1.0)).unwrap();
        log.write_reading("", &fixed_reading(2.0)).unwrap();

        let contents = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "earlier run");
        assert!(lines[1].ends_with("1.0000000000\tg"));
        assert!(lines[2].ends_with("2.0000000000\tg"));
    }

    /// Default log names sort by start time.
    #[test]
    fn default_file_name_uses_start_time() {
        let started = Local.with_ymd_and_hms(2024, 6, 16, 14, 15, 3).unwrap();
        assert_eq!(default_file_name(started), "20240616-141503-balance.log");
    }
}
