//! # Flow Rate Calculation
//!
//! Hydro mode turns successive mass readings into a flow rate (mass per second) and
//! smooths it with a running average, since single-interval rates are dominated by the
//! balance's last-digit noise.
//!
//! For every reading after the first, three figures are produced:
//! - **instantaneous**: rate between this reading and the previous one
//! - **interval rate**: rate across the last `flow_interval` update intervals (fewer
//!   while the run is still young)
//! - **running average**: mean of the last `average_n` interval rates
//!
//! With `flow_interval = 1` the interval rate is the consecutive-reading rate.
//! Rates carry the balance's own unit per second; no conversion is done.

use crate::Reading;
use std::collections::VecDeque;
use std::num::NonZeroUsize;

/// Fixed-capacity ring of rate samples; pushing into a full window evicts the oldest.
///
/// # Example
/// ```
/// use balance_lib::flow::RateWindow;
/// use std::num::NonZeroUsize;
///
/// let mut window = RateWindow::new(NonZeroUsize::new(3).unwrap());
/// for rate in [1.0, 2.0, 3.0] {
///     window.push(rate);
/// }
/// assert_eq!(window.mean(), Some(2.0));
///
/// window.push(4.0);
/// assert_eq!(window.mean(), Some(3.0));
/// ```
#[derive(Clone, Debug)]
pub struct RateWindow {
    capacity: NonZeroUsize,
    samples: VecDeque<f64>,
}

impl RateWindow {
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            capacity,
            samples: VecDeque::with_capacity(capacity.get()),
        }
    }

    pub fn push(&mut self, rate: f64) {
        if self.samples.len() == self.capacity.get() {
            self.samples.pop_front();
        }
        self.samples.push_back(rate);
    }

    /// Arithmetic mean of the samples currently held; `None` when empty.
    pub fn mean(&self) -> Option<f64> {
        if self.samples.is_empty() {
            return None;
        }
        Some(self.samples.iter().sum::<f64>() / self.samples.len() as f64)
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity.get()
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }
}

/// Rates derived from one reading.
#[derive(Clone, Debug, PartialEq)]
pub struct FlowReport {
    pub reading: Reading,
    /// Rate since the previous reading
    pub instantaneous: f64,
    /// Rate across up to `flow_interval` update intervals
    pub interval_rate: f64,
    /// Mean of the interval rates in the averaging window
    pub running_average: f64,
}

/// Keeps the recent readings and rate window for one hydro run.
#[derive(Clone, Debug)]
pub struct FlowCalculator {
    history: VecDeque<Reading>,
    flow_interval: NonZeroUsize,
    window: RateWindow,
}

impl FlowCalculator {
    pub fn new(flow_interval: NonZeroUsize, average_n: NonZeroUsize) -> Self {
        Self {
            history: VecDeque::with_capacity(flow_interval.get() + 1),
            flow_interval,
            window: RateWindow::new(average_n),
        }
    }

    /// Feed the next reading. Returns `None` for the first reading of a run, and for
    /// readings that cannot yield a rate.
    pub fn push(&mut self, reading: Reading) -> Option<FlowReport> {
        if let Some(last) = self.history.back() {
            if reading.unit != last.unit {
                log::warn!(
                    "Balance unit changed from {:?} to {:?}; restarting flow calculation",
                    last.unit,
                    reading.unit
                );
                self.history.clear();
                self.window.clear();
            } else if reading.elapsed_secs <= last.elapsed_secs {
                log::warn!(
                    "Reading at {:.3} s does not follow previous at {:.3} s; skipped",
                    reading.elapsed_secs,
                    last.elapsed_secs
                );
                return None;
            }
        }

        self.history.push_back(reading);
        while self.history.len() > self.flow_interval.get() + 1 {
            self.history.pop_front();
        }

        let len = self.history.len();
        if len < 2 {
            return None;
        }

        let current = &self.history[len - 1];
        let instantaneous = rate(&self.history[len - 2], current);
        let interval_rate = rate(&self.history[0], current);
        self.window.push(interval_rate);

        Some(FlowReport {
            reading: current.clone(),
            instantaneous,
            interval_rate,
            running_average: self.window.mean()?,
        })
    }

    pub fn window(&self) -> &RateWindow {
        &self.window
    }
}

fn rate(from: &Reading, to: &Reading) -> f64 {
    (to.mass - from.mass) / (to.elapsed_secs - from.elapsed_secs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Unit;
    use chrono::Local;

    fn nz(n: usize) -> NonZeroUsize {
        NonZeroUsize::new(n).unwrap()
    }

    fn reading(elapsed_secs: f64, mass: f64) -> Reading {
        Reading::new(Local::now(), elapsed_secs, mass, Some(Unit::Gram))
    }

    /// Pushing into a full window drops the oldest rate.
    #[test]
    fn window_evicts_oldest_sample() {
        let mut window = RateWindow::new(nz(3));
        assert_eq!(window.mean(), None);

        for rate in [1.0, 2.0, 3.0] {
            window.push(rate);
        }
        assert_eq!(window.mean(), Some(2.0));

        window.push(4.0);
        assert_eq!(window.len(), 3);
        assert_eq!(window.mean(), Some(3.0));
    }

    /// Window length stays at capacity however many rates arrive.
    #[test]
    fn window_never_exceeds_capacity() {
        let mut window = RateWindow::new(nz(4));
        for i in 0..100 {
            window.push(i as f64);
            assert!(window.len() <= window.capacity());
        }
        assert_eq!(window.mean(), Some((96.0 + 97.0 + 98.0 + 99.0) / 4.0));
    }

    /// One reading is not enough for a rate.
    #[test]
    fn first_reading_yields_no_rate() {
        let mut calc = FlowCalculator::new(nz(1), nz(3));
        assert_eq!(calc.push(reading(0.0, 10.0)), None);
        assert!(calc.window().is_empty());
    }

    /// Running average covers the last `average_n` rates.
    #[test]
    fn consecutive_rates_are_averaged() {
        let mut calc = FlowCalculator::new(nz(1), nz(3));
        calc.push(reading(0.0, 0.0));

        // Rates 1, 2, 3, 4 g/s
        let masses = [1.0, 3.0, 6.0, 10.0];
        let averages = [1.0, 1.5, 2.0, 3.0];
        for (i, (mass, expected)) in masses.iter().zip(averages).enumerate() {
            let report = calc.push(reading((i + 1) as f64, *mass)).unwrap();
            assert_eq!(report.instantaneous, report.interval_rate);
            assert!((report.running_average - expected).abs() < 1e-12);
        }
        assert_eq!(calc.window().len(), 3);
    }

    /// Interval rate spans `flow_interval` readings once enough exist.
    #[test]
    fn interval_rate_spans_flow_interval() {
        let mut calc = FlowCalculator::new(nz(2), nz(4));
        calc.push(reading(0.0, 0.0));

        let report = calc.push(reading(5.0, 5.0)).unwrap();
        assert_eq!(report.interval_rate, 1.0);

        let report = calc.push(reading(10.0, 15.0)).unwrap();
        assert_eq!(report.instantaneous, 2.0);
        assert_eq!(report.interval_rate, 1.5);

        // Oldest reading (t = 0) has dropped out of the two-interval span
        let report = calc.push(reading(15.0, 20.0)).unwrap();
        assert_eq!(report.instantaneous, 1.0);
        assert_eq!(report.interval_rate, 1.5);
        assert_eq!(calc.window().len(), 3);
    }

    /// A reading with no elapsed time since the last one is ignored.
    #[test]
    fn non_advancing_reading_is_skipped() {
        let mut calc = FlowCalculator::new(nz(1), nz(2));
        calc.push(reading(1.0, 1.0));
        assert_eq!(calc.push(reading(1.0, 2.0)), None);

        let report = calc.push(reading(2.0, 3.0)).unwrap();
        assert_eq!(report.instantaneous, 2.0);
    }

    /// Rates are never computed across a change of unit.
    #[test]
    fn unit_change_restarts_calculation() {
        let mut calc = FlowCalculator::new(nz(1), nz(2));
        calc.push(reading(0.0, 1.0));
        calc.push(reading(1.0, 2.0));

        let in_mg = Reading::new(Local::now(), 2.0, 3000.0, Some(Unit::Milligram));
        assert_eq!(calc.push(in_mg), None);
        assert!(calc.window().is_empty());
    }
}
