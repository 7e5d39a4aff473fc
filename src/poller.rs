//! # Fixed-Interval Poll Loop
//!
//! The poller owns the connection to the balance and asks it for a weight once per
//! update interval. Each tick:
//!
//! 1. Drop stale input, send the vendor print request
//! 2. Read one line (bounded by the serial read timeout)
//! 3. Parse it into a [`Reading`]
//!
//! ## Failure Policy
//!
//! A timeout or an unparseable frame costs one sample and nothing more: the failure is
//! logged and the loop carries on at the next deadline. Consecutive failures are
//! counted, and once `max_consecutive_failures` is reached the poller gives up with
//! [`PollError::Disconnected`] instead of retrying silently forever. A good reading
//! resets the count. Any other I/O error on the port is fatal straight away.
//!
//! ## Scheduling
//!
//! Deadlines are fixed multiples of the interval from the start of the run, so polling
//! does not drift by the time spent talking to the balance. If a tick overruns, the
//! missed deadlines are skipped rather than fired back-to-back.

use crate::mode::ReadingSink;
use crate::output::OutputError;
use crate::protocol::{Frame, Model, ParseError};
use crate::serial::FrameSource;
use crate::Reading;
use chrono::Local;
use std::io;
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PollError {
    /// No reply within the serial read timeout
    #[error("serial read timed out")]
    Timeout,

    /// Reply did not match the vendor frame format
    #[error("bad frame: {0}")]
    Parse(#[from] ParseError),

    /// Serial port failure other than a timeout
    #[error("serial IO: {0}")]
    Io(#[from] io::Error),

    /// Too many failed ticks in a row
    #[error("no reading from the balance in {failures} consecutive attempts")]
    Disconnected { failures: u32 },

    #[error(transparent)]
    Output(#[from] OutputError),
}

/// Smallest non-zero `max_consecutive_failures` accepted by the configuration.
pub const MIN_FAILURE_LIMIT: u32 = 2;

/// Everything the poller needs to know, fixed at construction.
#[derive(Clone, Debug)]
pub struct PollerSettings {
    pub model: Model,
    pub interval: Duration,
    /// Zero means retry indefinitely. Otherwise at least [`MIN_FAILURE_LIMIT`], so a
    /// single missed reply never ends the run.
    pub max_consecutive_failures: u32,
}

pub struct Poller<S: FrameSource> {
    source: S,
    settings: PollerSettings,
    started: Instant,
    consecutive_failures: u32,
}

impl<S: FrameSource> Poller<S> {
    pub fn new(source: S, settings: PollerSettings) -> Self {
        Self {
            source,
            settings,
            started: Instant::now(),
            consecutive_failures: 0,
        }
    }

    /// Send the model's one-off setup commands.
    pub fn initialize(&mut self) -> Result<(), PollError> {
        for command in self.settings.model.init_commands() {
            log::debug!("Sending setup command {:?}", command);
            self.source.send_line(command)?;
        }
        Ok(())
    }

    /// Poll the balance once.
    ///
    /// Returns `Ok(None)` when this tick produced no reading but the loop should go
    /// on; see the module docs for which failures are absorbed.
    pub fn tick(&mut self) -> Result<Option<Reading>, PollError> {
        match self.request_frame() {
            Ok(Frame::Mass(mass)) => {
                if self.consecutive_failures > 0 {
                    log::info!(
                        "Balance responding again after {} failed poll(s)",
                        self.consecutive_failures
                    );
                }
                self.consecutive_failures = 0;
                if !mass.stable {
                    log::debug!("Reading {} not yet stable", mass.value);
                }
                Ok(Some(Reading::new(
                    Local::now(),
                    self.started.elapsed().as_secs_f64(),
                    mass.value,
                    mass.unit,
                )))
            }
            Ok(Frame::Clock(time)) => {
                log::debug!("Balance clock line {}", time);
                Ok(None)
            }
            Err(err @ (PollError::Timeout | PollError::Parse(_))) => self.record_failure(err),
            Err(err) => Err(err),
        }
    }

    /// Poll on the fixed schedule, handing readings to `sink`.
    ///
    /// Runs until a fatal error, or for `max_ticks` ticks when given. Returns the
    /// number of ticks performed.
    pub fn run<K: ReadingSink>(
        &mut self,
        sink: &mut K,
        max_ticks: Option<u64>,
    ) -> Result<u64, PollError> {
        let mut deadline = Instant::now();
        let mut ticks = 0u64;

        loop {
            if let Some(reading) = self.tick()? {
                sink.record(reading)?;
            }
            ticks += 1;

            if max_ticks.is_some_and(|max| ticks >= max) {
                return Ok(ticks);
            }
            self.wait_for_next_deadline(&mut deadline);
        }
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    fn request_frame(&mut self) -> Result<Frame, PollError> {
        self.source.discard_input()?;
        self.source.send_line(self.settings.model.request_command())?;
        let line = self.source.read_line().map_err(|e| match e.kind() {
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => PollError::Timeout,
            _ => PollError::Io(e),
        })?;
        Ok(self.settings.model.parse_frame(&line)?)
    }

    fn record_failure(&mut self, err: PollError) -> Result<Option<Reading>, PollError> {
        self.consecutive_failures += 1;
        let limit = self.settings.max_consecutive_failures;

        if limit == 0 {
            log::warn!(
                "Poll failed: {} ({} in a row)",
                err,
                self.consecutive_failures
            );
            return Ok(None);
        }

        log::warn!(
            "Poll failed: {} ({}/{} before giving up)",
            err,
            self.consecutive_failures,
            limit
        );
        if self.consecutive_failures >= limit {
            log::error!("Balance not responding; check the serial cable and balance power");
            return Err(PollError::Disconnected {
                failures: self.consecutive_failures,
            });
        }
        Ok(None)
    }

    fn wait_for_next_deadline(&self, deadline: &mut Instant) {
        let interval = self.settings.interval;
        *deadline += interval;

        let now = Instant::now();
        if *deadline < now && !interval.is_zero() {
            let behind = now - *deadline;
            let missed = (behind.as_nanos() / interval.as_nanos()) as u32 + 1;
            log::debug!("Poll overran by {:?}; skipping {} tick(s)", behind, missed);
            *deadline += interval * missed;
        }

        if *deadline > now {
            thread::sleep(*deadline - now);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    /// Replays canned replies; `None` entries time out.
    struct ScriptedSource {
        replies: VecDeque<Option<&'static str>>,
        sent: Vec<String>,
    }

    impl ScriptedSource {
        fn new(replies: &[Option<&'static str>]) -> Self {
            Self {
                replies: replies.iter().copied().collect(),
                sent: Vec::new(),
            }
        }
    }

    impl FrameSource for ScriptedSource {
        fn send_line(&mut self, line: &str) -> io::Result<()> {
            self.sent.push(line.to_string());
            Ok(())
        }

        fn read_line(&mut self) -> io::Result<String> {
            match self.replies.pop_front().flatten() {
                Some(line) => Ok(line.to_string()),
                None => Err(io::Error::new(io::ErrorKind::TimedOut, "timed out")),
            }
        }
    }

    fn settings(model: Model, max_consecutive_failures: u32) -> PollerSettings {
        PollerSettings {
            model,
            interval: Duration::ZERO,
            max_consecutive_failures,
        }
    }

    /// A good reply becomes a reading after one print request.
    #[test]
    fn tick_parses_reply_into_reading() {
        let source = ScriptedSource::new(&[Some("S S     12.3456 g\r\n")]);
        let mut poller = Poller::new(source, settings(Model::Mettler, 3));

        let reading = poller.tick().unwrap().unwrap();
        assert_eq!(reading.mass, 12.3456);
        assert_eq!(poller.source.sent, vec!["SI"]);
    }

    /// A timeout costs one sample; the next tick polls normally.
    #[test]
    fn timeout_does_not_stop_polling() {
        let source = ScriptedSource::new(&[None, Some("+  12.345 g")]);
        let mut poller = Poller::new(source, settings(Model::Denver, 3));

        assert!(poller.tick().unwrap().is_none());
        assert_eq!(poller.consecutive_failures(), 1);

        let reading = poller.tick().unwrap().unwrap();
        assert_eq!(reading.mass, 12.345);
        assert_eq!(poller.consecutive_failures(), 0);
    }

    /// Unparseable and empty replies are dropped without ending the run.
    #[test]
    fn malformed_frame_is_discarded() {
        let source = ScriptedSource::new(&[Some("garbage"), Some(""), Some("1 +  2.0")]);
        let mut poller = Poller::new(source, settings(Model::Denver, 5));

        assert!(poller.tick().unwrap().is_none());
        assert!(poller.tick().unwrap().is_none());
        assert_eq!(poller.tick().unwrap().unwrap().mass, 2.0);
    }

    /// Clock lines produce no reading and no failure.
    #[test]
    fn clock_line_is_not_a_failure() {
        let source = ScriptedSource::new(&[Some("09:10:37")]);
        let mut poller = Poller::new(source, settings(Model::Denver, MIN_FAILURE_LIMIT));

        assert!(poller.tick().unwrap().is_none());
        assert_eq!(poller.consecutive_failures(), 0);
    }

    /// At the smallest allowed limit one timeout is survived; a second in a row is not.
    #[test]
    fn smallest_limit_tolerates_one_timeout() {
        let source = ScriptedSource::new(&[None, Some("S S 2.5 g"), None, None]);
        let mut poller = Poller::new(source, settings(Model::Mettler, MIN_FAILURE_LIMIT));

        assert!(poller.tick().unwrap().is_none());
        assert_eq!(poller.tick().unwrap().unwrap().mass, 2.5);
        assert_eq!(poller.consecutive_failures(), 0);

        assert!(poller.tick().unwrap().is_none());
        assert!(matches!(
            poller.tick(),
            Err(PollError::Disconnected { failures: 2 })
        ));
    }

    /// Reaching the failure limit ends the run as a disconnection.
    #[test]
    fn sustained_failures_are_fatal() {
        let source = ScriptedSource::new(&[None, Some("S I"), None]);
        let mut poller = Poller::new(source, settings(Model::Mettler, 3));

        assert!(poller.tick().unwrap().is_none());
        assert!(poller.tick().unwrap().is_none());
        assert!(matches!(
            poller.tick(),
            Err(PollError::Disconnected { failures: 3 })
        ));
    }

    /// With no limit the poller keeps retrying.
    #[test]
    fn zero_limit_retries_indefinitely() {
        let source = ScriptedSource::new(&[None; 50]);
        let mut poller = Poller::new(source, settings(Model::Mettler, 0));

        for _ in 0..50 {
            assert!(poller.tick().unwrap().is_none());
        }
        assert_eq!(poller.consecutive_failures(), 50);
    }

    /// Port errors other than a timeout stop polling at once.
    #[test]
    fn other_io_errors_are_fatal() {
        struct ClosedPort;
        impl FrameSource for ClosedPort {
            fn send_line(&mut self, _line: &str) -> io::Result<()> {
                Ok(())
            }
            fn read_line(&mut self) -> io::Result<String> {
                Err(io::Error::new(io::ErrorKind::UnexpectedEof, "closed"))
            }
        }

        let mut poller = Poller::new(ClosedPort, settings(Model::Mettler, 10));
        assert!(matches!(poller.tick(), Err(PollError::Io(_))));
    }

    /// Denver balances get echo turned off before polling.
    #[test]
    fn denver_setup_turns_echo_off() {
        let mut poller = Poller::new(ScriptedSource::new(&[]), settings(Model::Denver, MIN_FAILURE_LIMIT));
        poller.initialize().unwrap();
        assert_eq!(poller.source.sent, vec!["SET SE OFF"]);
    }

    /// Failed ticks still count toward `max_ticks` but reach no sink.
    #[test]
    fn run_stops_after_max_ticks() {
        struct Counter(Vec<f64>);
        impl ReadingSink for Counter {
            fn record(&mut self, reading: Reading) -> Result<(), OutputError> {
                self.0.push(reading.mass);
                Ok(())
            }
        }

        let source = ScriptedSource::new(&[Some("S S 1.0 g"), None, Some("S S 3.0 g")]);
        let mut poller = Poller::new(source, settings(Model::Mettler, 3));
        let mut sink = Counter(Vec::new());

        assert_eq!(poller.run(&mut sink, Some(3)).unwrap(), 3);
        assert_eq!(sink.0, vec![1.0, 3.0]);
    }
}
