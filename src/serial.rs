//! # Serial Connection to the Balance
//!
//! The poller talks to the balance through the [`FrameSource`] trait: send one command
//! line, read back one response line. Two implementations exist:
//!
//! - [`SerialBalance`]: a real serial port opened 8-N-1 with a read timeout
//! - [`SimulatedBalance`]: a stand-in that answers `SI` with a steadily increasing
//!   weight, for trying out the pipeline on a machine with no balance attached
//!
//! Timeouts surface as `io::ErrorKind::TimedOut`, which is what `serialport` returns
//! when a read exceeds the configured timeout.

use serialport::{ClearBuffer, DataBits, FlowControl, Parity, SerialPort, StopBits};
use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::time::Duration;

/// Lines longer than this without a terminator are handed over as-is so the parser
/// can reject them, rather than buffering noise forever.
const MAX_LINE_LEN: usize = 256;

/// Line-oriented command/response channel to a balance.
pub trait FrameSource {
    /// Send one command line; the terminator is added by the implementation.
    fn send_line(&mut self, line: &str) -> io::Result<()>;

    /// Block until one full line arrives or the read times out.
    fn read_line(&mut self) -> io::Result<String>;

    /// Drop anything received but not yet read. Called before each request so a
    /// late reply to an earlier request is not mistaken for the current one.
    fn discard_input(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Reassembles lines from the byte chunks a serial read returns.
///
/// A line split across several port reads is completed here within one
/// [`FrameSource::read_line`] call. Bytes still pending when the next request goes out
/// are stale and are cleared by [`FrameSource::discard_input`].
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, bytes: &[u8]) {
        self.pending.extend_from_slice(bytes);
    }

    /// Take the next complete line (terminator included), if one is buffered.
    pub fn next_line(&mut self) -> Option<String> {
        let end = match self.pending.iter().position(|&b| b == b'\n') {
            Some(pos) => pos + 1,
            None if self.pending.len() >= MAX_LINE_LEN => self.pending.len(),
            None => return None,
        };
        let line: Vec<u8> = self.pending.drain(..end).collect();
        Some(String::from_utf8_lossy(&line).into_owned())
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

/// A balance on a real serial port.
pub struct SerialBalance {
    port: Box<dyn SerialPort>,
    lines: LineBuffer,
}

impl SerialBalance {
    /// Open `port_name` at `baud`, 8 data bits, no parity, 1 stop bit, no flow control.
    pub fn open(port_name: &str, baud: u32, timeout: Duration) -> Result<Self, serialport::Error> {
        let port = serialport::new(port_name, baud)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(timeout)
            .open()?;

        log::info!("Opened {} at {} baud (8-N-1)", port_name, baud);
        Ok(Self {
            port,
            lines: LineBuffer::new(),
        })
    }
}

impl FrameSource for SerialBalance {
    fn send_line(&mut self, line: &str) -> io::Result<()> {
        self.port.write_all(line.as_bytes())?;
        self.port.write_all(b"\r\n")?;
        self.port.flush()?;
        log::trace!("Sent {:?}", line);
        Ok(())
    }

    fn read_line(&mut self) -> io::Result<String> {
        let mut chunk = [0u8; 64];
        loop {
            if let Some(line) = self.lines.next_line() {
                log::trace!("Received {:?}", line);
                return Ok(line);
            }

            match self.port.read(&mut chunk) {
                Ok(0) => {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "serial port closed",
                    ))
                }
                Ok(n) => self.lines.push(&chunk[..n]),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }

    fn discard_input(&mut self) -> io::Result<()> {
        if !self.lines.is_empty() {
            log::debug!("Discarding {} stale bytes", self.lines.len());
        }
        self.lines.clear();
        self.port.clear(ClearBuffer::Input).map_err(io::Error::from)
    }
}

/// Balance stand-in answering each `SI` with a weight one gram above the last.
#[derive(Debug)]
pub struct SimulatedBalance {
    grams: f64,
    step: f64,
    replies: VecDeque<String>,
}

impl SimulatedBalance {
    pub fn new() -> Self {
        Self::with_step(1.0)
    }

    pub fn with_step(step: f64) -> Self {
        Self {
            grams: 0.0,
            step,
            replies: VecDeque::new(),
        }
    }
}

impl Default for SimulatedBalance {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameSource for SimulatedBalance {
    fn send_line(&mut self, line: &str) -> io::Result<()> {
        match line {
            "SI" => {
                self.grams += self.step;
                self.replies
                    .push_back(format!("S S {:>12.4} g\r\n", self.grams));
            }
            // Unknown commands get the MT-SICS syntax error reply
            _ => self.replies.push_back("ES\r\n".to_string()),
        }
        Ok(())
    }

    fn read_line(&mut self) -> io::Result<String> {
        self.replies
            .pop_front()
            .ok_or_else(|| io::Error::new(io::ErrorKind::TimedOut, "no reply pending"))
    }

    fn discard_input(&mut self) -> io::Result<()> {
        self.replies.clear();
        Ok(())
    }
}
