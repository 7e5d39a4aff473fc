//! # Balance Frame Parsing
//!
//! Each balance answers a print request with one short ASCII line (a *frame*). This
//! module turns that line into a number and knows which command to send to get one.
//!
//! ## Supported Formats
//!
//! ### Denver Instruments
//! ```text
//! 1 +   0.0000\r\n      ID/status field, sign, magnitude
//! +  12.345 g\r\n       sign, magnitude, unit
//! 09:10:37\r\n          time of day, printed by some firmware revisions
//! ```
//! The sign is always printed as its own character ahead of the magnitude. The unit
//! is whatever the balance display is set to; it cannot be selected over serial.
//!
//! ### Mettler Toledo (MT-SICS)
//! ```text
//! S S     12.3456 g     ID, status (S stable / D dynamic), signed value, unit
//! S I                   balance busy
//! S +  /  S -           overload / underload
//! ES / ET / EL          syntax, transmission and logical errors
//! ```
//!
//! Parsing never retries; a bad line is reported to the caller as a [`ParseError`].

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Reasons a frame could not be turned into a mass.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseError {
    /// Blank line (usually a stray line terminator)
    #[error("empty frame")]
    Empty,

    /// Line does not have the shape of the configured vendor format
    #[error("malformed frame: {0:?}")]
    Malformed(String),

    /// The payload where the mass should be is not a finite number
    #[error("invalid number: {0:?}")]
    InvalidNumber(String),

    /// Token in the unit position that cannot be a unit
    #[error("unknown unit: {0:?}")]
    UnknownUnit(String),

    /// Balance replied with a status instead of a weight
    #[error("balance reported: {0}")]
    BalanceStatus(String),
}

/// Balance vendor, selecting both the frame format and the request commands.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Model {
    #[serde(alias = "Denver")]
    Denver,
    #[serde(alias = "Mettler", alias = "Metler", alias = "metler")]
    Mettler,
    /// Synthetic balance for running without hardware; speaks the Mettler format
    #[serde(alias = "Simulated")]
    Simulated,
}

impl fmt::Display for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Model::Denver => "Denver",
            Model::Mettler => "Mettler",
            Model::Simulated => "Simulated",
        };
        f.write_str(name)
    }
}

/// Mass unit as printed by the balance.
///
/// The common units get their own variants; anything else the balance can be set to
/// display (troy ounces, pennyweights, grains, custom units) is kept verbatim in
/// [`Unit::Other`] so the reading is not lost.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum Unit {
    Milligram,
    Gram,
    Kilogram,
    Carat,
    Ounce,
    Pound,
    Other(String),
}

impl Unit {
    /// Interpret a unit token. Fails only for tokens that cannot be a unit at all,
    /// such as a stray number.
    pub fn from_token(token: &str) -> Result<Self, ParseError> {
        let unit = match token {
            "mg" => Unit::Milligram,
            "g" => Unit::Gram,
            "kg" => Unit::Kilogram,
            "ct" => Unit::Carat,
            "oz" => Unit::Ounce,
            "lb" => Unit::Pound,
            other if is_unit_token(other) => Unit::Other(other.to_string()),
            other => return Err(ParseError::UnknownUnit(other.to_string())),
        };
        Ok(unit)
    }

    pub fn symbol(&self) -> &str {
        match self {
            Unit::Milligram => "mg",
            Unit::Gram => "g",
            Unit::Kilogram => "kg",
            Unit::Carat => "ct",
            Unit::Ounce => "oz",
            Unit::Pound => "lb",
            Unit::Other(token) => token,
        }
    }
}

impl From<Unit> for String {
    fn from(unit: Unit) -> Self {
        unit.symbol().to_string()
    }
}

impl TryFrom<String> for Unit {
    type Error = ParseError;

    fn try_from(token: String) -> Result<Self, Self::Error> {
        Unit::from_token(&token)
    }
}

/// Letters first, then letters, digits, `%` or `/`.
fn is_unit_token(token: &str) -> bool {
    let mut chars = token.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '%')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '%' || c == '/')
}

/// A mass value decoded from one frame.
#[derive(Clone, Debug, PartialEq)]
pub struct Mass {
    pub value: f64,
    pub unit: Option<Unit>,
    /// False when the balance flagged the value as still settling
    pub stable: bool,
}

/// A successfully decoded line.
#[derive(Clone, Debug, PartialEq)]
pub enum Frame {
    Mass(Mass),
    /// Time-of-day line (Denver); carries no mass
    Clock(String),
}

impl Model {
    /// Decode one line received from the balance.
    ///
    /// Surrounding whitespace (including the `\r\n` terminator) is ignored.
    ///
    /// # Example
    /// ```
    /// use balance_lib::protocol::{Frame, Model};
    ///
    /// match Model::Denver.parse_frame("+  12.345 g\r\n").unwrap() {
    ///     Frame::Mass(mass) => assert_eq!(mass.value, 12.345),
    ///     Frame::Clock(_) => unreachable!(),
    /// }
    /// ```
    pub fn parse_frame(self, line: &str) -> Result<Frame, ParseError> {
        let text = line.trim();
        if text.is_empty() {
            return Err(ParseError::Empty);
        }

        match self {
            Model::Denver => parse_denver(text),
            Model::Mettler | Model::Simulated => parse_mettler(text),
        }
    }

    /// Command that makes the balance print the current weight once.
    pub fn request_command(self) -> &'static str {
        match self {
            // Denver prints whatever is on the display, in the display's unit
            Model::Denver => "DO PR",
            Model::Mettler | Model::Simulated => "SI",
        }
    }

    /// Commands sent once after the port is opened.
    pub fn init_commands(self) -> &'static [&'static str] {
        match self {
            // Echo would otherwise come back as an unparseable frame
            Model::Denver => &["SET SE OFF"],
            Model::Mettler | Model::Simulated => &[],
        }
    }
}

fn parse_denver(text: &str) -> Result<Frame, ParseError> {
    if is_clock(text) {
        return Ok(Frame::Clock(text.to_string()));
    }

    let sign_pos = text
        .find(['+', '-'])
        .ok_or_else(|| ParseError::Malformed(text.to_string()))?;
    let (prefix, rest) = text.split_at(sign_pos);

    // Anything ahead of the sign is the numeric ID/status field
    if !prefix.trim().chars().all(|c| c.is_ascii_digit()) {
        return Err(ParseError::Malformed(text.to_string()));
    }

    let negative = rest.starts_with('-');
    let mut tokens = rest[1..].split_whitespace();
    let magnitude = tokens
        .next()
        .ok_or_else(|| ParseError::Malformed(text.to_string()))?;
    let value = parse_decimal(magnitude, false)?;
    let unit = tokens.next().map(Unit::from_token).transpose()?;
    if tokens.next().is_some() {
        return Err(ParseError::Malformed(text.to_string()));
    }

    Ok(Frame::Mass(Mass {
        value: if negative { -value } else { value },
        unit,
        stable: true,
    }))
}

fn parse_mettler(text: &str) -> Result<Frame, ParseError> {
    let tokens: Vec<&str> = text.split_whitespace().collect();

    match tokens.as_slice() {
        ["ES"] => Err(ParseError::BalanceStatus("syntax error".to_string())),
        ["ET"] => Err(ParseError::BalanceStatus("transmission error".to_string())),
        ["EL"] => Err(ParseError::BalanceStatus("logical error".to_string())),
        ["S", "I"] => Err(ParseError::BalanceStatus("busy".to_string())),
        ["S", "+"] => Err(ParseError::BalanceStatus("overload".to_string())),
        ["S", "-"] => Err(ParseError::BalanceStatus("underload".to_string())),
        ["S", status @ ("S" | "D"), value, unit] => Ok(Frame::Mass(Mass {
            value: parse_decimal(value, true)?,
            unit: Some(Unit::from_token(unit)?),
            stable: *status == "S",
        })),
        _ => Err(ParseError::Malformed(text.to_string())),
    }
}

/// Parse a plain decimal number. Rejects `inf`, `NaN`, exponents and, unless
/// `allow_sign`, any leading sign.
fn parse_decimal(token: &str, allow_sign: bool) -> Result<f64, ParseError> {
    let digits = match token.strip_prefix('-') {
        Some(rest) if allow_sign => rest,
        _ => token,
    };

    let well_formed = !digits.is_empty()
        && digits.chars().any(|c| c.is_ascii_digit())
        && digits.chars().all(|c| c.is_ascii_digit() || c == '.')
        && digits.matches('.').count() <= 1;
    if !well_formed {
        return Err(ParseError::InvalidNumber(token.to_string()));
    }

    token
        .parse::<f64>()
        .map_err(|_| ParseError::InvalidNumber(token.to_string()))
}

fn is_clock(text: &str) -> bool {
    let bytes = text.as_bytes();
    bytes.len() == 8
        && bytes
            .iter()
            .enumerate()
            .all(|(i, b)| if i == 2 || i == 5 { *b == b':' } else { b.is_ascii_digit() })
}
