//! Reply parsing
//!
//! Instruments answer queries with plain ASCII: numbers in NR1/NR2/NR3
//! format (`16`, `-40.5`, `+1.000000E+08`), booleans as `0`/`1`, error
//! queue entries as `<code>,"<message>"` and identities as four comma
//! separated fields.

use std::fmt;

use crate::command::SWEEP_COMPLETE_MASK;
use crate::error::ParseError;

/// Parse a numeric reply, ignoring surrounding whitespace and a trailing unit
pub fn parse_number(text: &str) -> Result<f64, ParseError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(ParseError::Empty);
    }

    let numeric = strip_unit(trimmed);
    let value = numeric
        .parse::<f64>()
        .map_err(|_| ParseError::InvalidNumber(trimmed.to_string()))?;

    if value.is_nan() {
        return Err(ParseError::InvalidNumber(trimmed.to_string()));
    }
    Ok(value)
}

/// Split off a trailing alphabetic unit (`-10 dBm`, `100MHz`)
fn split_unit(text: &str) -> (&str, &str) {
    let bytes = text.as_bytes();
    let mut end = bytes.len();
    while end > 0 && bytes[end - 1].is_ascii_alphabetic() {
        end -= 1;
    }
    // A unit never directly follows a sign
    if end < bytes.len() && end > 0 && matches!(bytes[end - 1], b'+' | b'-') {
        return (text, "");
    }
    (text[..end].trim_end(), &text[end..])
}

fn strip_unit(text: &str) -> &str {
    split_unit(text).0
}

/// Parse a frequency argument into Hz (`100 MHz`, `2.4GHz`, `1.5e6`)
///
/// Bare numbers are taken as Hz, which is how instruments report frequencies.
pub fn parse_frequency_hz(text: &str) -> Result<f64, ParseError> {
    let trimmed = text.trim();
    let (number, unit) = split_unit(trimmed);
    let scale = match unit.to_ascii_uppercase().as_str() {
        "" | "HZ" => 1.0,
        "KHZ" => 1e3,
        "MHZ" => 1e6,
        "GHZ" => 1e9,
        _ => return Err(ParseError::InvalidNumber(trimmed.to_string())),
    };
    Ok(parse_number(number)? * scale)
}

/// Parse a boolean reply (`0`, `1`, `ON`, `OFF`)
pub fn parse_bool(text: &str) -> Result<bool, ParseError> {
    match text.trim().to_ascii_uppercase().as_str() {
        "1" | "ON" | "+1" => Ok(true),
        "0" | "OFF" | "+0" => Ok(false),
        other => Err(ParseError::InvalidBool(other.to_string())),
    }
}

/// One entry popped from the instrument error queue (`SYST:ERR?`)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorEntry {
    /// Error code, 0 when the queue is empty
    pub code: i32,
    /// Error message without quotes
    pub message: String,
}

impl ErrorEntry {
    /// Parse a `<code>,"<message>"` reply
    pub fn parse(text: &str) -> Result<Self, ParseError> {
        let trimmed = text.trim();
        let (code, message) = trimmed
            .split_once(',')
            .ok_or_else(|| ParseError::InvalidErrorEntry(trimmed.to_string()))?;

        let code = code
            .trim()
            .parse::<i32>()
            .map_err(|_| ParseError::InvalidErrorEntry(trimmed.to_string()))?;

        let message = message.trim().trim_matches('"').to_string();

        Ok(Self { code, message })
    }

    /// Returns true if the instrument reported an actual error
    pub fn is_error(&self) -> bool {
        self.code != 0
    }
}

impl fmt::Display for ErrorEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},\"{}\"", self.code, self.message)
    }
}

/// Parsed `*IDN?` reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub manufacturer: String,
    pub model: String,
    pub serial: String,
    pub firmware: String,
}

impl Identity {
    /// Parse `<manufacturer>,<model>,<serial>,<firmware>`
    pub fn parse(text: &str) -> Result<Self, ParseError> {
        let trimmed = text.trim();
        let fields: Vec<&str> = trimmed.splitn(4, ',').map(str::trim).collect();
        if fields.len() != 4 || fields[0].is_empty() {
            return Err(ParseError::InvalidIdentity(trimmed.to_string()));
        }

        Ok(Self {
            manufacturer: fields[0].to_string(),
            model: fields[1].to_string(),
            serial: fields[2].to_string(),
            firmware: fields[3].to_string(),
        })
    }

    /// Manufacturer, model and serial number without the firmware revision
    pub fn summary(&self) -> String {
        format!("{}, {}, {}", self.manufacturer, self.model, self.serial)
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{},{},{},{}",
            self.manufacturer, self.model, self.serial, self.firmware
        )
    }
}

/// Value of the operation event register (`:STAT:OPER:EVEN?`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OperationStatus(pub u16);

impl OperationStatus {
    /// Parse the register value reply
    pub fn parse(text: &str) -> Result<Self, ParseError> {
        let value = parse_number(text)?;
        if !(0.0..=f64::from(u16::MAX)).contains(&value) || value.fract() != 0.0 {
            return Err(ParseError::InvalidNumber(text.trim().to_string()));
        }
        Ok(Self(value as u16))
    }

    /// Returns true if the sweep-complete bit is set
    pub fn sweep_complete(&self) -> bool {
        self.0 & SWEEP_COMPLETE_MASK != 0
    }
}
