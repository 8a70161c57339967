//! Error types for SCPI parsing

use thiserror::Error;

/// Errors that can occur while parsing protocol data
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// Reply or command line was empty
    #[error("empty line")]
    Empty,

    /// Line exceeded the codec's maximum length and was discarded
    #[error("line too long: {len} bytes (max {max})")]
    LineTooLong { len: usize, max: usize },

    /// Numeric reply could not be parsed
    #[error("invalid number: {0}")]
    InvalidNumber(String),

    /// Boolean reply could not be parsed
    #[error("invalid boolean: {0}")]
    InvalidBool(String),

    /// Unknown trace mode or detector mnemonic
    #[error("unknown mnemonic: {0}")]
    UnknownMnemonic(String),

    /// `SYST:ERR?` reply did not have the `<code>,"<message>"` shape
    #[error("invalid error queue entry: {0}")]
    InvalidErrorEntry(String),

    /// `*IDN?` reply did not have four comma separated fields
    #[error("invalid identity: {0}")]
    InvalidIdentity(String),

    /// Resource address could not be interpreted
    #[error("invalid resource address: {0}")]
    InvalidAddress(String),
}
