//! Error types for sessions, sweeps and saved settings

use std::io;

use bench_scpi::ParseError;
use serde::Serialize;
use thiserror::Error;

/// Errors raised by an [`InstrumentSession`](crate::InstrumentSession)
#[derive(Debug, Error)]
pub enum SessionError {
    /// The instrument could not be reached
    #[error("failed to connect to {address}: {source}")]
    Connection {
        address: String,
        #[source]
        source: io::Error,
    },

    /// The resource address could not be interpreted
    #[error("invalid resource address: {0}")]
    Address(#[from] ParseError),

    /// Command issued on a closed session
    #[error("session {0} is closed")]
    Closed(String),

    /// No reply arrived within the timeout
    #[error("{address}: no reply to {command} within {timeout_ms}ms")]
    Timeout {
        address: String,
        command: String,
        timeout_ms: u64,
    },

    /// A reply went missing and later replies can no longer be matched to
    /// their queries; call `resync` before querying again
    #[error("{0}: replies are out of step after a timed out query")]
    OutOfStep(String),

    /// Transport failure
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Reply arrived but could not be parsed
    #[error("invalid reply to {command}: {source}")]
    InvalidResponse {
        command: String,
        #[source]
        source: ParseError,
    },
}

impl SessionError {
    /// Returns true for timeouts
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// Non-zero entry read from an instrument's error queue after a write
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[error("{address}: {command} raised error {code} \"{message}\"")]
pub struct InstrumentError {
    /// Address of the session that reported the error
    pub address: String,
    /// Command whose error check reported it
    pub command: String,
    /// Device error code
    pub code: i32,
    /// Device error message
    pub message: String,
}

/// Errors that end a sweep or reject it before it starts
#[derive(Debug, Error)]
pub enum SweepError {
    /// Invalid plan or settings; raised before any instrument I/O
    #[error("invalid sweep configuration: {0}")]
    Configuration(String),

    /// Session level failure (timeout, transport, closed session)
    #[error(transparent)]
    Session(#[from] SessionError),

    /// Device error escalated after recurring within one step
    #[error("instrument error repeated within one step: {0}")]
    Instrument(#[from] InstrumentError),

    /// The analyzer never signalled sweep completion
    #[error("acquisition at {setpoint_mhz} MHz did not complete within {waited_ms}ms")]
    AcquisitionTimeout { setpoint_mhz: f64, waited_ms: u64 },
}

impl SweepError {
    /// Returns true for session and acquisition timeouts
    pub fn is_timeout(&self) -> bool {
        match self {
            Self::Session(e) => e.is_timeout(),
            Self::AcquisitionTimeout { .. } => true,
            _ => false,
        }
    }
}

/// Errors reading or writing a saved settings document
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("settings I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("malformed settings document: {0}")]
    Parse(#[from] serde_yaml::Error),

    /// Top level of the document was not a mapping
    #[error("settings document is not a key/value mapping")]
    NotAMapping,

    #[error("could not determine the configuration directory")]
    NoConfigDir,
}
