//! SCPI Protocol Library
//!
//! This crate provides parsing and encoding for the SCPI (Standard Commands
//! for Programmable Instruments) subset used to drive bench RF equipment:
//!
//! - **Spectrum analyzers**: center/span/RBW, trace mode, detector, single
//!   sweeps, peak marker readout and reference level
//! - **Signal generators**: source frequency and power, RF output and
//!   modulation state
//! - **IEEE-488.2 common commands**: `*IDN?`, `*RST`, `*CLS`, `*OPC?` and
//!   the `SYST:ERR?` error queue
//!
//! # Architecture
//!
//! SCPI is line oriented ASCII. The crate is split into:
//! - A streaming line codec that handles partial data ([`LineCodec`])
//! - Normalized requests with their wire encoding ([`InstrumentRequest`])
//! - Header canonicalisation for the instrument side ([`ParsedCommand`])
//! - Reply parsers for numbers, booleans, error entries and identities
//! - VISA-style resource address parsing ([`ResourceAddress`])
//!
//! Nothing in here performs I/O.
//!
//! # Example
//!
//! ```rust
//! use bench_scpi::{
//!     ErrorEntry, InstrumentRequest, LineCodec, OperationStatus, SWEEP_COMPLETE_MASK,
//! };
//!
//! let request = InstrumentRequest::SetCenterFrequency { mhz: 100.0 };
//! assert_eq!(request.encode(), "SENS:FREQ:CENT 100 MHz");
//!
//! let mut codec = LineCodec::new();
//! codec.push_bytes(b"-113,\"Undefined header\"\n");
//! let line = codec.next_line().unwrap().unwrap();
//! let entry = ErrorEntry::parse(&line).unwrap();
//! assert!(entry.is_error());
//!
//! let status = OperationStatus::parse(&SWEEP_COMPLETE_MASK.to_string()).unwrap();
//! assert!(status.sweep_complete());
//! ```

pub mod address;
pub mod codec;
pub mod command;
pub mod error;
pub mod header;
pub mod response;

pub use address::{ResourceAddress, SCPI_RAW_PORT};
pub use codec::{encode_line, LineCodec};
pub use command::{Detector, InstrumentRequest, Setting, TraceMode, SWEEP_COMPLETE_MASK};
pub use error::ParseError;
pub use header::ParsedCommand;
pub use response::{
    parse_bool, parse_frequency_hz, parse_number, ErrorEntry, Identity, OperationStatus,
};
