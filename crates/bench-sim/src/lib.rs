//! Bench Instrument Simulation Library
//!
//! This crate provides virtual bench instruments for testing the sweep
//! controller without physical hardware. It includes:
//!
//! - **VirtualAnalyzer**: spectrum analyzer with single sweeps, the
//!   operation event register, `*OPC?` and a peak marker whose level is a
//!   function of the center frequency
//! - **VirtualGenerator**: CW signal generator with frequency, power, RF
//!   output and modulation state
//!
//! Both keep an error queue (`SYST:ERR?`), accept long and short command
//! forms, record every received line in a shared [`CommandLog`], and support
//! fault injection: stalled replies, dropped connections, device errors and
//! command hooks.
//!
//! # Example
//!
//! ```rust
//! use bench_sim::{VirtualAnalyzer, VirtualInstrument};
//!
//! let mut analyzer = VirtualAnalyzer::new("SA1").with_constant_level(-40.0);
//! analyzer.process_line("SENS:FREQ:CENT 100 MHz");
//! analyzer.process_line("CALC:MARK:MAX");
//! assert_eq!(analyzer.process_line("CALC:MARK:Y?").as_deref(), Some("-40"));
//! assert_eq!(analyzer.log().len(), 3);
//! ```

pub mod analyzer;
mod core;
pub mod generator;
pub mod log;
pub mod task;

use std::time::Duration;

pub use analyzer::VirtualAnalyzer;
pub use crate::core::CommandHook;
pub use generator::VirtualGenerator;
pub use log::CommandLog;
pub use task::{
    run_virtual_instrument_task, spawn_virtual_instrument, VirtualInstrumentCommand,
    VirtualInstrumentHandle,
};

/// A simulated instrument that answers command lines
pub trait VirtualInstrument: Send {
    /// Identifier for logging
    fn id(&self) -> &str;

    /// Process one command line, returning the reply line if any
    fn process_line(&mut self, line: &str) -> Option<String>;

    /// False once the instrument has dropped the connection
    fn is_connected(&self) -> bool {
        true
    }

    /// How long to hold back the reply to the line just processed
    fn take_reply_delay(&mut self) -> Option<Duration> {
        None
    }

    /// Shared record of received lines
    fn log(&self) -> CommandLog;
}
