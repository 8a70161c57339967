//! Progress and result event stream
//!
//! The worker reports everything through a single unbounded channel of
//! [`SweepEvent`]s, so the consumer (a UI thread, the CLI printer, a test)
//! can live on a different execution context and emission never blocks the
//! worker. Events arrive in the order the worker produced them: progress is
//! non-decreasing and result batches follow plan order.

use serde::Serialize;
use tokio::sync::mpsc;

use crate::error::InstrumentError;
use crate::state::{SweepResults, SweepState};

/// Sending half of the event stream
pub type EventSender = mpsc::UnboundedSender<SweepEvent>;

/// Receiving half of the event stream
pub type EventReceiver = mpsc::UnboundedReceiver<SweepEvent>;

/// Create an event channel for a sweep
pub fn event_channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}

/// Everything a sweep reports to its caller
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum SweepEvent {
    // -------------------------------------------------------------------------
    // Lifecycle
    // -------------------------------------------------------------------------
    /// The worker entered `Running`
    Started {
        /// Number of set-points in the plan
        points: usize,
    },

    /// The worker reached a terminal state and finished cleanup
    Finished {
        state: SweepState,
        /// Error message for `Failed` runs
        error: Option<String>,
    },

    // -------------------------------------------------------------------------
    // Progress and results
    // -------------------------------------------------------------------------
    /// Percentage of set-points measured, 0..=100
    Progress { percent: u8 },

    /// Owned copy of the result buffer
    Results {
        results: SweepResults,
        /// Set on the last emission of the run
        is_final: bool,
    },

    // -------------------------------------------------------------------------
    // Instrument side effects
    // -------------------------------------------------------------------------
    /// The analyzer reference level was raised to avoid clipping
    ReferenceLevelChanged { from_dbm: f64, to_dbm: f64 },

    /// An instrument reported a non-zero error code after a write
    DeviceError(InstrumentError),
}

impl SweepEvent {
    /// Returns true for `Progress` and `Results`
    pub fn is_report(&self) -> bool {
        matches!(self, Self::Progress { .. } | Self::Results { .. })
    }

    /// Returns true for `Started` and `Finished`
    pub fn is_lifecycle(&self) -> bool {
        matches!(self, Self::Started { .. } | Self::Finished { .. })
    }

    /// Progress percentage, if this is a progress event
    pub fn progress(&self) -> Option<u8> {
        match self {
            Self::Progress { percent } => Some(*percent),
            _ => None,
        }
    }

    /// Result batch, if this is a results event
    pub fn results(&self) -> Option<&SweepResults> {
        match self {
            Self::Results { results, .. } => Some(results),
            _ => None,
        }
    }
}
