//! Cancellable Background Sweep Controller
//!
//! This crate drives a spectrum analyzer (and optionally one or more signal
//! generators) through a list of set-points on a background task, reporting
//! progress and partial results through a channel while staying cancellable.
//!
//! # Architecture
//!
//! - [`InstrumentSession`]: request/response text channel to one instrument,
//!   with a reply timeout and an error queue check after every write
//! - [`SweepPlan`]: ordered set-points plus span, RBW and dwell
//! - [`SweepWorker`]: the `Idle -> Running -> {Completed, Cancelled, Failed}`
//!   state machine; captures instrument settings before the first step and
//!   restores them exactly once afterwards
//! - [`SweepEvent`]: one-way event stream (progress, result batches,
//!   lifecycle) consumed on any execution context
//! - [`Settings`]: flat YAML document of named parameters
//!
//! # Example
//!
//! ```rust,no_run
//! use bench_sweep::{event_channel, InstrumentSession, SessionConfig, SweepPlan, SweepWorker};
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let address = "TCPIP0::192.168.1.20::INSTR";
//! let analyzer = InstrumentSession::open(address, SessionConfig::default()).await?;
//! let plan = SweepPlan::linear(100.0, 1000.0, 10, 1.0, 0.1)?;
//!
//! let (tx, mut rx) = event_channel();
//! let handle = SweepWorker::new(plan, analyzer).spawn(tx);
//! while let Some(event) = rx.recv().await {
//!     println!("{:?}", event);
//! }
//! let mut outcome = handle.join().await?;
//! outcome.close_sessions().await;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod events;
pub mod plan;
pub mod reference;
pub mod session;
pub mod settings;
pub mod snapshot;
pub mod state;
pub mod worker;

pub use error::{InstrumentError, SessionError, SettingsError, SweepError};
pub use events::{event_channel, EventReceiver, EventSender, SweepEvent};
pub use plan::{SweepPlan, MAX_POINTS};
pub use reference::ReferenceLevelPolicy;
pub use session::{InstrumentIo, InstrumentSession, SessionConfig};
pub use settings::Settings;
pub use snapshot::{RestoreReport, SettingsSnapshot};
pub use state::{SweepResults, SweepRun, SweepState};
pub use worker::{CompletionWait, SweepHandle, SweepOutcome, SweepWorker, WorkerConfig};

// Cancellation token used by `SweepWorker::run` and `spawn_with_cancel`
pub use tokio_util::sync::CancellationToken;
