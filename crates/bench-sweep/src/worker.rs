//! Sweep worker state machine
//!
//! The worker owns the analyzer session (and any signal generator sessions)
//! for the duration of one run and drives them through the plan:
//!
//! ```text
//! Idle -> Running -> { Completed | Cancelled | Failed }
//! ```
//!
//! Before the first step the worker captures the instrument settings it is
//! about to change. Each step then applies the set-point to every session,
//! triggers a single acquisition, waits for completion (status register
//! poll or `*OPC?`), reads the peak marker and appends to the run buffer.
//! Cancellation is cooperative and only observed between steps.
//!
//! Whatever the terminal state, cleanup restores the captured settings
//! exactly once with best-effort writes, then `Finished` is emitted.

use std::time::Duration;

use bench_scpi::{
    Detector, InstrumentRequest, OperationStatus, Setting, TraceMode, SWEEP_COMPLETE_MASK,
};
use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{InstrumentError, SessionError, SweepError};
use crate::events::{EventSender, SweepEvent};
use crate::plan::SweepPlan;
use crate::reference::ReferenceLevelPolicy;
use crate::session::InstrumentSession;
use crate::snapshot::{RestoreReport, SettingsSnapshot, ANALYZER_SETTINGS, GENERATOR_SETTINGS};
use crate::state::{SweepResults, SweepRun, SweepState};

/// How the worker waits for a triggered sweep to finish
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompletionWait {
    /// Poll the operation event register until the sweep bit is set
    #[default]
    StatusPoll,
    /// Block on a single `*OPC?` query
    OperationComplete,
}

/// Worker configuration
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Emit a result batch every K steps (plus the final step)
    pub result_every: usize,
    /// Sleep between status register polls
    pub poll_interval: Duration,
    /// Budget for one acquisition to complete
    pub acquisition_timeout: Duration,
    /// Completion strategy
    pub completion: CompletionWait,
    /// Raise the reference level when peaks approach it
    pub reference_policy: Option<ReferenceLevelPolicy>,
    /// Fail the run when a session reports the same error twice in one step
    pub escalate_repeated_errors: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            result_every: 20,
            poll_interval: Duration::from_millis(100),
            acquisition_timeout: Duration::from_secs(10),
            completion: CompletionWait::StatusPoll,
            reference_policy: None,
            escalate_repeated_errors: true,
        }
    }
}

/// Runs one sweep plan against an analyzer and optional generators
#[derive(Debug)]
pub struct SweepWorker {
    plan: SweepPlan,
    analyzer: InstrumentSession,
    generators: Vec<InstrumentSession>,
    config: WorkerConfig,
}

/// Handle to a worker running on its own task
#[derive(Debug)]
pub struct SweepHandle {
    cancel: CancellationToken,
    state_rx: watch::Receiver<SweepState>,
    task: JoinHandle<SweepOutcome>,
}

impl SweepHandle {
    /// Request cooperative cancellation; observed before the next step
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Token shared with the worker
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Current worker state
    pub fn state(&self) -> SweepState {
        *self.state_rx.borrow()
    }

    /// Receiver for state changes
    pub fn state_receiver(&self) -> watch::Receiver<SweepState> {
        self.state_rx.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the worker to finish
    pub async fn join(self) -> Result<SweepOutcome, JoinError> {
        self.task.await
    }
}

/// Result of a finished run; hands the sessions back to the caller
#[derive(Debug)]
pub struct SweepOutcome {
    /// Terminal state
    pub state: SweepState,
    /// Everything measured before the run ended
    pub results: SweepResults,
    /// Why the run failed
    pub error: Option<SweepError>,
    /// Settings restore summary
    pub restore: RestoreReport,
    /// Device errors reported during the run, including cleanup
    pub device_errors: Vec<InstrumentError>,
    analyzer: InstrumentSession,
    generators: Vec<InstrumentSession>,
}

impl SweepOutcome {
    pub fn analyzer(&self) -> &InstrumentSession {
        &self.analyzer
    }

    pub fn generators(&self) -> &[InstrumentSession] {
        &self.generators
    }

    /// Take the sessions back for further use
    pub fn into_sessions(self) -> (InstrumentSession, Vec<InstrumentSession>) {
        (self.analyzer, self.generators)
    }

    /// Close every session the worker used
    pub async fn close_sessions(&mut self) {
        for generator in &mut self.generators {
            generator.close().await;
        }
        self.analyzer.close().await;
    }
}

/// Settings captured in preparation, restored in cleanup
#[derive(Debug, Default)]
struct Snapshots {
    analyzer: Option<SettingsSnapshot>,
    generators: Vec<SettingsSnapshot>,
}

enum RunEnd {
    Completed,
    Cancelled,
}

fn emit(events: &EventSender, event: SweepEvent) {
    // Nobody listening is not an error for the worker
    let _ = events.send(event);
}

/// First error that the same session reported twice
fn repeated_error(errors: &[InstrumentError]) -> Option<&InstrumentError> {
    errors.iter().enumerate().find_map(|(i, e)| {
        errors[i + 1..]
            .iter()
            .any(|other| other.address == e.address && other.code == e.code)
            .then_some(e)
    })
}

impl SweepWorker {
    /// Worker for `plan` that takes exclusive ownership of the analyzer
    pub fn new(plan: SweepPlan, analyzer: InstrumentSession) -> Self {
        Self {
            plan,
            analyzer,
            generators: Vec::new(),
            config: WorkerConfig::default(),
        }
    }

    /// Attach a signal generator that follows the set-points
    pub fn with_generator(mut self, generator: InstrumentSession) -> Self {
        self.generators.push(generator);
        self
    }

    pub fn with_config(mut self, config: WorkerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn plan(&self) -> &SweepPlan {
        &self.plan
    }

    /// Start the worker on its own task
    pub fn spawn(self, events: EventSender) -> SweepHandle {
        self.spawn_with_cancel(events, CancellationToken::new())
    }

    /// Start the worker on its own task with a caller supplied token
    pub fn spawn_with_cancel(self, events: EventSender, cancel: CancellationToken) -> SweepHandle {
        let (state_tx, state_rx) = watch::channel(SweepState::Idle);
        let token = cancel.clone();
        let task = tokio::spawn(async move { self.execute(events, token, state_tx).await });

        SweepHandle {
            cancel,
            state_rx,
            task,
        }
    }

    /// Run the sweep on the current task
    pub async fn run(self, events: EventSender, cancel: CancellationToken) -> SweepOutcome {
        let (state_tx, _state_rx) = watch::channel(SweepState::Idle);
        self.execute(events, cancel, state_tx).await
    }

    async fn execute(
        mut self,
        events: EventSender,
        cancel: CancellationToken,
        state_tx: watch::Sender<SweepState>,
    ) -> SweepOutcome {
        let mut run = SweepRun::new(self.plan.len());
        let mut device_errors = Vec::new();
        let mut snapshots = Snapshots::default();

        // Rejected before any instrument I/O
        let result = match self.plan.validate() {
            Err(e) => {
                warn!("Sweep rejected: {}", e);
                Err(e)
            }
            Ok(()) => {
                state_tx.send_replace(SweepState::Running);
                info!(
                    "Starting sweep of {} points on {} with {} generator(s)",
                    self.plan.len(),
                    self.analyzer.address(),
                    self.generators.len()
                );
                emit(&events, SweepEvent::Started { points: self.plan.len() });

                self.sweep(&events, &cancel, &mut run, &mut snapshots, &mut device_errors)
                    .await
            }
        };

        let (state, error) = match result {
            Ok(RunEnd::Completed) => (SweepState::Completed, None),
            Ok(RunEnd::Cancelled) => (SweepState::Cancelled, None),
            Err(e) => (SweepState::Failed, Some(e)),
        };

        if let Some(e) = &error {
            warn!("Sweep failed after {} of {} points: {}", run.len(), run.total(), e);
        }

        // Cleanup: runs once for every terminal state
        let restore = self.restore(&snapshots).await;
        if !restore.is_clean() {
            warn!(
                "Restore finished with {} of {} writes failing",
                restore.failed, restore.attempted
            );
        }
        for e in self.drain_device_errors() {
            emit(&events, SweepEvent::DeviceError(e.clone()));
            device_errors.push(e);
        }

        if state != SweepState::Completed && run.has_unemitted() {
            emit(
                &events,
                SweepEvent::Results {
                    results: run.snapshot(),
                    is_final: true,
                },
            );
        }

        info!("Sweep {} with {} points", state, run.len());
        emit(
            &events,
            SweepEvent::Finished {
                state,
                error: error.as_ref().map(|e| e.to_string()),
            },
        );
        state_tx.send_replace(state);

        SweepOutcome {
            state,
            results: run.into_results(),
            error,
            restore,
            device_errors,
            analyzer: self.analyzer,
            generators: self.generators,
        }
    }

    async fn sweep(
        &mut self,
        events: &EventSender,
        cancel: &CancellationToken,
        run: &mut SweepRun,
        snapshots: &mut Snapshots,
        device_errors: &mut Vec<InstrumentError>,
    ) -> Result<RunEnd, SweepError> {
        let mut reference = self.prepare(snapshots).await?;
        self.collect_device_errors(events, device_errors, false)?;

        let setpoints = self.plan.setpoints_mhz.clone();
        let total = setpoints.len();
        let result_every = self.config.result_every.max(1);
        let dwell = self.plan.dwell();
        let mut last_progress = 0u8;

        for (i, setpoint) in setpoints.into_iter().enumerate() {
            if cancel.is_cancelled() {
                info!("Cancellation observed before step {} of {}", i + 1, total);
                return Ok(RunEnd::Cancelled);
            }

            self.apply_setpoint(setpoint).await?;
            if !dwell.is_zero() {
                tokio::time::sleep(dwell).await;
            }
            self.acquire(setpoint).await?;
            let value = self.read_marker().await?;

            let escalate = self.config.escalate_repeated_errors;
            self.collect_device_errors(events, device_errors, escalate)?;

            let percent = run.push(setpoint, value);
            debug!("Step {}/{}: {} MHz -> {} dBm", i + 1, total, setpoint, value);

            if percent > last_progress {
                last_progress = percent;
                emit(events, SweepEvent::Progress { percent });
            }

            let is_final = i + 1 == total;
            if i % result_every == 0 || is_final {
                emit(
                    events,
                    SweepEvent::Results {
                        results: run.snapshot(),
                        is_final,
                    },
                );
            }

            if let (Some(policy), Some(current)) = (self.config.reference_policy, reference) {
                if let Some(raised) = policy.next_reference_level(current, value) {
                    self.analyzer
                        .send_request(&InstrumentRequest::SetReferenceLevel { dbm: raised })
                        .await?;
                    info!(
                        "Raised reference level from {} to {} dBm (peak {} dBm)",
                        current, raised, value
                    );
                    emit(
                        events,
                        SweepEvent::ReferenceLevelChanged {
                            from_dbm: current,
                            to_dbm: raised,
                        },
                    );
                    reference = Some(raised);
                }
            }
        }

        Ok(RunEnd::Completed)
    }

    /// Capture current settings, then configure the instruments for stepping
    ///
    /// Returns the current reference level when the reference policy is on.
    async fn prepare(&mut self, snapshots: &mut Snapshots) -> Result<Option<f64>, SweepError> {
        snapshots.analyzer =
            Some(SettingsSnapshot::capture(&mut self.analyzer, &ANALYZER_SETTINGS).await?);
        for generator in &mut self.generators {
            let snapshot = SettingsSnapshot::capture(generator, &GENERATOR_SETTINGS).await?;
            snapshots.generators.push(snapshot);
        }

        let mut setup = vec![
            InstrumentRequest::SetSpan {
                mhz: self.plan.span_mhz,
            },
            InstrumentRequest::SetResolutionBandwidth {
                mhz: self.plan.rbw_mhz,
            },
            InstrumentRequest::SetTraceMode {
                mode: TraceMode::ClearWrite,
            },
            InstrumentRequest::SetDetector {
                detector: Detector::Average,
            },
            InstrumentRequest::SetContinuousSweep { enabled: false },
        ];
        if self.config.completion == CompletionWait::StatusPoll {
            setup.push(InstrumentRequest::EnableOperationEvents {
                mask: SWEEP_COMPLETE_MASK,
            });
        }
        for request in &setup {
            self.analyzer.send_request(request).await?;
        }

        for generator in &mut self.generators {
            if let Some(dbm) = self.plan.source_power_dbm {
                generator
                    .send_request(&InstrumentRequest::SetSourcePower { dbm })
                    .await?;
            }
            generator
                .send_request(&InstrumentRequest::SetModulation { on: false })
                .await?;
            generator
                .send_request(&InstrumentRequest::SetOutput { on: true })
                .await?;
        }

        if self.config.reference_policy.is_none() {
            return Ok(None);
        }
        let reference = self
            .analyzer
            .ask_number(&Setting::ReferenceLevel.query())
            .await?;
        debug!("Reference level is {} dBm", reference);
        Ok(Some(reference))
    }

    async fn apply_setpoint(&mut self, mhz: f64) -> Result<(), SweepError> {
        for generator in &mut self.generators {
            generator
                .send_request(&InstrumentRequest::SetSourceFrequency { mhz })
                .await?;
        }
        self.analyzer
            .send_request(&InstrumentRequest::SetCenterFrequency { mhz })
            .await?;
        Ok(())
    }

    /// Trigger one sweep and wait for the analyzer to finish it
    async fn acquire(&mut self, setpoint_mhz: f64) -> Result<(), SweepError> {
        let budget = self.config.acquisition_timeout;
        let timed_out = || SweepError::AcquisitionTimeout {
            setpoint_mhz,
            waited_ms: budget.as_millis() as u64,
        };

        match self.config.completion {
            CompletionWait::OperationComplete => {
                self.analyzer
                    .send_request(&InstrumentRequest::InitiateSweep)
                    .await?;
                let command = InstrumentRequest::OperationComplete.encode();
                match self.analyzer.ask_with_timeout(&command, budget).await {
                    Ok(_) => Ok(()),
                    Err(e) if e.is_timeout() => Err(timed_out()),
                    Err(e) => Err(e.into()),
                }
            }
            CompletionWait::StatusPoll => {
                self.analyzer
                    .send_request(&InstrumentRequest::ClearStatus)
                    .await?;
                self.analyzer
                    .send_request(&InstrumentRequest::InitiateSweep)
                    .await?;

                let deadline = Instant::now() + budget;
                let query = InstrumentRequest::OperationEvents;
                loop {
                    let reply = self.analyzer.ask_request(&query).await?;
                    let status = OperationStatus::parse(&reply).map_err(|source| {
                        SessionError::InvalidResponse {
                            command: query.encode(),
                            source,
                        }
                    })?;
                    if status.sweep_complete() {
                        return Ok(());
                    }

                    let now = Instant::now();
                    if now >= deadline {
                        return Err(timed_out());
                    }
                    tokio::time::sleep(self.config.poll_interval.min(deadline - now)).await;
                }
            }
        }
    }

    async fn read_marker(&mut self) -> Result<f64, SweepError> {
        self.analyzer
            .send_request(&InstrumentRequest::MarkerToPeak)
            .await?;
        let value = self
            .analyzer
            .ask_number(&InstrumentRequest::MarkerAmplitude.encode())
            .await?;
        Ok(value)
    }

    fn drain_device_errors(&mut self) -> Vec<InstrumentError> {
        let mut errors = self.analyzer.take_device_errors();
        for generator in &mut self.generators {
            errors.extend(generator.take_device_errors());
        }
        errors
    }

    /// Report device errors queued since the last call
    ///
    /// With `escalate` set, a session reporting the same code twice fails the
    /// step.
    fn collect_device_errors(
        &mut self,
        events: &EventSender,
        all: &mut Vec<InstrumentError>,
        escalate: bool,
    ) -> Result<(), SweepError> {
        let errors = self.drain_device_errors();
        if errors.is_empty() {
            return Ok(());
        }

        for e in &errors {
            emit(events, SweepEvent::DeviceError(e.clone()));
        }
        let repeated = if escalate {
            repeated_error(&errors).cloned()
        } else {
            None
        };
        all.extend(errors);

        match repeated {
            Some(e) => Err(SweepError::Instrument(e)),
            None => Ok(()),
        }
    }

    async fn restore(&mut self, snapshots: &Snapshots) -> RestoreReport {
        let mut report = RestoreReport::default();
        for (generator, snapshot) in self.generators.iter_mut().zip(&snapshots.generators) {
            report.absorb(snapshot.restore(generator).await);
        }
        if let Some(snapshot) = &snapshots.analyzer {
            report.absorb(snapshot.restore(&mut self.analyzer).await);
        }
        report
    }
}
